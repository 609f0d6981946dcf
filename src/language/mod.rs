//! Per-language source/test classification
//!
//! A [`LanguageProfile`] is picked once per repository from its declared
//! language and answers the questions the extractor asks about paths and
//! lines: is this a source file, a test file, a test case, an assertion.

pub mod comments;

use lazy_static::lazy_static;
use regex::Regex;

pub use comments::{strip_c_style, strip_hash_style, strip_ruby};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageProfile {
    JavaScript,
    TypeScript,
    Cpp,
    CSharp,
    Go,
    Java,
    Python,
    Ruby,
}

/// Declared-language lookup, matched in order as a case-insensitive substring.
const LOOKUP: &[(&str, LanguageProfile)] = &[
    ("javascript", LanguageProfile::JavaScript),
    ("typescript", LanguageProfile::TypeScript),
    ("c++", LanguageProfile::Cpp),
    ("c#", LanguageProfile::CSharp),
    ("go", LanguageProfile::Go),
    ("java", LanguageProfile::Java),
    ("python", LanguageProfile::Python),
    ("ruby", LanguageProfile::Ruby),
];

struct Rules {
    extension: Regex,
    /// Extensions a test file may carry; narrower than `extension` for C++.
    test_extension: Regex,
    test_paths: Vec<Regex>,
    test_cases: Vec<Regex>,
    assertions: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| Regex::new(p)).collect()
}

const JS_TEST_CASES: &[&str] = &[r"^\s*(it|test|describe)\s*\("];
const JS_ASSERTIONS: &[&str] = &[r"expect\s*\(", r"assert\s*\.", r"should\s*\."];
const TESTS_DIR: &str = r"(?i)(^|/)tests?/";

impl LanguageProfile {
    pub const ALL: [LanguageProfile; 8] = [
        LanguageProfile::JavaScript,
        LanguageProfile::TypeScript,
        LanguageProfile::Cpp,
        LanguageProfile::CSharp,
        LanguageProfile::Go,
        LanguageProfile::Java,
        LanguageProfile::Python,
        LanguageProfile::Ruby,
    ];

    /// Profile for a repository's declared language; JavaScript when unknown.
    #[must_use]
    pub fn select(language: Option<&str>) -> Self {
        let declared = language.unwrap_or_default().to_lowercase();
        if declared.is_empty() {
            return LanguageProfile::JavaScript;
        }
        LOOKUP
            .iter()
            .find(|(name, _)| declared.contains(name))
            .map_or(LanguageProfile::JavaScript, |(_, profile)| *profile)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            LanguageProfile::JavaScript => "javascript",
            LanguageProfile::TypeScript => "typescript",
            LanguageProfile::Cpp => "c++",
            LanguageProfile::CSharp => "c#",
            LanguageProfile::Go => "go",
            LanguageProfile::Java => "java",
            LanguageProfile::Python => "python",
            LanguageProfile::Ruby => "ruby",
        }
    }

    fn build_rules(self) -> Result<Rules, regex::Error> {
        let rules = match self {
            LanguageProfile::JavaScript => Rules {
                extension: Regex::new(r"\.(js|jsx)$")?,
                test_extension: Regex::new(r"\.(js|jsx)$")?,
                test_paths: compile(&[r"\.(test|spec)\.(js|jsx)$", TESTS_DIR, r"(?i)(^|/)__tests__/"])?,
                test_cases: compile(JS_TEST_CASES)?,
                assertions: compile(JS_ASSERTIONS)?,
            },
            LanguageProfile::TypeScript => Rules {
                extension: Regex::new(r"\.(ts|tsx)$")?,
                test_extension: Regex::new(r"\.(ts|tsx)$")?,
                test_paths: compile(&[r"\.(test|spec)\.(ts|tsx)$", TESTS_DIR, r"(?i)(^|/)__tests__/"])?,
                test_cases: compile(JS_TEST_CASES)?,
                assertions: compile(JS_ASSERTIONS)?,
            },
            LanguageProfile::Cpp => Rules {
                extension: Regex::new(r"\.(cpp|cxx|cc|h|hpp)$")?,
                test_extension: Regex::new(r"\.(cpp|cxx|cc)$")?,
                test_paths: compile(&[
                    r"\.(test|spec)\.(cpp|cxx|cc)$",
                    TESTS_DIR,
                    r"(?i)test_.*\.(cpp|cxx|cc)$",
                ])?,
                test_cases: compile(&[r"^\s*(TEST|TEST_F|TEST_CASE)\s*\("])?,
                assertions: compile(&[
                    r"(ASSERT|EXPECT)_(TRUE|FALSE|EQ|NE|LT|GT|LE|GE|STREQ|STRNE)\s*\(",
                    r"(REQUIRE|CHECK)\s*\(",
                ])?,
            },
            LanguageProfile::CSharp => Rules {
                extension: Regex::new(r"\.cs$")?,
                test_extension: Regex::new(r"\.cs$")?,
                test_paths: compile(&[r"\.(test|spec)\.cs$", TESTS_DIR, r"(?i)test_.*\.cs$"])?,
                test_cases: compile(&[r"^\s*\[(TestMethod|Test|Fact|Theory)\]"])?,
                assertions: compile(&[r"Assert\."])?,
            },
            LanguageProfile::Go => Rules {
                extension: Regex::new(r"\.go$")?,
                test_extension: Regex::new(r"\.go$")?,
                test_paths: compile(&[r"_test\.go$"])?,
                test_cases: compile(&[r"^\s*func\s+(Test|Benchmark|Example|Fuzz)\w*\s*\("])?,
                assertions: compile(&[
                    r"\bt\.(Error|Errorf|Fatal|Fatalf|Fail|FailNow)\s*\(",
                    r"\b(assert|require)\.\w+\s*\(",
                ])?,
            },
            LanguageProfile::Java => Rules {
                extension: Regex::new(r"\.java$")?,
                test_extension: Regex::new(r"\.java$")?,
                test_paths: compile(&[r"(Test|Tests|IT)\.java$", r"(^|/)src/test/", TESTS_DIR])?,
                test_cases: compile(&[r"^\s*@(Test|ParameterizedTest|RepeatedTest)\b"])?,
                assertions: compile(&[r"\bassert\w*\s*\(", r"^\s*assert\s"])?,
            },
            LanguageProfile::Python => Rules {
                extension: Regex::new(r"\.py$")?,
                test_extension: Regex::new(r"\.py$")?,
                test_paths: compile(&[r"(^|/)test_[^/]*\.py$", r"_test\.py$", TESTS_DIR])?,
                test_cases: compile(&[r"^\s*(async\s+)?def\s+test\w*\s*\(", r"^\s*class\s+Test\w*"])?,
                assertions: compile(&[r"^\s*assert\b", r"\bself\.assert\w*\s*\(", r"\bpytest\.raises\s*\("])?,
            },
            LanguageProfile::Ruby => Rules {
                extension: Regex::new(r"\.rb$")?,
                test_extension: Regex::new(r"\.rb$")?,
                test_paths: compile(&[r"_(test|spec)\.rb$", r"(^|/)(test|spec)s?/"])?,
                test_cases: compile(&[r"^\s*(it|test|specify|scenario)[\s(]", r"^\s*def\s+test_"])?,
                assertions: compile(&[r"\b(assert|refute)\w*", r"\bexpect\s*[({]", r"\.should\b"])?,
            },
        };
        Ok(rules)
    }

    fn rules(self) -> Option<&'static Rules> {
        RULES.as_ref().ok().and_then(|rules| rules.get(self as usize))
    }

    /// Language extension and not a test file.
    #[must_use]
    pub fn is_source_file(self, path: &str) -> bool {
        self.rules()
            .is_some_and(|r| r.extension.is_match(path) && !self.is_test_file(path))
    }

    #[must_use]
    pub fn is_test_file(self, path: &str) -> bool {
        self.rules().is_some_and(|r| {
            r.test_extension.is_match(path) && r.test_paths.iter().any(|re| re.is_match(path))
        })
    }

    #[must_use]
    pub fn is_test_case_declaration(self, line: &str) -> bool {
        self.rules()
            .is_some_and(|r| r.test_cases.iter().any(|re| re.is_match(line)))
    }

    #[must_use]
    pub fn is_assertion(self, line: &str) -> bool {
        self.rules()
            .is_some_and(|r| r.assertions.iter().any(|re| re.is_match(line)))
    }

    #[must_use]
    pub fn strip_comments(self, text: &str) -> String {
        match self {
            LanguageProfile::Python => strip_hash_style(text, true),
            LanguageProfile::Ruby => strip_ruby(text),
            _ => strip_c_style(text),
        }
    }
}

lazy_static! {
    /// Indexed by `LanguageProfile as usize`.
    static ref RULES: Result<Vec<Rules>, regex::Error> =
        LanguageProfile::ALL.iter().map(|p| p.build_rules()).collect();
}

/// Non-blank lines of already stripped text that satisfy `filter`.
pub fn count_lines(stripped: &str, filter: impl Fn(&str) -> bool) -> usize {
    stripped
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter(|l| filter(l))
        .count()
}
