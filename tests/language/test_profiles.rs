//! Tests for per-language path and line classification.

use ci_harvest::LanguageProfile;
use ci_harvest::language::count_lines;

#[test]
fn test_select_by_declared_language() {
    assert_eq!(LanguageProfile::select(Some("JavaScript")), LanguageProfile::JavaScript);
    assert_eq!(LanguageProfile::select(Some("Java")), LanguageProfile::Java);
    assert_eq!(LanguageProfile::select(Some("C++")), LanguageProfile::Cpp);
    assert_eq!(LanguageProfile::select(Some("C#")), LanguageProfile::CSharp);
    assert_eq!(LanguageProfile::select(Some("Python")), LanguageProfile::Python);
    assert_eq!(LanguageProfile::select(Some("Go")), LanguageProfile::Go);
    assert_eq!(LanguageProfile::select(None), LanguageProfile::JavaScript);
    assert_eq!(LanguageProfile::select(Some("COBOL")), LanguageProfile::JavaScript);
    assert_eq!(LanguageProfile::Cpp.name(), "c++");
}

#[test]
fn test_javascript_paths() {
    let js = LanguageProfile::JavaScript;
    assert!(js.is_source_file("src/index.js"));
    assert!(js.is_test_file("src/index.test.js"));
    assert!(js.is_test_file("test/app.js"));
    assert!(js.is_test_file("lib/__tests__/app.jsx"));
    assert!(!js.is_source_file("test/app.js"));
    assert!(!js.is_source_file("README.md"));
    assert!(!js.is_test_file("src/contest/app.js"));
}

#[test]
fn test_other_language_paths() {
    assert!(LanguageProfile::Go.is_test_file("pkg/server_test.go"));
    assert!(LanguageProfile::Go.is_source_file("pkg/server.go"));
    assert!(LanguageProfile::Java.is_test_file("src/test/java/FooTest.java"));
    assert!(LanguageProfile::Java.is_source_file("src/main/java/Foo.java"));
    assert!(LanguageProfile::Python.is_test_file("pkg/test_models.py"));
    assert!(LanguageProfile::Python.is_source_file("pkg/models.py"));
    assert!(LanguageProfile::Ruby.is_test_file("spec/models/user_spec.rb"));
    assert!(LanguageProfile::Cpp.is_source_file("include/foo.hpp"));
    assert!(!LanguageProfile::Cpp.is_test_file("tests/foo.hpp"));
}

#[test]
fn test_test_case_and_assertion_lines() {
    let js = LanguageProfile::JavaScript;
    assert!(js.is_test_case_declaration("  it('adds', () => {"));
    assert!(js.is_test_case_declaration("describe(\"math\", () => {"));
    assert!(js.is_assertion("    expect(sum(1, 2)).toBe(3);"));
    assert!(!js.is_assertion("const x = 1;"));

    let py = LanguageProfile::Python;
    assert!(py.is_test_case_declaration("    def test_sum(self):"));
    assert!(py.is_assertion("        self.assertEqual(a, b)"));
    assert!(py.is_assertion("    assert x == 1"));

    let go = LanguageProfile::Go;
    assert!(go.is_test_case_declaration("func TestServer(t *testing.T) {"));
    assert!(go.is_assertion("\t\tt.Fatalf(\"bad: %v\", err)"));
}

#[test]
fn test_counts_ignore_comments() {
    let js = LanguageProfile::JavaScript;
    let src = "// header\nit('a', () => {\n  /* expect(1) */\n  expect(a).toBe(1);\n});\n\n";
    let stripped = js.strip_comments(src);
    assert_eq!(count_lines(&stripped, |_| true), 3);
    assert_eq!(count_lines(&stripped, |l| js.is_test_case_declaration(l)), 1);
    assert_eq!(count_lines(&stripped, |l| js.is_assertion(l)), 1);

    let py = LanguageProfile::Python;
    let src = "\"\"\"module doc\"\"\"\n# comment\nx = 1\n";
    assert_eq!(count_lines(&py.strip_comments(src), |_| true), 1);
}
