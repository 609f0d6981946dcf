//! Diff-based churn statistics over GitHub commit documents
//!
//! Works on the `files` array of a commit as returned by
//! `GET /repos/{owner}/{repo}/commits/{sha}`: each entry carries
//! `filename`, `status` and, unless trimmed, the unified `patch`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::debug;
use serde_json::Value;

use crate::language::LanguageProfile;

/// Linguist-style file category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Programming,
    Markup,
    Data,
    Prose,
}

const PROGRAMMING: &[&str] = &[
    "js", "jsx", "mjs", "cjs", "ts", "tsx", "c", "cc", "cpp", "cxx", "h", "hh", "hpp", "hxx",
    "cs", "go", "java", "kt", "kts", "scala", "groovy", "py", "pyx", "rb", "rake", "php", "rs",
    "swift", "m", "mm", "sh", "bash", "zsh", "ps1", "pl", "pm", "lua", "r", "dart", "ex", "exs",
    "erl", "hs", "clj", "fs", "vb", "sql", "vue", "svelte", "coffee", "elm", "ml", "nim", "zig",
];
const MARKUP: &[&str] = &[
    "md", "markdown", "rst", "adoc", "asciidoc", "html", "htm", "xhtml", "css", "scss", "sass",
    "less", "tex", "org", "textile", "rdoc", "pod",
];
const DATA: &[&str] = &[
    "json", "yml", "yaml", "xml", "toml", "ini", "cfg", "conf", "csv", "tsv", "lock", "properties",
    "gradle", "plist", "svg", "proto", "graphql", "env",
];
const PROSE: &[&str] = &["txt", "text"];
const PROGRAMMING_NAMES: &[&str] = &["Makefile", "Dockerfile", "Rakefile", "Gemfile", "Jenkinsfile"];

/// Extensions counted as programming when nothing else matches.
const FALLBACK_PROGRAMMING: &[&str] = &["js", "jsx", "ts", "tsx", "cpp", "cxx", "cc", "h", "hpp", "cs"];

#[must_use]
pub fn classify(filename: &str) -> FileKind {
    let path = Path::new(filename);
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or(filename);
    if PROGRAMMING_NAMES.contains(&name) {
        return FileKind::Programming;
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let tables = [
        (PROGRAMMING, FileKind::Programming),
        (MARKUP, FileKind::Markup),
        (DATA, FileKind::Data),
        (PROSE, FileKind::Prose),
    ];
    if let Some((_, kind)) = tables.iter().find(|(exts, _)| exts.contains(&ext.as_str())) {
        return *kind;
    }
    if FALLBACK_PROGRAMMING.contains(&ext.as_str()) {
        FileKind::Programming
    } else {
        FileKind::Data
    }
}

/// Per-extraction memo of filename classifications.
#[derive(Debug, Default)]
pub struct FileTypeCache {
    kinds: HashMap<String, FileKind>,
}

impl FileTypeCache {
    pub fn kind(&mut self, filename: &str) -> FileKind {
        if let Some(kind) = self.kinds.get(filename) {
            return *kind;
        }
        let kind = classify(filename);
        debug!("File {filename} classified as {kind:?}");
        self.kinds.insert(filename.to_string(), kind);
        kind
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub lines_added: i64,
    pub lines_deleted: i64,
    pub test_lines_added: i64,
    pub test_lines_deleted: i64,
    pub files_added: i64,
    pub files_removed: i64,
    pub files_modified: i64,
    pub files_touched: i64,
    pub src_files: i64,
    pub doc_files: i64,
    pub other_files: i64,
}

impl BuildStats {
    pub fn src_churn(&self) -> i64 {
        self.lines_added + self.lines_deleted
    }

    pub fn test_churn(&self) -> i64 {
        self.test_lines_added + self.test_lines_deleted
    }
}

fn files(commit: &Value) -> impl Iterator<Item = &Value> {
    commit
        .get("files")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn filename(file: &Value) -> Option<&str> {
    file.get("filename").and_then(Value::as_str)
}

fn patch_lines(file: &Value, marker: char) -> i64 {
    file.get("patch")
        .and_then(Value::as_str)
        .map_or(0, |p| p.lines().filter(|l| l.starts_with(marker)).count() as i64)
}

/// Churn over the given commit documents. Commits without a `parents`
/// field are not full commit objects and are ignored.
pub fn build_stats(commits: &[Value], profile: LanguageProfile, cache: &mut FileTypeCache) -> BuildStats {
    let commits: Vec<&Value> = commits.iter().filter(|c| c.get("parents").is_some()).collect();
    let mut stats = BuildStats::default();

    for commit in &commits {
        for file in files(commit) {
            let Some(name) = filename(file) else {
                continue;
            };
            if cache.kind(name) != FileKind::Programming {
                continue;
            }
            let (added, deleted) = (patch_lines(file, '+'), patch_lines(file, '-'));
            if profile.is_test_file(name) {
                stats.test_lines_added += added;
                stats.test_lines_deleted += deleted;
            } else {
                stats.lines_added += added;
                stats.lines_deleted += deleted;
            }
        }
    }

    let distinct = |pred: &mut dyn FnMut(&Value) -> bool| -> i64 {
        let mut seen = HashSet::new();
        for commit in &commits {
            for file in files(commit) {
                if let Some(name) = filename(file)
                    && pred(file)
                {
                    seen.insert(name.to_string());
                }
            }
        }
        seen.len() as i64
    };
    let status_is = |status: &'static str| {
        move |f: &Value| f.get("status").and_then(Value::as_str) == Some(status)
    };

    stats.files_added = distinct(&mut status_is("added"));
    stats.files_removed = distinct(&mut status_is("removed"));
    stats.files_modified = distinct(&mut status_is("modified"));
    stats.files_touched = distinct(&mut |_| true);
    stats.src_files = distinct(&mut |f| filename(f).is_some_and(|n| cache.kind(n) == FileKind::Programming));
    stats.doc_files = distinct(&mut |f| filename(f).is_some_and(|n| cache.kind(n) == FileKind::Markup));
    stats.other_files = distinct(&mut |f| filename(f).is_some_and(|n| cache.kind(n) == FileKind::Data));
    stats
}
