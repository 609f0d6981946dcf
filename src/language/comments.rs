//! Comment stripping
//!
//! Comments are removed while keeping line structure intact so that
//! comment-only lines end up blank and drop out of line counts.

#[derive(Clone, Copy, PartialEq, Eq)]
enum CState {
    Code,
    Str(char),
    LineComment,
    BlockComment,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum HashState {
    Code,
    Str(char),
    Comment,
    /// Python triple-quoted block, treated as a docstring
    Docstring(char),
}

/// Strip `//` and `/* */` comments, leaving string literals untouched.
pub fn strip_c_style(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut state = CState::Code;

    while let Some(c) = chars.next() {
        match state {
            CState::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = CState::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = CState::BlockComment;
                }
                '"' | '\'' | '`' => {
                    out.push(c);
                    state = CState::Str(c);
                }
                _ => out.push(c),
            },
            CState::Str(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == quote || (c == '\n' && quote != '`') {
                    state = CState::Code;
                }
            }
            CState::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = CState::Code;
                }
            }
            CState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = CState::Code;
                } else if c == '\n' {
                    out.push('\n');
                }
            }
        }
    }
    out
}

/// Strip `#` comments. With `docstrings`, triple-quoted blocks are removed too.
pub fn strip_hash_style(text: &str, docstrings: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut state = HashState::Code;
    let mut i = 0;

    let triple_at = |i: usize, q: char| {
        chars.get(i) == Some(&q) && chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q)
    };

    while i < chars.len() {
        let c = chars[i];
        match state {
            HashState::Code => match c {
                '#' => state = HashState::Comment,
                '"' | '\'' if docstrings && triple_at(i, c) => {
                    state = HashState::Docstring(c);
                    i += 2;
                }
                '"' | '\'' => {
                    out.push(c);
                    state = HashState::Str(c);
                }
                _ => out.push(c),
            },
            HashState::Str(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(&escaped) = chars.get(i + 1) {
                        out.push(escaped);
                        i += 1;
                    }
                } else if c == quote || c == '\n' {
                    state = HashState::Code;
                }
            }
            HashState::Comment => {
                if c == '\n' {
                    out.push('\n');
                    state = HashState::Code;
                }
            }
            HashState::Docstring(quote) => {
                if triple_at(i, quote) {
                    state = HashState::Code;
                    i += 2;
                } else if c == '\n' {
                    out.push('\n');
                }
            }
        }
        i += 1;
    }
    out
}

/// Remove Ruby `=begin`/`=end` blocks, then `#` comments.
pub fn strip_ruby(text: &str) -> String {
    let mut in_block = false;
    let mut kept = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let starts_block = line.starts_with("=begin");
        let ends_block = line.starts_with("=end");
        if in_block || starts_block {
            in_block = !ends_block;
            if line.ends_with('\n') {
                kept.push('\n');
            }
            continue;
        }
        kept.push_str(line);
    }
    strip_hash_style(&kept, false)
}
