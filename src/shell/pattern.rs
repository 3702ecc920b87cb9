// src/shell/pattern.rs

//! Shell pattern matching on top of the `glob` crate

use glob::{MatchOptions, Pattern};

pub const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

const CLASSES: &[(&str, &str)] = &[
    ("[:alnum:]", "a-zA-Z0-9"),
    ("[:alpha:]", "a-zA-Z"),
    ("[:digit:]", "0-9"),
    ("[:lower:]", "a-z"),
    ("[:upper:]", "A-Z"),
    ("[:space:]", " \t\n\r"),
    ("[:xdigit:]", "0-9a-fA-F"),
    ("[:punct:]", "!-/:-@[-`{-~"),
];

/// Escape a literal so it matches only itself
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '*' | '?' | '[' | ']' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Translate shell-only syntax into what `glob::Pattern` accepts
fn translate(pattern: &str) -> String {
    let mut text = pattern.replace("[^", "[!");
    for (class, range) in CLASSES {
        text = text.replace(class, range);
    }
    // `**` is only special to glob as a whole path component
    while text.contains("**") {
        text = text.replace("**", "*");
    }
    text
}

pub fn compile(pattern: &str) -> Option<Pattern> {
    Pattern::new(&translate(pattern)).ok()
}

/// Whether `text` matches the whole of `pattern`
pub fn matches(pattern: &str, text: &str) -> bool {
    match compile(pattern) {
        Some(p) => p.matches_with(text, MATCH_OPTIONS),
        None => pattern == text,
    }
}

fn boundaries(text: &str) -> Vec<usize> {
    let mut b: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    b.push(text.len());
    b
}

/// `${x#p}` and `${x##p}`
pub fn remove_prefix(text: &str, pattern: &str, longest: bool) -> String {
    let Some(p) = compile(pattern) else {
        return text.strip_prefix(pattern).unwrap_or(text).to_string();
    };
    let mut cuts = boundaries(text);
    if longest {
        cuts.reverse();
    }
    for cut in cuts {
        if p.matches_with(&text[..cut], MATCH_OPTIONS) {
            return text[cut..].to_string();
        }
    }
    text.to_string()
}

/// `${x%p}` and `${x%%p}`
pub fn remove_suffix(text: &str, pattern: &str, longest: bool) -> String {
    let Some(p) = compile(pattern) else {
        return text.strip_suffix(pattern).unwrap_or(text).to_string();
    };
    let mut cuts = boundaries(text);
    if !longest {
        cuts.reverse();
    }
    for cut in cuts {
        if p.matches_with(&text[cut..], MATCH_OPTIONS) {
            return text[..cut].to_string();
        }
    }
    text.to_string()
}

/// Longest match of `p` starting at byte `start`, returning its end
fn longest_match_at(p: &Pattern, text: &str, start: usize, cuts: &[usize]) -> Option<usize> {
    cuts.iter()
        .rev()
        .filter(|&&end| end >= start)
        .find(|&&end| p.matches_with(&text[start..end], MATCH_OPTIONS))
        .copied()
}

/// `${x/p/r}`, `${x//p/r}`, `${x/#p/r}` and `${x/%p/r}`
pub fn replace(text: &str, pattern: &str, replacement: &str, all: bool, anchor: Option<super::ast::Anchor>) -> String {
    use super::ast::Anchor;

    if pattern.is_empty() {
        return text.to_string();
    }
    let Some(p) = compile(pattern) else {
        return if all {
            text.replace(pattern, replacement)
        } else {
            text.replacen(pattern, replacement, 1)
        };
    };
    let cuts = boundaries(text);

    match anchor {
        Some(Anchor::Start) => match longest_match_at(&p, text, 0, &cuts) {
            Some(end) => format!("{}{}", replacement, &text[end..]),
            None => text.to_string(),
        },
        Some(Anchor::End) => {
            for &start in &cuts {
                if p.matches_with(&text[start..], MATCH_OPTIONS) {
                    return format!("{}{}", &text[..start], replacement);
                }
            }
            text.to_string()
        }
        None => {
            let mut out = String::new();
            let mut i = 0;
            let mut pos = 0;
            while i < cuts.len() {
                let start = cuts[i];
                match longest_match_at(&p, text, start, &cuts) {
                    Some(end) if end > start => {
                        out.push_str(&text[pos..start]);
                        out.push_str(replacement);
                        pos = end;
                        if !all {
                            break;
                        }
                        i = cuts.iter().position(|&c| c == end).unwrap_or(cuts.len());
                    }
                    _ => i += 1,
                }
            }
            out.push_str(&text[pos..]);
            out
        }
    }
}
