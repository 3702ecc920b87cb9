// src/shell/expand.rs

//! Word expansion
//!
//! Order follows the shell: brace expansion, tilde, parameter, command and
//! arithmetic substitution, field splitting on `IFS`, then pathname
//! expansion against the sandbox. Each character remembers whether it was
//! quoted so splitting and globbing only touch unquoted text.

use super::arith::{self, ArithEnv};
use super::ast::*;
use super::interp::{Ctl, Shell};
use super::parser::{parse_expandable_text, parse_word_text};
use super::pattern;
use super::vars::Value;
use crate::error::Error;

type Expand<T> = std::result::Result<T, Ctl>;

const DEFAULT_IFS: &str = " \t\n";
const MAX_BRACE_FIELDS: usize = 10_000;

enum Seg {
    Text { text: String, quoted: bool, split: bool },
    /// Quoted `"$@"` or `"${arr[@]}"`: one field per element
    Fields(Vec<String>),
}

/// Result of looking up a parameter
enum Lookup {
    Unset,
    Str(String),
    List { items: Vec<String>, star: bool },
}

impl Lookup {
    fn map(self, f: impl Fn(&str) -> String) -> Lookup {
        match self {
            Lookup::Unset => Lookup::Unset,
            Lookup::Str(s) => Lookup::Str(f(&s)),
            Lookup::List { items, star } => Lookup::List {
                items: items.iter().map(|s| f(s.as_str())).collect(),
                star,
            },
        }
    }

    fn is_null(&self, colon: bool) -> bool {
        match self {
            Lookup::Unset => true,
            Lookup::Str(s) => colon && s.is_empty(),
            Lookup::List { items, .. } => items.is_empty() || (colon && items.iter().all(String::is_empty)),
        }
    }
}

#[derive(Default)]
struct FieldBuilder {
    fields: Vec<Vec<(char, bool)>>,
    current: Vec<(char, bool)>,
    started: bool,
}

impl FieldBuilder {
    fn finish(&mut self) {
        self.fields.push(std::mem::take(&mut self.current));
        self.started = false;
    }

    fn push_text(&mut self, text: &str, quoted: bool, split: bool, ifs: &str) {
        if !split {
            self.current.extend(text.chars().map(|c| (c, quoted)));
            self.started |= quoted || !text.is_empty();
            return;
        }
        for c in text.chars() {
            if ifs.contains(c) {
                if c.is_whitespace() {
                    if self.started {
                        self.finish();
                    }
                } else {
                    self.finish();
                }
            } else {
                self.current.push((c, false));
                self.started = true;
            }
        }
    }

    fn push_fields(&mut self, items: &[String]) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.finish();
            }
            self.current.extend(item.chars().map(|c| (c, true)));
            self.started = true;
        }
    }

    fn into_fields(mut self) -> Vec<Vec<(char, bool)>> {
        if self.started || !self.current.is_empty() {
            self.finish();
        }
        self.fields
    }
}

/// Split `{a,b}` alternatives or an `{x..y}` sequence out of unquoted text
fn find_brace(text: &str) -> Option<(String, Vec<String>, String)> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '{' || (i > 0 && chars[i - 1] == '$') {
            i += 1;
            continue;
        }
        let mut depth = 0;
        let mut commas = Vec::new();
        let mut close = None;
        for (j, &c) in chars.iter().enumerate().skip(i) {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(j);
                        break;
                    }
                }
                ',' if depth == 1 => commas.push(j),
                _ => {}
            }
        }
        let Some(close) = close else {
            return None;
        };
        let pre: String = chars[..i].iter().collect();
        let post: String = chars[close + 1..].iter().collect();
        let inner: String = chars[i + 1..close].iter().collect();

        if !commas.is_empty() {
            let mut alts = Vec::new();
            let mut start = i + 1;
            for &comma in commas.iter().chain(std::iter::once(&close)) {
                alts.push(chars[start..comma].iter().collect());
                start = comma + 1;
            }
            return Some((pre, alts, post));
        }
        if let Some(seq) = brace_sequence(&inner) {
            return Some((pre, seq, post));
        }
        i += 1;
    }
    None
}

fn brace_sequence(inner: &str) -> Option<Vec<String>> {
    let parts: Vec<&str> = inner.split("..").collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let step: i64 = match parts.get(2) {
        Some(s) => s.parse().ok()?,
        None => 1,
    };
    let step = step.unsigned_abs().max(1) as i64;

    if let (Ok(a), Ok(b)) = (parts[0].parse::<i64>(), parts[1].parse::<i64>()) {
        let width = if parts[0].starts_with('0') || parts[1].starts_with('0') {
            parts[0].len().max(parts[1].len())
        } else {
            0
        };
        let count = ((a - b).unsigned_abs() / step as u64) as usize + 1;
        if count > MAX_BRACE_FIELDS {
            return None;
        }
        let dir = if a <= b { step } else { -step };
        return Some(
            (0..count)
                .map(|k| format!("{:0width$}", a + dir * k as i64, width = width))
                .collect(),
        );
    }

    let mut a = parts[0].chars();
    let mut b = parts[1].chars();
    match (a.next(), a.next(), b.next(), b.next()) {
        (Some(x), None, Some(y), None) if x.is_ascii_alphabetic() && y.is_ascii_alphabetic() => {
            let (x, y) = (x as u8, y as u8);
            let seq: Vec<String> = if x <= y {
                (x..=y).step_by(step as usize).map(|c| (c as char).to_string()).collect()
            } else {
                (y..=x).rev().step_by(step as usize).map(|c| (c as char).to_string()).collect()
            };
            Some(seq)
        }
        _ => None,
    }
}

fn brace_expand(word: &Word) -> Vec<Word> {
    for (i, part) in word.parts.iter().enumerate() {
        let WordPart::Literal(text) = part else {
            continue;
        };
        let Some((pre, alts, post)) = find_brace(text) else {
            continue;
        };
        let mut out = Vec::new();
        for alt in alts {
            let mut parts = word.parts[..i].to_vec();
            parts.push(WordPart::Literal(format!("{}{}{}", pre, alt, post)));
            parts.extend_from_slice(&word.parts[i + 1..]);
            out.extend(brace_expand(&Word { parts }));
            if out.len() > MAX_BRACE_FIELDS {
                break;
            }
        }
        return out;
    }
    vec![word.clone()]
}

fn convert_case(text: &str, upper: bool, all: bool) -> String {
    let convert = |s: &str| if upper { s.to_uppercase() } else { s.to_lowercase() };
    if all {
        return convert(text);
    }
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => format!("{}{}", convert(&first.to_string()), chars.as_str()),
        None => String::new(),
    }
}

/// Char range selected by `${x:offset:length}` on `len` items
fn substring_range(len: usize, offset: i64, length: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let start = if offset < 0 { len + offset } else { offset };
    if start < 0 || start > len {
        return (0, 0);
    }
    let end = match length {
        None => len,
        Some(l) if l < 0 => len + l,
        Some(l) => start.saturating_add(l).min(len),
    };
    if end < start {
        return (start as usize, start as usize);
    }
    (start as usize, end as usize)
}

impl Shell {
    fn ifs(&self) -> String {
        match self.vars.value("IFS") {
            Some(v) => v.as_scalar().unwrap_or("").to_string(),
            None => DEFAULT_IFS.to_string(),
        }
    }

    fn segments(&mut self, word: &Word) -> Expand<Vec<Seg>> {
        let mut segs = Vec::new();
        let mut parts: &[WordPart] = &word.parts;

        // Tilde prefix
        if let Some(WordPart::Literal(text)) = parts.first() {
            if text == "~" || text.starts_with("~/") {
                let home = self
                    .vars
                    .value("HOME")
                    .and_then(|v| v.as_scalar())
                    .unwrap_or("~")
                    .to_string();
                segs.push(Seg::Text {
                    text: format!("{}{}", home, &text[1..]),
                    quoted: false,
                    split: false,
                });
                parts = &parts[1..];
            }
        }

        self.expand_parts(parts, false, &mut segs)?;
        Ok(segs)
    }

    fn expand_parts(&mut self, parts: &[WordPart], quoted: bool, segs: &mut Vec<Seg>) -> Expand<()> {
        for part in parts {
            match part {
                WordPart::Literal(text) => segs.push(Seg::Text {
                    text: text.clone(),
                    quoted,
                    split: false,
                }),
                WordPart::SingleQuoted(text) => segs.push(Seg::Text {
                    text: text.clone(),
                    quoted: true,
                    split: false,
                }),
                WordPart::DoubleQuoted(inner) if inner.is_empty() => segs.push(Seg::Text {
                    text: String::new(),
                    quoted: true,
                    split: false,
                }),
                WordPart::DoubleQuoted(inner) => self.expand_parts(inner, true, segs)?,
                WordPart::Param(param) => match self.expand_param(param)? {
                    Lookup::Unset => segs.push(Seg::Text {
                        text: String::new(),
                        quoted,
                        split: !quoted,
                    }),
                    Lookup::Str(text) => segs.push(Seg::Text {
                        text,
                        quoted,
                        split: !quoted,
                    }),
                    Lookup::List { items, star } => {
                        if quoted && !star {
                            segs.push(Seg::Fields(items));
                        } else {
                            let sep = if quoted {
                                self.ifs().chars().next().map(String::from).unwrap_or_default()
                            } else {
                                " ".to_string()
                            };
                            segs.push(Seg::Text {
                                text: items.join(&sep),
                                quoted,
                                split: !quoted,
                            });
                        }
                    }
                },
                WordPart::CommandSubst(list) => {
                    let text = self.command_substitution(list)?;
                    segs.push(Seg::Text {
                        text,
                        quoted,
                        split: !quoted,
                    });
                }
                WordPart::Arith(text) => {
                    let value = self.eval_arith(text)?;
                    segs.push(Seg::Text {
                        text: value.to_string(),
                        quoted,
                        split: !quoted,
                    });
                }
            }
        }
        Ok(())
    }

    /// Expand a word into fields: splitting and pathname expansion apply
    pub(crate) fn expand_word_fields(&mut self, word: &Word) -> Expand<Vec<String>> {
        let ifs = self.ifs();
        let mut out = Vec::new();
        for word in brace_expand(word) {
            let mut builder = FieldBuilder::default();
            for seg in self.segments(&word)? {
                match seg {
                    Seg::Text { text, quoted, split } => builder.push_text(&text, quoted, split, &ifs),
                    Seg::Fields(items) => builder.push_fields(&items),
                }
            }
            for field in builder.into_fields() {
                self.glob_field(&field, &mut out);
            }
        }
        Ok(out)
    }

    fn glob_field(&self, field: &[(char, bool)], out: &mut Vec<String>) {
        let text: String = field.iter().map(|(c, _)| *c).collect();
        let globbable = !self.opts.noglob
            && field
                .iter()
                .any(|(c, quoted)| !quoted && matches!(c, '*' | '?' | '['));
        if !globbable {
            out.push(text);
            return;
        }
        let mut pat = String::new();
        for (c, quoted) in field {
            if *quoted {
                pat.push_str(&pattern::escape(&c.to_string()));
            } else {
                pat.push(*c);
            }
        }
        let matches = self.sandbox.glob(&self.cwd, &pat);
        if !matches.is_empty() {
            out.extend(matches);
        } else if !self.opts.nullglob {
            out.push(text);
        }
    }

    pub(crate) fn expand_words(&mut self, words: &[Word]) -> Expand<Vec<String>> {
        let mut out = Vec::new();
        for word in words {
            out.extend(self.expand_word_fields(word)?);
        }
        Ok(out)
    }

    /// Expand a word to a single string with no splitting or globbing
    pub(crate) fn expand_word_string(&mut self, word: &Word) -> Expand<String> {
        let mut out = String::new();
        for seg in self.segments(word)? {
            match seg {
                Seg::Text { text, .. } => out.push_str(&text),
                Seg::Fields(items) => out.push_str(&items.join(" ")),
            }
        }
        Ok(out)
    }

    /// Expand a word for use as a pattern: quoted text matches literally
    pub(crate) fn expand_pattern(&mut self, word: &Word) -> Expand<String> {
        let mut out = String::new();
        for seg in self.segments(word)? {
            match seg {
                Seg::Text { text, quoted: true, .. } => out.push_str(&pattern::escape(&text)),
                Seg::Text { text, .. } => out.push_str(&text),
                Seg::Fields(items) => out.push_str(&pattern::escape(&items.join(" "))),
            }
        }
        Ok(out)
    }

    /// Expand the right side of `=~`: quoted text matches literally
    pub(crate) fn expand_regex(&mut self, word: &Word) -> Expand<String> {
        let mut out = String::new();
        for seg in self.segments(word)? {
            match seg {
                Seg::Text { text, quoted: true, .. } => out.push_str(&regex::escape(&text)),
                Seg::Text { text, .. } => out.push_str(&text),
                Seg::Fields(items) => out.push_str(&regex::escape(&items.join(" "))),
            }
        }
        Ok(out)
    }

    pub(crate) fn expand_subscript_string(&mut self, raw: &str) -> Expand<String> {
        let word = parse_word_text(raw)?;
        self.expand_word_string(&word)
    }

    /// Evaluate arithmetic text after expanding any `$` substitutions
    pub(crate) fn eval_arith(&mut self, text: &str) -> Expand<i64> {
        let expanded = if text.contains('$') || text.contains('`') {
            let word = parse_expandable_text(text)?;
            self.expand_word_string(&word)?
        } else {
            text.to_string()
        };
        arith::eval(&expanded, self)
            .map_err(|e| Ctl::Fatal(Error::ExecFailed(format!("arithmetic: {}", e))))
    }

    fn unbound(&self, name: &str) -> Ctl {
        Ctl::Fatal(Error::ExecFailed(format!("{}: unbound variable", name)))
    }

    fn special_param(&self, name: &str) -> Option<Lookup> {
        let value = match name {
            "@" | "*" => {
                return Some(Lookup::List {
                    items: self.positional.clone(),
                    star: name == "*",
                });
            }
            "#" => self.positional.len().to_string(),
            "?" => self.last_status.to_string(),
            "$" => std::process::id().to_string(),
            "0" => self.script_name.clone(),
            "-" => {
                let mut flags = String::new();
                if self.opts.errexit {
                    flags.push('e');
                }
                if self.opts.noglob {
                    flags.push('f');
                }
                if self.opts.nounset {
                    flags.push('u');
                }
                flags
            }
            "!" => return Some(Lookup::Unset),
            _ if name.chars().all(|c| c.is_ascii_digit()) => {
                let n: usize = name.parse().unwrap_or(0);
                return Some(match self.positional.get(n.wrapping_sub(1)) {
                    Some(v) => Lookup::Str(v.clone()),
                    None => Lookup::Unset,
                });
            }
            _ => return None,
        };
        Some(Lookup::Str(value))
    }

    fn lookup(&mut self, name: &str, index: Option<&str>) -> Expand<Lookup> {
        if let Some(special) = self.special_param(name) {
            return Ok(special);
        }
        let Some(raw) = index else {
            return Ok(match self.vars.value(name).and_then(Value::as_scalar) {
                Some(s) => Lookup::Str(s.to_string()),
                None => Lookup::Unset,
            });
        };
        if raw == "@" || raw == "*" {
            return Ok(match self.vars.value(name) {
                Some(v) => Lookup::List {
                    items: v.elements(),
                    star: raw == "*",
                },
                None => Lookup::Unset,
            });
        }
        let value = self.vars.value(name).cloned();
        Ok(match value {
            Some(Value::Assoc(map)) => {
                let key = self.expand_subscript_string(raw)?;
                map.get(&key).cloned().map_or(Lookup::Unset, Lookup::Str)
            }
            Some(Value::Indexed(map)) => {
                let mut idx = self.eval_arith(raw)?;
                if idx < 0 {
                    idx += map.keys().next_back().map(|k| k + 1).unwrap_or(0);
                }
                map.get(&idx).cloned().map_or(Lookup::Unset, Lookup::Str)
            }
            Some(Value::Scalar(s)) => {
                if self.eval_arith(raw)? == 0 {
                    Lookup::Str(s)
                } else {
                    Lookup::Unset
                }
            }
            None => Lookup::Unset,
        })
    }

    fn expand_param(&mut self, param: &ParamExpr) -> Expand<Lookup> {
        let name = param.name.as_str();
        let index = param.index.as_deref();
        let is_list_name = matches!(name, "@" | "*") || matches!(index, Some("@" | "*"));

        match &param.op {
            ParamOp::Keys => {
                let keys = self.vars.value(name).map(|v| v.keys()).unwrap_or_default();
                return Ok(Lookup::List {
                    items: keys,
                    star: index == Some("*"),
                });
            }
            ParamOp::Indirect => {
                let target = match self.lookup(name, index)? {
                    Lookup::Str(s) => s,
                    _ => String::new(),
                };
                if target.is_empty() {
                    return Ok(Lookup::Unset);
                }
                return match target.split_once('[') {
                    Some((base, rest)) => {
                        let sub = rest.strip_suffix(']').unwrap_or(rest).to_string();
                        self.lookup(base, Some(&sub))
                    }
                    None => self.lookup(&target, None),
                };
            }
            _ => {}
        }

        let base = self.lookup(name, index)?;
        let check_unbound = |sh: &Shell, base: &Lookup| -> Expand<()> {
            if sh.opts.nounset && !is_list_name && matches!(base, Lookup::Unset) {
                return Err(sh.unbound(name));
            }
            Ok(())
        };

        match &param.op {
            ParamOp::Plain => {
                check_unbound(self, &base)?;
                Ok(base)
            }
            ParamOp::Length => {
                check_unbound(self, &base)?;
                let n = match &base {
                    Lookup::Unset => 0,
                    Lookup::Str(s) => s.chars().count(),
                    Lookup::List { items, .. } => items.len(),
                };
                Ok(Lookup::Str(n.to_string()))
            }
            ParamOp::Default { colon, word } => {
                if base.is_null(*colon) {
                    Ok(Lookup::Str(self.expand_word_string(word)?))
                } else {
                    Ok(base)
                }
            }
            ParamOp::Assign { colon, word } => {
                if !base.is_null(*colon) {
                    return Ok(base);
                }
                let value = self.expand_word_string(word)?;
                let assign = Assignment {
                    name: name.to_string(),
                    index: index.map(str::to_string),
                    append: false,
                    value: AssignValue::Scalar(Word {
                        parts: vec![WordPart::SingleQuoted(value.clone())],
                    }),
                };
                self.assign(&assign, super::interp::Scope::Normal, &Default::default())?;
                Ok(Lookup::Str(value))
            }
            ParamOp::Alternative { colon, word } => {
                if base.is_null(*colon) {
                    Ok(Lookup::Str(String::new()))
                } else {
                    Ok(Lookup::Str(self.expand_word_string(word)?))
                }
            }
            ParamOp::Error { colon, word } => {
                if !base.is_null(*colon) {
                    return Ok(base);
                }
                let message = self.expand_word_string(word)?;
                let message = if message.is_empty() {
                    "parameter null or not set".to_string()
                } else {
                    message
                };
                self.eprint(&format!("{}: {}", name, message));
                Err(Ctl::Fatal(Error::ExecFailed(format!("{}: {}", name, message))))
            }
            ParamOp::RemovePrefix { longest, pattern: pat } => {
                check_unbound(self, &base)?;
                let pat = self.expand_pattern(pat)?;
                Ok(base.map(|s| pattern::remove_prefix(s, &pat, *longest)))
            }
            ParamOp::RemoveSuffix { longest, pattern: pat } => {
                check_unbound(self, &base)?;
                let pat = self.expand_pattern(pat)?;
                Ok(base.map(|s| pattern::remove_suffix(s, &pat, *longest)))
            }
            ParamOp::Replace {
                all,
                anchor,
                pattern: pat,
                replacement,
            } => {
                check_unbound(self, &base)?;
                let pat = self.expand_pattern(pat)?;
                let replacement = self.expand_word_string(replacement)?;
                Ok(base.map(|s| pattern::replace(s, &pat, &replacement, *all, *anchor)))
            }
            ParamOp::Case { upper, all } => {
                check_unbound(self, &base)?;
                Ok(base.map(|s| convert_case(s, *upper, *all)))
            }
            ParamOp::Substring { offset, length } => {
                check_unbound(self, &base)?;
                let offset = self.eval_arith(offset)?;
                let length = match length {
                    Some(l) => Some(self.eval_arith(l)?),
                    None => None,
                };
                Ok(match base {
                    Lookup::Unset => Lookup::Unset,
                    Lookup::Str(s) => {
                        let chars: Vec<char> = s.chars().collect();
                        let (start, end) = substring_range(chars.len(), offset, length);
                        Lookup::Str(chars[start..end].iter().collect())
                    }
                    Lookup::List { items, star } => {
                        // Positional slices count $0 as offset zero
                        let items = if matches!(name, "@" | "*") {
                            let mut all = vec![self.script_name.clone()];
                            all.extend(items);
                            all
                        } else {
                            items
                        };
                        let (start, end) = substring_range(items.len(), offset, length);
                        Lookup::List {
                            items: items[start..end].to_vec(),
                            star,
                        }
                    }
                })
            }
            ParamOp::Keys | ParamOp::Indirect => Ok(base),
        }
    }
}

impl ArithEnv for Shell {
    fn get(&mut self, name: &str, index: Option<i64>) -> Result<i64, String> {
        let text = match (self.vars.value(name), index) {
            (None, _) => return Ok(0),
            (Some(Value::Assoc(map)), Some(i)) => map.get(&i.to_string()).cloned(),
            (Some(Value::Indexed(map)), Some(i)) => map.get(&i).cloned(),
            (Some(v), Some(0)) | (Some(v), None) => v.as_scalar().map(str::to_string),
            (Some(_), Some(_)) => None,
        };
        let text = text.unwrap_or_default();
        if text.trim().is_empty() {
            return Ok(0);
        }
        if let Some(n) = arith::parse_literal(&text) {
            return Ok(n);
        }
        // Values holding expressions are evaluated in turn
        if self.arith_depth >= 32 {
            return Err(format!("{}: expression recursion level exceeded", name));
        }
        self.arith_depth += 1;
        let result = arith::eval(&text, self);
        self.arith_depth -= 1;
        result
    }

    fn set(&mut self, name: &str, index: Option<i64>, value: i64) -> Result<(), String> {
        if self.vars.get(name).is_some_and(|v| v.attrs.readonly) {
            return Err(format!("{}: readonly variable", name));
        }
        let var = self.vars.entry(name);
        match (index, var.value.take()) {
            (None, Some(Value::Indexed(mut map))) => {
                map.insert(0, value.to_string());
                var.value = Some(Value::Indexed(map));
            }
            (None, _) => var.value = Some(Value::Scalar(value.to_string())),
            (Some(i), Some(Value::Assoc(mut map))) => {
                map.insert(i.to_string(), value.to_string());
                var.value = Some(Value::Assoc(map));
            }
            (Some(i), Some(Value::Indexed(mut map))) => {
                map.insert(i, value.to_string());
                var.value = Some(Value::Indexed(map));
            }
            (Some(i), Some(Value::Scalar(s))) => {
                let mut map = std::collections::BTreeMap::from([(0, s)]);
                map.insert(i, value.to_string());
                var.value = Some(Value::Indexed(map));
            }
            (Some(i), None) => {
                var.value = Some(Value::Indexed(std::collections::BTreeMap::from([(
                    i,
                    value.to_string(),
                )])));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::parser::parse;
    use crate::shell::Sandbox;

    fn shell_with(src: &str, dir: &std::path::Path) -> Shell {
        let mut sh = Shell::new(Sandbox::new(dir).unwrap());
        let list = parse(src, "test.sh").unwrap();
        sh.run(&list).unwrap();
        sh
    }

    fn eval(src: &str) -> Shell {
        let tmp = tempfile::tempdir().unwrap();
        shell_with(src, tmp.path())
    }

    fn get(sh: &Shell, name: &str) -> String {
        sh.vars()
            .value(name)
            .and_then(Value::as_scalar)
            .unwrap_or_default()
            .to_string()
    }

    fn arr(sh: &Shell, name: &str) -> Vec<String> {
        sh.vars().value(name).map(Value::elements).unwrap_or_default()
    }

    #[test]
    fn test_parameter_operators() {
        let sh = eval(
            r#"
v=foo-1.2.3.tar.gz
a=${v%%.*}
b=${v#*-}
c=${v//./_}
d=${unset:-dflt}
e=${v:0:3}
f=${#v}
g=${v^^}
h=${v/#foo/bar}
: ${assigned:=yes}
"#,
        );
        assert_eq!(get(&sh, "a"), "foo-1");
        assert_eq!(get(&sh, "b"), "1.2.3.tar.gz");
        assert_eq!(get(&sh, "c"), "foo-1_2_3_tar_gz");
        assert_eq!(get(&sh, "d"), "dflt");
        assert_eq!(get(&sh, "e"), "foo");
        assert_eq!(get(&sh, "f"), "16");
        assert_eq!(get(&sh, "g"), "FOO-1.2.3.TAR.GZ");
        assert_eq!(get(&sh, "h"), "bar-1.2.3.tar.gz");
        assert_eq!(get(&sh, "assigned"), "yes");
    }

    #[test]
    fn test_field_splitting_and_quoting() {
        let sh = eval(
            r#"
words="a b  c"
split=($words)
kept=("$words")
empty=("" x)
set -- "one two" three
pos=("$@")
star="$*"
"#,
        );
        assert_eq!(arr(&sh, "split"), vec!["a", "b", "c"]);
        assert_eq!(arr(&sh, "kept"), vec!["a b  c"]);
        assert_eq!(arr(&sh, "empty"), vec!["", "x"]);
        assert_eq!(arr(&sh, "pos"), vec!["one two", "three"]);
        assert_eq!(get(&sh, "star"), "one two three");
    }

    #[test]
    fn test_array_expansions() {
        let sh = eval(
            r#"
deps=(gcc make 'lib foo')
copy=("${deps[@]}")
n=${#deps[@]}
last=${deps[-1]}
second=${deps[1]}
keys="${!deps[@]}"
slice=("${deps[@]:1}")
"#,
        );
        assert_eq!(arr(&sh, "copy"), vec!["gcc", "make", "lib foo"]);
        assert_eq!(get(&sh, "n"), "3");
        assert_eq!(get(&sh, "last"), "lib foo");
        assert_eq!(get(&sh, "second"), "make");
        assert_eq!(get(&sh, "keys"), "0 1 2");
        assert_eq!(arr(&sh, "slice"), vec!["make", "lib foo"]);
    }

    #[test]
    fn test_brace_expansion() {
        let sh = eval("a=(x{1,2}y)\nb=({1..3})\nc=(\"{1,2}\")\n");
        assert_eq!(arr(&sh, "a"), vec!["x1y", "x2y"]);
        assert_eq!(arr(&sh, "b"), vec!["1", "2", "3"]);
        assert_eq!(arr(&sh, "c"), vec!["{1,2}"]);
    }

    #[test]
    fn test_pathname_expansion_is_confined() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("0001-fix.patch"), "").unwrap();
        std::fs::write(tmp.path().join("0002-feat.patch"), "").unwrap();
        let sh = shell_with("p=(*.patch)\nq=('*.patch')\nr=(/etc/*)\n", tmp.path());
        assert_eq!(arr(&sh, "p"), vec!["0001-fix.patch", "0002-feat.patch"]);
        assert_eq!(arr(&sh, "q"), vec!["*.patch"]);
        assert_eq!(arr(&sh, "r"), vec!["/etc/*"]);
    }

    #[test]
    fn test_arithmetic_uses_variables() {
        let sh = eval("x=4\ny=$(( x * 2 + ${x} ))\narr=(5 6)\nz=$(( arr[1] - 1 ))\n(( w = y % 5 ))\n");
        assert_eq!(get(&sh, "y"), "12");
        assert_eq!(get(&sh, "z"), "5");
        assert_eq!(get(&sh, "w"), "2");
    }

    #[test]
    fn test_nounset() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sh = Shell::new(Sandbox::new(tmp.path()).unwrap());
        let list = parse("set -u\necho \"$missing\"\n", "t").unwrap();
        assert!(matches!(sh.run(&list), Err(Error::ExecFailed(_))));
    }
}
