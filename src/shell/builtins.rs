// src/shell/builtins.rs

//! Builtin commands of the restricted interpreter
//!
//! Only builtins with no effect outside the interpreter are provided.
//! Anything else is treated as an external command and skipped.

use super::arith;
use super::ast::{AssignValue, Assignment, CondExpr, Word, WordPart};
use super::interp::{Ctl, DeclArg, DeclSpec, Exec, Scope, Shell};
use super::parser::{is_valid_name, parse};
use super::vars::Value;
use crate::error::Error;
use std::collections::BTreeMap;
use std::io;

const MAX_SOURCE_DEPTH: usize = 32;

pub const BUILTINS: &[&str] = &[
    ":", ".", "[", "break", "cd", "command", "continue", "declare", "echo", "eval", "exit",
    "export", "false", "let", "local", "mapfile", "printf", "pwd", "read", "readarray",
    "readonly", "return", "set", "shift", "shopt", "source", "test", "true", "type", "typeset",
    "unset",
];

const KEYWORDS: &[&str] = &[
    "if", "then", "elif", "else", "fi", "for", "while", "until", "do", "done", "case", "esac",
    "in", "function", "select", "time", "{", "}", "!", "[[", "]]",
];

const UNARY_TESTS: &[&str] = &[
    "-e", "-f", "-d", "-s", "-r", "-w", "-x", "-L", "-h", "-n", "-z", "-v", "-b", "-c", "-p",
    "-S", "-t", "-g", "-u", "-k", "-O", "-G", "-N",
];

const BINARY_TESTS: &[&str] = &[
    "=", "==", "!=", "<", ">", "-eq", "-ne", "-lt", "-le", "-gt", "-ge", "-nt", "-ot", "-ef",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Interpret backslash escapes as `echo -e` and `printf` do
///
/// Returns the text and whether `\c` ended output early. With
/// `zero_octal`, octal escapes are written `\0nnn`.
fn unescape(text: &str, zero_octal: bool) -> (String, bool) {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c != '\\' || i + 1 == chars.len() {
            out.push(c);
            i += 1;
            continue;
        }
        i += 1;
        let e = chars[i];
        i += 1;
        match e {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            'e' | 'E' => out.push('\x1b'),
            '\\' => out.push('\\'),
            'c' => return (out, true),
            'x' => {
                let digits: String = chars[i..].iter().take(2).take_while(|c| c.is_ascii_hexdigit()).collect();
                if digits.is_empty() {
                    out.push_str("\\x");
                } else {
                    i += digits.len();
                    if let Ok(n) = u8::from_str_radix(&digits, 16) {
                        out.push(n as char);
                    }
                }
            }
            '0'..='7' if !zero_octal || e == '0' => {
                let mut digits = String::new();
                if !zero_octal {
                    digits.push(e);
                }
                let max = 3 - digits.len();
                digits.extend(chars[i..].iter().take(max).take_while(|c| ('0'..='7').contains(*c)));
                i += digits.len() - if zero_octal { 0 } else { 1 };
                let n = u32::from_str_radix(if digits.is_empty() { "0" } else { &digits }, 8).unwrap_or(0);
                if let Some(ch) = char::from_u32(n & 0xff) {
                    out.push(ch);
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    (out, false)
}

/// Quote a string for reuse as shell input (`printf %q`)
fn shell_quote(text: &str) -> String {
    if text.is_empty() {
        return "''".to_string();
    }
    let safe = text
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./=+,:@%".contains(c));
    if safe {
        text.to_string()
    } else {
        format!("'{}'", text.replace('\'', "'\\''"))
    }
}

fn printf_int(arg: &str) -> Result<i64, String> {
    let t = arg.trim();
    if t.is_empty() {
        return Ok(0);
    }
    if let Some(rest) = t.strip_prefix('\'').or_else(|| t.strip_prefix('"')) {
        return Ok(rest.chars().next().map(|c| c as i64).unwrap_or(0));
    }
    arith::parse_literal(t).ok_or_else(|| format!("{}: invalid number", arg))
}

fn pad(text: String, width: usize, left: bool, zero: bool) -> String {
    let len = text.chars().count();
    if len >= width {
        return text;
    }
    let fill = width - len;
    if left {
        format!("{}{}", text, " ".repeat(fill))
    } else if zero {
        let (sign, digits) = match text.strip_prefix('-') {
            Some(d) => ("-", d),
            None => ("", text.as_str()),
        };
        format!("{}{}{}", sign, "0".repeat(fill), digits)
    } else {
        format!("{}{}", " ".repeat(fill), text)
    }
}

fn format_exp(value: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{:.*e}", precision, value);
    let (mantissa, exp) = raw.split_once('e').unwrap_or((&raw, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let text = format!("{}e{}{:02}", mantissa, sign, exp.abs());
    if upper { text.to_uppercase() } else { text }
}

/// Expand a printf format once per group of arguments
///
/// Returns output and exit status.
fn printf_format(fmt: &str, args: &[String]) -> (String, i32) {
    let chars: Vec<char> = fmt.chars().collect();
    let mut out = String::new();
    let mut status = 0;
    let mut next = 0;

    loop {
        let start = next;
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '\\' {
                // Escapes span at most four characters after the backslash
                let end = (i + 5).min(chars.len());
                let chunk: String = chars[i..end].iter().collect();
                let ((text, used), stop) = unescape_one(&chunk);
                out.push_str(&text);
                if stop {
                    return (out, status);
                }
                i += used;
                continue;
            }
            if c != '%' {
                out.push(c);
                i += 1;
                continue;
            }
            i += 1;
            if chars.get(i) == Some(&'%') {
                out.push('%');
                i += 1;
                continue;
            }

            let mut left = false;
            let mut zero = false;
            let mut plus = false;
            let mut space = false;
            while let Some(&f) = chars.get(i) {
                match f {
                    '-' => left = true,
                    '0' => zero = true,
                    '+' => plus = true,
                    ' ' => space = true,
                    '#' => {}
                    _ => break,
                }
                i += 1;
            }
            let mut width = 0usize;
            if chars.get(i) == Some(&'*') {
                i += 1;
                let w = args.get(next).map(|a| printf_int(a).unwrap_or(0)).unwrap_or(0);
                next += 1;
                if w < 0 {
                    left = true;
                }
                width = w.unsigned_abs() as usize;
            } else {
                while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
                    width = width * 10 + d as usize;
                    i += 1;
                }
            }
            let mut precision: Option<usize> = None;
            if chars.get(i) == Some(&'.') {
                i += 1;
                let mut p = 0usize;
                if chars.get(i) == Some(&'*') {
                    i += 1;
                    p = args.get(next).map(|a| printf_int(a).unwrap_or(0)).unwrap_or(0).max(0) as usize;
                    next += 1;
                } else {
                    while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
                        p = p * 10 + d as usize;
                        i += 1;
                    }
                }
                precision = Some(p);
            }
            // Length modifiers are accepted and ignored
            while matches!(chars.get(i), Some('l' | 'h' | 'L' | 'j' | 'z' | 't')) {
                i += 1;
            }
            let Some(&conv) = chars.get(i) else {
                out.push('%');
                break;
            };
            i += 1;

            let arg = args.get(next).cloned();
            if arg.is_some() {
                next += 1;
            }
            let arg = arg.unwrap_or_default();

            let text = match conv {
                's' => match precision {
                    Some(p) => arg.chars().take(p).collect(),
                    None => arg,
                },
                'b' => {
                    let (text, stop) = unescape(&arg, true);
                    if stop {
                        out.push_str(&pad(text, width, left, false));
                        return (out, status);
                    }
                    text
                }
                'q' => shell_quote(&arg),
                'c' => arg.chars().next().map(String::from).unwrap_or_default(),
                'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
                    let n = match printf_int(&arg) {
                        Ok(n) => n,
                        Err(_) => {
                            status = 1;
                            0
                        }
                    };
                    let mut text = match conv {
                        'x' => format!("{:x}", n),
                        'X' => format!("{:X}", n),
                        'o' => format!("{:o}", n),
                        'u' => (n as u64).to_string(),
                        _ => n.to_string(),
                    };
                    if let Some(p) = precision {
                        let digits = text.trim_start_matches('-').len();
                        if digits < p {
                            let zeros = "0".repeat(p - digits);
                            text = match text.strip_prefix('-') {
                                Some(d) => format!("-{}{}", zeros, d),
                                None => format!("{}{}", zeros, text),
                            };
                        }
                    }
                    if n >= 0 && matches!(conv, 'd' | 'i') {
                        if plus {
                            text.insert(0, '+');
                        } else if space {
                            text.insert(0, ' ');
                        }
                    }
                    text
                }
                'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                    let value: f64 = if arg.trim().is_empty() {
                        0.0
                    } else {
                        match arg.trim().parse() {
                            Ok(v) => v,
                            Err(_) => {
                                status = 1;
                                0.0
                            }
                        }
                    };
                    let p = precision.unwrap_or(6);
                    let mut text = match conv {
                        'e' | 'E' => format_exp(value, p, conv == 'E'),
                        'g' | 'G' if value.fract() == 0.0 && value.abs() < 1e15 => format!("{}", value as i64),
                        'g' | 'G' => format!("{}", value),
                        _ => format!("{:.*}", p, value),
                    };
                    if value >= 0.0 && plus {
                        text.insert(0, '+');
                    }
                    text
                }
                other => {
                    status = 1;
                    format!("%{}", other)
                }
            };
            let zero_fill = match conv {
                'd' | 'i' | 'u' | 'x' | 'X' | 'o' => zero && precision.is_none(),
                'f' | 'F' | 'e' | 'E' | 'g' | 'G' => zero,
                _ => false,
            };
            out.push_str(&pad(text, width, left, zero_fill));
        }

        if next == start || next >= args.len() {
            break;
        }
    }
    (out, status)
}

/// One backslash escape at the start of `chunk`: (text, consumed), stop
fn unescape_one(chunk: &str) -> ((String, usize), bool) {
    let chars: Vec<char> = chunk.chars().collect();
    let Some(&e) = chars.get(1) else {
        return (("\\".to_string(), 1), false);
    };
    match e {
        '0'..='7' => {
            let digits: String = chars[1..].iter().take(3).take_while(|c| ('0'..='7').contains(*c)).collect();
            let n = u32::from_str_radix(&digits, 8).unwrap_or(0);
            let text = char::from_u32(n & 0xff).map(String::from).unwrap_or_default();
            ((text, 1 + digits.len()), false)
        }
        'x' => {
            let digits: String = chars[2..].iter().take(2).take_while(|c| c.is_ascii_hexdigit()).collect();
            if digits.is_empty() {
                return (("\\x".to_string(), 2), false);
            }
            let n = u8::from_str_radix(&digits, 16).unwrap_or(0);
            (((n as char).to_string(), 2 + digits.len()), false)
        }
        'c' => ((String::new(), 2), true),
        '"' => (("\"".to_string(), 2), false),
        _ => {
            let two: String = chars[..2].iter().collect();
            let (text, _) = unescape(&two, false);
            ((text, 2), false)
        }
    }
}

/// Split `text` into at most `max` fields on `ifs`; the last field keeps
/// the remainder
fn split_read(text: &str, ifs: &str, max: usize) -> Vec<String> {
    let is_ws = |c: char| ifs.contains(c) && c.is_whitespace();
    let is_sep = |c: char| ifs.contains(c);
    let mut fields = Vec::new();
    let mut rest = text.trim_start_matches(is_ws);

    while !rest.is_empty() {
        if max != 0 && fields.len() + 1 == max {
            fields.push(rest.trim_end_matches(is_ws).to_string());
            return fields;
        }
        match rest.find(is_sep) {
            Some(pos) => {
                fields.push(rest[..pos].to_string());
                let mut after = &rest[pos..];
                let sep = after.chars().next().unwrap_or(' ');
                after = &after[sep.len_utf8()..];
                after = after.trim_start_matches(is_ws);
                if !sep.is_whitespace() {
                    rest = after;
                } else if let Some(stripped) = after.strip_prefix(|c: char| is_sep(c) && !c.is_whitespace()) {
                    rest = stripped.trim_start_matches(is_ws);
                } else {
                    rest = after;
                }
            }
            None => {
                fields.push(rest.to_string());
                break;
            }
        }
    }
    fields
}

impl Shell {
    /// Run `name` if it is a builtin
    pub(crate) fn run_builtin(&mut self, name: &str, args: &[String], decl: &[DeclArg<'_>]) -> Option<Exec> {
        let result = match name {
            ":" | "true" => Ok(0),
            "false" => Ok(1),
            "echo" => Ok(self.builtin_echo(args)),
            "printf" => self.builtin_printf(args),
            "test" => Ok(self.builtin_test(args)),
            "[" => match args.split_last() {
                Some((last, rest)) if last == "]" => Ok(self.builtin_test(rest)),
                _ => {
                    self.eprint("[: missing `]'");
                    Ok(2)
                }
            },
            "local" | "declare" | "typeset" | "export" | "readonly" => self.builtin_declare(name, decl),
            "unset" => self.builtin_unset(args),
            "shift" => Ok(self.builtin_shift(args)),
            "set" => Ok(self.builtin_set(args)),
            "shopt" => Ok(self.builtin_shopt(args)),
            "return" => self.builtin_return(args),
            "break" | "continue" => self.builtin_loop_control(name, args),
            "exit" => {
                let status = args
                    .first()
                    .and_then(|a| a.parse::<i32>().ok())
                    .unwrap_or(self.last_status);
                Err(Ctl::Exit(status & 0xff))
            }
            "eval" => self.builtin_eval(args),
            "read" => self.builtin_read(args),
            "mapfile" | "readarray" => self.builtin_mapfile(args),
            "source" | "." => self.builtin_source(args),
            "let" => self.builtin_let(args),
            "type" => Ok(self.builtin_type(args)),
            "command" => self.builtin_command(args),
            "cd" => Ok(self.builtin_cd(args)),
            "pwd" => {
                let cwd = format!("{}\n", self.cwd.display());
                self.print(&cwd);
                Ok(0)
            }
            _ => return None,
        };
        Some(result)
    }

    fn builtin_echo(&mut self, args: &[String]) -> i32 {
        let mut newline = true;
        let mut escapes = false;
        let mut rest = args;
        while let Some(first) = rest.first() {
            let flags = match first.strip_prefix('-') {
                Some(f) if !f.is_empty() && f.chars().all(|c| matches!(c, 'n' | 'e' | 'E')) => f,
                _ => break,
            };
            for c in flags.chars() {
                match c {
                    'n' => newline = false,
                    'e' => escapes = true,
                    _ => escapes = false,
                }
            }
            rest = &rest[1..];
        }
        let mut text = rest.join(" ");
        if escapes {
            let (unescaped, stop) = unescape(&text, true);
            text = unescaped;
            if stop {
                newline = false;
            }
        }
        if newline {
            text.push('\n');
        }
        self.print(&text);
        0
    }

    fn builtin_printf(&mut self, args: &[String]) -> Exec {
        let (target, args) = match args {
            [flag, var, rest @ ..] if flag == "-v" => (Some(var.clone()), rest),
            [dashes, rest @ ..] if dashes == "--" => (None, rest),
            _ => (None, args),
        };
        let Some((fmt, rest)) = args.split_first() else {
            self.eprint("printf: usage: printf [-v var] format [arguments]");
            return Ok(2);
        };
        let (text, status) = printf_format(fmt, rest);
        match target {
            Some(var) => {
                let assign = literal_assignment(&var, text);
                let s = self.assign(&assign, Scope::Normal, &DeclSpec::default())?;
                Ok(status.max(s))
            }
            None => {
                self.print(&text);
                Ok(status)
            }
        }
    }

    fn builtin_declare(&mut self, name: &str, decl: &[DeclArg<'_>]) -> Exec {
        let mut spec = DeclSpec::default();
        let mut global = false;
        let mut print = false;
        let mut functions = false;
        let mut unexport = false;
        let mut i = 0;

        while let Some(DeclArg::Field(arg)) = decl.get(i) {
            let (on, flags) = match (arg.strip_prefix('-'), arg.strip_prefix('+')) {
                (Some(f), _) if !f.is_empty() => (true, f),
                (_, Some(f)) if !f.is_empty() => (false, f),
                _ => break,
            };
            if arg == "--" {
                i += 1;
                break;
            }
            for c in flags.chars() {
                match c {
                    'a' => spec.indexed = on,
                    'A' => spec.assoc = on,
                    'i' => spec.attrs.integer = on,
                    'x' => spec.attrs.exported = on,
                    'r' => spec.attrs.readonly = on,
                    'l' => spec.attrs.lower = on,
                    'u' => spec.attrs.upper = on,
                    'g' => global = true,
                    'p' => print = true,
                    'f' | 'F' => functions = true,
                    'n' if name == "export" => unexport = true,
                    'n' => {}
                    other => {
                        self.eprint(&format!("{}: -{}: invalid option", name, other));
                        return Ok(2);
                    }
                }
            }
            i += 1;
        }
        let rest = &decl[i..];

        match name {
            "export" => spec.attrs.exported = !unexport,
            "readonly" => spec.attrs.readonly = true,
            _ => {}
        }

        if functions {
            let mut status = 0;
            for arg in rest {
                if let DeclArg::Field(f) = arg {
                    if !self.has_function(f) {
                        status = 1;
                    }
                }
            }
            return Ok(status);
        }
        if print {
            let mut status = 0;
            for arg in rest {
                if let DeclArg::Field(f) = arg {
                    if self.vars.get(f).is_none() {
                        status = 1;
                    }
                }
            }
            return Ok(status);
        }

        let scope = match name {
            "local" => {
                if !self.in_function() {
                    self.eprint("local: can only be used in a function");
                    return Ok(1);
                }
                Scope::Local
            }
            "declare" | "typeset" if global => Scope::Global,
            "declare" | "typeset" if self.in_function() => Scope::Local,
            _ => Scope::Normal,
        };

        let mut status = 0;
        for arg in rest {
            match arg {
                DeclArg::Assign(assign) => {
                    status = status.max(self.assign(assign, scope, &spec)?);
                }
                DeclArg::Field(field) => {
                    if let Some((var, value)) = field.split_once('=') {
                        let assign = literal_assignment(var, value.to_string());
                        if !is_valid_name(&assign.name) {
                            self.eprint(&format!("{}: `{}': not a valid identifier", name, field));
                            status = 1;
                            continue;
                        }
                        status = status.max(self.assign(&assign, scope, &spec)?);
                    } else if is_valid_name(field) {
                        if unexport {
                            self.vars.entry(field).attrs.exported = false;
                        } else {
                            self.declare_name(field, scope, &spec);
                        }
                    } else {
                        self.eprint(&format!("{}: `{}': not a valid identifier", name, field));
                        status = 1;
                    }
                }
            }
        }
        Ok(status)
    }

    fn builtin_unset(&mut self, args: &[String]) -> Exec {
        let mut functions = false;
        let mut status = 0;
        for arg in args {
            match arg.as_str() {
                "-f" => {
                    functions = true;
                    continue;
                }
                "-v" => {
                    functions = false;
                    continue;
                }
                _ => {}
            }
            if functions {
                self.functions.remove(arg);
                continue;
            }
            let (name, index) = match arg.split_once('[') {
                Some((n, rest)) => (n, Some(rest.strip_suffix(']').unwrap_or(rest))),
                None => (arg.as_str(), None),
            };
            if self.vars.get(name).is_some_and(|v| v.attrs.readonly) {
                self.eprint(&format!("unset: {}: cannot unset: readonly variable", name));
                status = 1;
                continue;
            }
            match index {
                None => {
                    if !self.vars.unset(name) {
                        self.functions.remove(name);
                    }
                }
                Some(raw) => {
                    let current = self.vars.value(name).cloned();
                    match current {
                        Some(Value::Assoc(mut map)) => {
                            let key = self.expand_subscript_string(raw)?;
                            map.remove(&key);
                            self.vars.entry(name).value = Some(Value::Assoc(map));
                        }
                        Some(Value::Indexed(mut map)) => {
                            let mut idx = self.eval_arith(raw)?;
                            if idx < 0 {
                                idx += map.keys().next_back().map(|k| k + 1).unwrap_or(0);
                            }
                            map.remove(&idx);
                            self.vars.entry(name).value = Some(Value::Indexed(map));
                        }
                        Some(Value::Scalar(_)) => {
                            if self.eval_arith(raw)? == 0 {
                                self.vars.unset(name);
                            }
                        }
                        None => {}
                    }
                }
            }
        }
        Ok(status)
    }

    fn builtin_shift(&mut self, args: &[String]) -> i32 {
        let n = match args.first() {
            Some(a) => match a.parse::<usize>() {
                Ok(n) => n,
                Err(_) => {
                    self.eprint(&format!("shift: {}: numeric argument required", a));
                    return 1;
                }
            },
            None => 1,
        };
        if n > self.positional.len() {
            return 1;
        }
        self.positional.drain(..n);
        0
    }

    fn set_option(&mut self, name: &str, on: bool) -> bool {
        match name {
            "errexit" | "e" => self.opts.errexit = on,
            "nounset" | "u" => self.opts.nounset = on,
            "noglob" | "f" => self.opts.noglob = on,
            "pipefail" => self.opts.pipefail = on,
            "xtrace" | "x" | "verbose" | "v" | "noclobber" | "C" | "B" | "h" | "posix" => {}
            _ => return false,
        }
        true
    }

    fn builtin_set(&mut self, args: &[String]) -> i32 {
        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            if arg == "--" {
                self.positional = args[i + 1..].to_vec();
                return 0;
            }
            let (on, flags) = match (arg.strip_prefix('-'), arg.strip_prefix('+')) {
                (Some(f), _) if !f.is_empty() => (true, f),
                (_, Some(f)) if !f.is_empty() => (false, f),
                _ => {
                    self.positional = args[i..].to_vec();
                    return 0;
                }
            };
            if flags == "o" {
                i += 1;
                if let Some(name) = args.get(i) {
                    if !self.set_option(name, on) {
                        self.eprint(&format!("set: {}: invalid option name", name));
                        return 1;
                    }
                }
            } else {
                for c in flags.chars() {
                    if !self.set_option(&c.to_string(), on) {
                        self.eprint(&format!("set: -{}: invalid option", c));
                        return 2;
                    }
                }
            }
            i += 1;
        }
        0
    }

    fn builtin_shopt(&mut self, args: &[String]) -> i32 {
        let mut mode: Option<bool> = None;
        let mut status = 0;
        for arg in args {
            match arg.as_str() {
                "-s" => mode = Some(true),
                "-u" => mode = Some(false),
                "-q" | "-o" | "-p" => {}
                name => {
                    let slot = match name {
                        "globstar" => Some(&mut self.opts.globstar),
                        "nullglob" => Some(&mut self.opts.nullglob),
                        "nocasematch" => Some(&mut self.opts.nocasematch),
                        "extglob" | "dotglob" | "expand_aliases" | "lastpipe" | "inherit_errexit" => None,
                        _ => {
                            self.eprint(&format!("shopt: {}: invalid shell option name", name));
                            status = 1;
                            continue;
                        }
                    };
                    match (mode, slot) {
                        (Some(on), Some(slot)) => *slot = on,
                        (None, Some(slot)) if !*slot => status = 1,
                        _ => {}
                    }
                }
            }
        }
        status
    }

    fn builtin_return(&mut self, args: &[String]) -> Exec {
        if !self.in_function() && self.source_depth == 0 {
            self.eprint("return: can only `return' from a function or sourced script");
            return Ok(1);
        }
        let status = args
            .first()
            .and_then(|a| a.parse::<i32>().ok())
            .unwrap_or(self.last_status);
        Err(Ctl::Return(status & 0xff))
    }

    fn builtin_loop_control(&mut self, name: &str, args: &[String]) -> Exec {
        let n = args.first().and_then(|a| a.parse::<usize>().ok()).unwrap_or(1);
        if n == 0 {
            self.eprint(&format!("{}: loop count out of range", name));
            return Ok(1);
        }
        if self.loop_depth == 0 {
            return Ok(0);
        }
        let n = n.min(self.loop_depth);
        Err(if name == "break" {
            Ctl::Break(n)
        } else {
            Ctl::Continue(n)
        })
    }

    fn builtin_eval(&mut self, args: &[String]) -> Exec {
        let text = args.join(" ");
        match parse(&text, "eval") {
            Ok(list) => self.run_list(&list),
            Err(err) => {
                self.eprint(&err.to_string());
                Ok(2)
            }
        }
    }

    fn read_record(&mut self, delim: u8) -> Option<(Vec<u8>, bool)> {
        let input = self.stdin.as_mut()?;
        if input.pos >= input.data.len() {
            return None;
        }
        let rest = &input.data[input.pos..];
        match rest.iter().position(|b| *b == delim) {
            Some(end) => {
                let record = rest[..end].to_vec();
                input.pos += end + 1;
                Some((record, true))
            }
            None => {
                let record = rest.to_vec();
                input.pos = input.data.len();
                Some((record, false))
            }
        }
    }

    fn builtin_read(&mut self, args: &[String]) -> Exec {
        let mut raw = false;
        let mut array: Option<String> = None;
        let mut delim = b'\n';
        let mut names: Vec<String> = Vec::new();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-r" => raw = true,
                "-s" => {}
                "-a" => {
                    i += 1;
                    array = args.get(i).cloned();
                }
                "-d" => {
                    i += 1;
                    delim = args.get(i).and_then(|d| d.bytes().next()).unwrap_or(0);
                }
                "-p" | "-t" | "-u" | "-n" | "-N" => i += 1,
                "-rs" | "-sr" => raw = true,
                other => names.push(other.to_string()),
            }
            i += 1;
        }

        let Some((record, complete)) = self.read_record(delim) else {
            return Ok(1);
        };
        let mut line = String::from_utf8_lossy(&record).into_owned();
        if !raw {
            // Backslash-newline continues the line; other backslashes quote
            let mut out = String::with_capacity(line.len());
            let mut chars = line.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(n) = chars.next() {
                        out.push(n);
                    }
                } else {
                    out.push(c);
                }
            }
            line = out;
        }

        let ifs = match self.vars.value("IFS") {
            Some(v) => v.as_scalar().unwrap_or("").to_string(),
            None => " \t\n".to_string(),
        };
        let spec = DeclSpec::default();

        if let Some(array) = array {
            let fields = split_read(&line, &ifs, 0);
            let var = self.vars.entry(&array);
            var.value = Some(Value::indexed(fields));
        } else if names.is_empty() {
            self.assign(&literal_assignment("REPLY", line), Scope::Normal, &spec)?;
        } else {
            let mut fields = split_read(&line, &ifs, names.len()).into_iter();
            for name in &names {
                let value = fields.next().unwrap_or_default();
                self.assign(&literal_assignment(name, value), Scope::Normal, &spec)?;
            }
        }
        Ok(if complete { 0 } else { 1 })
    }

    fn builtin_mapfile(&mut self, args: &[String]) -> Exec {
        let mut strip = false;
        let mut name = "MAPFILE".to_string();
        for arg in args {
            match arg.as_str() {
                "-t" => strip = true,
                a if a.starts_with('-') => {}
                a => name = a.to_string(),
            }
        }
        let mut lines: BTreeMap<i64, String> = BTreeMap::new();
        while let Some((record, complete)) = self.read_record(b'\n') {
            let mut line = String::from_utf8_lossy(&record).into_owned();
            if complete && !strip {
                line.push('\n');
            }
            lines.insert(lines.len() as i64, line);
        }
        self.vars.entry(&name).value = Some(Value::Indexed(lines));
        Ok(0)
    }

    fn builtin_source(&mut self, args: &[String]) -> Exec {
        let Some((path, rest)) = args.split_first() else {
            self.eprint("source: filename argument required");
            return Ok(2);
        };
        let data = match self.sandbox.read(&self.cwd, path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(Ctl::Fatal(Error::RestrictedViolation(format!(
                    "source {}: outside the recipe directory",
                    path
                ))));
            }
            Err(e) => {
                self.eprint(&format!("{}: {}", path, e));
                return Ok(1);
            }
        };
        if self.source_depth >= MAX_SOURCE_DEPTH {
            return Err(Ctl::Fatal(Error::ExecFailed(format!(
                "{}: maximum source nesting level exceeded",
                path
            ))));
        }
        let text = String::from_utf8_lossy(&data);
        let list = parse(&text, path)?;

        let saved = if rest.is_empty() {
            None
        } else {
            Some(std::mem::replace(&mut self.positional, rest.to_vec()))
        };
        self.source_depth += 1;
        let result = self.run_list(&list);
        self.source_depth -= 1;
        if let Some(positional) = saved {
            self.positional = positional;
        }
        match result {
            Err(Ctl::Return(status)) => Ok(status),
            other => other,
        }
    }

    fn builtin_let(&mut self, args: &[String]) -> Exec {
        if args.is_empty() {
            self.eprint("let: expression expected");
            return Ok(1);
        }
        let mut last = 0;
        for arg in args {
            last = self.eval_arith(arg)?;
        }
        Ok(if last != 0 { 0 } else { 1 })
    }

    fn builtin_type(&mut self, args: &[String]) -> i32 {
        let mut terse = false;
        let mut status = 0;
        for arg in args {
            match arg.as_str() {
                "-t" => terse = true,
                "-a" | "-p" | "-P" | "-f" => {}
                name => {
                    let kind = if KEYWORDS.contains(&name) {
                        "keyword"
                    } else if self.has_function(name) {
                        "function"
                    } else if is_builtin(name) {
                        "builtin"
                    } else {
                        status = 1;
                        continue;
                    };
                    let line = if terse {
                        format!("{}\n", kind)
                    } else {
                        format!("{} is a shell {}\n", name, kind)
                    };
                    self.print(&line);
                }
            }
        }
        status
    }

    fn builtin_command(&mut self, args: &[String]) -> Exec {
        match args.first().map(String::as_str) {
            Some("-v") | Some("-V") => {
                let mut status = 0;
                for name in &args[1..] {
                    if self.has_function(name) || is_builtin(name) || KEYWORDS.contains(&name.as_str()) {
                        let line = format!("{}\n", name);
                        self.print(&line);
                    } else {
                        status = 1;
                    }
                }
                Ok(status)
            }
            Some(name) => {
                // Bypasses functions
                let fields: Vec<DeclArg<'_>> = args[1..].iter().map(|a| DeclArg::Field(a.clone())).collect();
                match self.run_builtin(name, &args[1..], &fields) {
                    Some(result) => result,
                    None => Ok(0),
                }
            }
            None => Ok(0),
        }
    }

    fn builtin_cd(&mut self, args: &[String]) -> i32 {
        let target = match args.iter().find(|a| !a.starts_with('-') || a.as_str() == "-") {
            Some(t) if t != "-" => t.clone(),
            _ => self.sandbox.root().display().to_string(),
        };
        match self.sandbox.resolve(&self.cwd, &target) {
            Ok(path) if path.is_dir() => {
                self.vars.set_scalar("OLDPWD", self.cwd.display().to_string());
                self.cwd = path;
                self.vars.set_scalar("PWD", self.cwd.display().to_string());
                0
            }
            Ok(_) => {
                self.eprint(&format!("cd: {}: Not a directory", target));
                1
            }
            Err(e) => {
                self.eprint(&format!("cd: {}: {}", target, e));
                1
            }
        }
    }

    /// `test` and `[`; status 2 on a malformed expression
    fn builtin_test(&mut self, args: &[String]) -> i32 {
        let mut parser = TestParser { args, pos: 0 };
        match parser.or(self) {
            Ok(_) if parser.pos < args.len() => {
                self.eprint(&format!("test: {}: unexpected argument", args[parser.pos]));
                2
            }
            Ok(true) => 0,
            Ok(false) => 1,
            Err(message) => {
                self.eprint(&format!("test: {}", message));
                2
            }
        }
    }

    /// File and string predicates shared by `test` and `[[ ]]`
    pub(crate) fn unary_test(&mut self, op: &str, operand: &str) -> bool {
        #[cfg(unix)]
        use std::os::unix::fs::{FileTypeExt, PermissionsExt};

        match op {
            "-n" => !operand.is_empty(),
            "-z" => operand.is_empty(),
            "-v" => match operand.split_once('[') {
                Some((name, rest)) => {
                    let key = rest.strip_suffix(']').unwrap_or(rest);
                    match self.vars.value(name) {
                        Some(Value::Assoc(m)) => m.contains_key(key),
                        Some(Value::Indexed(m)) => key.parse::<i64>().is_ok_and(|i| m.contains_key(&i)),
                        Some(Value::Scalar(_)) => key == "0",
                        None => false,
                    }
                }
                None => self.vars.value(operand).is_some(),
            },
            "-t" => false,
            "-L" | "-h" => self
                .sandbox
                .symlink_metadata(&self.cwd, operand)
                .is_ok_and(|m| m.file_type().is_symlink()),
            _ => {
                let Ok(meta) = self.sandbox.metadata(&self.cwd, operand) else {
                    return false;
                };
                match op {
                    "-e" | "-r" | "-w" => true,
                    "-f" => meta.is_file(),
                    "-d" => meta.is_dir(),
                    "-s" => meta.len() > 0,
                    #[cfg(unix)]
                    "-x" => meta.permissions().mode() & 0o111 != 0,
                    #[cfg(unix)]
                    "-b" => meta.file_type().is_block_device(),
                    #[cfg(unix)]
                    "-c" => meta.file_type().is_char_device(),
                    #[cfg(unix)]
                    "-p" => meta.file_type().is_fifo(),
                    #[cfg(unix)]
                    "-S" => meta.file_type().is_socket(),
                    #[cfg(unix)]
                    "-u" => meta.permissions().mode() & 0o4000 != 0,
                    #[cfg(unix)]
                    "-g" => meta.permissions().mode() & 0o2000 != 0,
                    #[cfg(unix)]
                    "-k" => meta.permissions().mode() & 0o1000 != 0,
                    "-O" | "-G" | "-N" => true,
                    _ => false,
                }
            }
        }
    }

    fn file_test(&mut self, op: &str, left: &str, right: &str) -> bool {
        let (Ok(a), Ok(b)) = (
            self.sandbox.metadata(&self.cwd, left),
            self.sandbox.metadata(&self.cwd, right),
        ) else {
            return false;
        };
        match op {
            "-nt" => a.modified().ok() > b.modified().ok(),
            "-ot" => a.modified().ok() < b.modified().ok(),
            _ => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::MetadataExt;
                    a.dev() == b.dev() && a.ino() == b.ino()
                }
                #[cfg(not(unix))]
                {
                    false
                }
            }
        }
    }

    fn binary_test(&mut self, op: &str, left: &str, right: &str) -> Result<bool, String> {
        let int = |s: &str| -> Result<i64, String> {
            arith::parse_literal(s).ok_or_else(|| format!("{}: integer expression expected", s))
        };
        Ok(match op {
            "=" | "==" => left == right,
            "!=" => left != right,
            "<" => left < right,
            ">" => left > right,
            "-eq" => int(left)? == int(right)?,
            "-ne" => int(left)? != int(right)?,
            "-lt" => int(left)? < int(right)?,
            "-le" => int(left)? <= int(right)?,
            "-gt" => int(left)? > int(right)?,
            "-ge" => int(left)? >= int(right)?,
            "-nt" | "-ot" | "-ef" => self.file_test(op, left, right),
            other => return Err(format!("{}: binary operator expected", other)),
        })
    }

    /// Evaluate a `[[ ]]` expression
    pub(crate) fn eval_cond(&mut self, expr: &CondExpr) -> Result<bool, Ctl> {
        match expr {
            CondExpr::Word(word) => Ok(!self.expand_word_string(word)?.is_empty()),
            CondExpr::Not(inner) => Ok(!self.eval_cond(inner)?),
            CondExpr::And(a, b) => Ok(self.eval_cond(a)? && self.eval_cond(b)?),
            CondExpr::Or(a, b) => Ok(self.eval_cond(a)? || self.eval_cond(b)?),
            CondExpr::Unary(op, word) => {
                let operand = self.expand_word_string(word)?;
                Ok(self.unary_test(op, &operand))
            }
            CondExpr::Binary(left, op, right) => {
                let lhs = self.expand_word_string(left)?;
                match op.as_str() {
                    "==" | "=" | "!=" => {
                        let pattern = self.expand_pattern(right)?;
                        let hit = self.pattern_matches(&pattern, &lhs);
                        Ok(if op == "!=" { !hit } else { hit })
                    }
                    "=~" => {
                        let source = self.expand_regex(right)?;
                        let source = if self.opts.nocasematch {
                            format!("(?i){}", source)
                        } else {
                            source
                        };
                        let re = match regex::Regex::new(&source) {
                            Ok(re) => re,
                            Err(_) => {
                                self.eprint(&format!("{}: invalid regular expression", source));
                                return Ok(false);
                            }
                        };
                        match re.captures(&lhs) {
                            Some(caps) => {
                                let groups = caps
                                    .iter()
                                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default());
                                self.vars.entry("BASH_REMATCH").value = Some(Value::indexed(groups));
                                Ok(true)
                            }
                            None => {
                                self.vars.entry("BASH_REMATCH").value = Some(Value::Indexed(BTreeMap::new()));
                                Ok(false)
                            }
                        }
                    }
                    "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge" => {
                        let rhs = self.expand_word_string(right)?;
                        let a = self.eval_arith(&lhs)?;
                        let b = self.eval_arith(&rhs)?;
                        Ok(match op.as_str() {
                            "-eq" => a == b,
                            "-ne" => a != b,
                            "-lt" => a < b,
                            "-le" => a <= b,
                            "-gt" => a > b,
                            _ => a >= b,
                        })
                    }
                    other => {
                        let rhs = self.expand_word_string(right)?;
                        self.binary_test(other, &lhs, &rhs).map_err(|m| Ctl::Fatal(Error::ExecFailed(m)))
                    }
                }
            }
        }
    }
}

/// Assignment of an already-expanded value
fn literal_assignment(target: &str, value: String) -> Assignment {
    let (name, index) = match target.split_once('[') {
        Some((n, rest)) => (n.to_string(), Some(rest.strip_suffix(']').unwrap_or(rest).to_string())),
        None => (target.to_string(), None),
    };
    Assignment {
        name,
        index,
        append: false,
        value: AssignValue::Scalar(Word {
            parts: vec![WordPart::SingleQuoted(value)],
        }),
    }
}

/// Recursive descent over `test` arguments
struct TestParser<'a> {
    args: &'a [String],
    pos: usize,
}

impl<'a> TestParser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.args.get(self.pos).map(String::as_str)
    }

    fn or(&mut self, sh: &mut Shell) -> Result<bool, String> {
        let mut value = self.and(sh)?;
        while self.peek() == Some("-o") {
            self.pos += 1;
            let rhs = self.and(sh)?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self, sh: &mut Shell) -> Result<bool, String> {
        let mut value = self.not(sh)?;
        while self.peek() == Some("-a") {
            self.pos += 1;
            let rhs = self.not(sh)?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn not(&mut self, sh: &mut Shell) -> Result<bool, String> {
        if self.peek() == Some("!") && self.pos + 1 < self.args.len() {
            self.pos += 1;
            return Ok(!self.not(sh)?);
        }
        self.primary(sh)
    }

    fn primary(&mut self, sh: &mut Shell) -> Result<bool, String> {
        let Some(first) = self.peek() else {
            return Ok(false);
        };
        if let (Some(op), Some(right)) = (self.args.get(self.pos + 1), self.args.get(self.pos + 2)) {
            if BINARY_TESTS.contains(&op.as_str()) {
                let left = first.to_string();
                let (op, right) = (op.clone(), right.clone());
                self.pos += 3;
                return sh.binary_test(&op, &left, &right);
            }
        }
        if first == "(" && self.pos + 1 < self.args.len() {
            self.pos += 1;
            let value = self.or(sh)?;
            if self.peek() != Some(")") {
                return Err("`)' expected".to_string());
            }
            self.pos += 1;
            return Ok(value);
        }
        if UNARY_TESTS.contains(&first) && self.pos + 1 < self.args.len() {
            let op = first.to_string();
            let operand = self.args[self.pos + 1].clone();
            self.pos += 2;
            return Ok(sh.unary_test(&op, &operand));
        }
        let value = !first.is_empty();
        self.pos += 1;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::Sandbox;

    fn shell(dir: &std::path::Path) -> Shell {
        Shell::new(Sandbox::new(dir).unwrap())
    }

    fn run_in(dir: &std::path::Path, src: &str) -> Shell {
        let mut sh = shell(dir);
        let list = parse(src, "test.sh").unwrap();
        sh.run(&list).unwrap();
        sh
    }

    fn run(src: &str) -> Shell {
        let tmp = tempfile::tempdir().unwrap();
        run_in(tmp.path(), src)
    }

    fn get(sh: &Shell, name: &str) -> String {
        sh.vars()
            .value(name)
            .and_then(Value::as_scalar)
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn test_printf_formats() {
        assert_eq!(printf_format("%s-%d\\n", &["a".into(), "42".into()]).0, "a-42\n");
        assert_eq!(printf_format("%05.1f|%-4s|%x", &["3.14159".into(), "ab".into(), "255".into()]).0, "003.1|ab  |ff");
        assert_eq!(printf_format("%s,", &["a".into(), "b".into(), "c".into()]).0, "a,b,c,");
        assert_eq!(printf_format("%q", &["it's".into()]).0, "'it'\\''s'");
        assert_eq!(printf_format("%b", &["x\\ty".into()]).0, "x\ty");
        assert_eq!(printf_format("%%%3d", &["7".into()]).0, "%  7");
        assert_eq!(printf_format("%d", &["nope".into()]).1, 1);
    }

    #[test]
    fn test_echo_and_printf_v() {
        let sh = run("echo -n a b\necho -e 'x\\ty'\nprintf -v out '%s=%s' k v\n");
        assert_eq!(sh.stdout(), "a bx\ty\n");
        assert_eq!(get(&sh, "out"), "k=v");
    }

    #[test]
    fn test_test_builtin() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("file"), "data").unwrap();
        std::fs::create_dir(tmp.path().join("dir")).unwrap();
        let sh = run_in(
            tmp.path(),
            r#"
[ -f file ] && a=1
[ -d dir ] && b=1
[ -e /etc/passwd ] || c=1
[ 3 -lt 10 ] && d=1
[ "x" = "x" -a ! -z "y" ] && e=1
test -n "" || f=1
[[ -s file && abc == a* ]] && g=1
[[ "1.2.3" =~ ^([0-9]+)\.([0-9]+) ]] && h=${BASH_REMATCH[2]}
"#,
        );
        for name in ["a", "b", "c", "d", "e", "f", "g"] {
            assert_eq!(get(&sh, name), "1", "{}", name);
        }
        assert_eq!(get(&sh, "h"), "2");
    }

    #[test]
    fn test_read_splits_on_ifs() {
        let sh = run(
            r#"
read -r first rest <<< "  alpha beta gamma  "
IFS=: read -r -a parts <<< "a:b::c"
while read -r line; do count=$((count + 1)); last=$line; done <<EOF
one
two
EOF
"#,
        );
        assert_eq!(get(&sh, "first"), "alpha");
        assert_eq!(get(&sh, "rest"), "beta gamma");
        assert_eq!(sh.vars().value("parts").unwrap().elements(), vec!["a", "b", "", "c"]);
        assert_eq!(get(&sh, "count"), "2");
        assert_eq!(get(&sh, "last"), "two");
    }

    #[test]
    fn test_declare_and_unset() {
        let sh = run(
            r#"
declare -i n=2+3
declare -a list=(a b c)
unset 'list[1]'
export PATHISH=/usr/bin
readonly FIXED=1
FIXED=2
declare -l lower=MiXeD
"#,
        );
        assert_eq!(get(&sh, "n"), "5");
        assert_eq!(sh.vars().value("list").unwrap().elements(), vec!["a", "c"]);
        assert!(sh.vars().get("PATHISH").unwrap().attrs.exported);
        assert_eq!(get(&sh, "FIXED"), "1");
        assert_eq!(get(&sh, "lower"), "mixed");
    }

    #[test]
    fn test_declare_in_function_is_local() {
        let sh = run("f() { declare inner=1; declare -g outer=2; }\nf\n");
        assert!(sh.vars().value("inner").is_none());
        assert_eq!(get(&sh, "outer"), "2");
    }

    #[test]
    fn test_source_confined() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("common.sh"), "shared=yes\n").unwrap();
        let sh = run_in(tmp.path(), "source ./common.sh\n");
        assert_eq!(get(&sh, "shared"), "yes");

        let mut sh = shell(tmp.path());
        let list = parse("source /etc/os-release\n", "t").unwrap();
        assert!(matches!(sh.run(&list), Err(Error::RestrictedViolation(_))));
    }

    #[test]
    fn test_eval_and_type() {
        let sh = run(
            "eval 'x=1; y=$((x + 1))'\neval 'if then'\nsyntax=$?\nf() { :; }\ntype -t f >/dev/null\ncommand -v gcc || missing=1\n",
        );
        assert_eq!(get(&sh, "y"), "2");
        assert_eq!(get(&sh, "syntax"), "2");
        assert_eq!(get(&sh, "missing"), "1");
    }

    #[test]
    fn test_cd_stays_inside() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/x"), "").unwrap();
        let sh = run_in(tmp.path(), "cd sub && [ -f x ] && ok=1\ncd /tmp || denied=1\n");
        assert_eq!(get(&sh, "ok"), "1");
        assert_eq!(get(&sh, "denied"), "1");
    }

    #[test]
    fn test_set_options() {
        let sh = run("set -- a b c\nshift\nn=$#\nset -o pipefail\nfalse | true\ns=$?\n");
        assert_eq!(get(&sh, "n"), "2");
        assert_eq!(get(&sh, "s"), "1");
    }

    #[test]
    fn test_split_read() {
        assert_eq!(split_read("a b c", " \t\n", 2), vec!["a", "b c"]);
        assert_eq!(split_read("a:b::c", ":", 0), vec!["a", "b", "", "c"]);
        assert_eq!(split_read("   ", " \t\n", 1), Vec::<String>::new());
    }
}
