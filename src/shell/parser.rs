// src/shell/parser.rs

//! Recursive-descent parser for the recipe shell language
//!
//! Shell tokenization depends on context (reserved words only count in
//! command position, `<` is an operator except inside `[[ ]]`, quoting nests
//! through substitutions), so the parser works directly on characters
//! instead of a separate token stream.

use super::ast::*;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Builtins whose `name=value` arguments are parsed as assignments
const DECLARATION_BUILTINS: &[&str] = &["declare", "typeset", "local", "export", "readonly"];

const COND_UNARY_OPS: &[&str] = &[
    "-a", "-b", "-c", "-d", "-e", "-f", "-g", "-h", "-k", "-n", "-p", "-r", "-s", "-t", "-u",
    "-v", "-w", "-x", "-z", "-G", "-L", "-N", "-O", "-S",
];

const COND_BINARY_OPS: &[&str] = &[
    "==", "=", "!=", "=~", "<", ">", "-eq", "-ne", "-lt", "-le", "-gt", "-ge", "-nt", "-ot",
    "-ef",
];

/// Parse a complete script
pub fn parse(source: &str, path: &str) -> Result<List> {
    let mut parser = Parser::new(source, path);
    let list = parser.parse_list(&[])?;
    parser.skip_linebreaks();
    if let Some(c) = parser.peek() {
        return Err(parser.error(format!("unexpected '{}'", c)));
    }
    Ok(list)
}

/// Parse text with word syntax, blanks included (array subscripts)
pub fn parse_word_text(text: &str) -> Result<Word> {
    let mut parser = Parser::new(text, "<subscript>");
    let parts = parser.read_parts(&|_| false, WordMode::Unquoted)?;
    Ok(Word { parts })
}

/// Parse text the way a here-document body is parsed: expansions are
/// performed, quote characters are literal, and the result is never split
pub fn parse_expandable_text(text: &str) -> Result<Word> {
    let mut parser = Parser::new(text, "<text>");
    let parts = parser.read_parts(&|_| false, WordMode::HereDoc)?;
    Ok(Word {
        parts: vec![WordPart::DoubleQuoted(parts)],
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WordMode {
    /// Quotes active, backslash quotes any character
    Unquoted,
    /// Inside `"..."`
    Double,
    /// Quote characters literal, backslash only before `$`, `` ` ``, `\`
    HereDoc,
}

struct Parser<'a> {
    src: Vec<char>,
    pos: usize,
    path: &'a str,
    line_starts: Vec<usize>,
    /// Newline that begins pending here-document bodies, and where parsing
    /// resumes once that newline is consumed
    heredoc_skip: Option<(usize, usize)>,
}

fn is_meta(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | ';' | '&' | '|' | '<' | '>' | '(' | ')')
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if is_name_start(c)) && chars.all(is_name_char)
}

impl<'a> Parser<'a> {
    fn new(source: &str, path: &'a str) -> Self {
        let src: Vec<char> = source.chars().collect();
        let mut line_starts = vec![0];
        for (i, c) in src.iter().enumerate() {
            if *c == '\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            src,
            pos: 0,
            path,
            line_starts,
            heredoc_skip: None,
        }
    }

    fn location(&self, pos: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&pos) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (line + 1, pos - self.line_starts[line] + 1)
    }

    fn line(&self) -> usize {
        self.location(self.pos).0
    }

    fn error(&self, message: impl Into<String>) -> Error {
        let (line, column) = self.location(self.pos.min(self.src.len()));
        Error::RecipeSyntax {
            path: self.path.to_string(),
            line,
            column,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src.get(self.pos + n).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        let at = self.pos;
        self.pos += 1;
        if let Some((newline, resume)) = self.heredoc_skip {
            if at == newline {
                self.pos = resume;
                self.heredoc_skip = None;
            }
        }
        Some(c)
    }

    fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') => {
                    self.bump();
                }
                Some('\\') if self.peek_at(1) == Some('\n') => self.bump_n(2),
                _ => break,
            }
        }
    }

    fn skip_comment(&mut self) {
        if self.peek() == Some('#') {
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                self.bump();
            }
        }
    }

    fn skip_linebreaks(&mut self) {
        loop {
            self.skip_blanks();
            self.skip_comment();
            if self.peek() == Some('\n') {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// A bare word at the cursor, if it is made only of plain characters
    fn peek_word(&self) -> Option<String> {
        let mut word = String::new();
        let mut i = self.pos;
        while let Some(&c) = self.src.get(i) {
            if is_meta(c) {
                break;
            }
            if matches!(c, '\'' | '"' | '\\' | '$' | '`') {
                return None;
            }
            word.push(c);
            i += 1;
        }
        if word.is_empty() { None } else { Some(word) }
    }

    fn at_word(&self, word: &str) -> bool {
        self.peek_word().as_deref() == Some(word)
    }

    fn expect_word(&mut self, word: &str) -> Result<()> {
        self.skip_linebreaks();
        if self.at_word(word) {
            self.bump_n(word.chars().count());
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", word)))
        }
    }

    fn expect_char(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", c)))
        }
    }

    fn at_case_terminator(&self) -> bool {
        self.peek() == Some(';') && matches!(self.peek_at(1), Some(';') | Some('&'))
    }

    fn parse_list(&mut self, terminators: &[&str]) -> Result<List> {
        let mut items = Vec::new();
        let mut separated = true;

        loop {
            self.skip_linebreaks();
            if self.peek().is_none() || self.peek() == Some(')') || self.at_case_terminator() {
                break;
            }
            if let Some(word) = self.peek_word() {
                if terminators.contains(&word.as_str()) {
                    break;
                }
            }
            if !separated {
                return Err(self.error("expected ';' or newline"));
            }

            let and_or = self.parse_and_or()?;
            self.skip_blanks();
            self.skip_comment();

            let mut background = false;
            separated = match self.peek() {
                Some(';') if !self.at_case_terminator() => {
                    self.bump();
                    true
                }
                Some('&') => {
                    self.bump();
                    background = true;
                    true
                }
                Some('\n') => {
                    self.bump();
                    true
                }
                _ => false,
            };
            items.push(ListItem { and_or, background });
        }

        Ok(items)
    }

    fn parse_and_or(&mut self) -> Result<AndOr> {
        let first = self.parse_pipeline()?;
        let mut rest = Vec::new();
        loop {
            self.skip_blanks();
            let op = if self.starts_with("&&") {
                AndOrOp::And
            } else if self.starts_with("||") {
                AndOrOp::Or
            } else {
                break;
            };
            self.bump_n(2);
            self.skip_linebreaks();
            rest.push((op, self.parse_pipeline()?));
        }
        Ok(AndOr { first, rest })
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline> {
        self.skip_blanks();
        let mut negated = false;
        while self.at_word("!") {
            self.bump();
            self.skip_blanks();
            negated = !negated;
        }

        let mut commands = vec![self.parse_command()?];
        loop {
            self.skip_blanks();
            if self.peek() == Some('|') && self.peek_at(1) != Some('|') {
                self.bump();
                if self.peek() == Some('&') {
                    self.bump();
                }
                self.skip_linebreaks();
                commands.push(self.parse_command()?);
            } else {
                break;
            }
        }
        Ok(Pipeline { negated, commands })
    }

    fn parse_command(&mut self) -> Result<Command> {
        self.skip_blanks();

        if self.peek() == Some('(') {
            let compound = if self.peek_at(1) == Some('(') {
                self.bump_n(2);
                CompoundCommand::Arith(self.read_arith_raw()?)
            } else {
                self.bump();
                let list = self.parse_list(&[])?;
                self.skip_linebreaks();
                self.expect_char(')')?;
                CompoundCommand::Subshell(list)
            };
            return self.finish_compound(compound);
        }

        if let Some(word) = self.peek_word() {
            match word.as_str() {
                "{" => {
                    self.bump();
                    let list = self.parse_list(&["}"])?;
                    self.expect_word("}")?;
                    return self.finish_compound(CompoundCommand::Brace(list));
                }
                "if" => {
                    let c = self.parse_if()?;
                    return self.finish_compound(c);
                }
                "while" | "until" => {
                    let c = self.parse_while(word == "until")?;
                    return self.finish_compound(c);
                }
                "for" => {
                    let c = self.parse_for()?;
                    return self.finish_compound(c);
                }
                "case" => {
                    let c = self.parse_case()?;
                    return self.finish_compound(c);
                }
                "[[" => {
                    self.bump_n(2);
                    let expr = self.parse_cond_or()?;
                    self.skip_blanks();
                    if !self.starts_with("]]") {
                        return Err(self.error("expected ']]'"));
                    }
                    self.bump_n(2);
                    return self.finish_compound(CompoundCommand::Cond(expr));
                }
                "function" => return self.parse_function_keyword(),
                "then" | "else" | "elif" | "fi" | "do" | "done" | "esac" | "}" | "in" => {
                    return Err(self.error(format!("unexpected '{}'", word)));
                }
                _ => {
                    if let Some(def) = self.try_parse_function_def(&word)? {
                        return Ok(def);
                    }
                }
            }
        }

        self.parse_simple_command()
    }

    fn finish_compound(&mut self, compound: CompoundCommand) -> Result<Command> {
        let mut redirects = Vec::new();
        loop {
            self.skip_blanks();
            if self.at_redirect() {
                redirects.push(self.parse_redirect()?);
            } else {
                break;
            }
        }
        Ok(Command::Compound(compound, redirects))
    }

    fn try_parse_function_def(&mut self, name: &str) -> Result<Option<Command>> {
        if !is_valid_name(name) && !name.chars().all(|c| is_name_char(c) || c == '-' || c == ':') {
            return Ok(None);
        }
        let saved = (self.pos, self.heredoc_skip);
        let line = self.line();
        self.bump_n(name.chars().count());
        self.skip_blanks();
        if self.peek() == Some('(') {
            self.bump();
            self.skip_blanks();
            if self.peek() == Some(')') {
                self.bump();
                self.skip_linebreaks();
                let body = self.parse_command()?;
                return Ok(Some(Command::FunctionDef(Arc::new(FunctionDef {
                    name: name.to_string(),
                    body,
                    line,
                }))));
            }
        }
        (self.pos, self.heredoc_skip) = saved;
        Ok(None)
    }

    fn parse_function_keyword(&mut self) -> Result<Command> {
        let line = self.line();
        self.bump_n("function".len());
        self.skip_blanks();
        let name = self
            .peek_word()
            .ok_or_else(|| self.error("expected function name"))?;
        self.bump_n(name.chars().count());
        // `function f()` may carry the parentheses glued to the name
        let name = name.trim_end_matches("()").to_string();
        self.skip_blanks();
        if self.peek() == Some('(') {
            self.bump();
            self.skip_blanks();
            self.expect_char(')')?;
        }
        self.skip_linebreaks();
        let body = self.parse_command()?;
        Ok(Command::FunctionDef(Arc::new(FunctionDef { name, body, line })))
    }

    fn parse_if(&mut self) -> Result<CompoundCommand> {
        self.bump_n(2);
        let mut branches = Vec::new();
        let mut else_body = None;

        let cond = self.parse_list(&["then"])?;
        self.expect_word("then")?;
        let body = self.parse_list(&["elif", "else", "fi"])?;
        branches.push((cond, body));

        loop {
            self.skip_linebreaks();
            if self.at_word("elif") {
                self.bump_n(4);
                let cond = self.parse_list(&["then"])?;
                self.expect_word("then")?;
                let body = self.parse_list(&["elif", "else", "fi"])?;
                branches.push((cond, body));
            } else if self.at_word("else") {
                self.bump_n(4);
                else_body = Some(self.parse_list(&["fi"])?);
                self.expect_word("fi")?;
                break;
            } else {
                self.expect_word("fi")?;
                break;
            }
        }

        Ok(CompoundCommand::If {
            branches,
            else_body,
        })
    }

    fn parse_while(&mut self, until: bool) -> Result<CompoundCommand> {
        self.bump_n(5);
        let cond = self.parse_list(&["do"])?;
        let body = self.parse_do_group()?;
        Ok(CompoundCommand::While { cond, body, until })
    }

    fn parse_do_group(&mut self) -> Result<List> {
        self.skip_linebreaks();
        if self.at_word("{") {
            self.bump();
            let body = self.parse_list(&["}"])?;
            self.expect_word("}")?;
            return Ok(body);
        }
        self.expect_word("do")?;
        let body = self.parse_list(&["done"])?;
        self.expect_word("done")?;
        Ok(body)
    }

    fn parse_for(&mut self) -> Result<CompoundCommand> {
        self.bump_n(3);
        self.skip_blanks();

        if self.starts_with("((") {
            self.bump_n(2);
            let raw = self.read_arith_raw()?;
            let parts = split_top_level(&raw, ';');
            if parts.len() != 3 {
                return Err(self.error("expected 'init; cond; step' in arithmetic for"));
            }
            self.skip_blanks();
            if self.peek() == Some(';') {
                self.bump();
            }
            let body = self.parse_do_group()?;
            return Ok(CompoundCommand::ArithFor {
                init: parts[0].trim().to_string(),
                cond: parts[1].trim().to_string(),
                step: parts[2].trim().to_string(),
                body,
            });
        }

        let var = self
            .peek_word()
            .filter(|w| is_valid_name(w))
            .ok_or_else(|| self.error("expected loop variable name"))?;
        self.bump_n(var.len());
        self.skip_linebreaks();

        let mut words = None;
        if self.at_word("in") {
            self.bump_n(2);
            let mut list = Vec::new();
            loop {
                self.skip_blanks();
                match self.peek() {
                    None | Some(';') | Some('\n') => break,
                    Some('#') => {
                        self.skip_comment();
                        break;
                    }
                    _ => list.push(self.parse_word()?),
                }
            }
            if matches!(self.peek(), Some(';') | Some('\n')) {
                self.bump();
            }
            words = Some(list);
        } else if self.peek() == Some(';') {
            self.bump();
        }

        let body = self.parse_do_group()?;
        Ok(CompoundCommand::For { var, words, body })
    }

    fn parse_case(&mut self) -> Result<CompoundCommand> {
        self.bump_n(4);
        self.skip_blanks();
        let word = self.parse_word()?;
        self.skip_linebreaks();
        self.expect_word("in")?;

        let mut arms = Vec::new();
        loop {
            self.skip_linebreaks();
            if self.at_word("esac") {
                self.bump_n(4);
                break;
            }
            if self.peek().is_none() {
                return Err(self.error("expected 'esac'"));
            }
            if self.peek() == Some('(') {
                self.bump();
            }

            let mut patterns = Vec::new();
            loop {
                self.skip_blanks();
                patterns.push(self.parse_word()?);
                self.skip_blanks();
                match self.peek() {
                    Some('|') => {
                        self.bump();
                    }
                    Some(')') => {
                        self.bump();
                        break;
                    }
                    _ => return Err(self.error("expected ')' after case pattern")),
                }
            }

            let body = self.parse_list(&["esac"])?;
            self.skip_linebreaks();
            let terminator = if self.starts_with(";;&") {
                self.bump_n(3);
                CaseTerminator::Continue
            } else if self.starts_with(";;") {
                self.bump_n(2);
                CaseTerminator::Break
            } else if self.starts_with(";&") {
                self.bump_n(2);
                CaseTerminator::FallThrough
            } else if self.at_word("esac") {
                CaseTerminator::Break
            } else {
                return Err(self.error("expected ';;' or 'esac'"));
            };
            arms.push(CaseArm {
                patterns,
                body,
                terminator,
            });
        }

        Ok(CompoundCommand::Case { word, arms })
    }

    fn skip_cond_space(&mut self) {
        loop {
            self.skip_blanks();
            if self.peek() == Some('\n') {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn parse_cond_or(&mut self) -> Result<CondExpr> {
        let mut left = self.parse_cond_and()?;
        loop {
            self.skip_cond_space();
            if self.starts_with("||") {
                self.bump_n(2);
                let right = self.parse_cond_and()?;
                left = CondExpr::Or(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_cond_and(&mut self) -> Result<CondExpr> {
        let mut left = self.parse_cond_not()?;
        loop {
            self.skip_cond_space();
            if self.starts_with("&&") {
                self.bump_n(2);
                let right = self.parse_cond_not()?;
                left = CondExpr::And(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_cond_not(&mut self) -> Result<CondExpr> {
        self.skip_cond_space();
        if self.at_word("!") {
            self.bump();
            return Ok(CondExpr::Not(Box::new(self.parse_cond_not()?)));
        }
        self.parse_cond_primary()
    }

    fn cond_token(&self) -> String {
        let mut token = String::new();
        let mut i = self.pos;
        while let Some(&c) = self.src.get(i) {
            if c == ' ' || c == '\t' || c == '\n' {
                break;
            }
            token.push(c);
            i += 1;
        }
        token
    }

    fn parse_cond_primary(&mut self) -> Result<CondExpr> {
        self.skip_cond_space();
        if self.peek() == Some('(') {
            self.bump();
            let expr = self.parse_cond_or()?;
            self.skip_cond_space();
            self.expect_char(')')?;
            return Ok(expr);
        }
        if self.starts_with("]]") {
            return Err(self.error("expected expression"));
        }

        let first = self.cond_token();
        if COND_UNARY_OPS.contains(&first.as_str()) {
            let saved = (self.pos, self.heredoc_skip);
            self.bump_n(first.len());
            self.skip_cond_space();
            let next = self.cond_token();
            if !next.is_empty()
                && next != "]]"
                && !next.starts_with("&&")
                && !next.starts_with("||")
                && !next.starts_with(')')
            {
                let operand = self.parse_word()?;
                return Ok(CondExpr::Unary(first, operand));
            }
            (self.pos, self.heredoc_skip) = saved;
        }

        let left = self.parse_word()?;
        self.skip_cond_space();
        let op = self.cond_token();
        if COND_BINARY_OPS.contains(&op.as_str()) {
            self.bump_n(op.len());
            self.skip_cond_space();
            let right = if op == "=~" {
                self.parse_regex_word()?
            } else {
                self.parse_word()?
            };
            return Ok(CondExpr::Binary(left, op, right));
        }
        Ok(CondExpr::Word(left))
    }

    fn parse_regex_word(&mut self) -> Result<Word> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        let mut depth = 0usize;

        loop {
            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\n' if depth == 0 => break,
                ']' if depth == 0 && self.starts_with("]]") => break,
                '(' => {
                    depth += 1;
                    lit.push(c);
                    self.bump();
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    lit.push(c);
                    self.bump();
                }
                '\\' => {
                    self.bump();
                    lit.push('\\');
                    if let Some(next) = self.bump() {
                        lit.push(next);
                    }
                }
                '\'' | '"' | '$' | '`' => {
                    flush_literal(&mut lit, &mut parts);
                    self.read_special(&mut lit, &mut parts, WordMode::Unquoted)?;
                }
                _ => {
                    lit.push(c);
                    self.bump();
                }
            }
        }
        flush_literal(&mut lit, &mut parts);
        if parts.is_empty() {
            return Err(self.error("expected regular expression"));
        }
        Ok(Word { parts })
    }

    fn at_redirect(&self) -> bool {
        match self.peek() {
            Some('<') | Some('>') => true,
            Some('&') => self.peek_at(1) == Some('>'),
            Some(c) if c.is_ascii_digit() => {
                let mut i = self.pos;
                while self.src.get(i).is_some_and(|c| c.is_ascii_digit()) {
                    i += 1;
                }
                matches!(self.src.get(i), Some('<') | Some('>'))
            }
            _ => false,
        }
    }

    fn parse_redirect(&mut self) -> Result<Redirect> {
        let mut fd_text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                fd_text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let fd = if fd_text.is_empty() {
            None
        } else {
            Some(
                fd_text
                    .parse::<u32>()
                    .map_err(|_| self.error("invalid file descriptor"))?,
            )
        };

        let (kind, len, strip_tabs) = if self.starts_with("&>>") {
            (RedirectKind::AppendBoth, 3, false)
        } else if self.starts_with("&>") {
            (RedirectKind::OutputBoth, 2, false)
        } else if self.starts_with("<<<") {
            (RedirectKind::HereString, 3, false)
        } else if self.starts_with("<<-") {
            (RedirectKind::HereDoc, 3, true)
        } else if self.starts_with("<<") {
            (RedirectKind::HereDoc, 2, false)
        } else if self.starts_with("<&") {
            (RedirectKind::DupInput, 2, false)
        } else if self.starts_with("<>") {
            (RedirectKind::ReadWrite, 2, false)
        } else if self.starts_with("<") {
            (RedirectKind::Input, 1, false)
        } else if self.starts_with(">>") {
            (RedirectKind::Append, 2, false)
        } else if self.starts_with(">&") {
            (RedirectKind::DupOutput, 2, false)
        } else if self.starts_with(">|") {
            (RedirectKind::Output, 2, false)
        } else {
            (RedirectKind::Output, 1, false)
        };
        self.bump_n(len);
        self.skip_blanks();

        if kind == RedirectKind::HereDoc {
            let target = self.read_heredoc(strip_tabs)?;
            return Ok(Redirect { fd, kind, target });
        }

        if self.peek().is_none_or(is_meta) {
            return Err(self.error("expected redirection target"));
        }
        let target = self.parse_word()?;
        Ok(Redirect { fd, kind, target })
    }

    fn read_heredoc(&mut self, strip_tabs: bool) -> Result<Word> {
        let delim_word = self.parse_word()?;
        let quoted = delim_word
            .parts
            .iter()
            .any(|p| !matches!(p, WordPart::Literal(_)));
        let delimiter: String = delim_word
            .parts
            .iter()
            .map(|p| match p {
                WordPart::Literal(s) | WordPart::SingleQuoted(s) => s.clone(),
                WordPart::DoubleQuoted(inner) => inner
                    .iter()
                    .filter_map(|p| match p {
                        WordPart::Literal(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .collect(),
                _ => String::new(),
            })
            .collect();

        let (newline, start) = match self.heredoc_skip {
            Some((newline, resume)) => (newline, resume),
            None => match self.src[self.pos..].iter().position(|c| *c == '\n') {
                Some(offset) => (self.pos + offset, self.pos + offset + 1),
                None => return Err(self.error("here-document body missing")),
            },
        };

        let mut body = String::new();
        let mut i = start;
        let mut end = self.src.len();
        while i < self.src.len() {
            let line_end = self.src[i..]
                .iter()
                .position(|c| *c == '\n')
                .map(|o| i + o)
                .unwrap_or(self.src.len());
            let mut line: String = self.src[i..line_end].iter().collect();
            if strip_tabs {
                line = line.trim_start_matches('\t').to_string();
            }
            let next = (line_end + 1).min(self.src.len());
            if line == delimiter {
                end = next;
                break;
            }
            body.push_str(&line);
            body.push('\n');
            i = next;
        }
        self.heredoc_skip = Some((newline, end));

        if quoted {
            Ok(Word {
                parts: vec![WordPart::SingleQuoted(body)],
            })
        } else {
            parse_expandable_text(&body)
        }
    }

    fn parse_simple_command(&mut self) -> Result<Command> {
        let line = self.line();
        let mut cmd = SimpleCommand {
            assigns: Vec::new(),
            args: Vec::new(),
            redirects: Vec::new(),
            line,
        };

        loop {
            self.skip_blanks();
            match self.peek() {
                None | Some('\n') | Some(';') | Some('|') | Some(')') => break,
                Some('&') if self.peek_at(1) != Some('>') => break,
                Some('#') => break,
                Some('(') => return Err(self.error("unexpected '('")),
                _ => {}
            }

            if self.at_redirect() {
                cmd.redirects.push(self.parse_redirect()?);
                continue;
            }

            if cmd.args.is_empty() {
                if let Some(assign) = self.try_parse_assignment()? {
                    cmd.assigns.push(assign);
                    continue;
                }
            } else if is_declaration(&cmd.args[0]) {
                if let Some(assign) = self.try_parse_assignment()? {
                    cmd.args.push(Arg::Assign(assign));
                    continue;
                }
            }

            cmd.args.push(Arg::Word(self.parse_word()?));
        }

        if cmd.assigns.is_empty() && cmd.args.is_empty() && cmd.redirects.is_empty() {
            return Err(match self.peek() {
                Some(c) => self.error(format!("unexpected '{}'", c)),
                None => self.error("unexpected end of file"),
            });
        }
        Ok(Command::Simple(cmd))
    }

    fn try_parse_assignment(&mut self) -> Result<Option<Assignment>> {
        if !self.peek().is_some_and(is_name_start) {
            return Ok(None);
        }
        let mut i = self.pos;
        let mut name = String::new();
        while let Some(&c) = self.src.get(i) {
            if is_name_char(c) {
                name.push(c);
                i += 1;
            } else {
                break;
            }
        }

        let mut index = None;
        if self.src.get(i) == Some(&'[') {
            let mut depth = 0usize;
            let mut raw = String::new();
            i += 1;
            loop {
                match self.src.get(i) {
                    None | Some('\n') => return Ok(None),
                    Some('[') => {
                        depth += 1;
                        raw.push('[');
                    }
                    Some(']') if depth == 0 => break,
                    Some(']') => {
                        depth -= 1;
                        raw.push(']');
                    }
                    Some(&c) => raw.push(c),
                }
                i += 1;
            }
            i += 1;
            index = Some(raw);
        }

        let append = self.src.get(i) == Some(&'+');
        if append {
            i += 1;
        }
        if self.src.get(i) != Some(&'=') {
            return Ok(None);
        }
        i += 1;

        while self.pos < i {
            self.bump();
        }

        let value = if self.peek() == Some('(') && index.is_none() {
            self.bump();
            AssignValue::Array(self.parse_array_elems()?)
        } else if self.peek().is_none_or(is_meta) {
            AssignValue::Scalar(Word::default())
        } else {
            AssignValue::Scalar(self.parse_word()?)
        };

        Ok(Some(Assignment {
            name,
            index,
            append,
            value,
        }))
    }

    fn parse_array_elems(&mut self) -> Result<Vec<ArrayElem>> {
        let mut elems = Vec::new();
        loop {
            self.skip_linebreaks();
            match self.peek() {
                None => return Err(self.error("unterminated array")),
                Some(')') => {
                    self.bump();
                    return Ok(elems);
                }
                Some('[') => {
                    if let Some(key) = self.try_parse_elem_key() {
                        let value = if self.peek().is_none_or(is_meta) {
                            Word::default()
                        } else {
                            self.parse_word()?
                        };
                        elems.push(ArrayElem {
                            key: Some(key),
                            value,
                        });
                    } else {
                        elems.push(ArrayElem {
                            key: None,
                            value: self.parse_word()?,
                        });
                    }
                }
                _ => elems.push(ArrayElem {
                    key: None,
                    value: self.parse_word()?,
                }),
            }
        }
    }

    /// `[key]=` at the cursor; consumes it on success
    fn try_parse_elem_key(&mut self) -> Option<String> {
        let mut i = self.pos + 1;
        let mut raw = String::new();
        let mut depth = 0usize;
        loop {
            match self.src.get(i) {
                None | Some('\n') => return None,
                Some('[') => {
                    depth += 1;
                    raw.push('[');
                }
                Some(']') if depth == 0 => break,
                Some(']') => {
                    depth -= 1;
                    raw.push(']');
                }
                Some(&c) => raw.push(c),
            }
            i += 1;
        }
        if self.src.get(i + 1) != Some(&'=') {
            return None;
        }
        while self.pos < i + 2 {
            self.bump();
        }
        Some(raw)
    }

    fn parse_word(&mut self) -> Result<Word> {
        let parts = self.read_parts(&is_meta, WordMode::Unquoted)?;
        if parts.is_empty() {
            return Err(match self.peek() {
                Some(c) => self.error(format!("unexpected '{}'", c)),
                None => self.error("unexpected end of file"),
            });
        }
        Ok(Word { parts })
    }

    /// Read word parts until `stop` matches an unquoted character
    fn read_parts(&mut self, stop: &dyn Fn(char) -> bool, mode: WordMode) -> Result<Vec<WordPart>> {
        let mut parts = Vec::new();
        let mut lit = String::new();

        loop {
            let Some(c) = self.peek() else { break };
            if stop(c) {
                break;
            }
            match c {
                '\\' => {
                    self.bump();
                    match self.peek() {
                        Some('\n') => {
                            self.bump();
                        }
                        Some(next) if mode == WordMode::Unquoted => {
                            self.bump();
                            flush_literal(&mut lit, &mut parts);
                            parts.push(WordPart::SingleQuoted(next.to_string()));
                        }
                        Some(next) if matches!(next, '$' | '`' | '\\') || (next == '"' && mode == WordMode::Double) => {
                            self.bump();
                            lit.push(next);
                        }
                        Some(_) | None => lit.push('\\'),
                    }
                }
                '\'' | '"' if mode != WordMode::Unquoted => {
                    lit.push(c);
                    self.bump();
                }
                '\'' | '"' | '$' | '`' => {
                    flush_literal(&mut lit, &mut parts);
                    self.read_special(&mut lit, &mut parts, mode)?;
                }
                _ => {
                    lit.push(c);
                    self.bump();
                }
            }
        }

        flush_literal(&mut lit, &mut parts);
        Ok(parts)
    }

    /// Quote, expansion or substitution at the cursor
    fn read_special(&mut self, lit: &mut String, parts: &mut Vec<WordPart>, mode: WordMode) -> Result<()> {
        match self.peek() {
            Some('\'') => {
                self.bump();
                let mut text = String::new();
                loop {
                    match self.bump() {
                        Some('\'') => break,
                        Some(c) => text.push(c),
                        None => return Err(self.error("unterminated single quote")),
                    }
                }
                parts.push(WordPart::SingleQuoted(text));
            }
            Some('"') => {
                self.bump();
                let inner = self.read_parts(&|c| c == '"', WordMode::Double)?;
                if self.bump() != Some('"') {
                    return Err(self.error("unterminated double quote"));
                }
                parts.push(WordPart::DoubleQuoted(inner));
            }
            Some('`') => {
                self.bump();
                parts.push(self.read_backquote()?);
            }
            Some('$') => match self.parse_dollar(mode)? {
                Some(part) => parts.push(part),
                None => lit.push('$'),
            },
            _ => {}
        }
        Ok(())
    }

    fn read_backquote(&mut self) -> Result<WordPart> {
        let start = self.pos;
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated backquote")),
                Some('`') => break,
                Some('\\') => match self.bump() {
                    Some(c @ ('$' | '`' | '\\')) => text.push(c),
                    Some(c) => {
                        text.push('\\');
                        text.push(c);
                    }
                    None => text.push('\\'),
                },
                Some(c) => text.push(c),
            }
        }
        let list = parse(&text, self.path).map_err(|e| self.relocate(e, start))?;
        Ok(WordPart::CommandSubst(Arc::new(list)))
    }

    /// Shift a nested parser's error to this parser's coordinates
    fn relocate(&self, err: Error, base: usize) -> Error {
        match err {
            Error::RecipeSyntax {
                path,
                line,
                column,
                message,
            } => {
                let (base_line, base_col) = self.location(base);
                Error::RecipeSyntax {
                    path,
                    line: base_line + line - 1,
                    column: if line == 1 { base_col + column - 1 } else { column },
                    message,
                }
            }
            other => other,
        }
    }

    fn parse_dollar(&mut self, mode: WordMode) -> Result<Option<WordPart>> {
        self.bump();
        match self.peek() {
            Some('(') if self.peek_at(1) == Some('(') => {
                self.bump_n(2);
                Ok(Some(WordPart::Arith(self.read_arith_raw()?)))
            }
            Some('(') => {
                self.bump();
                let list = self.parse_list(&[])?;
                self.skip_linebreaks();
                self.expect_char(')')?;
                Ok(Some(WordPart::CommandSubst(Arc::new(list))))
            }
            Some('{') => {
                self.bump();
                Ok(Some(WordPart::Param(Box::new(self.parse_brace_param()?))))
            }
            Some('\'') if mode == WordMode::Unquoted => {
                self.bump();
                Ok(Some(WordPart::SingleQuoted(self.read_ansi_c()?)))
            }
            Some('"') if mode == WordMode::Unquoted => {
                self.bump();
                let inner = self.read_parts(&|c| c == '"', WordMode::Double)?;
                if self.bump() != Some('"') {
                    return Err(self.error("unterminated double quote"));
                }
                Ok(Some(WordPart::DoubleQuoted(inner)))
            }
            Some(c) if is_name_start(c) => {
                let mut name = String::new();
                while let Some(c) = self.peek() {
                    if is_name_char(c) {
                        name.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                Ok(Some(plain_param(name)))
            }
            Some(c) if c.is_ascii_digit() || matches!(c, '@' | '*' | '#' | '?' | '$' | '!' | '-') => {
                self.bump();
                Ok(Some(plain_param(c.to_string())))
            }
            _ => Ok(None),
        }
    }

    fn read_ansi_c(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated $'...' string")),
                Some('\'') => return Ok(out),
                Some('\\') => {
                    let Some(c) = self.bump() else {
                        return Err(self.error("unterminated $'...' string"));
                    };
                    match c {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'a' => out.push('\x07'),
                        'b' => out.push('\x08'),
                        'e' | 'E' => out.push('\x1b'),
                        'f' => out.push('\x0c'),
                        'v' => out.push('\x0b'),
                        '0'..='7' => {
                            let mut value = c.to_digit(8).unwrap_or(0);
                            for _ in 0..2 {
                                match self.peek().and_then(|d| d.to_digit(8)) {
                                    Some(d) => {
                                        value = value * 8 + d;
                                        self.bump();
                                    }
                                    None => break,
                                }
                            }
                            out.extend(char::from_u32(value));
                        }
                        'x' | 'u' | 'U' => {
                            let max = match c {
                                'x' => 2,
                                'u' => 4,
                                _ => 8,
                            };
                            let mut value = 0u32;
                            let mut digits = 0;
                            while digits < max {
                                match self.peek().and_then(|d| d.to_digit(16)) {
                                    Some(d) => {
                                        value = value * 16 + d;
                                        self.bump();
                                        digits += 1;
                                    }
                                    None => break,
                                }
                            }
                            if digits == 0 {
                                out.push('\\');
                                out.push(c);
                            } else {
                                out.extend(char::from_u32(value));
                            }
                        }
                        '\\' | '\'' | '"' | '?' => out.push(c),
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn read_arith_raw(&mut self) -> Result<String> {
        let mut depth = 0usize;
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated arithmetic expression")),
                Some('(') => {
                    depth += 1;
                    text.push('(');
                }
                Some(')') if depth == 0 => {
                    if self.peek() == Some(')') {
                        self.bump();
                        return Ok(text);
                    }
                    return Err(self.error("expected '))'"));
                }
                Some(')') => {
                    depth -= 1;
                    text.push(')');
                }
                Some(c) => text.push(c),
            }
        }
    }

    fn read_param_name(&mut self) -> String {
        let mut name = String::new();
        match self.peek() {
            Some(c) if is_name_start(c) => {
                while let Some(c) = self.peek() {
                    if is_name_char(c) {
                        name.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
            Some(c) if c.is_ascii_digit() => {
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        name.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
            Some(c) if matches!(c, '@' | '*' | '#' | '?' | '$' | '!' | '-') => {
                name.push(c);
                self.bump();
            }
            _ => {}
        }
        name
    }

    fn read_subscript(&mut self) -> Result<Option<String>> {
        if self.peek() != Some('[') {
            return Ok(None);
        }
        self.bump();
        let mut depth = 0usize;
        let mut raw = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated subscript")),
                Some('[') => {
                    depth += 1;
                    raw.push('[');
                }
                Some(']') if depth == 0 => return Ok(Some(raw)),
                Some(']') => {
                    depth -= 1;
                    raw.push(']');
                }
                Some(c) => raw.push(c),
            }
        }
    }

    fn parse_brace_param(&mut self) -> Result<ParamExpr> {
        // ${#name} and ${#arr[@]}, but not ${#} or ${#-default}
        if self.peek() == Some('#')
            && self
                .peek_at(1)
                .is_some_and(|c| c != '}' && (is_name_char(c) || matches!(c, '@' | '*')))
        {
            self.bump();
            let name = self.read_param_name();
            let index = self.read_subscript()?;
            self.expect_char('}')?;
            return Ok(ParamExpr {
                name,
                index,
                op: ParamOp::Length,
            });
        }

        if self.peek() == Some('!') && self.peek_at(1).is_some_and(is_name_start) {
            self.bump();
            let name = self.read_param_name();
            let index = self.read_subscript()?;
            self.expect_char('}')?;
            let op = match index.as_deref() {
                Some("@") | Some("*") => ParamOp::Keys,
                _ => ParamOp::Indirect,
            };
            return Ok(ParamExpr { name, index, op });
        }

        let name = self.read_param_name();
        if name.is_empty() {
            return Err(self.error("bad substitution"));
        }
        let index = self.read_subscript()?;

        let op = match self.peek() {
            Some('}') => ParamOp::Plain,
            Some(':') if matches!(self.peek_at(1), Some('-' | '=' | '+' | '?')) => {
                self.bump();
                self.parse_default_op(true)?
            }
            Some(':') => {
                self.bump();
                let offset = self.read_raw_until(&[':', '}']);
                let length = if self.peek() == Some(':') {
                    self.bump();
                    Some(self.read_raw_until(&['}']))
                } else {
                    None
                };
                ParamOp::Substring { offset, length }
            }
            Some('-' | '=' | '+' | '?') => self.parse_default_op(false)?,
            Some('#') => {
                self.bump();
                let longest = self.peek() == Some('#');
                if longest {
                    self.bump();
                }
                let pattern = self.read_param_word(&|c| c == '}')?;
                ParamOp::RemovePrefix { longest, pattern }
            }
            Some('%') => {
                self.bump();
                let longest = self.peek() == Some('%');
                if longest {
                    self.bump();
                }
                let pattern = self.read_param_word(&|c| c == '}')?;
                ParamOp::RemoveSuffix { longest, pattern }
            }
            Some('/') => {
                self.bump();
                let (all, anchor) = match self.peek() {
                    Some('/') => {
                        self.bump();
                        (true, None)
                    }
                    Some('#') => {
                        self.bump();
                        (false, Some(Anchor::Start))
                    }
                    Some('%') => {
                        self.bump();
                        (false, Some(Anchor::End))
                    }
                    _ => (false, None),
                };
                let pattern = self.read_param_word(&|c| c == '/' || c == '}')?;
                let replacement = if self.peek() == Some('/') {
                    self.bump();
                    self.read_param_word(&|c| c == '}')?
                } else {
                    Word::default()
                };
                ParamOp::Replace {
                    all,
                    anchor,
                    pattern,
                    replacement,
                }
            }
            Some(c @ ('^' | ',')) => {
                self.bump();
                let all = self.peek() == Some(c);
                if all {
                    self.bump();
                }
                ParamOp::Case {
                    upper: c == '^',
                    all,
                }
            }
            _ => return Err(self.error("bad substitution")),
        };

        self.expect_char('}')?;
        Ok(ParamExpr { name, index, op })
    }

    fn parse_default_op(&mut self, colon: bool) -> Result<ParamOp> {
        let c = self.bump();
        let word = self.read_param_word(&|c| c == '}')?;
        Ok(match c {
            Some('-') => ParamOp::Default { colon, word },
            Some('=') => ParamOp::Assign { colon, word },
            Some('+') => ParamOp::Alternative { colon, word },
            _ => ParamOp::Error { colon, word },
        })
    }

    fn read_param_word(&mut self, stop: &dyn Fn(char) -> bool) -> Result<Word> {
        let parts = self.read_parts(stop, WordMode::Unquoted)?;
        Ok(Word { parts })
    }

    fn read_raw_until(&mut self, stops: &[char]) -> String {
        let mut depth = 0usize;
        let mut raw = String::new();
        while let Some(c) = self.peek() {
            if depth == 0 && stops.contains(&c) {
                break;
            }
            match c {
                '(' | '{' | '[' => depth += 1,
                ')' | '}' | ']' => depth = depth.saturating_sub(1),
                _ => {}
            }
            raw.push(c);
            self.bump();
        }
        raw
    }
}

fn plain_param(name: String) -> WordPart {
    WordPart::Param(Box::new(ParamExpr {
        name,
        index: None,
        op: ParamOp::Plain,
    }))
}

fn flush_literal(lit: &mut String, parts: &mut Vec<WordPart>) {
    if !lit.is_empty() {
        parts.push(WordPart::Literal(std::mem::take(lit)));
    }
}

fn is_declaration(arg: &Arg) -> bool {
    match arg {
        Arg::Word(w) => w
            .as_literal()
            .is_some_and(|s| DECLARATION_BUILTINS.contains(&s)),
        Arg::Assign(_) => false,
    }
}

/// Split on `sep` outside parentheses
fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut parts = vec![String::new()];
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if c == sep && depth == 0 {
            parts.push(String::new());
        } else if let Some(last) = parts.last_mut() {
            last.push(c);
        }
    }
    parts
}
