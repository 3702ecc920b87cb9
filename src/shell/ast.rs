// src/shell/ast.rs

//! Syntax tree for the recipe shell language
//!
//! Produced once by the parser and shared (read-only) by every pass.
//! Function bodies are reference-counted so defining a function in the
//! interpreter does not copy the tree.

use std::sync::Arc;

/// A sequence of commands separated by `;`, `&` or newlines
pub type List = Vec<ListItem>;

#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub and_or: AndOr,
    /// Terminated by `&`; run synchronously all the same
    pub background: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AndOrOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AndOr {
    pub first: Pipeline,
    pub rest: Vec<(AndOrOp, Pipeline)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub negated: bool,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Simple(SimpleCommand),
    Compound(CompoundCommand, Vec<Redirect>),
    FunctionDef(Arc<FunctionDef>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub body: Command,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleCommand {
    pub assigns: Vec<Assignment>,
    pub args: Vec<Arg>,
    pub redirects: Vec<Redirect>,
    pub line: usize,
}

/// A command argument
///
/// Declaration builtins (`declare`, `local`, `export`, ...) take
/// assignment arguments that keep their array syntax.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Word(Word),
    Assign(Assignment),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    /// Raw subscript text of `name[sub]=...`
    pub index: Option<String>,
    pub append: bool,
    pub value: AssignValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignValue {
    Scalar(Word),
    Array(Vec<ArrayElem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayElem {
    /// Raw subscript text of `[key]=value`
    pub key: Option<String>,
    pub value: Word,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompoundCommand {
    Brace(List),
    Subshell(List),
    If {
        branches: Vec<(List, List)>,
        else_body: Option<List>,
    },
    For {
        var: String,
        words: Option<Vec<Word>>,
        body: List,
    },
    ArithFor {
        init: String,
        cond: String,
        step: String,
        body: List,
    },
    While {
        cond: List,
        body: List,
        until: bool,
    },
    Case {
        word: Word,
        arms: Vec<CaseArm>,
    },
    Arith(String),
    Cond(CondExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseTerminator {
    /// `;;`
    Break,
    /// `;&`
    FallThrough,
    /// `;;&`
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    pub patterns: Vec<Word>,
    pub body: List,
    pub terminator: CaseTerminator,
}

/// `[[ ... ]]` expression
#[derive(Debug, Clone, PartialEq)]
pub enum CondExpr {
    Unary(String, Word),
    Binary(Word, String, Word),
    Word(Word),
    Not(Box<CondExpr>),
    And(Box<CondExpr>, Box<CondExpr>),
    Or(Box<CondExpr>, Box<CondExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `<`
    Input,
    /// `>` and `>|`
    Output,
    /// `>>`
    Append,
    /// `<>`
    ReadWrite,
    /// `>&`
    DupOutput,
    /// `<&`
    DupInput,
    /// `&>`
    OutputBoth,
    /// `&>>`
    AppendBoth,
    /// `<<` and `<<-`
    HereDoc,
    /// `<<<`
    HereString,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    pub fd: Option<u32>,
    pub kind: RedirectKind,
    /// Target word, here-string, or here-document body
    pub target: Word,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

impl Word {
    pub fn literal(s: impl Into<String>) -> Self {
        Word {
            parts: vec![WordPart::Literal(s.into())],
        }
    }

    /// The text if the word is a single unquoted literal
    pub fn as_literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [WordPart::Literal(s)] => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    /// Unquoted text; subject to pathname expansion
    Literal(String),
    /// `'...'` or `$'...'`, already unescaped
    SingleQuoted(String),
    DoubleQuoted(Vec<WordPart>),
    Param(Box<ParamExpr>),
    CommandSubst(Arc<List>),
    /// Raw text between `$((` and `))`
    Arith(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamExpr {
    pub name: String,
    /// Raw subscript text, `@` and `*` included
    pub index: Option<String>,
    pub op: ParamOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamOp {
    Plain,
    Length,
    /// `${!name}`
    Indirect,
    /// `${!arr[@]}`
    Keys,
    Default { colon: bool, word: Word },
    Assign { colon: bool, word: Word },
    Alternative { colon: bool, word: Word },
    Error { colon: bool, word: Word },
    RemovePrefix { longest: bool, pattern: Word },
    RemoveSuffix { longest: bool, pattern: Word },
    Replace {
        all: bool,
        anchor: Option<Anchor>,
        pattern: Word,
        replacement: Word,
    },
    Substring { offset: String, length: Option<String> },
    Case { upper: bool, all: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    End,
}
