// src/shell/interp.rs

//! Restricted in-process interpreter
//!
//! Runs a parsed recipe to completion without side effects outside the
//! interpreter: external commands are skipped and report success, output
//! redirections are discarded, and reads go through the [`Sandbox`].
//! The final variable scope and function table are what the decoder reads.

use super::ast::*;
use super::sandbox::Sandbox;
use super::vars::{Attrs, Value, Var, VarStore};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

const MAX_CALL_DEPTH: usize = 200;
const MAX_STEPS: u64 = 10_000_000;
const MAX_BUFFER: usize = 16 * 1024 * 1024;

/// Non-local control flow, and fatal errors, unwinding through `?`
#[derive(Debug)]
pub(crate) enum Ctl {
    Break(usize),
    Continue(usize),
    Return(i32),
    Exit(i32),
    Fatal(Error),
}

impl From<Error> for Ctl {
    fn from(err: Error) -> Self {
        Ctl::Fatal(err)
    }
}

/// Exit status or unwinding control flow
pub(crate) type Exec = std::result::Result<i32, Ctl>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ShellOptions {
    pub errexit: bool,
    pub nounset: bool,
    pub noglob: bool,
    pub pipefail: bool,
    pub globstar: bool,
    pub nullglob: bool,
    pub nocasematch: bool,
}

/// Where a file descriptor's writes go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sink {
    Stdout,
    Stderr,
    Null,
}

#[derive(Debug, Clone)]
pub(crate) struct Input {
    pub data: Vec<u8>,
    pub pos: usize,
}

impl Input {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

/// Which binding an assignment writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    Normal,
    Local,
    Global,
}

/// Attributes requested by a declaration builtin
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DeclSpec {
    pub assoc: bool,
    pub indexed: bool,
    pub attrs: Attrs,
}

/// Argument to a builtin: an expanded field or a declaration assignment
pub(crate) enum DeclArg<'a> {
    Field(String),
    Assign(&'a Assignment),
}

pub struct Shell {
    pub(crate) vars: VarStore,
    pub(crate) functions: HashMap<String, Arc<FunctionDef>>,
    pub(crate) positional: Vec<String>,
    pub(crate) script_name: String,
    pub(crate) last_status: i32,
    pub(crate) opts: ShellOptions,
    pub(crate) sandbox: Sandbox,
    pub(crate) cwd: PathBuf,
    pub(crate) out: Sink,
    pub(crate) err: Sink,
    pub(crate) stdin: Option<Input>,
    pub(crate) loop_depth: usize,
    pub(crate) source_depth: usize,
    pub(crate) arith_depth: usize,
    pub(crate) last_subst_status: Option<i32>,
    captures: Vec<Vec<u8>>,
    stderr_buf: Vec<u8>,
    cond_depth: usize,
    call_depth: usize,
    steps: u64,
    cancel: Option<CancelToken>,
}

impl Shell {
    pub fn new(sandbox: Sandbox) -> Self {
        let cwd = sandbox.root().to_path_buf();
        let mut vars = VarStore::default();
        vars.set_scalar("IFS", " \t\n");
        Self {
            vars,
            functions: HashMap::new(),
            positional: Vec::new(),
            script_name: "alr.sh".to_string(),
            last_status: 0,
            opts: ShellOptions::default(),
            sandbox,
            cwd,
            out: Sink::Stdout,
            err: Sink::Stderr,
            stdin: None,
            loop_depth: 0,
            source_depth: 0,
            arith_depth: 0,
            last_subst_status: None,
            captures: vec![Vec::new()],
            stderr_buf: Vec::new(),
            cond_depth: 0,
            call_depth: 0,
            steps: 0,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    /// Define an exported scalar variable
    pub fn set_env(&mut self, name: &str, value: impl Into<String>) {
        let var = self.vars.global_entry(name);
        var.value = Some(Value::Scalar(value.into()));
        var.attrs.exported = true;
    }

    pub fn vars(&self) -> &VarStore {
        &self.vars
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.captures[0]).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr_buf).into_owned()
    }

    /// Execute a script; returns its exit status
    pub fn run(&mut self, list: &List) -> Result<i32> {
        match self.run_list(list) {
            Ok(status) => Ok(status),
            Err(Ctl::Exit(status)) | Err(Ctl::Return(status)) => Ok(status),
            Err(Ctl::Break(_)) | Err(Ctl::Continue(_)) => Ok(self.last_status),
            Err(Ctl::Fatal(err)) => Err(err),
        }
    }

    fn step(&mut self) -> std::result::Result<(), Ctl> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(Ctl::Fatal(Error::RestrictedViolation(
                "execution step limit exceeded".to_string(),
            )));
        }
        if self.steps % 1024 == 0 {
            if let Some(token) = &self.cancel {
                token.check()?;
            }
        }
        Ok(())
    }

    pub(crate) fn write(&mut self, sink: Sink, data: &[u8]) {
        let buf = match sink {
            Sink::Stdout => match self.captures.last_mut() {
                Some(buf) => buf,
                None => return,
            },
            Sink::Stderr => &mut self.stderr_buf,
            Sink::Null => return,
        };
        if buf.len() + data.len() <= MAX_BUFFER {
            buf.extend_from_slice(data);
        }
    }

    pub(crate) fn print(&mut self, text: &str) {
        self.write(self.out, text.as_bytes());
    }

    pub(crate) fn eprint(&mut self, text: &str) {
        let line = format!("{}: {}\n", self.script_name, text);
        self.write(self.err, line.as_bytes());
    }

    fn errexit_check(&self, status: i32) -> Exec {
        if status != 0 && self.opts.errexit && self.cond_depth == 0 {
            Err(Ctl::Exit(status))
        } else {
            Ok(status)
        }
    }

    pub(crate) fn in_condition<F>(&mut self, f: F) -> Exec
    where
        F: FnOnce(&mut Self) -> Exec,
    {
        self.cond_depth += 1;
        let result = f(self);
        self.cond_depth -= 1;
        result
    }

    /// Run `f` with a copy of the shell state that is discarded afterwards
    pub(crate) fn subshell<F>(&mut self, f: F) -> Exec
    where
        F: FnOnce(&mut Self) -> Exec,
    {
        let vars = self.vars.clone();
        let functions = self.functions.clone();
        let positional = self.positional.clone();
        let opts = self.opts;
        let cwd = self.cwd.clone();
        let loop_depth = std::mem::replace(&mut self.loop_depth, 0);

        let result = f(self);

        self.vars = vars;
        self.functions = functions;
        self.positional = positional;
        self.opts = opts;
        self.cwd = cwd;
        self.loop_depth = loop_depth;

        match result {
            Err(Ctl::Exit(status)) | Err(Ctl::Return(status)) => Ok(status),
            Err(Ctl::Break(_)) | Err(Ctl::Continue(_)) => Ok(0),
            other => other,
        }
    }

    /// Capture the stdout of `list` run in a subshell
    pub(crate) fn command_substitution(&mut self, list: &List) -> std::result::Result<String, Ctl> {
        self.captures.push(Vec::new());
        let saved_out = std::mem::replace(&mut self.out, Sink::Stdout);
        let result = self.subshell(|sh| sh.run_list(list));
        self.out = saved_out;
        let captured = self.captures.pop().unwrap_or_default();
        let status = result?;
        self.last_subst_status = Some(status);
        self.last_status = status;

        let mut text = String::from_utf8_lossy(&captured).into_owned();
        while text.ends_with('\n') {
            text.pop();
        }
        Ok(text)
    }

    pub(crate) fn run_list(&mut self, list: &List) -> Exec {
        let mut status = 0;
        for item in list {
            status = self.run_and_or(&item.and_or)?;
        }
        Ok(status)
    }

    fn run_and_or(&mut self, and_or: &AndOr) -> Exec {
        let total = and_or.rest.len();
        let mut status = if total > 0 {
            self.in_condition(|sh| sh.run_pipeline(&and_or.first))?
        } else {
            self.run_pipeline(&and_or.first)?
        };
        let mut last_negated = and_or.first.negated;
        let mut last_index = 0;

        for (i, (op, pipeline)) in and_or.rest.iter().enumerate() {
            let run = match op {
                AndOrOp::And => status == 0,
                AndOrOp::Or => status != 0,
            };
            if !run {
                continue;
            }
            status = if i + 1 < total {
                self.in_condition(|sh| sh.run_pipeline(pipeline))?
            } else {
                self.run_pipeline(pipeline)?
            };
            last_negated = pipeline.negated;
            last_index = i + 1;
        }

        self.last_status = status;
        if last_index == total && !last_negated {
            self.errexit_check(status)
        } else {
            Ok(status)
        }
    }

    fn run_pipeline(&mut self, pipeline: &Pipeline) -> Exec {
        let status = if pipeline.commands.len() == 1 {
            if pipeline.negated {
                self.in_condition(|sh| sh.run_command(&pipeline.commands[0]))?
            } else {
                self.run_command(&pipeline.commands[0])?
            }
        } else {
            self.run_multi_pipeline(&pipeline.commands)?
        };

        let status = if pipeline.negated {
            (status == 0) as i32
        } else {
            status
        };
        self.last_status = status;
        Ok(status)
    }

    /// Stages run one after another, each in a subshell, with the previous
    /// stage's output as input
    fn run_multi_pipeline(&mut self, commands: &[Command]) -> Exec {
        let mut input: Option<Vec<u8>> = None;
        let mut statuses = Vec::with_capacity(commands.len());

        for (i, cmd) in commands.iter().enumerate() {
            let last = i + 1 == commands.len();
            let saved_stdin = self.stdin.take();
            if i > 0 {
                self.stdin = Some(Input::new(input.take().unwrap_or_default()));
            } else {
                self.stdin = saved_stdin.clone();
            }

            let result = if last {
                self.subshell(|sh| sh.run_command(cmd))
            } else {
                self.captures.push(Vec::new());
                let saved_out = std::mem::replace(&mut self.out, Sink::Stdout);
                let result = self.subshell(|sh| sh.run_command(cmd));
                self.out = saved_out;
                input = self.captures.pop();
                result
            };
            self.stdin = saved_stdin;
            statuses.push(result?);
        }

        let status = if self.opts.pipefail {
            statuses.iter().rev().find(|s| **s != 0).copied().unwrap_or(0)
        } else {
            statuses.last().copied().unwrap_or(0)
        };
        Ok(status)
    }

    pub(crate) fn run_command(&mut self, cmd: &Command) -> Exec {
        self.step()?;
        match cmd {
            Command::Simple(simple) => self.run_simple(simple),
            Command::Compound(compound, redirects) => {
                self.with_redirects(redirects, |sh| sh.run_compound(compound))
            }
            Command::FunctionDef(def) => {
                self.functions.insert(def.name.clone(), Arc::clone(def));
                Ok(0)
            }
        }
    }

    pub(crate) fn with_redirects<F>(&mut self, redirects: &[Redirect], f: F) -> Exec
    where
        F: FnOnce(&mut Self) -> Exec,
    {
        if redirects.is_empty() {
            return f(self);
        }
        let saved = (self.out, self.err, self.stdin.clone());
        let mut status = 0;
        for redirect in redirects {
            if let Err(message) = self.apply_redirect(redirect)? {
                self.eprint(&message);
                status = 1;
                break;
            }
        }
        let result = if status == 0 { f(self) } else { Ok(status) };
        (self.out, self.err, self.stdin) = saved;
        result
    }

    fn set_sink(&mut self, fd: u32, sink: Sink) {
        match fd {
            1 => self.out = sink,
            2 => self.err = sink,
            _ => {}
        }
    }

    /// Outer error unwinds; inner error is a failed redirection
    fn apply_redirect(
        &mut self,
        redirect: &Redirect,
    ) -> std::result::Result<std::result::Result<(), String>, Ctl> {
        use RedirectKind::*;

        let default_fd = match redirect.kind {
            Input | ReadWrite | DupInput | HereDoc | HereString => 0,
            _ => 1,
        };
        let fd = redirect.fd.unwrap_or(default_fd);

        match redirect.kind {
            Input | ReadWrite => {
                let path = self.expand_word_string(&redirect.target)?;
                match self.sandbox.read(&self.cwd, &path) {
                    Ok(data) => {
                        if fd == 0 {
                            self.stdin = Some(self::Input::new(data));
                        }
                    }
                    Err(e) => return Ok(Err(format!("{}: {}", path, e))),
                }
            }
            Output | Append => {
                let path = self.expand_word_string(&redirect.target)?;
                let sink = match path.as_str() {
                    "/dev/stdout" => self.out,
                    "/dev/stderr" => self.err,
                    _ => Sink::Null,
                };
                self.set_sink(fd, sink);
            }
            OutputBoth | AppendBoth => {
                self.expand_word_string(&redirect.target)?;
                self.out = Sink::Null;
                self.err = Sink::Null;
            }
            DupOutput => {
                let target = self.expand_word_string(&redirect.target)?;
                let sink = match target.as_str() {
                    "1" => self.out,
                    "2" => self.err,
                    _ => Sink::Null,
                };
                self.set_sink(fd, sink);
            }
            DupInput => {}
            HereDoc | HereString => {
                let mut text = self.expand_word_string(&redirect.target)?;
                if redirect.kind == HereString {
                    text.push('\n');
                }
                if fd == 0 {
                    self.stdin = Some(self::Input::new(text.into_bytes()));
                }
            }
        }
        Ok(Ok(()))
    }

    fn run_simple(&mut self, cmd: &SimpleCommand) -> Exec {
        self.last_subst_status = None;
        let mut fields: Vec<String> = Vec::new();
        let mut args: Vec<DeclArg<'_>> = Vec::new();
        for arg in &cmd.args {
            match arg {
                Arg::Word(word) => {
                    for field in self.expand_word_fields(word)? {
                        fields.push(field.clone());
                        args.push(DeclArg::Field(field));
                    }
                }
                Arg::Assign(assign) => args.push(DeclArg::Assign(assign)),
            }
        }

        if args.is_empty() {
            return self.with_redirects(&cmd.redirects, |sh| {
                let mut status = 0;
                for assign in &cmd.assigns {
                    status = sh.assign(assign, Scope::Normal, &DeclSpec::default())?;
                    if status != 0 {
                        return Ok(status);
                    }
                }
                Ok(sh.last_subst_status.unwrap_or(status))
            });
        }

        let Some(DeclArg::Field(name)) = args.first() else {
            return Ok(0);
        };
        let name = name.clone();

        // Prefix assignments last only for the duration of the command
        let mut saved: Vec<(String, Option<Var>)> = Vec::new();
        for assign in &cmd.assigns {
            saved.push((assign.name.clone(), self.vars.get(&assign.name).cloned()));
            self.assign(assign, Scope::Normal, &DeclSpec::default())?;
            self.vars.entry(&assign.name).attrs.exported = true;
        }

        let result = self.with_redirects(&cmd.redirects, |sh| sh.dispatch(&name, &fields, &args));

        for (var_name, previous) in saved.into_iter().rev() {
            match previous {
                Some(var) => *self.vars.entry(&var_name) = var,
                None => {
                    self.vars.unset(&var_name);
                }
            }
        }
        result
    }

    fn dispatch(&mut self, name: &str, fields: &[String], args: &[DeclArg<'_>]) -> Exec {
        if let Some(def) = self.functions.get(name).cloned() {
            return self.call_function(&def, fields[1..].to_vec());
        }
        if let Some(result) = self.run_builtin(name, &fields[1..], &args[1..]) {
            return result;
        }
        debug!(command = %name, "skipping external command in restricted pass");
        Ok(0)
    }

    pub(crate) fn call_function(&mut self, def: &FunctionDef, args: Vec<String>) -> Exec {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(Ctl::Fatal(Error::ExecFailed(format!(
                "{}: maximum function nesting level exceeded",
                def.name
            ))));
        }
        let positional = std::mem::replace(&mut self.positional, args);
        let loop_depth = std::mem::replace(&mut self.loop_depth, 0);
        self.vars.push_frame();
        self.call_depth += 1;

        let result = self.run_command(&def.body);

        self.call_depth -= 1;
        self.vars.pop_frame();
        self.loop_depth = loop_depth;
        self.positional = positional;

        match result {
            Err(Ctl::Return(status)) => Ok(status),
            other => other,
        }
    }

    pub(crate) fn in_function(&self) -> bool {
        self.call_depth > 0
    }

    fn run_compound(&mut self, compound: &CompoundCommand) -> Exec {
        match compound {
            CompoundCommand::Brace(list) => self.run_list(list),
            CompoundCommand::Subshell(list) => self.subshell(|sh| sh.run_list(list)),
            CompoundCommand::If {
                branches,
                else_body,
            } => {
                for (cond, body) in branches {
                    if self.in_condition(|sh| sh.run_list(cond))? == 0 {
                        return self.run_list(body);
                    }
                }
                match else_body {
                    Some(body) => self.run_list(body),
                    None => Ok(0),
                }
            }
            CompoundCommand::For { var, words, body } => {
                let items = match words {
                    Some(words) => {
                        let mut items = Vec::new();
                        for word in words {
                            items.extend(self.expand_word_fields(word)?);
                        }
                        items
                    }
                    None => self.positional.clone(),
                };
                self.loop_depth += 1;
                let mut status = 0;
                let mut result = Ok(0);
                for item in items {
                    self.vars.set_scalar(var, item);
                    match self.loop_body(body) {
                        LoopStep::Next(s) => status = s,
                        LoopStep::Stop(s) => {
                            status = s;
                            break;
                        }
                        LoopStep::Unwind(ctl) => {
                            result = Err(ctl);
                            break;
                        }
                    }
                }
                self.loop_depth -= 1;
                result.map(|_| status)
            }
            CompoundCommand::ArithFor {
                init,
                cond,
                step,
                body,
            } => {
                self.eval_arith(init)?;
                self.loop_depth += 1;
                let mut status = 0;
                let mut result = Ok(0);
                loop {
                    if !cond.trim().is_empty() {
                        match self.eval_arith(cond) {
                            Ok(0) => break,
                            Ok(_) => {}
                            Err(ctl) => {
                                result = Err(ctl);
                                break;
                            }
                        }
                    }
                    match self.loop_body(body) {
                        LoopStep::Next(s) => status = s,
                        LoopStep::Stop(s) => {
                            status = s;
                            break;
                        }
                        LoopStep::Unwind(ctl) => {
                            result = Err(ctl);
                            break;
                        }
                    }
                    if let Err(ctl) = self.eval_arith(step) {
                        result = Err(ctl);
                        break;
                    }
                }
                self.loop_depth -= 1;
                result.map(|_| status)
            }
            CompoundCommand::While { cond, body, until } => {
                self.loop_depth += 1;
                let mut status = 0;
                let mut result = Ok(0);
                loop {
                    let cond_status = match self.in_condition(|sh| sh.run_list(cond)) {
                        Ok(s) => s,
                        Err(ctl) => {
                            result = Err(ctl);
                            break;
                        }
                    };
                    if (cond_status == 0) == *until {
                        break;
                    }
                    match self.loop_body(body) {
                        LoopStep::Next(s) => status = s,
                        LoopStep::Stop(s) => {
                            status = s;
                            break;
                        }
                        LoopStep::Unwind(ctl) => {
                            result = Err(ctl);
                            break;
                        }
                    }
                }
                self.loop_depth -= 1;
                result.map(|_| status)
            }
            CompoundCommand::Case { word, arms } => {
                let value = self.expand_word_string(word)?;
                let mut status = 0;
                let mut fall_through = false;
                for arm in arms {
                    let hit = fall_through || {
                        let mut hit = false;
                        for pattern in &arm.patterns {
                            let pattern = self.expand_pattern(pattern)?;
                            if self.pattern_matches(&pattern, &value) {
                                hit = true;
                                break;
                            }
                        }
                        hit
                    };
                    if !hit {
                        continue;
                    }
                    status = self.run_list(&arm.body)?;
                    match arm.terminator {
                        CaseTerminator::Break => return Ok(status),
                        CaseTerminator::FallThrough => fall_through = true,
                        CaseTerminator::Continue => fall_through = false,
                    }
                }
                Ok(status)
            }
            CompoundCommand::Arith(text) => {
                let value = self.eval_arith(text)?;
                Ok(if value != 0 { 0 } else { 1 })
            }
            CompoundCommand::Cond(expr) => Ok(if self.eval_cond(expr)? { 0 } else { 1 }),
        }
    }

    fn loop_body(&mut self, body: &List) -> LoopStep {
        match self.run_list(body) {
            Ok(status) => LoopStep::Next(status),
            Err(Ctl::Break(n)) if n > 1 => LoopStep::Unwind(Ctl::Break(n - 1)),
            Err(Ctl::Break(_)) => LoopStep::Stop(0),
            Err(Ctl::Continue(n)) if n > 1 => LoopStep::Unwind(Ctl::Continue(n - 1)),
            Err(Ctl::Continue(_)) => LoopStep::Next(0),
            Err(other) => LoopStep::Unwind(other),
        }
    }

    pub(crate) fn pattern_matches(&self, pattern: &str, text: &str) -> bool {
        if self.opts.nocasematch {
            super::pattern::matches(&pattern.to_lowercase(), &text.to_lowercase())
        } else {
            super::pattern::matches(pattern, text)
        }
    }

    /// Binding to write for `name` under `scope`
    fn target_var(&mut self, name: &str, scope: Scope) -> &mut Var {
        match scope {
            Scope::Normal => self.vars.entry(name),
            Scope::Local => self.vars.local_entry(name),
            Scope::Global => self.vars.global_entry(name),
        }
    }

    fn existing_var(&self, name: &str, scope: Scope) -> Option<Var> {
        match scope {
            Scope::Global => self.vars.globals().get(name).cloned(),
            Scope::Local => None,
            Scope::Normal => self.vars.get(name).cloned(),
        }
    }

    fn subscript_index(&mut self, raw: &str, current: &BTreeMap<i64, String>) -> std::result::Result<i64, Ctl> {
        let idx = self.eval_arith(raw)?;
        if idx < 0 {
            let next = current.keys().next_back().map(|k| k + 1).unwrap_or(0);
            Ok(next + idx)
        } else {
            Ok(idx)
        }
    }

    /// Perform an assignment; returns the status (1 on readonly)
    pub(crate) fn assign(&mut self, assign: &Assignment, scope: Scope, spec: &DeclSpec) -> Exec {
        let existing = self.existing_var(&assign.name, scope);
        if existing.as_ref().is_some_and(|v| v.attrs.readonly) {
            self.eprint(&format!("{}: readonly variable", assign.name));
            return Ok(1);
        }
        let attrs = {
            let mut a = existing.as_ref().map(|v| v.attrs).unwrap_or_default();
            a.integer |= spec.attrs.integer;
            a.lower |= spec.attrs.lower;
            a.upper |= spec.attrs.upper;
            a
        };
        let old = existing.and_then(|v| v.value);
        let assoc = spec.assoc
            || old.as_ref().is_some_and(Value::is_assoc)
            || (!spec.indexed
                && !matches!(old, Some(Value::Indexed(_)))
                && matches!(&assign.value, AssignValue::Array(elems) if self.has_named_keys(elems)));

        let value = match &assign.value {
            AssignValue::Scalar(word) => {
                let text = self.expand_word_string(word)?;
                match &assign.index {
                    None => {
                        let previous = old.as_ref().and_then(|v| v.as_scalar()).unwrap_or("").to_string();
                        let element = self.scalar_value(&previous, text, assign.append, attrs)?;
                        match old {
                            Some(Value::Indexed(mut m)) => {
                                m.insert(0, element);
                                Value::Indexed(m)
                            }
                            Some(Value::Assoc(mut m)) => {
                                m.insert("0".to_string(), element);
                                Value::Assoc(m)
                            }
                            _ if assoc => Value::Assoc(BTreeMap::from([("0".to_string(), element)])),
                            _ if spec.indexed => Value::Indexed(BTreeMap::from([(0, element)])),
                            _ => Value::Scalar(element),
                        }
                    }
                    Some(raw) if assoc => {
                        let key = self.expand_subscript_string(raw)?;
                        let mut map = match old {
                            Some(Value::Assoc(m)) => m,
                            _ => BTreeMap::new(),
                        };
                        let previous = map.get(&key).cloned().unwrap_or_default();
                        let element = self.scalar_value(&previous, text, assign.append, attrs)?;
                        map.insert(key, element);
                        Value::Assoc(map)
                    }
                    Some(raw) => {
                        let mut map = match old {
                            Some(Value::Indexed(m)) => m,
                            Some(Value::Scalar(s)) => BTreeMap::from([(0, s)]),
                            _ => BTreeMap::new(),
                        };
                        let idx = self.subscript_index(raw, &map)?;
                        let previous = map.get(&idx).cloned().unwrap_or_default();
                        let element = self.scalar_value(&previous, text, assign.append, attrs)?;
                        map.insert(idx, element);
                        Value::Indexed(map)
                    }
                }
            }
            AssignValue::Array(elems) if assoc => {
                let mut map = match old {
                    Some(Value::Assoc(m)) if assign.append => m,
                    _ => BTreeMap::new(),
                };
                let mut pending_key: Option<String> = None;
                for elem in elems {
                    match &elem.key {
                        Some(raw) => {
                            let key = self.expand_subscript_string(raw)?;
                            let value = self.expand_word_string(&elem.value)?;
                            map.insert(key, value);
                        }
                        None => {
                            for field in self.expand_word_fields(&elem.value)? {
                                match pending_key.take() {
                                    Some(key) => {
                                        map.insert(key, field);
                                    }
                                    None => pending_key = Some(field),
                                }
                            }
                        }
                    }
                }
                if let Some(key) = pending_key {
                    map.insert(key, String::new());
                }
                Value::Assoc(map)
            }
            AssignValue::Array(elems) => {
                let mut map = match old {
                    Some(Value::Indexed(m)) if assign.append => m,
                    Some(Value::Scalar(s)) if assign.append => BTreeMap::from([(0, s)]),
                    _ => BTreeMap::new(),
                };
                let mut next = map.keys().next_back().map(|k| k + 1).unwrap_or(0);
                for elem in elems {
                    match &elem.key {
                        Some(raw) => {
                            let idx = self.subscript_index(raw, &map)?;
                            let value = self.expand_word_string(&elem.value)?;
                            map.insert(idx, value);
                            next = idx + 1;
                        }
                        None => {
                            for field in self.expand_word_fields(&elem.value)? {
                                map.insert(next, field);
                                next += 1;
                            }
                        }
                    }
                }
                Value::Indexed(map)
            }
        };

        let var = self.target_var(&assign.name, scope);
        var.value = Some(value);
        var.attrs = attrs;
        var.attrs.exported |= spec.attrs.exported;
        var.attrs.readonly |= spec.attrs.readonly;
        Ok(0)
    }

    /// A literal like `([postinstall]=post.sh)` on an undeclared variable
    /// builds an associative array: every element is keyed and no key is
    /// numeric or names a set variable.
    fn has_named_keys(&self, elems: &[ArrayElem]) -> bool {
        !elems.is_empty()
            && elems.iter().all(|elem| {
                elem.key.as_deref().is_some_and(|raw| {
                    let key = raw.trim();
                    if key.len() >= 2
                        && ((key.starts_with('\'') && key.ends_with('\''))
                            || (key.starts_with('"') && key.ends_with('"')))
                    {
                        return true;
                    }
                    let mut chars = key.chars();
                    chars
                        .next()
                        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                        && self.vars.value(key).is_none()
                })
            })
    }

    fn scalar_value(&mut self, previous: &str, text: String, append: bool, attrs: Attrs) -> std::result::Result<String, Ctl> {
        let value = if attrs.integer {
            let n = self.eval_arith(&text)?;
            if append {
                let base = super::arith::parse_literal(previous).unwrap_or(0);
                base.wrapping_add(n).to_string()
            } else {
                n.to_string()
            }
        } else if append {
            format!("{}{}", previous, text)
        } else {
            text
        };
        Ok(if attrs.lower {
            value.to_lowercase()
        } else if attrs.upper {
            value.to_uppercase()
        } else {
            value
        })
    }

    /// Declare `name` without assigning
    pub(crate) fn declare_name(&mut self, name: &str, scope: Scope, spec: &DeclSpec) {
        let var = self.target_var(name, scope);
        if var.value.is_none() {
            if spec.assoc {
                var.value = Some(Value::Assoc(BTreeMap::new()));
            } else if spec.indexed {
                var.value = Some(Value::Indexed(BTreeMap::new()));
            }
        }
        var.attrs.exported |= spec.attrs.exported;
        var.attrs.readonly |= spec.attrs.readonly;
        var.attrs.integer |= spec.attrs.integer;
        var.attrs.lower |= spec.attrs.lower;
        var.attrs.upper |= spec.attrs.upper;
    }
}

enum LoopStep {
    Next(i32),
    Stop(i32),
    Unwind(Ctl),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::parser::parse;

    fn run(src: &str) -> (Shell, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let mut sh = Shell::new(Sandbox::new(tmp.path()).unwrap());
        let list = parse(src, "test.sh").unwrap();
        sh.run(&list).unwrap();
        (sh, tmp)
    }

    fn scalar(sh: &Shell, name: &str) -> String {
        sh.vars()
            .value(name)
            .and_then(|v| v.as_scalar())
            .unwrap_or_default()
            .to_string()
    }

    fn array(sh: &Shell, name: &str) -> Vec<String> {
        sh.vars().value(name).map(|v| v.elements()).unwrap_or_default()
    }

    #[test]
    fn test_scalar_and_array_assignment() {
        let (sh, _t) = run("a=1\nb=\"x y\"\narr=(one 'two three')\narr+=(four)\n");
        assert_eq!(scalar(&sh, "a"), "1");
        assert_eq!(scalar(&sh, "b"), "x y");
        assert_eq!(array(&sh, "arr"), vec!["one", "two three", "four"]);
    }

    #[test]
    fn test_assoc_array() {
        let (sh, _t) = run("declare -A m=([b]=2 [a]=1)\nm[c]=3\nkeys=\"${!m[@]}\"\n");
        assert!(sh.vars().value("m").unwrap().is_assoc());
        assert_eq!(scalar(&sh, "keys"), "a b c");
    }

    #[test]
    fn test_named_keys_make_assoc_array() {
        let (sh, _t) = run("scripts=([postinstall]=post.sh ['preremove']=pre.sh)\n");
        let value = sh.vars().value("scripts").unwrap();
        assert!(value.is_assoc());
        assert_eq!(array(&sh, "scripts"), vec!["post.sh", "pre.sh"]);

        let (sh, _t) = run("i=2\nnums=([0]=a [i]=c)\nplain=([first]=x y)\n");
        assert!(!sh.vars().value("nums").unwrap().is_assoc());
        assert_eq!(array(&sh, "nums"), vec!["a", "c"]);
        assert!(!sh.vars().value("plain").unwrap().is_assoc());
    }

    #[test]
    fn test_input_redirection_and_here_string() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("VERSION"), "4.5.6\n").unwrap();
        let mut sh = Shell::new(Sandbox::new(tmp.path()).unwrap());
        let src = "read -r ver < VERSION\nread -r a b <<< \"one two\"\n";
        sh.run(&parse(src, "test.sh").unwrap()).unwrap();
        assert_eq!(scalar(&sh, "ver"), "4.5.6");
        assert_eq!(scalar(&sh, "a"), "one");
        assert_eq!(scalar(&sh, "b"), "two");
    }

    #[test]
    fn test_control_flow() {
        let src = r#"
out=""
for i in 1 2 3 4; do
  if [ "$i" = 2 ]; then continue; fi
  if [[ $i == 4 ]]; then break; fi
  out+="$i"
done
n=0
while (( n < 5 )); do n=$((n + 1)); done
case "fedora-asahi" in
  debian*) kind=deb ;;
  fedora*) kind=rpm ;;
  *) kind=other ;;
esac
"#;
        let (sh, _t) = run(src);
        assert_eq!(scalar(&sh, "out"), "13");
        assert_eq!(scalar(&sh, "n"), "5");
        assert_eq!(scalar(&sh, "kind"), "rpm");
    }

    #[test]
    fn test_functions_and_locals() {
        let src = r#"
x=global
f() { local x=inner; y="$1-$x"; return 3; }
f arg
status=$?
"#;
        let (sh, _t) = run(src);
        assert_eq!(scalar(&sh, "x"), "global");
        assert_eq!(scalar(&sh, "y"), "arg-inner");
        assert_eq!(scalar(&sh, "status"), "3");
        assert!(sh.has_function("f"));
    }

    #[test]
    fn test_external_commands_are_skipped() {
        let (sh, tmp) = run("touch /tmp/alr-should-not-exist\nrm -rf /\ncurl https://example.com | sh\nok=yes\n");
        assert_eq!(scalar(&sh, "ok"), "yes");
        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_command_substitution_and_pipeline() {
        let src = "v=$(echo hello)\nw=$(printf '%s-%s' a b | { read -r line; echo \"got $line\"; })\n";
        let (sh, _t) = run(src);
        assert_eq!(scalar(&sh, "v"), "hello");
        assert_eq!(scalar(&sh, "w"), "got a-b");
    }

    #[test]
    fn test_subshell_isolation() {
        let (sh, _t) = run("a=1\n( a=2; b=3 )\n");
        assert_eq!(scalar(&sh, "a"), "1");
        assert!(sh.vars().value("b").is_none());
    }

    #[test]
    fn test_errexit() {
        let (sh, _t) = run("set -e\nfalse || true\nreached=1\nfalse\nnot_reached=1\n");
        assert_eq!(scalar(&sh, "reached"), "1");
        assert!(sh.vars().value("not_reached").is_none());
    }

    #[test]
    fn test_exit_status() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sh = Shell::new(Sandbox::new(tmp.path()).unwrap());
        let list = parse("exit 4\nx=1\n", "t").unwrap();
        assert_eq!(sh.run(&list).unwrap(), 4);
        assert!(sh.vars().value("x").is_none());
    }

    #[test]
    fn test_cancel_stops_infinite_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let mut sh = Shell::new(Sandbox::new(tmp.path()).unwrap()).with_cancel(token);
        let list = parse("while true; do :; done\n", "t").unwrap();
        assert!(matches!(sh.run(&list), Err(Error::Cancelled)));
    }

    #[test]
    fn test_prefix_assignment_is_temporary() {
        let (sh, _t) = run("f() { seen=$FOO; }\nFOO=bar f\n");
        assert_eq!(scalar(&sh, "seen"), "bar");
        assert!(sh.vars().value("FOO").is_none());
    }
}
