// src/shell/mod.rs

//! Recipe shell language
//!
//! A parser for the bash dialect recipes are written in, and a restricted
//! interpreter used to evaluate a recipe without running anything on the
//! host. Hooks are executed later by a real `bash`; this module only
//! decides what the recipe declares.

pub mod arith;
pub mod ast;
mod builtins;
mod expand;
mod interp;
pub mod parser;
pub mod pattern;
pub mod sandbox;
pub mod vars;

pub use builtins::is_builtin;
pub use interp::{Shell, ShellOptions};
pub use parser::{is_valid_name, parse};
pub use sandbox::Sandbox;
pub use vars::{Attrs, Value, Var, VarStore};
