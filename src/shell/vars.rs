// src/shell/vars.rs

//! Variable storage: scalars, sparse indexed arrays and associative arrays,
//! with one frame per active function call for `local`

use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(String),
    Indexed(BTreeMap<i64, String>),
    Assoc(BTreeMap<String, String>),
}

impl Value {
    pub fn indexed<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::Indexed(
            items
                .into_iter()
                .enumerate()
                .map(|(i, s)| (i as i64, s.into()))
                .collect(),
        )
    }

    /// Value as seen by `$name`: element zero of an array
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s),
            Value::Indexed(m) => m.get(&0).map(String::as_str),
            Value::Assoc(m) => m.get("0").map(String::as_str),
        }
    }

    /// Every element in index or key order
    pub fn elements(&self) -> Vec<String> {
        match self {
            Value::Scalar(s) => vec![s.clone()],
            Value::Indexed(m) => m.values().cloned().collect(),
            Value::Assoc(m) => m.values().cloned().collect(),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Scalar(_) => vec!["0".to_string()],
            Value::Indexed(m) => m.keys().map(|k| k.to_string()).collect(),
            Value::Assoc(m) => m.keys().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Indexed(m) => m.len(),
            Value::Assoc(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_assoc(&self) -> bool {
        matches!(self, Value::Assoc(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attrs {
    pub exported: bool,
    pub readonly: bool,
    pub integer: bool,
    pub lower: bool,
    pub upper: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Var {
    /// `None` for names declared without a value
    pub value: Option<Value>,
    pub attrs: Attrs,
}

impl Var {
    pub fn new(value: Value) -> Self {
        Self {
            value: Some(value),
            attrs: Attrs::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VarStore {
    frames: Vec<HashMap<String, Var>>,
}

impl Default for VarStore {
    fn default() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }
}

impl VarStore {
    pub fn push_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn in_function(&self) -> bool {
        self.frames.len() > 1
    }

    pub fn get(&self, name: &str) -> Option<&Var> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(|v| v.value.as_ref())
    }

    /// The variable to write for `name`: the innermost existing binding,
    /// or a new global one
    pub fn entry(&mut self, name: &str) -> &mut Var {
        let idx = self
            .frames
            .iter()
            .rposition(|f| f.contains_key(name))
            .unwrap_or(0);
        self.frames[idx].entry(name.to_string()).or_default()
    }

    /// A binding in the current function frame
    pub fn local_entry(&mut self, name: &str) -> &mut Var {
        let idx = self.frames.len() - 1;
        self.frames[idx].entry(name.to_string()).or_default()
    }

    pub fn global_entry(&mut self, name: &str) -> &mut Var {
        self.frames[0].entry(name.to_string()).or_default()
    }

    pub fn set_scalar(&mut self, name: &str, value: impl Into<String>) {
        self.entry(name).value = Some(Value::Scalar(value.into()));
    }

    pub fn unset(&mut self, name: &str) -> bool {
        match self.frames.iter().rposition(|f| f.contains_key(name)) {
            Some(idx) => {
                if idx == self.frames.len() - 1 || idx == 0 {
                    self.frames[idx].remove(name);
                } else if let Some(var) = self.frames[idx].get_mut(name) {
                    var.value = None;
                }
                true
            }
            None => false,
        }
    }

    /// Names and values visible at global scope
    pub fn globals(&self) -> &HashMap<String, Var> {
        &self.frames[0]
    }

    /// Exported scalar variables, innermost binding wins
    pub fn exported(&self) -> Vec<(String, String)> {
        let mut seen: HashMap<&str, &Var> = HashMap::new();
        for frame in &self.frames {
            for (name, var) in frame {
                seen.insert(name, var);
            }
        }
        let mut out: Vec<(String, String)> = seen
            .into_iter()
            .filter(|(_, v)| v.attrs.exported)
            .filter_map(|(n, v)| {
                v.value
                    .as_ref()
                    .and_then(|val| val.as_scalar())
                    .map(|s| (n.to_string(), s.to_string()))
            })
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_shadows_global() {
        let mut vars = VarStore::default();
        vars.set_scalar("x", "global");
        vars.push_frame();
        vars.local_entry("x").value = Some(Value::Scalar("local".into()));
        assert_eq!(vars.value("x").and_then(Value::as_scalar), Some("local"));
        vars.set_scalar("x", "changed");
        vars.pop_frame();
        assert_eq!(vars.value("x").and_then(Value::as_scalar), Some("global"));
    }

    #[test]
    fn test_assignment_in_function_is_global() {
        let mut vars = VarStore::default();
        vars.push_frame();
        vars.set_scalar("y", "1");
        vars.pop_frame();
        assert!(vars.globals().contains_key("y"));
    }

    #[test]
    fn test_array_scalar_view() {
        let v = Value::indexed(["a", "b"]);
        assert_eq!(v.as_scalar(), Some("a"));
        assert_eq!(v.elements(), vec!["a", "b"]);
        assert_eq!(v.keys(), vec!["0", "1"]);
    }
}
