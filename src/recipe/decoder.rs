// src/recipe/decoder.rs

//! Turn the interpreter's final variable scope into [`BuildVars`]
//!
//! Scalars decode to strings, any array decodes to a list, and a scalar
//! given where a list is expected becomes a one-element list. Overridable
//! fields are read from `field_<selector>` for every platform selector and
//! resolved immediately.

use super::overridable::OverridableField;
use super::vars::{BuildVars, BuildVarsPre, Scripts};
use crate::distro::Platform;
use crate::error::{Error, Result};
use crate::shell::{Shell, Value};

pub struct Decoder<'a> {
    shell: &'a Shell,
    selectors: Vec<String>,
}

impl<'a> Decoder<'a> {
    pub fn new(shell: &'a Shell, platform: &Platform) -> Self {
        Self {
            shell,
            selectors: platform.selectors(),
        }
    }

    fn value(&self, name: &str) -> Option<&'a Value> {
        self.shell
            .vars()
            .globals()
            .get(name)
            .and_then(|v| v.value.as_ref())
    }

    pub fn string(&self, name: &str) -> Option<String> {
        self.value(name).map(|v| match v {
            Value::Scalar(s) => s.clone(),
            other => other.elements().join(" "),
        })
    }

    pub fn list(&self, name: &str) -> Option<Vec<String>> {
        self.value(name).map(|v| match v {
            Value::Scalar(s) if s.is_empty() => Vec::new(),
            other => other.elements(),
        })
    }

    pub fn int(&self, name: &str) -> Result<Option<i64>> {
        match self.string(name) {
            None => Ok(None),
            Some(s) => s.trim().parse().map(Some).map_err(|_| Error::InvalidVar {
                name: name.to_string(),
                reason: format!("expected an integer, got {:?}", s),
            }),
        }
    }

    fn required_string(&self, name: &str) -> Result<String> {
        match self.string(name) {
            Some(s) if !s.is_empty() => Ok(s),
            _ => Err(Error::MissingRequiredVar(name.to_string())),
        }
    }

    fn variants(&self, field: &str) -> impl Iterator<Item = (&String, String)> {
        self.selectors.iter().map(move |s| {
            let var = if s.is_empty() {
                field.to_string()
            } else {
                format!("{}_{}", field, s)
            };
            (s, var)
        })
    }

    fn overridable<T, F>(&self, field: &str, read: F) -> OverridableField<T>
    where
        T: Clone + Default,
        F: Fn(&str) -> Option<T>,
    {
        let mut out = OverridableField::default();
        for (selector, var) in self.variants(field) {
            if let Some(value) = read(&var) {
                out.set(selector, value);
            }
        }
        out.resolve(&self.selectors);
        out
    }

    pub fn overridable_string(&self, field: &str) -> OverridableField<String> {
        self.overridable(field, |var| self.string(var))
    }

    pub fn overridable_list(&self, field: &str) -> OverridableField<Vec<String>> {
        self.overridable(field, |var| self.list(var))
    }

    /// `scripts=([preinstall]=pre.sh ...)`
    pub fn overridable_scripts(&self, field: &str) -> Result<OverridableField<Scripts>> {
        for (_, var) in self.variants(field) {
            match self.value(&var) {
                None | Some(Value::Assoc(_)) => {}
                Some(other) if other.elements().iter().all(String::is_empty) => {}
                Some(_) => {
                    return Err(Error::InvalidVar {
                        name: var,
                        reason: "expected an associative array of hook script paths".to_string(),
                    });
                }
            }
        }
        Ok(self.overridable(field, |var| {
            let Value::Assoc(map) = self.value(var)? else {
                return None;
            };
            let mut scripts = Scripts::default();
            for (key, path) in map {
                if let Some(slot) = scripts.slot_mut(key) {
                    *slot = path.clone();
                }
            }
            Some(scripts)
        }))
    }

    pub fn decode_pre(&self) -> Result<BuildVarsPre> {
        let version = self.required_string("version")?;
        let release = self
            .int("release")?
            .ok_or_else(|| Error::MissingRequiredVar("release".to_string()))?;
        let epoch = match self.int("epoch")? {
            Some(e) if e < 0 => {
                return Err(Error::InvalidVar {
                    name: "epoch".to_string(),
                    reason: "must not be negative".to_string(),
                });
            }
            Some(e) => e as u64,
            None => 0,
        };

        Ok(BuildVarsPre {
            version,
            release,
            epoch,
            summary: self.overridable_string("summary"),
            description: self.overridable_string("desc"),
            group: self.overridable_string("group"),
            homepage: self.overridable_string("homepage"),
            maintainer: self.overridable_string("maintainer"),
            architectures: self.list("architectures").unwrap_or_default(),
            licenses: self.list("license").unwrap_or_default(),
            provides: self.overridable_list("provides"),
            conflicts: self.overridable_list("conflicts"),
            depends: self.overridable_list("deps"),
            build_depends: self.overridable_list("build_deps"),
            opt_depends: self.overridable_list("opt_deps"),
            replaces: self.overridable_list("replaces"),
            sources: self.overridable_list("sources"),
            checksums: self.overridable_list("checksums"),
            backup: self.overridable_list("backup"),
            scripts: self.overridable_scripts("scripts")?,
            auto_req: self.overridable_list("auto_req"),
            auto_prov: self.overridable_list("auto_prov"),
            auto_req_skiplist: self.overridable_list("auto_req_skiplist"),
            auto_prov_skiplist: self.overridable_list("auto_prov_skiplist"),
        })
    }

    pub fn decode(&self, base: &str) -> Result<BuildVars> {
        let name = self.required_string("name")?;
        if name.contains(char::is_whitespace) || name.contains('/') {
            return Err(Error::InvalidVar {
                name: "name".to_string(),
                reason: format!("{:?} is not a valid package name", name),
            });
        }
        Ok(BuildVars {
            name,
            base: base.to_string(),
            pre: self.decode_pre()?,
        })
    }
}
