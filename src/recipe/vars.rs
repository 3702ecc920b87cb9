// src/recipe/vars.rs

//! Typed build variables decoded from a recipe

use super::overridable::OverridableField;
use serde::{Deserialize, Serialize};

/// Paths of package scriptlets, relative to the recipe directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scripts {
    pub pre_install: String,
    pub post_install: String,
    pub pre_remove: String,
    pub post_remove: String,
    pub pre_upgrade: String,
    pub post_upgrade: String,
    pub pre_trans: String,
    pub post_trans: String,
}

impl Scripts {
    /// Recipe keys of the `scripts` associative array
    pub const KEYS: [&'static str; 8] = [
        "preinstall",
        "postinstall",
        "preremove",
        "postremove",
        "preupgrade",
        "postupgrade",
        "pretrans",
        "posttrans",
    ];

    pub fn slot_mut(&mut self, key: &str) -> Option<&mut String> {
        Some(match key {
            "preinstall" => &mut self.pre_install,
            "postinstall" => &mut self.post_install,
            "preremove" => &mut self.pre_remove,
            "postremove" => &mut self.post_remove,
            "preupgrade" => &mut self.pre_upgrade,
            "postupgrade" => &mut self.post_upgrade,
            "pretrans" => &mut self.pre_trans,
            "posttrans" => &mut self.post_trans,
            _ => return None,
        })
    }
}

/// Variables available after the restricted pass, before `name` is known
/// to be valid
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildVarsPre {
    pub version: String,
    pub release: i64,
    pub epoch: u64,
    pub summary: OverridableField<String>,
    pub description: OverridableField<String>,
    pub group: OverridableField<String>,
    pub homepage: OverridableField<String>,
    pub maintainer: OverridableField<String>,
    pub architectures: Vec<String>,
    pub licenses: Vec<String>,
    pub provides: OverridableField<Vec<String>>,
    pub conflicts: OverridableField<Vec<String>>,
    pub depends: OverridableField<Vec<String>>,
    pub build_depends: OverridableField<Vec<String>>,
    pub opt_depends: OverridableField<Vec<String>>,
    pub replaces: OverridableField<Vec<String>>,
    pub sources: OverridableField<Vec<String>>,
    pub checksums: OverridableField<Vec<String>>,
    pub backup: OverridableField<Vec<String>>,
    pub scripts: OverridableField<Scripts>,
    pub auto_req: OverridableField<Vec<String>>,
    pub auto_prov: OverridableField<Vec<String>>,
    pub auto_req_skiplist: OverridableField<Vec<String>>,
    pub auto_prov_skiplist: OverridableField<Vec<String>>,
}

/// Complete build variables of one recipe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildVars {
    /// Installed package name
    pub name: String,
    /// Recipe directory name; identity within a repository
    pub base: String,
    #[serde(flatten)]
    pub pre: BuildVarsPre,
}

impl std::ops::Deref for BuildVars {
    type Target = BuildVarsPre;

    fn deref(&self) -> &BuildVarsPre {
        &self.pre
    }
}

impl std::ops::DerefMut for BuildVars {
    fn deref_mut(&mut self) -> &mut BuildVarsPre {
        &mut self.pre
    }
}

/// Shell truthiness of an `auto_req`/`auto_prov` value
pub fn is_truthy(values: &[String]) -> bool {
    values.first().is_some_and(|v| {
        matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "y" | "yes" | "true"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy() {
        assert!(is_truthy(&["Yes".to_string()]));
        assert!(is_truthy(&["1".to_string()]));
        assert!(!is_truthy(&["no".to_string()]));
        assert!(!is_truthy(&[]));
    }

    #[test]
    fn test_script_slots() {
        let mut scripts = Scripts::default();
        for key in Scripts::KEYS {
            *scripts.slot_mut(key).unwrap() = format!("{}.sh", key);
        }
        assert_eq!(scripts.pre_trans, "pretrans.sh");
        assert!(scripts.slot_mut("other").is_none());
    }

    #[test]
    fn test_build_vars_serde() {
        let mut vars = BuildVars {
            name: "hello".into(),
            base: "hello".into(),
            ..Default::default()
        };
        vars.version = "1.0".into();
        vars.release = 2;
        let json = serde_json::to_string(&vars).unwrap();
        let back: BuildVars = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vars);
    }
}
