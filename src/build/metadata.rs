// src/build/metadata.rs

//! Format-neutral package metadata from build variables

use super::deps::merge_depends;
use crate::distro::Platform;
use crate::packages::{
    ContentEntry, PackageInfo, PackageScripts, TransactionScripts, UpgradeScripts,
};
use crate::recipe::BuildVars;
use crate::version::Dependency;
use std::path::Path;

/// Installed name of a package built from repository `repository`
pub fn package_name(name: &str, repository: &str) -> String {
    format!("{}+alr-{}", name, repository)
}

/// Output architecture: `all` when the recipe says so, else the host's
pub fn output_arch(vars: &BuildVars, platform: &Platform) -> String {
    if vars.architectures.iter().any(|a| a == "all") {
        "all".to_string()
    } else {
        platform.arch.clone()
    }
}

/// The identity fields: everything the artifact's file name depends on
pub fn base_info(vars: &BuildVars, platform: &Platform, repository: &str) -> PackageInfo {
    PackageInfo {
        name: package_name(&vars.name, repository),
        arch: output_arch(vars, platform),
        version: vars.version.clone(),
        release: platform.release_string(vars.release),
        epoch: if vars.epoch == 0 {
            String::new()
        } else {
            vars.epoch.to_string()
        },
        platform: "linux".to_string(),
        ..Default::default()
    }
}

/// Inputs that come from outside the build variables
#[derive(Debug, Clone, Default)]
pub struct Extra {
    /// Runtime dependencies after orchestration, replacing the recipe's own
    pub depends: Option<Vec<String>>,
    /// Scanner results appended to provides and depends
    pub auto_provides: Vec<String>,
    pub auto_requires: Vec<String>,
}

/// Full metadata for the packager
pub fn assemble(
    vars: &BuildVars,
    platform: &Platform,
    repository: &str,
    format: &str,
    script_dir: &Path,
    contents: Vec<ContentEntry>,
    extra: &Extra,
) -> PackageInfo {
    let mut info = base_info(vars, platform, repository);
    info.description = vars.description.resolved();
    info.homepage = vars.homepage.resolved();
    info.maintainer = vars.maintainer.resolved();
    info.group = vars.group.resolved();
    info.license = vars.licenses.join(", ");
    info.contents = contents;

    let mut provides = vars.provides.resolved();
    provides.extend(extra.auto_provides.iter().cloned());
    if format == "apk" {
        provides.retain(|p| dep_name(p) != vars.name);
    } else if !provides.iter().any(|p| dep_name(p) == vars.name) {
        provides.push(vars.name.clone());
    }

    let mut depends = extra
        .depends
        .clone()
        .unwrap_or_else(|| vars.depends.resolved());
    depends.extend(extra.auto_requires.iter().cloned());

    info.provides = for_format(&merge_depends(&provides), format);
    info.depends = for_format(&merge_depends(&depends), format);
    info.conflicts = for_format(&vars.conflicts.resolved(), format);
    info.replaces = for_format(&vars.replaces.resolved(), format);

    let scripts = vars.scripts.resolved();
    let path = |p: &str| {
        if p.is_empty() {
            String::new()
        } else {
            script_dir.join(p).display().to_string()
        }
    };
    info.scripts = PackageScripts {
        pre_install: path(&scripts.pre_install),
        post_install: path(&scripts.post_install),
        pre_remove: path(&scripts.pre_remove),
        post_remove: path(&scripts.post_remove),
    };
    let upgrade = UpgradeScripts {
        pre_upgrade: path(&scripts.pre_upgrade),
        post_upgrade: path(&scripts.post_upgrade),
    };
    info.arch_scripts = upgrade.clone();
    info.apk_scripts = upgrade;
    info.rpm_scripts = TransactionScripts {
        pre_trans: path(&scripts.pre_trans),
        post_trans: path(&scripts.post_trans),
    };
    info
}

fn dep_name(dep: &str) -> String {
    Dependency::parse(dep)
        .map(|d| d.name)
        .unwrap_or_else(|_| dep.to_string())
}

/// Rewrite dependency strings into the format's metadata dialect
fn for_format(deps: &[String], format: &str) -> Vec<String> {
    deps.iter()
        .map(|d| match Dependency::parse(d) {
            Ok(dep) => dep.for_nfpm(format),
            Err(_) => d.clone(),
        })
        .collect()
}
