// tests/build_pipeline.rs

//! End-to-end builds of small recipes into DEB packages.
//!
//! These run both passes for real (the hooks need `bash`) against mock
//! installers and finders, so nothing touches the host package manager.

mod common;

use alr::finder::Package;
use alr::packages::ContentType;
use alr::{BuildOptions, Error};
use common::{artifacts, sha256_hex, FixedPrompter, MapFinder, MockInstaller, Workspace};
use std::sync::Arc;

const HELLO: &str = "#!/bin/sh\necho hello\n";

fn prompter(remove_build_deps: bool) -> FixedPrompter {
    FixedPrompter {
        remove_build_deps,
        opt_deps: Vec::new(),
    }
}

fn hello_recipe(ws: &Workspace, checksum: &str, extra: &str) -> std::path::PathBuf {
    let body = format!(
        r#"name=hello
version=1.0
release=1
desc="Says hello"
license=('MIT')
sources=('hello.sh')
checksums=('{checksum}')
{extra}
package() {{
    install -Dm755 hello.sh "$pkgdir/usr/bin/hello"
}}
"#
    );
    ws.recipe("hello", &body, &[("hello.sh", HELLO)])
}

#[test]
fn test_simple_recipe_builds_and_caches() {
    let ws = Workspace::new();
    let script = hello_recipe(&ws, &sha256_hex(HELLO.as_bytes()), "");
    let installer = Arc::new(MockInstaller::default());
    let (builder, executor) = ws.builder(Arc::clone(&installer), MapFinder::default(), prompter(false));

    let result = builder.build(&BuildOptions::new(&script)).unwrap();
    assert!(!result.cached);
    assert_eq!(result.name, "hello+alr-local");
    assert_eq!(
        result.path,
        ws.pkgs_dir().join("hello").join("hello+alr-local-1.0-1.amd64.deb")
    );
    assert!(result.path.is_file());
    assert!(!result.path.with_extension("deb.part").exists());

    let built = executor.results();
    assert_eq!(built.len(), 1);
    let contents = &built[0].package.contents;
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0].destination, "/usr/bin/hello");
    assert_eq!(contents[0].kind, ContentType::File);
    assert_eq!(contents[0].mode, 0o755);
    assert_eq!(built[0].package.provides, vec!["hello"]);

    let again = builder.build(&BuildOptions::new(&script)).unwrap();
    assert!(again.cached);
    assert_eq!(again.path, result.path);
    assert_eq!(executor.results().len(), 1);

    let clean = builder.build(&BuildOptions::new(&script).clean(true)).unwrap();
    assert!(!clean.cached);
    assert_eq!(executor.results().len(), 2);
    assert!(installer.calls().is_empty());
}

#[test]
fn test_version_hook_names_the_artifact() {
    let ws = Workspace::new();
    let script = ws.recipe(
        "tool",
        r#"name=tool
version=0.0
release=2
version() {
    echo 2.3.4
}
package() {
    mkdir -p "$pkgdir/usr/share/tool"
    echo "$version" > "$pkgdir/usr/share/tool/VERSION"
}
"#,
        &[],
    );
    let (builder, executor) = ws.builder(
        Arc::new(MockInstaller::default()),
        MapFinder::default(),
        prompter(false),
    );

    let result = builder.build(&BuildOptions::new(&script)).unwrap();
    let file_name = result.path.file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(file_name, "tool+alr-local-2.3.4-2.amd64.deb");
    assert_eq!(executor.results()[0].package.version, "2.3.4");

    let staged = ws.pkgs_dir().join("tool/pkg/usr/share/tool/VERSION");
    assert_eq!(std::fs::read_to_string(staged).unwrap().trim(), "2.3.4");

    // A computed version never hits the cache
    let again = builder.build(&BuildOptions::new(&script)).unwrap();
    assert!(!again.cached);
}

#[test]
fn test_build_dependencies_are_removed_when_confirmed() {
    let ws = Workspace::new();
    let script = hello_recipe(
        &ws,
        &sha256_hex(HELLO.as_bytes()),
        "build_deps=('gcc' 'make')",
    );
    let installer = Arc::new(MockInstaller::with_installed(&["make"]));
    let (builder, _) = ws.builder(Arc::clone(&installer), MapFinder::default(), prompter(true));

    builder.build(&BuildOptions::new(&script)).unwrap();
    assert_eq!(installer.calls(), vec!["install gcc", "remove gcc"]);
    assert!(!installer.is_installed("gcc"));
    assert!(installer.is_installed("make"));
}

#[test]
fn test_build_dependencies_kept_without_confirmation() {
    let ws = Workspace::new();
    let script = hello_recipe(&ws, &sha256_hex(HELLO.as_bytes()), "build_deps=('gcc')");
    let installer = Arc::new(MockInstaller::default());
    let (builder, _) = ws.builder(Arc::clone(&installer), MapFinder::default(), prompter(false));

    builder.build(&BuildOptions::new(&script)).unwrap();
    assert_eq!(installer.calls(), vec!["install gcc"]);
    assert!(installer.is_installed("gcc"));
}

#[test]
fn test_recipe_dependency_is_built_first() {
    let ws = Workspace::new();
    let libfoo = ws.recipe(
        "libfoo",
        r#"name=libfoo
version=1.0
release=1
package() {
    mkdir -p "$pkgdir/usr/lib"
    echo lib > "$pkgdir/usr/lib/libfoo.so.1"
}
"#,
        &[],
    );
    let app = ws.recipe(
        "app",
        r#"name=app
version=0.5
release=1
deps=('libfoo' 'libc6')
package() {
    mkdir -p "$pkgdir/usr/bin"
    echo app > "$pkgdir/usr/bin/app"
}
"#,
        &[],
    );
    let finder = MapFinder::default().with(
        "libfoo",
        Package {
            name: "libfoo".into(),
            base: "libfoo".into(),
            repository: "extra".into(),
            version: "1.0".into(),
            recipe_path: libfoo,
        },
    );
    let installer = Arc::new(MockInstaller::default());
    let (builder, executor) = ws.builder(Arc::clone(&installer), finder, prompter(false));

    let result = builder.build(&BuildOptions::new(&app)).unwrap();
    let lib_artifact = ws
        .pkgs_dir()
        .join("libfoo")
        .join("libfoo+alr-extra-1.0-1.amd64.deb");
    assert_eq!(result.built_deps, vec![lib_artifact.clone()]);
    assert!(lib_artifact.is_file());

    let built = executor.results();
    assert_eq!(built.len(), 2);
    assert_eq!(built[0].package.name, "libfoo+alr-extra");
    assert_eq!(built[1].package.name, "app+alr-local");
    assert_eq!(built[1].package.depends, vec!["libfoo", "libc6"]);

    assert_eq!(
        installer.calls(),
        vec!["install_local libfoo+alr-extra-1.0-1.amd64.deb"]
    );
}

#[test]
fn test_dependency_cycle_is_rejected() {
    let ws = Workspace::new();
    let a = ws.recipe("a", "name=a\nversion=1\nrelease=1\ndeps=('b')\n", &[]);
    let b = ws.recipe("b", "name=b\nversion=1\nrelease=1\ndeps=('a')\n", &[]);
    let pkg = |name: &str, path: &std::path::Path| Package {
        name: name.into(),
        base: name.into(),
        repository: "local".into(),
        version: "1".into(),
        recipe_path: path.to_path_buf(),
    };
    let finder = MapFinder::default()
        .with("a", pkg("a", &a))
        .with("b", pkg("b", &b));
    let (builder, executor) = ws.builder(Arc::new(MockInstaller::default()), finder, prompter(false));

    let err = builder.build(&BuildOptions::new(&a)).unwrap_err();
    match err {
        Error::DependencyCycle(path) => assert_eq!(path, vec!["a", "b", "a"]),
        other => panic!("expected a cycle, got {other}"),
    }
    assert!(executor.results().is_empty());
}

#[test]
fn test_checksum_mismatch_writes_nothing() {
    let ws = Workspace::new();
    let wrong = sha256_hex(b"something else");
    let script = hello_recipe(&ws, &wrong, "");
    let (builder, executor) = ws.builder(
        Arc::new(MockInstaller::default()),
        MapFinder::default(),
        prompter(false),
    );

    let err = builder.build(&BuildOptions::new(&script)).unwrap_err();
    match err {
        Error::ChecksumMismatch { expected, actual, .. } => {
            assert_eq!(expected, format!("sha256:{wrong}"));
            assert_eq!(actual, format!("sha256:{}", sha256_hex(HELLO.as_bytes())));
        }
        other => panic!("expected a checksum mismatch, got {other}"),
    }
    assert!(artifacts(&ws.pkgs_dir().join("hello"), "deb").is_empty());
    assert!(executor.results().is_empty());
}

#[test]
fn test_source_count_must_match_checksums() {
    let ws = Workspace::new();
    let script = ws.recipe(
        "pair",
        "name=pair\nversion=1\nrelease=1\nsources=('a' 'b')\nchecksums=('SKIP')\n",
        &[],
    );
    let (builder, _) = ws.builder(
        Arc::new(MockInstaller::default()),
        MapFinder::default(),
        prompter(false),
    );
    let err = builder.build(&BuildOptions::new(&script)).unwrap_err();
    assert!(matches!(
        err,
        Error::ChecksumLengthMismatch {
            sources: 2,
            checksums: 1
        }
    ));
}

#[test]
fn test_unsupported_architecture() {
    let ws = Workspace::new();
    let script = ws.recipe(
        "riscy",
        "name=riscy\nversion=1\nrelease=1\narchitectures=('riscv64')\n",
        &[],
    );
    let installer = Arc::new(MockInstaller::default());
    let (builder, _) = ws.builder(Arc::clone(&installer), MapFinder::default(), prompter(false));

    let err = builder.build(&BuildOptions::new(&script)).unwrap_err();
    assert!(matches!(err, Error::UnsupportedArchitecture { ref host, .. } if host == "amd64"));
    assert!(installer.calls().is_empty());
}

#[test]
fn test_failing_hook_aborts_the_build() {
    let ws = Workspace::new();
    let script = ws.recipe(
        "broken",
        "name=broken\nversion=1\nrelease=1\nbuild() {\n    echo compiling\n    exit 3\n}\n",
        &[],
    );
    let (builder, _) = ws.builder(
        Arc::new(MockInstaller::default()),
        MapFinder::default(),
        prompter(false),
    );
    let err = builder.build(&BuildOptions::new(&script)).unwrap_err();
    assert!(matches!(err, Error::ExecFailed(_)));
    assert!(artifacts(&ws.pkgs_dir().join("broken"), "deb").is_empty());
}

#[test]
fn test_configured_format_overrides_manager() {
    use alr::manager::{self, PackageManager};
    use alr::{Builder, CancelToken, PackageFormatRegistry};

    let ws = Workspace::new();
    let pacman: Arc<dyn PackageManager> = Arc::from(manager::get("pacman").unwrap());
    let registry = Arc::new(PackageFormatRegistry::with_defaults());

    let mut config = ws.config();
    config.apply_env(|key| (key == "ALR_PKG_FORMAT").then(|| "deb".to_string()));
    let builder = Builder::new(
        config,
        ws.platform(),
        Arc::clone(&registry),
        Arc::clone(&pacman),
        CancelToken::new(),
    );
    assert_eq!(builder.format(), "deb");

    let mut config = ws.config();
    config.pkg_format = None;
    let builder = Builder::new(config, ws.platform(), registry, pacman, CancelToken::new());
    assert_eq!(builder.format(), "archlinux");
}
