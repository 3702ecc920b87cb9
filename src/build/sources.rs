// src/build/sources.rs

//! Source fetching and verification
//!
//! Each entry of `sources` is paired with the entry of `checksums` at the
//! same index. Supported source forms:
//! - `https://host/file.tar.gz`: fetched over HTTP with retries
//! - `file:///abs/path`, `file://rel/path`, `rel/path`: copied from the
//!   recipe directory
//! - `git+https://host/repo.git`: cloned with `git`
//!
//! Options ride in the query string with a `~` prefix: `~name=` renames the
//! downloaded file, `~rev=` checks out a git revision, and `~archive=false`
//! keeps an archive packed.

use super::dirs::Directories;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use md5::Md5;
use rayon::prelude::*;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256, Sha512};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Timeout for one HTTP request
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Attempts per HTTP source
const MAX_RETRIES: u32 = 3;

const RETRY_DELAY_MS: u64 = 1000;

const STREAM_BUFFER_SIZE: usize = 8192;

/// Shared sink for human-readable download progress
pub type ProgressSink = Arc<Mutex<dyn Write + Send>>;

/// Digest algorithms accepted in `checksums`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha256,
    Sha512,
    Md5,
}

impl HashAlgo {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            "md5" => Some(Self::Md5),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Md5 => "md5",
        }
    }

    /// Digest length in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
            Self::Md5 => 16,
        }
    }
}

/// One entry of `checksums`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    Skip,
    Digest { algo: HashAlgo, expected: Vec<u8> },
}

impl Checksum {
    /// Parse `SKIP` (any case) or `[algo:]hex`; the default algorithm is sha256
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("skip") {
            return Ok(Self::Skip);
        }
        let (algo, hex_str) = match s.split_once(':') {
            Some((name, hex_str)) => (
                HashAlgo::from_name(name).ok_or_else(|| {
                    Error::ParseError(format!("unsupported checksum algorithm '{}'", name))
                })?,
                hex_str,
            ),
            None => (HashAlgo::Sha256, s),
        };
        let expected = hex::decode(hex_str)
            .map_err(|e| Error::ParseError(format!("invalid checksum '{}': {}", s, e)))?;
        if expected.len() != algo.digest_len() {
            return Err(Error::ParseError(format!(
                "{} checksum '{}' has {} bytes, expected {}",
                algo.name(),
                s,
                expected.len(),
                algo.digest_len()
            )));
        }
        Ok(Self::Digest { algo, expected })
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }
}

/// Digest a file with `algo`
pub fn digest_file(path: &Path, algo: HashAlgo) -> Result<Vec<u8>> {
    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("opening {}: {}", path.display(), e)))?;
    Ok(match algo {
        HashAlgo::Sha256 => {
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)?;
            hasher.finalize().to_vec()
        }
        HashAlgo::Sha512 => {
            let mut hasher = Sha512::new();
            io::copy(&mut file, &mut hasher)?;
            hasher.finalize().to_vec()
        }
        HashAlgo::Md5 => {
            let mut hasher = Md5::new();
            io::copy(&mut file, &mut hasher)?;
            hasher.finalize().to_vec()
        }
    })
}

/// Fail with `ChecksumMismatch` unless `path` matches `checksum`
pub fn verify(path: &Path, checksum: &Checksum, source_name: &str) -> Result<()> {
    let Checksum::Digest { algo, expected } = checksum else {
        debug!("Skipping checksum for {}", source_name);
        return Ok(());
    };
    let actual = digest_file(path, *algo)?;
    if &actual != expected {
        return Err(Error::ChecksumMismatch {
            source_name: source_name.to_string(),
            expected: format!("{}:{}", algo.name(), hex::encode(expected)),
            actual: format!("{}:{}", algo.name(), hex::encode(&actual)),
        });
    }
    debug!("Verified {} checksum of {}", algo.name(), source_name);
    Ok(())
}

/// Collapse repeated sources, preferring a real checksum over `SKIP`
///
/// Order follows the first occurrence of each source.
pub fn remove_duplicate_sources(
    sources: &[String],
    checksums: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut out_sources: Vec<String> = Vec::new();
    let mut out_checksums: Vec<String> = Vec::new();
    for (source, checksum) in sources.iter().zip(checksums) {
        match out_sources.iter().position(|s| s == source) {
            Some(pos) => {
                if out_checksums[pos].eq_ignore_ascii_case("skip")
                    && !checksum.eq_ignore_ascii_case("skip")
                {
                    out_checksums[pos] = checksum.clone();
                }
            }
            None => {
                out_sources.push(source.clone());
                out_checksums.push(checksum.clone());
            }
        }
    }
    (out_sources, out_checksums)
}

/// Fail before any fetch when the lists are not parallel
pub fn check_lengths(sources: &[String], checksums: &[String]) -> Result<()> {
    if sources.len() != checksums.len() {
        return Err(Error::ChecksumLengthMismatch {
            sources: sources.len(),
            checksums: checksums.len(),
        });
    }
    Ok(())
}

/// Where a source comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Local(PathBuf),
    Http(Url),
    Git { url: String, rev: Option<String> },
}

/// A parsed `sources` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub raw: String,
    pub kind: SourceKind,
    /// File (or clone directory) name inside SrcDir
    pub name: String,
    /// Unpack into SrcDir after verification
    pub extract: bool,
}

impl Source {
    pub fn parse(raw: &str, script_dir: &Path) -> Result<Self> {
        let (base, options) = split_options(raw);
        let option = |key: &str| {
            options
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        let kind = if let Some(git) = base.strip_prefix("git+") {
            SourceKind::Git {
                url: git.to_string(),
                rev: option("rev"),
            }
        } else if base.starts_with("http://") || base.starts_with("https://") {
            SourceKind::Http(
                Url::parse(&base)
                    .map_err(|e| Error::ParseError(format!("invalid source URL '{}': {}", raw, e)))?,
            )
        } else if base.contains("://") && !base.starts_with("file://") {
            return Err(Error::ParseError(format!("unsupported source scheme in '{}'", raw)));
        } else {
            let path = base.strip_prefix("file://").unwrap_or(&base);
            let path = Path::new(path);
            SourceKind::Local(if path.is_absolute() {
                path.to_path_buf()
            } else {
                script_dir.join(path)
            })
        };

        let name = match option("name") {
            Some(name) => name,
            None => default_name(&kind).ok_or_else(|| {
                Error::ParseError(format!("cannot derive a file name from source '{}'", raw))
            })?,
        };
        if name.contains('/') || name == ".." || name == "." {
            return Err(Error::ParseError(format!("invalid source name '{}'", name)));
        }

        let extract = !matches!(kind, SourceKind::Git { .. })
            && is_archive(&name)
            && option("archive").as_deref() != Some("false");

        Ok(Self {
            raw: raw.to_string(),
            kind,
            name,
            extract,
        })
    }
}

/// Split `~key=value` options out of a source's query string
fn split_options(raw: &str) -> (String, Vec<(String, String)>) {
    let Some((base, query)) = raw.split_once('?') else {
        return (raw.to_string(), Vec::new());
    };
    let mut options = Vec::new();
    let mut kept = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        match pair.strip_prefix('~') {
            Some(opt) => {
                let (k, v) = opt.split_once('=').unwrap_or((opt, ""));
                options.push((k.to_string(), v.to_string()));
            }
            None => kept.push(pair),
        }
    }
    let base = if kept.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, kept.join("&"))
    };
    (base, options)
}

fn default_name(kind: &SourceKind) -> Option<String> {
    let name = match kind {
        SourceKind::Local(path) => path.file_name()?.to_string_lossy().into_owned(),
        SourceKind::Http(url) => url
            .path_segments()
            .and_then(|mut s| s.next_back().map(str::to_string))
            .filter(|s| !s.is_empty())
            .or_else(|| url.host_str().map(str::to_string))?,
        SourceKind::Git { url, .. } => {
            let last = url.trim_end_matches('/').rsplit('/').next()?;
            last.trim_end_matches(".git").to_string()
        }
    };
    (!name.is_empty()).then_some(name)
}

/// Whether a file name looks like an archive we unpack
pub fn is_archive(name: &str) -> bool {
    const SUFFIXES: [&str; 11] = [
        ".tar", ".tar.gz", ".tgz", ".tar.zst", ".tzst", ".tar.xz", ".txz", ".tar.bz2", ".tbz2",
        ".tbz", ".zip",
    ];
    SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Unpack `archive` into `dest`
///
/// Tarballs compressed with gzip, zstd or xz and zip files are read
/// in-process; bzip2 tarballs go through the system `tar`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let open = || {
        File::open(archive)
            .map_err(|e| Error::IoError(format!("opening {}: {}", archive.display(), e)))
    };
    let unpack = |reader: Box<dyn Read>| -> Result<()> {
        tar::Archive::new(reader)
            .unpack(dest)
            .map_err(|e| Error::IoError(format!("extracting {}: {}", name, e)))
    };

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        unpack(Box::new(flate2::read::GzDecoder::new(open()?)))
    } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
        let decoder = zstd::stream::read::Decoder::new(open()?)
            .map_err(|e| Error::IoError(format!("reading {}: {}", name, e)))?;
        unpack(Box::new(decoder))
    } else if name.ends_with(".tar") {
        unpack(Box::new(open()?))
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        unpack(Box::new(xz2::read::XzDecoder::new(open()?)))
    } else if name.ends_with(".zip") {
        let mut zip = zip::ZipArchive::new(open()?)
            .map_err(|e| Error::IoError(format!("reading {}: {}", name, e)))?;
        zip.extract(dest)
            .map_err(|e| Error::IoError(format!("extracting {}: {}", name, e)))
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz") {
        let mut cmd = Command::new("tar");
        cmd.arg("-xjf").arg(archive).arg("-C").arg(dest);
        run_tool(cmd, &name)
    } else {
        Err(Error::ParseError(format!("unknown archive format: {}", name)))
    }
}

fn run_tool(mut cmd: Command, what: &str) -> Result<()> {
    let output = cmd
        .output()
        .map_err(|e| Error::ExecFailed(format!("running {:?}: {}", cmd.get_program(), e)))?;
    if !output.status.success() {
        return Err(Error::ExecFailed(format!(
            "{:?} failed on {}: {}",
            cmd.get_program(),
            what,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Fetches a recipe's sources into SrcDir
pub struct Downloader {
    client: Client,
    concurrency: usize,
    cancel: CancelToken,
    progress: Option<ProgressSink>,
}

impl Downloader {
    pub fn new(concurrency: usize, cancel: CancelToken) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::DownloadError(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            concurrency: concurrency.max(1),
            cancel,
            progress: None,
        })
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Fetch every source into `dirs.src_dir`, verifying checksums
    ///
    /// Returns the downloaded paths in source order.
    pub fn download(
        &self,
        dirs: &Directories,
        sources: &[String],
        checksums: &[String],
    ) -> Result<Vec<PathBuf>> {
        check_lengths(sources, checksums)?;
        let (sources, checksums) = remove_duplicate_sources(sources, checksums);
        let jobs = sources
            .iter()
            .zip(&checksums)
            .map(|(s, c)| Ok((Source::parse(s, &dirs.script_dir)?, Checksum::parse(c)?)))
            .collect::<Result<Vec<_>>>()?;
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        info!("Fetching {} source(s)", jobs.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency.min(jobs.len()))
            .build()
            .map_err(|e| Error::DownloadError(format!("failed to start download pool: {}", e)))?;
        pool.install(|| {
            jobs.par_iter()
                .map(|(source, checksum)| self.fetch(source, checksum, &dirs.src_dir))
                .collect()
        })
    }

    fn fetch(&self, source: &Source, checksum: &Checksum, src_dir: &Path) -> Result<PathBuf> {
        self.cancel.check()?;
        let dest = src_dir.join(&source.name);
        self.report(&format!("Fetching {}", source.raw));

        match &source.kind {
            SourceKind::Git { url, rev } => {
                if !checksum.is_skip() {
                    return Err(Error::ParseError(format!(
                        "git source {} must use SKIP as its checksum",
                        source.raw
                    )));
                }
                self.clone_git(url, rev.as_deref(), &dest)?;
                self.report(&format!("Cloned {}", source.name));
                return Ok(dest);
            }
            SourceKind::Local(path) => {
                fs::copy(path, &dest).map_err(|e| {
                    Error::DownloadError(format!("copying {}: {}", path.display(), e))
                })?;
            }
            SourceKind::Http(url) => {
                self.fetch_http(url, &dest)?;
            }
        }

        verify(&dest, checksum, &source.name)?;
        if source.extract {
            debug!("Extracting {}", dest.display());
            extract_archive(&dest, src_dir)?;
            fs::remove_file(&dest)?;
        }
        self.report(&format!("Fetched {}", source.name));
        Ok(dest)
    }

    fn fetch_http(&self, url: &Url, dest: &Path) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.cancel.check()?;
            match self.try_fetch_http(url, dest) {
                Ok(bytes) => {
                    debug!("Downloaded {} ({} bytes)", url, bytes);
                    return Ok(());
                }
                Err(Retry::Fatal(e)) => return Err(e),
                Err(Retry::Again(e)) => {
                    if attempt >= MAX_RETRIES {
                        return Err(Error::DownloadError(format!(
                            "failed to fetch {} after {} attempts: {}",
                            url, attempt, e
                        )));
                    }
                    warn!("Download attempt {} for {} failed: {}, retrying", attempt, url, e);
                    if self
                        .cancel
                        .wait_timeout(Duration::from_millis(RETRY_DELAY_MS * attempt as u64))
                    {
                        return Err(Error::Cancelled);
                    }
                }
            }
        }
    }

    fn try_fetch_http(&self, url: &Url, dest: &Path) -> std::result::Result<u64, Retry> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| Retry::Again(e.to_string()))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(Retry::Again(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(Retry::Fatal(Error::DownloadError(format!(
                "HTTP {} from {}",
                status, url
            ))));
        }

        let mut file = File::create(dest).map_err(|e| Retry::Fatal(e.into()))?;
        let mut buffer = [0u8; STREAM_BUFFER_SIZE];
        let mut downloaded = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Retry::Fatal(Error::Cancelled));
            }
            let n = response
                .read(&mut buffer)
                .map_err(|e| Retry::Again(e.to_string()))?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])
                .map_err(|e| Retry::Fatal(e.into()))?;
            downloaded += n as u64;
        }
        Ok(downloaded)
    }

    fn clone_git(&self, url: &str, rev: Option<&str>, dest: &Path) -> Result<()> {
        let mut clone = Command::new("git");
        clone.arg("clone").arg("--quiet").arg(url).arg(dest);
        run_tool(clone, url)?;
        if let Some(rev) = rev {
            self.cancel.check()?;
            let mut checkout = Command::new("git");
            checkout
                .arg("-C")
                .arg(dest)
                .args(["checkout", "--quiet", rev]);
            run_tool(checkout, url)?;
        }
        Ok(())
    }

    fn report(&self, line: &str) {
        info!("{}", line);
        if let Some(sink) = &self.progress {
            if let Ok(mut out) = sink.lock() {
                let _ = writeln!(out, "{}", line);
            }
        }
    }
}

enum Retry {
    Again(String),
    Fatal(Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_checksum_forms() {
        assert_eq!(Checksum::parse("SKIP").unwrap(), Checksum::Skip);
        assert_eq!(Checksum::parse("skip").unwrap(), Checksum::Skip);
        let sha = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert_eq!(
            Checksum::parse(sha).unwrap(),
            Checksum::parse(&format!("sha256:{}", sha)).unwrap()
        );
        assert!(matches!(
            Checksum::parse("md5:d41d8cd98f00b204e9800998ecf8427e").unwrap(),
            Checksum::Digest { algo: HashAlgo::Md5, .. }
        ));
        assert!(Checksum::parse("crc32:abcd").is_err());
        assert!(Checksum::parse("sha256:zz").is_err());
        assert!(Checksum::parse("sha256:abcd").is_err());
    }

    #[test]
    fn test_remove_duplicate_sources_prefers_real_checksum() {
        let (sources, checksums) = remove_duplicate_sources(
            &strings(&["a", "b", "c", "a"]),
            &strings(&["skip", "skip", "skip", "1"]),
        );
        assert_eq!(sources, strings(&["a", "b", "c"]));
        assert_eq!(checksums, strings(&["1", "skip", "skip"]));
    }

    #[test]
    fn test_length_mismatch() {
        assert!(matches!(
            check_lengths(&strings(&["a", "b"]), &strings(&["SKIP"])),
            Err(Error::ChecksumLengthMismatch { sources: 2, checksums: 1 })
        ));
    }

    #[test]
    fn test_parse_sources() {
        let dir = Path::new("/recipes/hello");
        let src = Source::parse("https://example.com/dl/hello-1.0.tar.gz", dir).unwrap();
        assert_eq!(src.name, "hello-1.0.tar.gz");
        assert!(src.extract);

        let src = Source::parse(
            "https://example.com/get?id=4&~name=tool.tar.gz&~archive=false",
            dir,
        )
        .unwrap();
        assert_eq!(src.name, "tool.tar.gz");
        assert!(!src.extract);
        match src.kind {
            SourceKind::Http(url) => assert_eq!(url.as_str(), "https://example.com/get?id=4"),
            other => panic!("unexpected {:?}", other),
        }

        let src = Source::parse("hello.patch", dir).unwrap();
        assert_eq!(src.kind, SourceKind::Local(dir.join("hello.patch")));
        let src = Source::parse("file://files/a.conf", dir).unwrap();
        assert_eq!(src.kind, SourceKind::Local(dir.join("files/a.conf")));

        let src = Source::parse("git+https://github.com/x/tool.git?~rev=v1.2", dir).unwrap();
        assert_eq!(src.name, "tool");
        assert_eq!(
            src.kind,
            SourceKind::Git {
                url: "https://github.com/x/tool.git".into(),
                rev: Some("v1.2".into())
            }
        );
        assert!(Source::parse("ftp://example.com/a", dir).is_err());
    }

    fn tar_with(path: &str, data: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, data).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_extract_xz_tarball() {
        use std::io::Write;

        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("tool-1.0.tar.xz");
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(&tar_with("tool-1.0/configure", b"#!/bin/sh\n")).unwrap();
        fs::write(&archive, encoder.finish().unwrap()).unwrap();

        let dest = tmp.path().join("src");
        fs::create_dir_all(&dest).unwrap();
        extract_archive(&archive, &dest).unwrap();
        assert_eq!(
            fs::read(dest.join("tool-1.0/configure")).unwrap(),
            b"#!/bin/sh\n"
        );
    }

    #[test]
    fn test_extract_zip() {
        use std::io::Write;

        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("assets.zip");
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("assets/icon.svg", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<svg/>").unwrap();
        fs::write(&archive, writer.finish().unwrap().into_inner()).unwrap();

        let dest = tmp.path().join("src");
        fs::create_dir_all(&dest).unwrap();
        extract_archive(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("assets/icon.svg")).unwrap(), b"<svg/>");

        let bogus = tmp.path().join("notes.rar");
        fs::write(&bogus, b"x").unwrap();
        assert!(matches!(
            extract_archive(&bogus, &dest),
            Err(Error::ParseError(_))
        ));
    }

    #[test]
    fn test_local_source_verified_and_extracted() {
        let tmp = tempfile::tempdir().unwrap();
        let script_dir = tmp.path().join("recipe");
        fs::create_dir_all(&script_dir).unwrap();

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(3);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "hello/README", &b"hi\n"[..]).unwrap();
        let tarball = builder.into_inner().unwrap();
        fs::write(script_dir.join("hello.tar"), &tarball).unwrap();
        fs::write(script_dir.join("notes.txt"), b"notes").unwrap();

        let dirs = Directories::new(&tmp.path().join("pkgs"), "hello", &script_dir);
        dirs.prepare().unwrap();

        let sha = hex::encode(Sha256::digest(&tarball));
        let sink: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let downloader = Downloader::new(2, CancelToken::new())
            .unwrap()
            .with_progress(sink.clone());
        downloader
            .download(
                &dirs,
                &strings(&["hello.tar", "file://notes.txt"]),
                &[sha, "SKIP".to_string()],
            )
            .unwrap();

        assert_eq!(fs::read(dirs.src_dir.join("hello/README")).unwrap(), b"hi\n");
        assert!(!dirs.src_dir.join("hello.tar").exists());
        assert_eq!(fs::read(dirs.src_dir.join("notes.txt")).unwrap(), b"notes");
        let progress = String::from_utf8(sink.lock().unwrap().clone()).unwrap();
        assert!(progress.contains("Fetched notes.txt"));
    }

    #[test]
    fn test_local_source_checksum_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"data").unwrap();
        let dirs = Directories::new(&tmp.path().join("pkgs"), "a", tmp.path());
        dirs.prepare().unwrap();

        let wrong = "0".repeat(64);
        let err = Downloader::new(1, CancelToken::new())
            .unwrap()
            .download(&dirs, &strings(&["a.txt"]), &[wrong])
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }
}
