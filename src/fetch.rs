//! Source fetching: download, checksum verification, unpacking.
//!
//! A checksum mismatch is fatal and aborts the recipe before any build step
//! runs.

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use log::{debug, info};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::formula::Metadata;
use crate::http::HttpClient;
use crate::runtime::Runtime;

/// A validated hex-encoded SHA-256 digest (64 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A digest literal baked into a recipe. A malformed literal is a
    /// programming error and panics; every recipe's metadata is covered by
    /// its own tests.
    pub fn from_static(value: &str) -> Self {
        match Self::try_from(value) {
            Ok(digest) => digest,
            Err(e) => panic!("{e:#}"),
        }
    }
}

impl TryFrom<&str> for Sha256Digest {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self> {
        if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("Invalid SHA-256 digest: {value:?}");
        }
        Ok(Self(value.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for Sha256Digest {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::try_from(value.as_str())
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The archive file name a source URL points at.
pub fn archive_name(url: &str) -> Result<&str> {
    url.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .with_context(|| format!("Cannot derive a file name from {url:?}"))
}

/// Download a formula's source archive into `dest_dir` and verify its
/// checksum. Returns the archive path.
#[tracing::instrument(skip(runtime, client, metadata, dest_dir))]
pub async fn fetch_source(
    runtime: &dyn Runtime,
    client: &HttpClient,
    metadata: &Metadata,
    dest_dir: &Path,
) -> Result<PathBuf> {
    runtime
        .create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create {}", dest_dir.display()))?;

    let archive = dest_dir.join(archive_name(&metadata.url)?);
    info!("Fetching {} from {}", metadata.name, metadata.url);

    client
        .download_file(&metadata.url, || runtime.create_file(&archive))
        .await
        .with_context(|| format!("Failed to download {}", metadata.url))?;

    verify_checksum(runtime, &archive, &metadata.sha256)?;
    Ok(archive)
}

/// Compare a file's SHA-256 digest against the expected one.
pub fn verify_checksum(
    runtime: &dyn Runtime,
    archive: &Path,
    expected: &Sha256Digest,
) -> Result<()> {
    let mut reader = runtime.open(archive)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)
        .with_context(|| format!("Failed to hash {}", archive.display()))?;
    let actual = hex::encode(hasher.finalize());

    if actual != expected.as_str() {
        bail!(
            "Checksum mismatch for {}: expected {}, actual {}",
            archive.display(),
            expected,
            actual
        );
    }
    debug!("Checksum verified for {}", archive.display());
    Ok(())
}

/// Unpack a gzipped tarball into `dest_dir` and return the unpacked source
/// root (the archive's single top-level directory).
///
/// Other formats (the engine ships as `.tar.bz2`) are not unpacked here;
/// stage them yourself and point `install --build-dir` at the result.
#[tracing::instrument(skip(runtime))]
pub fn unpack(runtime: &dyn Runtime, archive: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("No file name in {}", archive.display()))?;

    if !(name.ends_with(".tar.gz") || name.ends_with(".tgz")) {
        bail!(
            "Cannot unpack {name}: only gzipped tarballs are supported; \
             stage the source tree manually and pass --build-dir"
        );
    }

    runtime
        .create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create {}", dest_dir.display()))?;

    let reader = runtime.open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(reader));
    tar.unpack(dest_dir)
        .with_context(|| format!("Failed to unpack {}", archive.display()))?;

    // The conventional single top-level source directory.
    let mut entries = runtime.read_dir(dest_dir)?;
    entries.retain(|p| runtime.is_dir(p));
    match entries.as_slice() {
        [root] => Ok(root.clone()),
        _ => bail!(
            "Expected a single source directory in {}, found {}",
            dest_dir.display(),
            entries.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_path(name).unwrap();
            header.set_cksum();
            builder.append(&header, content.as_bytes()).unwrap();
        }
        let tar = builder.into_inner().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_sha256_digest_validation() {
        assert!(Sha256Digest::try_from("a".repeat(64)).is_ok());
        assert!(Sha256Digest::try_from("short").is_err());
        assert!(Sha256Digest::try_from("g".repeat(64).as_str()).is_err());

        // Uppercase input is normalized.
        let digest = Sha256Digest::try_from("A".repeat(64)).unwrap();
        assert_eq!(digest.as_str(), "a".repeat(64));
    }

    #[test]
    fn test_archive_name_from_url() {
        assert_eq!(
            archive_name("https://ftp.postgresql.org/pub/source/v16.3/postgresql-16.3.tar.bz2")
                .unwrap(),
            "postgresql-16.3.tar.bz2"
        );
        assert!(archive_name("https://example.org/").is_err());
    }

    #[test]
    fn test_verify_checksum_detects_mismatch() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let archive = dir.path().join("src.tar.gz");
        std::fs::write(&archive, b"payload").unwrap();

        let mut hasher = Sha256::new();
        hasher.update(b"payload");
        let good = Sha256Digest::try_from(hex::encode(hasher.finalize())).unwrap();
        verify_checksum(&runtime, &archive, &good).unwrap();

        let bad = Sha256Digest::try_from("0".repeat(64)).unwrap();
        let err = verify_checksum(&runtime, &archive, &bad).unwrap_err();
        let msg = err.to_string();
        // Literal expected and actual digests are part of the report.
        assert!(msg.contains(&"0".repeat(64)));
        assert!(msg.contains(good.as_str()));
    }

    #[test]
    fn test_unpack_returns_source_root() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let archive = dir.path().join("postgis-3.4.2.tar.gz");
        std::fs::write(
            &archive,
            tar_gz(&[("postgis-3.4.2/configure", "#!/bin/sh\n")]),
        )
        .unwrap();

        let root = unpack(&runtime, &archive, &dir.path().join("build")).unwrap();
        assert_eq!(root.file_name().unwrap(), "postgis-3.4.2");
        assert!(root.join("configure").exists());
    }

    #[test]
    fn test_unpack_rejects_unsupported_formats() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let archive = dir.path().join("postgresql-16.3.tar.bz2");
        std::fs::write(&archive, b"").unwrap();

        let err = unpack(&runtime, &archive, dir.path()).unwrap_err();
        assert!(err.to_string().contains("--build-dir"));
    }
}
