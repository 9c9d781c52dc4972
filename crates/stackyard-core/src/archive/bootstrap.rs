// ── Content bootstrap ──
//
// Seed an empty content directory from a `.tar.gz` bundle (a CMS release
// tarball, typically). Bundles wrap everything in one top-level directory;
// that directory is stripped so its contents land directly in the target.

use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ExtractStats, blocking, extract_entries};
use crate::config::ContentSource;
use crate::error::CoreError;
use crate::fs;

/// What a bootstrap attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The target already had content.
    Skipped,
    Extracted(ExtractStats),
}

/// Load a bundle into memory from the network or the local filesystem.
pub async fn fetch_bundle(
    source: &ContentSource,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, CoreError> {
    match source {
        ContentSource::File(path) => tokio::fs::read(path)
            .await
            .map_err(|e| CoreError::io(path, e)),
        ContentSource::Url(url) => {
            let download = async {
                let client = reqwest::Client::builder()
                    .user_agent(concat!("stackyard/", env!("CARGO_PKG_VERSION")))
                    .build()?;
                let response = client.get(url.clone()).send().await?.error_for_status()?;
                response.bytes().await
            };
            let bytes = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CoreError::Cancelled),
                res = download => res.map_err(|e| CoreError::Download {
                    url: url.to_string(),
                    message: e.to_string(),
                })?,
            };
            debug!(url = %url, bytes = bytes.len(), "bundle downloaded");
            Ok(bytes.to_vec())
        }
    }
}

/// Fill `dest` from `source` if `dest` is empty or missing.
pub async fn bootstrap_content(
    source: &ContentSource,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<BootstrapOutcome, CoreError> {
    if !fs::dir_is_empty(dest).await? {
        debug!(dest = %dest.display(), "content present; bootstrap skipped");
        return Ok(BootstrapOutcome::Skipped);
    }

    let bundle = fetch_bundle(source, cancel).await?;
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }

    let target = dest.to_path_buf();
    let stats = blocking("extract bundle", move || extract_bundle(&bundle, &target)).await?;
    info!(
        dest = %dest.display(),
        files = stats.files,
        dirs = stats.dirs,
        skipped = stats.skipped,
        "content bootstrapped"
    );
    Ok(BootstrapOutcome::Extracted(stats))
}

/// Extract a gzip tarball held in memory, stripping its top-level
/// directory when every entry shares one.
pub fn extract_bundle(bundle: &[u8], dest: &Path) -> io::Result<ExtractStats> {
    let strip = common_root(bundle)?;
    let mut archive = Archive::new(GzDecoder::new(bundle));
    extract_entries(&mut archive, dest, |path| {
        if !strip {
            return Some(path.to_path_buf());
        }
        let mut parts = path
            .components()
            .skip_while(|c| matches!(c, Component::CurDir));
        parts.next()?;
        let rest: PathBuf = parts.collect();
        (!rest.as_os_str().is_empty()).then_some(rest)
    })
}

/// Whether all entries live under one top-level directory.
fn common_root(bundle: &[u8]) -> io::Result<bool> {
    let mut archive = Archive::new(GzDecoder::new(bundle));
    let mut roots = BTreeSet::new();
    let mut nested = false;
    for entry in archive.entries()? {
        let entry = entry?;
        let path = entry.path()?;
        let mut parts = path
            .components()
            .filter(|c| !matches!(c, Component::CurDir));
        if let Some(first) = parts.next() {
            roots.insert(first.as_os_str().to_owned());
            nested |= parts.next().is_some();
        }
    }
    Ok(roots.len() == 1 && nested)
}

#[cfg(test)]
mod tests {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tar::{Builder, EntryType, Header};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn file_header(size: usize) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size as u64);
        header.set_mode(0o644);
        header
    }

    /// A bundle shaped like a CMS release: everything under `wordpress/`,
    /// plus one hostile entry and one symlink.
    fn bundle() -> Vec<u8> {
        let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

        let mut dir = Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_mode(0o755);
        dir.set_size(0);
        builder
            .append_data(&mut dir, "wordpress/wp-content/", io::empty())
            .expect("dir");

        let body = b"<?php // index";
        builder
            .append_data(&mut file_header(body.len()), "wordpress/index.php", &body[..])
            .expect("file");

        let evil = b"owned";
        let mut hostile = file_header(evil.len());
        let name = b"wordpress/../../evil.txt";
        hostile.as_old_mut().name[..name.len()].copy_from_slice(name);
        hostile.set_cksum();
        builder.append(&hostile, &evil[..]).expect("hostile");

        let mut link = Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_size(0);
        builder
            .append_link(&mut link, "wordpress/escape", "/etc")
            .expect("link");

        builder
            .into_inner()
            .expect("tar")
            .finish()
            .expect("gzip")
    }

    #[test]
    fn strips_top_dir_and_skips_unsafe_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("site");

        let stats = extract_bundle(&bundle(), &dest).expect("extract");
        assert_eq!(stats.files, 1);
        assert_eq!(stats.dirs, 1);
        assert_eq!(stats.skipped, 2);
        assert!(dest.join("index.php").is_file());
        assert!(dest.join("wp-content").is_dir());
        assert!(!dest.join("escape").exists());
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn downloads_and_extracts_into_empty_dir() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bundle()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("site");
        let source = ContentSource::parse(&format!("{}/latest.tar.gz", server.uri()));

        let outcome = bootstrap_content(&source, &dest, &CancellationToken::new())
            .await
            .expect("bootstrap");
        assert!(matches!(outcome, BootstrapOutcome::Extracted(s) if s.files == 1));
        assert!(dest.join("index.php").is_file());
    }

    #[tokio::test]
    async fn leaves_populated_dir_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("keep.txt"), "mine").expect("seed");
        let source = ContentSource::File(dir.path().join("missing.tar.gz"));

        let outcome = bootstrap_content(&source, dir.path(), &CancellationToken::new())
            .await
            .expect("skip");
        assert_eq!(outcome, BootstrapOutcome::Skipped);
    }

    #[tokio::test]
    async fn http_errors_surface_as_download_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let source = ContentSource::parse(&format!("{}/nope.tar.gz", server.uri()));
        let err = bootstrap_content(&source, &dir.path().join("site"), &CancellationToken::new())
            .await
            .expect_err("404");
        assert!(matches!(err, CoreError::Download { .. }));
    }
}
