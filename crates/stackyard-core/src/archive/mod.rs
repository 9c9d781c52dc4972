// ── Site archives ──
//
// Export packs a site's database dump and content tree into one tar.gz;
// bootstrap unpacks a downloaded bundle into an empty content directory.
// Both directions go through the same guarded extractor.

pub mod bootstrap;
pub mod export;

use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use tar::{Archive, EntryType};
use tracing::debug;

use crate::error::CoreError;

pub use bootstrap::{BootstrapOutcome, bootstrap_content, fetch_bundle};
pub use export::{
    ExportMetadata, ExportReport, ExportedSite, build_archive, read_export_metadata,
    unpack_export, write_export,
};

/// Counters from one extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub dirs: usize,
    pub files: usize,
    /// Links, devices and entries that would land outside the target.
    pub skipped: usize,
}

/// Keep only plain path components; anything that could climb out of the
/// target (`..`, absolute roots, drive prefixes) disqualifies the entry.
fn confined(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

/// Unpack directories and regular files from `archive` under `dest`.
///
/// `relocate` maps an entry's path to its path relative to `dest`, or
/// `None` to drop the entry.
pub(crate) fn extract_entries<R: Read>(
    archive: &mut Archive<R>,
    dest: &Path,
    relocate: impl Fn(&Path) -> Option<PathBuf>,
) -> io::Result<ExtractStats> {
    let mut stats = ExtractStats::default();
    fs::create_dir_all(dest)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.into_owned();
        let Some(rel) = relocate(&raw).and_then(|p| confined(&p)) else {
            debug!(path = %raw.display(), "skipping archive entry");
            stats.skipped += 1;
            continue;
        };
        let target = dest.join(&rel);

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target)?;
                stats.dirs += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out = fs::File::create(&target)?;
                io::copy(&mut entry, &mut out)?;
                if let Ok(mode) = entry.header().mode() {
                    apply_mode(&target, mode)?;
                }
                stats.files += 1;
            }
            other => {
                debug!(path = %raw.display(), kind = ?other, "skipping non-regular entry");
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o755))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

pub(crate) fn archive_error(context: &str, e: impl std::fmt::Display) -> CoreError {
    CoreError::Archive {
        message: format!("{context}: {e}"),
    }
}

/// Run blocking archive work off the async runtime.
pub(crate) async fn blocking<T, F>(context: &'static str, work: F) -> Result<T, CoreError>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CoreError::Internal(format!("{context} task failed: {e}")))?
        .map_err(|e| archive_error(context, e))
}
