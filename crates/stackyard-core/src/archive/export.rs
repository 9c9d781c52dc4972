// ── Site export ──
//
// Archive layout (gzip-compressed tar):
//
//   metadata.json     site descriptor + export timestamp
//   database.sql      mysqldump of the site database
//   files/            the content dir itself
//   files/<rel>/      every directory under the content dir
//   files/<rel>       every regular file under the content dir

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use stackyard_runtime::RuntimeGateway;
use tar::{Archive, Builder, EntryType, Header};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::{blocking, extract_entries};
use crate::error::CoreError;
use crate::model::{Site, SiteId};
use crate::stack::{DB_NAME, DB_USER};

pub const METADATA_ENTRY: &str = "metadata.json";
pub const DATABASE_ENTRY: &str = "database.sql";
pub const FILES_PREFIX: &str = "files";

const FORMAT_VERSION: u32 = 1;

/// The non-secret parts of a site, as recorded in an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedSite {
    pub id: SiteId,
    pub name: String,
    pub slug: String,
    pub domain: String,
    pub public_dir: String,
    pub php_version: String,
    pub database_version: String,
    pub cache_version: String,
}

impl From<&Site> for ExportedSite {
    fn from(site: &Site) -> Self {
        Self {
            id: site.id,
            name: site.name.clone(),
            slug: site.slug.clone(),
            domain: site.domain.clone(),
            public_dir: site.public_dir.clone(),
            php_version: site.php_version.clone(),
            database_version: site.database_version.clone(),
            cache_version: site.cache_version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub format_version: u32,
    pub site: ExportedSite,
    pub exported_at: DateTime<Utc>,
}

impl ExportMetadata {
    pub fn new(site: &Site) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            site: ExportedSite::from(site),
            exported_at: Utc::now(),
        }
    }
}

/// Summary of a written archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub bytes: u64,
    pub dirs: usize,
    pub files: usize,
}

// ── Database dump ────────────────────────────────────────────────────

/// Dump the site database from inside its running database container.
///
/// The password travels in `MYSQL_PWD`; only stdout becomes the dump.
pub async fn dump_database(
    runtime: &dyn RuntimeGateway,
    container: &str,
    password: &str,
    cancel: &CancellationToken,
) -> Result<String, CoreError> {
    let cmd = vec![
        "mysqldump".to_owned(),
        "--single-transaction".into(),
        "-u".into(),
        DB_USER.into(),
        DB_NAME.into(),
    ];
    let env = [format!("MYSQL_PWD={password}")];
    let out = runtime.exec_with_env(container, &cmd, &env, cancel).await?;
    if !out.success() {
        return Err(CoreError::ExecFailed {
            container: container.to_owned(),
            command: cmd.join(" "),
            exit_code: out.exit_code,
            output: out.output,
        });
    }
    if !out.stderr.is_empty() {
        debug!(container, stderr = %out.stderr.trim_end(), "mysqldump diagnostics");
    }
    debug!(container, bytes = out.stdout.len(), "database dumped");
    Ok(out.stdout)
}

// ── Writing ──────────────────────────────────────────────────────────

/// Write an archive to `dest` via a sibling temp file renamed into place.
pub async fn write_export(
    dest: &Path,
    metadata: ExportMetadata,
    dump: String,
    files_dir: &Path,
) -> Result<ExportReport, CoreError> {
    let dest = dest.to_path_buf();
    let files_dir = files_dir.to_path_buf();

    let report = blocking("export", move || {
        let parent = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let tmp = parent.join(format!(".stackyard-export.{}.tmp", Uuid::new_v4().simple()));

        let written = File::create(&tmp).and_then(|file| {
            let (file, dirs, files) = build_archive(file, &metadata, &dump, &files_dir)?;
            file.sync_all()?;
            Ok((dirs, files))
        });
        let (dirs, files) = match written {
            Ok(counts) => counts,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&tmp, &dest) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        let bytes = fs::metadata(&dest)?.len();
        Ok(ExportReport {
            path: dest,
            bytes,
            dirs,
            files,
        })
    })
    .await?;

    info!(
        path = %report.path.display(),
        bytes = report.bytes,
        files = report.files,
        "site exported"
    );
    Ok(report)
}

/// Stream an archive into `writer`. Returns the writer and the number of
/// directories and files taken from `files_dir`.
pub fn build_archive<W: Write>(
    writer: W,
    metadata: &ExportMetadata,
    dump: &str,
    files_dir: &Path,
) -> io::Result<(W, usize, usize)> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut archive = Builder::new(encoder);
    let mtime = u64::try_from(metadata.exported_at.timestamp()).unwrap_or_default();

    let json = serde_json::to_vec_pretty(metadata).map_err(io::Error::other)?;
    append_bytes(&mut archive, METADATA_ENTRY, &json, mtime)?;
    append_bytes(&mut archive, DATABASE_ENTRY, dump.as_bytes(), mtime)?;

    append_dir(&mut archive, &format!("{FILES_PREFIX}/"), mtime)?;
    let mut entries = Vec::new();
    walk(files_dir, "", &mut entries)?;
    let (mut dirs, mut files) = (1, 0);
    for (path, rel, is_dir) in entries {
        if is_dir {
            append_dir(&mut archive, &format!("{FILES_PREFIX}/{rel}/"), mtime)?;
            dirs += 1;
        } else {
            archive.append_path_with_name(&path, format!("{FILES_PREFIX}/{rel}"))?;
            files += 1;
        }
    }

    let encoder = archive.into_inner()?;
    Ok((encoder.finish()?, dirs, files))
}

fn append_bytes<W: Write>(
    archive: &mut Builder<W>,
    name: &str,
    data: &[u8],
    mtime: u64,
) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    archive.append_data(&mut header, name, data)
}

fn append_dir<W: Write>(archive: &mut Builder<W>, name: &str, mtime: u64) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_mode(0o755);
    header.set_size(0);
    header.set_mtime(mtime);
    archive.append_data(&mut header, name, io::empty())
}

/// Depth-first, name-ordered listing of directories and regular files.
/// Symlinks and special files are left out.
fn walk(dir: &Path, rel: &str, out: &mut Vec<(PathBuf, String, bool)>) -> io::Result<()> {
    let mut children: Vec<_> = match fs::read_dir(dir) {
        Ok(rd) => rd.collect::<io::Result<_>>()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound && rel.is_empty() => return Ok(()),
        Err(e) => return Err(e),
    };
    children.sort_by_key(fs::DirEntry::file_name);

    for child in children {
        let name = child.file_name().to_string_lossy().into_owned();
        let child_rel = if rel.is_empty() {
            name
        } else {
            format!("{rel}/{name}")
        };
        let kind = child.file_type()?;
        if kind.is_dir() {
            out.push((child.path(), child_rel.clone(), true));
            walk(&child.path(), &child_rel, out)?;
        } else if kind.is_file() {
            out.push((child.path(), child_rel, false));
        }
    }
    Ok(())
}

// ── Reading ──────────────────────────────────────────────────────────

/// Read `metadata.json` from an export without unpacking the rest.
pub async fn read_export_metadata(path: &Path) -> Result<ExportMetadata, CoreError> {
    let path = path.to_path_buf();
    blocking("read export metadata", move || {
        let mut archive = Archive::new(GzDecoder::new(File::open(&path)?));
        for entry in archive.entries()? {
            let entry = entry?;
            if entry.path()?.as_os_str() == METADATA_ENTRY {
                return serde_json::from_reader(entry).map_err(io::Error::other);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} has no {METADATA_ENTRY}", path.display()),
        ))
    })
    .await
}

/// Unpack a whole export under `dest` and return its metadata.
pub async fn unpack_export(archive: &Path, dest: &Path) -> Result<ExportMetadata, CoreError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    blocking("unpack export", move || {
        let mut tar = Archive::new(GzDecoder::new(File::open(&archive)?));
        extract_entries(&mut tar, &dest, |p| Some(p.to_path_buf()))?;
        let raw = fs::read(dest.join(METADATA_ENTRY))?;
        serde_json::from_slice(&raw).map_err(io::Error::other)
    })
    .await
}
