//! Release archive download and extraction.
//!
//! Archives are streamed to a temporary file, then unpacked into a temporary
//! directory. The format is sniffed from the file header (zip, gzip'd tar or
//! plain tar) because feed URLs rarely carry an extension.

use crate::error::{AidoError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    Tar,
}

/// Download `url` into `dest`, returning the number of bytes written.
///
/// `timeout` bounds the whole transfer.
///
/// # Errors
///
/// Returns [`AidoError::NetworkUnavailable`] if the request or the transfer
/// fails and [`AidoError::Filesystem`] if `dest` cannot be written.
pub fn download(url: &str, dest: &Path, timeout: Duration) -> Result<u64> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(15))
        .timeout(timeout)
        .build();

    tracing::info!("downloading update from {url}");
    let resp = agent
        .get(url)
        .set("User-Agent", concat!("aido/", env!("CARGO_PKG_VERSION"), " (self-update)"))
        .call()
        .map_err(|e| AidoError::NetworkUnavailable(format!("download failed: {e}")))?;

    let total_bytes = resp
        .header("content-length")
        .and_then(|v| v.parse::<u64>().ok());

    let pb = ProgressBar::new(total_bytes.unwrap_or(0));
    if let Ok(style) =
        ProgressStyle::with_template("  {msg} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec}")
    {
        pb.set_style(style);
    }
    pb.set_message("downloading update");

    let mut file = std::fs::File::create(dest).map_err(|e| {
        AidoError::Filesystem(format!("cannot create {}: {e}", dest.display()))
    })?;
    let mut reader = resp.into_reader();
    let mut buf = [0u8; 64 * 1024];
    let mut written: u64 = 0;
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| AidoError::NetworkUnavailable(format!("download read error: {e}")))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(|e| {
            AidoError::Filesystem(format!("download write failed: {e}"))
        })?;
        pb.inc(n as u64);
        written += n as u64;
    }
    file.flush()?;
    pb.finish_and_clear();

    tracing::debug!(bytes = written, "download complete");
    Ok(written)
}

/// Identify the archive format from its first bytes.
///
/// # Errors
///
/// Returns [`AidoError::MalformedRemoteData`] for anything else.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat> {
    let mut header = [0u8; 512];
    let mut file = std::fs::File::open(path)?;
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    let header = &header[..filled];

    if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
        Ok(ArchiveFormat::Zip)
    } else if header.starts_with(&[0x1f, 0x8b]) {
        Ok(ArchiveFormat::TarGz)
    } else if header.len() >= 262 && &header[257..262] == b"ustar" {
        Ok(ArchiveFormat::Tar)
    } else {
        Err(AidoError::MalformedRemoteData(
            "download is not a zip or tar archive".to_owned(),
        ))
    }
}

/// Unpack `archive` into `output_dir`, skipping entries that would escape it.
///
/// # Errors
///
/// Returns an error if the archive is unreadable or an entry cannot be
/// written.
pub fn unpack(archive: &Path, output_dir: &Path) -> Result<()> {
    let format = detect_format(archive)?;
    let file = std::fs::File::open(archive)?;
    std::fs::create_dir_all(output_dir)?;

    match format {
        ArchiveFormat::Zip => extract_zip(file, output_dir),
        ArchiveFormat::TarGz => {
            let decoder = flate2::read::GzDecoder::new(file);
            unpack_tar_archive(&mut tar::Archive::new(decoder), output_dir)
        }
        ArchiveFormat::Tar => unpack_tar_archive(&mut tar::Archive::new(file), output_dir),
    }
}

fn is_safe_relative_path(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && !path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

fn extract_zip<R: Read + Seek>(reader: R, output_dir: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| AidoError::MalformedRemoteData(format!("bad zip archive: {e}")))?;

    for i in 0..archive.len() {
        let mut f = archive
            .by_index(i)
            .map_err(|e| AidoError::MalformedRemoteData(format!("bad zip entry: {e}")))?;
        let Some(raw_name) = f.enclosed_name().map(|p| p.to_path_buf()) else {
            continue;
        };
        if !is_safe_relative_path(&raw_name) {
            continue;
        }
        let outpath = output_dir.join(raw_name);
        if f.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&outpath)?;
        std::io::copy(&mut f, &mut out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = f.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode & 0o777))?;
            }
        }
    }
    Ok(())
}

fn unpack_tar_archive<R: Read>(archive: &mut tar::Archive<R>, output_dir: &Path) -> Result<()> {
    let entries = archive
        .entries()
        .map_err(|e| AidoError::MalformedRemoteData(format!("bad tar archive: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| AidoError::MalformedRemoteData(format!("bad tar entry: {e}")))?;
        let kind = entry.header().entry_type();
        if kind.is_pax_global_extensions() {
            continue;
        }
        let path = entry.path()?.to_path_buf();
        // Links could point later entries outside `output_dir`.
        if kind.is_symlink() || kind.is_hard_link() {
            tracing::debug!(path = %path.display(), "skipping link entry in release archive");
            continue;
        }
        if !is_safe_relative_path(&path) {
            continue;
        }
        if !entry.unpack_in(output_dir)? {
            tracing::debug!(path = %path.display(), "skipping archive entry outside unpack dir");
        }
    }
    Ok(())
}

/// Directory holding the release files inside an unpacked archive.
///
/// Source archives wrap everything in a single top-level directory; when
/// that is all there is, it is the root.
pub fn release_root(unpacked: &Path) -> Result<PathBuf> {
    let mut entries = std::fs::read_dir(unpacked)?
        .filter_map(|e| e.ok())
        .collect::<Vec<_>>();

    if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
        if let Some(only) = entries.pop() {
            return Ok(only.path());
        }
    }
    Ok(unpacked.to_path_buf())
}
