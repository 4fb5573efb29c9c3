//! Writes a finished export to disk.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::info;

use crate::domain::CorpusExport;
use crate::error::Result;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Serializes `export` as compact JSON to `destination`.
///
/// Missing parent directories are created. The document is rendered in
/// memory, written to a temporary file next to `destination` and renamed
/// into place, so readers never observe a partial file. Returns the number
/// of bytes written.
pub fn write(export: &CorpusExport, destination: &Path) -> Result<u64> {
    let bytes = serde_json::to_vec(export)?;

    let parent = match destination.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut staging = NamedTempFile::new_in(parent)?;
    staging.write_all(&bytes)?;
    staging.flush()?;
    staging.persist(destination).map_err(|e| e.error)?;

    let size = bytes.len() as u64;
    info!(
        path = %destination.display(),
        size_mb = format!("{:.1}", size as f64 / BYTES_PER_MB),
        "Export written"
    );
    Ok(size)
}
