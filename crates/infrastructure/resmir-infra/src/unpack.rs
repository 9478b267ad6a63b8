use camino::Utf8Path;
use std::fs::File;
use std::io;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt archive: {0}")]
    Zip(String),
}

/// Extract a ZIP archive into `dest`. Entries that would escape `dest`
/// (absolute paths, parent-dir components) are rejected as corrupt.
/// Returns the number of files written.
pub fn extract_zip(archive: &Utf8Path, dest: &Utf8Path) -> Result<usize, UnpackError> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| UnpackError::Zip(e.to_string()))?;

    let mut written = 0;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| UnpackError::Zip(e.to_string()))?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(UnpackError::Zip(format!(
                "entry '{}' escapes the extraction directory",
                entry.name()
            )));
        };
        let out_path = dest.as_std_path().join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        written += 1;
    }
    debug!(%archive, %dest, files = written, "extracted archive");
    Ok(written)
}
