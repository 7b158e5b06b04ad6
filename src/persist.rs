//! Write-then-rename helpers for every persisted artifact
//!
//! Output goes to a temporary file in the destination directory and is only
//! renamed over the target once fully written, so a failed run never leaves
//! a truncated report or marker behind.
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{QcError, QcResult};

/// Atomically replace `path` with whatever `fill` writes
pub fn write_atomic<P, F>(path: P, fill: F) -> QcResult<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut dyn Write) -> QcResult<()>,
{
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| QcError::persistence(dir, e))?;

    let temp = NamedTempFile::new_in(dir).map_err(|e| QcError::persistence(dir, e))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        fill(&mut writer)?;
        writer.flush().map_err(|e| QcError::persistence(path, e))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|e| QcError::persistence(path, e))?;
    temp.persist(path)
        .map_err(|e| QcError::persistence(path, e.error))?;
    Ok(())
}

/// Atomically write a string
pub fn write_string_atomic<P: AsRef<Path>>(path: P, contents: &str) -> QcResult<()> {
    let target = path.as_ref().to_path_buf();
    write_atomic(&target, |w| {
        w.write_all(contents.as_bytes())
            .map_err(|e| QcError::persistence(&target, e))
    })
}
