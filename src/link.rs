//! Expose passed genomes in the run's `passed/` directory
use anyhow::{Context, Result};
use log::{debug, warn};
use std::io::ErrorKind;
use std::path::Path;

use crate::genome::{genome_id, GenomeFile};

/// Hard-link each passed genome into `dest`, copying when linking is not
/// possible (e.g. across filesystems). Existing entries are left alone and
/// genomes no longer in `passed` are removed.
///
/// Returns the number of new files placed.
pub fn link_passed(genomes: &[GenomeFile], passed: &[&str], dest: &Path) -> Result<usize> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    prune_stale(passed, dest)?;

    let mut placed = 0;
    for genome in genomes.iter().filter(|g| passed.contains(&g.id.as_str())) {
        let Some(file_name) = genome.path.file_name() else {
            continue;
        };
        let target = dest.join(file_name);
        match std::fs::hard_link(&genome.path, &target) {
            Ok(()) => placed += 1,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{} already linked", target.display());
            }
            Err(e) => {
                warn!(
                    "Hard link of {} failed ({e}), copying instead",
                    genome.path.display()
                );
                std::fs::copy(&genome.path, &target).with_context(|| {
                    format!("Failed to copy {} to {}", genome.path.display(), target.display())
                })?;
                placed += 1;
            }
        }
    }
    Ok(placed)
}

fn prune_stale(passed: &[&str], dest: &Path) -> Result<()> {
    let entries =
        std::fs::read_dir(dest).with_context(|| format!("Failed to list {}", dest.display()))?;
    for entry in entries {
        let path = entry?.path();
        let stale = genome_id(&path).is_some_and(|id| !passed.contains(&id.as_str()));
        if stale && path.is_file() {
            debug!("Removing {} from passed genomes", path.display());
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}
