//! Genome files of a species directory and their raw assembly statistics
//!
//! A genome is one FASTA file; its id is the file name without the FASTA
//! (and optional `.gz`) extension. Statistics are gathered in a single pass
//! that also sketches the sequence for distance estimation.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::mash::KmerSketch;

const FASTA_EXTENSIONS: [&str; 3] = ["fasta", "fa", "fna"];

/// A genome file found in a species directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GenomeFile {
    pub id: String,
    pub path: PathBuf,
}

/// Counts read straight from the FASTA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssemblyStats {
    pub unknown_bases: u64,
    pub contigs: u64,
    pub assembly_size: u64,
}

/// Genome id for a FASTA path, `None` if the file is not a FASTA
pub fn genome_id(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let name = name.strip_suffix(".gz").unwrap_or(name);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || !FASTA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return None;
    }
    Some(stem.to_string())
}

/// All genome files directly inside `dir`, sorted by id
pub fn discover_genomes(dir: &Path) -> Result<Vec<GenomeFile>> {
    let mut genomes = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(id) = genome_id(&path) {
            genomes.push(GenomeFile { id, path });
        }
    }
    genomes.sort();
    Ok(genomes)
}

/// Open a FASTA file, transparently decompressing `.gz`
pub fn open_fasta(path: &Path) -> Result<Box<dyn BufRead>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open FASTA: {}", path.display()))?;
    let is_gz = path.extension().is_some_and(|ext| ext == "gz");
    Ok(if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}

/// Read one FASTA: statistics plus the concatenated sequence
///
/// Contigs are joined with an `N` so no k-mer spans two of them.
pub fn read_assembly(path: &Path) -> Result<(AssemblyStats, Vec<u8>)> {
    let reader = open_fasta(path)?;
    let mut stats = AssemblyStats::default();
    let mut sequence = Vec::new();

    for line in reader.lines() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            stats.contigs += 1;
            if !sequence.is_empty() {
                sequence.push(b'N');
            }
        } else if !trimmed.is_empty() {
            stats.assembly_size += trimmed.len() as u64;
            stats.unknown_bases += trimmed.bytes().filter(|b| matches!(b, b'N' | b'n')).count() as u64;
            sequence.extend_from_slice(trimmed.as_bytes());
        }
    }

    if stats.contigs == 0 {
        anyhow::bail!("No FASTA records in {}", path.display());
    }
    Ok((stats, sequence))
}

/// Collect statistics and a sketch for every genome, in parallel
pub fn collect(
    genomes: &[GenomeFile],
    kmer_size: usize,
    sketch_size: usize,
) -> Result<Vec<(AssemblyStats, KmerSketch)>> {
    genomes
        .par_iter()
        .map(|genome| {
            let (stats, sequence) = read_assembly(&genome.path)?;
            let sketch = KmerSketch::from_sequence(&sequence, kmer_size, sketch_size);
            Ok((stats, sketch))
        })
        .collect()
}
