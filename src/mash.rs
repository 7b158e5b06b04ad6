//! Mash distance estimation using MinHash k-mer sketches
//!
//! Provides the pairwise distance matrix of a species and the per-genome
//! mean distance that the distance filter works on. A matrix produced by an
//! external `mash dist -t` run can be read in place of a computed one.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::error::{QcError, QcResult};
use crate::persist::write_atomic;

/// Default k-mer size for mash distance computation
pub const DEFAULT_KMER_SIZE: usize = 15;

/// Default sketch size (number of minimizers to keep)
pub const DEFAULT_SKETCH_SIZE: usize = 1000;

/// A k-mer sketch using MinHash
#[derive(Debug, Clone)]
pub struct KmerSketch {
    /// Minimizers (smallest hash values) for this sequence
    pub minimizers: Vec<u64>,
    /// K-mer size used
    pub k: usize,
}

impl KmerSketch {
    pub fn from_sequence(sequence: &[u8], k: usize, sketch_size: usize) -> Self {
        KmerSketch {
            minimizers: sketch_sequence(sequence, k, sketch_size),
            k,
        }
    }

    /// Jaccard index estimated from the two sketches
    pub fn jaccard(&self, other: &KmerSketch) -> f64 {
        if self.k != other.k {
            return 0.0;
        }

        let set1: HashSet<_> = self.minimizers.iter().collect();
        let set2: HashSet<_> = other.minimizers.iter().collect();

        let intersection_size = set1.intersection(&set2).count();
        let union_size = set1.union(&set2).count();

        if union_size == 0 {
            0.0
        } else {
            intersection_size as f64 / union_size as f64
        }
    }

    /// Mash distance: -1/k * ln(2J / (1 + J)), capped at 1.0
    pub fn mash_distance(&self, other: &KmerSketch) -> f64 {
        let jaccard = self.jaccard(other);
        if jaccard <= 0.0 {
            return 1.0;
        }
        if jaccard >= 1.0 {
            return 0.0;
        }
        let ratio = (2.0 * jaccard) / (1.0 + jaccard);
        ((-1.0 / self.k as f64) * ratio.ln()).clamp(0.0, 1.0)
    }
}

fn sketch_sequence(sequence: &[u8], k: usize, sketch_size: usize) -> Vec<u64> {
    if k == 0 || sequence.len() < k {
        return Vec::new();
    }

    let mut hashes: Vec<u64> = sequence
        .windows(k)
        .filter(|kmer| kmer.iter().all(|&b| is_dna_base(b)))
        .map(|kmer| {
            // Canonical k-mer: strand independent
            let fwd = hash_kmer(&kmer.to_ascii_uppercase());
            let rev = hash_kmer(&reverse_complement_kmer(kmer));
            fwd.min(rev)
        })
        .collect();

    hashes.sort_unstable();
    hashes.dedup();
    hashes.truncate(sketch_size);
    hashes
}

fn hash_kmer(kmer: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    kmer.hash(&mut hasher);
    hasher.finish()
}

fn is_dna_base(b: u8) -> bool {
    matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T')
}

fn reverse_complement_kmer(kmer: &[u8]) -> Vec<u8> {
    kmer.iter()
        .rev()
        .map(|&b| match b.to_ascii_uppercase() {
            b'A' => b'T',
            b'T' => b'A',
            b'C' => b'G',
            b'G' => b'C',
            other => other,
        })
        .collect()
}

/// Square, symmetric pairwise distance matrix with named rows
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    ids: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl DistanceMatrix {
    pub fn from_sketches(ids: Vec<String>, sketches: &[KmerSketch]) -> QcResult<Self> {
        if ids.len() != sketches.len() {
            return Err(QcError::MalformedInput(format!(
                "{} ids for {} sketches",
                ids.len(),
                sketches.len()
            )));
        }
        let n = sketches.len();
        let mut values = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in i + 1..n {
                let distance = sketches[i].mash_distance(&sketches[j]);
                values[i][j] = distance;
                values[j][i] = distance;
            }
        }
        Self::new(ids, values)
    }

    pub fn new(ids: Vec<String>, values: Vec<Vec<f64>>) -> QcResult<Self> {
        if ids.is_empty() {
            return Err(QcError::MalformedInput("empty distance matrix".into()));
        }
        if values.len() != ids.len() || values.iter().any(|row| row.len() != ids.len()) {
            return Err(QcError::MalformedInput(format!(
                "distance matrix is not {0}x{0}",
                ids.len()
            )));
        }
        Ok(DistanceMatrix { ids, values })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i][j]
    }

    /// Mean of each row, self-distance included
    pub fn row_means(&self) -> Vec<(String, f64)> {
        let n = self.ids.len() as f64;
        self.ids
            .iter()
            .zip(&self.values)
            .map(|(id, row)| (id.clone(), row.iter().sum::<f64>() / n))
            .collect()
    }

    /// Read a tab-separated matrix as written by `mash dist -t`
    ///
    /// Row and column names are reduced to file stems so sketch paths like
    /// `qc/GCA_1.msh` line up with genome ids.
    pub fn read_tsv<P: AsRef<Path>>(path: P) -> QcResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| QcError::persistence(path, e))?;
        let mut lines = BufReader::new(file).lines();
        let malformed = |msg: String| QcError::MalformedInput(format!("{}: {msg}", path.display()));

        let header = match lines.next() {
            Some(line) => line.map_err(|e| QcError::persistence(path, e))?,
            None => return Err(malformed("empty distance matrix".into())),
        };
        let columns: Vec<String> = header.split('\t').skip(1).map(short_name).collect();

        let mut ids = Vec::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());
        for (row, line) in lines.enumerate() {
            let line = line.map_err(|e| QcError::persistence(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let id = short_name(fields.next().unwrap_or(""));
            let parsed = fields
                .map(|v| v.trim().parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()
                .map_err(|e| malformed(format!("row {}: {e}", row + 1)))?;
            if id != columns.get(row).map(String::as_str).unwrap_or("") {
                return Err(malformed(format!(
                    "row {} is '{id}' but column {} is not",
                    row + 1,
                    row + 1
                )));
            }
            ids.push(id);
            values.push(parsed);
        }

        Self::new(ids, values).map_err(|e| match e {
            QcError::MalformedInput(msg) => malformed(msg),
            other => other,
        })
    }

    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> QcResult<()> {
        let path = path.as_ref();
        write_atomic(path, |w| {
            let io = |e: std::io::Error| QcError::persistence(path, e);
            writeln!(w, "#query\t{}", self.ids.join("\t")).map_err(io)?;
            for (id, row) in self.ids.iter().zip(&self.values) {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                writeln!(w, "{id}\t{}", cells.join("\t")).map_err(io)?;
            }
            Ok(())
        })
    }
}

fn short_name(raw: &str) -> String {
    let name = raw.trim().rsplit('/').next().unwrap_or("");
    match name.rsplit_once('.') {
        Some((stem, ext))
            if matches!(ext, "msh" | "fasta" | "fa" | "fna" | "gz") && !stem.is_empty() =>
        {
            short_name(stem)
        }
        _ => name.to_string(),
    }
}
