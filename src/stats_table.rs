//! Per-genome statistics table
//!
//! The table is produced once per run by the stats collaborators (`genome`,
//! `mash`), persisted as CSV and never mutated by the cascade. Column names
//! are resolved through a [`ColumnMap`], so the older column layout and the
//! current one feed the same filtering code.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use crate::error::{QcError, QcResult};
use crate::persist::write_atomic;
use crate::tolerance::Criterion;

/// One row of the stats table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeRecord {
    pub id: String,
    pub unknown_bases: u64,
    pub contigs: u64,
    pub assembly_size: u64,
    /// Mean pairwise distance to the other members of the group
    pub distance: f64,
}

impl GenomeRecord {
    /// Measurement a criterion filters on
    pub fn value(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::Unknowns => self.unknown_bases as f64,
            Criterion::Contigs => self.contigs as f64,
            Criterion::AssemblySize => self.assembly_size as f64,
            Criterion::Distance => self.distance,
        }
    }
}

/// Header names for the id column and each measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub id: String,
    pub unknown_bases: String,
    pub contigs: String,
    pub assembly_size: String,
    pub distance: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        ColumnMap {
            id: "id".to_string(),
            unknown_bases: "unknown_bases".to_string(),
            contigs: "contigs".to_string(),
            assembly_size: "assembly_size".to_string(),
            distance: "distance".to_string(),
        }
    }
}

impl ColumnMap {
    /// Older layout: unnamed index column, capitalised measurement names
    pub fn legacy() -> Self {
        ColumnMap {
            id: String::new(),
            unknown_bases: "N_Count".to_string(),
            contigs: "Contigs".to_string(),
            assembly_size: "Assembly_Size".to_string(),
            distance: "MASH".to_string(),
        }
    }
}

/// id -> record, unique keys, insertion order kept for stable output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsTable {
    records: IndexMap<String, GenomeRecord>,
}

impl StatsTable {
    /// Build a table, rejecting duplicate ids and implausible values
    pub fn from_records<I>(records: I) -> QcResult<Self>
    where
        I: IntoIterator<Item = GenomeRecord>,
    {
        let mut map = IndexMap::new();
        for record in records {
            validate_record(&record)?;
            if map.contains_key(&record.id) {
                return Err(QcError::MalformedInput(format!(
                    "duplicate genome id '{}'",
                    record.id
                )));
            }
            map.insert(record.id.clone(), record);
        }
        Ok(StatsTable { records: map })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&GenomeRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &GenomeRecord> {
        self.records.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Id set, ignoring order
    pub fn id_set(&self) -> BTreeSet<String> {
        self.records.keys().cloned().collect()
    }

    /// Load a persisted table using the default column names
    pub fn read_csv<P: AsRef<Path>>(path: P) -> QcResult<Self> {
        Self::read_csv_with(path, &ColumnMap::default())
    }

    pub fn read_csv_with<P: AsRef<Path>>(path: P, columns: &ColumnMap) -> QcResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| QcError::persistence(path, e))?;
        Self::from_reader(file, columns).map_err(|e| match e {
            QcError::MalformedInput(msg) => {
                QcError::MalformedInput(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Parse CSV from any reader
    pub fn from_reader<R: Read>(reader: R, columns: &ColumnMap) -> QcResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| QcError::MalformedInput(format!("unreadable header: {e}")))?
            .clone();
        let find = |name: &str| -> QcResult<usize> {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                QcError::MalformedInput(format!("missing required column '{name}'"))
            })
        };
        let id_col = find(&columns.id)?;
        let unknowns_col = find(&columns.unknown_bases)?;
        let contigs_col = find(&columns.contigs)?;
        let size_col = find(&columns.assembly_size)?;
        let distance_col = find(&columns.distance)?;

        let mut records = Vec::new();
        for (row, result) in csv_reader.records().enumerate() {
            let line = row + 2; // 1-based, after the header
            let fields =
                result.map_err(|e| QcError::MalformedInput(format!("line {line}: {e}")))?;
            let cell = |col: usize| fields.get(col).unwrap_or("");

            let id = cell(id_col);
            if id.is_empty() {
                return Err(QcError::MalformedInput(format!("line {line}: empty id")));
            }
            records.push(GenomeRecord {
                id: id.to_string(),
                unknown_bases: parse_count(cell(unknowns_col), &columns.unknown_bases, line)?,
                contigs: parse_count(cell(contigs_col), &columns.contigs, line)?,
                assembly_size: parse_count(cell(size_col), &columns.assembly_size, line)?,
                distance: cell(distance_col).parse::<f64>().map_err(|_| {
                    QcError::MalformedInput(format!(
                        "line {line}: invalid {} value '{}'",
                        columns.distance,
                        cell(distance_col)
                    ))
                })?,
            });
        }

        if records.is_empty() {
            return Err(QcError::MalformedInput("stats table has no rows".into()));
        }
        Self::from_records(records)
    }

    /// Persist with the default column names
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> QcResult<()> {
        let path = path.as_ref();
        write_atomic(path, |w| {
            let mut writer = csv::Writer::from_writer(w);
            for record in self.records() {
                writer
                    .serialize(record)
                    .map_err(|e| QcError::persistence(path, e))?;
            }
            writer.flush().map_err(|e| QcError::persistence(path, e))
        })
    }
}

/// Counts may have been written as floats ("1234.0") by other tools
fn parse_count(raw: &str, column: &str, line: usize) -> QcResult<u64> {
    if let Ok(n) = raw.parse::<u64>() {
        return Ok(n);
    }
    match raw.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 => Ok(v as u64),
        _ => Err(QcError::MalformedInput(format!(
            "line {line}: invalid {column} value '{raw}'"
        ))),
    }
}

fn validate_record(record: &GenomeRecord) -> QcResult<()> {
    if record.contigs == 0 {
        return Err(QcError::MalformedInput(format!(
            "genome '{}' has no contigs",
            record.id
        )));
    }
    if record.assembly_size == 0 {
        return Err(QcError::MalformedInput(format!(
            "genome '{}' has an empty assembly",
            record.id
        )));
    }
    if !record.distance.is_finite() || record.distance < 0.0 {
        return Err(QcError::MalformedInput(format!(
            "genome '{}' has invalid distance {}",
            record.id, record.distance
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, contigs: u64) -> GenomeRecord {
        GenomeRecord {
            id: id.to_string(),
            unknown_bases: 0,
            contigs,
            assembly_size: 5_000_000,
            distance: 0.01,
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = StatsTable::from_records(vec![record("a", 3), record("a", 4)]).unwrap_err();
        assert!(matches!(err, QcError::MalformedInput(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn test_zero_contigs_rejected() {
        assert!(StatsTable::from_records(vec![record("a", 0)]).is_err());
    }

    #[test]
    fn test_csv_roundtrip_preserves_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        let table =
            StatsTable::from_records(vec![record("GCA_2.1", 3), record("GCA_1.1", 40)]).unwrap();
        table.write_csv(&path).unwrap();

        let loaded = StatsTable::read_csv(&path).unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded.ids().collect::<Vec<_>>(), vec!["GCA_2.1", "GCA_1.1"]);
    }

    #[test]
    fn test_legacy_columns() {
        let csv = ",N_Count,Contigs,Assembly_Size,MASH\n\
                   g1,12,80,4500000.0,0.012\n\
                   g2,0,3,4600000,0.011\n";
        let table = StatsTable::from_reader(csv.as_bytes(), &ColumnMap::legacy()).unwrap();
        assert_eq!(table.len(), 2);
        let g1 = table.get("g1").unwrap();
        assert_eq!(g1.unknown_bases, 12);
        assert_eq!(g1.assembly_size, 4_500_000);
        assert_eq!(g1.value(Criterion::Distance), 0.012);
    }

    #[test]
    fn test_missing_column() {
        let csv = "id,unknown_bases,contigs,assembly_size\ng1,0,1,10\n";
        let err = StatsTable::from_reader(csv.as_bytes(), &ColumnMap::default()).unwrap_err();
        assert!(err.to_string().contains("'distance'"));
    }

    #[test]
    fn test_bad_cell_and_empty_table() {
        let csv = "id,unknown_bases,contigs,assembly_size,distance\ng1,x,1,10,0.1\n";
        assert!(StatsTable::from_reader(csv.as_bytes(), &ColumnMap::default()).is_err());

        let csv = "id,unknown_bases,contigs,assembly_size,distance\n";
        let err = StatsTable::from_reader(csv.as_bytes(), &ColumnMap::default()).unwrap_err();
        assert!(err.to_string().contains("no rows"));
    }

    #[test]
    fn test_missing_file_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let err = StatsTable::read_csv(dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, QcError::Persistence { .. }));
    }
}
