//! End-to-end species and batch runs over generated FASTA directories
#![allow(clippy::uninlined_format_args)]


use anyhow::Result;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use genomeqc::batch::{run_batch, GroupStatus};
use genomeqc::filter_engine::Allowed;
use genomeqc::guard::CompletionMarker;
use genomeqc::species::{QcOptions, QcRun, Species, SpeciesOutcome};
use genomeqc::stats_table::ColumnMap;
use genomeqc::{Criterion, QcError, ToleranceConfig};
use test_utils::{create_species, generate_dna_sequence, write_genome};

const GENOME_LENGTH: usize = 20_000;

/// Eight genomes: g0..g5 identical, g6 half length, g7 padded with unknowns
fn eight_genome_species(dir: &Path) -> Result<()> {
    let base = generate_dna_sequence(GENOME_LENGTH, 7);
    create_species(dir, 6, &base);
    write_genome(dir, "g6", &base[..GENOME_LENGTH / 2]);
    write_genome(dir, "g7", &format!("{base}{}", "N".repeat(500)));
    Ok(())
}

fn completed(outcome: SpeciesOutcome) -> QcRun {
    match outcome {
        SpeciesOutcome::Completed(run) => run,
        other => panic!("expected a completed run, got {other:?}"),
    }
}

#[test]
fn test_species_run_writes_all_artifacts() -> Result<()> {
    let temp = TempDir::new()?;
    let dir = temp.path().join("Ecoli");
    eight_genome_species(&dir)?;

    let species = Species::open(&dir, QcOptions::default())?;
    assert_eq!(species.total_genomes(), 8);
    let run = completed(species.qc()?);

    assert!(!run.reused);
    assert_eq!(run.ledger.get("g7"), Some(Criterion::Unknowns));
    assert_eq!(run.ledger.get("g6"), Some(Criterion::AssemblySize));
    assert_eq!(run.ledger.len(), 2);
    assert_eq!(run.passed, vec!["g0", "g1", "g2", "g3", "g4", "g5"]);
    assert_eq!(run.allowed[&Criterion::Unknowns], Allowed::Limit { value: 200 });
    assert_eq!(run.allowed[&Criterion::Contigs], Allowed::Unset);

    let paths = species.paths();
    assert!(paths.stats.exists());
    assert!(paths.dmx.exists());
    assert!(paths.summary.exists());
    assert!(paths.results_dir.ends_with("qc/200-3.0-3.0-3.0"));

    let failed = fs::read_to_string(&paths.failed)?;
    assert_eq!(failed, "id,criterion\ng7,unknowns\ng6,assembly_size\n");

    let summary = fs::read_to_string(&paths.summary)?;
    assert!(summary.starts_with("Ecoli\n\nUnknown Bases\nAllowed: 200\nTolerance: 200\nFiltered: 1\n"));

    let marker: CompletionMarker = serde_json::from_str(&fs::read_to_string(&paths.marker)?)?;
    assert_eq!(marker.label, "200-3.0-3.0-3.0");
    assert_eq!(marker.ids.len(), 8);
    assert_eq!(marker.allowed, run.allowed);

    let mut linked: Vec<_> = fs::read_dir(&paths.passed_dir)?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    linked.sort();
    assert_eq!(linked.len(), 6);
    assert_eq!(linked[0], "g0.fasta");

    let colors = fs::read_to_string(&paths.leaf_colors)?;
    assert!(colors.contains("g6\tassembly_size\torange\n"));
    assert!(colors.contains("g7\tunknowns\tred\n"));
    assert!(colors.contains("g0\tpassed\tblack\n"));
    Ok(())
}

#[test]
fn test_second_run_reuses_results() -> Result<()> {
    let temp = TempDir::new()?;
    let dir = temp.path().join("Ecoli");
    eight_genome_species(&dir)?;

    let first = completed(Species::open(&dir, QcOptions::default())?.qc()?);
    let species = Species::open(&dir, QcOptions::default())?;
    let marker_before = fs::read_to_string(&species.paths().marker)?;

    let second = completed(species.qc()?);
    assert!(second.reused);
    assert_eq!(second.ledger, first.ledger);
    assert_eq!(second.allowed, first.allowed);
    assert_eq!(second.passed, first.passed);
    assert_eq!(second.summary, first.summary);
    assert_eq!(fs::read_to_string(&species.paths().marker)?, marker_before);
    Ok(())
}

#[test]
fn test_new_genome_invalidates_results() -> Result<()> {
    let temp = TempDir::new()?;
    let dir = temp.path().join("Ecoli");
    eight_genome_species(&dir)?;
    completed(Species::open(&dir, QcOptions::default())?.qc()?);

    let base = generate_dna_sequence(GENOME_LENGTH, 7);
    write_genome(&dir, "g8", &base);
    let run = completed(Species::open(&dir, QcOptions::default())?.qc()?);

    assert!(!run.reused);
    assert_eq!(run.passed.len(), 7);
    assert_eq!(run.ledger.len(), 2);
    Ok(())
}

#[test]
fn test_other_tolerances_get_their_own_directory() -> Result<()> {
    let temp = TempDir::new()?;
    let dir = temp.path().join("Ecoli");
    eight_genome_species(&dir)?;
    completed(Species::open(&dir, QcOptions::default())?.qc()?);

    let options = QcOptions {
        config: ToleranceConfig {
            max_unknowns: 1_000,
            ..ToleranceConfig::default()
        },
        link: false,
        ..QcOptions::default()
    };
    let species = Species::open(&dir, options)?;
    let run = completed(species.qc()?);

    assert!(!run.reused);
    assert_eq!(run.ledger.get("g7"), None);
    assert!(species.paths().results_dir.ends_with("qc/1000-3.0-3.0-3.0"));
    assert!(!species.paths().passed_dir.exists());
    assert!(dir.join("qc/200-3.0-3.0-3.0/allowed.json").exists());
    Ok(())
}

#[test]
fn test_legacy_columns_rerun_reuses_results() -> Result<()> {
    let temp = TempDir::new()?;
    let dir = temp.path().join("Ecoli");
    create_species(&dir, 7, &generate_dna_sequence(GENOME_LENGTH, 11));
    let options = || QcOptions {
        columns: ColumnMap::legacy(),
        ..QcOptions::default()
    };

    let first = completed(Species::open(&dir, options())?.qc()?);
    assert!(!first.reused);

    let second = completed(Species::open(&dir, options())?.qc()?);
    assert!(second.reused);
    assert_eq!(second.passed, first.passed);
    Ok(())
}

#[test]
fn test_legacy_stats_table_is_read() -> Result<()> {
    let temp = TempDir::new()?;
    let dir = temp.path().join("Ecoli");
    create_species(&dir, 6, &generate_dna_sequence(1_000, 13));
    fs::create_dir_all(dir.join("qc"))?;
    let mut legacy = String::from(",N_Count,Contigs,Assembly_Size,MASH\n");
    for i in 0..6 {
        legacy.push_str(&format!("g{i},0,1,1000,0.01\n"));
    }
    fs::write(dir.join("qc/stats.csv"), legacy)?;

    let options = QcOptions {
        columns: ColumnMap::legacy(),
        ..QcOptions::default()
    };
    let run = completed(Species::open(&dir, options)?.qc()?);
    assert_eq!(run.passed.len(), 6);
    // The matrix is only built when stats are collected
    assert!(!dir.join("qc/dmx.tsv").exists());
    Ok(())
}

#[test]
fn test_rerun_drops_links_of_newly_failed_genomes() -> Result<()> {
    let temp = TempDir::new()?;
    let dir = temp.path().join("Ecoli");
    let base = generate_dna_sequence(GENOME_LENGTH, 17);
    create_species(&dir, 7, &base);
    let first = completed(Species::open(&dir, QcOptions::default())?.qc()?);
    assert_eq!(first.passed.len(), 7);

    write_genome(&dir, "g3", &format!("{base}{}", "N".repeat(500)));
    write_genome(&dir, "g9", &base);
    let species = Species::open(&dir, QcOptions::default())?;
    let second = completed(species.qc()?);
    assert_eq!(second.ledger.get("g3"), Some(Criterion::Unknowns));

    let mut linked: Vec<String> = fs::read_dir(&species.paths().passed_dir)?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    linked.sort();
    let mut expected: Vec<String> = second.passed.iter().map(|id| format!("{id}.fasta")).collect();
    expected.sort();
    assert_eq!(linked, expected);
    assert!(!linked.contains(&"g3.fasta".to_string()));
    Ok(())
}

#[test]
fn test_malformed_stats_keep_previous_results() -> Result<()> {
    let temp = TempDir::new()?;
    let dir = temp.path().join("Ecoli");
    eight_genome_species(&dir)?;
    let species = Species::open(&dir, QcOptions::default())?;
    completed(species.qc()?);

    let paths = species.paths().clone();
    let failed_before = fs::read(&paths.failed)?;
    let marker_before = fs::read(&paths.marker)?;

    let stats = fs::read_to_string(&paths.stats)?;
    let duplicate = stats.lines().nth(1).unwrap_or_default().to_string();
    fs::write(&paths.stats, format!("{stats}{duplicate}\n"))?;
    write_genome(&dir, "g8", &generate_dna_sequence(GENOME_LENGTH, 7));

    let err = Species::open(&dir, QcOptions::default())?
        .qc()
        .expect_err("duplicate ids must stop the species");
    assert!(matches!(
        err.downcast_ref::<QcError>(),
        Some(QcError::MalformedInput(_))
    ));
    assert_eq!(fs::read(&paths.failed)?, failed_before);
    assert_eq!(fs::read(&paths.marker)?, marker_before);
    Ok(())
}

#[test]
fn test_small_species_is_left_untouched() -> Result<()> {
    let temp = TempDir::new()?;
    let dir = temp.path().join("Rare");
    create_species(&dir, 5, &generate_dna_sequence(1_000, 3));

    let outcome = Species::open(&dir, QcOptions::default())?.qc()?;
    assert_eq!(outcome, SpeciesOutcome::TooFewGenomes { count: 5 });
    assert!(!dir.join("qc").exists());
    Ok(())
}

#[test]
fn test_batch_isolates_failing_species() -> Result<()> {
    let temp = TempDir::new()?;
    eight_genome_species(&temp.path().join("Ecoli"))?;
    create_species(&temp.path().join("Rare"), 3, &generate_dna_sequence(1_000, 3));

    let broken = temp.path().join("Broken");
    create_species(&broken, 6, &generate_dna_sequence(1_000, 5));
    fs::write(broken.join("g5.fasta"), "")?;

    let report = run_batch(temp.path(), &QcOptions::default())?;
    let statuses: Vec<_> = report
        .groups
        .iter()
        .map(|g| (g.name.as_str(), &g.status))
        .collect();

    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses[0].0, "Broken");
    assert!(matches!(statuses[0].1, GroupStatus::Failed { .. }));
    assert_eq!(
        statuses[1],
        (
            "Ecoli",
            &GroupStatus::Completed {
                passed: 6,
                failed: 2,
                reused: false
            }
        )
    );
    assert_eq!(statuses[2], ("Rare", &GroupStatus::TooFewGenomes { count: 3 }));
    assert!(report.has_failures());
    assert!(temp.path().join("Ecoli/qc/200-3.0-3.0-3.0/allowed.json").exists());
    assert!(!broken.join("qc/200-3.0-3.0-3.0/allowed.json").exists());
    Ok(())
}
