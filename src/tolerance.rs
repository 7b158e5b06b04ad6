/// Filter criteria and the tolerance settings that define a run
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One filter of the cascade; ordering follows cascade order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Unknowns,     // unknown (N) bases, fixed threshold
    Contigs,      // two-sided MAD over genomes with > 10 contigs
    AssemblySize, // two-sided MAD range
    Distance,     // one-sided (upper) MAD
}

impl Criterion {
    pub const ALL: [Criterion; 4] = [
        Criterion::Unknowns,
        Criterion::Contigs,
        Criterion::AssemblySize,
        Criterion::Distance,
    ];

    /// Name used in reports and persisted artifacts
    pub fn as_str(self) -> &'static str {
        match self {
            Criterion::Unknowns => "unknowns",
            Criterion::Contigs => "contigs",
            Criterion::AssemblySize => "assembly_size",
            Criterion::Distance => "distance",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Criterion::Unknowns => "Unknown Bases",
            Criterion::Contigs => "Contigs",
            Criterion::AssemblySize => "Assembly Size",
            Criterion::Distance => "Distance",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Criterion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "unknowns" => Ok(Criterion::Unknowns),
            "contigs" => Ok(Criterion::Contigs),
            "assembly_size" => Ok(Criterion::AssemblySize),
            // "mash" is how older reports name the distance criterion
            "distance" | "mash" => Ok(Criterion::Distance),
            other => Err(anyhow!(
                "Unknown criterion '{other}'. Use unknowns, contigs, assembly_size or distance"
            )),
        }
    }
}

/// Sensitivity of the four filters. Immutable for a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceConfig {
    pub max_unknowns: u64,
    pub contigs_multiplier: f64,
    pub assembly_size_multiplier: f64,
    pub distance_multiplier: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        ToleranceConfig {
            max_unknowns: 200,
            contigs_multiplier: 3.0,
            assembly_size_multiplier: 3.0,
            distance_multiplier: 3.0,
        }
    }
}

impl ToleranceConfig {
    /// Run identity, e.g. "200-3.0-3.0-3.0"
    ///
    /// Multipliers use the shortest round-trip rendering so distinct values
    /// never share a label.
    pub fn label(&self) -> String {
        format!(
            "{}-{:?}-{:?}-{:?}",
            self.max_unknowns,
            self.contigs_multiplier,
            self.assembly_size_multiplier,
            self.distance_multiplier
        )
    }

    /// Multiplier applied to the MAD for a statistical criterion
    pub fn multiplier(&self, criterion: Criterion) -> Option<f64> {
        match criterion {
            Criterion::Unknowns => None,
            Criterion::Contigs => Some(self.contigs_multiplier),
            Criterion::AssemblySize => Some(self.assembly_size_multiplier),
            Criterion::Distance => Some(self.distance_multiplier),
        }
    }

    /// Configured tolerance as shown in summaries
    pub fn tolerance(&self, criterion: Criterion) -> String {
        match self.multiplier(criterion) {
            None => self.max_unknowns.to_string(),
            Some(m) => format!("{m:?}"),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for criterion in &Criterion::ALL[1..] {
            if let Some(m) = self.multiplier(*criterion) {
                if !m.is_finite() || m < 0.0 {
                    return Err(anyhow!(
                        "{criterion} multiplier must be a non-negative number, got {m}"
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ToleranceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tolerance Levels:")?;
        writeln!(f, "Maximum Unknown Bases: {}", self.max_unknowns)?;
        writeln!(f, "Acceptable Deviations,")?;
        writeln!(f, "Contigs: {:?}", self.contigs_multiplier)?;
        writeln!(f, "Assembly Size: {:?}", self.assembly_size_multiplier)?;
        write!(f, "Distance: {:?}", self.distance_multiplier)
    }
}
