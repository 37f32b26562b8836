//! Attack statistics and the JSON run report

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sim_phases::{AtkData, AttackResult, ZoneAtkData};
use sim_pipeline::PhaseReport;
use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

/// Detectability (relative to the up/down link bandwidth) counted as stealthy
pub const DETECTABILITY_THRESHOLD: f64 = 0.1;
/// Cost (relative to the ISL bandwidth) counted as expensive
pub const COST_THRESHOLD: f64 = 0.9;

/// Share of attackable ISLs meeting a threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IslStat {
    pub samples: usize,
    pub hits: usize,
    /// `hits / samples` rounded to 3 decimals; `None` without samples
    pub probability: Option<f64>,
}

impl IslStat {
    fn collect(values: impl Iterator<Item = f64>, hit: impl Fn(f64) -> bool) -> Self {
        let (mut samples, mut hits) = (0, 0);
        for value in values {
            samples += 1;
            if hit(value) {
                hits += 1;
            }
        }
        let probability = (samples > 0).then(|| round3(hits as f64 / samples as f64));
        Self {
            samples,
            hits,
            probability,
        }
    }
}

impl fmt::Display for IslStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.probability {
            Some(p) => write!(f, "{} ({}/{})", p, self.hits, self.samples),
            None => write!(f, "n/a (no attackable ISL)"),
        }
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn isl_results(atk: &AtkData) -> impl Iterator<Item = &AttackResult> {
    atk.iter()
        .filter(|(edge, _)| !edge.touches_ground())
        .filter_map(|(_, result)| result.as_ref())
}

/// P(detectability / udl_bw <= 0.1)
pub fn detectability(atk: &AtkData, udl_bw: f64) -> IslStat {
    IslStat::collect(
        isl_results(atk).map(|r| r.detectability / udl_bw),
        |x| x <= DETECTABILITY_THRESHOLD,
    )
}

/// P(cost / isl_bw >= 0.9)
pub fn cost(atk: &AtkData, isl_bw: f64) -> IslStat {
    IslStat::collect(isl_results(atk).map(|r| r.cost / isl_bw), |x| x >= COST_THRESHOLD)
}

/// P(detectability / udl_bw <= 0.1) over zone pairs with a bottleneck
pub fn zone_detectability(zatk: &ZoneAtkData, udl_bw: f64) -> IslStat {
    IslStat::collect(
        zatk.values().flatten().map(|z| z.attack.detectability / udl_bw),
        |x| x <= DETECTABILITY_THRESHOLD,
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// 1-based
    pub run: usize,
    pub routing: String,
    pub detectability: IslStat,
    pub cost: IslStat,
    pub zone_detectability: IslStat,
    pub phases: Vec<PhaseReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub runs: Vec<RunReport>,
}

impl Report {
    pub fn new(runs: Vec<RunReport>) -> Self {
        Self {
            generated_at: Utc::now(),
            runs,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("Cannot create {}", parent.display()))?;
        }
        let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use constellation_graph::{EdgeKey, SdPair};
    use sim_phases::ZoneAttackResult;

    fn result(detectability: f64, cost: f64) -> Option<AttackResult> {
        Some(AttackResult {
            detectability,
            cost,
            sources: 1,
        })
    }

    fn atk() -> AtkData {
        let mut atk = AtkData::new();
        atk.insert(EdgeKey::isl(1, 2), result(20.0, 1900.0));
        atk.insert(EdgeKey::isl(2, 1), result(40.0, 1800.0));
        atk.insert(EdgeKey::isl(2, 3), result(200.0, 500.0));
        atk.insert(EdgeKey::isl(3, 2), None);
        // Ground links never count even when a result is present
        atk.insert(EdgeKey::uplink(1), result(1.0, 1999.0));
        atk
    }

    #[test]
    fn test_detectability_share() {
        let stat = detectability(&atk(), 400.0);
        assert_eq!(stat.samples, 3);
        assert_eq!(stat.hits, 2);
        assert_eq!(stat.probability, Some(0.667));
    }

    #[test]
    fn test_cost_share() {
        let stat = cost(&atk(), 2000.0);
        assert_eq!(stat.samples, 3);
        // 0.95 and exactly 0.9 both count
        assert_eq!(stat.hits, 2);
        assert_eq!(stat.probability, Some(0.667));
    }

    #[test]
    fn test_no_attackable_links() {
        let mut atk = AtkData::new();
        atk.insert(EdgeKey::isl(1, 2), None);
        let stat = cost(&atk, 2000.0);
        assert_eq!(stat.samples, 0);
        assert_eq!(stat.probability, None);
        assert!(stat.to_string().starts_with("n/a"));
    }

    #[test]
    fn test_zone_detectability_skips_pairs_without_bottleneck() {
        let mut zatk = ZoneAtkData::new();
        for (pair, detectability) in [(SdPair::new(0, 1), 10.0), (SdPair::new(0, 2), 100.0)] {
            zatk.insert(
                pair,
                Some(ZoneAttackResult {
                    bottleneck: EdgeKey::isl(1, 2),
                    attack: result(detectability, detectability).unwrap(),
                    cut_fraction: 1.0,
                }),
            );
        }
        zatk.insert(SdPair::new(1, 2), None);

        let stat = zone_detectability(&zatk, 400.0);
        assert_eq!(stat.samples, 2);
        assert_eq!(stat.hits, 1);
        assert_eq!(stat.probability, Some(0.5));
    }

    #[test]
    fn test_report_written_with_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output").join("report.json");
        let report = Report::new(vec![RunReport {
            run: 1,
            routing: "KSP".to_string(),
            detectability: detectability(&atk(), 400.0),
            cost: cost(&atk(), 2000.0),
            zone_detectability: zone_detectability(&ZoneAtkData::new(), 400.0),
            phases: Vec::new(),
        }]);
        report.write(&path).unwrap();

        let back: Report = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(back, report);
    }
}
