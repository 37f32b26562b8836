//! Run configuration
//!
//! A configuration maps every strategy section to its parameters:
//!
//! ```json
//! { "rout": { "strat": ["KSP", "RANDOM"], "k": 5, "desirability_stretch": 2.3 } }
//! ```
//!
//! A parameter given as a list fans out into several runs. The run count is
//! the length of the longest list; shorter lists repeat their last element.
//! A parameter whose value is itself a list must be wrapped in an outer list.
//! Parameters a strategy does not use are ignored.

use anyhow::{bail, Context, Result};
use route_strategies::{
    DrawSource, KdgRouting, KdsRouting, KloRouting, KspRouting, MixtureRoutingStrategy, RoutingStrategy,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sim_phases::{
    AngleCoverage, AttackFilterStrategy, BidirBwAssign, BidirEdges, BinSearchOptim, BwSelectStrategy,
    CapacityFeasibility, CellConstraint, DetectBneck, DirectionalFilter, FeasibilityStrategy,
    GeoConstraintStrategy, GridWeightStrategy, IslZoneEdges, KClosestZone, LatLonGrid, LatitudeWeight, LinkAttack,
    NoConstraint, OptimStrategy, RandZoneSelect, SampledBwSelect, UniformWeight, WalkerLsn, WeightedBwSelect,
    ZoneAttack, ZoneBottleneckStrategy, ZoneBuildStrategy, ZoneEdgesStrategy, ZoneSelectStrategy,
};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Load a configuration file
pub fn load(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    info!("Loading configuration from {:?}", path);

    let file = File::open(path).with_context(|| format!("Cannot open configuration {}", path.display()))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .with_context(|| format!("Cannot parse configuration {}", path.display()))?;
    Ok(config)
}

/// Reference configuration: a 72 x 22 Walker shell at 550 km, compared
/// across all five routing strategies
pub fn default_config() -> Value {
    json!({
        "lsn": {
            "strat": "Walker",
            "inclination": 53,
            "sats_per_orbit": 22,
            "orbits": 72,
            "f": 11,
            "elevation": 550000,
            "hrs": 0,
            "mins": 2,
            "secs": 17,
            "millis": 0
        },
        "grid": { "strat": "LatLon", "step_deg": 10.0 },
        "gweight": { "strat": "Latitude" },
        "cover": { "strat": "Angle", "min_elev_angle": 40 },
        "rout": {
            "strat": ["KDG", "KDS", "KLO", "KSP", "RANDOM"],
            "desirability_stretch": 2.3,
            "k": 5,
            "esx_theta": 0.5
        },
        "edges": { "strat": "Bidir" },
        "bw_sel": { "strat": "Sampled", "sampled_quanta": 250000 },
        "bw_asg": {
            "strat": "Bidir",
            "isl_bw": 2000,
            "udl_bw": 400,
            "utilisation": 0.9
        },
        "atk_constr": { "strat": "None", "grid_points": [[1549, 1530]] },
        "atk_filt": { "strat": "Directional" },
        "atk_feas": { "strat": "Capacity" },
        "atk_optim": { "strat": "BinSearch", "rate": 1.0 },
        "zone_select": { "strat": "Random", "samples": 5000 },
        "zone_build": { "strat": "KClosest", "size": 6 },
        "zone_edges": { "strat": "Isl" },
        "zone_bneck": { "strat": "Detect" }
    })
}

/// Expand list-valued parameters into one configuration per run
pub fn expand(config: &Value) -> Result<Vec<Value>> {
    let sections = config.as_object().context("Configuration must be a JSON object")?;

    let mut columns: Vec<(&str, &str, Vec<Value>)> = Vec::new();
    for (section, params) in sections {
        let params = params
            .as_object()
            .with_context(|| format!("Section {} must be a JSON object", section))?;
        for (param, value) in params {
            let values = match value {
                Value::Array(list) if list.is_empty() => bail!("{}.{} is an empty list", section, param),
                Value::Array(list) => list.clone(),
                single => vec![single.clone()],
            };
            columns.push((section.as_str(), param.as_str(), values));
        }
    }

    let run_count = columns.iter().map(|(_, _, values)| values.len()).max().unwrap_or(1);

    let mut runs = Vec::with_capacity(run_count);
    for idx in 0..run_count {
        let mut run: Map<String, Value> = sections
            .keys()
            .map(|section| (section.clone(), Value::Object(Map::new())))
            .collect();
        for (section, param, values) in &columns {
            let value = values[idx.min(values.len() - 1)].clone();
            if let Some(Value::Object(params)) = run.get_mut(*section) {
                params.insert(param.to_string(), value);
            }
        }
        runs.push(Value::Object(run));
    }
    Ok(runs)
}

/// One fully resolved run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub lsn: LsnConfig,
    pub grid: GridConfig,
    pub gweight: WeightConfig,
    pub cover: CoverConfig,
    pub rout: RoutConfig,
    pub edges: EdgeConfig,
    pub bw_sel: BwSelectConfig,
    pub bw_asg: BwConfig,
    pub atk_constr: ConstraintConfig,
    pub atk_filt: FilterConfig,
    pub atk_feas: FeasibilityConfig,
    pub atk_optim: OptimConfig,
    pub zone_select: ZoneSelectConfig,
    pub zone_build: ZoneBuildConfig,
    pub zone_edges: ZoneEdgesConfig,
    pub zone_bneck: ZoneBneckConfig,
}

impl RunConfig {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).context("Invalid run configuration")
    }

    pub fn link_attack(&self) -> LinkAttack {
        LinkAttack::new(
            self.atk_constr.strategy(),
            self.atk_filt.strategy(),
            self.atk_feas.strategy(),
            self.atk_optim.strategy(),
        )
    }

    pub fn zone_attack(&self) -> ZoneAttack {
        ZoneAttack::new(
            self.zone_select.strategy(),
            self.zone_build.strategy(),
            self.zone_edges.strategy(),
            self.zone_bneck.strategy(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum LsnConfig {
    Walker {
        inclination: f64,
        sats_per_orbit: u32,
        orbits: u32,
        f: u32,
        /// Altitude in metres
        elevation: f64,
        #[serde(default)]
        hrs: f64,
        #[serde(default)]
        mins: f64,
        #[serde(default)]
        secs: f64,
        #[serde(default)]
        millis: f64,
    },
}

impl LsnConfig {
    pub fn strategy(&self) -> WalkerLsn {
        match *self {
            LsnConfig::Walker {
                inclination,
                sats_per_orbit,
                orbits,
                f,
                elevation,
                hrs,
                mins,
                secs,
                millis,
            } => WalkerLsn {
                inclination_deg: inclination,
                sats_per_orbit,
                orbits,
                phase_offset: f,
                altitude_km: elevation / 1000.0,
                elapsed_s: hrs * 3600.0 + mins * 60.0 + secs + millis / 1000.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum GridConfig {
    LatLon { step_deg: f64 },
}

impl GridConfig {
    pub fn strategy(&self) -> LatLonGrid {
        match *self {
            GridConfig::LatLon { step_deg } => LatLonGrid { step_deg },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum WeightConfig {
    Uniform,
    Latitude,
}

impl WeightConfig {
    pub fn strategy(&self) -> Box<dyn GridWeightStrategy> {
        match self {
            WeightConfig::Uniform => Box::new(UniformWeight),
            WeightConfig::Latitude => Box::new(LatitudeWeight),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum CoverConfig {
    Angle { min_elev_angle: f64 },
}

impl CoverConfig {
    pub fn strategy(&self) -> AngleCoverage {
        match *self {
            CoverConfig::Angle { min_elev_angle } => AngleCoverage {
                min_elev_angle_deg: min_elev_angle,
            },
        }
    }
}

fn default_esx_theta() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strat", rename_all = "UPPERCASE")]
pub enum RoutConfig {
    Ksp {
        desirability_stretch: f64,
        k: usize,
    },
    Kdg {
        desirability_stretch: f64,
        k: usize,
    },
    Kds {
        desirability_stretch: f64,
        k: usize,
    },
    Klo {
        desirability_stretch: f64,
        k: usize,
        #[serde(default = "default_esx_theta")]
        esx_theta: f64,
    },
    /// Mixture of the four heuristics
    Random {
        desirability_stretch: f64,
        k: usize,
        #[serde(default = "default_esx_theta")]
        esx_theta: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl RoutConfig {
    /// Build the routing strategy; `seed_override` wins over a configured seed
    pub fn strategy(&self, seed_override: Option<u64>) -> Box<dyn RoutingStrategy> {
        match *self {
            RoutConfig::Ksp { desirability_stretch, k } => Box::new(KspRouting::new(desirability_stretch, k)),
            RoutConfig::Kdg { desirability_stretch, k } => Box::new(KdgRouting::new(desirability_stretch, k)),
            RoutConfig::Kds { desirability_stretch, k } => Box::new(KdsRouting::new(desirability_stretch, k)),
            RoutConfig::Klo {
                desirability_stretch,
                k,
                esx_theta,
            } => Box::new(KloRouting::new(desirability_stretch, k, esx_theta)),
            RoutConfig::Random {
                desirability_stretch,
                k,
                esx_theta,
                seed,
            } => {
                let draws = match seed_override.or(seed) {
                    Some(seed) => DrawSource::Seeded(seed),
                    None => DrawSource::Entropy,
                };
                Box::new(MixtureRoutingStrategy::new(desirability_stretch, k, esx_theta).with_draws(draws))
            }
        }
    }

    /// Name used in reports
    pub fn label(&self) -> &'static str {
        match self {
            RoutConfig::Ksp { .. } => "KSP",
            RoutConfig::Kdg { .. } => "KDG",
            RoutConfig::Kds { .. } => "KDS",
            RoutConfig::Klo { .. } => "KLO",
            RoutConfig::Random { .. } => "PROPOSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum EdgeConfig {
    Bidir,
}

impl EdgeConfig {
    pub fn strategy(&self) -> BidirEdges {
        match self {
            EdgeConfig::Bidir => BidirEdges,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum BwSelectConfig {
    Sampled {
        sampled_quanta: u64,
        #[serde(default)]
        seed: u64,
    },
    Weighted,
}

impl BwSelectConfig {
    pub fn strategy(&self) -> Box<dyn BwSelectStrategy> {
        match *self {
            BwSelectConfig::Sampled { sampled_quanta, seed } => Box::new(SampledBwSelect { sampled_quanta, seed }),
            BwSelectConfig::Weighted => Box::new(WeightedBwSelect),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum BwConfig {
    Bidir {
        isl_bw: f64,
        udl_bw: f64,
        utilisation: f64,
    },
}

impl BwConfig {
    pub fn strategy(&self) -> BidirBwAssign {
        match *self {
            BwConfig::Bidir {
                isl_bw,
                udl_bw,
                utilisation,
            } => BidirBwAssign {
                isl_bw,
                udl_bw,
                utilisation,
            },
        }
    }

    pub fn isl_bw(&self) -> f64 {
        match self {
            BwConfig::Bidir { isl_bw, .. } => *isl_bw,
        }
    }

    pub fn udl_bw(&self) -> f64 {
        match self {
            BwConfig::Bidir { udl_bw, .. } => *udl_bw,
        }
    }
}

/// Cells the attacker may send from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum ConstraintConfig {
    None,
    Cells { grid_points: Vec<u32> },
}

impl ConstraintConfig {
    pub fn strategy(&self) -> Box<dyn GeoConstraintStrategy> {
        match self {
            ConstraintConfig::None => Box::new(NoConstraint),
            ConstraintConfig::Cells { grid_points } => Box::new(CellConstraint {
                grid_points: grid_points.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum FilterConfig {
    Directional,
}

impl FilterConfig {
    pub fn strategy(&self) -> Box<dyn AttackFilterStrategy> {
        match self {
            FilterConfig::Directional => Box::new(DirectionalFilter),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum FeasibilityConfig {
    Capacity,
}

impl FeasibilityConfig {
    pub fn strategy(&self) -> Box<dyn FeasibilityStrategy> {
        match self {
            FeasibilityConfig::Capacity => Box::new(CapacityFeasibility),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum OptimConfig {
    BinSearch { rate: f64 },
}

impl OptimConfig {
    pub fn strategy(&self) -> Box<dyn OptimStrategy> {
        match *self {
            OptimConfig::BinSearch { rate } => Box::new(BinSearchOptim { rate }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum ZoneSelectConfig {
    Random {
        samples: usize,
        #[serde(default)]
        seed: u64,
    },
}

impl ZoneSelectConfig {
    pub fn strategy(&self) -> Box<dyn ZoneSelectStrategy> {
        match *self {
            ZoneSelectConfig::Random { samples, seed } => Box::new(RandZoneSelect { samples, seed }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum ZoneBuildConfig {
    KClosest { size: usize },
}

impl ZoneBuildConfig {
    pub fn strategy(&self) -> Box<dyn ZoneBuildStrategy> {
        match *self {
            ZoneBuildConfig::KClosest { size } => Box::new(KClosestZone { size }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum ZoneEdgesConfig {
    Isl,
}

impl ZoneEdgesConfig {
    pub fn strategy(&self) -> Box<dyn ZoneEdgesStrategy> {
        match self {
            ZoneEdgesConfig::Isl => Box::new(IslZoneEdges),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strat")]
pub enum ZoneBneckConfig {
    Detect,
}

impl ZoneBneckConfig {
    pub fn strategy(&self) -> Box<dyn ZoneBottleneckStrategy> {
        match self {
            ZoneBneckConfig::Detect => Box::new(DetectBneck),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_list_sets_run_count() {
        let config = json!({
            "lsn": { "orbits": [72, 50], "f": 11 },
            "rout": { "strat": ["KSP", "KDG", "RANDOM"] }
        });
        let runs = expand(&config).unwrap();

        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0]["lsn"]["orbits"], json!(72));
        assert_eq!(runs[1]["lsn"]["orbits"], json!(50));
        // Shorter lists repeat their last element
        assert_eq!(runs[2]["lsn"]["orbits"], json!(50));
        assert_eq!(runs[2]["lsn"]["f"], json!(11));
        assert_eq!(runs[2]["rout"]["strat"], json!("RANDOM"));
    }

    #[test]
    fn test_nested_list_is_a_single_value() {
        let config = json!({ "atk_constr": { "geo_names": [["USA", "RUS"]] } });
        let runs = expand(&config).unwrap();

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0]["atk_constr"]["geo_names"], json!(["USA", "RUS"]));
    }

    #[test]
    fn test_empty_list_rejected() {
        let config = json!({ "rout": { "k": [] } });
        assert!(expand(&config).is_err());

        assert!(expand(&json!([1, 2])).is_err());
        assert!(expand(&json!({ "rout": 5 })).is_err());
    }

    #[test]
    fn test_default_config_expands_to_five_runs() {
        let runs = expand(&default_config()).unwrap();
        let labels: Vec<&str> = runs
            .into_iter()
            .map(|run| RunConfig::from_value(run).unwrap().rout.label())
            .collect();
        assert_eq!(labels, vec!["KDG", "KDS", "KLO", "KSP", "PROPOSED"]);
    }

    #[test]
    fn test_reference_lsn_parameters() {
        let runs = expand(&default_config()).unwrap();
        let run = RunConfig::from_value(runs[0].clone()).unwrap();
        let lsn = run.lsn.strategy();

        assert_eq!(lsn.orbits * lsn.sats_per_orbit, 1584);
        assert_eq!(lsn.phase_offset, 11);
        assert!((lsn.altitude_km - 550.0).abs() < 1e-9);
        assert!((lsn.elapsed_s - 137.0).abs() < 1e-9);
        assert_eq!(run.bw_asg.udl_bw(), 400.0);
        assert_eq!(run.bw_asg.isl_bw(), 2000.0);
    }

    #[test]
    fn test_unused_params_are_ignored() {
        let run = json!({
            "lsn": { "strat": "Walker", "inclination": 53, "sats_per_orbit": 4, "orbits": 4, "f": 1, "elevation": 550000 },
            "grid": { "strat": "LatLon", "step_deg": 30.0, "repeats": 22 },
            "gweight": { "strat": "Uniform", "dataset_file": null },
            "cover": { "strat": "Angle", "min_elev_angle": 20 },
            "rout": { "strat": "KSP", "desirability_stretch": 2.0, "k": 3, "esx_theta": 0.5 },
            "edges": { "strat": "Bidir" },
            "bw_sel": { "strat": "Weighted", "sampled_quanta": 10 },
            "bw_asg": { "strat": "Bidir", "isl_bw": 10, "udl_bw": 5, "utilisation": 0.5 },
            "atk_constr": { "strat": "None", "geo_names": ["USA", "RUS"] },
            "atk_filt": { "strat": "Directional" },
            "atk_feas": { "strat": "Capacity" },
            "atk_optim": { "strat": "BinSearch", "rate": 1.0 },
            "zone_select": { "strat": "Random", "samples": 5000 },
            "zone_build": { "strat": "KClosest", "size": 6 },
            "zone_edges": { "strat": "Isl" },
            "zone_bneck": { "strat": "Detect" },
            "plot": { "strat": "None" }
        });
        let run = RunConfig::from_value(run).unwrap();

        assert_eq!(run.gweight, WeightConfig::Uniform);
        assert_eq!(run.rout.strategy(None).name(), "ksp");
        assert_eq!(run.lsn.strategy().elapsed_s, 0.0);
        assert_eq!(run.bw_sel, BwSelectConfig::Weighted);
    }

    #[test]
    fn test_attack_roles_assembled() {
        let runs = expand(&default_config()).unwrap();
        let run = RunConfig::from_value(runs[0].clone()).unwrap();

        assert_eq!(run.atk_constr, ConstraintConfig::None);
        assert_eq!(run.link_attack().describe(), "none:/directional/capacity/binsearch:r1");
        assert_eq!(run.zone_attack().describe(), "random:n5000s0/kclosest:k6/isl/detect");
        assert_eq!(
            run.bw_sel,
            BwSelectConfig::Sampled {
                sampled_quanta: 250000,
                seed: 0
            }
        );

        let cells = json!({ "strat": "Cells", "grid_points": [1549, 1530] });
        let constr: ConstraintConfig = serde_json::from_value(cells).unwrap();
        assert_eq!(constr.strategy().param_description(), "1549,1530");
    }

    #[test]
    fn test_seed_override_wins() {
        let rout = RoutConfig::Random {
            desirability_stretch: 2.3,
            k: 5,
            esx_theta: 0.5,
            seed: Some(1),
        };
        let strategy = rout.strategy(Some(7));
        assert_eq!(strategy.name(), "random");
        assert_eq!(strategy.param_description(), "2.3k5t0.5:seed7");
        assert_eq!(rout.strategy(None).param_description(), "2.3k5t0.5:seed1");

        let unknown = json!({ "strat": "DIJKSTRA", "k": 1 });
        assert!(serde_json::from_value::<RoutConfig>(unknown).is_err());
    }
}
