//! Run configuration.
//!
//! Values are taken from the following sources, each overriding the last:
//!
//! 1. Built-in defaults
//! 2. A YAML file
//! 3. Environment variables (`DMRG_*`)
//! 4. Command-line arguments (applied by the binary)

use std::{ env, fs, path::Path, str::FromStr };
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use tracing::warn;
use crate::dmrg::SweepParams;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: could not read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: could not parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Returned by [`Config::validate`].
    #[error("config error: {0}")]
    Invalid(String),
}
use ConfigError::*;
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Sweep and truncation parameters.
    #[serde(default)]
    pub sweep: SweepParams,

    /// Spin chain Hamiltonian.
    #[serde(default)]
    pub model: ModelConfig,

    /// Process layout and initial state.
    #[serde(default)]
    pub run: RunConfig,
}

fn default_sites() -> usize { 10 }
fn default_coupling() -> f64 { 1.0 }
fn default_workers() -> usize { num_cpus::get().saturating_sub(1).max(1) }
fn default_seed() -> u64 { 10546 }
fn default_init_bond_dim() -> usize { 8 }

/// Parameters of the XXZ chain
/// `H = Σ jxy/2 (S+S- + S-S+) + jz SzSz + field Σ Sz`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_sites")]
    pub sites: usize,

    #[serde(default = "default_coupling")]
    pub jz: f64,

    #[serde(default = "default_coupling")]
    pub jxy: f64,

    #[serde(default)]
    pub field: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            sites: default_sites(),
            jz: default_coupling(),
            jxy: default_coupling(),
            field: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of worker ranks; the master is an additional rank.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seed for the random initial state.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Bond dimension of the random initial state.
    #[serde(default = "default_init_bond_dim")]
    pub init_bond_dim: usize,

    /// Use complex rather than real tensor elements.
    #[serde(default)]
    pub complex: bool,

    /// Keep operator groups and MPS tensors in memory instead of on disk.
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            seed: default_seed(),
            init_bond_dim: default_init_bond_dim(),
            complex: false,
            in_memory: false,
        }
    }
}

fn parse_into<T>(key: &str, val: &str, target: &mut T)
where T: FromStr
{
    match val.trim().parse() {
        Ok(x) => { *target = x; },
        Err(_) => { warn!(key, val, "ignoring unparseable environment override"); },
    }
}

fn parse_flag(val: &str) -> bool {
    let val = val.trim();
    val == "1" || val.eq_ignore_ascii_case("true")
}

impl Config {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(config_path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_yaml(&fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a YAML document. Missing fields take their default values.
    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Render as a YAML document.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply `DMRG_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// Apply `DMRG_*` overrides looked up through `get`.
    pub fn apply_overrides_from<F>(&mut self, get: F)
    where F: Fn(&str) -> Option<String>
    {
        let sweep = &mut self.sweep;
        if let Some(val) = get("DMRG_SWEEPS") { parse_into("DMRG_SWEEPS", &val, &mut sweep.sweeps); }
        if let Some(val) = get("DMRG_DMIN") { parse_into("DMRG_DMIN", &val, &mut sweep.dmin); }
        if let Some(val) = get("DMRG_DMAX") { parse_into("DMRG_DMAX", &val, &mut sweep.dmax); }
        if let Some(val) = get("DMRG_TRUNC_ERR") {
            parse_into("DMRG_TRUNC_ERR", &val, &mut sweep.trunc_err);
        }
        if let Some(val) = get("DMRG_LANCZOS_ERROR") {
            parse_into("DMRG_LANCZOS_ERROR", &val, &mut sweep.lanczos.error);
        }
        if let Some(val) = get("DMRG_LANCZOS_MAX_ITERATIONS") {
            parse_into("DMRG_LANCZOS_MAX_ITERATIONS", &val, &mut sweep.lanczos.max_iterations);
        }
        if let Some(val) = get("DMRG_MPS_PATH") { sweep.mps_path = val.into(); }
        if let Some(val) = get("DMRG_TEMP_PATH") { sweep.temp_path = val.into(); }

        let model = &mut self.model;
        if let Some(val) = get("DMRG_SITES") { parse_into("DMRG_SITES", &val, &mut model.sites); }
        if let Some(val) = get("DMRG_JZ") { parse_into("DMRG_JZ", &val, &mut model.jz); }
        if let Some(val) = get("DMRG_JXY") { parse_into("DMRG_JXY", &val, &mut model.jxy); }
        if let Some(val) = get("DMRG_FIELD") { parse_into("DMRG_FIELD", &val, &mut model.field); }

        let run = &mut self.run;
        if let Some(val) = get("DMRG_WORKERS") { parse_into("DMRG_WORKERS", &val, &mut run.workers); }
        if let Some(val) = get("DMRG_SEED") { parse_into("DMRG_SEED", &val, &mut run.seed); }
        if let Some(val) = get("DMRG_INIT_BOND_DIM") {
            parse_into("DMRG_INIT_BOND_DIM", &val, &mut run.init_bond_dim);
        }
        if let Some(val) = get("DMRG_COMPLEX") { run.complex = parse_flag(&val); }
        if let Some(val) = get("DMRG_IN_MEMORY") { run.in_memory = parse_flag(&val); }
    }

    /// Check that the configuration describes a runnable job.
    pub fn validate(&self) -> ConfigResult<()> {
        self.sweep.check().map_err(|err| Invalid(err.to_string()))?;
        if self.model.sites < 3 {
            return Err(Invalid(format!("need at least 3 sites, got {}", self.model.sites)));
        }
        if self.run.workers == 0 {
            return Err(Invalid("need at least 1 worker".into()));
        }
        if self.run.init_bond_dim == 0 {
            return Err(Invalid("initial bond dimension must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap as HashMap;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            "sweep:\n  dmax: 20\n  lanczos:\n    max_iterations: 30\nmodel:\n  jz: 0.5\n"
        ).unwrap();
        assert_eq!(config.sweep.dmax, 20);
        assert_eq!(config.sweep.dmin, 1);
        assert_eq!(config.sweep.lanczos.max_iterations, 30);
        assert_eq!(config.sweep.lanczos.error, 1e-9);
        assert_eq!(config.model.jz, 0.5);
        assert_eq!(config.model.sites, 10);
        assert_eq!(config.run, RunConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_round_trip() {
        let mut config = Config::default();
        config.run.complex = true;
        config.sweep.trunc_err = 1e-7;
        let parsed = Config::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str>
            = [
                ("DMRG_SITES", "12"),
                ("DMRG_DMAX", "not a number"),
                ("DMRG_LANCZOS_ERROR", "1e-12"),
                ("DMRG_COMPLEX", "TRUE"),
                ("DMRG_TEMP_PATH", "/tmp/blocks"),
            ]
            .into_iter()
            .collect();
        let mut config = Config::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.model.sites, 12);
        assert_eq!(config.sweep.dmax, SweepParams::default().dmax);
        assert_eq!(config.sweep.lanczos.error, 1e-12);
        assert!(config.run.complex);
        assert_eq!(config.sweep.temp_path, Path::new("/tmp/blocks"));
    }

    #[test]
    fn validation() {
        let mut config = Config::default();
        config.sweep.dmin = 100;
        assert!(matches!(config.validate(), Err(Invalid(_))));
        let mut config = Config::default();
        config.model.sites = 2;
        assert!(matches!(config.validate(), Err(Invalid(_))));
        let mut config = Config::default();
        config.run.workers = 0;
        assert!(matches!(config.validate(), Err(Invalid(_))));
        let mut config = Config::default();
        config.sweep.dmax = 0;
        assert!(matches!(config.validate(), Err(Invalid(_))));
    }

    #[test]
    fn malformed_yaml() {
        assert!(matches!(Config::from_yaml("sweep: [1, 2"), Err(Yaml(_))));
        assert!(matches!(Config::load(Some(Path::new("/nonexistent/dmrg.yaml"))), Err(Io(_))));
    }
}
