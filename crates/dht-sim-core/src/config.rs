//! Layered configuration matching the `simulation.*`/`dht.*`/`network.*`/
//! `logging.*` keys. Modeled on the teacher daemon's `DaemonConfig`: nested
//! structs with `#[serde(default = ...)]` fields and a `load()` that falls
//! back to `Default` when no file is present.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub dht: DhtSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            simulation: SimulationSection::default(),
            dht: DhtSection::default(),
            network: NetworkSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSection {
    #[serde(default = "default_time_tick_ms")]
    pub time_tick_ms: u64,
    #[serde(default)]
    pub max_time: Option<u64>,
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for SimulationSection {
    fn default() -> Self {
        SimulationSection {
            time_tick_ms: default_time_tick_ms(),
            max_time: None,
            random_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtSection {
    #[serde(default = "default_k_value")]
    pub k_value: usize,
    #[serde(default = "default_id_bits")]
    pub id_bits: usize,
    /// Intended concurrency width of iterative lookups. Currently only
    /// documented — not used to throttle parallelism, per §9.
    #[serde(default = "default_alpha")]
    pub alpha: usize,
    #[serde(default = "default_republish_interval")]
    pub republish_interval: u64,
}

impl Default for DhtSection {
    fn default() -> Self {
        DhtSection {
            k_value: default_k_value(),
            id_bits: default_id_bits(),
            alpha: default_alpha(),
            republish_interval: default_republish_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_min_delay")]
    pub min_delay: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay: u64,
    #[serde(default = "default_base_packet_loss")]
    pub base_packet_loss: f64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        NetworkSection {
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            base_packet_loss: default_base_packet_loss(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        LoggingSection {
            level: default_log_level(),
            file: None,
            console: true,
        }
    }
}

fn default_time_tick_ms() -> u64 {
    100
}
fn default_k_value() -> usize {
    8
}
fn default_id_bits() -> usize {
    160
}
fn default_alpha() -> usize {
    3
}
fn default_republish_interval() -> u64 {
    3600
}
fn default_min_delay() -> u64 {
    1
}
fn default_max_delay() -> u64 {
    3
}
fn default_base_packet_loss() -> f64 {
    0.10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

/// Errors loading or parsing a configuration file. Fatal at startup, per the
/// error-handling policy's "input errors" category.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl SimConfig {
    /// Load from a TOML file, or fall back to defaults if `path` is `None`.
    /// Unknown keys are ignored for forward compatibility.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.simulation.time_tick_ms, 100);
        assert_eq!(cfg.dht.k_value, 8);
        assert_eq!(cfg.dht.id_bits, 160);
        assert_eq!(cfg.dht.alpha, 3);
        assert_eq!(cfg.dht.republish_interval, 3600);
        assert_eq!(cfg.network.min_delay, 1);
        assert_eq!(cfg.network.max_delay, 3);
        assert!((cfg.network.base_packet_loss - 0.10).abs() < f64::EPSILON);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = SimConfig::default();
        let s = toml::to_string(&cfg).expect("serialize");
        let back: SimConfig = toml::from_str(&s).expect("parse");
        assert_eq!(back.dht.k_value, cfg.dht.k_value);
    }

    #[test]
    fn partial_file_falls_back_to_defaults_for_missing_keys() {
        let s = "[dht]\nk_value = 4\n";
        let cfg: SimConfig = toml::from_str(s).expect("parse");
        assert_eq!(cfg.dht.k_value, 4);
        assert_eq!(cfg.dht.id_bits, 160);
        assert_eq!(cfg.network.min_delay, 1);
    }
}
