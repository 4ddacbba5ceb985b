use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::types::AgentId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("environment variable {name} has invalid value `{value}`")]
    Env { name: String, value: String },
    #[error("{field} is out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Base timeout; each agent adds its own id on top.
    pub timeout_ticks: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { timeout_ticks: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub range: f32,
    pub loss_probability: f64,
    pub seed: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            range: 8.0,
            loss_probability: 0.0,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub leader_id: AgentId,
    pub reply_window_ticks: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            leader_id: 0,
            reply_window_ticks: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    pub reverse_distance: f32,
    pub rotate_angle_degrees: f32,
    pub contact_radius: f32,
    pub negotiate: bool,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            reverse_distance: 0.5,
            rotate_angle_degrees: 90.0,
            contact_radius: 1.5,
            negotiate: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub heartbeat: HeartbeatConfig,
    pub transport: TransportConfig,
    pub bootstrap: BootstrapConfig,
    pub collision: CollisionConfig,
    pub tick_interval_ms: u64,
}

impl SwarmConfig {
    /// Defaults overlaid with any `SWARM_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML file, or YAML when the extension is `.yaml`/`.yml`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: SwarmConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)?,
            _ => toml::from_str(&raw)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = parse_env(&lookup, "SWARM_HEARTBEAT_TIMEOUT")? {
            self.heartbeat.timeout_ticks = value;
        }
        if let Some(value) = parse_env(&lookup, "SWARM_TRANSPORT_RANGE")? {
            self.transport.range = value;
        }
        if let Some(value) = parse_env(&lookup, "SWARM_TRANSPORT_LOSS")? {
            self.transport.loss_probability = value;
        }
        if let Some(value) = parse_env(&lookup, "SWARM_SEED")? {
            self.transport.seed = value;
        }
        if let Some(value) = parse_env(&lookup, "SWARM_LEADER_ID")? {
            self.bootstrap.leader_id = value;
        }
        if let Some(value) = parse_env(&lookup, "SWARM_COLLISION_NEGOTIATE")? {
            self.collision.negotiate = value;
        }
        if let Some(value) = parse_env(&lookup, "SWARM_TICK_INTERVAL_MS")? {
            self.tick_interval_ms = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.transport.loss_probability) {
            return Err(ConfigError::OutOfRange {
                field: "transport.loss_probability",
                reason: format!("{} is not within [0, 1]", self.transport.loss_probability),
            });
        }
        if self.transport.range.is_nan() || self.transport.range < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "transport.range",
                reason: format!("{} is negative", self.transport.range),
            });
        }
        if self.heartbeat.timeout_ticks == 0 {
            return Err(ConfigError::OutOfRange {
                field: "heartbeat.timeout_ticks",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.bootstrap.reply_window_ticks == 0 {
            return Err(ConfigError::OutOfRange {
                field: "bootstrap.reply_window_ticks",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Env {
                name: name.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SwarmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat.timeout_ticks, 10);
        assert_eq!(config.bootstrap.leader_id, 0);
        assert!(config.collision.negotiate);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SWARM_HEARTBEAT_TIMEOUT", "25"),
            ("SWARM_TRANSPORT_LOSS", "0.2"),
            ("SWARM_COLLISION_NEGOTIATE", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = SwarmConfig::default();
        config
            .apply_env(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.heartbeat.timeout_ticks, 25);
        assert!((config.transport.loss_probability - 0.2).abs() < 1e-9);
        assert!(!config.collision.negotiate);
        assert_eq!(config.transport.range, 8.0);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = SwarmConfig::default();
        let result = config.apply_env(|name| {
            (name == "SWARM_SEED").then(|| "seven".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Env { .. })));
    }

    #[test]
    fn test_loss_probability_out_of_range() {
        let mut config = SwarmConfig::default();
        config.transport.loss_probability = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "transport.loss_probability",
                ..
            })
        ));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "tick_interval_ms = 5\n[heartbeat]\ntimeout_ticks = 4\n[transport]\nrange = 3.5"
        )
        .unwrap();

        let config = SwarmConfig::from_file(file.path()).unwrap();
        assert_eq!(config.tick_interval_ms, 5);
        assert_eq!(config.heartbeat.timeout_ticks, 4);
        assert_eq!(config.transport.range, 3.5);
        assert_eq!(config.transport.seed, 7);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "bootstrap:\n  leader_id: 3\ncollision:\n  negotiate: false").unwrap();

        let config = SwarmConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bootstrap.leader_id, 3);
        assert!(!config.collision.negotiate);
    }

    #[test]
    fn test_missing_file() {
        let result = SwarmConfig::from_file("/nonexistent/swarm.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
