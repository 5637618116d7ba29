use std::time::Duration;

pub const DEFAULT_PLUGIN_NAME: &str = "sonata.kernel.InfrAdaptor";
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Process configuration, read from `INFRABRIDGE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptorConfig {
    /// MQTT broker URL. `None` runs on the in-memory bus.
    pub bus_url: Option<String>,
    pub heartbeat_interval: Duration,
    pub handshake_timeout: Duration,
    pub plugin_name: String,
    pub plugin_version: String,
}

impl Default for AdaptorConfig {
    fn default() -> Self {
        Self {
            bus_url: None,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            plugin_name: DEFAULT_PLUGIN_NAME.to_string(),
            plugin_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AdaptorConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let defaults = Self::default();
        let bus_url = lookup("INFRABRIDGE_BUS_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        Ok(Self {
            bus_url,
            heartbeat_interval: seconds(
                &lookup,
                "INFRABRIDGE_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            )?,
            handshake_timeout: seconds(
                &lookup,
                "INFRABRIDGE_HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout,
            )?,
            plugin_name: lookup("INFRABRIDGE_PLUGIN_NAME").unwrap_or(defaults.plugin_name),
            plugin_version: defaults.plugin_version,
        })
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, String> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(0) => Err(format!("{key} must be greater than zero")),
            Ok(secs) => Ok(Duration::from_secs(secs)),
            Err(_) => Err(format!("{key} must be a whole number of seconds, got '{raw}'")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AdaptorConfig, String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AdaptorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config, AdaptorConfig::default());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
        assert_eq!(config.plugin_name, "sonata.kernel.InfrAdaptor");
        assert!(config.bus_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("INFRABRIDGE_BUS_URL", "mqtt://broker:1883"),
            ("INFRABRIDGE_HEARTBEAT_INTERVAL_SECS", "10"),
            ("INFRABRIDGE_PLUGIN_NAME", "adaptor-2"),
        ])
        .unwrap();
        assert_eq!(config.bus_url.as_deref(), Some("mqtt://broker:1883"));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.plugin_name, "adaptor-2");
    }

    #[test]
    fn test_blank_bus_url_means_in_memory() {
        assert!(config(&[("INFRABRIDGE_BUS_URL", "  ")])
            .unwrap()
            .bus_url
            .is_none());
    }

    #[test]
    fn test_invalid_durations_rejected() {
        assert!(config(&[("INFRABRIDGE_HANDSHAKE_TIMEOUT_SECS", "soon")]).is_err());
        assert!(config(&[("INFRABRIDGE_HEARTBEAT_INTERVAL_SECS", "0")]).is_err());
    }
}
