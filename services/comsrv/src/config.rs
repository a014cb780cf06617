//! Service configuration
//!
//! Loaded from YAML/TOML/JSON with `COMSRV_` environment overrides, e.g.
//! `COMSRV_PROTOCOLS__MNDOT__MAX_RETRIES=5`.

use common::LoggingConfig;
use errors::{TmsError, TmsResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::protocols::{CommProtocol, ProtocolFamily};
use crate::reconnect::ReconnectPolicy;
use crate::transport::LinkTransportConfig;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "COMSRV_";

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/comsrv.yaml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub protocols: ProtocolPolicies,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

fn default_service_name() -> String {
    "comsrv".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Period of the status/sample tick
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Effective retry/timeout policy of a link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolPolicy {
    /// Retries of a phase after a retryable error
    pub max_retries: u32,
    /// Receive timeout per read
    pub timeout_ms: u64,
    /// Operations in a row exhausting their retries before the link is
    /// closed and reopened (0 disables)
    pub link_failure_threshold: u32,
    pub reconnect: ReconnectPolicy,
}

impl ProtocolPolicy {
    pub fn defaults_for(family: ProtocolFamily) -> Self {
        let (max_retries, timeout_ms) = match family {
            ProtocolFamily::Ntcip => (2, 5000),
            ProtocolFamily::Mndot => (3, 750),
            ProtocolFamily::Pelco => (1, 1000),
        };
        Self {
            max_retries,
            timeout_ms,
            link_failure_threshold: 5,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Partial policy; unset fields keep the family default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyOverride {
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub link_failure_threshold: Option<u32>,
    pub reconnect: Option<ReconnectPolicy>,
}

impl PolicyOverride {
    fn apply(&self, policy: &mut ProtocolPolicy) {
        if let Some(max_retries) = self.max_retries {
            policy.max_retries = max_retries;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            policy.timeout_ms = timeout_ms;
        }
        if let Some(threshold) = self.link_failure_threshold {
            policy.link_failure_threshold = threshold;
        }
        if let Some(reconnect) = &self.reconnect {
            policy.reconnect = reconnect.clone();
        }
    }
}

/// Per-family policy overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolPolicies {
    #[serde(default)]
    pub ntcip: PolicyOverride,
    #[serde(default)]
    pub mndot: PolicyOverride,
    #[serde(default)]
    pub pelco: PolicyOverride,
}

impl ProtocolPolicies {
    fn family(&self, family: ProtocolFamily) -> &PolicyOverride {
        match family {
            ProtocolFamily::Ntcip => &self.ntcip,
            ProtocolFamily::Mndot => &self.mndot,
            ProtocolFamily::Pelco => &self.pelco,
        }
    }
}

/// One communication link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub name: String,
    pub protocol: CommProtocol,
    pub transport: LinkTransportConfig,
    /// Link-level policy overrides
    #[serde(default, flatten)]
    pub policy: PolicyOverride,
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
}

fn default_active() -> bool {
    true
}

/// A controller on a link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub name: String,
    #[serde(default)]
    pub drop: u16,
    /// SNMP write community / controller password
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Sign face size in pixels, needed for pixel bitmaps
    #[serde(default)]
    pub sign_pixels: Option<SignPixels>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignPixels {
    pub width: u16,
    pub height: u16,
}

impl AppConfig {
    /// Load and validate configuration from `path`
    pub fn load(path: &Path) -> TmsResult<Self> {
        let config: AppConfig = common::load_config(path, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// Effective policy of a link: family default, family override, link override
    pub fn policy_for(&self, link: &LinkConfig) -> ProtocolPolicy {
        let family = link.protocol.family();
        let mut policy = ProtocolPolicy::defaults_for(family);
        self.protocols.family(family).apply(&mut policy);
        link.policy.apply(&mut policy);
        policy
    }

    pub fn validate(&self) -> TmsResult<()> {
        if self.service.poll_interval_secs == 0 {
            return Err(TmsError::invalid_config(
                "service.poll_interval_secs",
                "must be greater than zero",
            ));
        }

        let mut link_names = HashSet::new();
        let mut controller_names = HashSet::new();
        for (i, link) in self.links.iter().enumerate() {
            if link.name.is_empty() {
                return Err(TmsError::invalid_config(
                    format!("links[{i}].name"),
                    "cannot be empty",
                ));
            }
            if !link_names.insert(link.name.as_str()) {
                return Err(TmsError::invalid_config(
                    format!("links[{i}].name"),
                    format!("duplicate link '{}'", link.name),
                ));
            }
            link.transport.validate().map_err(|e| {
                TmsError::invalid_config(format!("links[{i}].transport"), e.to_string())
            })?;
            let policy = self.policy_for(link);
            if policy.timeout_ms == 0 {
                return Err(TmsError::invalid_config(
                    format!("links[{i}].timeout_ms"),
                    "must be greater than zero",
                ));
            }
            if let Err(reason) = policy.reconnect.validate() {
                return Err(TmsError::invalid_config(format!("links[{i}].reconnect"), reason));
            }

            let range = link.protocol.drop_range();
            let mut drops = HashSet::new();
            for (j, controller) in link.controllers.iter().enumerate() {
                let field = format!("links[{i}].controllers[{j}]");
                if !controller_names.insert(controller.name.as_str()) {
                    return Err(TmsError::invalid_config(
                        field,
                        format!("duplicate controller '{}'", controller.name),
                    ));
                }
                if !range.contains(&controller.drop) {
                    return Err(TmsError::invalid_config(
                        format!("{field}.drop"),
                        format!(
                            "{} out of range {}..={} for {}",
                            controller.drop,
                            range.start(),
                            range.end(),
                            link.protocol
                        ),
                    ));
                }
                if link.protocol != CommProtocol::Ntcip && !drops.insert(controller.drop) {
                    return Err(TmsError::invalid_config(
                        format!("{field}.drop"),
                        format!("drop {} already used on {}", controller.drop, link.name),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
service:
  poll_interval_secs: 30
logging:
  level: debug
protocols:
  mndot:
    max_retries: 4
links:
  - name: rmeter1
    protocol: mndot5
    transport:
      type: tcp
      host: 10.1.2.3
      port: 9001
    timeout_ms: 900
    controllers:
      - name: ctl_5
        drop: 5
      - name: ctl_6
        drop: 6
  - name: dms1
    protocol: ntcip
    transport:
      type: udp
      host: 10.1.2.4
      port: 161
    controllers:
      - name: V35W01
        password: secret
        sign_pixels: { width: 96, height: 24 }
"#;

    fn parse(yaml: &str) -> AppConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_policy_resolution() {
        let config = parse(SAMPLE);
        config.validate().unwrap();

        let mndot = config.policy_for(&config.links[0]);
        assert_eq!(mndot.max_retries, 4);
        assert_eq!(mndot.timeout_ms, 900);

        let ntcip = config.policy_for(&config.links[1]);
        assert_eq!(ntcip.max_retries, 2);
        assert_eq!(ntcip.timeout(), Duration::from_millis(5000));

        assert_eq!(ProtocolPolicy::defaults_for(ProtocolFamily::Pelco).max_retries, 1);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut config = parse(SAMPLE);
        config.links[1].name = "rmeter1".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate link"));

        let mut config = parse(SAMPLE);
        config.links[1].controllers[0].name = "ctl_5".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("duplicate controller"));
    }

    #[test]
    fn test_drop_range_rejected() {
        let mut config = parse(SAMPLE);
        config.links[0].controllers[0].drop = 32;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("out of range 1..=31"));

        let mut config = parse(SAMPLE);
        config.links[0].controllers[1].drop = 5;
        assert!(config.validate().unwrap_err().to_string().contains("already used"));
    }

    #[test]
    fn test_bad_backoff_rejected() {
        for multiplier in [0.5, -2.0, f64::NAN, f64::INFINITY] {
            let mut config = parse(SAMPLE);
            config.links[0].policy.reconnect = Some(ReconnectPolicy {
                backoff_multiplier: multiplier,
                ..ReconnectPolicy::default()
            });
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("backoff_multiplier"), "{multiplier}: {err}");
        }
    }

    #[test]
    fn test_shipped_sample_is_valid() {
        let config = parse(include_str!("../../../config/comsrv.yaml"));
        config.validate().unwrap();
        assert_eq!(config.links.len(), 5);
        let serial = config.policy_for(&config.links[2]);
        assert_eq!((serial.max_retries, serial.timeout_ms), (3, 1000));
    }

    #[test]
    fn test_load_with_env_override() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        std::env::set_var("COMSRV_SERVICE__POLL_INTERVAL_SECS", "10");
        let config = AppConfig::load(file.path());
        std::env::remove_var("COMSRV_SERVICE__POLL_INTERVAL_SECS");
        let config = config.unwrap();
        assert_eq!(config.service.poll_interval_secs, 10);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.links[1].controllers[0].password.as_deref(), Some("secret"));
    }
}
