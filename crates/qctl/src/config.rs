//! Platform configuration.
//!
//! Loads [`PlatformConfig`] from a TOML file (`qctl.toml`) with environment
//! variable overrides via `QCTL_*` prefixed variables:
//!
//! | Variable            | Effect                                               |
//! |---------------------|------------------------------------------------------|
//! | `QCTL_PLATFORM`     | `reference` or `opencl`                              |
//! | `QCTL_PROBE_HOST`   | expose the host CPU as the `host:host` device        |
//! | `QCTL_FAKE_DEVICES` | replace `devices`, e.g. `opencl:cpu,opencl:gpu*2`    |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::backend::{Backend, DeviceType};

pub const ENV_PLATFORM: &str = "QCTL_PLATFORM";
pub const ENV_PROBE_HOST: &str = "QCTL_PROBE_HOST";
pub const ENV_FAKE_DEVICES: &str = "QCTL_FAKE_DEVICES";

/// Largest `count` one simulated device entry may expand to.
pub const MAX_DEVICE_COUNT: usize = 1024;

/// Which [`Platform`](crate::platform::Platform) implementation backs the
/// process-wide manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// Deterministic host reference platform driven by `devices`.
    #[default]
    Reference,
    /// Real OpenCL runtime (requires the `opencl` feature).
    OpenCl,
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::OpenCl => write!(f, "opencl"),
        }
    }
}

impl FromStr for PlatformKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reference" | "ref" => Ok(Self::Reference),
            "opencl" => Ok(Self::OpenCl),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// One simulated device (or a run of identical devices) on the reference platform.
///
/// Unset properties take per-device-type defaults chosen by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub backend: Backend,
    pub device_type: DeviceType,
    /// Number of identical devices this entry expands to.
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_compute_units: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_work_group_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_sub_groups: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int64_base_atomics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int64_extended_atomics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_unified_memory: Option<bool>,
}

const fn default_count() -> usize {
    1
}

impl DeviceSpec {
    pub fn new(backend: Backend, device_type: DeviceType) -> Self {
        Self {
            backend,
            device_type,
            count: 1,
            name: None,
            vendor: None,
            driver_version: None,
            max_compute_units: None,
            max_work_group_size: None,
            max_num_sub_groups: None,
            int64_base_atomics: None,
            int64_extended_atomics: None,
            host_unified_memory: None,
        }
    }

    #[must_use]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let label = format!("{}:{}", self.backend, self.device_type);
        if !self.device_type.is_concrete() {
            return Err(ConfigError::Validation(format!(
                "device `{label}` must use a concrete device type, not a selector"
            )));
        }
        if (self.backend == Backend::Host) != (self.device_type == DeviceType::Host) {
            return Err(ConfigError::Validation(format!(
                "device `{label}`: the host device type is only valid on the host backend"
            )));
        }
        if self.count == 0 || self.count > MAX_DEVICE_COUNT {
            return Err(ConfigError::Validation(format!(
                "device `{label}`: count must be in 1..={MAX_DEVICE_COUNT}, got {}",
                self.count
            )));
        }
        if let Some(size) = self.max_work_group_size {
            if size == 0 || !size.is_power_of_two() {
                return Err(ConfigError::Validation(format!(
                    "device `{label}`: max_work_group_size must be a power of two, got {size}"
                )));
            }
        }
        Ok(())
    }
}

/// Parses `backend:device_type[*count]`, e.g. `opencl:gpu*2`.
impl FromStr for DeviceSpec {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (category, count) = match s.split_once('*') {
            Some((category, count)) => {
                let count = count
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| format!("invalid device count in `{s}`: {e}"))?;
                (category, count)
            }
            None => (s, 1),
        };
        let (backend, device_type) = category
            .split_once(':')
            .ok_or_else(|| format!("expected `backend:device_type[*count]`, got `{s}`"))?;
        Ok(Self::new(backend.parse()?, device_type.parse()?).with_count(count))
    }
}

/// Configuration for the process-wide platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Override: `QCTL_PLATFORM`
    pub platform: PlatformKind,

    /// Expose the host CPU as the `host:host` device.
    /// Override: `QCTL_PROBE_HOST`
    pub probe_host: bool,

    /// Simulated devices for the reference platform, in enumeration order.
    /// Override: `QCTL_FAKE_DEVICES`
    pub devices: Vec<DeviceSpec>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self { platform: PlatformKind::Reference, probe_host: true, devices: Vec::new() }
    }
}

/// Errors that can occur when loading or validating a [`PlatformConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl PlatformConfig {
    /// Generate a default configuration TOML string.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        Self::default().to_toml()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load from a TOML string, then apply environment overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: PlatformConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for spec in &self.devices {
            spec.validate()?;
        }
        if self.platform == PlatformKind::OpenCl && !cfg!(feature = "opencl") {
            return Err(ConfigError::Validation(
                "platform `opencl` requires building with the `opencl` feature".into(),
            ));
        }
        Ok(())
    }

    /// Apply `QCTL_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var(ENV_PLATFORM) {
            self.platform = val.parse().map_err(|reason| ConfigError::EnvOverride {
                key: ENV_PLATFORM.into(),
                value: val.clone(),
                reason,
            })?;
        }

        if let Ok(val) = std::env::var(ENV_PROBE_HOST) {
            self.probe_host = parse_flag(&val).ok_or_else(|| ConfigError::EnvOverride {
                key: ENV_PROBE_HOST.into(),
                value: val.clone(),
                reason: "expected one of 1/0, true/false, yes/no, on/off".into(),
            })?;
        }

        if let Ok(val) = std::env::var(ENV_FAKE_DEVICES) {
            self.devices = val
                .split([',', ';'])
                .filter(|part| !part.trim().is_empty())
                .map(str::parse::<DeviceSpec>)
                .collect::<Result<_, _>>()
                .map_err(|reason| ConfigError::EnvOverride {
                    key: ENV_FAKE_DEVICES.into(),
                    value: val.clone(),
                    reason,
                })?;
        }

        Ok(())
    }
}

fn parse_flag(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn without_overrides<R>(f: impl FnOnce() -> R) -> R {
        temp_env::with_vars(
            [
                (ENV_PLATFORM, None::<&str>),
                (ENV_PROBE_HOST, None),
                (ENV_FAKE_DEVICES, None),
            ],
            f,
        )
    }

    #[test]
    fn device_spec_parses_counts() {
        let spec: DeviceSpec = "opencl:gpu*2".parse().unwrap();
        assert_eq!(spec.backend, Backend::OpenCl);
        assert_eq!(spec.device_type, DeviceType::Gpu);
        assert_eq!(spec.count, 2);

        let spec: DeviceSpec = " level_zero:gpu ".parse().unwrap();
        assert_eq!(spec.count, 1);

        assert!("opencl:gpu*x".parse::<DeviceSpec>().is_err());
        assert!("gpu".parse::<DeviceSpec>().is_err());
    }

    #[test]
    #[serial(qctl_env)]
    fn toml_devices_round_into_specs() {
        let cfg = without_overrides(|| {
            PlatformConfig::from_toml(
                r#"
                probe_host = false

                [[devices]]
                backend = "opencl"
                device_type = "cpu"
                name = "Xeon"

                [[devices]]
                backend = "level_zero"
                device_type = "gpu"
                count = 2
                max_work_group_size = 512
                "#,
            )
        })
        .unwrap();

        assert!(!cfg.probe_host);
        assert_eq!(cfg.devices.len(), 2);
        assert_eq!(cfg.devices[0].name.as_deref(), Some("Xeon"));
        assert_eq!(cfg.devices[1].count, 2);
        assert_eq!(cfg.devices[1].max_work_group_size, Some(512));
    }

    #[test]
    #[serial(qctl_env)]
    fn default_toml_parses_back() {
        let text = PlatformConfig::default_toml().unwrap();
        let cfg = without_overrides(|| PlatformConfig::from_toml(&text)).unwrap();
        assert_eq!(cfg, PlatformConfig::default());
    }

    #[test]
    #[serial(qctl_env)]
    fn oversized_device_count_is_rejected() {
        let err = temp_env::with_vars(
            [
                (ENV_PLATFORM, None),
                (ENV_PROBE_HOST, None),
                (ENV_FAKE_DEVICES, Some("opencl:gpu*10000000000")),
            ],
            PlatformConfig::from_env,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)), "{err}");

        let at_cap = DeviceSpec::new(Backend::OpenCl, DeviceType::Gpu).with_count(MAX_DEVICE_COUNT);
        assert!(at_cap.validate().is_ok());
        assert!(at_cap.with_count(MAX_DEVICE_COUNT + 1).validate().is_err());
    }

    #[test]
    fn selector_device_types_are_rejected() {
        let cfg = PlatformConfig {
            devices: vec![DeviceSpec::new(Backend::OpenCl, DeviceType::All)],
            ..PlatformConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn host_type_only_on_host_backend() {
        for spec in [
            DeviceSpec::new(Backend::OpenCl, DeviceType::Host),
            DeviceSpec::new(Backend::Host, DeviceType::Cpu),
        ] {
            let cfg = PlatformConfig { devices: vec![spec], ..PlatformConfig::default() };
            assert!(cfg.validate().is_err());
        }
    }

    #[test]
    fn zero_count_and_odd_work_group_sizes_are_rejected() {
        let cfg = PlatformConfig {
            devices: vec![DeviceSpec::new(Backend::OpenCl, DeviceType::Gpu).with_count(0)],
            ..PlatformConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut spec = DeviceSpec::new(Backend::OpenCl, DeviceType::Gpu);
        spec.max_work_group_size = Some(384);
        let cfg = PlatformConfig { devices: vec![spec], ..PlatformConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    #[serial(qctl_env)]
    fn env_overrides_replace_devices() {
        temp_env::with_vars(
            [
                (ENV_PLATFORM, Some("reference")),
                (ENV_PROBE_HOST, Some("no")),
                (ENV_FAKE_DEVICES, Some("opencl:cpu, opencl:gpu*2;level_zero:gpu")),
            ],
            || {
                let cfg = PlatformConfig::from_env().unwrap();
                assert!(!cfg.probe_host);
                let counts: Vec<_> = cfg.devices.iter().map(|d| d.count).collect();
                assert_eq!(counts, [1, 2, 1]);
                assert_eq!(cfg.devices[2].backend, Backend::LevelZero);
            },
        );
    }

    #[test]
    #[serial(qctl_env)]
    fn invalid_env_override_names_the_variable() {
        temp_env::with_vars(
            [
                (ENV_PLATFORM, None::<&str>),
                (ENV_PROBE_HOST, Some("maybe")),
                (ENV_FAKE_DEVICES, None),
            ],
            || {
                let err = PlatformConfig::from_env().unwrap_err();
                assert!(err.to_string().contains(ENV_PROBE_HOST), "{err}");
            },
        );
    }

    #[test]
    #[serial(qctl_env)]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qctl.toml");
        std::fs::write(&path, "probe_host = true\n").unwrap();
        let cfg = without_overrides(|| PlatformConfig::load(&path)).unwrap();
        assert!(cfg.probe_host);
        assert!(cfg.devices.is_empty());

        let missing = without_overrides(|| PlatformConfig::load(&dir.path().join("nope.toml")));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
