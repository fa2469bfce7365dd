//! Backend and device-type axes that partition the device registry.
//!
//! A [`Category`] is one (backend, device type) pair such as `opencl:gpu`.
//! Both enums carry stable integer values so they can cross the C boundary
//! by value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The compute API a device is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum Backend {
    #[serde(rename = "opencl", alias = "open_cl")]
    OpenCl = 1,
    LevelZero = 2,
    Host = 3,
    Cuda = 4,
}

impl Backend {
    /// Every backend, in declaration order.
    pub const ALL: [Backend; 4] =
        [Backend::OpenCl, Backend::LevelZero, Backend::Host, Backend::Cuda];

    /// Integer value used across the C boundary.
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::OpenCl),
            2 => Some(Self::LevelZero),
            3 => Some(Self::Host),
            4 => Some(Self::Cuda),
            _ => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenCl => write!(f, "opencl"),
            Self::LevelZero => write!(f, "level_zero"),
            Self::Host => write!(f, "host"),
            Self::Cuda => write!(f, "cuda"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opencl" | "ocl" => Ok(Self::OpenCl),
            "level_zero" | "level-zero" | "levelzero" | "l0" | "ze" => Ok(Self::LevelZero),
            "host" => Ok(Self::Host),
            "cuda" => Ok(Self::Cuda),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// Kind of device, orthogonal to [`Backend`].
///
/// `Automatic` and `All` are selectors rather than concrete kinds; the
/// registry resolves them against the concrete categories of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum DeviceType {
    Cpu = 1,
    Gpu = 2,
    Accelerator = 3,
    Custom = 4,
    Automatic = 5,
    Host = 6,
    All = 7,
}

impl DeviceType {
    /// Concrete device kinds in the order `All` concatenates them.
    pub const CONCRETE: [DeviceType; 5] = [
        DeviceType::Cpu,
        DeviceType::Gpu,
        DeviceType::Accelerator,
        DeviceType::Custom,
        DeviceType::Host,
    ];

    /// Preference order used to resolve `Automatic` within one backend.
    pub const AUTOMATIC_PREFERENCE: [DeviceType; 4] =
        [DeviceType::Gpu, DeviceType::Accelerator, DeviceType::Cpu, DeviceType::Host];

    /// `false` for the `Automatic` and `All` selectors.
    pub const fn is_concrete(self) -> bool {
        !matches!(self, Self::Automatic | Self::All)
    }

    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Cpu),
            2 => Some(Self::Gpu),
            3 => Some(Self::Accelerator),
            4 => Some(Self::Custom),
            5 => Some(Self::Automatic),
            6 => Some(Self::Host),
            7 => Some(Self::All),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu => write!(f, "gpu"),
            Self::Accelerator => write!(f, "accelerator"),
            Self::Custom => write!(f, "custom"),
            Self::Automatic => write!(f, "automatic"),
            Self::Host => write!(f, "host"),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for DeviceType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            "accelerator" | "acc" => Ok(Self::Accelerator),
            "custom" => Ok(Self::Custom),
            "automatic" | "auto" => Ok(Self::Automatic),
            "host" => Ok(Self::Host),
            "all" => Ok(Self::All),
            other => Err(format!("unknown device type: {other}")),
        }
    }
}

/// One (backend, device type) partition of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Category {
    pub backend: Backend,
    pub device_type: DeviceType,
}

impl Category {
    pub const fn new(backend: Backend, device_type: DeviceType) -> Self {
        Self { backend, device_type }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.device_type)
    }
}

impl FromStr for Category {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (backend, device_type) = s
            .split_once(':')
            .ok_or_else(|| format!("expected `backend:device_type`, got `{s}`"))?;
        Ok(Self::new(backend.parse()?, device_type.parse()?))
    }
}
