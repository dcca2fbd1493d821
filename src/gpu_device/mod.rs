use std::fmt;

use anyhow::Result;
use thiserror::Error;

pub mod gpu_info;
pub mod nvidia_device;

// A tunable dimension of a GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    CoreMaxFreq,
    CoreMinFreq,
    VoltageOffset,
    VramMaxFreq,
    PowerLimit,
    ZeroRpm,
}

// Dimensions are gated by the tuning interface they belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TuningGroup {
    Graphics,
    Vram,
    Fan,
    Power,
}

// The richest tuning interface a group exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningCapability {
    Unsupported,
    // Only a fixed list of preset states can be queried
    Presets { count: usize },
    // Direct control over every dimension of the group
    Manual,
}

// A value for one dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    // Frequencies in MHz
    CoreMaxFreq(u32),
    CoreMinFreq(u32),
    // Offset in mV
    VoltageOffset(i32),
    VramMaxFreq(u32),
    // Offset from the default power limit in percent
    PowerLimit(i32),
    ZeroRpm(bool),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{0} is not supported by this device")]
    Unsupported(Dimension),
    #[error("Failed to set {dimension}: {reason}")]
    Rejected { dimension: Dimension, reason: String },
}

// Enumerate and open the GPUs of a control backend
pub trait GpuBackend {
    // Return the number of GPUs on the system
    fn gpu_count(&self) -> Result<u32>;

    // Open the GPU with the given index.
    // The index is expected to be lower than gpu_count()
    fn gpu(&self, index: u32) -> Result<Box<dyn GpuControl + '_>>;
}

// Capability gated control surface of a single GPU
pub trait GpuControl {
    // Return the device marketing name
    fn name(&self) -> String;
    // Return the device PCI id
    fn device_id(&self) -> String;

    // Return true if the device exposes any tuning for the group
    fn is_supported(&self, group: TuningGroup) -> bool;
    // Return true if the group can be tuned directly (min/max/voltage)
    fn has_manual_tuning(&self, group: TuningGroup) -> bool;
    // Return the number of preset states of the group,
    // None if the group has no preset interface
    fn preset_states(&self, group: TuningGroup) -> Option<usize>;

    // Read the current value of a dimension
    fn get(&self, dimension: Dimension) -> Result<Setting, ControlError>;
    // Apply a single value
    fn set(&mut self, setting: Setting) -> Result<(), ControlError>;
}

// Find the tuning interface of a group, the manual interface
// is preferred over the preset one
pub fn probe<C: GpuControl + ?Sized>(
    control: &C,
    group: TuningGroup,
) -> TuningCapability {
    if !control.is_supported(group) {
        return TuningCapability::Unsupported;
    }

    if control.has_manual_tuning(group) {
        TuningCapability::Manual
    } else if let Some(count) = control.preset_states(group) {
        TuningCapability::Presets { count }
    } else {
        TuningCapability::Unsupported
    }
}

impl Dimension {
    pub fn group(self) -> TuningGroup {
        match self {
            Self::CoreMaxFreq | Self::CoreMinFreq | Self::VoltageOffset => {
                TuningGroup::Graphics
            }
            Self::VramMaxFreq => TuningGroup::Vram,
            Self::PowerLimit => TuningGroup::Power,
            Self::ZeroRpm => TuningGroup::Fan,
        }
    }
}

impl Setting {
    pub fn dimension(&self) -> Dimension {
        match self {
            Self::CoreMaxFreq(_) => Dimension::CoreMaxFreq,
            Self::CoreMinFreq(_) => Dimension::CoreMinFreq,
            Self::VoltageOffset(_) => Dimension::VoltageOffset,
            Self::VramMaxFreq(_) => Dimension::VramMaxFreq,
            Self::PowerLimit(_) => Dimension::PowerLimit,
            Self::ZeroRpm(_) => Dimension::ZeroRpm,
        }
    }

    pub fn group(&self) -> TuningGroup {
        self.dimension().group()
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CoreMaxFreq => "GFX max frequency",
            Self::CoreMinFreq => "GFX min frequency",
            Self::VoltageOffset => "GFX voltage offset",
            Self::VramMaxFreq => "VRAM max frequency",
            Self::PowerLimit => "power limit",
            Self::ZeroRpm => "zero RPM",
        };

        f.write_str(name)
    }
}

impl fmt::Display for TuningGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Graphics => "GFX",
            Self::Vram => "VRAM",
            Self::Fan => "fan",
            Self::Power => "power",
        };

        f.write_str(name)
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoreMaxFreq(freq) => write!(f, "GFX max frequency: {freq} MHz"),
            Self::CoreMinFreq(freq) => write!(f, "GFX min frequency: {freq} MHz"),
            Self::VoltageOffset(mv) => write!(f, "GFX voltage (offset): {mv} mV"),
            Self::VramMaxFreq(freq) => write!(f, "VRAM max frequency: {freq} MHz"),
            Self::PowerLimit(pct) => write!(f, "power limit: {pct:+}%"),
            Self::ZeroRpm(on) => {
                write!(f, "zero RPM: {}", if *on { "ON" } else { "OFF" })
            }
        }
    }
}
