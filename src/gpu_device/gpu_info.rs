// GPU info is a read only snapshot of the tuning state of a device

use std::fmt;

use tracing::debug;

use crate::gpu_device::{
    Dimension, GpuControl, Setting, TuningCapability, TuningGroup, probe,
};

// Graphics tuning state, depending on the interface the device exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsInfo {
    Manual {
        min_freq: Option<u32>,
        max_freq: Option<u32>,
        voltage_offset: Option<i32>,
    },
    Presets {
        count: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VramInfo {
    Manual { max_freq: Option<u32> },
    Presets { count: usize },
}

// Store GPU general information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuInfo {
    pub index: u32,
    pub name: String,
    pub device_id: String,

    // None when the group can't be tuned
    pub graphics: Option<GraphicsInfo>,
    pub vram: Option<VramInfo>,
    pub zero_rpm: Option<bool>,
    pub power_limit: Option<i32>,
}

impl GpuInfo {
    // Query the device, only read operations are performed
    pub fn query<C: GpuControl + ?Sized>(index: u32, control: &C) -> Self {
        let graphics = match probe(control, TuningGroup::Graphics) {
            TuningCapability::Manual => Some(GraphicsInfo::Manual {
                min_freq: read_freq(control, Dimension::CoreMinFreq),
                max_freq: read_freq(control, Dimension::CoreMaxFreq),
                voltage_offset: read_offset(control, Dimension::VoltageOffset),
            }),
            TuningCapability::Presets { count } => {
                Some(GraphicsInfo::Presets { count })
            }
            TuningCapability::Unsupported => None,
        };

        let vram = match probe(control, TuningGroup::Vram) {
            TuningCapability::Manual => Some(VramInfo::Manual {
                max_freq: read_freq(control, Dimension::VramMaxFreq),
            }),
            TuningCapability::Presets { count } => {
                Some(VramInfo::Presets { count })
            }
            TuningCapability::Unsupported => None,
        };

        let zero_rpm = match probe(control, TuningGroup::Fan) {
            TuningCapability::Manual => match control.get(Dimension::ZeroRpm) {
                Ok(Setting::ZeroRpm(on)) => Some(on),
                _ => None,
            },
            _ => None,
        };

        let power_limit = match probe(control, TuningGroup::Power) {
            TuningCapability::Manual => {
                read_offset(control, Dimension::PowerLimit)
            }
            _ => None,
        };

        Self {
            index,
            name: control.name(),
            device_id: control.device_id(),
            graphics,
            vram,
            zero_rpm,
            power_limit,
        }
    }
}

fn read_freq<C: GpuControl + ?Sized>(
    control: &C,
    dimension: Dimension,
) -> Option<u32> {
    match control.get(dimension) {
        Ok(
            Setting::CoreMaxFreq(freq)
            | Setting::CoreMinFreq(freq)
            | Setting::VramMaxFreq(freq),
        ) => Some(freq),
        Ok(_) => None,
        Err(err) => {
            debug!("{err}");
            None
        }
    }
}

fn read_offset<C: GpuControl + ?Sized>(
    control: &C,
    dimension: Dimension,
) -> Option<i32> {
    match control.get(dimension) {
        Ok(Setting::VoltageOffset(offset) | Setting::PowerLimit(offset)) => {
            Some(offset)
        }
        Ok(_) => None,
        Err(err) => {
            debug!("{err}");
            None
        }
    }
}

// Display an optional value or "n/a"
struct Maybe<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for Maybe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str("n/a"),
        }
    }
}

impl fmt::Display for GpuInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[#] GPU {}: {}", self.index, self.name)?;
        writeln!(f, " [System]  ID: {}", self.device_id)?;

        match &self.graphics {
            Some(GraphicsInfo::Manual {
                min_freq,
                max_freq,
                voltage_offset,
            }) => writeln!(
                f,
                " [GFX]     Min: {} MHz  Max: {} MHz  Volt: {} mV",
                Maybe(*min_freq),
                Maybe(*max_freq),
                Maybe(*voltage_offset)
            )?,
            Some(GraphicsInfo::Presets { count }) => writeln!(
                f,
                " [GFX]     Status: {count} discrete states configured"
            )?,
            None => writeln!(f, " [GFX]     Status: manual tuning NOT supported")?,
        }

        match &self.vram {
            Some(VramInfo::Manual { max_freq }) => writeln!(
                f,
                " [VRAM]    Max frequency: {} MHz",
                Maybe(*max_freq)
            )?,
            Some(VramInfo::Presets { count }) => writeln!(
                f,
                " [VRAM]    Status: {count} discrete states configured"
            )?,
            None => {}
        }

        if let Some(on) = self.zero_rpm {
            writeln!(f, " [Fan]     Zero RPM: {}", if on { "ON" } else { "OFF" })?;
        }

        if let Some(limit) = self.power_limit {
            writeln!(f, " [Power]   Power limit: {limit:+}%")?;
        }

        Ok(())
    }
}
