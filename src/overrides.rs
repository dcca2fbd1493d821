use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::{gpu_device::Setting, profile::GpuProfile};

// Profile feature carrying the voltage offset in mV
pub const VOLTAGE_OFFSET_FEATURE: i32 = 12;
// Profile feature carrying the power limit in percent
pub const POWER_LIMIT_FEATURE: i32 = 3;

// The values to apply to a GPU, an empty field
// leaves the corresponding parameter untouched
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OverrideSet {
    // Frequencies are positive, zero leaves the clock untouched
    #[serde(deserialize_with = "positive_frequency")]
    pub core_max_freq: Option<u32>,
    #[serde(deserialize_with = "positive_frequency")]
    pub core_min_freq: Option<u32>,
    pub voltage_offset: Option<i32>,
    #[serde(deserialize_with = "positive_frequency")]
    pub vram_max_freq: Option<u32>,
    pub power_limit: Option<i32>,
    pub zero_rpm: Option<bool>,
}

impl OverrideSet {
    // Map a parsed profile to overrides. Only the voltage offset and
    // power limit features are used, every other feature is ignored.
    pub fn from_profile(profile: &GpuProfile) -> Self {
        Self {
            voltage_offset: first_value(profile, VOLTAGE_OFFSET_FEATURE),
            power_limit: first_value(profile, POWER_LIMIT_FEATURE),
            ..Default::default()
        }
    }

    // Return true if no field is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    // Keep every field set in self and fill the others from fallback
    pub fn or(self, fallback: OverrideSet) -> Self {
        Self {
            core_max_freq: self.core_max_freq.or(fallback.core_max_freq),
            core_min_freq: self.core_min_freq.or(fallback.core_min_freq),
            voltage_offset: self.voltage_offset.or(fallback.voltage_offset),
            vram_max_freq: self.vram_max_freq.or(fallback.vram_max_freq),
            power_limit: self.power_limit.or(fallback.power_limit),
            zero_rpm: self.zero_rpm.or(fallback.zero_rpm),
        }
    }

    // Return the settings to apply, in application order
    pub fn settings(&self) -> Vec<Setting> {
        [
            self.core_max_freq.map(Setting::CoreMaxFreq),
            self.core_min_freq.map(Setting::CoreMinFreq),
            self.voltage_offset.map(Setting::VoltageOffset),
            self.vram_max_freq.map(Setting::VramMaxFreq),
            self.power_limit.map(Setting::PowerLimit),
            self.zero_rpm.map(Setting::ZeroRpm),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

fn positive_frequency<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let freq = Option::<u32>::deserialize(deserializer)?;

    Ok(freq.filter(|freq| *freq > 0))
}

fn first_value(profile: &GpuProfile, id: i32) -> Option<i32> {
    let feature = profile.feature(id)?;

    match feature.first_value() {
        Some(value) => {
            debug!("Found feature {id} in profile: {value}");
            Some(value)
        }
        None => {
            warn!("Feature {id} has no states, ignoring it");
            None
        }
    }
}
