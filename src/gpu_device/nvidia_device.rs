use anyhow::{Context, Result};
use nvml_wrapper::{
    Device, Nvml, enums::device::GpuLockedClocksSetting, error::NvmlError,
};
use tracing::{debug, info, trace};

use crate::gpu_device::{
    ControlError, Dimension, GpuBackend, GpuControl, Setting, TuningGroup,
};

// Store the NVML context for Nvidia GPUs.
// NVML is shut down when the backend is dropped.
pub struct NvmlBackend {
    nvml: Nvml,
}

// Locked clock window in MHz,
// NVML only accepts the min and max clocks together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClockWindow {
    min: u32,
    max: u32,
}

// Clock range of a domain and the window locked on it.
// NVML can't report a locked window, only one set through
// this device is known.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ClockLock {
    count: usize,
    supported: Option<ClockWindow>,
    locked: Option<ClockWindow>,
}

pub struct NvidiaDevice<'nvml> {
    device: Device<'nvml>,

    // Store the device static information
    name: String,
    device_id: String,

    core_clocks: ClockLock,
    mem_clocks: ClockLock,

    // Default power limit in mW, the power limit offset is relative to it
    power_limit_default: Option<u32>,
}

impl NvmlBackend {
    // Attempt to initialize NVML
    pub fn init() -> Result<Self> {
        let nvml = Nvml::init().with_context(|| "Failed to load NVML library")?;

        info!("NVML successfully initialized");

        Ok(Self { nvml })
    }
}

impl GpuBackend for NvmlBackend {
    fn gpu_count(&self) -> Result<u32> {
        self.nvml
            .device_count()
            .with_context(|| "Failed to retrive the number of GPUs")
    }

    fn gpu(&self, index: u32) -> Result<Box<dyn GpuControl + '_>> {
        Ok(Box::new(NvidiaDevice::new(&self.nvml, index)?))
    }
}

impl<'nvml> NvidiaDevice<'nvml> {
    pub fn new(nvml: &'nvml Nvml, index: u32) -> Result<Self> {
        let device = nvml
            .device_by_index(index)
            .with_context(|| format!("Failed to retrive GPU device {index}"))?;

        let name = device
            .name()
            .with_context(|| format!("Failed to retrive GPU name {index}"))?;

        // The PCI device id is stored in the upper 16 bits
        let device_id = match device.pci_info() {
            Ok(pci) => format!("{:04X}", pci.pci_device_id >> 16),
            Err(err) => {
                debug!("Failed to retrive PCI info: {err}");
                String::from("unknown")
            }
        };

        let mem_supported = device.supported_memory_clocks().unwrap_or_default();
        let core_supported = match mem_supported.iter().max() {
            Some(mem) => {
                device.supported_graphics_clocks(*mem).unwrap_or_default()
            }
            None => Vec::new(),
        };

        trace!(
            "GPU {index}: {} memory clocks - {} graphics clocks",
            mem_supported.len(),
            core_supported.len()
        );

        let power_limit_default = device.power_management_limit_default().ok();

        Ok(Self {
            device,
            name,
            device_id,
            core_clocks: ClockLock::new(&core_supported),
            mem_clocks: ClockLock::new(&mem_supported),
            power_limit_default,
        })
    }

    // Current power limit as an offset from the default one
    fn power_limit_offset(&self) -> Result<i32, ControlError> {
        let dimension = Dimension::PowerLimit;

        let default = self
            .power_limit_default
            .filter(|default| *default > 0)
            .ok_or(ControlError::Unsupported(dimension))?;
        let current = self
            .device
            .power_management_limit()
            .map_err(|err| rejected(dimension, err))?;

        let offset = (current as i64 - default as i64) * 100 / default as i64;

        Ok(offset as i32)
    }

    fn set_power_limit_offset(&mut self, offset: i32) -> Result<(), ControlError> {
        let dimension = Dimension::PowerLimit;

        let default = self
            .power_limit_default
            .ok_or(ControlError::Unsupported(dimension))?;

        let limit = default as i64 * (100 + offset as i64) / 100;
        let limit = u32::try_from(limit).map_err(|_| ControlError::Rejected {
            dimension,
            reason: format!("{limit} mW is not a valid power limit"),
        })?;

        trace!("Power limit {offset:+}% -> {limit} mW");

        self.device
            .set_power_management_limit(limit)
            .map_err(|err| rejected(dimension, err))
    }

    fn set_core_clocks(
        &mut self,
        dimension: Dimension,
        window: ClockWindow,
    ) -> Result<(), ControlError> {
        self.device
            .set_gpu_locked_clocks(GpuLockedClocksSetting::Numeric {
                min_clock_mhz: window.min,
                max_clock_mhz: window.max,
            })
            .map_err(|err| rejected(dimension, err))?;

        self.core_clocks.locked = Some(window);

        Ok(())
    }

    fn set_mem_clocks(&mut self, window: ClockWindow) -> Result<(), ControlError> {
        self.device
            .set_mem_locked_clocks(window.min, window.max)
            .map_err(|err| rejected(Dimension::VramMaxFreq, err))?;

        self.mem_clocks.locked = Some(window);

        Ok(())
    }
}

impl GpuControl for NvidiaDevice<'_> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn device_id(&self) -> String {
        self.device_id.clone()
    }

    fn is_supported(&self, group: TuningGroup) -> bool {
        match group {
            TuningGroup::Graphics => self.core_clocks.count > 0,
            TuningGroup::Vram => self.mem_clocks.count > 0,
            TuningGroup::Power => self.power_limit_default.is_some(),
            // NVML has no zero RPM control
            TuningGroup::Fan => false,
        }
    }

    fn has_manual_tuning(&self, group: TuningGroup) -> bool {
        match group {
            TuningGroup::Graphics => self.core_clocks.count > 1,
            TuningGroup::Vram => self.mem_clocks.count > 1,
            TuningGroup::Power => true,
            TuningGroup::Fan => false,
        }
    }

    fn preset_states(&self, group: TuningGroup) -> Option<usize> {
        let count = match group {
            TuningGroup::Graphics => self.core_clocks.count,
            TuningGroup::Vram => self.mem_clocks.count,
            TuningGroup::Power | TuningGroup::Fan => 0,
        };

        (count > 0).then_some(count)
    }

    fn get(&self, dimension: Dimension) -> Result<Setting, ControlError> {
        let unsupported = ControlError::Unsupported(dimension);

        match dimension {
            Dimension::CoreMaxFreq => self
                .core_clocks
                .locked
                .map(|window| Setting::CoreMaxFreq(window.max))
                .ok_or(unsupported),
            Dimension::CoreMinFreq => self
                .core_clocks
                .locked
                .map(|window| Setting::CoreMinFreq(window.min))
                .ok_or(unsupported),
            Dimension::VramMaxFreq => self
                .mem_clocks
                .locked
                .map(|window| Setting::VramMaxFreq(window.max))
                .ok_or(unsupported),
            Dimension::PowerLimit => {
                self.power_limit_offset().map(Setting::PowerLimit)
            }
            Dimension::VoltageOffset | Dimension::ZeroRpm => Err(unsupported),
        }
    }

    fn set(&mut self, setting: Setting) -> Result<(), ControlError> {
        let dimension = setting.dimension();
        let unsupported = ControlError::Unsupported(dimension);

        match setting {
            Setting::CoreMaxFreq(max) => {
                let window = self.core_clocks.with_max(max).ok_or(unsupported)?;
                self.set_core_clocks(dimension, window)
            }
            Setting::CoreMinFreq(min) => {
                let window = self.core_clocks.with_min(min).ok_or(unsupported)?;
                self.set_core_clocks(dimension, window)
            }
            Setting::VramMaxFreq(max) => {
                let window = self.mem_clocks.with_max(max).ok_or(unsupported)?;
                self.set_mem_clocks(window)
            }
            Setting::PowerLimit(offset) => self.set_power_limit_offset(offset),
            Setting::VoltageOffset(_) | Setting::ZeroRpm(_) => Err(unsupported),
        }
    }
}

impl ClockLock {
    fn new(supported: &[u32]) -> Self {
        Self {
            count: supported.len(),
            supported: ClockWindow::from_supported(supported),
            locked: None,
        }
    }

    // Window with a new max clock, the min clock is kept
    // from the locked window or the supported range
    fn with_max(&self, max: u32) -> Option<ClockWindow> {
        self.locked
            .or(self.supported)
            .map(|window| ClockWindow { max, ..window })
    }

    fn with_min(&self, min: u32) -> Option<ClockWindow> {
        self.locked
            .or(self.supported)
            .map(|window| ClockWindow { min, ..window })
    }
}

impl ClockWindow {
    // Build the widest window from the list of supported clocks
    fn from_supported(clocks: &[u32]) -> Option<Self> {
        let min = clocks.iter().min()?;
        let max = clocks.iter().max()?;

        Some(Self {
            min: *min,
            max: *max,
        })
    }
}

fn rejected(dimension: Dimension, err: NvmlError) -> ControlError {
    ControlError::Rejected {
        dimension,
        reason: err.to_string(),
    }
}
