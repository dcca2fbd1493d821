use std::{fmt, path::Path};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    command::{Command, Request, USAGE},
    config_manager::ConfigManager,
    errors::OcError,
    gpu_device::{GpuBackend, gpu_info::GpuInfo},
    overrides::OverrideSet,
    profile,
    settings_applier::{self, ApplyReport},
};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("GPU index {index} out of range, {count} GPUs found")]
pub struct IndexError {
    pub index: i64,
    pub count: u32,
}

// Result of an action, rendered on the terminal by the caller
#[derive(Debug)]
pub enum ActionOutput {
    Listed(Vec<GpuInfo>),
    Applied {
        index: u32,
        name: String,
        report: ApplyReport,
    },
    Usage,
}

// Run the actions against the GPUs of a backend
pub struct DevicesManager<'a> {
    backend: &'a dyn GpuBackend,
    config: &'a ConfigManager,
}

impl<'a> DevicesManager<'a> {
    pub fn new(backend: &'a dyn GpuBackend, config: &'a ConfigManager) -> Self {
        Self { backend, config }
    }

    pub fn execute(&self, command: Command) -> Result<ActionOutput, OcError> {
        debug!("Executing {command:?}");

        match command {
            Command::List => Ok(ActionOutput::Listed(self.list()?)),
            Command::Set(request) => self.set(request),
            Command::Load { path, request } => self.load(&path, request),
            Command::Usage => Ok(ActionOutput::Usage),
        }
    }

    // Query every GPU on the system, nothing is modified
    pub fn list(&self) -> Result<Vec<GpuInfo>, OcError> {
        let count = self.backend.gpu_count()?;
        info!("Found {count} GPUs");

        let mut infos = Vec::new();
        for index in 0..count {
            let gpu = self.backend.gpu(index)?;
            infos.push(GpuInfo::query(index, &*gpu));
        }

        Ok(infos)
    }

    // Apply the request tokens, completed by the named preset
    pub fn set(&self, request: Request) -> Result<ActionOutput, OcError> {
        let index = self.select_gpu(request.gpu)?;
        let overrides = request.overrides.or(self.preset(&request)?);

        self.apply(index, &overrides)
    }

    // Apply a profile file. The request tokens take precedence
    // over the profile values, which take precedence over the preset.
    pub fn load(
        &self,
        path: &Path,
        request: Request,
    ) -> Result<ActionOutput, OcError> {
        let index = self.select_gpu(request.gpu)?;
        let preset = self.preset(&request)?;

        let profile = profile::parse_file(path)?;
        info!(
            "Loaded profile: device {} revision {}, {} features",
            profile.dev_id,
            profile.rev_id,
            profile.features.len()
        );

        let overrides = request
            .overrides
            .or(OverrideSet::from_profile(&profile))
            .or(preset);

        self.apply(index, &overrides)
    }

    // Check the requested GPU index, the configured
    // default GPU is used if the request doesn't name one
    pub fn select_gpu(&self, gpu: Option<i64>) -> Result<u32, OcError> {
        let index = gpu.unwrap_or_else(|| self.config.default_gpu().into());
        let count = self.backend.gpu_count()?;

        u32::try_from(index)
            .ok()
            .filter(|index| *index < count)
            .ok_or_else(|| IndexError { index, count }.into())
    }

    fn preset(&self, request: &Request) -> Result<OverrideSet, OcError> {
        match &request.preset {
            Some(name) => Ok(self.config.preset(name)?),
            None => Ok(OverrideSet::default()),
        }
    }

    fn apply(
        &self,
        index: u32,
        overrides: &OverrideSet,
    ) -> Result<ActionOutput, OcError> {
        let mut gpu = self.backend.gpu(index)?;
        let name = gpu.name();

        info!("Applying settings to GPU {index}: {name}");

        let report = settings_applier::apply(&mut *gpu, overrides);

        Ok(ActionOutput::Applied {
            index,
            name,
            report,
        })
    }
}

impl fmt::Display for ActionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listed(infos) if infos.is_empty() => {
                writeln!(f, "No GPU found")
            }
            Self::Listed(infos) => {
                for info in infos {
                    writeln!(f, "{info}")?;
                }

                Ok(())
            }
            Self::Applied {
                index,
                name,
                report,
            } => {
                writeln!(f, "[*] GPU {index}: {name}")?;
                write!(f, "{report}")
            }
            Self::Usage => writeln!(f, "{USAGE}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::gpu_device::{
        ControlError, Dimension, GpuControl, Setting, TuningGroup,
    };

    #[derive(Default)]
    struct FakeBackend {
        count: u32,
        opened: RefCell<Vec<u32>>,
        calls: RefCell<Vec<(u32, Setting)>>,
    }

    struct FakeGpu<'a> {
        index: u32,
        calls: &'a RefCell<Vec<(u32, Setting)>>,
    }

    impl GpuBackend for FakeBackend {
        fn gpu_count(&self) -> anyhow::Result<u32> {
            Ok(self.count)
        }
        fn gpu(&self, index: u32) -> anyhow::Result<Box<dyn GpuControl + '_>> {
            self.opened.borrow_mut().push(index);
            Ok(Box::new(FakeGpu {
                index,
                calls: &self.calls,
            }))
        }
    }

    impl GpuControl for FakeGpu<'_> {
        fn name(&self) -> String {
            format!("Fake GPU {}", self.index)
        }
        fn device_id(&self) -> String {
            "7550".to_string()
        }
        fn is_supported(&self, _group: TuningGroup) -> bool {
            true
        }
        fn has_manual_tuning(&self, _group: TuningGroup) -> bool {
            true
        }
        fn preset_states(&self, _group: TuningGroup) -> Option<usize> {
            None
        }
        fn get(&self, dimension: Dimension) -> Result<Setting, ControlError> {
            Err(ControlError::Unsupported(dimension))
        }
        fn set(&mut self, setting: Setting) -> Result<(), ControlError> {
            self.calls.borrow_mut().push((self.index, setting));
            Ok(())
        }
    }

    fn backend(count: u32) -> FakeBackend {
        FakeBackend {
            count,
            ..Default::default()
        }
    }

    fn request(gpu: Option<i64>, overrides: OverrideSet) -> Request {
        Request {
            gpu,
            overrides,
            preset: None,
        }
    }

    #[test]
    fn out_of_range_gpu_makes_no_calls() {
        let backend = backend(2);
        let config = ConfigManager::default();
        let manager = DevicesManager::new(&backend, &config);
        let overrides = OverrideSet {
            power_limit: Some(10),
            ..Default::default()
        };

        let result = manager.set(request(Some(5), overrides));

        assert!(matches!(
            result,
            Err(OcError::Index(IndexError { index: 5, count: 2 }))
        ));
        assert!(backend.opened.borrow().is_empty());
        assert!(backend.calls.borrow().is_empty());
    }

    #[test]
    fn negative_gpu_is_out_of_range() {
        let backend = backend(1);
        let config = ConfigManager::default();
        let manager = DevicesManager::new(&backend, &config);

        assert!(matches!(
            manager.select_gpu(Some(-1)),
            Err(OcError::Index(IndexError { index: -1, count: 1 }))
        ));
    }

    #[test]
    fn missing_profile_is_checked_after_the_index() {
        let backend = backend(1);
        let config = ConfigManager::default();
        let manager = DevicesManager::new(&backend, &config);

        let result = manager.load(
            Path::new("does/not/exist.xml"),
            request(Some(3), OverrideSet::default()),
        );
        assert!(matches!(result, Err(OcError::Index(_))));

        let result = manager.load(
            Path::new("does/not/exist.xml"),
            request(None, OverrideSet::default()),
        );
        assert!(matches!(
            result,
            Err(OcError::Profile(profile::ParseError::Unreadable { .. }))
        ));
        assert!(backend.opened.borrow().is_empty());
    }

    #[test]
    fn set_applies_to_selected_gpu() {
        let backend = backend(2);
        let config = ConfigManager::default();
        let manager = DevicesManager::new(&backend, &config);
        let overrides = OverrideSet {
            voltage_offset: Some(-50),
            ..Default::default()
        };

        let output = manager.execute(Command::Set(request(Some(1), overrides)));

        assert!(matches!(
            output,
            Ok(ActionOutput::Applied { index: 1, .. })
        ));
        assert_eq!(
            *backend.calls.borrow(),
            vec![(1, Setting::VoltageOffset(-50))]
        );
    }

    #[test]
    fn unknown_preset_is_an_error() {
        let backend = backend(1);
        let config = ConfigManager::default();
        let manager = DevicesManager::new(&backend, &config);

        let result = manager.set(Request {
            gpu: None,
            overrides: OverrideSet::default(),
            preset: Some("turbo".to_string()),
        });

        assert!(matches!(result, Err(OcError::Config(_))));
        assert!(backend.calls.borrow().is_empty());
    }

    #[test]
    fn list_queries_every_gpu() {
        let backend = backend(3);
        let config = ConfigManager::default();
        let manager = DevicesManager::new(&backend, &config);

        let infos = manager.list().unwrap();

        assert_eq!(infos.len(), 3);
        assert_eq!(infos[2].name, "Fake GPU 2");
        assert!(backend.calls.borrow().is_empty());
    }

    #[test]
    fn empty_list_output() {
        assert_eq!(ActionOutput::Listed(Vec::new()).to_string(), "No GPU found\n");
    }
}
