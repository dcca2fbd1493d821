use std::{collections::HashMap, fmt};

use tracing::{debug, error, info};

use crate::{
    gpu_device::{
        ControlError, GpuControl, Setting, TuningCapability, TuningGroup, probe,
    },
    overrides::OverrideSet,
};

// Why a requested setting was not sent to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    // The device has no tuning interface for the group
    Unsupported(TuningGroup),
    // The group only exposes preset states
    PresetsOnly { group: TuningGroup, count: usize },
    // The group is tunable but not this dimension
    DimensionUnsupported,
}

#[derive(Debug)]
pub enum Outcome {
    Applied,
    Skipped(SkipReason),
    Failed(ControlError),
}

// Outcome of a single requested setting
#[derive(Debug)]
pub struct FieldResult {
    pub setting: Setting,
    pub outcome: Outcome,
}

// Per field outcomes of an apply request, in application order
#[derive(Debug, Default)]
pub struct ApplyReport {
    results: Vec<FieldResult>,
}

// Apply every set field of the overrides to the device.
//
// Each field is applied on its own: a failure is recorded and the
// remaining fields are still attempted. Nothing is rolled back.
// Groups are only probed when one of their fields is requested.
pub fn apply<C: GpuControl + ?Sized>(
    control: &mut C,
    overrides: &OverrideSet,
) -> ApplyReport {
    let mut report = ApplyReport::default();
    let mut capabilities: HashMap<TuningGroup, TuningCapability> =
        HashMap::new();

    for setting in overrides.settings() {
        let group = setting.group();
        let capability = *capabilities.entry(group).or_insert_with(|| {
            let capability = probe(&*control, group);
            debug!("{group} tuning capability: {capability:?}");

            capability
        });

        let outcome = match capability {
            TuningCapability::Unsupported => {
                Outcome::Skipped(SkipReason::Unsupported(group))
            }
            TuningCapability::Presets { count } => {
                Outcome::Skipped(SkipReason::PresetsOnly { group, count })
            }
            TuningCapability::Manual => match control.set(setting) {
                Ok(()) => Outcome::Applied,
                Err(ControlError::Unsupported(_)) => {
                    Outcome::Skipped(SkipReason::DimensionUnsupported)
                }
                Err(err) => Outcome::Failed(err),
            },
        };

        match &outcome {
            Outcome::Applied => info!("Applied {setting}"),
            Outcome::Skipped(reason) => {
                debug!("Skipped {}: {reason}", setting.dimension())
            }
            Outcome::Failed(err) => error!("{err}"),
        }

        report.results.push(FieldResult { setting, outcome });
    }

    report
}

impl ApplyReport {
    pub fn results(&self) -> &[FieldResult] {
        &self.results
    }

    // Return true if nothing was requested
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn applied(&self) -> impl Iterator<Item = &Setting> {
        self.results
            .iter()
            .filter(|result| matches!(result.outcome, Outcome::Applied))
            .map(|result| &result.setting)
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&Setting, SkipReason)> {
        self.results.iter().filter_map(|result| match result.outcome {
            Outcome::Skipped(reason) => Some((&result.setting, reason)),
            _ => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = (&Setting, &ControlError)> {
        self.results.iter().filter_map(|result| match &result.outcome {
            Outcome::Failed(err) => Some((&result.setting, err)),
            _ => None,
        })
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(group) => {
                write!(f, "{group} tuning not supported")
            }
            Self::PresetsOnly { group, count } => {
                write!(f, "{group} tuning only exposes {count} preset states")
            }
            Self::DimensionUnsupported => write!(f, "not supported"),
        }
    }
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.results.is_empty() {
            return writeln!(f, " -> Nothing to apply");
        }

        for result in &self.results {
            match &result.outcome {
                Outcome::Applied => writeln!(f, " -> {}", result.setting)?,
                Outcome::Skipped(reason) => writeln!(
                    f,
                    " -- Skipped {}: {reason}",
                    result.setting.dimension()
                )?,
                Outcome::Failed(err) => writeln!(f, " [!] {err}")?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, collections::HashSet};

    use super::*;
    use crate::gpu_device::Dimension;

    // Control surface recording every call made to it
    #[derive(Default)]
    struct FakeGpu {
        unsupported: HashSet<TuningGroup>,
        presets_only: HashSet<TuningGroup>,
        missing: HashSet<Dimension>,
        rejected: HashSet<Dimension>,

        probes: Cell<usize>,
        calls: Vec<Setting>,
    }

    impl GpuControl for FakeGpu {
        fn name(&self) -> String {
            "Fake GPU".to_string()
        }
        fn device_id(&self) -> String {
            "73BF".to_string()
        }
        fn is_supported(&self, group: TuningGroup) -> bool {
            self.probes.set(self.probes.get() + 1);
            !self.unsupported.contains(&group)
        }
        fn has_manual_tuning(&self, group: TuningGroup) -> bool {
            !self.presets_only.contains(&group)
        }
        fn preset_states(&self, _group: TuningGroup) -> Option<usize> {
            Some(3)
        }
        fn get(&self, dimension: Dimension) -> Result<Setting, ControlError> {
            Err(ControlError::Unsupported(dimension))
        }
        fn set(&mut self, setting: Setting) -> Result<(), ControlError> {
            self.calls.push(setting);

            let dimension = setting.dimension();
            if self.missing.contains(&dimension) {
                return Err(ControlError::Unsupported(dimension));
            }
            if self.rejected.contains(&dimension) {
                return Err(ControlError::Rejected {
                    dimension,
                    reason: "code 3".to_string(),
                });
            }

            Ok(())
        }
    }

    #[test]
    fn empty_overrides_make_no_calls() {
        let mut gpu = FakeGpu::default();

        let report = apply(&mut gpu, &OverrideSet::default());

        assert!(report.is_empty());
        assert!(gpu.calls.is_empty());
        assert_eq!(gpu.probes.get(), 0);
    }

    #[test]
    fn single_field_makes_one_call() {
        let mut gpu = FakeGpu::default();
        let overrides = OverrideSet {
            voltage_offset: Some(-50),
            ..Default::default()
        };

        let report = apply(&mut gpu, &overrides);

        assert_eq!(gpu.calls, vec![Setting::VoltageOffset(-50)]);
        assert_eq!(
            report.applied().collect::<Vec<_>>(),
            vec![&Setting::VoltageOffset(-50)]
        );
        assert!(!report.has_failures());
    }

    #[test]
    fn zero_values_are_applied() {
        let mut gpu = FakeGpu::default();
        let overrides = OverrideSet {
            voltage_offset: Some(0),
            power_limit: Some(0),
            zero_rpm: Some(false),
            ..Default::default()
        };

        apply(&mut gpu, &overrides);

        assert_eq!(
            gpu.calls,
            vec![
                Setting::VoltageOffset(0),
                Setting::PowerLimit(0),
                Setting::ZeroRpm(false),
            ]
        );
    }

    #[test]
    fn failure_does_not_stop_remaining_fields() {
        let mut gpu = FakeGpu {
            rejected: HashSet::from([Dimension::CoreMaxFreq]),
            ..Default::default()
        };
        let overrides = OverrideSet {
            core_max_freq: Some(3000),
            voltage_offset: Some(-40),
            power_limit: Some(10),
            ..Default::default()
        };

        let report = apply(&mut gpu, &overrides);

        // Both graphics fields share a single probe
        assert_eq!(gpu.probes.get(), 2);
        assert_eq!(gpu.calls.len(), 3);
        assert!(report.has_failures());

        let failed: Vec<_> = report.failed().map(|(s, _)| *s).collect();
        assert_eq!(failed, vec![Setting::CoreMaxFreq(3000)]);
        assert_eq!(report.applied().count(), 2);
    }

    #[test]
    fn unsupported_group_is_skipped_without_calls() {
        let mut gpu = FakeGpu {
            unsupported: HashSet::from([TuningGroup::Fan]),
            ..Default::default()
        };
        let overrides = OverrideSet {
            zero_rpm: Some(true),
            power_limit: Some(-5),
            ..Default::default()
        };

        let report = apply(&mut gpu, &overrides);

        assert_eq!(gpu.calls, vec![Setting::PowerLimit(-5)]);
        assert!(!report.has_failures());
        assert_eq!(
            report.skipped().collect::<Vec<_>>(),
            vec![(
                &Setting::ZeroRpm(true),
                SkipReason::Unsupported(TuningGroup::Fan)
            )]
        );
    }

    #[test]
    fn presets_only_group_is_skipped() {
        let mut gpu = FakeGpu {
            presets_only: HashSet::from([TuningGroup::Graphics]),
            ..Default::default()
        };
        let overrides = OverrideSet {
            core_max_freq: Some(2500),
            core_min_freq: Some(500),
            ..Default::default()
        };

        let report = apply(&mut gpu, &overrides);

        assert!(gpu.calls.is_empty());
        assert_eq!(report.skipped().count(), 2);
        assert!(report.skipped().all(|(_, reason)| {
            reason
                == SkipReason::PresetsOnly {
                    group: TuningGroup::Graphics,
                    count: 3,
                }
        }));
    }

    #[test]
    fn unsupported_dimension_is_skipped_not_failed() {
        let mut gpu = FakeGpu {
            missing: HashSet::from([Dimension::VoltageOffset]),
            ..Default::default()
        };
        let overrides = OverrideSet {
            voltage_offset: Some(-60),
            ..Default::default()
        };

        let report = apply(&mut gpu, &overrides);

        assert!(!report.has_failures());
        assert_eq!(report.skipped().count(), 1);
    }

    #[test]
    fn report_renders_one_line_per_field() {
        let mut gpu = FakeGpu {
            rejected: HashSet::from([Dimension::PowerLimit]),
            ..Default::default()
        };
        let overrides = OverrideSet {
            vram_max_freq: Some(2400),
            power_limit: Some(20),
            ..Default::default()
        };

        let rendered = apply(&mut gpu, &overrides).to_string();

        assert_eq!(
            rendered,
            " -> VRAM max frequency: 2400 MHz\n \
             [!] Failed to set power limit: code 3\n"
        );
    }
}
