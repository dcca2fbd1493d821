use std::collections::BTreeMap;

pub mod parser;
pub mod scanner;

pub use parser::{ParseError, parse, parse_file};

// One discrete tunable point within a feature,
// e.g. one frequency/voltage pair of a curve
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeatureState {
    pub id: i32,
    pub enabled: bool,
    pub value: i32,
}

// A tunable category of the profile, the states are
// stored in the same order as the source document
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Feature {
    pub id: i32,
    pub enabled: bool,
    pub states: Vec<FeatureState>,
}

// A parsed GPU profile, feature ids are unique
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GpuProfile {
    pub dev_id: String,
    pub rev_id: String,
    pub features: BTreeMap<i32, Feature>,
}

impl Feature {
    // Return the value of the first state,
    // None if the feature declares no states
    pub fn first_value(&self) -> Option<i32> {
        self.states.first().map(|state| state.value)
    }
}

impl GpuProfile {
    // Return the feature with the given id if present in the profile
    pub fn feature(&self, id: i32) -> Option<&Feature> {
        self.features.get(&id)
    }

    // Insert a feature, replacing any earlier feature with the same id
    pub fn insert_feature(&mut self, feature: Feature) -> Option<Feature> {
        self.features.insert(feature.id, feature)
    }
}
