use std::{fs, io, path::Path, path::PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

use crate::profile::{
    Feature, FeatureState, GpuProfile,
    scanner::{Scanner, Tag},
};

const GPU_TAG: &str = "GPU";
const FEATURE_TAG: &str = "FEATURE";
const STATES_TAG: &str = "STATES";
const STATE_TAG: &str = "STATE";

const GPU_CLOSE: &str = "</GPU>";
const FEATURE_CLOSE: &str = "</FEATURE>";
const STATES_CLOSE: &str = "</STATES>";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read profile \"{}\"", .path.display())]
    Unreadable { path: PathBuf, source: io::Error },
    #[error("No <GPU> root tag found in profile")]
    MissingRoot,
    #[error("Malformed {attribute} attribute in <{tag}> tag: \"{value}\"")]
    MalformedAttribute {
        tag: String,
        attribute: String,
        value: String,
    },
    #[error("Unterminated <{tag}> tag at offset {offset}")]
    UnterminatedTag { tag: String, offset: usize },
}

// Read and parse the profile stored at the given path
pub fn parse_file(path: &Path) -> Result<GpuProfile, ParseError> {
    debug!("Parsing profile at: {:?}", path);

    let contents =
        fs::read_to_string(path).map_err(|source| ParseError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

    parse(&contents)
}

// Parse a profile document.
//
// The document is scanned once from left to right: the <GPU> root tag
// first, then every <FEATURE> tag found before the </GPU> marker.
// Either the whole profile is returned or the first error found.
pub fn parse(contents: &str) -> Result<GpuProfile, ParseError> {
    let mut scanner = Scanner::new(contents);

    let root = scanner
        .next_tag(GPU_TAG, contents.len())?
        .ok_or(ParseError::MissingRoot)?;

    let mut profile = GpuProfile {
        dev_id: root.attribute("DevID").to_string(),
        rev_id: root.attribute("RevID").to_string(),
        ..Default::default()
    };

    trace!(
        "Profile root: DevID \"{}\" RevID \"{}\"",
        profile.dev_id, profile.rev_id
    );

    // Without a close marker features are scanned up to the end of input
    let gpu_end = scanner.find_marker(GPU_CLOSE).unwrap_or(contents.len());

    while let Some(tag) = scanner.next_tag(FEATURE_TAG, gpu_end)? {
        let feature = parse_feature(&mut scanner, &tag, gpu_end)?;

        trace!(
            "Feature {}: enabled {} - {} states",
            feature.id,
            feature.enabled,
            feature.states.len()
        );

        if let Some(old) = profile.insert_feature(feature) {
            debug!("Redefinition of feature {}, keeping the last one", old.id);
        }
    }

    Ok(profile)
}

// Parse a feature whose open tag was just consumed
fn parse_feature(
    scanner: &mut Scanner<'_>,
    tag: &Tag<'_>,
    gpu_end: usize,
) -> Result<Feature, ParseError> {
    let mut feature = Feature {
        id: int_attribute(tag, "ID")?,
        enabled: bool_attribute(tag, "Enabled"),
        states: Vec::new(),
    };

    if tag.self_closing {
        return Ok(feature);
    }

    // The feature region ends at its close marker, or at the next
    // feature (or the GPU end) when the close marker is missing
    let close = scanner.find_marker(FEATURE_CLOSE).filter(|end| *end < gpu_end);
    let next_feature = scanner.find_tag(FEATURE_TAG);

    let feature_end = match (close, next_feature) {
        (Some(close), Some(next)) if next < close => next,
        (Some(close), _) => close,
        (None, Some(next)) => next.min(gpu_end),
        (None, None) => gpu_end,
    };

    if let Some(states) = scanner.next_tag(STATES_TAG, feature_end)? {
        let states_end = scanner
            .find_marker(STATES_CLOSE)
            .filter(|end| *end < feature_end);

        // A <STATES> block without its close marker holds no states
        if let (false, Some(states_end)) = (states.self_closing, states_end) {
            while let Some(state) = scanner.next_tag(STATE_TAG, states_end)? {
                feature.states.push(parse_state(&state)?);
            }

            scanner.advance_to(states_end + STATES_CLOSE.len());
        }
    }

    match close {
        Some(close) if close == feature_end => {
            scanner.advance_to(close + FEATURE_CLOSE.len());
        }
        _ => scanner.advance_to(feature_end),
    }

    Ok(feature)
}

fn parse_state(tag: &Tag<'_>) -> Result<FeatureState, ParseError> {
    Ok(FeatureState {
        id: int_attribute(tag, "ID")?,
        enabled: bool_attribute(tag, "Enabled"),
        value: int_attribute(tag, "Value")?,
    })
}

// Required base 10 integer attribute, optionally signed
fn int_attribute(tag: &Tag<'_>, name: &str) -> Result<i32, ParseError> {
    let value = tag.attribute(name);

    value.parse().map_err(|_| ParseError::MalformedAttribute {
        tag: tag.name.to_string(),
        attribute: name.to_string(),
        value: value.to_string(),
    })
}

// Only the literal tokens "True" and "1" are true
fn bool_attribute(tag: &Tag<'_>, name: &str) -> bool {
    matches!(tag.attribute(name), "True" | "1")
}
