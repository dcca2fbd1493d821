use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use crate::overrides::OverrideSet;

// Token values meaning "leave this parameter untouched"
const OFFSET_UNCHANGED: i32 = -999;
const ZERO_RPM_UNCHANGED: i32 = -1;

pub const USAGE: &str = "\
Usage:
  oc-setter -list
  oc-setter -set [gpu=N] [core=MHz] [coremin=MHz] [volt=mV] [vram=MHz] [power=%] [zerorpm=0|1] [preset=NAME]
  oc-setter -load profile.xml [gpu=N] [core=MHz] [coremin=MHz] [volt=mV] [vram=MHz] [power=%] [zerorpm=0|1]";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid value for \"{key}\": \"{value}\"")]
    InvalidValue { key: String, value: String },
    #[error("The load action requires a profile path")]
    MissingPath,
}

// Target GPU and values of a set or load action
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Request {
    // None selects the configured default GPU
    pub gpu: Option<i64>,
    pub overrides: OverrideSet,
    pub preset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Set(Request),
    Load { path: PathBuf, request: Request },
    Usage,
}

impl Command {
    // Build a command from the action name and its key=value tokens.
    // The action may be written with or without the leading dash.
    pub fn parse(action: &str, args: &[String]) -> Result<Self, CommandError> {
        match action.trim_start_matches('-') {
            "list" => Ok(Self::List),
            "set" if !args.is_empty() => Ok(Self::Set(parse_tokens(args)?)),
            "load" => {
                let (path, tokens) =
                    args.split_first().ok_or(CommandError::MissingPath)?;

                Ok(Self::Load {
                    path: PathBuf::from(path),
                    request: parse_tokens(tokens)?,
                })
            }
            _ => Ok(Self::Usage),
        }
    }
}

// Parse the key=value tokens of a request, every key is optional
// and the "unchanged" values map to an empty field
pub fn parse_tokens(args: &[String]) -> Result<Request, CommandError> {
    let mut request = Request::default();
    let overrides = &mut request.overrides;

    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            warn!("Ignoring argument \"{arg}\"");
            continue;
        };

        match key {
            "gpu" => request.gpu = Some(parse_value(key, value)?),
            "core" => overrides.core_max_freq = frequency(parse_value(key, value)?),
            "coremin" => {
                overrides.core_min_freq = frequency(parse_value(key, value)?)
            }
            "volt" => overrides.voltage_offset = offset(parse_value(key, value)?),
            "vram" => overrides.vram_max_freq = frequency(parse_value(key, value)?),
            "power" => overrides.power_limit = offset(parse_value(key, value)?),
            "zerorpm" => overrides.zero_rpm = zero_rpm(key, value)?,
            "preset" => request.preset = Some(value.to_string()),
            _ => warn!("Unknown key \"{key}\", ignoring it"),
        }
    }

    Ok(request)
}

fn parse_value<T: std::str::FromStr>(
    key: &str,
    value: &str,
) -> Result<T, CommandError> {
    value.parse().map_err(|_| CommandError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

// Frequencies lower or equal to zero leave the clock untouched
fn frequency(value: i32) -> Option<u32> {
    u32::try_from(value).ok().filter(|freq| *freq > 0)
}

fn offset(value: i32) -> Option<i32> {
    (value != OFFSET_UNCHANGED).then_some(value)
}

fn zero_rpm(key: &str, value: &str) -> Result<Option<bool>, CommandError> {
    match parse_value(key, value)? {
        ZERO_RPM_UNCHANGED => Ok(None),
        0 => Ok(Some(false)),
        1 => Ok(Some(true)),
        _ => Err(CommandError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
