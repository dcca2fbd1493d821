use thiserror::Error;

use crate::{
    command::CommandError, config_manager::ConfigError,
    devices_manager::IndexError, profile::ParseError,
};

// The main error type
#[derive(Debug, Error)]
pub enum OcError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Profile(#[from] ParseError),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
