pub mod arg_parser;
pub mod command;
pub mod config_manager;
pub mod devices_manager;
pub mod errors;
pub mod gpu_device;
pub mod logger;
pub mod overrides;
pub mod profile;
pub mod settings_applier;
