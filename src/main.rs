use std::process::ExitCode;

use anyhow::Result;
use oc_setter::{
    arg_parser::ArgsOptions,
    command::{Command, USAGE},
    config_manager::ConfigManager,
    devices_manager::DevicesManager,
    gpu_device::nvidia_device::NvmlBackend,
    logger,
};
use tracing::error;

fn main() -> ExitCode {
    logger::init_logging();

    match run() {
        Ok(code) => code,
        Err(err) => {
            for e in err.chain() {
                error!("{e}");
            }

            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    // Parse the command line arguments
    let args_options = ArgsOptions::parse();

    let command = Command::parse(&args_options.action, &args_options.arguments)?;
    if command == Command::Usage {
        println!("{USAGE}");
        return Ok(ExitCode::SUCCESS);
    }

    let config = ConfigManager::load(args_options.config_file_path.as_deref())?;

    // NVML is shut down when the backend goes out of scope
    let backend = NvmlBackend::init()?;
    let devices_manager = DevicesManager::new(&backend, &config);

    let output = devices_manager.execute(command)?;
    print!("{output}");

    Ok(ExitCode::SUCCESS)
}
