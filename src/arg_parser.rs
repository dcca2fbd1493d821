use std::{
    io::{stderr, stdout},
    path::PathBuf,
    process,
};

use argparse::{ArgumentParser, List, Print, Store, StoreOption};

// Actions may be written with a single leading dash
const ACTIONS: [&str; 3] = ["-list", "-set", "-load"];

#[derive(Debug, Default)]
pub struct ArgsOptions {
    pub config_file_path: Option<PathBuf>,

    // The action name and its key=value tokens
    pub action: String,
    pub arguments: Vec<String>,
}

impl ArgsOptions {
    pub fn parse() -> Self {
        Self::parse_from(std::env::args().collect())
            .unwrap_or_else(|code| process::exit(code))
    }

    // Parse the given arguments, the first one is the program name.
    // On error or after --help the exit code is returned.
    pub fn parse_from(args: Vec<String>) -> Result<Self, i32> {
        let args = args
            .into_iter()
            .map(|arg| {
                if ACTIONS.contains(&arg.as_str()) {
                    arg.trim_start_matches('-').to_string()
                } else {
                    arg
                }
            })
            .collect();

        let mut options = ArgsOptions::default();

        {
            let mut parser = ArgumentParser::new();
            parser.set_description("Apply GPU overclocking profiles and settings");

            // Configuration file path
            parser.refer(&mut options.config_file_path).add_option(
                &["-c", "--config"],
                StoreOption,
                "The file path of the configuration file",
            );

            // Show version
            parser.add_option(
                &["-V", "--version"],
                Print(env!("CARGO_PKG_VERSION").to_string()),
                "Show the version",
            );

            parser.refer(&mut options.action).add_argument(
                "action",
                Store,
                "The action to run: list, set or load",
            );

            parser.refer(&mut options.arguments).add_argument(
                "arguments",
                List,
                "Profile path and key=value tokens of the action",
            );

            // Negative values like volt=-50 belong to the action
            parser.stop_on_first_argument(true);

            parser.parse(args, &mut stdout(), &mut stderr())?;
        }

        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ArgsOptions {
        let mut all = vec!["oc-setter".to_string()];
        all.extend(args.iter().map(|arg| arg.to_string()));

        ArgsOptions::parse_from(all).unwrap()
    }

    #[test]
    fn dashed_action_is_captured() {
        let options = parse(&["-set", "gpu=1", "volt=-50"]);

        assert_eq!(options.action, "set");
        assert_eq!(options.arguments, vec!["gpu=1", "volt=-50"]);
        assert_eq!(options.config_file_path, None);
    }

    #[test]
    fn config_option_comes_before_the_action() {
        let options = parse(&["-c", "oc.json", "load", "profile.xml"]);

        assert_eq!(options.config_file_path, Some(PathBuf::from("oc.json")));
        assert_eq!(options.action, "load");
        assert_eq!(options.arguments, vec!["profile.xml"]);
    }

    #[test]
    fn no_action_is_empty() {
        let options = parse(&[]);

        assert!(options.action.is_empty());
        assert!(options.arguments.is_empty());
    }
}
