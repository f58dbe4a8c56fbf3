use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Builds DELWAQ / D-Emission model input from a wflow-style hydromodel
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Log debug messages (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a new model in the root folder
    Build {
        /// Model root folder
        root: PathBuf,

        /// YAML build file
        #[arg(short, long, default_value = "build.yaml")]
        config: PathBuf,
    },
    /// Update an existing model in the root folder
    Update {
        /// Model root folder
        root: PathBuf,

        /// YAML update file
        #[arg(short, long, default_value = "update.yaml")]
        config: PathBuf,
    },
}

pub fn get_args() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build() {
        let args = Args::try_parse_from(["delwaq_rs", "build", "model", "-c", "wq.yaml", "-v"]).unwrap();
        assert!(args.verbose);
        match args.command {
            Command::Build { root, config } => {
                assert_eq!(root, PathBuf::from("model"));
                assert_eq!(config, PathBuf::from("wq.yaml"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_update_default_config() {
        let args = Args::try_parse_from(["delwaq_rs", "update", "model"]).unwrap();
        match args.command {
            Command::Update { config, .. } => assert_eq!(config, PathBuf::from("update.yaml")),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
