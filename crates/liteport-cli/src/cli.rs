use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "liteport", version, about = "Run on-device lite models")]
pub struct Cli {
    /// Log filter (RUST_LOG syntax)
    #[arg(long, global = true, default_value = "warn")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a model on tensors read from a JSON file and print the outputs
    Run {
        /// Serialized model file
        #[arg(long)]
        model: PathBuf,

        /// JSON array of {"dtype", "shape", "data"} objects
        #[arg(long)]
        input: PathBuf,

        #[arg(long, value_enum, default_value_t = BackendKind::Ort)]
        backend: BackendKind,

        /// Method to invoke
        #[arg(long, default_value = "forward")]
        method: String,

        /// Run this many times and report timings
        #[arg(long, default_value_t = 1)]
        repeat: usize,

        /// Engine config (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Overrides `num_threads` from the config
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Print the runtime's view of a model
    Inspect {
        #[arg(long)]
        model: PathBuf,

        #[arg(long, value_enum, default_value_t = BackendKind::Ort)]
        backend: BackendKind,

        /// Also report this method if the module defines it (bridge only; repeatable)
        #[arg(long = "check-method", value_name = "NAME")]
        check_methods: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// ONNX Runtime
    Ort,
    /// C++ lite interpreter through the linked shim
    Bridge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from([
            "liteport", "run", "--model", "m.onnx", "--input", "in.json",
        ])
        .unwrap();
        assert_eq!(cli.log, "warn");
        match cli.command {
            Command::Run { backend, method, repeat, config, threads, .. } => {
                assert_eq!(backend, BackendKind::Ort);
                assert_eq!(method, "forward");
                assert_eq!(repeat, 1);
                assert!(config.is_none());
                assert!(threads.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn inspect_accepts_bridge_and_global_log() {
        let cli = Cli::try_parse_from([
            "liteport", "inspect", "--model", "m.ptl", "--backend", "bridge", "--log", "debug",
            "--check-method", "encode", "--check-method", "decode",
        ])
        .unwrap();
        assert_eq!(cli.log, "debug");
        match cli.command {
            Command::Inspect { backend, check_methods, .. } => {
                assert_eq!(backend, BackendKind::Bridge);
                assert_eq!(check_methods, vec!["encode", "decode"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn model_is_required() {
        assert!(Cli::try_parse_from(["liteport", "run", "--input", "in.json"]).is_err());
    }
}
