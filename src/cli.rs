use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::metric::DEFAULT_DECIMALS;
use crate::training::ModelSize;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "Mining anomaly detection tooling", long_about = None)]
pub struct Args {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Build YOLO datasets from raw copies
    Prepare {
        /// Dataset to prepare, by short or source name (repeatable)
        #[arg(long = "dataset")]
        datasets: Vec<String>,

        /// Prepare every known dataset
        #[arg(long)]
        all: bool,

        /// Merge prepared datasets into the general dataset
        #[arg(long)]
        general: bool,

        /// Extra directory searched first for raw datasets
        #[arg(long)]
        data_path: Option<PathBuf>,

        /// Directories searched for raw datasets
        #[arg(long = "search-root", default_values = [".", "data"])]
        search_roots: Vec<PathBuf>,

        /// Output directory for prepared datasets
        #[arg(long, default_value = "datasets")]
        output: PathBuf,

        /// Directory with previously prepared datasets to reuse
        #[arg(long)]
        reuse_root: Option<PathBuf>,

        /// Seed for the train/val/test shuffle
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Write training plans and collect trained weights
    Train {
        /// Dataset short name
        #[arg(long, conflicts_with_all = ["all", "general"])]
        dataset: Option<String>,

        /// Plan every specialised dataset, then the general one
        #[arg(long)]
        all: bool,

        /// Plan the general dataset
        #[arg(long)]
        general: bool,

        #[arg(long, default_value_t = 5)]
        epochs: u32,

        #[arg(long, default_value_t = 16)]
        batch_size: u32,

        #[arg(long, default_value_t = 640)]
        imgsz: u32,

        #[arg(long, value_enum, default_value_t = ModelSize::S)]
        model_size: ModelSize,

        /// Custom model architecture YAML
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory holding prepared datasets
        #[arg(long, default_value = "datasets")]
        datasets_dir: PathBuf,

        /// Directory the trained weights are copied to
        #[arg(long, default_value = "models")]
        output_dir: PathBuf,

        /// Where to write the training results record
        #[arg(long, default_value = "training_results.json")]
        results: PathBuf,
    },

    /// Validate every available model and write a report
    Validate {
        /// Model catalog (YAML or JSON); the built-in catalog when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory with one evaluator dump per model
        #[arg(long, required = true)]
        metrics_dir: PathBuf,

        /// Only validate these models (repeatable)
        #[arg(long = "model")]
        models: Vec<String>,

        /// Re-root relative weight paths of the catalog
        #[arg(long)]
        models_dir: Option<PathBuf>,

        /// Re-root relative dataset paths of the catalog
        #[arg(long)]
        datasets_dir: Option<PathBuf>,

        #[arg(long, default_value = "validation_results.json")]
        output: PathBuf,

        #[arg(long, default_value_t = DEFAULT_DECIMALS)]
        decimals: u32,
    },

    /// Show how metric values are classified and normalized
    Inspect {
        /// Evaluator dump to inspect
        #[arg(long)]
        dump: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_DECIMALS)]
        decimals: u32,
    },

    /// Normalize a single JSON value
    Normalize {
        value: String,

        #[arg(long, default_value_t = DEFAULT_DECIMALS)]
        decimals: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_train_defaults() {
        let args = Args::try_parse_from(["mad", "train", "--dataset", "towline"]).unwrap();
        match args.command {
            Command::Train {
                dataset,
                epochs,
                model_size,
                ..
            } => {
                assert_eq!(dataset.as_deref(), Some("towline"));
                assert_eq!(epochs, 5);
                assert_eq!(model_size, ModelSize::S);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn validate_requires_metrics_dir() {
        assert!(Args::try_parse_from(["mad", "validate"]).is_err());
        let args = Args::try_parse_from(["mad", "-v", "validate", "--metrics-dir", "m"]).unwrap();
        assert!(args.verbose);
    }

    #[test]
    fn validate_filters_and_roots() {
        let args = Args::try_parse_from([
            "mad", "validate", "--metrics-dir", "m", "--model", "towline", "--model", "general",
            "--models-dir", "w",
        ])
        .unwrap();
        match args.command {
            Command::Validate {
                models,
                models_dir,
                datasets_dir,
                ..
            } => {
                assert_eq!(models, vec!["towline", "general"]);
                assert_eq!(models_dir, Some(PathBuf::from("w")));
                assert!(datasets_dir.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn normalize_takes_negative_literal() {
        let args = Args::try_parse_from(["mad", "normalize", "--", "-0.5"]).unwrap();
        assert!(matches!(args.command, Command::Normalize { ref value, decimals: 4 } if value == "-0.5"));
    }
}
