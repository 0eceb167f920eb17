pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod helpers;
pub mod mapping;
pub mod metric;
pub mod report;
pub mod training;

use log::LevelFilter;

pub use crate::cli::{Args, Command};
pub use crate::config::{ModelCatalog, ModelEntry};
pub use crate::dataset::{DataYaml, DatasetPreparator, DatasetInfo, PreparedDataset};
pub use crate::error::{Error, Result};
pub use crate::evaluation::{Evaluator, JsonDumpEvaluator, RawEvaluation};
pub use crate::mapping::load_class_mapping;
pub use crate::metric::{DEFAULT_DECIMALS, MetricValue, normalize};
pub use crate::report::{ModelOutcome, ValidationHarness, ValidationReport};
pub use crate::training::{ModelSize, TrainPlan, TrainSettings};

/// Initialise env_logger. `RUST_LOG` wins over `default_filter` when set.
pub fn init_logging(default_filter: LevelFilter) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.format_timestamp_secs();
    // A second call keeps the first logger.
    let _ = builder.try_init();
}
