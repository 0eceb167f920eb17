//! Boundary to the external evaluator.
//!
//! The detection library runs validation on its own and leaves a JSON dump
//! per model. This module reads those dumps into [`RawEvaluation`], where
//! every metric is already a [`MetricValue`] regardless of the shape the
//! library chose for it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::config::ModelEntry;
use crate::error::Result;
use crate::helpers::read_json;
use crate::metric::MetricValue;

/// Raw output of one validation run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEvaluation {
    pub map50: MetricValue,
    /// mAP averaged over IoU 0.50-0.95.
    #[serde(alias = "map95", alias = "map50_95")]
    pub map: MetricValue,
    #[serde(alias = "precision")]
    pub mp: MetricValue,
    #[serde(alias = "recall")]
    pub mr: MetricValue,
    pub f1: MetricValue,
    pub map50_per_class: Option<Vec<MetricValue>>,
    #[serde(alias = "map95_per_class")]
    pub map_per_class: Option<Vec<MetricValue>>,
    pub num_images: Option<usize>,
    #[serde(deserialize_with = "deserialize_names")]
    pub names: Vec<String>,
    pub device: Option<String>,
    /// Wall time of the validation run as measured by the evaluator.
    pub elapsed_seconds: Option<f64>,
    /// Average single-image inference latency.
    pub inference_time_ms: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NamesRepr {
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

/// Class names arrive either as a list or as an index-keyed map.
fn deserialize_names<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr = Option::<NamesRepr>::deserialize(deserializer)?;
    Ok(match repr {
        None => Vec::new(),
        Some(NamesRepr::List(names)) => names,
        Some(NamesRepr::Map(map)) => {
            let mut indexed: Vec<(usize, String)> = map
                .into_iter()
                .filter_map(|(k, v)| k.trim().parse::<usize>().ok().map(|i| (i, v)))
                .collect();
            indexed.sort_by_key(|(i, _)| *i);
            indexed.into_iter().map(|(_, v)| v).collect()
        }
    })
}

/// Produces raw metrics for a model.
pub trait Evaluator {
    fn evaluate(&self, model: &ModelEntry) -> Result<RawEvaluation>;
}

/// Reads `<dir>/<model>.json`, or the model's own `metrics_path`.
#[derive(Debug, Clone)]
pub struct JsonDumpEvaluator {
    dir: PathBuf,
}

impl JsonDumpEvaluator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dump_path(&self, model: &ModelEntry) -> PathBuf {
        model
            .metrics_path
            .clone()
            .unwrap_or_else(|| self.dir.join(format!("{}.json", model.name)))
    }
}

impl Evaluator for JsonDumpEvaluator {
    fn evaluate(&self, model: &ModelEntry) -> Result<RawEvaluation> {
        load_dump(&self.dump_path(model))
    }
}

pub fn load_dump(path: &Path) -> Result<RawEvaluation> {
    read_json(path)
}
