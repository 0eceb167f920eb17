//! Validation report: per-model metric records and a cross-model summary.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use chrono::Local;
use log::{error, info, warn};
use ordered_float::OrderedFloat;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::config::{ModelCatalog, ModelEntry};
use crate::error::Result;
use crate::evaluation::{Evaluator, RawEvaluation};
use crate::helpers::{file_size_mb, write_json};
use crate::metric::{DEFAULT_DECIMALS, MetricValue, normalize, round_to};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelMetrics {
    pub model_name: String,
    pub model_path: String,
    pub dataset_path: String,
    pub model_size_mb: f64,
    pub validation_time_seconds: f64,
    pub map50: f64,
    pub map95: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub num_images: usize,
    pub classes: Vec<String>,
    pub device: String,
    pub inference_speed_fps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_class_map50: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_class_map95: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_inference_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_fps: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedValidation {
    pub model_name: String,
    pub model_path: String,
    pub dataset_path: String,
    pub error: String,
    pub model_size_mb: f64,
    pub map50: f64,
    pub map95: f64,
    pub validation_time_seconds: f64,
    pub inference_speed_fps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModelOutcome {
    Validated(ModelMetrics),
    Failed(FailedValidation),
    MissingModel { error: String, model_path: String },
    MissingDataset { error: String, dataset_path: String },
}

impl ModelOutcome {
    pub fn metrics(&self) -> Option<&ModelMetrics> {
        match self {
            ModelOutcome::Validated(m) => Some(m),
            _ => None,
        }
    }

    /// mAP50 as used for ranking; outcomes without one count as 0.
    fn map50(&self) -> f64 {
        match self {
            ModelOutcome::Validated(m) => m.map50,
            ModelOutcome::Failed(f) => f.map50,
            _ => 0.0,
        }
    }

    fn map95(&self) -> f64 {
        match self {
            ModelOutcome::Validated(m) => m.map95,
            ModelOutcome::Failed(f) => f.map95,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTable(pub Vec<(String, ModelOutcome)>);

impl ModelTable {
    pub fn get(&self, name: &str) -> Option<&ModelOutcome> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, o)| o)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn validated(&self) -> impl Iterator<Item = &ModelMetrics> {
        self.0.iter().filter_map(|(_, o)| o.metrics())
    }
}

impl Serialize for ModelTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, outcome) in &self.0 {
            map.serialize_entry(name, outcome)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_models: usize,
    pub successfully_validated: usize,
    pub failed_validations: usize,
    pub average_map50: f64,
    pub average_map95: f64,
    pub best_map50_model: Option<String>,
    pub best_map95_model: Option<String>,
    pub total_models_size_mb: f64,
    pub average_model_size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemInfo {
    pub tool_version: String,
    pub os: String,
    pub arch: String,
    pub available_cpus: usize,
}

impl SystemInfo {
    pub fn current() -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            available_cpus: std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub validation_timestamp: String,
    pub system_info: SystemInfo,
    pub models: ModelTable,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
}

impl ValidationReport {
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Name of the first outcome with the highest `key`.
fn best_by(models: &ModelTable, key: impl Fn(&ModelOutcome) -> f64) -> Option<String> {
    // `max_by_key` keeps the last maximum; scanning in reverse makes it the first.
    models
        .0
        .iter()
        .rev()
        .max_by_key(|(_, o)| OrderedFloat(key(o)))
        .map(|(name, _)| name.clone())
}

/// Summary over a model table; `None` when nothing validated.
pub fn summarize(models: &ModelTable, total_models: usize) -> Option<Summary> {
    let validated: Vec<&ModelMetrics> = models.validated().collect();
    if validated.is_empty() {
        return None;
    }
    let map50: Vec<f64> = validated.iter().map(|m| m.map50).collect();
    let map95: Vec<f64> = validated.iter().map(|m| m.map95).collect();
    let sizes: Vec<f64> = validated.iter().map(|m| m.model_size_mb).collect();

    Some(Summary {
        total_models,
        successfully_validated: validated.len(),
        failed_validations: total_models.saturating_sub(validated.len()),
        average_map50: round_to(mean(&map50), DEFAULT_DECIMALS),
        average_map95: round_to(mean(&map95), DEFAULT_DECIMALS),
        best_map50_model: best_by(models, ModelOutcome::map50),
        best_map95_model: best_by(models, ModelOutcome::map95),
        total_models_size_mb: round_to(sizes.iter().sum(), 2),
        average_model_size_mb: round_to(mean(&sizes), 2),
    })
}

/// Map per-class values onto class names; indices past the name list are dropped.
fn per_class(values: &[MetricValue], names: &[String], decimals: u32) -> BTreeMap<String, f64> {
    values
        .iter()
        .zip(names)
        .map(|(value, name)| (name.clone(), normalize(value, decimals)))
        .collect()
}

pub fn build_metrics(
    model: &ModelEntry,
    raw: &RawEvaluation,
    measured_seconds: f64,
    decimals: u32,
) -> ModelMetrics {
    let names = if raw.names.is_empty() {
        model.classes.clone()
    } else {
        raw.names.clone()
    };
    let seconds = raw
        .elapsed_seconds
        .filter(|s| s.is_finite() && *s >= 0.0)
        .unwrap_or(measured_seconds);
    let validation_time_seconds = round_to(seconds, 2);
    let num_images = raw
        .num_images
        .or_else(|| raw.map50_per_class.as_ref().map(Vec::len))
        .unwrap_or(0);
    let inference_speed_fps = if validation_time_seconds > 0.0 && num_images > 0 {
        round_to(num_images as f64 / validation_time_seconds, 2)
    } else {
        0.0
    };
    let (avg_inference_time_ms, inference_fps) = match raw.inference_time_ms {
        Some(ms) if ms.is_finite() && ms > 0.0 => {
            (Some(round_to(ms, 2)), Some(round_to(1000.0 / ms, 2)))
        }
        Some(_) => (Some(0.0), Some(0.0)),
        None => (None, None),
    };

    ModelMetrics {
        model_name: model.name.clone(),
        model_path: model.model_path.display().to_string(),
        dataset_path: model.dataset_path.display().to_string(),
        model_size_mb: file_size_mb(&model.model_path),
        validation_time_seconds,
        map50: normalize(&raw.map50, decimals),
        map95: normalize(&raw.map, decimals),
        precision: normalize(&raw.mp, decimals),
        recall: normalize(&raw.mr, decimals),
        f1_score: normalize(&raw.f1, decimals),
        num_images,
        per_class_map50: raw
            .map50_per_class
            .as_deref()
            .map(|v| per_class(v, &names, decimals)),
        per_class_map95: raw
            .map_per_class
            .as_deref()
            .map(|v| per_class(v, &names, decimals)),
        classes: names,
        device: raw.device.clone().unwrap_or_else(|| "unknown".to_string()),
        inference_speed_fps,
        avg_inference_time_ms,
        inference_fps,
    }
}

/// Runs an [`Evaluator`] over a model catalog.
pub struct ValidationHarness<'a, E: Evaluator> {
    evaluator: &'a E,
    decimals: u32,
}

impl<'a, E: Evaluator> ValidationHarness<'a, E> {
    pub fn new(evaluator: &'a E) -> Self {
        Self {
            evaluator,
            decimals: DEFAULT_DECIMALS,
        }
    }

    pub fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = decimals;
        self
    }

    pub fn validate_model(&self, model: &ModelEntry) -> ModelOutcome {
        if !model.model_path.exists() {
            error!("Model not found: {}", model.model_path.display());
            return ModelOutcome::MissingModel {
                error: "Model file not found".to_string(),
                model_path: model.model_path.display().to_string(),
            };
        }
        if !model.dataset_path.exists() {
            error!("Dataset not found: {}", model.dataset_path.display());
            return ModelOutcome::MissingDataset {
                error: "Dataset file not found".to_string(),
                dataset_path: model.dataset_path.display().to_string(),
            };
        }

        info!("=== Validating {} ===", model.name);
        let start = Instant::now();
        match self.evaluator.evaluate(model) {
            Ok(raw) => {
                let metrics = build_metrics(model, &raw, start.elapsed().as_secs_f64(), self.decimals);
                info!("{} validation completed:", model.name);
                info!("  mAP50: {}", metrics.map50);
                info!("  mAP95: {}", metrics.map95);
                info!("  Model size: {} MB", metrics.model_size_mb);
                info!("  Inference speed: {} FPS", metrics.inference_speed_fps);
                info!("  Validation time: {} seconds", metrics.validation_time_seconds);
                ModelOutcome::Validated(metrics)
            }
            Err(e) => {
                error!("Error validating {}: {e}", model.name);
                ModelOutcome::Failed(FailedValidation {
                    model_name: model.name.clone(),
                    model_path: model.model_path.display().to_string(),
                    dataset_path: model.dataset_path.display().to_string(),
                    error: e.to_string(),
                    model_size_mb: file_size_mb(&model.model_path),
                    map50: 0.0,
                    map95: 0.0,
                    validation_time_seconds: 0.0,
                    inference_speed_fps: 0.0,
                })
            }
        }
    }

    pub fn run(&self, catalog: &ModelCatalog) -> ValidationReport {
        let mut models = ModelTable::default();
        for model in catalog.models.iter().filter(|m| !m.available) {
            warn!("Skipping unavailable model: {}", model.name);
        }
        let considered: Vec<&ModelEntry> = catalog.available().collect();
        let total = considered.len();

        for (i, model) in considered.into_iter().enumerate() {
            info!("[{}/{total}] Processing {}...", i + 1, model.name);
            models.0.push((model.name.clone(), self.validate_model(model)));
        }

        let summary = summarize(&models, total);
        ValidationReport {
            validation_timestamp: Local::now().to_rfc3339(),
            system_info: SystemInfo::current(),
            models,
            summary,
        }
    }
}
