//! Model catalog: which models exist, where their weights and datasets live,
//! and the thresholds they are meant to run with.
//!
//! The catalog is read from YAML (or JSON when the file ends in `.json`).
//! Without a file the built-in catalog of the seven mining-safety models is
//! used.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::helpers::{expand_home, read_json, read_yaml};

fn default_confidence() -> f32 {
    0.5
}

fn default_iou() -> f32 {
    0.45
}

fn default_available() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    /// Trained weights file.
    pub model_path: PathBuf,
    /// `data.yaml` of the dataset the model is validated on.
    pub dataset_path: PathBuf,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_iou")]
    pub iou: f32,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default = "default_available")]
    pub available: bool,
    /// Evaluator dump for this model, when it is not `<metrics-dir>/<name>.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_path: Option<PathBuf>,
}

impl ModelEntry {
    fn builtin(name: &str, confidence: f32, iou: f32, classes: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            model_path: PathBuf::from(format!("models/{name}_model.pt")),
            dataset_path: PathBuf::from(format!("datasets/{name}/data.yaml")),
            confidence,
            iou,
            classes: classes.iter().map(|c| c.to_string()).collect(),
            available: true,
            metrics_path: None,
        }
    }

    fn expand_paths(&mut self) {
        self.model_path = expand_home(&self.model_path);
        self.dataset_path = expand_home(&self.dataset_path);
        if let Some(path) = self.metrics_path.take() {
            self.metrics_path = Some(expand_home(&path));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub models: Vec<ModelEntry>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            models: vec![
                ModelEntry::builtin("coal_miner", 0.5, 0.45, &["anomaly", "person", "equipment"]),
                ModelEntry::builtin("hydraulic_support", 0.55, 0.45, &["support", "damage", "anomaly"]),
                ModelEntry::builtin("large_coal", 0.5, 0.4, &["large_coal", "normal_coal", "debris"]),
                ModelEntry::builtin("mine_safety_helmet", 0.6, 0.45, &["helmet", "no_helmet", "person"]),
                ModelEntry::builtin(
                    "miner_behavior",
                    0.5,
                    0.45,
                    &["safe_behavior", "unsafe_behavior", "warning"],
                ),
                ModelEntry::builtin("towline", 0.5, 0.45, &["towline", "damage", "obstruction"]),
                ModelEntry::builtin(
                    "general",
                    0.45,
                    0.4,
                    &[
                        "coal_miner_person",
                        "hydraulic_support_support",
                        "hydraulic_support_plate",
                        "hydraulic_support_damage",
                        "large_coal_large_coal",
                        "mine_safety_helmet_helmet",
                        "miner_behavior_safe",
                        "miner_behavior_unsafe",
                        "towline_normal",
                        "towline_damage",
                    ],
                ),
            ],
        }
    }
}

impl ModelCatalog {
    /// Load a catalog file, expanding `~/` in every path.
    pub fn load(path: &Path) -> Result<Self> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let mut catalog: ModelCatalog = if is_json {
            read_json(path)?
        } else {
            read_yaml(path)?
        };
        for model in &mut catalog.models {
            model.expand_paths();
        }
        Ok(catalog)
    }

    /// Load `path` when given, otherwise the built-in catalog.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn get(&self, name: &str) -> Result<&ModelEntry> {
        self.models
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    /// Catalog restricted to `names`, in the given order.
    pub fn select(&self, names: &[String]) -> Result<Self> {
        let models = names
            .iter()
            .map(|name| self.get(name).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { models })
    }

    pub fn available(&self) -> impl Iterator<Item = &ModelEntry> {
        self.models.iter().filter(|m| m.available)
    }

    /// Re-root the relative model and dataset paths of the built-in catalog.
    pub fn rooted_at(mut self, models_dir: &Path, datasets_dir: &Path) -> Self {
        for model in &mut self.models {
            if model.model_path.is_relative() {
                if let Some(file) = model.model_path.file_name() {
                    model.model_path = models_dir.join(file);
                }
            }
            if model.dataset_path.is_relative() {
                model.dataset_path = datasets_dir.join(&model.name).join("data.yaml");
            }
        }
        self
    }
}
