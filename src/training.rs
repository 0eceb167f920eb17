//! Training plans for the external YOLO trainer.
//!
//! A plan pins the data descriptor, base weights and hyper-parameters of one
//! run and is written as `args.yaml` into the run directory. Once the trainer
//! has produced `weights/best.pt` there, [`TrainPlan::collect_weights`] copies
//! it to `models/<name>_model.pt` where the validation harness expects it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Local;
use clap::ValueEnum;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::dataset::{GENERAL, default_datasets};
use crate::error::Result;
use crate::helpers::{copy_file, create_dir_all, write_json, write_yaml};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    N,
    #[default]
    S,
    M,
    L,
    X,
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelSize::N => "n",
            ModelSize::S => "s",
            ModelSize::M => "m",
            ModelSize::L => "l",
            ModelSize::X => "x",
        };
        write!(f, "{s}")
    }
}

/// Per-run knobs exposed on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSettings {
    pub epochs: u32,
    pub batch_size: u32,
    pub imgsz: u32,
    pub model_size: ModelSize,
    /// Custom architecture YAML used instead of the pretrained base weights.
    pub architecture: Option<PathBuf>,
    pub project: PathBuf,
    pub models_dir: PathBuf,
    pub device: String,
}

impl Default for TrainSettings {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 16,
            imgsz: 640,
            model_size: ModelSize::default(),
            architecture: None,
            project: PathBuf::from("runs/train"),
            models_dir: PathBuf::from("models"),
            device: "cpu".to_string(),
        }
    }
}

/// Optimizer, loss and augmentation parameters handed to the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub optimizer: String,
    pub lr0: f64,
    pub lrf: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub warmup_epochs: f64,
    pub warmup_momentum: f64,
    pub warmup_bias_lr: f64,
    #[serde(rename = "box")]
    pub box_gain: f64,
    pub cls: f64,
    pub dfl: f64,
    pub label_smoothing: f64,
    pub nbs: u32,
    pub hsv_h: f64,
    pub hsv_s: f64,
    pub hsv_v: f64,
    pub degrees: f64,
    pub translate: f64,
    pub scale: f64,
    pub shear: f64,
    pub perspective: f64,
    pub flipud: f64,
    pub fliplr: f64,
    pub mosaic: f64,
    pub mixup: f64,
    pub copy_paste: f64,
    pub patience: u32,
    pub workers: u32,
    pub amp: bool,
    pub close_mosaic: u32,
    pub cache: bool,
    pub dropout: f64,
    pub val: bool,
    pub plots: bool,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            optimizer: "AdamW".to_string(),
            lr0: 0.001,
            lrf: 0.01,
            momentum: 0.937,
            weight_decay: 0.0005,
            warmup_epochs: 3.0,
            warmup_momentum: 0.8,
            warmup_bias_lr: 0.1,
            box_gain: 7.5,
            cls: 0.5,
            dfl: 1.5,
            label_smoothing: 0.0,
            nbs: 64,
            hsv_h: 0.015,
            hsv_s: 0.7,
            hsv_v: 0.4,
            degrees: 0.0,
            translate: 0.1,
            scale: 0.5,
            shear: 0.0,
            perspective: 0.0,
            flipud: 0.0,
            fliplr: 0.5,
            mosaic: 1.0,
            mixup: 0.0,
            copy_paste: 0.0,
            patience: 50,
            workers: 8,
            amp: true,
            close_mosaic: 10,
            cache: false,
            dropout: 0.0,
            val: false,
            plots: false,
        }
    }
}

/// Contents of a run's `args.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainArgs {
    pub model: String,
    pub data: String,
    pub epochs: u32,
    pub batch: u32,
    pub imgsz: u32,
    pub device: String,
    pub project: String,
    pub name: String,
    pub exist_ok: bool,
    pub pretrained: bool,
    #[serde(flatten)]
    pub hyperparameters: Hyperparameters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainPlan {
    pub dataset: String,
    pub run_name: String,
    pub args: TrainArgs,
    pub run_dir: PathBuf,
    pub output_path: PathBuf,
}

impl TrainPlan {
    pub fn new(dataset: &str, data_yaml: &Path, settings: &TrainSettings) -> Self {
        let run_name = format!("{dataset}_{}", Local::now().format("%Y%m%d_%H%M%S"));
        Self::with_run_name(dataset, data_yaml, settings, run_name)
    }

    pub fn with_run_name(
        dataset: &str,
        data_yaml: &Path,
        settings: &TrainSettings,
        run_name: String,
    ) -> Self {
        let model = match &settings.architecture {
            Some(path) => path.display().to_string(),
            None => format!("yolov8{}.pt", settings.model_size),
        };
        let args = TrainArgs {
            model,
            data: data_yaml.display().to_string(),
            epochs: settings.epochs,
            batch: settings.batch_size,
            imgsz: settings.imgsz,
            device: settings.device.clone(),
            project: settings.project.display().to_string(),
            name: run_name.clone(),
            exist_ok: true,
            pretrained: true,
            hyperparameters: Hyperparameters::default(),
        };
        Self {
            dataset: dataset.to_string(),
            run_dir: settings.project.join(&run_name),
            output_path: settings.models_dir.join(format!("{dataset}_model.pt")),
            run_name,
            args,
        }
    }

    pub fn best_weights(&self) -> PathBuf {
        self.run_dir.join("weights").join("best.pt")
    }

    /// Write `args.yaml` into the run directory and return its path.
    pub fn write(&self) -> Result<PathBuf> {
        create_dir_all(&self.run_dir)?;
        let path = self.run_dir.join("args.yaml");
        write_yaml(&path, &self.args)?;
        info!("Training plan for {} written to {}", self.dataset, path.display());
        Ok(path)
    }

    /// Copy the trainer's best weights to the models directory.
    /// Returns false when the trainer has not produced them yet.
    pub fn collect_weights(&self) -> Result<bool> {
        let best = self.best_weights();
        if !best.is_file() {
            warn!("No best weights yet at {}", best.display());
            return Ok(false);
        }
        if let Some(parent) = self.output_path.parent() {
            create_dir_all(parent)?;
        }
        copy_file(&best, &self.output_path)?;
        info!("Model saved to {}", self.output_path.display());
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainStatus {
    Planned,
    Collected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainRecord {
    pub status: TrainStatus,
    pub validation: String,
}

impl TrainRecord {
    pub fn new(status: TrainStatus) -> Self {
        Self {
            status,
            validation: "disabled".to_string(),
        }
    }
}

/// Datasets covered by one `train` call. `--all` ends with the general dataset.
pub fn train_targets(dataset: Option<String>, all: bool, general: bool) -> Option<Vec<String>> {
    match (dataset, all, general) {
        (Some(name), _, _) => Some(vec![name]),
        (None, true, _) => Some(
            default_datasets()
                .into_iter()
                .map(|d| d.name)
                .chain(std::iter::once(GENERAL.to_string()))
                .collect(),
        ),
        (None, false, true) => Some(vec![GENERAL.to_string()]),
        (None, false, false) => None,
    }
}

pub fn save_training_results(path: &Path, results: &BTreeMap<String, TrainRecord>) -> Result<()> {
    write_json(path, results)
}
