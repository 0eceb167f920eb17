use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, error, info, warn};
use ndarray::{arr0, arr1};
use serde_json::Value;

use mad_tools::cli::{Args, Command};
use mad_tools::config::ModelCatalog;
use mad_tools::dataset::{DatasetPreparator, PreparedDataset};
use mad_tools::evaluation::JsonDumpEvaluator;
use mad_tools::helpers::read_json;
use mad_tools::init_logging;
use mad_tools::metric::{MetricValue, normalize};
use mad_tools::report::{ModelOutcome, ValidationHarness, ValidationReport};
use mad_tools::training::{
    TrainPlan, TrainRecord, TrainSettings, TrainStatus, save_training_results, train_targets,
};

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    match args.command {
        Command::Prepare {
            datasets,
            all,
            general,
            data_path,
            search_roots,
            output,
            reuse_root,
            seed,
        } => {
            let mut roots: Vec<PathBuf> = data_path.into_iter().collect();
            roots.extend(search_roots);
            let mut preparator = DatasetPreparator::new(roots, output);
            if let Some(root) = reuse_root {
                preparator = preparator.with_reuse_root(root);
            }
            if let Some(seed) = seed {
                preparator = preparator.with_seed(seed);
            }
            prepare(&preparator, &datasets, all, general)
        }
        Command::Train {
            dataset,
            all,
            general,
            epochs,
            batch_size,
            imgsz,
            model_size,
            config,
            datasets_dir,
            output_dir,
            results,
        } => {
            let Some(names) = train_targets(dataset, all, general) else {
                bail!("pass --dataset NAME, --all or --general");
            };
            let settings = TrainSettings {
                epochs,
                batch_size,
                imgsz,
                model_size,
                architecture: config,
                models_dir: output_dir,
                ..Default::default()
            };
            train(&names, &datasets_dir, &settings, &results)
        }
        Command::Validate {
            config,
            metrics_dir,
            models,
            models_dir,
            datasets_dir,
            output,
            decimals,
        } => {
            let mut catalog = ModelCatalog::load_or_default(config.as_deref())
                .context("failed to load model catalog")?;
            if models_dir.is_some() || datasets_dir.is_some() {
                catalog = catalog.rooted_at(
                    models_dir.as_deref().unwrap_or(Path::new("models")),
                    datasets_dir.as_deref().unwrap_or(Path::new("datasets")),
                );
            }
            if !models.is_empty() {
                catalog = catalog.select(&models)?;
            }
            let evaluator = JsonDumpEvaluator::new(metrics_dir);
            let report = ValidationHarness::new(&evaluator)
                .with_decimals(decimals)
                .run(&catalog);
            report
                .save(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            print_report(&report);
            info!("Detailed report saved to: {}", output.display());
            Ok(())
        }
        Command::Inspect { dump, decimals } => inspect(dump.as_deref(), decimals),
        Command::Normalize { value, decimals } => {
            // Bare words that are not JSON are taken as strings.
            let json = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
            let metric = MetricValue::from_json(&json);
            println!("{}", normalize(&metric, decimals));
            Ok(())
        }
    }
}

fn prepare(preparator: &DatasetPreparator, datasets: &[String], all: bool, general: bool) -> Result<()> {
    let names: Vec<String> = if all || (datasets.is_empty() && !general) {
        preparator.datasets().iter().map(|d| d.name.clone()).collect()
    } else {
        datasets.to_vec()
    };

    let mut prepared: Vec<PreparedDataset> = Vec::new();
    let mut failed = 0usize;
    for name in &names {
        info!("=== Processing {name} ===");
        match preparator.prepare_by_name(name) {
            Ok(dataset) => prepared.push(dataset),
            Err(e) => {
                error!("Failed to prepare {name}: {e}");
                failed += 1;
            }
        }
    }

    if general {
        info!("=== Creating general dataset ===");
        let dataset = preparator
            .prepare_general()
            .context("failed to create the general dataset")?;
        prepared.push(dataset);
    }

    println!("{:<22} {:>7} {:>7} {:>7}  data.yaml", "dataset", "train", "val", "test");
    for dataset in &prepared {
        println!(
            "{:<22} {:>7} {:>7} {:>7}  {}{}",
            dataset.name,
            dataset.counts.train,
            dataset.counts.val,
            dataset.counts.test,
            dataset.data.file_path().display(),
            if dataset.reused { " (reused)" } else { "" },
        );
    }
    println!("Prepared {} dataset(s), {failed} failed", prepared.len());
    if prepared.is_empty() && failed > 0 {
        bail!("no dataset could be prepared");
    }
    Ok(())
}

fn train(names: &[String], datasets_dir: &Path, settings: &TrainSettings, results: &Path) -> Result<()> {
    let mut records = BTreeMap::new();
    for name in names {
        let data_yaml = datasets_dir.join(name).join("data.yaml");
        if !data_yaml.is_file() {
            warn!("Dataset config not found: {}", data_yaml.display());
            continue;
        }
        let plan = TrainPlan::new(name, &data_yaml, settings);
        info!(
            "Training {name} for {} epochs with {}",
            settings.epochs, plan.args.model
        );
        plan.write()
            .with_context(|| format!("failed to write training plan for {name}"))?;
        let status = if plan.collect_weights()? {
            TrainStatus::Collected
        } else {
            TrainStatus::Planned
        };
        records.insert(name.clone(), TrainRecord::new(status));
    }

    save_training_results(results, &records)
        .with_context(|| format!("failed to write {}", results.display()))?;
    for (name, record) in &records {
        println!("{name}: {:?}", record.status);
    }
    Ok(())
}

fn print_report(report: &ValidationReport) {
    println!("{}", "=".repeat(60));
    println!("MODEL VALIDATION SUMMARY");
    println!("{}", "=".repeat(60));
    for (name, outcome) in &report.models.0 {
        match outcome {
            ModelOutcome::Validated(m) => println!(
                "{name:<22} mAP50 {:.4}  mAP95 {:.4}  {:.2} MB  {:.2} FPS",
                m.map50, m.map95, m.model_size_mb, m.inference_speed_fps
            ),
            ModelOutcome::Failed(f) => println!("{name:<22} failed: {}", f.error),
            ModelOutcome::MissingModel { error, model_path } => {
                println!("{name:<22} {error}: {model_path}")
            }
            ModelOutcome::MissingDataset { error, dataset_path } => {
                println!("{name:<22} {error}: {dataset_path}")
            }
        }
    }
    match &report.summary {
        Some(s) => {
            println!(
                "Validated {}/{} models, average mAP50 {:.4}, average mAP95 {:.4}",
                s.successfully_validated, s.total_models, s.average_map50, s.average_map95
            );
            if let Some(best) = &s.best_map50_model {
                println!("Best mAP50: {best}");
            }
            if let Some(best) = &s.best_map95_model {
                println!("Best mAP95: {best}");
            }
        }
        None => println!("No model validated successfully"),
    }
}

fn inspect(dump: Option<&Path>, decimals: u32) -> Result<()> {
    let demos = [
        ("single scalar", MetricValue::from(0.95_f64)),
        ("single element array", MetricValue::from_array(&arr1(&[0.95]))),
        ("multi element array", MetricValue::from_array(&arr1(&[0.95, 0.89, 0.92]))),
        ("zero-dimensional array", MetricValue::from_array(&arr0(0.95))),
        ("integer", MetricValue::from(1i64)),
        ("missing", MetricValue::Absent),
    ];
    println!("{:<24} {:<12} {:>10}", "case", "kind", "value");
    for (label, value) in &demos {
        println!("{label:<24} {:<12} {:>10}", value.kind(), normalize(value, decimals));
    }

    let Some(path) = dump else {
        return Ok(());
    };
    let fields: BTreeMap<String, Value> =
        read_json(path).with_context(|| format!("failed to read dump {}", path.display()))?;
    println!();
    println!("{}", path.display());
    for (key, raw) in &fields {
        let value = MetricValue::from_json(raw);
        println!(
            "{key:<24} {:<12} {:>10}  {value}",
            value.kind(),
            normalize(&value, decimals)
        );
    }
    Ok(())
}
