use std::fs;
use std::path::{Path, PathBuf};

use mad_tools::config::{ModelCatalog, ModelEntry};
use mad_tools::error::{Error, Result};
use mad_tools::evaluation::{Evaluator, JsonDumpEvaluator, RawEvaluation};
use mad_tools::metric::MetricValue;
use mad_tools::report::{ModelOutcome, ValidationHarness};
use serde_json::Value;

fn entry(dir: &Path, name: &str, with_model: bool, with_dataset: bool) -> ModelEntry {
    let model_path = dir.join("models").join(format!("{name}_model.pt"));
    let dataset_path = dir.join("datasets").join(name).join("data.yaml");
    if with_model {
        fs::create_dir_all(model_path.parent().unwrap()).unwrap();
        fs::write(&model_path, vec![0u8; 1024 * 1024]).unwrap();
    }
    if with_dataset {
        fs::create_dir_all(dataset_path.parent().unwrap()).unwrap();
        fs::write(&dataset_path, "nc: 2\n").unwrap();
    }
    ModelEntry {
        name: name.to_string(),
        model_path,
        dataset_path,
        confidence: 0.5,
        iou: 0.45,
        classes: vec!["support".into(), "damage".into()],
        available: true,
        metrics_path: None,
    }
}

fn dump(dir: &Path, name: &str, body: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(format!("{name}.json")), body).unwrap();
}

#[test]
fn batch_report_with_mixed_outcomes() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let dumps = root.join("dumps");

    dump(
        &dumps,
        "single",
        r#"{"map50": 0.9, "map": 0.61234, "mp": 0.8, "mr": 0.7, "f1": 0.75,
            "num_images": 20, "elapsed_seconds": 4.0, "device": "cpu"}"#,
    );
    dump(
        &dumps,
        "multi",
        r#"{"map50": [0.95, 0.89, 0.92], "map": [0.5, 0.7], "mp": [], "mr": null,
            "map50_per_class": [0.95, 0.89, 0.92], "names": ["a", "b"],
            "inference_time_ms": 12.5}"#,
    );
    dump(&dumps, "broken", "{ not json");

    let mut hidden = entry(root, "hidden", true, true);
    hidden.available = false;
    let catalog = ModelCatalog {
        models: vec![
            entry(root, "single", true, true),
            entry(root, "multi", true, true),
            entry(root, "broken", true, true),
            entry(root, "no_weights", false, true),
            entry(root, "no_data", true, false),
            hidden,
        ],
    };

    let evaluator = JsonDumpEvaluator::new(&dumps);
    let report = ValidationHarness::new(&evaluator).run(&catalog);

    assert_eq!(report.models.len(), 5);
    assert!(report.models.get("hidden").is_none());

    let single = report.models.get("single").and_then(ModelOutcome::metrics).unwrap();
    assert_eq!(single.map50, 0.9);
    assert_eq!(single.map95, 0.6123);
    assert_eq!(single.validation_time_seconds, 4.0);
    assert_eq!(single.inference_speed_fps, 5.0);
    assert_eq!(single.model_size_mb, 1.0);
    assert_eq!(single.device, "cpu");
    assert_eq!(single.classes, vec!["support", "damage"]);

    let multi = report.models.get("multi").and_then(ModelOutcome::metrics).unwrap();
    assert_eq!(multi.map50, 0.92);
    assert_eq!(multi.map95, 0.6);
    assert_eq!(multi.precision, 0.0);
    assert_eq!(multi.recall, 0.0);
    assert_eq!(multi.num_images, 3);
    assert_eq!(multi.device, "unknown");
    assert_eq!(multi.avg_inference_time_ms, Some(12.5));
    assert_eq!(multi.inference_fps, Some(80.0));
    let per_class = multi.per_class_map50.as_ref().unwrap();
    assert_eq!(per_class.len(), 2);
    assert_eq!(per_class["a"], 0.95);
    assert_eq!(per_class["b"], 0.89);

    assert!(matches!(report.models.get("broken"), Some(ModelOutcome::Failed(f)) if f.map50 == 0.0));
    assert!(matches!(
        report.models.get("no_weights"),
        Some(ModelOutcome::MissingModel { .. })
    ));
    assert!(matches!(
        report.models.get("no_data"),
        Some(ModelOutcome::MissingDataset { .. })
    ));

    let summary = report.summary.as_ref().unwrap();
    assert_eq!(summary.total_models, 5);
    assert_eq!(summary.successfully_validated, 2);
    assert_eq!(summary.failed_validations, 3);
    assert_eq!(summary.average_map50, 0.91);
    assert_eq!(summary.best_map50_model.as_deref(), Some("multi"));
    assert_eq!(summary.best_map95_model.as_deref(), Some("single"));
    assert_eq!(summary.total_models_size_mb, 2.0);

    let out = root.join("report.json");
    report.save(&out).unwrap();
    let json: Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    let keys: Vec<&String> = json["models"].as_object().unwrap().keys().collect();
    assert_eq!(keys.len(), 5);
    assert_eq!(json["models"]["no_weights"]["error"], "Model file not found");
    assert_eq!(json["models"]["single"]["map95"], 0.6123);
    assert!(json["models"]["single"].get("per_class_map50").is_none());
    assert!(json["validation_timestamp"].is_string());
    assert_eq!(json["summary"]["best_map50_model"], "multi");
}

#[test]
fn report_without_validated_models_has_no_summary() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = ModelCatalog {
        models: vec![entry(tmp.path(), "towline", false, false)],
    };
    let evaluator = JsonDumpEvaluator::new(tmp.path());
    let report = ValidationHarness::new(&evaluator).run(&catalog);
    assert!(report.summary.is_none());

    let out = tmp.path().join("report.json");
    report.save(&out).unwrap();
    let json: Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert!(json.get("summary").is_none());
}

/// Evaluator that hands out a fixed raw result, standing in for a live detector.
struct Fixed(RawEvaluation);

impl Evaluator for Fixed {
    fn evaluate(&self, _model: &ModelEntry) -> Result<RawEvaluation> {
        Ok(self.0.clone())
    }
}

struct Failing;

impl Evaluator for Failing {
    fn evaluate(&self, model: &ModelEntry) -> Result<RawEvaluation> {
        Err(Error::UnknownModel(model.name.clone()))
    }
}

#[test]
fn custom_evaluators_and_decimals() {
    let tmp = tempfile::tempdir().unwrap();
    let model = entry(tmp.path(), "towline", true, true);

    let raw = RawEvaluation {
        map50: MetricValue::from(vec![0.123456_f64, 0.123456]),
        map: MetricValue::Scalar(f64::NAN),
        ..Default::default()
    };
    let fixed = Fixed(raw);
    let outcome = ValidationHarness::new(&fixed).with_decimals(2).validate_model(&model);
    let metrics = outcome.metrics().unwrap();
    assert_eq!(metrics.map50, 0.12);
    assert_eq!(metrics.map95, 0.0);

    let outcome = ValidationHarness::new(&Failing).validate_model(&model);
    match outcome {
        ModelOutcome::Failed(f) => {
            assert_eq!(f.error, "unknown model towline");
            assert_eq!(f.model_size_mb, 1.0);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn builtin_catalog_against_empty_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = ModelCatalog::default().rooted_at(
        &tmp.path().join("models"),
        &tmp.path().join("datasets"),
    );
    let evaluator = JsonDumpEvaluator::new(PathBuf::from("unused"));
    let report = ValidationHarness::new(&evaluator).run(&catalog);
    assert_eq!(report.models.len(), 7);
    assert!(report
        .models
        .0
        .iter()
        .all(|(_, o)| matches!(o, ModelOutcome::MissingModel { .. })));
}
