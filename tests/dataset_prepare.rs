use std::fs;
use std::path::Path;

use mad_tools::dataset::{DataYaml, DatasetPreparator};
use mad_tools::error::Error;
use mad_tools::helpers::{list_images, read_yaml};

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Flat towline dataset: ten images, every one labelled with class 2.
fn flat_towline(raw: &Path) {
    let root = raw.join("towline_data2023_yolo");
    for i in 0..10 {
        write(&root.join("images").join(format!("img{i}.jpg")), "jpeg");
        write(&root.join("labels").join(format!("img{i}.txt")), "2 0.5 0.5 0.1 0.1\n");
    }
    write(&root.join("images").join("notes.md"), "not an image");
}

/// Coal miner dataset that already carries splits and its own class list.
fn split_coal_miner(raw: &Path) {
    let root = raw.join("coal_miner_data2023_yolo");
    for (split, n) in [("train", 3), ("val", 2), ("test", 1)] {
        for i in 0..n {
            let stem = format!("{split}{i}");
            write(&root.join("images").join(split).join(format!("{stem}.PNG")), "png");
            write(&root.join("labels").join(split).join(format!("{stem}.txt")), "1 0.1 0.1 0.2 0.2\n");
        }
    }
    write(&root.join("labels").join("val").join("val1.txt"), "");
    write(&root.join("classes.txt"), "worker\nhelmet\n");
}

#[test]
fn flat_dataset_is_split_70_20_10() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    flat_towline(&raw);

    let preparator = DatasetPreparator::new(vec![raw], dir.path().join("out")).with_seed(7);
    let prepared = preparator.prepare_by_name("towline").unwrap();

    assert_eq!((prepared.counts.train, prepared.counts.val, prepared.counts.test), (7, 2, 1));
    assert!(!prepared.reused);

    let out = dir.path().join("out").join("towline");
    for (split, n) in [("train", 7), ("val", 2), ("test", 1)] {
        assert_eq!(list_images(&out.join("images").join(split)).unwrap().len(), n);
        assert_eq!(fs::read_dir(out.join("labels").join(split)).unwrap().count(), n);
    }

    let data: DataYaml = read_yaml(&out.join("data.yaml")).unwrap();
    assert_eq!(data.nc, 3);
    assert_eq!(data.names, vec!["towline", "damage", "obstruction"]);
    assert_eq!(Path::new(&data.path), fs::canonicalize(&out).unwrap());
    assert_eq!(data.train, "images/train");
}

#[test]
fn same_seed_gives_same_split() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    flat_towline(&raw);

    let split_of = |out: &str| {
        DatasetPreparator::new(vec![raw.clone()], dir.path().join(out))
            .with_seed(42)
            .prepare_by_name("towline_data2023_yolo")
            .unwrap();
        let names: Vec<_> = list_images(&dir.path().join(out).join("towline/images/val"))
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_owned())
            .collect();
        names
    };
    assert_eq!(split_of("a"), split_of("b"));
}

#[test]
fn existing_splits_are_copied_with_class_override() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    split_coal_miner(&raw);

    let preparator = DatasetPreparator::new(vec![raw], dir.path().join("out"));
    let prepared = preparator.prepare_by_name("coal_miner").unwrap();

    assert_eq!((prepared.counts.train, prepared.counts.val, prepared.counts.test), (3, 2, 1));
    assert_eq!(prepared.data.nc, 2);
    assert_eq!(prepared.data.names, vec!["worker", "helmet"]);

    let labels_val = dir.path().join("out/coal_miner/labels/val");
    assert!(labels_val.join("val0.txt").is_file());
    assert!(!labels_val.join("val1.txt").exists());
}

#[test]
fn general_dataset_offsets_class_ids() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    flat_towline(&raw);
    split_coal_miner(&raw);

    let out = dir.path().join("out");
    let preparator = DatasetPreparator::new(vec![raw], &out).with_seed(1);
    preparator.prepare_by_name("coal_miner").unwrap();
    preparator.prepare_by_name("towline").unwrap();
    let general = preparator.prepare_general().unwrap();

    assert_eq!(
        general.data.names,
        vec![
            "coal_miner_worker",
            "coal_miner_helmet",
            "towline_towline",
            "towline_damage",
            "towline_obstruction",
        ]
    );
    assert_eq!(general.data.nc, 5);
    assert_eq!(general.counts.train, 3 + 7);
    assert_eq!(general.counts.val, 2 + 2);
    assert_eq!(general.counts.test, 1 + 1);

    let labels = out.join("general/labels/train");
    let coal = fs::read_to_string(labels.join("coal_miner_train0.txt")).unwrap();
    assert_eq!(coal, "1 0.1 0.1 0.2 0.2\n");
    let towline: Vec<_> = fs::read_dir(&labels)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with("towline_"))
        .collect();
    assert_eq!(towline.len(), 7);
    for label in towline {
        assert_eq!(fs::read_to_string(label).unwrap(), "4 0.5 0.5 0.1 0.1\n");
    }
    assert!(out.join("general/data.yaml").is_file());
}

#[test]
fn prepared_dataset_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    flat_towline(&raw);
    let out = dir.path().join("out");
    DatasetPreparator::new(vec![raw.clone()], &out)
        .prepare_by_name("towline")
        .unwrap();

    let reused = DatasetPreparator::new(vec![raw], dir.path().join("other"))
        .with_reuse_root(&out)
        .prepare_by_name("towline")
        .unwrap();
    assert!(reused.reused);
    assert_eq!(reused.counts.train + reused.counts.val + reused.counts.test, 10);
    assert_eq!(reused.data.nc, 3);
}

#[test]
fn missing_or_malformed_datasets_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    fs::create_dir_all(raw.join("large_coal_data2023_yolo").join("images")).unwrap();

    let preparator = DatasetPreparator::new(vec![raw], dir.path().join("out"));
    match preparator.prepare_by_name("towline") {
        Err(Error::DatasetNotFound { name, checked }) => {
            assert_eq!(name, "towline_data2023_yolo");
            assert_eq!(checked.len(), 2);
        }
        other => panic!("expected DatasetNotFound, got {other:?}"),
    }
    assert!(matches!(
        preparator.prepare_by_name("large_coal"),
        Err(Error::DatasetLayout { .. })
    ));
    assert!(matches!(
        preparator.prepare_by_name("unknown"),
        Err(Error::UnknownDataset(_))
    ));
}

#[test]
fn general_dataset_includes_reused_datasets() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    flat_towline(&raw);
    let previous = dir.path().join("previous");
    DatasetPreparator::new(vec![raw.clone()], &previous)
        .with_seed(3)
        .prepare_by_name("towline")
        .unwrap();

    let out = dir.path().join("out");
    let preparator = DatasetPreparator::new(vec![raw], &out).with_reuse_root(&previous);
    assert!(preparator.prepare_by_name("towline").unwrap().reused);
    let general = preparator.prepare_general().unwrap();

    assert_eq!(general.data.nc, 3);
    assert_eq!(general.data.names[0], "towline_towline");
    assert_eq!(general.counts.train, 7);
    assert_eq!(
        list_images(&out.join("general/images/train")).unwrap().len(),
        7
    );
    assert!(!out.join("towline").exists());
}
