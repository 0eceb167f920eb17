//! YOLO dataset preparation: `<output>/<name>/{images,labels}/{train,val,test}`
//! plus a `data.yaml` per dataset, and a merged `general` dataset.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::helpers::{
    copy_file, create_dir_all, is_valid_image, list_images, list_with_extension, read_yaml,
    write_yaml,
};
use crate::mapping::{class_names, class_names_from_mapping, load_class_mapping};

pub const SPLITS: [&str; 3] = ["train", "val", "test"];
pub const GENERAL: &str = "general";
const DATA_YAML: &str = "data.yaml";
const CLASSES_TXT: &str = "classes.txt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// Directory name of the raw dataset under a search root.
    pub source_dir: String,
    pub name: String,
    pub classes: Vec<String>,
}

impl DatasetInfo {
    fn new(source_dir: &str, name: &str, classes: &[&str]) -> Self {
        Self {
            source_dir: source_dir.to_string(),
            name: name.to_string(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// The six specialised mining-safety datasets.
pub fn default_datasets() -> Vec<DatasetInfo> {
    vec![
        DatasetInfo::new("coal_miner_data2023_yolo", "coal_miner", &["person", "miner", "equipment"]),
        DatasetInfo::new(
            "hydraulic_support_guard_plate_data2023_yolo",
            "hydraulic_support",
            &["support", "plate", "damage"],
        ),
        DatasetInfo::new("large_coal_data2023_yolo", "large_coal", &["large_coal", "normal_coal", "debris"]),
        DatasetInfo::new(
            "mine_safety_helmet__data2023_yolo",
            "mine_safety_helmet",
            &["helmet", "no_helmet", "person"],
        ),
        DatasetInfo::new("miner_behavior_data2023_yolo", "miner_behavior", &["safe", "unsafe", "warning"]),
        DatasetInfo::new("towline_data2023_yolo", "towline", &["towline", "damage", "obstruction"]),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataYaml {
    pub path: String,
    pub train: String,
    pub val: String,
    pub test: String,
    pub nc: usize,
    pub names: Vec<String>,
}

impl DataYaml {
    pub fn new(root: &Path, names: Vec<String>) -> Self {
        Self {
            path: root.display().to_string(),
            train: "images/train".to_string(),
            val: "images/val".to_string(),
            test: "images/test".to_string(),
            nc: names.len(),
            names,
        }
    }

    pub fn file_path(&self) -> PathBuf {
        Path::new(&self.path).join(DATA_YAML)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self { train: 0.7, val: 0.2 }
    }
}

impl SplitRatios {
    /// Number of train and val items for `n` items; the remainder goes to test.
    pub fn counts(&self, n: usize) -> (usize, usize) {
        let n_train = ((self.train * n as f64).floor() as usize).min(n);
        let n_val = ((self.val * n as f64).floor() as usize).min(n - n_train);
        (n_train, n_val)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SplitCounts {
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

impl SplitCounts {
    fn set(&mut self, split: &str, count: usize) {
        match split {
            "train" => self.train = count,
            "val" => self.val = count,
            _ => self.test = count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub name: String,
    pub data: DataYaml,
    pub counts: SplitCounts,
    pub reused: bool,
}

struct CopyJob {
    from: PathBuf,
    to: PathBuf,
}

fn run_copies(jobs: &[CopyJob]) -> Result<()> {
    jobs.par_iter()
        .try_for_each(|job| copy_file(&job.from, &job.to))
}

fn create_layout(root: &Path) -> Result<()> {
    for split in SPLITS {
        create_dir_all(&root.join("images").join(split))?;
        create_dir_all(&root.join("labels").join(split))?;
    }
    Ok(())
}

fn label_for(labels_dir: &Path, image: &Path) -> Option<PathBuf> {
    let stem = image.file_stem()?.to_str()?;
    Some(labels_dir.join(format!("{stem}.txt")))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parse the class id at the start of a YOLO label line.
fn class_id(line: &str) -> Option<std::result::Result<usize, String>> {
    let first = line.split_whitespace().next()?;
    Some(first.parse::<usize>().map_err(|_| first.to_string()))
}

/// Rewrite YOLO label lines with every class id shifted by `offset`.
/// Blank lines are dropped, lines without a numeric class id are skipped.
pub fn offset_labels(text: &str, offset: usize) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        match class_id(line) {
            None => continue,
            Some(Ok(id)) => {
                let mut parts = line.split_whitespace();
                parts.next();
                out.push_str(&(id + offset).to_string());
                for part in parts {
                    out.push(' ');
                    out.push_str(part);
                }
                out.push('\n');
            }
            Some(Err(token)) => warn!("skipping label line with class id {token:?}"),
        }
    }
    out
}

/// Highest class id used in the label files of `labels_dir`.
pub fn max_class_id(labels_dir: &Path) -> Result<Option<usize>> {
    let mut max: Option<usize> = None;
    for label in list_with_extension(labels_dir, "txt")? {
        let text = fs::read_to_string(&label).map_err(|e| Error::io(&label, e))?;
        for line in text.lines() {
            match class_id(line) {
                Some(Ok(id)) => max = Some(max.map_or(id, |m| m.max(id))),
                Some(Err(token)) => {
                    warn!("{}: ignoring class id {token:?}", label.display())
                }
                None => {}
            }
        }
    }
    Ok(max)
}

#[derive(Debug, Clone)]
pub struct DatasetPreparator {
    datasets: Vec<DatasetInfo>,
    search_roots: Vec<PathBuf>,
    output_root: PathBuf,
    reuse_root: Option<PathBuf>,
    seed: Option<u64>,
}

impl DatasetPreparator {
    pub fn new(search_roots: Vec<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            datasets: default_datasets(),
            search_roots,
            output_root: output_root.into(),
            reuse_root: None,
            seed: None,
        }
    }

    /// Directory holding datasets prepared earlier; they are reused untouched.
    pub fn with_reuse_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.reuse_root = Some(root.into());
        self
    }

    /// Fix the shuffle so splits are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn datasets(&self) -> &[DatasetInfo] {
        &self.datasets
    }

    /// Look a dataset up by short name or by source directory name.
    pub fn find(&self, name: &str) -> Result<&DatasetInfo> {
        self.datasets
            .iter()
            .find(|d| d.name == name || d.source_dir == name)
            .ok_or_else(|| Error::UnknownDataset(name.to_string()))
    }

    pub fn prepare_by_name(&self, name: &str) -> Result<PreparedDataset> {
        let dataset = self.find(name)?.clone();
        self.prepare(&dataset)
    }

    pub fn prepare(&self, dataset: &DatasetInfo) -> Result<PreparedDataset> {
        if let Some(reused) = self.try_reuse(dataset)? {
            return Ok(reused);
        }

        let source = self.locate(dataset)?;
        info!("Found dataset {} at {}", dataset.name, source.display());

        let target = self.output_root.join(&dataset.name);
        create_layout(&target)?;

        let images = source.join("images");
        let labels = source.join("labels");
        let counts = if images.join("train").is_dir() {
            info!("Dataset {} already has splits, copying them", dataset.name);
            copy_existing_splits(&images, &labels, &target)?
        } else if images.is_dir() && labels.is_dir() {
            self.split_and_copy(&images, &labels, &target)?
        } else {
            error!("Images or labels directory not found for {}", dataset.name);
            return Err(Error::DatasetLayout {
                name: dataset.name.clone(),
                path: source,
            });
        };

        let overrides = source.join(CLASSES_TXT);
        let mapping = if overrides.is_file() {
            Some(load_class_mapping(&overrides)?)
        } else {
            None
        };
        let data = create_data_yaml(&target, &dataset.classes, mapping.as_ref())?;

        info!("Dataset {} prepared successfully", dataset.name);
        info!("  Train: {} images", counts.train);
        info!("  Val: {} images", counts.val);
        info!("  Test: {} images", counts.test);

        Ok(PreparedDataset {
            name: dataset.name.clone(),
            data,
            counts,
            reused: false,
        })
    }

    /// Directory of an already prepared dataset: the reuse root first, then the output root.
    fn prepared_dir(&self, name: &str) -> Option<PathBuf> {
        self.reuse_root
            .iter()
            .chain(std::iter::once(&self.output_root))
            .map(|root| root.join(name))
            .find(|dir| dir.join(DATA_YAML).is_file())
    }

    fn try_reuse(&self, dataset: &DatasetInfo) -> Result<Option<PreparedDataset>> {
        let Some(root) = &self.reuse_root else {
            return Ok(None);
        };
        let dir = root.join(&dataset.name);
        let yaml = dir.join(DATA_YAML);
        if !yaml.is_file() {
            return Ok(None);
        }
        info!("Using existing dataset: {}", dir.display());
        let data: DataYaml = read_yaml(&yaml)?;
        let mut counts = SplitCounts::default();
        for split in SPLITS {
            counts.set(split, list_images(&dir.join("images").join(split))?.len());
        }
        Ok(Some(PreparedDataset {
            name: dataset.name.clone(),
            data,
            counts,
            reused: true,
        }))
    }

    fn locate(&self, dataset: &DatasetInfo) -> Result<PathBuf> {
        let mut checked = Vec::new();
        if let Some(root) = &self.reuse_root {
            checked.push(root.join(&dataset.name));
        }
        for root in &self.search_roots {
            for dir in [&dataset.source_dir, &dataset.name] {
                let candidate = root.join(dir);
                if candidate.is_dir() {
                    return Ok(candidate);
                }
                checked.push(candidate);
            }
        }
        error!("Dataset {} not found in any location", dataset.source_dir);
        for path in &checked {
            error!("  Checked: {}", path.display());
        }
        Err(Error::DatasetNotFound {
            name: dataset.source_dir.clone(),
            checked,
        })
    }

    fn split_and_copy(&self, images: &Path, labels: &Path, target: &Path) -> Result<SplitCounts> {
        let (mut all, empty): (Vec<PathBuf>, Vec<PathBuf>) =
            list_images(images)?.into_iter().partition(|p| is_valid_image(p));
        for path in &empty {
            warn!("Skipping empty image {}", path.display());
        }
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        all.shuffle(&mut rng);

        let (n_train, n_val) = SplitRatios::default().counts(all.len());
        let (train, rest) = all.split_at(n_train);
        let (val, test) = rest.split_at(n_val);

        let mut jobs = Vec::with_capacity(all.len() * 2);
        for (split, files) in [("train", train), ("val", val), ("test", test)] {
            for image in files {
                jobs.push(CopyJob {
                    from: image.clone(),
                    to: target.join("images").join(split).join(file_name(image)),
                });
                if let Some(label) = label_for(labels, image).filter(|l| l.is_file()) {
                    let to = target.join("labels").join(split).join(file_name(&label));
                    jobs.push(CopyJob { from: label, to });
                }
            }
        }
        run_copies(&jobs)?;

        Ok(SplitCounts {
            train: train.len(),
            val: val.len(),
            test: test.len(),
        })
    }

    /// Merge every prepared dataset into `<output>/general`.
    pub fn prepare_general(&self) -> Result<PreparedDataset> {
        let general = self.output_root.join(GENERAL);
        create_layout(&general)?;

        let mut offset = 0usize;
        let mut names = Vec::new();
        let mut counts = SplitCounts::default();
        let mut per_split: BTreeMap<&str, usize> = BTreeMap::new();

        for dataset in &self.datasets {
            let Some(root) = self.prepared_dir(&dataset.name) else {
                warn!("Skipping {} - not prepared", dataset.name);
                continue;
            };
            let data: DataYaml = read_yaml(&root.join(DATA_YAML))?;
            names.extend(data.names.iter().map(|n| format!("{}_{n}", dataset.name)));

            for split in SPLITS {
                let images = list_images(&root.join("images").join(split))?;
                let labels_dir = root.join("labels").join(split);
                let dest = general.join("images").join(split);
                let dest_labels = general.join("labels").join(split);

                let jobs: Vec<CopyJob> = images
                    .iter()
                    .map(|image| CopyJob {
                        from: image.clone(),
                        to: dest.join(format!("{}_{}", dataset.name, file_name(image))),
                    })
                    .collect();
                run_copies(&jobs)?;
                *per_split.entry(split).or_default() += images.len();

                images.par_iter().try_for_each(|image| {
                    let Some(label) = label_for(&labels_dir, image).filter(|l| l.is_file()) else {
                        return Ok(());
                    };
                    let text = fs::read_to_string(&label).map_err(|e| Error::io(&label, e))?;
                    let to = dest_labels.join(format!("{}_{}", dataset.name, file_name(&label)));
                    fs::write(&to, offset_labels(&text, offset)).map_err(|e| Error::io(&to, e))
                })?;
            }
            debug!("{}: {} classes from offset {offset}", dataset.name, data.nc);
            offset += data.nc;
        }

        for (split, count) in per_split {
            counts.set(split, count);
        }

        let data = DataYaml::new(&absolute(&general)?, names);
        write_yaml(&general.join(DATA_YAML), &data)?;
        info!("General dataset prepared with {} classes", data.nc);

        Ok(PreparedDataset {
            name: GENERAL.to_string(),
            data,
            counts,
            reused: false,
        })
    }
}

fn copy_existing_splits(images: &Path, labels: &Path, target: &Path) -> Result<SplitCounts> {
    let mut counts = SplitCounts::default();
    let mut jobs = Vec::new();
    for split in SPLITS {
        let src_images = images.join(split);
        let src_labels = labels.join(split);
        let files = list_images(&src_images)?;
        for image in &files {
            jobs.push(CopyJob {
                from: image.clone(),
                to: target.join("images").join(split).join(file_name(image)),
            });
            // Empty label files are dropped; YOLO treats a missing label as background.
            let label = label_for(&src_labels, image)
                .filter(|l| fs::metadata(l).map(|m| m.is_file() && m.len() > 0).unwrap_or(false));
            if let Some(label) = label {
                let to = target.join("labels").join(split).join(file_name(&label));
                jobs.push(CopyJob { from: label, to });
            }
        }
        counts.set(split, files.len());
    }
    run_copies(&jobs)?;
    Ok(counts)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|e| Error::io(path, e))
}

/// Write `<root>/data.yaml`, deriving the class count from the train labels.
///
/// Names come from `mapping` when given, otherwise from `known`, padded with
/// `class_<i>` to the class count.
pub fn create_data_yaml(
    root: &Path,
    known: &[String],
    mapping: Option<&BTreeMap<usize, String>>,
) -> Result<DataYaml> {
    let nc = max_class_id(&root.join("labels").join("train"))?.map_or(1, |m| m + 1);
    let names = match mapping {
        Some(mapping) => class_names_from_mapping(mapping, nc),
        None => class_names(known, nc),
    };
    let data = DataYaml::new(&absolute(root)?, names);
    write_yaml(&root.join(DATA_YAML), &data)?;
    Ok(data)
}
