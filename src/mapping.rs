use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};

/// Read a class list, one name per line. The line index is the class id.
/// Blank lines are skipped but still consume an id.
pub fn load_class_mapping(file_path: &Path) -> Result<BTreeMap<usize, String>> {
    let file = File::open(file_path).map_err(|e| Error::io(file_path, e))?;
    let reader = BufReader::new(file);

    let mut mapping = BTreeMap::new();
    for (id, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| Error::io(file_path, e))?;
        let name = line.trim();
        if !name.is_empty() {
            mapping.insert(id, name.to_string());
        }
    }
    Ok(mapping)
}

/// Fit `known` names to exactly `nc` entries, padding with `class_<i>`.
pub fn class_names(known: &[String], nc: usize) -> Vec<String> {
    (0..nc)
        .map(|i| known.get(i).cloned().unwrap_or_else(|| format!("class_{i}")))
        .collect()
}

/// Same as [`class_names`] for an id-keyed mapping with possible gaps.
pub fn class_names_from_mapping(mapping: &BTreeMap<usize, String>, nc: usize) -> Vec<String> {
    (0..nc)
        .map(|i| mapping.get(&i).cloned().unwrap_or_else(|| format!("class_{i}")))
        .collect()
}
