//! Metric value normalization.
//!
//! Evaluators report a bare number for single-class models, one entry per
//! class for multi-class models, or nothing. [`normalize`] collapses any of
//! them into one finite, rounded `f64`.

use ndarray::{ArrayBase, Data, Dimension};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

/// Precision used for reported metrics.
pub const DEFAULT_DECIMALS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum MetricValue {
    #[default]
    Absent,
    Scalar(f64),
    /// Typically one value per class.
    ArrayLike(Vec<f64>),
    /// Input that could not be read as a number, with a short description.
    Unsupported(String),
}

impl MetricValue {
    /// Classify a JSON value.
    ///
    /// Numeric strings and booleans become scalars, nested numeric arrays are
    /// flattened, everything else is `Unsupported`.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => MetricValue::Absent,
            Value::Bool(b) => MetricValue::Scalar(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => match n.as_f64() {
                Some(v) => MetricValue::Scalar(v),
                None => MetricValue::Unsupported(format!("number {n}")),
            },
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(v) => MetricValue::Scalar(v),
                Err(_) => MetricValue::Unsupported(format!("string {s:?}")),
            },
            Value::Array(items) => {
                let mut flat = Vec::with_capacity(items.len());
                match flatten_numbers(items, &mut flat) {
                    Ok(()) => MetricValue::ArrayLike(flat),
                    Err(kind) => MetricValue::Unsupported(format!("array containing {kind}")),
                }
            }
            Value::Object(_) => MetricValue::Unsupported("object".to_string()),
        }
    }

    /// Classify an `ndarray` array. Zero-dimensional arrays are scalars.
    pub fn from_array<S, A, D>(array: &ArrayBase<S, D>) -> Self
    where
        S: Data<Elem = A>,
        A: Copy + Into<f64>,
        D: Dimension,
    {
        if array.ndim() == 0 {
            return match array.iter().next() {
                Some(v) => MetricValue::Scalar((*v).into()),
                None => MetricValue::Absent,
            };
        }
        MetricValue::ArrayLike(array.iter().map(|v| (*v).into()).collect())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MetricValue::Absent => "absent",
            MetricValue::Scalar(_) => "scalar",
            MetricValue::ArrayLike(_) => "array",
            MetricValue::Unsupported(_) => "unsupported",
        }
    }
}

fn flatten_numbers(items: &[Value], out: &mut Vec<f64>) -> Result<(), &'static str> {
    for item in items {
        match item {
            Value::Number(n) => out.push(n.as_f64().ok_or("non-f64 number")?),
            Value::Array(inner) => flatten_numbers(inner, out)?,
            Value::Null => return Err("null"),
            Value::Bool(_) => return Err("bool"),
            Value::String(_) => return Err("string"),
            Value::Object(_) => return Err("object"),
        }
    }
    Ok(())
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Absent => write!(f, "absent"),
            MetricValue::Scalar(v) => write!(f, "{v}"),
            MetricValue::ArrayLike(values) => write!(f, "{values:?}"),
            MetricValue::Unsupported(what) => write!(f, "unsupported ({what})"),
        }
    }
}

impl<'de> Deserialize<'de> for MetricValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(MetricValue::from_json(&value))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Scalar(v)
    }
}

impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        MetricValue::Scalar(v.into())
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Scalar(v.into())
    }
}

impl From<u32> for MetricValue {
    fn from(v: u32) -> Self {
        MetricValue::Scalar(v.into())
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Scalar(v as f64)
    }
}

impl From<Vec<f64>> for MetricValue {
    fn from(values: Vec<f64>) -> Self {
        MetricValue::ArrayLike(values)
    }
}

impl From<Vec<f32>> for MetricValue {
    fn from(values: Vec<f32>) -> Self {
        MetricValue::ArrayLike(values.into_iter().map(f64::from).collect())
    }
}

impl From<&[f64]> for MetricValue {
    fn from(values: &[f64]) -> Self {
        MetricValue::ArrayLike(values.to_vec())
    }
}

impl<T: Into<MetricValue>> From<Option<T>> for MetricValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(MetricValue::Absent, Into::into)
    }
}

/// Collapse a metric into one finite number rounded to `decimals` digits.
///
/// Absent, empty and unsupported values become `0.0`; a one-element array
/// yields its element; longer arrays yield their mean. Never fails and never
/// returns NaN or infinity.
pub fn normalize(value: &MetricValue, decimals: u32) -> f64 {
    let raw = match value {
        MetricValue::Absent => return 0.0,
        MetricValue::ArrayLike(values) => match values.as_slice() {
            [] => return 0.0,
            [only] => *only,
            // Divide before summing so finite inputs cannot overflow.
            many => {
                let n = many.len() as f64;
                many.iter().map(|v| v / n).sum::<f64>()
            }
        },
        MetricValue::Scalar(v) => *v,
        MetricValue::Unsupported(_) => return 0.0,
    };
    round_to(raw, decimals)
}

/// Round half away from zero to `decimals` digits. Non-finite input gives `0.0`.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = 10f64.powi(decimals.min(i32::MAX as u32) as i32);
    let scaled = value * scale;
    // Past 2^52 every f64 is already an integer at this scale.
    if !scale.is_finite() || !scaled.is_finite() || scaled.abs() >= 4_503_599_627_370_496.0 {
        return value + 0.0;
    }
    // `+ 0.0` turns a negative zero into a positive one.
    scaled.round() / scale + 0.0
}
