//! Cut definitions shared by the optimizer and the data layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::{HcError, SelectionError};

/// Which side of a variable a cut constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutType {
    /// Keep events whose value is strictly above the threshold.
    Min,
    /// Keep events whose value is strictly below the threshold.
    Max,
}

impl CutType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CutType::Min => "min",
            CutType::Max => "max",
        }
    }

    /// Suffix appended to the variable name to form a cut key.
    pub fn suffix(&self) -> &'static str {
        match self {
            CutType::Min => "_min",
            CutType::Max => "_max",
        }
    }

    /// Whether `value` survives a cut of this type at `threshold`.
    ///
    /// Both sides are strict; NaN never passes.
    pub fn passes(&self, value: f64, threshold: f64) -> bool {
        match self {
            CutType::Min => value > threshold,
            CutType::Max => value < threshold,
        }
    }
}

impl fmt::Display for CutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CutType {
    type Err = HcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min" => Ok(CutType::Min),
            "max" => Ok(CutType::Max),
            other => Err(HcError::Config(format!(
                "cuttype must be either min or max, got '{other}'"
            ))),
        }
    }
}

/// Build the composite key `<variable>_<cuttype>`.
pub fn cut_key(variable: &str, cut_type: CutType) -> String {
    format!("{variable}{}", cut_type.suffix())
}

/// Split a cut key back into its variable path and cut type.
pub fn split_cut_key(key: &str) -> Result<(&str, CutType), SelectionError> {
    if let Some(variable) = key.strip_suffix(CutType::Max.suffix()) {
        Ok((variable, CutType::Max))
    } else if let Some(variable) = key.strip_suffix(CutType::Min.suffix()) {
        Ok((variable, CutType::Min))
    } else {
        Err(SelectionError::InvalidCutKey {
            key: key.to_string(),
        })
    }
}

/// One validated row of a grid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutSpec {
    /// Path of the variable inside the event collection (e.g. "MET_pt").
    pub variable: String,
    pub cut_type: CutType,
    /// Name of the sampling distribution (e.g. "quniform").
    pub distribution: String,
    pub min_value: f64,
    pub max_value: f64,
    pub step: f64,
}

impl CutSpec {
    pub fn key(&self) -> String {
        cut_key(&self.variable, self.cut_type)
    }
}

/// One concrete assignment of thresholds to cut keys.
///
/// Keys iterate in lexicographic order so that evaluation order and any
/// serialized form are stable between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CutVector(BTreeMap<String, f64>);

impl CutVector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, threshold: f64) -> Option<f64> {
        self.0.insert(key.into(), threshold)
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl fmt::Display for CutVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for CutVector {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cut_key_round_trip() {
        let key = cut_key("Jet_btag_deep", CutType::Min);
        assert_eq!(key, "Jet_btag_deep_min");
        let (variable, cut_type) = split_cut_key(&key).unwrap();
        assert_eq!(variable, "Jet_btag_deep");
        assert_eq!(cut_type, CutType::Min);
    }

    #[test]
    fn split_rejects_unknown_suffix() {
        let err = split_cut_key("MET_pt_avg").unwrap_err();
        assert!(matches!(err, SelectionError::InvalidCutKey { .. }));
        assert!(split_cut_key("max").is_err());
    }

    #[test]
    fn cut_type_parsing() {
        assert_eq!("min".parse::<CutType>().unwrap(), CutType::Min);
        assert_eq!("max".parse::<CutType>().unwrap(), CutType::Max);
        assert!("MAX".parse::<CutType>().unwrap_err().is_config());
    }

    #[test]
    fn strict_comparisons() {
        assert!(CutType::Max.passes(49.0, 50.0));
        assert!(!CutType::Max.passes(50.0, 50.0));
        assert!(CutType::Min.passes(51.0, 50.0));
        assert!(!CutType::Min.passes(50.0, 50.0));
        assert!(!CutType::Min.passes(f64::NAN, 0.0));
        assert!(!CutType::Max.passes(f64::NAN, 0.0));
    }

    #[test]
    fn cut_vector_iterates_sorted() {
        let cuts: CutVector = [("MET_pt_max", 50.0), ("Jet_pt_min", 30.0)]
            .into_iter()
            .collect();
        let keys: Vec<&str> = cuts.keys().collect();
        assert_eq!(keys, vec!["Jet_pt_min", "MET_pt_max"]);
        assert_eq!(cuts.to_string(), "{Jet_pt_min: 30, MET_pt_max: 50}");
    }

    #[test]
    fn cut_vector_serializes_as_map() {
        let mut cuts = CutVector::new();
        cuts.insert("MET_pt_max", 50.0);
        let json = serde_json::to_value(&cuts).unwrap();
        assert_eq!(json, serde_json::json!({"MET_pt_max": 50.0}));
    }
}
