//! Grid configuration: the declarative list of cuts to optimize.
//!
//! A grid file is a JSON array of records:
//!
//! ```json
//! [{"variable": "MET_pt", "cuttype": "max", "hptype": "quniform",
//!   "minvalue": 0, "maxvalue": 200, "stepsize": 5}]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use crate::distribution::DistributionRegistry;
use hc_types::{config_error, CutSpec, CutType, HcResult};

/// One raw record of a grid file, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridEntry {
    pub variable: Option<String>,
    pub cuttype: Option<String>,
    pub hptype: Option<String>,
    pub minvalue: Option<f64>,
    pub maxvalue: Option<f64>,
    pub stepsize: Option<f64>,
}

impl GridEntry {
    /// Validate the record against `registry` and turn it into a [`CutSpec`].
    pub fn to_spec(&self, index: usize, registry: &DistributionRegistry) -> HcResult<CutSpec> {
        let variable = required(&self.variable, "variable", index)?.clone();
        if variable.is_empty() {
            return Err(config_error!("grid entry {index}: variable must not be empty"));
        }
        let cut_type: CutType = required(&self.cuttype, "cuttype", index)?
            .parse()
            .map_err(|e| config_error!("grid entry {index}: {e}"))?;
        let distribution = required(&self.hptype, "hptype", index)?.clone();
        if !registry.contains(&distribution) {
            return Err(config_error!(
                "grid entry {index}: unknown distribution '{distribution}'"
            ));
        }

        let spec = CutSpec {
            variable,
            cut_type,
            distribution,
            min_value: *required(&self.minvalue, "minvalue", index)?,
            max_value: *required(&self.maxvalue, "maxvalue", index)?,
            step: *required(&self.stepsize, "stepsize", index)?,
        };
        // instantiate once so that invalid parameters are rejected here
        registry.create(&spec)?;
        Ok(spec)
    }
}

fn required<'a, T>(field: &'a Option<T>, name: &str, index: usize) -> HcResult<&'a T> {
    field
        .as_ref()
        .ok_or_else(|| config_error!("grid entry {index}: missing field '{name}'"))
}

/// Validated grid configuration, in file order, unique by cut key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    specs: Vec<CutSpec>,
}

impl GridConfig {
    /// Build from already constructed specs, rejecting duplicate keys.
    pub fn from_specs(specs: Vec<CutSpec>) -> HcResult<Self> {
        let mut seen = HashSet::new();
        for spec in &specs {
            let key = spec.key();
            if !seen.insert(key.clone()) {
                return Err(config_error!("duplicate cut key '{key}' in grid configuration"));
            }
        }
        Ok(Self { specs })
    }

    pub fn from_entries(entries: &[GridEntry], registry: &DistributionRegistry) -> HcResult<Self> {
        let specs = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| entry.to_spec(i, registry))
            .collect::<HcResult<Vec<_>>>()?;
        Self::from_specs(specs)
    }

    pub fn from_value(value: &Value, registry: &DistributionRegistry) -> HcResult<Self> {
        let records = value
            .as_array()
            .ok_or_else(|| config_error!("grid configuration must be a JSON array of records"))?;
        let entries = records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                if !record.is_object() {
                    return Err(config_error!("grid entry {i}: expected a JSON object"));
                }
                serde_json::from_value::<GridEntry>(record.clone())
                    .map_err(|e| config_error!("grid entry {i}: {e}"))
            })
            .collect::<HcResult<Vec<_>>>()?;
        Self::from_entries(&entries, registry)
    }

    pub fn from_json_str(source: &str, registry: &DistributionRegistry) -> HcResult<Self> {
        let value: Value = serde_json::from_str(source)
            .map_err(|e| config_error!("grid configuration is not valid JSON: {e}"))?;
        Self::from_value(&value, registry)
    }

    pub fn from_file(path: impl AsRef<Path>, registry: &DistributionRegistry) -> HcResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            config_error!("cannot read grid configuration {}: {e}", path.display())
        })?;
        tracing::debug!(path = %path.display(), "parsing grid configuration");
        Self::from_json_str(&source, registry)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> &[CutSpec] {
        &self.specs
    }

    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.specs.iter().map(CutSpec::key)
    }

    pub fn get(&self, key: &str) -> Option<&CutSpec> {
        self.specs.iter().find(|spec| spec.key() == key)
    }

    /// One line per cut: `<key>: <kind>(<key>, <min>, <max>, <step>)`.
    pub fn describe(&self) -> String {
        self.specs
            .iter()
            .map(|spec| {
                let key = spec.key();
                format!(
                    "{key}: {}({key}, {}, {}, {})",
                    spec.distribution, spec.min_value, spec.max_value, spec.step
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const GRID: &str = r#"[
        {"variable": "MET_pt", "cuttype": "max", "hptype": "quniform",
         "minvalue": 0, "maxvalue": 200, "stepsize": 5},
        {"variable": "Jet_pt", "cuttype": "min", "hptype": "quniform",
         "minvalue": 20, "maxvalue": 100, "stepsize": 0.5}
    ]"#;

    fn registry() -> DistributionRegistry {
        DistributionRegistry::with_builtins()
    }

    #[test]
    fn parses_in_file_order() {
        let grid = GridConfig::from_json_str(GRID, &registry()).unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.keys().collect::<Vec<_>>(), vec!["MET_pt_max", "Jet_pt_min"]);

        let met = grid.get("MET_pt_max").unwrap();
        assert_eq!(met.cut_type, CutType::Max);
        assert_eq!(met.max_value, 200.0);
        assert_eq!(met.step, 5.0);
    }

    #[test]
    fn describe_format() {
        let grid = GridConfig::from_json_str(GRID, &registry()).unwrap();
        assert_eq!(
            grid.describe(),
            "MET_pt_max: quniform(MET_pt_max, 0, 200, 5)\n\
             Jet_pt_min: quniform(Jet_pt_min, 20, 100, 0.5)"
        );
    }

    #[test]
    fn duplicate_keys_rejected() {
        let source = r#"[
            {"variable": "MET_pt", "cuttype": "max", "hptype": "quniform",
             "minvalue": 0, "maxvalue": 200, "stepsize": 5},
            {"variable": "MET_pt", "cuttype": "max", "hptype": "quniform",
             "minvalue": 0, "maxvalue": 100, "stepsize": 1}
        ]"#;
        let err = GridConfig::from_json_str(source, &registry()).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("duplicate cut key 'MET_pt_max'"));
    }

    #[test]
    fn same_variable_both_sides_is_allowed() {
        let source = r#"[
            {"variable": "MET_pt", "cuttype": "min", "hptype": "quniform",
             "minvalue": 0, "maxvalue": 50, "stepsize": 5},
            {"variable": "MET_pt", "cuttype": "max", "hptype": "quniform",
             "minvalue": 50, "maxvalue": 200, "stepsize": 5}
        ]"#;
        let grid = GridConfig::from_json_str(source, &registry()).unwrap();
        assert_eq!(grid.len(), 2);
    }

    #[test]
    fn invalid_records_rejected() {
        let cases = [
            // missing stepsize
            r#"[{"variable": "x", "cuttype": "max", "hptype": "quniform",
                 "minvalue": 0, "maxvalue": 1}]"#,
            // bad cuttype
            r#"[{"variable": "x", "cuttype": "between", "hptype": "quniform",
                 "minvalue": 0, "maxvalue": 1, "stepsize": 1}]"#,
            // unknown kind
            r#"[{"variable": "x", "cuttype": "max", "hptype": "choice",
                 "minvalue": 0, "maxvalue": 1, "stepsize": 1}]"#,
            // inverted bounds
            r#"[{"variable": "x", "cuttype": "max", "hptype": "quniform",
                 "minvalue": 5, "maxvalue": 1, "stepsize": 1}]"#,
            // zero step
            r#"[{"variable": "x", "cuttype": "max", "hptype": "quniform",
                 "minvalue": 0, "maxvalue": 1, "stepsize": 0}]"#,
            // not an array
            r#"{"variable": "x"}"#,
            // not a record
            r#"[42]"#,
            "not json",
        ];
        for source in cases {
            let err = GridConfig::from_json_str(source, &registry()).unwrap_err();
            assert!(err.is_config(), "expected config error for {source}: {err}");
        }
    }

    #[test]
    fn missing_field_is_named() {
        let source = r#"[{"variable": "x", "cuttype": "max", "minvalue": 0,
                          "maxvalue": 1, "stepsize": 1}]"#;
        let err = GridConfig::from_json_str(source, &registry()).unwrap_err();
        assert!(err.to_string().contains("missing field 'hptype'"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(GRID.as_bytes()).unwrap();
        let grid = GridConfig::from_file(file.path(), &registry()).unwrap();
        assert_eq!(grid.len(), 2);

        let err = GridConfig::from_file("/nonexistent/grid.json", &registry()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn empty_grid_is_valid() {
        let grid = GridConfig::from_json_str("[]", &registry()).unwrap();
        assert!(grid.is_empty());
        assert_eq!(grid.describe(), "");
    }
}
