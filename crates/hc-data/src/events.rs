//! Columnar event storage and nested field access.
//!
//! An [`EventTable`] holds a fixed number of events. Every field is either a
//! record of named sub-fields or a [`PerEventArray`] with one entry per event.
//! Missing values are stored as NaN, which never passes a strict cut.

use std::collections::BTreeMap;

use hc_types::{DataError, HcError, HcResult, SelectionError};

/// Read-only access to a columnar set of events.
pub trait EventCollection: Send + Sync {
    /// Number of events.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a dotted or underscore-joined path (e.g. `"MET_pt"`,
    /// `"Jet.pt"`) to its per-event values.
    fn field(&self, path: &str) -> HcResult<&PerEventArray>;
}

/// Values of one field across all events.
#[derive(Debug, Clone, PartialEq)]
pub enum PerEventArray {
    /// One scalar per event.
    Scalar(Vec<f64>),
    /// A variable-length list per event. Event `i` owns
    /// `values[offsets[i]..offsets[i + 1]]`.
    List {
        offsets: Vec<usize>,
        values: Box<PerEventArray>,
    },
}

/// Per-event reduction applied to list-valued fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Min,
    Max,
}

impl PerEventArray {
    pub fn scalar(values: Vec<f64>) -> Self {
        PerEventArray::Scalar(values)
    }

    /// Build a list-per-event array from nested vectors.
    pub fn jagged(lists: Vec<Vec<f64>>) -> Self {
        let mut offsets = Vec::with_capacity(lists.len() + 1);
        offsets.push(0);
        let mut flat = Vec::new();
        for list in lists {
            flat.extend(list);
            offsets.push(flat.len());
        }
        PerEventArray::List {
            offsets,
            values: Box::new(PerEventArray::Scalar(flat)),
        }
    }

    /// Build a list array from raw offsets, checking that they are
    /// non-decreasing, start at zero and cover `values` exactly.
    pub fn from_offsets(offsets: Vec<usize>, values: PerEventArray) -> HcResult<Self> {
        if offsets.first() != Some(&0) {
            return Err(DataError::InvalidFormat {
                message: "list offsets must start at 0".to_string(),
            }
            .into());
        }
        if offsets.windows(2).any(|w| w[1] < w[0]) {
            return Err(DataError::InvalidFormat {
                message: "list offsets must be non-decreasing".to_string(),
            }
            .into());
        }
        let end = offsets[offsets.len() - 1];
        if end != values.len() {
            return Err(DataError::InvalidFormat {
                message: format!(
                    "list offsets end at {end} but child array has {} entries",
                    values.len()
                ),
            }
            .into());
        }
        Ok(PerEventArray::List {
            offsets,
            values: Box::new(values),
        })
    }

    /// Number of events covered.
    pub fn len(&self) -> usize {
        match self {
            PerEventArray::Scalar(v) => v.len(),
            PerEventArray::List { offsets, .. } => offsets.len().saturating_sub(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nesting depth: 1 for scalar-per-event, 2 for list-per-event, and so on.
    pub fn depth(&self) -> usize {
        match self {
            PerEventArray::Scalar(_) => 1,
            PerEventArray::List { values, .. } => 1 + values.depth(),
        }
    }

    /// The per-event scalars of a depth-1 array.
    pub fn as_scalars(&self) -> Option<&[f64]> {
        match self {
            PerEventArray::Scalar(v) => Some(v),
            PerEventArray::List { .. } => None,
        }
    }

    /// Reduce a depth-2 array to one value per event.
    ///
    /// NaN entries are skipped; an event with no usable entries reduces to
    /// NaN. Returns `None` for any other depth.
    pub fn reduce(&self, reduction: Reduction) -> Option<Vec<f64>> {
        let PerEventArray::List { offsets, values } = self else {
            return None;
        };
        let flat = values.as_scalars()?;
        let reduced = offsets
            .windows(2)
            .map(|w| {
                let items = flat[w[0]..w[1]].iter().copied().filter(|v| !v.is_nan());
                match reduction {
                    Reduction::Min => items.fold(None, |acc: Option<f64>, v| {
                        Some(acc.map_or(v, |a| a.min(v)))
                    }),
                    Reduction::Max => items.fold(None, |acc: Option<f64>, v| {
                        Some(acc.map_or(v, |a| a.max(v)))
                    }),
                }
                .unwrap_or(f64::NAN)
            })
            .collect();
        Some(reduced)
    }

    /// Keep only the first `n` events.
    pub fn truncate(&mut self, n: usize) {
        match self {
            PerEventArray::Scalar(v) => v.truncate(n),
            PerEventArray::List { offsets, values } => {
                if n + 1 < offsets.len() {
                    offsets.truncate(n + 1);
                    values.truncate(offsets[n]);
                }
            }
        }
    }

    /// Append the events of `other`, which must have the same depth.
    pub fn extend_from(&mut self, other: &PerEventArray) -> HcResult<()> {
        match (self, other) {
            (PerEventArray::Scalar(a), PerEventArray::Scalar(b)) => {
                a.extend_from_slice(b);
                Ok(())
            }
            (
                PerEventArray::List { offsets, values },
                PerEventArray::List {
                    offsets: other_offsets,
                    values: other_values,
                },
            ) => {
                let base = offsets.last().copied().unwrap_or(0);
                offsets.extend(other_offsets.iter().skip(1).map(|o| o + base));
                values.extend_from(other_values)
            }
            (a, b) => Err(DataError::SchemaMismatch {
                message: format!(
                    "cannot append array of depth {} to array of depth {}",
                    b.depth(),
                    a.depth()
                ),
            }
            .into()),
        }
    }
}

/// A node in the field tree of an [`EventTable`].
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Values(PerEventArray),
    Record(Record),
}

/// Named sub-fields, e.g. the `pt`, `eta`, `phi` of a `Jet` collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Field>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, field: Field) -> Option<Field> {
        self.fields.insert(name.into(), field)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for (name, field) in &self.fields {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            match field {
                Field::Values(_) => out.push(path),
                Field::Record(record) => record.collect_paths(&path, out),
            }
        }
    }

    fn for_each_array_mut(&mut self, f: &mut impl FnMut(&mut PerEventArray)) {
        for field in self.fields.values_mut() {
            match field {
                Field::Values(array) => f(array),
                Field::Record(record) => record.for_each_array_mut(f),
            }
        }
    }

    fn extend_from(&mut self, other: &Record, path: &str) -> HcResult<()> {
        if self.fields.len() != other.fields.len()
            || self.fields.keys().zip(other.fields.keys()).any(|(a, b)| a != b)
        {
            return Err(DataError::SchemaMismatch {
                message: format!("field sets differ under '{path}'"),
            }
            .into());
        }
        for (name, field) in self.fields.iter_mut() {
            let child_path = if path.is_empty() {
                name.clone()
            } else {
                format!("{path}.{name}")
            };
            match (field, &other.fields[name]) {
                (Field::Values(a), Field::Values(b)) => a.extend_from(b)?,
                (Field::Record(a), Field::Record(b)) => a.extend_from(b, &child_path)?,
                _ => {
                    return Err(DataError::SchemaMismatch {
                        message: format!("'{child_path}' is a record in one table only"),
                    }
                    .into())
                }
            }
        }
        Ok(())
    }
}

/// One path segment plus whether it may be glued to the previous one with
/// an underscore (segments separated by `.` may not).
struct PathToken<'a> {
    text: &'a str,
    joinable: bool,
}

fn tokenize(path: &str) -> Vec<PathToken<'_>> {
    let mut tokens = Vec::new();
    for part in path.split('.') {
        for (i, text) in part.split('_').enumerate() {
            tokens.push(PathToken {
                text,
                joinable: i > 0,
            });
        }
    }
    tokens
}

/// Walk `tokens` through `record`, preferring the shortest segment run that
/// names a child and backtracking to longer runs. On failure returns the
/// index of the deepest token that could not be resolved.
fn resolve<'r>(record: &'r Record, tokens: &[PathToken<'_>], start: usize) -> Result<&'r Field, usize> {
    let mut deepest = start;
    let mut name = String::new();
    for end in start..tokens.len() {
        if end > start {
            if !tokens[end].joinable {
                break;
            }
            name.push('_');
        }
        name.push_str(tokens[end].text);

        let Some(child) = record.get(&name) else {
            continue;
        };
        let next = end + 1;
        if next == tokens.len() {
            return Ok(child);
        }
        match child {
            Field::Record(sub) => match resolve(sub, tokens, next) {
                Ok(found) => return Ok(found),
                Err(idx) => deepest = deepest.max(idx),
            },
            Field::Values(_) => deepest = deepest.max(next),
        }
    }
    Err(deepest)
}

/// In-memory event table.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTable {
    num_events: usize,
    root: Record,
}

impl EventTable {
    pub fn new(num_events: usize) -> Self {
        Self {
            num_events,
            root: Record::new(),
        }
    }

    pub fn root(&self) -> &Record {
        &self.root
    }

    /// Insert a value array at a (possibly nested) location, creating
    /// intermediate records as needed.
    pub fn insert(&mut self, location: &[&str], array: PerEventArray) -> HcResult<()> {
        if array.len() != self.num_events {
            return Err(DataError::SchemaMismatch {
                message: format!(
                    "field {} has {} events, table has {}",
                    location.join("."),
                    array.len(),
                    self.num_events
                ),
            }
            .into());
        }
        let Some((leaf, parents)) = location.split_last() else {
            return Err(HcError::Validation("empty field location".to_string()));
        };

        let mut record = &mut self.root;
        for (depth, name) in parents.iter().enumerate() {
            let entry = record
                .fields
                .entry((*name).to_string())
                .or_insert_with(|| Field::Record(Record::new()));
            record = match entry {
                Field::Record(r) => r,
                Field::Values(_) => {
                    return Err(DataError::SchemaMismatch {
                        message: format!(
                            "{} is a value field and cannot hold sub-fields",
                            parents[..=depth].join(".")
                        ),
                    }
                    .into())
                }
            };
        }
        if matches!(record.get(leaf), Some(Field::Record(_))) {
            return Err(DataError::SchemaMismatch {
                message: format!("{} is already a record", location.join(".")),
            }
            .into());
        }
        record.insert(*leaf, Field::Values(array));
        Ok(())
    }

    /// Builder-style variant of [`EventTable::insert`] for a top-level column.
    pub fn with_column(mut self, name: &str, array: PerEventArray) -> HcResult<Self> {
        self.insert(&[name], array)?;
        Ok(self)
    }

    /// All leaf field paths, dot-separated.
    pub fn field_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.root.collect_paths("", &mut out);
        out
    }

    /// Keep only the first `n` events.
    pub fn truncate(&mut self, n: usize) {
        if n >= self.num_events {
            return;
        }
        self.root.for_each_array_mut(&mut |array| array.truncate(n));
        self.num_events = n;
    }

    /// Append the events of `other`. Both tables must expose the same fields
    /// with the same shapes.
    pub fn append(&mut self, other: &EventTable) -> HcResult<()> {
        self.root.extend_from(&other.root, "")?;
        self.num_events += other.num_events;
        Ok(())
    }

    /// Concatenate tables in order.
    pub fn concat(tables: Vec<EventTable>) -> HcResult<EventTable> {
        let mut iter = tables.into_iter();
        let mut merged = iter.next().ok_or_else(|| DataError::InvalidFormat {
            message: "cannot concatenate an empty list of event tables".to_string(),
        })?;
        for table in iter {
            merged.append(&table)?;
        }
        Ok(merged)
    }
}

impl EventCollection for EventTable {
    fn len(&self) -> usize {
        self.num_events
    }

    fn field(&self, path: &str) -> HcResult<&PerEventArray> {
        let tokens = tokenize(path);
        match resolve(&self.root, &tokens, 0) {
            Ok(Field::Values(array)) => Ok(array),
            Ok(Field::Record(_)) => Err(SelectionError::NotAValue {
                variable: path.to_string(),
            }
            .into()),
            Err(idx) => Err(DataError::FieldNotFound {
                path: path.to_string(),
                segment: tokens
                    .get(idx)
                    .map(|t| t.text.to_string())
                    .unwrap_or_default(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nano_table() -> EventTable {
        let mut table = EventTable::new(3);
        table
            .insert(&["MET", "pt"], PerEventArray::scalar(vec![10.0, 60.0, 90.0]))
            .unwrap();
        table
            .insert(
                &["Jet", "pt"],
                PerEventArray::jagged(vec![vec![30.0, 50.0], vec![], vec![20.0]]),
            )
            .unwrap();
        table
            .insert(
                &["Muon", "pfRelIso03_all"],
                PerEventArray::scalar(vec![0.1, 0.2, 0.3]),
            )
            .unwrap();
        table
            .insert(&["run_number"], PerEventArray::scalar(vec![1.0, 1.0, 2.0]))
            .unwrap();
        table
    }

    #[test]
    fn resolves_underscore_and_dotted_paths() {
        let table = nano_table();
        let expected = PerEventArray::scalar(vec![10.0, 60.0, 90.0]);
        assert_eq!(table.field("MET_pt").unwrap(), &expected);
        assert_eq!(table.field("MET.pt").unwrap(), &expected);
        assert_eq!(table.field("Jet_pt").unwrap().depth(), 2);
    }

    #[test]
    fn resolves_field_names_containing_underscores() {
        let table = nano_table();
        assert_eq!(
            table.field("Muon_pfRelIso03_all").unwrap().as_scalars(),
            Some(&[0.1, 0.2, 0.3][..])
        );
        assert!(table.field("run_number").is_ok());
    }

    #[test]
    fn dotted_segments_are_not_glued() {
        let table = nano_table();
        assert!(table.field("Muon.pfRelIso03.all").is_err());
    }

    #[test]
    fn missing_field_reports_segment() {
        let table = nano_table();
        let err = table.field("MET_phi").unwrap_err();
        match err {
            HcError::Data(DataError::FieldNotFound { path, segment }) => {
                assert_eq!(path, "MET_phi");
                assert_eq!(segment, "phi");
            }
            other => panic!("expected FieldNotFound, got {other:?}"),
        }
        assert!(table.field("Electron_pt").unwrap_err().is_field_not_found());
    }

    #[test]
    fn record_path_is_not_a_value() {
        let table = nano_table();
        assert!(matches!(
            table.field("Jet"),
            Err(HcError::Selection(SelectionError::NotAValue { .. }))
        ));
    }

    #[test]
    fn reduce_list_fields() {
        let array = PerEventArray::jagged(vec![vec![30.0, 50.0], vec![], vec![20.0, f64::NAN]]);
        let mins = array.reduce(Reduction::Min).unwrap();
        let maxs = array.reduce(Reduction::Max).unwrap();
        assert_eq!(mins[0], 30.0);
        assert!(mins[1].is_nan());
        assert_eq!(mins[2], 20.0);
        assert_eq!(maxs[0], 50.0);
        assert!(maxs[1].is_nan());
        assert_eq!(maxs[2], 20.0);
        assert!(PerEventArray::scalar(vec![1.0]).reduce(Reduction::Min).is_none());
    }

    #[test]
    fn depth_of_nested_lists() {
        let inner = PerEventArray::jagged(vec![vec![1.0], vec![2.0, 3.0]]);
        let nested = PerEventArray::from_offsets(vec![0, 2], inner).unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested.depth(), 3);
        assert!(nested.reduce(Reduction::Max).is_none());
    }

    #[test]
    fn from_offsets_validates() {
        let values = PerEventArray::scalar(vec![1.0, 2.0]);
        assert!(PerEventArray::from_offsets(vec![0, 3], values.clone()).is_err());
        assert!(PerEventArray::from_offsets(vec![1, 2], values.clone()).is_err());
        assert!(PerEventArray::from_offsets(vec![0, 2, 1, 2], values).is_err());
    }

    #[test]
    fn insert_rejects_length_mismatch() {
        let mut table = EventTable::new(2);
        assert!(table
            .insert(&["x"], PerEventArray::scalar(vec![1.0, 2.0, 3.0]))
            .is_err());
    }

    #[test]
    fn append_and_truncate() {
        let mut a = nano_table();
        let b = nano_table();
        a.append(&b).unwrap();
        assert_eq!(a.len(), 6);
        assert_eq!(
            a.field("Jet_pt").unwrap().reduce(Reduction::Max).unwrap()[3],
            50.0
        );

        a.truncate(4);
        assert_eq!(a.len(), 4);
        assert_eq!(a.field("Jet_pt").unwrap().len(), 4);
        assert_eq!(a.field("MET_pt").unwrap().len(), 4);
    }

    #[test]
    fn append_rejects_different_fields() {
        let mut a = nano_table();
        let b = EventTable::new(1)
            .with_column("MET_pt", PerEventArray::scalar(vec![1.0]))
            .unwrap();
        assert!(a.append(&b).is_err());
    }

    #[test]
    fn field_paths_lists_leaves() {
        let table = nano_table();
        let paths = table.field_paths();
        assert!(paths.contains(&"Jet.pt".to_string()));
        assert!(paths.contains(&"Muon.pfRelIso03_all".to_string()));
        assert_eq!(paths.len(), 4);
    }
}
