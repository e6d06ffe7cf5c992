//! Signal/background labels.

use serde::{Deserialize, Serialize};

use crate::events::{EventCollection, EventTable, PerEventArray};
use hc_types::{DataError, HcResult};

/// Default name of the per-event label field added when merging inputs.
pub const DEFAULT_LABEL_FIELD: &str = "isSignal";

/// One flag per event: `true` for signal, `false` for background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMask(Vec<bool>);

impl LabelMask {
    pub fn new(labels: Vec<bool>) -> Self {
        Self(labels)
    }

    /// Read labels from a scalar-per-event field. Non-zero values are signal;
    /// NaN is background.
    pub fn from_field<E: EventCollection + ?Sized>(events: &E, path: &str) -> HcResult<Self> {
        let array = events.field(path)?;
        let values = array.as_scalars().ok_or_else(|| DataError::InvalidFormat {
            message: format!(
                "label field {path} must hold one value per event, found nesting depth {}",
                array.depth()
            ),
        })?;
        Ok(Self(values.iter().map(|v| *v != 0.0 && !v.is_nan()).collect()))
    }

    /// Label events by comparing a scalar field against a threshold
    /// (`value > threshold` is signal).
    pub fn from_threshold<E: EventCollection + ?Sized>(
        events: &E,
        path: &str,
        threshold: f64,
    ) -> HcResult<Self> {
        let array = events.field(path)?;
        let values = array.as_scalars().ok_or_else(|| DataError::InvalidFormat {
            message: format!("threshold label field {path} must be scalar-per-event"),
        })?;
        Ok(Self(values.iter().map(|v| *v > threshold).collect()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    pub fn num_signal(&self) -> usize {
        self.0.iter().filter(|s| **s).count()
    }

    pub fn num_background(&self) -> usize {
        self.0.len() - self.num_signal()
    }
}

/// Attach a constant label column to every event of `table`.
pub fn add_label_field(table: &mut EventTable, field: &str, is_signal: bool) -> HcResult<()> {
    let value = if is_signal { 1.0 } else { 0.0 };
    let column = PerEventArray::scalar(vec![value; table.len()]);
    table.insert(&[field], column)
}

/// Label each table, then concatenate signal tables followed by background
/// tables into one collection.
pub fn merge_labeled(
    signal: Vec<EventTable>,
    background: Vec<EventTable>,
    field: &str,
) -> HcResult<EventTable> {
    let mut labeled = Vec::with_capacity(signal.len() + background.len());
    for (mut table, is_signal) in signal
        .into_iter()
        .map(|t| (t, true))
        .chain(background.into_iter().map(|t| (t, false)))
    {
        add_label_field(&mut table, field, is_signal)?;
        labeled.push(table);
    }
    EventTable::concat(labeled)
}
