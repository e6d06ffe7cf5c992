//! Turn a cut vector into a per-event pass mask.

use std::borrow::Cow;

use hc_data::{EventCollection, Reduction};
use hc_types::{split_cut_key, CutType, CutVector, HcResult, SelectionError};

/// Apply every cut in `cuts` to `events` and return one flag per event.
///
/// List-valued variables are reduced per event before comparing: the
/// minimum for `min` cuts, the maximum for `max` cuts, so that every entry
/// of the list has to satisfy the cut. An empty list reduces to NaN and
/// fails. An empty cut vector selects every event.
pub fn evaluate<E: EventCollection + ?Sized>(events: &E, cuts: &CutVector) -> HcResult<Vec<bool>> {
    let mut mask = vec![true; events.len()];
    for (key, threshold) in cuts.iter() {
        let (variable, cut_type) = split_cut_key(key)?;
        let values = variable_values(events, variable, cut_type)?;
        for (pass, value) in mask.iter_mut().zip(values.iter()) {
            *pass = *pass && cut_type.passes(*value, threshold);
        }
    }
    Ok(mask)
}

fn variable_values<'a, E: EventCollection + ?Sized>(
    events: &'a E,
    variable: &str,
    cut_type: CutType,
) -> HcResult<Cow<'a, [f64]>> {
    let array = events.field(variable)?;
    match array.depth() {
        1 => array
            .as_scalars()
            .map(Cow::Borrowed)
            .ok_or_else(|| unsupported(variable, 1)),
        2 => {
            let reduction = match cut_type {
                CutType::Min => Reduction::Min,
                CutType::Max => Reduction::Max,
            };
            array
                .reduce(reduction)
                .map(Cow::Owned)
                .ok_or_else(|| unsupported(variable, 2))
        }
        depth => Err(unsupported(variable, depth)),
    }
}

fn unsupported(variable: &str, depth: usize) -> hc_types::HcError {
    SelectionError::UnsupportedShape {
        variable: variable.to_string(),
        depth,
    }
    .into()
}
