//! Signal/background separation losses.
//!
//! All losses are negated figures of merit, so lower is better. Degenerate
//! selections (nothing passes) score 0.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use hc_types::{config_error, validation_error, HcError, HcResult};

/// Supported figures of merit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossKind {
    /// `-s / b`
    SOverB,
    /// `-s / sqrt(b)`
    SOverSqrtB,
    /// `-s / sqrt(s + b)`
    SOverSqrtSPlusB,
}

impl LossKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossKind::SOverB => "s/b",
            LossKind::SOverSqrtB => "s/sqrt(b)",
            LossKind::SOverSqrtSPlusB => "s/sqrt(s+b)",
        }
    }

    /// Loss for the given pass counts.
    pub fn loss(&self, counts: &SelectionCounts) -> f64 {
        let s = counts.sig_pass as f64;
        let b = counts.bkg_pass as f64;
        match self {
            LossKind::SOverB if counts.bkg_pass == 0 => 0.0,
            LossKind::SOverB => -s / b,
            LossKind::SOverSqrtB if counts.bkg_pass == 0 => 0.0,
            LossKind::SOverSqrtB => -s / b.sqrt(),
            LossKind::SOverSqrtSPlusB if counts.sig_pass == 0 && counts.bkg_pass == 0 => 0.0,
            LossKind::SOverSqrtSPlusB => -s / (s + b).sqrt(),
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LossKind {
    type Err = HcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s/b" | "negsoverb" => Ok(LossKind::SOverB),
            "s/sqrt(b)" => Ok(LossKind::SOverSqrtB),
            "s/sqrt(s+b)" => Ok(LossKind::SOverSqrtSPlusB),
            other => Err(config_error!(
                "loss function '{other}' not recognized (expected s/b, s/sqrt(b) or s/sqrt(s+b))"
            )),
        }
    }
}

/// Event counts behind one loss value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionCounts {
    pub sig_total: usize,
    pub sig_pass: usize,
    pub bkg_total: usize,
    pub bkg_pass: usize,
}

impl SelectionCounts {
    /// Count signal and background events, total and passing.
    pub fn from_masks(mask: &[bool], labels: &[bool]) -> HcResult<Self> {
        if mask.len() != labels.len() {
            return Err(validation_error!(
                "selection mask has {} events but label mask has {}",
                mask.len(),
                labels.len()
            ));
        }
        let mut counts = SelectionCounts::default();
        for (&pass, &is_signal) in mask.iter().zip(labels) {
            match (is_signal, pass) {
                (true, true) => {
                    counts.sig_total += 1;
                    counts.sig_pass += 1;
                }
                (true, false) => counts.sig_total += 1,
                (false, true) => {
                    counts.bkg_total += 1;
                    counts.bkg_pass += 1;
                }
                (false, false) => counts.bkg_total += 1,
            }
        }
        Ok(counts)
    }

    pub fn sig_efficiency(&self) -> f64 {
        ratio(self.sig_pass, self.sig_total)
    }

    pub fn bkg_efficiency(&self) -> f64 {
        ratio(self.bkg_pass, self.bkg_total)
    }
}

fn ratio(pass: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        pass as f64 / total as f64
    }
}

/// Loss value together with the counts it was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossOutcome {
    pub loss: f64,
    pub counts: SelectionCounts,
}

/// Compute the loss named by `loss_function` for a pass mask against the
/// signal labels.
pub fn compute_loss(mask: &[bool], labels: &[bool], loss_function: &str) -> HcResult<LossOutcome> {
    let kind: LossKind = loss_function.parse()?;
    let counts = SelectionCounts::from_masks(mask, labels)?;
    Ok(LossOutcome {
        loss: kind.loss(&counts),
        counts,
    })
}
