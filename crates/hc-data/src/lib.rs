//! # hc-data
//!
//! Columnar event storage for HyperCut: an in-memory [`EventTable`] with
//! nested field access, signal/background labels, and Parquet/CSV loaders.

pub mod events;
pub mod labels;
pub mod loaders;

pub use events::*;
pub use labels::*;
pub use loaders::*;
