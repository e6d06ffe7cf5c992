pub mod cuts;
pub mod errors;

pub use cuts::*;
pub use errors::*;
