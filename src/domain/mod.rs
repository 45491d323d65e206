pub mod meter;
pub mod statistics;

pub use meter::*;
pub use statistics::*;
