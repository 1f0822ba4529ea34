pub mod generator;
pub mod momentum;
pub mod structure;

pub use generator::*;
pub use momentum::*;
pub use structure::*;
