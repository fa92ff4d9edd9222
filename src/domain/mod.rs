pub mod estimate;
pub mod market;
pub mod signal;

pub use estimate::*;
pub use market::*;
pub use signal::*;
