pub mod measurement;
pub mod settings;

pub use measurement::*;
pub use settings::*;
