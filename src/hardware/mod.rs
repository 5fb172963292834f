pub mod factory;
pub mod measurements;
pub mod pcs;

pub use factory::*;
pub use measurements::*;
pub use pcs::*;
