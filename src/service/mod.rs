//! Request-side services shared by the controllers.

pub mod validation;
pub use validation::*;
