pub mod build_info;
pub mod models;
pub mod validation;

pub use build_info::*;
pub use models::*;
pub use validation::*;
