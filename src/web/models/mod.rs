pub mod adjust_models;

pub use adjust_models::*;
