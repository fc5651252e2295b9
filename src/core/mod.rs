//! Core composition logic.

pub mod bag;
pub mod error;
pub mod executor;
pub mod parser;
pub mod path;
pub mod recipe;
pub mod registry;
pub mod step;
pub mod types;
