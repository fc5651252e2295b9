//! Module loading: turning identifiers into values.
//!
//! Recipe construction asks a [`ModuleLoader`] for three things: external
//! step modules by bare id, local plugin files by path, and recipe specs by
//! (namespaced) id. [`FsLoader`] is the bundled implementation.

pub mod local;

pub use local::FsLoader;

use crate::core::error::Result;
use crate::core::step::StepValue;
use crate::core::types::RecipeSpec;
use async_trait::async_trait;
use std::path::Path;

/// Resolves identifiers to loaded values.
///
/// Loading must be deterministic for a given identifier within one registry.
/// A missing module is reported as `Error::ModuleNotFound`.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Load an external step module by bare identifier.
    async fn load_module(&self, id: &str) -> Result<StepValue>;

    /// Load a local plugin from its resolved path (without extension).
    async fn load_file(&self, path: &Path) -> Result<StepValue>;

    /// Load a recipe spec published under `id`.
    async fn load_recipe(&self, id: &str) -> Result<RecipeSpec>;
}
