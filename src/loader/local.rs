//! Filesystem-backed module loader.

use super::ModuleLoader;
use crate::core::bag::parse_config;
use crate::core::error::{BoxError, Error, Result};
use crate::core::step::{StepContext, StepValue};
use crate::core::types::RecipeSpec;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_yaml_ng::Value;
use std::path::{Path, PathBuf};

/// Extensions tried, in order, when a plugin path has none.
const PLUGIN_EXTENSIONS: [&str; 4] = ["yaml", "yml", "json", "toml"];

/// Loads step modules and recipes from in-process tables, and local plugins
/// from YAML, JSON or TOML files.
#[derive(Debug, Clone, Default)]
pub struct FsLoader {
    modules: IndexMap<String, StepValue>,
    recipes: IndexMap<String, RecipeSpec>,
}

impl FsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a step module under `id`.
    pub fn with_module(mut self, id: impl Into<String>, value: impl Into<StepValue>) -> Self {
        self.modules.insert(id.into(), value.into());
        self
    }

    /// Publish a step module whose value is built at cook time.
    pub fn with_factory<F>(self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&StepContext) -> std::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.with_module(id, StepValue::factory(factory))
    }

    /// Publish a recipe spec under `id` (usually namespaced, `sous-<name>`).
    pub fn with_recipe(mut self, id: impl Into<String>, spec: RecipeSpec) -> Self {
        self.recipes.insert(id.into(), spec);
        self
    }

    /// The file a plugin path refers to: the path itself, or the first
    /// existing `path.<ext>`.
    fn plugin_file(path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        PLUGIN_EXTENSIONS.iter().find_map(|ext| {
            let mut name = path.as_os_str().to_owned();
            name.push(".");
            name.push(ext);
            let candidate = PathBuf::from(name);
            candidate.is_file().then_some(candidate)
        })
    }
}

#[async_trait]
impl ModuleLoader for FsLoader {
    async fn load_module(&self, id: &str) -> Result<StepValue> {
        self.modules
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ModuleNotFound(id.to_string()))
    }

    async fn load_file(&self, path: &Path) -> Result<StepValue> {
        let file = Self::plugin_file(path)
            .ok_or_else(|| Error::ModuleNotFound(path.display().to_string()))?;
        let content = tokio::fs::read_to_string(&file).await?;
        Ok(StepValue::Constant(parse_config(&file, &content)?))
    }

    async fn load_recipe(&self, id: &str) -> Result<RecipeSpec> {
        self.recipes
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ModuleNotFound(id.to_string()))
    }
}
