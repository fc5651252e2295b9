//! Recipe registry: the single owner of every constructed recipe.
//!
//! Recipes are inserted once and never removed. Ids are unique; a second
//! construction under the same id fails. Lookups through [`RecipeRegistry::from_id`]
//! are memoized both by the requested id and by its namespaced form, so
//! `from_id("x")` and `from_id("sous-x")` hand back the same `Arc`.

use super::error::{Error, Result};
use super::parser::parse_descriptor_file;
use super::path::has_file;
use super::recipe::Recipe;
use super::types::{ParentSpec, RecipeSpec};
use crate::loader::ModuleLoader;
use futures::future::BoxFuture;
use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

static RECIPE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z0-9-]+$").expect("recipe id pattern"));

/// Naming conventions the registry works with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Prefix added to ids looked up with `from_id`
    pub namespace: String,
    /// Descriptor file name inside a recipe directory
    pub descriptor: String,
    /// Directory searched (upwards from cwd) for on-disk recipe packages
    pub packages_dir: String,
    /// Logical subtree holding local plugins
    pub plugins_dir: String,
    /// Logical path of the config layer
    pub config_dir: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            namespace: "sous-".to_string(),
            descriptor: "sous.yaml".to_string(),
            packages_dir: "recipes".to_string(),
            plugins_dir: "plugins".to_string(),
            config_dir: "config".to_string(),
        }
    }
}

impl RegistrySettings {
    /// Parse settings from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::InvalidConfig {
            path: "<settings>".to_string(),
            reason: e.to_string(),
        })
    }

    /// `id` with the namespace prefix, added only when missing.
    pub fn canonical(&self, id: &str) -> String {
        if id.starts_with(&self.namespace) {
            id.to_string()
        } else {
            format!("{}{id}", self.namespace)
        }
    }
}

#[derive(Default)]
struct RegistryState {
    recipes: IndexMap<String, Arc<Recipe>>,
    /// Looked-up name → registered recipe id
    aliases: IndexMap<String, String>,
    /// Ids whose construction is in progress
    pending: IndexSet<String>,
}

impl RegistryState {
    fn lookup(&self, name: &str) -> Option<Arc<Recipe>> {
        self.recipes.get(name).cloned().or_else(|| {
            self.aliases
                .get(name)
                .and_then(|id| self.recipes.get(id))
                .cloned()
        })
    }
}

/// Registry of constructed recipes.
pub struct RecipeRegistry {
    loader: Arc<dyn ModuleLoader>,
    cwd: PathBuf,
    settings: RegistrySettings,
    state: Mutex<RegistryState>,
}

impl RecipeRegistry {
    /// An empty registry. Recipes without an explicit `cwd` are rooted at `cwd`.
    pub fn new(loader: impl ModuleLoader + 'static, cwd: impl Into<PathBuf>) -> Self {
        Self::with_settings(Arc::new(loader), cwd, RegistrySettings::default())
    }

    pub fn with_settings(
        loader: Arc<dyn ModuleLoader>,
        cwd: impl Into<PathBuf>,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            loader,
            cwd: cwd.into(),
            settings,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Default root directory for recipes.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn loader(&self) -> &dyn ModuleLoader {
        &*self.loader
    }

    pub fn get(&self, id: &str) -> Option<Arc<Recipe>> {
        self.lock().recipes.get(id).cloned()
    }

    /// Registered ids, in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.lock().recipes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().recipes.is_empty()
    }

    /// Nearest ancestor of `start` (itself included) holding a descriptor
    /// file, or `start` when there is none.
    pub fn find_project_root(&self, start: &Path) -> PathBuf {
        start
            .ancestors()
            .find(|dir| dir.join(&self.settings.descriptor).is_file())
            .unwrap_or(start)
            .to_path_buf()
    }

    /// Construct a recipe from `spec` and register it.
    pub async fn construct(&self, spec: RecipeSpec) -> Result<Arc<Recipe>> {
        if spec.id.is_empty() {
            return Err(Error::InvalidArgument(
                "Invalid recipe: \"id\" is not allowed to be empty".into(),
            ));
        }
        let id = spec.id.clone();
        self.build(spec)
            .await
            .map_err(|e| Error::invalid_recipe(&id, e))
    }

    async fn build(&self, spec: RecipeSpec) -> Result<Arc<Recipe>> {
        if self.get(&spec.id).is_some() {
            return Err(Error::DuplicateRecipeId(spec.id));
        }
        let _pending = PendingGuard::enter(self, &spec.id)?;
        let recipe = Recipe::build(self, spec).await?;
        self.insert(recipe)
    }

    fn insert(&self, recipe: Recipe) -> Result<Arc<Recipe>> {
        let mut state = self.lock();
        if state.recipes.contains_key(recipe.id()) {
            return Err(Error::DuplicateRecipeId(recipe.id().to_string()));
        }
        let recipe = Arc::new(recipe);
        state
            .recipes
            .insert(recipe.id().to_string(), Arc::clone(&recipe));
        tracing::info!(
            recipe = recipe.id(),
            cwd = %recipe.cwd().display(),
            steps = recipe.steps().len(),
            parents = recipe.parents().len(),
            "registered recipe"
        );
        Ok(recipe)
    }

    /// Turn a parent reference into a recipe.
    pub async fn resolve(&self, parent: ParentSpec) -> Result<Arc<Recipe>> {
        self.resolve_in(parent, None).await
    }

    /// Same as [`RecipeRegistry::resolve`], searching for packages from `cwd`.
    pub(crate) fn resolve_in<'a>(
        &'a self,
        parent: ParentSpec,
        cwd: Option<&'a Path>,
    ) -> BoxFuture<'a, Result<Arc<Recipe>>> {
        Box::pin(async move {
            match parent {
                ParentSpec::Recipe(recipe) => Ok(recipe),
                ParentSpec::Id(id) => self.from_id(&id, cwd).await,
                ParentSpec::Inline(spec) => self.construct(*spec).await,
            }
        })
    }

    /// Look a recipe up by id, loading it when it is not registered yet.
    ///
    /// An on-disk package `<dir>/recipes/<namespaced id>/sous.yaml` found in
    /// `cwd` (default: the registry cwd) or one of its ancestors wins over
    /// the loader.
    pub async fn from_id(&self, id: &str, cwd: Option<&Path>) -> Result<Arc<Recipe>> {
        if !RECIPE_ID.is_match(id) {
            return Err(Error::InvalidArgument(format!(
                "\"id\" must only contain alpha-numeric characters and dashes (provided: \"{id}\")"
            )));
        }
        let canonical = self.settings.canonical(id);
        if let Some(found) = self.memoized(id, &canonical) {
            return Ok(found);
        }

        let recipe = self
            .load(&canonical, cwd.unwrap_or(self.cwd()))
            .await
            .map_err(|e| Error::cannot_load(&canonical, e))?;

        let mut state = self.lock();
        for name in [id, canonical.as_str()] {
            if name != recipe.id() {
                state.aliases.insert(name.to_string(), recipe.id().to_string());
            }
        }
        Ok(recipe)
    }

    fn memoized(&self, id: &str, canonical: &str) -> Option<Arc<Recipe>> {
        let state = self.lock();
        state.lookup(id).or_else(|| state.lookup(canonical))
    }

    async fn load(&self, canonical: &str, cwd: &Path) -> Result<Arc<Recipe>> {
        if let Some(dir) = self.find_package(canonical, cwd) {
            tracing::debug!(recipe = canonical, dir = %dir.display(), "loading recipe package");
            return self.from_file(&dir).await;
        }
        let spec = self.loader.load_recipe(canonical).await?;
        self.construct(spec).await
    }

    fn find_package(&self, canonical: &str, cwd: &Path) -> Option<PathBuf> {
        cwd.ancestors()
            .map(|dir| dir.join(&self.settings.packages_dir).join(canonical))
            .find(|dir| dir.join(&self.settings.descriptor).is_file())
    }

    /// Construct the recipe described by `dir/sous.yaml`.
    ///
    /// The descriptor's `cwd` is always the directory it lives in.
    pub async fn from_file(&self, dir: &Path) -> Result<Arc<Recipe>> {
        let descriptor = &self.settings.descriptor;
        let file = has_file(dir, descriptor)?.ok_or_else(|| Error::NoDescriptorFile {
            file: descriptor.clone(),
            dir: dir.display().to_string(),
        })?;
        self.load_descriptor(&file)
            .await
            .map_err(Error::invalid_descriptor)
    }

    async fn load_descriptor(&self, file: &Path) -> Result<Arc<Recipe>> {
        let content = tokio::fs::read_to_string(file).await?;
        let spec = parse_descriptor_file(file, &content)?;
        self.construct(spec).await
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks an id as under construction until dropped.
struct PendingGuard<'a> {
    registry: &'a RecipeRegistry,
    id: String,
}

impl<'a> PendingGuard<'a> {
    fn enter(registry: &'a RecipeRegistry, id: &str) -> Result<Self> {
        if !registry.lock().pending.insert(id.to_string()) {
            return Err(Error::CyclicRecipe(id.to_string()));
        }
        Ok(Self {
            registry,
            id: id.to_string(),
        })
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.lock().pending.shift_remove(&self.id);
    }
}

impl std::fmt::Debug for RecipeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeRegistry")
            .field("cwd", &self.cwd)
            .field("settings", &self.settings)
            .field("recipes", &self.ids())
            .finish()
    }
}
