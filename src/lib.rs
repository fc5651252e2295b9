//! Sous: declarative recipe composition.
//!
//! Recipes are ordered lists of named steps. They inherit from parent
//! recipes, layer their configuration over their parents', and are cooked
//! by realizing each step and threading it through caller-supplied resolvers.

pub mod core;
pub mod loader;

pub use crate::core::error::{BoxError, Error, Result};
pub use crate::core::executor::{Cooked, Resolver};
pub use crate::core::recipe::Recipe;
pub use crate::core::registry::{RecipeRegistry, RegistrySettings};
pub use crate::core::step::{StepContext, StepValue};
pub use crate::core::types::{ConnectionSpec, ParentSpec, RecipeSpec, StepSpec};
pub use crate::loader::{FsLoader, ModuleLoader};
