//! Error taxonomy for recipe construction, lookup, and cooking.
//!
//! Every layer that adds context wraps the cause in a variant whose message is
//! `<context>: <cause>`, so the rendered message reads as the full causal
//! chain. [`Error::root`] walks back to the innermost kind.

use thiserror::Error;

/// Boxed error returned by caller-supplied factories and resolvers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{prefix}Not a directory: \"{path}\"")]
    NotADirectory { prefix: String, path: String },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    #[error("Invalid step format: \"{0}\"")]
    InvalidStepFormat(String),

    #[error("Cannot make a bag from something other than a mapping (provided: {0})")]
    InvalidBagSource(&'static str),

    #[error("Invalid \"{key}\" connection: {reason}")]
    InvalidConnection { key: String, reason: String },

    #[error("Invalid config file \"{path}\": {reason}")]
    InvalidConfig { path: String, reason: String },

    #[error("A recipe already exists with \"{0}\" id")]
    DuplicateRecipeId(String),

    #[error("\"{0}\" recipe inherits from itself through its \"from\" chain")]
    CyclicRecipe(String),

    #[error("\"{0}\" step is already defined")]
    DuplicateStepId(String),

    #[error("Invalid \"{step}\" step: \"{recipe}\" has no \"{parent}\" parent")]
    UnknownParent {
        step: String,
        recipe: String,
        parent: String,
    },

    #[error("Invalid \"{step}\" step: \"{parent}\" recipe has no \"{step}\" step defined")]
    UnknownParentStep { step: String, parent: String },

    #[error("Plugin not found: {source}")]
    PluginNotFound { source: Box<Error> },

    #[error("Cannot find module '{0}'")]
    ModuleNotFound(String),

    #[error("Invalid \"{id}\" step: {source}")]
    ModuleLoad { id: String, source: Box<Error> },

    #[error("No \"{file}\" file found: \"{dir}\"")]
    NoDescriptorFile { file: String, dir: String },

    #[error("Invalid \"{id}\" recipe: {source}")]
    InvalidRecipe { id: String, source: Box<Error> },

    #[error("\"from\" must be a [recipe|recipeID] or an array of [recipe|recipeID]: {source}")]
    InvalidFrom { source: Box<Error> },

    #[error("Cannot load \"{id}\" recipe: {source}")]
    CannotLoad { id: String, source: Box<Error> },

    #[error("Invalid descriptor file: {source}")]
    InvalidDescriptor { source: Box<Error> },

    #[error("\"{step}\" step factory failed: {source}")]
    Factory { step: String, source: BoxError },

    #[error("\"{step}\" step resolver failed: {source}")]
    Resolver { step: String, source: BoxError },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl Error {
    pub(crate) fn not_a_directory(label: Option<&str>, path: &std::path::Path) -> Self {
        Error::NotADirectory {
            prefix: label.map(|l| format!("{l}: ")).unwrap_or_default(),
            path: path.display().to_string(),
        }
    }

    pub(crate) fn plugin_not_found(cause: Error) -> Self {
        Error::PluginNotFound {
            source: Box::new(cause),
        }
    }

    pub(crate) fn module_load(id: &str, cause: Error) -> Self {
        Error::ModuleLoad {
            id: id.to_string(),
            source: Box::new(cause),
        }
    }

    pub(crate) fn invalid_recipe(id: &str, cause: Error) -> Self {
        Error::InvalidRecipe {
            id: id.to_string(),
            source: Box::new(cause),
        }
    }

    pub(crate) fn invalid_from(cause: Error) -> Self {
        Error::InvalidFrom {
            source: Box::new(cause),
        }
    }

    pub(crate) fn cannot_load(id: &str, cause: Error) -> Self {
        Error::CannotLoad {
            id: id.to_string(),
            source: Box::new(cause),
        }
    }

    pub(crate) fn invalid_descriptor(cause: Error) -> Self {
        Error::InvalidDescriptor {
            source: Box::new(cause),
        }
    }

    /// The innermost error of a wrapping chain.
    pub fn root(&self) -> &Error {
        match self {
            Error::PluginNotFound { source }
            | Error::ModuleLoad { source, .. }
            | Error::InvalidRecipe { source, .. }
            | Error::InvalidFrom { source }
            | Error::CannotLoad { source, .. }
            | Error::InvalidDescriptor { source } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_not_a_directory_prefix() {
        let bare = Error::not_a_directory(None, Path::new("/nope"));
        assert_eq!(bare.to_string(), "Not a directory: \"/nope\"");

        let labeled = Error::not_a_directory(Some("Invalid \"cwd\" param"), Path::new("/nope"));
        assert_eq!(
            labeled.to_string(),
            "Invalid \"cwd\" param: Not a directory: \"/nope\""
        );
    }

    #[test]
    fn test_error_chain_renders_every_layer() {
        let err = Error::cannot_load(
            "sous-web",
            Error::invalid_recipe("web", Error::DuplicateStepId("auth".into())),
        );
        assert_eq!(
            err.to_string(),
            "Cannot load \"sous-web\" recipe: Invalid \"web\" recipe: \"auth\" step is already defined"
        );
    }

    #[test]
    fn test_error_root_unwraps_nested_context() {
        let err = Error::invalid_recipe(
            "child",
            Error::invalid_from(Error::cannot_load(
                "sous-missing",
                Error::ModuleNotFound("sous-missing".into()),
            )),
        );
        assert!(matches!(err.root(), Error::ModuleNotFound(id) if id == "sous-missing"));

        let leaf = Error::DuplicateRecipeId("a".into());
        assert!(matches!(leaf.root(), Error::DuplicateRecipeId(_)));
    }
}
