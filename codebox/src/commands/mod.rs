//! CLI commands.
//!
//!   init    : write the built-in recipe
//!   validate: load + validate, print a summary
//!   plan    : print the ordered provisioning steps
//!   render  : emit the Dockerfile
//!   build   : run the pipeline, then simulate container start

pub mod build;
pub mod init;
pub mod plan;
pub mod render;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use codebox_core::config::PathsConfig;
use codebox_core::recipe::Recipe;

/// Where a recipe came from, for messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeSource {
    File(PathBuf),
    Builtin,
}

impl std::fmt::Display for RecipeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipeSource::File(path) => write!(f, "{}", path.display()),
            RecipeSource::Builtin => f.write_str("built-in Go recipe"),
        }
    }
}

/// Pick the recipe file: `--recipe`, then the environment/local/user config
/// lookup, then the built-in recipe.
pub fn resolve_recipe_source(explicit: Option<&str>, paths: &PathsConfig) -> RecipeSource {
    match explicit.map(PathBuf::from).or_else(|| paths.resolve_recipe()) {
        Some(path) => RecipeSource::File(path),
        None => RecipeSource::Builtin,
    }
}

/// Load and validate the recipe for a command.
pub fn load_recipe(explicit: Option<&str>) -> Result<(Recipe, RecipeSource)> {
    let source = resolve_recipe_source(explicit, &PathsConfig::from_env());
    let recipe = load_from(&source)?;
    Ok((recipe, source))
}

fn load_from(source: &RecipeSource) -> Result<Recipe> {
    match source {
        RecipeSource::File(path) => {
            load_file(path).with_context(|| format!("Failed to load recipe {}", path.display()))
        }
        RecipeSource::Builtin => Ok(Recipe::builtin_go().validate()?),
    }
}

fn load_file(path: &Path) -> Result<Recipe> {
    tracing::debug!(path = %path.display(), "Loading recipe");
    let recipe = Recipe::load(path)?;
    codebox_image::ensure_supported_base(&recipe.base)?;
    Ok(recipe)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(recipe: Option<&str>, dir: &Path) -> PathsConfig {
        PathsConfig {
            recipe: recipe.map(String::from),
            local_recipe: dir.join("codebox.yaml"),
            user_recipe: None,
        }
    }

    #[test]
    fn test_flag_beats_environment() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = paths(Some("/from/env.yaml"), tmp.path());
        assert_eq!(
            resolve_recipe_source(Some("/from/flag.yaml"), &cfg),
            RecipeSource::File(PathBuf::from("/from/flag.yaml"))
        );
        assert_eq!(
            resolve_recipe_source(None, &cfg),
            RecipeSource::File(PathBuf::from("/from/env.yaml"))
        );
    }

    #[test]
    fn test_builtin_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let source = resolve_recipe_source(None, &paths(None, tmp.path()));
        assert_eq!(source, RecipeSource::Builtin);
        assert_eq!(load_from(&source).unwrap(), Recipe::builtin_go());
    }

    #[test]
    fn test_load_error_names_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.yaml");
        std::fs::write(&path, "image: [").unwrap();
        let err = load_from(&RecipeSource::File(path.clone())).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn test_unsupported_base_fails_to_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("codebox.yaml");
        let mut recipe = Recipe::builtin_go();
        recipe.base = "alpine:3.18".parse().unwrap();
        std::fs::write(&path, recipe.to_yaml().unwrap()).unwrap();

        let err = load_from(&RecipeSource::File(path)).unwrap_err();
        assert!(format!("{:#}", err).contains("unsupported base image alpine:3.18"));
    }
}
