//! Config structs grouped by concern, loaded from the environment.

use super::env_keys::{observability as obv_keys, paths as path_keys};
use super::loader::{env_bool, env_optional, env_or};
use std::path::PathBuf;

/// Observability: quiet, log_level, log_json, build_log
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub build_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            Self::read()
        })
    }

    /// Uncached read, for callers that need to observe env changes.
    pub fn read() -> Self {
        let quiet = env_bool(obv_keys::CODEBOX_QUIET, &[], false);
        let log_level = env_or(obv_keys::CODEBOX_LOG_LEVEL, &[], || "codebox=info".to_string());
        let log_json = env_bool(obv_keys::CODEBOX_LOG_JSON, &[], false);
        let build_log = env_optional(obv_keys::CODEBOX_BUILD_LOG, &[]);
        Self {
            quiet,
            log_level,
            log_json,
            build_log,
        }
    }

    /// Effective filter directive: quiet wins over the configured level.
    pub fn filter_directive(&self) -> String {
        if self.quiet {
            "codebox=warn".to_string()
        } else {
            self.log_level.clone()
        }
    }
}

/// Where recipes are looked up.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    /// Explicit recipe from `CODEBOX_RECIPE`.
    pub recipe: Option<String>,
    /// `./codebox.yaml`
    pub local_recipe: PathBuf,
    /// `<config dir>/codebox/recipe.yaml`, when the platform has a config dir.
    pub user_recipe: Option<PathBuf>,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        let recipe = env_optional(path_keys::CODEBOX_RECIPE, path_keys::RECIPE_ALIASES);
        let local_recipe = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path_keys::LOCAL_RECIPE_FILE);
        let user_recipe = dirs::config_dir().map(|d| d.join("codebox").join("recipe.yaml"));
        Self {
            recipe,
            local_recipe,
            user_recipe,
        }
    }

    /// First recipe file that should be used, or `None` for the built-in recipe.
    ///
    /// Order: `CODEBOX_RECIPE`, `./codebox.yaml`, user config dir. The env value
    /// is returned even if the file is missing so the caller reports the error.
    pub fn resolve_recipe(&self) -> Option<PathBuf> {
        if let Some(ref explicit) = self.recipe {
            return Some(PathBuf::from(explicit));
        }
        if self.local_recipe.is_file() {
            return Some(self.local_recipe.clone());
        }
        self.user_recipe.as_ref().filter(|p| p.is_file()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_overrides_level() {
        let cfg = ObservabilityConfig {
            quiet: true,
            log_level: "codebox=debug".to_string(),
            log_json: false,
            build_log: None,
        };
        assert_eq!(cfg.filter_directive(), "codebox=warn");

        let cfg = ObservabilityConfig { quiet: false, ..cfg };
        assert_eq!(cfg.filter_directive(), "codebox=debug");
    }

    #[test]
    fn test_resolve_recipe_prefers_explicit() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("codebox.yaml");
        std::fs::write(&local, "x").unwrap();

        let cfg = PathsConfig {
            recipe: Some("/nonexistent/recipe.yaml".to_string()),
            local_recipe: local.clone(),
            user_recipe: None,
        };
        assert_eq!(
            cfg.resolve_recipe(),
            Some(PathBuf::from("/nonexistent/recipe.yaml"))
        );

        let cfg = PathsConfig { recipe: None, ..cfg };
        assert_eq!(cfg.resolve_recipe(), Some(local));
    }

    #[test]
    fn test_resolve_recipe_falls_back_to_builtin() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = PathsConfig {
            recipe: None,
            local_recipe: tmp.path().join("codebox.yaml"),
            user_recipe: Some(tmp.path().join("missing.yaml")),
        };
        assert_eq!(cfg.resolve_recipe(), None);
    }
}
