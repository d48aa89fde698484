//! Environment variable keys.
//!
//! Primary variables use the `CODEBOX_*` prefix.

/// Recipe and output locations
pub mod paths {
    /// Recipe file used when `--recipe` is not given.
    pub const CODEBOX_RECIPE: &str = "CODEBOX_RECIPE";
    pub const RECIPE_ALIASES: &[&str] = &["CODEBOX_RECIPE_FILE"];

    /// File name looked up in the current directory.
    pub const LOCAL_RECIPE_FILE: &str = "codebox.yaml";
}

/// Observability and logging
pub mod observability {
    pub const CODEBOX_QUIET: &str = "CODEBOX_QUIET";

    pub const CODEBOX_LOG_LEVEL: &str = "CODEBOX_LOG_LEVEL";

    pub const CODEBOX_LOG_JSON: &str = "CODEBOX_LOG_JSON";

    /// JSONL file receiving build events.
    pub const CODEBOX_BUILD_LOG: &str = "CODEBOX_BUILD_LOG";
}
