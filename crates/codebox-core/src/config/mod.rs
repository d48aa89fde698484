//! codebox configuration layer
//!
//! All environment reads go through this module; callers use the structured
//! configs instead of touching `std::env::var` directly.
//!
//! - `loader`: env_or, env_optional, env_bool and `.env` loading
//! - `schema`: ObservabilityConfig, PathsConfig
//! - `env_keys`: key constants

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, load_dotenv, load_dotenv_from_dir};
pub use schema::{ObservabilityConfig, PathsConfig};
