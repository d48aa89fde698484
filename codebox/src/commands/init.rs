//! `codebox init`: write the built-in Go recipe so it can be edited.

use anyhow::{Context, Result};
use std::path::Path;

use codebox_core::recipe::Recipe;

/// `codebox init`
pub fn cmd_init(output: &str, force: bool) -> Result<()> {
    let path = Path::new(output);
    write_builtin(path, force)?;
    eprintln!("✅ Wrote {} ({})", path.display(), Recipe::builtin_go().image);
    Ok(())
}

fn write_builtin(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let yaml = Recipe::builtin_go().to_yaml()?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_loadable_recipe() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("recipes/codebox.yaml");
        write_builtin(&path, false).unwrap();
        assert_eq!(Recipe::load(&path).unwrap(), Recipe::builtin_go());
    }

    #[test]
    fn test_refuses_overwrite_without_force() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("codebox.yaml");
        std::fs::write(&path, "keep me").unwrap();

        let err = write_builtin(&path, false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");

        write_builtin(&path, true).unwrap();
        assert!(Recipe::load(&path).is_ok());
    }
}
