//! `codebox render`: emit the Dockerfile for a recipe.

use anyhow::{Context, Result};
use std::path::Path;

use codebox_image::render_dockerfile;

use super::load_recipe;

/// `codebox render`
pub fn cmd_render(recipe: Option<&str>, output: Option<&str>) -> Result<()> {
    let (recipe, source) = load_recipe(recipe)?;
    let dockerfile = render_dockerfile(&recipe);
    match output {
        Some(out) => {
            write_output(Path::new(out), &dockerfile)?;
            eprintln!("✅ Wrote Dockerfile for {} to {} ({})", recipe.image, out, source);
        }
        None => print!("{}", dockerfile),
    }
    Ok(())
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_to_file() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe_path = tmp.path().join("codebox.yaml");
        std::fs::write(
            &recipe_path,
            codebox_core::recipe::Recipe::builtin_go().to_yaml().unwrap(),
        )
        .unwrap();
        let out = tmp.path().join("Dockerfiles/Dockerfile.go");

        cmd_render(recipe_path.to_str(), out.to_str()).unwrap();
        let content = std::fs::read_to_string(&out).unwrap();
        assert!(content.starts_with("# Base operating system image\nFROM ubuntu:20.04\n"));
        assert!(content.ends_with("CMD [\"go\", \"run\", \"main.go\"]\n"));
    }
}
