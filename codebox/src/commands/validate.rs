//! `codebox validate`: load a recipe and report every problem in it.

use anyhow::Result;

use codebox_core::recipe::{Recipe, RecipeError};

use super::load_recipe;

/// `codebox validate`
pub fn cmd_validate(recipe: Option<&str>) -> Result<()> {
    match load_recipe(recipe) {
        Ok((recipe, source)) => {
            eprintln!("✅ Recipe is valid ({})", source);
            println!("{}", summary(&recipe));
            Ok(())
        }
        Err(err) => {
            if let Some(RecipeError::Invalid(issues)) = err.downcast_ref::<RecipeError>() {
                eprintln!("❌ {} problem(s):", issues.len());
                for issue in issues {
                    eprintln!("   - {}", issue);
                }
            }
            Err(err)
        }
    }
}

fn summary(recipe: &Recipe) -> String {
    let tc = &recipe.toolchain;
    [
        format!("image:     {}", recipe.image),
        format!("base:      {}", recipe.base),
        format!("packages:  {}", recipe.packages.join(", ")),
        format!("toolchain: {} {} -> {}", tc.name, tc.version, tc.install_path),
        format!("path:      +{}", tc.bin_path()),
        format!("user:      {} (home {}, shell {})", recipe.user.name, recipe.user.home(), recipe.user.shell),
        format!("workdir:   {}", recipe.workdir),
        format!("command:   {}", recipe.command.join(" ")),
    ]
    .join("\n")
}
