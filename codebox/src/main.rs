mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    codebox_core::observability::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output, force } => commands::init::cmd_init(&output, force),
        Commands::Validate { recipe } => commands::validate::cmd_validate(recipe.as_deref()),
        Commands::Plan { recipe, json } => commands::plan::cmd_plan(recipe.as_deref(), json),
        Commands::Render { recipe, output } => {
            commands::render::cmd_render(recipe.as_deref(), output.as_deref())
        }
        Commands::Build {
            recipe,
            archive,
            json,
        } => commands::build::cmd_build(recipe.as_deref(), archive.as_deref(), json),
    }
}
