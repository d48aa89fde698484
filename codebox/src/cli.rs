use clap::{Parser, Subcommand};

/// codebox - build and check code-runner container images from typed recipes
#[derive(Parser, Debug)]
#[command(name = "codebox")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the built-in Go runner recipe as YAML
    Init {
        /// Output file
        #[arg(short, long, value_name = "FILE", default_value = "codebox.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Load and validate a recipe
    Validate {
        /// Recipe file (default: CODEBOX_RECIPE, ./codebox.yaml, user config, built-in)
        #[arg(long, value_name = "FILE")]
        recipe: Option<String>,
    },

    /// Print the ordered provisioning steps for a recipe
    Plan {
        /// Recipe file (default: CODEBOX_RECIPE, ./codebox.yaml, user config, built-in)
        #[arg(long, value_name = "FILE")]
        recipe: Option<String>,

        /// Print the plan as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Render the equivalent Dockerfile
    Render {
        /// Recipe file (default: CODEBOX_RECIPE, ./codebox.yaml, user config, built-in)
        #[arg(long, value_name = "FILE")]
        recipe: Option<String>,

        /// Write to FILE instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<String>,
    },

    /// Run the provisioning pipeline and check the container start
    Build {
        /// Recipe file (default: CODEBOX_RECIPE, ./codebox.yaml, user config, built-in)
        #[arg(long, value_name = "FILE")]
        recipe: Option<String>,

        /// Use a local toolchain archive instead of downloading it
        #[arg(long, value_name = "FILE", env = "CODEBOX_ARCHIVE")]
        archive: Option<String>,

        /// Print the outcome as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}
