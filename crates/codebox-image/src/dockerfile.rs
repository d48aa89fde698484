//! Dockerfile rendering.
//!
//! One commented instruction group per provisioning phase, in plan order.
//! Output depends on nothing but the recipe.

use std::fmt::Write;

use codebox_core::recipe::Recipe;

fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Exec-form argv: `["go", "run", "main.go"]`.
fn exec_form(argv: &[String]) -> String {
    let items: Vec<String> = argv.iter().map(|a| json_string(a)).collect();
    format!("[{}]", items.join(", "))
}

/// Render the Dockerfile for a validated recipe.
pub fn render(recipe: &Recipe) -> String {
    let mut out = String::new();
    let tc = &recipe.toolchain;
    let archive = tc.archive_file_name();

    let _ = writeln!(out, "# Base operating system image");
    let _ = writeln!(out, "FROM {}", recipe.base);

    if !recipe.packages.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "# Install dependencies");
        let _ = writeln!(out, "RUN apt-get update && apt-get install -y \\");
        for package in &recipe.packages {
            let _ = writeln!(out, "    {} \\", package);
        }
        let _ = writeln!(out, "    && rm -rf /var/lib/apt/lists/*");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "# Install {} {} manually", tc.name, tc.version);
    let _ = writeln!(out, "RUN wget {} && \\", tc.url);
    if let Some(ref digest) = tc.sha256 {
        let _ = writeln!(out, "    echo \"{}  {}\" | sha256sum -c - && \\", digest, archive);
    }
    let _ = writeln!(out, "    tar -C {} -xzf {} && \\", tc.install_root, archive);
    let _ = writeln!(out, "    rm {}", archive);

    let _ = writeln!(out);
    let _ = writeln!(out, "# Put the {} toolchain on the execution path", tc.name);
    let _ = writeln!(out, "ENV PATH=$PATH:{}", tc.bin_path());

    let user = &recipe.user;
    let _ = writeln!(out);
    let _ = writeln!(out, "# Create a non-root user for running the application");
    match user.home {
        Some(ref home) => {
            let _ = writeln!(out, "RUN useradd -m -d {} -s {} {}", home, user.shell, user.name);
        }
        None => {
            let _ = writeln!(out, "RUN useradd -ms {} {}", user.shell, user.name);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "# Switch to the non-root user");
    let _ = writeln!(out, "USER {}", user.name);

    let _ = writeln!(out);
    let _ = writeln!(out, "# Set the working directory");
    let _ = writeln!(out, "WORKDIR {}", recipe.workdir);

    let _ = writeln!(out);
    let _ = writeln!(out, "# Command to run when the container starts");
    let _ = writeln!(out, "CMD {}", exec_form(&recipe.command));
    out
}
