//! `codebox build`: run the provisioning pipeline against an in-memory image
//! and check that the result would start.

use anyhow::Result;
use serde_json::json;

use codebox_core::observability::BuildEventLog;
use codebox_core::recipe::Recipe;
use codebox_image::{
    simulate_start, BuildFailure, BuildOutcome, Fetcher, FileFetcher, Pipeline, StartupReport,
};

use super::load_recipe;

/// `codebox build`
pub fn cmd_build(recipe: Option<&str>, archive: Option<&str>, json: bool) -> Result<()> {
    let (recipe, source) = load_recipe(recipe)?;
    eprintln!("🔨 Building {} from {}", recipe.image, source);

    let pipeline = Pipeline::new(fetcher(archive)?).with_event_log(BuildEventLog::from_env());
    let build_id = pipeline.event_log().build_id().to_string();

    match run(&pipeline, recipe) {
        Ok((outcome, report)) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&success_json(&build_id, &outcome, &report))?);
            } else {
                for record in &outcome.records {
                    eprintln!("   ✓ {:>2}. {} ({})", record.index, record.description, record.detail);
                }
                eprintln!("✅ {} runs as {} in {}", outcome.image, report.user, report.workdir);
                println!("image:       {}", outcome.image);
                println!("fingerprint: {}", outcome.fingerprint);
                println!("user:        {} (uid {})", report.user, report.uid);
                println!("workdir:     {}", report.workdir);
                println!("command:     {} -> {}", report.argv.join(" "), report.resolved_program);
                println!("PATH:        {}", report.path.join(":"));
            }
            Ok(())
        }
        Err(failure) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&failure_json(&build_id, &failure))?);
            } else {
                for record in &failure.completed {
                    eprintln!("   ✓ {:>2}. {}", record.index, record.description);
                }
            }
            Err(failure.into())
        }
    }
}

#[cfg(feature = "http")]
fn fetcher(archive: Option<&str>) -> Result<Box<dyn Fetcher>> {
    let fetcher: Box<dyn Fetcher> = match archive {
        Some(path) => Box::new(FileFetcher::new(path)),
        None => Box::new(codebox_image::HttpFetcher::new()),
    };
    Ok(fetcher)
}

#[cfg(not(feature = "http"))]
fn fetcher(archive: Option<&str>) -> Result<Box<dyn Fetcher>> {
    match archive {
        Some(path) => Ok(Box::new(FileFetcher::new(path))),
        None => anyhow::bail!("Downloading toolchains requires the 'http' feature; pass --archive"),
    }
}

/// Build, then simulate start. A start failure counts as a failed build.
fn run(pipeline: &Pipeline, recipe: Recipe) -> Result<(BuildOutcome, StartupReport), BuildFailure> {
    let outcome = pipeline.build(recipe)?;
    match simulate_start(&outcome.snapshot) {
        Ok(report) => Ok((outcome, report)),
        Err(error) => Err(BuildFailure {
            error,
            failed_step: None,
            failed_op: Some("start".to_string()),
            completed: outcome.records,
        }),
    }
}

fn success_json(build_id: &str, outcome: &BuildOutcome, report: &StartupReport) -> serde_json::Value {
    json!({
        "status": "ok",
        "build_id": build_id,
        "image": outcome.image,
        "fingerprint": outcome.fingerprint,
        "steps": outcome.records,
        "startup": report,
    })
}

fn failure_json(build_id: &str, failure: &BuildFailure) -> serde_json::Value {
    json!({
        "status": "failed",
        "build_id": build_id,
        "kind": failure.kind(),
        "error": failure.error.to_string(),
        "failed_step": failure.failed_step,
        "failed_op": failure.failed_op,
        "completed": failure.completed,
    })
}
