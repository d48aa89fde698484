//! `codebox plan`: print the provisioning transaction log.

use anyhow::Result;

use codebox_image::Plan;

use super::load_recipe;

/// `codebox plan`
pub fn cmd_plan(recipe: Option<&str>, json: bool) -> Result<()> {
    let (recipe, source) = load_recipe(recipe)?;
    let plan = Plan::from_recipe(&recipe);
    plan.check_ordering()?;
    eprintln!("📋 {} step(s) for {} ({})", plan.len(), recipe.image, source);
    println!("{}", format_plan(&plan, json)?);
    Ok(())
}

fn format_plan(plan: &Plan, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(plan)?);
    }
    let width = plan.len().to_string().len();
    let lines: Vec<String> = plan
        .steps()
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let marker = if step.requires_privilege() { "#" } else { "$" };
            format!("{:>width$}. {} {:<16} {}", i + 1, marker, step.name(), step.describe())
        })
        .collect();
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebox_core::recipe::Recipe;

    fn go_plan() -> Plan {
        Plan::from_recipe(&Recipe::builtin_go().validate().unwrap())
    }

    #[test]
    fn test_text_plan() {
        let text = format_plan(&go_plan(), false).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], " 1. $ select-base      select base image ubuntu:20.04");
        assert!(lines[5].contains("append-path"));
        assert!(lines[7].starts_with(" 8. # set-identity"));
    }

    #[test]
    fn test_json_plan() {
        let text = format_plan(&go_plan(), true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[9]["op"], "set-command");
        assert_eq!(value[9]["argv"][0], "go");
    }
}
