use colored::Colorize;
use etlflow_cloud::{ObjectRef, Plan};
use etlflow_infra::cluster::ObjectQuery;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Host part of an endpoint URL: `http://host:2746/x` -> `host`
pub fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host = rest.split(['/', ':']).next().unwrap_or_default();
    (!host.is_empty()).then_some(host)
}

/// Write a rendered template to `.etlflow/<stack>.template.json`
pub fn write_template(state_dir: &Path, stack_name: &str, body: &str) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(state_dir)?;
    let path = state_dir.join(format!("{stack_name}.template.json"));
    std::fs::write(&path, body)?;
    Ok(path)
}

pub fn object_ref(query: &ObjectQuery) -> (ObjectRef, Duration) {
    (
        ObjectRef::new(
            &query.object_type,
            &query.name,
            &query.namespace,
            &query.json_path,
        ),
        Duration::from_secs(query.timeout_seconds),
    )
}

pub fn print_plan(plan: &Plan) {
    println!();
    if !plan.has_changes {
        println!("{}", "No changes since the last deploy.".green());
    }
    for action in &plan.actions {
        let marker = match action.action_type {
            etlflow_cloud::ActionType::Create => "+".green(),
            etlflow_cloud::ActionType::Update => "~".yellow(),
            etlflow_cloud::ActionType::Delete => "-".red(),
            etlflow_cloud::ActionType::NoOp => continue,
        };
        println!(
            "  {} {} ({})",
            marker,
            action.logical_id.cyan(),
            action.resource_type.dimmed()
        );
    }
    println!();
    println!("{}", plan.summary().to_string().bold());
}

pub fn print_outputs(outputs: &BTreeMap<String, String>) {
    let width = outputs.keys().map(String::len).max().unwrap_or(0);
    for (key, value) in outputs {
        println!("  {:width$}  {}", key.bold(), value.cyan());
    }
}
