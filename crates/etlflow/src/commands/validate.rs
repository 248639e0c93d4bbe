use crate::context::Context;
use colored::Colorize;
use std::collections::BTreeMap;

pub fn handle(ctx: &Context) -> anyhow::Result<()> {
    println!("{}", "Validating the provisioning plan...".blue());
    println!("Source: {}", ctx.source_dir.display().to_string().cyan());

    let stack = ctx.build_stack()?;
    let graph = stack.graph()?;
    stack.template()?;

    let mut per_group: BTreeMap<&str, usize> = BTreeMap::new();
    for resource in graph.iter() {
        let group = resource.path.split('/').next().unwrap_or_default();
        *per_group.entry(group).or_default() += 1;
    }

    println!("{}", "✓ Plan is valid".green().bold());
    println!();
    println!("Summary:");
    println!("  Stack: {}", stack.name.cyan());
    println!("  Cluster: {}", stack.cluster.name.cyan());
    println!("  Resources: {}", graph.len());
    for (group, count) in &per_group {
        println!("    - {} ({})", group.cyan(), count);
    }
    println!("  Outputs: {}", stack.outputs().len());
    println!(
        "  Telemetry: {}",
        if stack.telemetry.is_some() { "on" } else { "off" }
    );
    Ok(())
}
