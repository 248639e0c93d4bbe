use crate::context::Context;
use crate::utils;
use colored::Colorize;
use etlflow_cloud::{StateManager, plan_changes};

pub async fn handle(ctx: &Context) -> anyhow::Result<()> {
    println!("{}", "Computing changes...".blue());
    let stack = ctx.build_stack()?;
    let graph = stack.graph()?;

    let state = StateManager::new(&ctx.project_root).load().await?;
    let previous = state.stack(&stack.name);
    match previous {
        Some(previous) => println!(
            "Last deploy: {} ({})",
            previous.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().cyan(),
            previous.status
        ),
        None => println!("Stack {} has not been deployed yet", stack.name.cyan()),
    }

    let plan = plan_changes(&graph, previous);
    utils::print_plan(&plan);
    Ok(())
}
