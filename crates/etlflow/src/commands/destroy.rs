use crate::context::Context;
use colored::Colorize;
use etlflow_cloud::{AwsCli, CloudError, CloudFormation, Provisioner, StackStatus, StateManager};
use tracing::debug;

pub async fn handle(ctx: &Context, yes: bool) -> anyhow::Result<()> {
    let stack_name = ctx.config.stack_name.clone();
    let cdn_name = ctx.config.cdn_stack_name();

    println!("{}", "Stacks to delete:".bold());
    println!("  • {}", cdn_name.cyan());
    println!("  • {}", stack_name.cyan());

    if !yes {
        println!();
        println!(
            "{}",
            "Warning: this deletes the cluster and its workloads. Retained buckets are kept."
                .yellow()
        );
        println!("Run again with --yes to destroy");
        return Ok(());
    }

    let manager = StateManager::new(&ctx.project_root);
    let lock = manager.acquire_lock().await?;
    let result = destroy(ctx, &manager, &stack_name, &cdn_name).await;
    lock.release().await?;
    result
}

async fn destroy(
    ctx: &Context,
    manager: &StateManager,
    stack_name: &str,
    cdn_name: &str,
) -> anyhow::Result<()> {
    let cli = AwsCli::new(ctx.region.clone());
    let region = match cli.region() {
        Some(region) => region.to_string(),
        None => cli.configured_region().await?,
    };
    let provisioner = CloudFormation::new(AwsCli::new(Some(region)));
    let auth = provisioner.check_auth().await?;
    if !auth.authenticated {
        anyhow::bail!(
            "Not authenticated with AWS: {}",
            auth.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let mut state = manager.load().await?;

    // The CDN logs into the code bucket and fronts the main stack's load balancers
    match provisioner.outputs(cdn_name).await {
        Ok(_) => {
            println!("{}", format!("Deleting {cdn_name}...").blue());
            provisioner.destroy(cdn_name).await?;
            println!("  {} {}", "✓".green(), cdn_name);
        }
        Err(CloudError::StackNotFound(_)) => debug!(stack = cdn_name, "No CDN stack"),
        Err(e) => return Err(e.into()),
    }
    state.remove_stack(cdn_name);
    manager.save(&state).await?;

    if let Some(stack_state) = state.stack(stack_name).cloned() {
        state.set_stack(stack_state.with_status(StackStatus::Deleting));
        manager.save(&state).await?;
    }

    println!("{}", format!("Deleting {stack_name} (this takes a while)...").blue());
    provisioner.destroy(stack_name).await?;
    state.remove_stack(stack_name);
    manager.save(&state).await?;
    println!("  {} {}", "✓".green(), stack_name);

    println!();
    println!("{}", "✓ Destroy complete".green().bold());
    Ok(())
}
