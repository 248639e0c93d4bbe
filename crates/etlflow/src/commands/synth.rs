use crate::context::Context;
use anyhow::Context as _;
use colored::Colorize;
use etlflow_config::CdnConfig;
use etlflow_infra::edge::{self, Cdn};
use std::collections::BTreeMap;
use std::path::Path;

pub const CODE_BUCKET_OUTPUT: &str = "CODEBUCKET";

/// CDN layer for the main stack's `outputs`.
///
/// Origins set in `config` win over the load balancer hosts in `outputs`.
pub fn cdn_stack(
    config: &CdnConfig,
    outputs: &BTreeMap<String, String>,
    jupyter_host: Option<&str>,
    argo_host: Option<&str>,
) -> anyhow::Result<Cdn> {
    let log_bucket = outputs
        .get(CODE_BUCKET_OUTPUT)
        .context("The main stack has no CODEBUCKET output: deploy it first")?;
    let origins = edge::origins(config, jupyter_host, argo_host)?;
    Ok(edge::cdn_layer(origins, log_bucket))
}

pub async fn handle(ctx: &Context, output: Option<&Path>, cdn: bool) -> anyhow::Result<()> {
    let body = if cdn {
        let config = ctx
            .config
            .cdn
            .as_ref()
            .filter(|c| c.enabled)
            .context("The CDN is not enabled in the config (cdn.enabled)")?;
        let state = etlflow_cloud::StateManager::new(&ctx.project_root).load().await?;
        let outputs = state
            .stack(&ctx.config.stack_name)
            .map(|s| s.outputs.clone())
            .unwrap_or_default();
        let cdn = cdn_stack(config, &outputs, None, None)?;
        serde_json::to_string_pretty(&cdn.template(etlflow_infra::stack::DESCRIPTION)?)?
    } else {
        ctx.build_stack()?.template_json()?
    };

    match output {
        Some(path) => {
            std::fs::write(path, &body)
                .with_context(|| format!("Cannot write {}", path.display()))?;
            eprintln!(
                "{} {}",
                "✓ Template written to".green(),
                path.display().to_string().cyan()
            );
        }
        None => println!("{body}"),
    }
    Ok(())
}
