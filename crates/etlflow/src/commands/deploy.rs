use super::synth::cdn_stack;
use crate::context::Context;
use crate::utils;
use anyhow::Context as _;
use colored::Colorize;
use etlflow_cloud::{
    AwsCli, CloudFormation, GlobalState, Kubectl, Provisioner, StackDeployment, StackState,
    StackStatus, StateManager, default_assets_bucket, plan_changes, snapshot,
    wait_for_object_value,
};
use etlflow_core::ResourceGraph;
use etlflow_infra::Stack;
use etlflow_infra::cluster::ObjectQuery;
use etlflow_infra::handler::{ASSETS_BUCKET_PARAM, HANDLER_CODE_PREFIX};
use etlflow_infra::stack::{DESCRIPTION, PROJECT_TAG};
use etlflow_infra::telemetry::HELPER_CODE_KEY;
use std::collections::BTreeMap;
use tracing::info;

const APP_CODE_PREFIX: &str = "app_code";
const JUPYTER_URL_OUTPUT: &str = "JUPYTERURL";
const ARGO_URL_OUTPUT: &str = "ARGOURL";

pub async fn handle(ctx: &Context, yes: bool) -> anyhow::Result<()> {
    println!("{}", "Preparing deployment...".blue().bold());

    let stack = ctx.build_stack()?;
    let graph = stack.graph()?;
    let manager = StateManager::new(&ctx.project_root);
    let mut state = manager.load().await?;

    println!("Stack: {}", stack.name.cyan());
    let plan = plan_changes(&graph, state.stack(&stack.name));
    utils::print_plan(&plan);

    if !yes {
        println!();
        println!(
            "{}",
            "Warning: this creates or updates AWS resources that incur costs.".yellow()
        );
        println!("Run again with --yes to deploy");
        return Ok(());
    }

    let lock = manager.acquire_lock().await?;
    let result = deploy(ctx, &stack, &graph, &manager, &mut state).await;
    lock.release().await?;
    result
}

async fn deploy(
    ctx: &Context,
    stack: &Stack,
    graph: &ResourceGraph,
    manager: &StateManager,
    state: &mut GlobalState,
) -> anyhow::Result<()> {
    check_app_code(ctx)?;

    let cli = AwsCli::new(ctx.region.clone());
    let region = match cli.region() {
        Some(region) => region.to_string(),
        None => cli.configured_region().await?,
    };
    let cli = AwsCli::new(Some(region.clone()));
    let provisioner = CloudFormation::new(cli.clone());

    println!();
    println!("{}", "Checking AWS credentials...".blue());
    let auth = provisioner.check_auth().await?;
    let account = match (auth.authenticated, auth.account) {
        (true, Some(account)) => account,
        _ => anyhow::bail!(
            "Not authenticated with AWS: {}",
            auth.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    };
    println!(
        "  {} {} ({})",
        "✓".green(),
        auth.principal.unwrap_or_default(),
        region.cyan()
    );

    let bucket = ctx
        .config
        .assets_bucket()
        .map(str::to_string)
        .unwrap_or_else(|| default_assets_bucket(&account, &region));

    println!();
    println!("{}", "Uploading assets...".blue());
    let deployment_dir = ctx.deployment_dir();
    let app_code = deployment_dir.join(APP_CODE_PREFIX);
    provisioner
        .upload_assets(&app_code, &bucket, APP_CODE_PREFIX)
        .await?;
    println!("  {} s3://{}/{}", "✓".green(), bucket, APP_CODE_PREFIX);
    let handlers = deployment_dir.join(HANDLER_CODE_PREFIX);
    if handlers.is_dir() {
        provisioner
            .upload_assets(&handlers, &bucket, HANDLER_CODE_PREFIX)
            .await?;
        println!("  {} s3://{}/{}", "✓".green(), bucket, HANDLER_CODE_PREFIX);
    } else {
        info!(dir = %handlers.display(), "No packaged handlers, checking the bucket");
        cli.require_objects(&bucket, &stack.handler_keys()?)
            .await
            .with_context(|| format!("{} does not exist", handlers.display()))?;
        println!(
            "  {} s3://{}/{} (already uploaded)",
            "✓".green(),
            bucket,
            HANDLER_CODE_PREFIX
        );
    }

    let mut tags = ctx.config.tags.clone();
    tags.insert(PROJECT_TAG.0.to_string(), PROJECT_TAG.1.to_string());

    let mut stack_state = state
        .stack(&stack.name)
        .cloned()
        .unwrap_or_else(|| StackState::new(&stack.name));
    stack_state.status = StackStatus::Deploying;
    state.set_stack(stack_state.clone());
    manager.save(state).await?;

    println!();
    println!("{}", "Deploying the main stack (this takes a while)...".blue());
    let template =
        utils::write_template(&manager.state_dir(), &stack.name, &stack.template_json()?)?;
    let deployment = StackDeployment::new(&stack.name, template)
        .with_parameter(ASSETS_BUCKET_PARAM, &bucket)
        .with_artifact_bucket(&bucket)
        .with_tags(&tags);

    if let Err(e) = provisioner.deploy(&deployment).await {
        stack_state.status = StackStatus::Failed;
        state.set_stack(stack_state);
        manager.save(state).await?;
        return Err(e.into());
    }

    let mut outputs = provisioner.outputs(&stack.name).await?;
    stack_state.resources.clear();
    for resource in snapshot(graph) {
        stack_state.set_resource(resource);
    }
    stack_state.outputs = outputs.clone();
    stack_state.status = StackStatus::Deployed;
    state.set_stack(stack_state.clone());
    manager.save(state).await?;
    println!("  {} {}", "✓".green(), stack.name);

    if let Some(config) = ctx.config.cdn.as_ref().filter(|c| c.enabled) {
        let cdn_outputs = deploy_cdn(
            ctx,
            stack,
            config,
            &outputs,
            &cli,
            &provisioner,
            &tags,
            manager,
            state,
        )
        .await?;
        outputs.extend(cdn_outputs);
    }

    println!();
    println!("{}", "✓ Deployment complete".green().bold());
    utils::print_outputs(&outputs);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn deploy_cdn(
    ctx: &Context,
    stack: &Stack,
    config: &etlflow_config::CdnConfig,
    outputs: &BTreeMap<String, String>,
    cli: &AwsCli,
    provisioner: &CloudFormation,
    tags: &BTreeMap<String, String>,
    manager: &StateManager,
    state: &mut GlobalState,
) -> anyhow::Result<BTreeMap<String, String>> {
    println!();
    println!("{}", "Deploying the CDN stack...".blue());

    let jupyter = match config.jupyter_origin {
        Some(_) => None,
        None => Some(
            origin_host(stack, cli, outputs, JUPYTER_URL_OUTPUT, "jupyterhub", "jupyter").await?,
        ),
    };
    let argo = match config.argo_origin {
        Some(_) => None,
        None => Some(
            origin_host(
                stack,
                cli,
                outputs,
                ARGO_URL_OUTPUT,
                "argo-argo-workflows-server",
                "argo",
            )
            .await?,
        ),
    };

    let cdn = cdn_stack(config, outputs, jupyter.as_deref(), argo.as_deref())?;
    let name = ctx.config.cdn_stack_name();
    let body = serde_json::to_string_pretty(&cdn.template(DESCRIPTION)?)?;
    let template = utils::write_template(&manager.state_dir(), &name, &body)?;
    provisioner
        .deploy(&StackDeployment::new(&name, template).with_tags(tags))
        .await?;
    let cdn_outputs = provisioner.outputs(&name).await?;

    let mut cdn_state = state
        .stack(&name)
        .cloned()
        .unwrap_or_else(|| StackState::new(&name));
    cdn_state.resources.clear();
    for resource in snapshot(&ResourceGraph::build(&cdn.group)?) {
        cdn_state.set_resource(resource);
    }
    cdn_state.outputs = cdn_outputs.clone();
    cdn_state.status = StackStatus::Deployed;
    state.set_stack(cdn_state);
    manager.save(state).await?;

    println!("  {} {}", "✓".green(), name);
    Ok(cdn_outputs)
}

/// Load balancer host of an ingress: the main stack output, else the live object
async fn origin_host(
    stack: &Stack,
    cli: &AwsCli,
    outputs: &BTreeMap<String, String>,
    output_key: &str,
    ingress: &str,
    namespace: &str,
) -> anyhow::Result<String> {
    if let Some(host) = outputs.get(output_key).and_then(|url| utils::host_of(url)) {
        return Ok(host.to_string());
    }
    info!(ingress, "Reading the load balancer host from the cluster");

    let mut args = vec!["eks", "update-kubeconfig", "--name", stack.cluster.name.as_str()];
    if let Some(region) = cli.region() {
        args.extend(["--region", region]);
    }
    cli.run(&args)
        .await
        .context("Cannot configure kubectl for the cluster")?;

    let (object, timeout) = utils::object_ref(&ObjectQuery::ingress_hostname(ingress, namespace));
    println!("  Waiting for {}...", object.to_string().cyan());
    let host = wait_for_object_value(
        &Kubectl::new(),
        &object,
        timeout,
        etlflow_cloud::lookup::DEFAULT_POLL_INTERVAL,
    )
    .await?;
    Ok(host)
}

/// Packages the template loads from the application code bucket
fn check_app_code(ctx: &Context) -> anyhow::Result<()> {
    let helper = ctx.deployment_dir().join(HELPER_CODE_KEY);
    if ctx.config.telemetry && !helper.is_file() {
        anyhow::bail!(
            "Telemetry is enabled but {} is missing. Package the solution helper there or set `telemetry: false`",
            helper.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use etlflow_config::StackConfig;
    use std::fs;
    use tempfile::TempDir;

    fn context(root: &TempDir, telemetry: bool) -> Context {
        let source_dir = root.path().join("source");
        fs::create_dir_all(root.path().join("deployment/app_code")).expect("app code dir");
        Context {
            config: StackConfig {
                telemetry,
                ..StackConfig::default()
            },
            source_dir,
            project_root: root.path().to_path_buf(),
            region: None,
        }
    }

    #[test]
    fn test_telemetry_needs_the_helper_package() {
        let root = TempDir::new().expect("tempdir");
        let ctx = context(&root, true);

        let err = check_app_code(&ctx).unwrap_err();
        assert!(format!("{err}").contains("solution_helper.zip"));

        fs::write(ctx.deployment_dir().join(HELPER_CODE_KEY), b"zip").expect("helper");
        assert!(check_app_code(&ctx).is_ok());
    }

    #[test]
    fn test_helper_package_is_optional_without_telemetry() {
        let root = TempDir::new().expect("tempdir");
        assert!(check_app_code(&context(&root, false)).is_ok());
    }
}
