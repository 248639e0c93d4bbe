use crate::context::Context;
use crate::utils;
use colored::Colorize;
use etlflow_cloud::{AwsCli, CloudError, CloudFormation, Provisioner};
use std::collections::BTreeMap;
use tracing::debug;

pub async fn handle(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let provisioner = CloudFormation::new(AwsCli::new(ctx.region.clone()));

    let mut outputs: BTreeMap<String, String> =
        provisioner.outputs(&ctx.config.stack_name).await?;

    // https endpoints replace the plain load balancer URLs
    let cdn_name = ctx.config.cdn_stack_name();
    match provisioner.outputs(&cdn_name).await {
        Ok(cdn) => outputs.extend(cdn),
        Err(CloudError::StackNotFound(_)) => debug!(stack = %cdn_name, "No CDN stack"),
        Err(e) => return Err(e.into()),
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else {
        println!("{}", ctx.config.stack_name.bold());
        utils::print_outputs(&outputs);
    }
    Ok(())
}
