//! AWS CLI backed CloudFormation engine
//!
//! Wraps the `aws` CLI commands etlflow needs: caller identity, stack
//! deploy/describe/delete and S3 sync.

use crate::error::{CloudError, Result};
use crate::provider::{AuthStatus, Provisioner, StackDeployment};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

pub const AWS_PROGRAM: &str = "aws";
pub const CAPABILITIES: [&str; 3] = [
    "CAPABILITY_IAM",
    "CAPABILITY_NAMED_IAM",
    "CAPABILITY_AUTO_EXPAND",
];
const TEMPLATE_PREFIX: &str = "templates";

/// `aws` CLI wrapper
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
    region: Option<String>,
}

impl AwsCli {
    pub fn new(region: Option<String>) -> Self {
        Self {
            program: AWS_PROGRAM.to_string(),
            region,
        }
    }

    /// Use another executable, e.g. a wrapper script
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Run an `aws` command and return stdout
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if let Some(region) = &self.region {
            cmd.arg("--region").arg(region);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!("Running: {} {}", self.program, args.join(" "));

        let output = cmd.output().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CloudError::ToolNotFound(self.program.clone()),
            _ => CloudError::Io(e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CloudError::CommandFailed {
                command: format!("{} {}", self.program, args.join(" ")),
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub async fn caller_identity(&self) -> Result<CallerIdentity> {
        let output = self
            .run(&["sts", "get-caller-identity", "--output", "json"])
            .await?;
        parse_json(&output, "sts get-caller-identity")
    }

    /// Region the CLI resolves when none is set explicitly
    pub async fn configured_region(&self) -> Result<String> {
        if let Some(region) = &self.region {
            return Ok(region.clone());
        }
        let output = self.run(&["configure", "get", "region"]).await?;
        let region = output.trim();
        if region.is_empty() {
            return Err(CloudError::InvalidResponse {
                source_name: "aws configure get region".to_string(),
                message: "no default region configured".to_string(),
            });
        }
        Ok(region.to_string())
    }

    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.run(&["s3api", "head-bucket", "--bucket", bucket]).await {
            Ok(_) => Ok(true),
            Err(CloudError::CommandFailed { message, .. }) if is_not_found(&message) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self
            .run(&["s3api", "head-object", "--bucket", bucket, "--key", key])
            .await
        {
            Ok(_) => Ok(true),
            Err(CloudError::CommandFailed { message, .. }) if is_not_found(&message) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fail with every key of `keys` that is not in `bucket`
    pub async fn require_objects<'a>(
        &self,
        bucket: &str,
        keys: impl IntoIterator<Item = &'a String>,
    ) -> Result<()> {
        let mut missing = Vec::new();
        for key in keys {
            if !self.object_exists(bucket, key).await? {
                missing.push(key.clone());
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        Err(CloudError::MissingObjects {
            bucket: bucket.to_string(),
            keys: missing,
        })
    }

    pub async fn make_bucket(&self, bucket: &str) -> Result<()> {
        let target = format!("s3://{bucket}");
        self.run(&["s3", "mb", &target]).await?;
        info!(bucket, "Created bucket");
        Ok(())
    }

    pub async fn sync(&self, dir: &Path, bucket: &str, prefix: &str) -> Result<()> {
        let source = dir.to_string_lossy().to_string();
        let target = s3_uri(bucket, prefix);
        self.run(&["s3", "sync", &source, &target, "--delete", "--only-show-errors"])
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    pub user_id: String,
    pub account: String,
    pub arn: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackOutput {
    output_key: String,
    output_value: String,
}

fn parse_json<T: serde::de::DeserializeOwned>(output: &str, source_name: &str) -> Result<T> {
    serde_json::from_str(output).map_err(|e| CloudError::InvalidResponse {
        source_name: source_name.to_string(),
        message: e.to_string(),
    })
}

fn is_not_found(message: &str) -> bool {
    message.contains("404") || message.contains("Not Found")
}

pub fn s3_uri(bucket: &str, prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("s3://{bucket}")
    } else {
        format!("s3://{bucket}/{prefix}")
    }
}

/// Default assets bucket for an account and region
pub fn default_assets_bucket(account: &str, region: &str) -> String {
    format!("etlflow-assets-{account}-{region}")
}

/// Arguments for `aws cloudformation deploy`
pub fn deploy_args(deployment: &StackDeployment) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "cloudformation".into(),
        "deploy".into(),
        "--stack-name".into(),
        deployment.stack_name.clone(),
        "--template-file".into(),
        deployment.template_path.to_string_lossy().to_string(),
        "--capabilities".into(),
    ];
    args.extend(CAPABILITIES.iter().map(|c| c.to_string()));
    args.push("--no-fail-on-empty-changeset".into());

    if let Some(bucket) = &deployment.artifact_bucket {
        args.push("--s3-bucket".into());
        args.push(bucket.clone());
        args.push("--s3-prefix".into());
        args.push(TEMPLATE_PREFIX.into());
    }
    if !deployment.parameters.is_empty() {
        args.push("--parameter-overrides".into());
        args.extend(
            deployment
                .parameters
                .iter()
                .map(|(k, v)| format!("{k}={v}")),
        );
    }
    if !deployment.tags.is_empty() {
        args.push("--tags".into());
        args.extend(deployment.tags.iter().map(|(k, v)| format!("{k}={v}")));
    }
    args
}

/// Parse `describe-stacks` output into name -> value
pub fn parse_outputs(output: &str) -> Result<BTreeMap<String, String>> {
    let trimmed = output.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(BTreeMap::new());
    }
    let outputs: Vec<StackOutput> = parse_json(trimmed, "cloudformation describe-stacks")?;
    Ok(outputs
        .into_iter()
        .map(|o| (o.output_key, o.output_value))
        .collect())
}

/// CloudFormation through the `aws` CLI
pub struct CloudFormation {
    cli: AwsCli,
}

impl CloudFormation {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    pub fn cli(&self) -> &AwsCli {
        &self.cli
    }
}

#[async_trait]
impl Provisioner for CloudFormation {
    fn name(&self) -> &str {
        "cloudformation"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        match self.cli.caller_identity().await {
            Ok(identity) => Ok(AuthStatus::ok(identity.account, identity.arn)),
            Err(CloudError::CommandFailed { message, .. }) => Ok(AuthStatus::failed(message)),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip_all, fields(stack = %deployment.stack_name))]
    async fn deploy(&self, deployment: &StackDeployment) -> Result<()> {
        let args = deploy_args(deployment);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        info!("Deploying stack");
        self.cli.run(&args).await?;
        info!("Stack deployed");
        Ok(())
    }

    async fn outputs(&self, stack_name: &str) -> Result<BTreeMap<String, String>> {
        let result = self
            .cli
            .run(&[
                "cloudformation",
                "describe-stacks",
                "--stack-name",
                stack_name,
                "--query",
                "Stacks[0].Outputs",
                "--output",
                "json",
            ])
            .await;
        match result {
            Ok(output) => parse_outputs(&output),
            Err(CloudError::CommandFailed { message, .. }) if message.contains("does not exist") => {
                Err(CloudError::StackNotFound(stack_name.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn destroy(&self, stack_name: &str) -> Result<()> {
        self.cli
            .run(&["cloudformation", "delete-stack", "--stack-name", stack_name])
            .await?;
        info!("Waiting for stack deletion");
        self.cli
            .run(&[
                "cloudformation",
                "wait",
                "stack-delete-complete",
                "--stack-name",
                stack_name,
            ])
            .await?;
        info!("Stack deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn upload_assets(&self, dir: &Path, bucket: &str, prefix: &str) -> Result<()> {
        if !self.cli.bucket_exists(bucket).await? {
            self.cli.make_bucket(bucket).await?;
        }
        self.cli.sync(dir, bucket, prefix).await?;
        info!(target = %s3_uri(bucket, prefix), "Uploaded assets");
        Ok(())
    }
}
