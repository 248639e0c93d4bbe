//! Application code bucket and the container image pipeline

use crate::error::{InfraError, Result};
use crate::handler::{self, ASSETS_BUCKET_PARAM, HandlerSpec};
use crate::iam;
use etlflow_core::{Group, Ref, RemovalPolicy, Resource, ResourceKind, aws};
use serde_json::json;
use std::path::Path;
use tracing::{debug, instrument};

pub const STORAGE_GROUP: &str = "appcode";
pub const IMAGE_GROUP: &str = "image";

/// Key prefix of the application code, in the code bucket and in the assets bucket
pub const APP_CODE_PREFIX: &str = "app_code";
pub const BUILD_PROJECT_NAME: &str = "BuildArcDockerImage";
pub const BUILD_SOURCE_KEY: &str = "app_code/ecr_build_src.zip";

const BUCKET_READ_WRITE: [&str; 6] = [
    "s3:GetObject*",
    "s3:GetBucket*",
    "s3:List*",
    "s3:DeleteObject*",
    "s3:PutObject*",
    "s3:Abort*",
];

const ECR_PULL_PUSH: [&str; 7] = [
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:BatchGetImage",
    "ecr:PutImage",
    "ecr:InitiateLayerUpload",
    "ecr:UploadLayerPart",
    "ecr:CompleteLayerUpload",
];

/// Relative paths of every file under `dir`, sorted, with `/` separators
#[instrument(fields(dir = %dir.display()))]
pub fn discover_assets(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(InfraError::AssetDirNotFound(dir.to_path_buf()));
    }
    let pattern = dir.join("**").join("*");
    let mut files = Vec::new();
    for entry in glob::glob(&pattern.to_string_lossy())? {
        let path = entry.map_err(|e| InfraError::AssetScan(e.to_string()))?;
        if !path.is_file() {
            continue;
        }
        let relative = path
            .strip_prefix(dir)
            .map_err(|e| InfraError::AssetScan(e.to_string()))?;
        let key: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        files.push(key.join("/"));
    }
    files.sort();
    debug!(count = files.len(), "Discovered application assets");
    Ok(files)
}

#[derive(Debug, Clone)]
pub struct Storage {
    pub group: Group,
    pub bucket: Ref,
    /// Copies the application code into the bucket
    pub deployment: Ref,
    pub assets: Vec<String>,
}

impl Storage {
    /// Deploy-time bucket name
    pub fn code_bucket(&self) -> String {
        self.bucket.id()
    }
}

/// Private, versioned, encrypted bucket holding the code found under `asset_dir`
pub fn storage_layer(asset_dir: &Path) -> Result<Storage> {
    let assets = discover_assets(asset_dir)?;
    let mut group = Group::new(STORAGE_GROUP);

    let bucket = group.add(
        Resource::new(
            group.child_path("appcode"),
            ResourceKind::Bucket,
            json!({
                "AccessControl": "LogDeliveryWrite",
                "BucketEncryption": {
                    "ServerSideEncryptionConfiguration": [{
                        "ServerSideEncryptionByDefault": { "SSEAlgorithm": "aws:kms" },
                    }],
                },
                "PublicAccessBlockConfiguration": {
                    "BlockPublicAcls": true,
                    "BlockPublicPolicy": true,
                    "IgnorePublicAcls": true,
                    "RestrictPublicBuckets": true,
                },
                "VersioningConfiguration": { "Status": "Enabled" },
            }),
        )
        .with_removal(RemovalPolicy::Retain)
        .suppress("W35", "bucket access log stops bucket removal, disable for now")
        .suppress("W51", "bucket access is controled by IAM level"),
    );

    let bucket_arn = bucket.attr("Arn");
    let bucket_objects = format!("{bucket_arn}/*");
    let assets_arn = format!("arn:{}:s3:::${{{ASSETS_BUCKET_PARAM}}}", aws::PARTITION);
    let assets_objects = format!("{assets_arn}/*");
    let copier = handler::add_handler(
        &mut group,
        HandlerSpec::new(
            "BucketDeploymentHandler",
            "handlers/bucket-deployment.zip",
            "Copies application code from the assets bucket into the code bucket",
        )
        .with_statements(vec![
            iam::allow(
                &["s3:GetObject*", "s3:GetBucket*", "s3:List*"],
                &[assets_arn.as_str(), assets_objects.as_str()],
            ),
            iam::allow(&BUCKET_READ_WRITE, &[bucket_arn.as_str(), bucket_objects.as_str()]),
        ]),
    );

    let deployment = group.add(Resource::new(
        group.child_path("DeployCode"),
        ResourceKind::BucketDeployment,
        json!({
            "ServiceToken": copier.service_token(),
            "SourceBucketNames": [format!("${{{ASSETS_BUCKET_PARAM}}}")],
            "SourceKeyPrefix": format!("{APP_CODE_PREFIX}/"),
            "SourceObjectKeys": &assets,
            "DestinationBucketName": bucket.id(),
            "DestinationBucketKeyPrefix": APP_CODE_PREFIX,
            "Prune": true,
        }),
    ));

    Ok(Storage {
        group,
        bucket,
        deployment,
        assets,
    })
}

#[derive(Debug, Clone)]
pub struct ImagePipeline {
    pub group: Group,
    pub repository: Ref,
    pub project: Ref,
    pub pipeline: Ref,
}

impl ImagePipeline {
    pub fn image_uri(&self) -> String {
        self.repository.attr("RepositoryUri")
    }
}

/// Two-stage pipeline: poll the source archive in the code bucket, then build and push the image
pub fn image_pipeline(storage: &Storage) -> ImagePipeline {
    let mut group = Group::new(IMAGE_GROUP);
    group.add_dependency(STORAGE_GROUP);

    let repository = group.add(Resource::new(
        group.child_path("ECRRepo"),
        ResourceKind::Repository,
        json!({ "ImageScanningConfiguration": { "ScanOnPush": true } }),
    ));

    let bucket_arn = storage.bucket.attr("Arn");
    let bucket_objects = format!("{bucket_arn}/*");
    let repository_arn = repository.attr("Arn");
    let project_path = group.child_path("DockerBuild");

    let build_role = group.add(Resource::new(
        group.child_path("DockerBuild/Role"),
        ResourceKind::Role,
        json!({ "AssumeRolePolicyDocument": iam::service_trust("codebuild.amazonaws.com") }),
    ));
    let log_group = format!(
        "arn:{}:logs:{}:{}:log-group:/aws/codebuild/{}",
        aws::PARTITION,
        aws::REGION,
        aws::ACCOUNT_ID,
        BUILD_PROJECT_NAME
    );
    let log_streams = format!("{log_group}:*");
    let build_policy_path = group.child_path("DockerBuild/Role/DefaultPolicy");
    group.add(
        Resource::new(
            build_policy_path.clone(),
            ResourceKind::Policy,
            iam::policy_properties(
                "DockerBuildRoleDefaultPolicy",
                &[&build_role],
                vec![
                    iam::allow(
                        &["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
                        &[log_group.as_str(), log_streams.as_str()],
                    ),
                    iam::allow(&BUCKET_READ_WRITE, &[bucket_arn.as_str(), bucket_objects.as_str()]),
                    iam::allow(&ECR_PULL_PUSH, &[repository_arn.as_str()]),
                    iam::allow(&["ecr:GetAuthorizationToken"], &["*"]),
                ],
            ),
        )
        .suppress(
            iam::W12_ID,
            "the role for action of ecr:GetAuthorizationToken requires * resource",
        )
        .suppress("W76", "the IAM policy is complex, need to be higher than 25"),
    );

    let project = group.add(
        Resource::new(
            project_path,
            ResourceKind::BuildProject,
            json!({
                "Name": BUILD_PROJECT_NAME,
                "Description": "Pipeline for docker build",
                "ServiceRole": build_role.attr("Arn"),
                "Source": { "Type": "CODEPIPELINE", "BuildSpec": "buildspec.yaml" },
                "Artifacts": { "Type": "CODEPIPELINE" },
                "Environment": {
                    "Type": "LINUX_CONTAINER",
                    "Image": "aws/codebuild/amazonlinux2-x86_64-standard:3.0",
                    "ComputeType": "BUILD_GENERAL1_SMALL",
                    "PrivilegedMode": true,
                    "EnvironmentVariables": [{
                        "Name": "REPO_ECR",
                        "Type": "PLAINTEXT",
                        "Value": repository.attr("RepositoryUri"),
                    }],
                },
                "TimeoutInMinutes": 60,
            }),
        )
        .with_dependency(build_policy_path),
    );

    let pipeline_role = group.add(Resource::new(
        group.child_path("Pipeline/Role"),
        ResourceKind::Role,
        json!({ "AssumeRolePolicyDocument": iam::service_trust("codepipeline.amazonaws.com") }),
    ));
    let project_arn = project.attr("Arn");
    let pipeline_policy_path = group.child_path("Pipeline/Role/DefaultPolicy");
    group.add(Resource::new(
        pipeline_policy_path.clone(),
        ResourceKind::Policy,
        iam::policy_properties(
            "PipelineRoleDefaultPolicy",
            &[&pipeline_role],
            vec![
                iam::allow(&BUCKET_READ_WRITE, &[bucket_arn.as_str(), bucket_objects.as_str()]),
                iam::allow(
                    &["codebuild:BatchGetBuilds", "codebuild:StartBuild", "codebuild:StopBuild"],
                    &[project_arn.as_str()],
                ),
            ],
        ),
    ));

    let pipeline = group.add(
        Resource::new(
            group.child_path("Pipeline"),
            ResourceKind::Pipeline,
            json!({
                "Name": BUILD_PROJECT_NAME,
                "RoleArn": pipeline_role.attr("Arn"),
                "ArtifactStore": { "Type": "S3", "Location": storage.code_bucket() },
                "Stages": [
                    {
                        "Name": "Source",
                        "Actions": [{
                            "Name": "S3Trigger",
                            "ActionTypeId": {
                                "Category": "Source",
                                "Owner": "AWS",
                                "Provider": "S3",
                                "Version": "1",
                            },
                            "Configuration": {
                                "S3Bucket": storage.code_bucket(),
                                "S3ObjectKey": BUILD_SOURCE_KEY,
                                "PollForSourceChanges": true,
                            },
                            "OutputArtifacts": [{ "Name": "src" }],
                            "RunOrder": 1,
                        }],
                    },
                    {
                        "Name": "Build",
                        "Actions": [{
                            "Name": "DockerImageBuild",
                            "ActionTypeId": {
                                "Category": "Build",
                                "Owner": "AWS",
                                "Provider": "CodeBuild",
                                "Version": "1",
                            },
                            "Configuration": { "ProjectName": project.id() },
                            "InputArtifacts": [{ "Name": "src" }],
                            "RunOrder": 1,
                        }],
                    },
                ],
            }),
        )
        .with_dependency(pipeline_policy_path),
    );

    ImagePipeline {
        group,
        repository,
        project,
        pipeline,
    }
}
