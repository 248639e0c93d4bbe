//! Orchestration root
//!
//! Builds the whole provisioning plan in a fixed order:
//!
//! 1. login secret, code bucket and image pipeline
//! 2. network and identity
//! 3. cluster
//! 4. controller service accounts, then the base add-ons
//! 5. Spark permissions, once the secret synchronizer is installed
//! 6. JupyterHub, its configuration, Argo and the workflow template
//! 7. load balancer hostname lookups and telemetry, when enabled
//!
//! The CDN layer is a separate template, see [`crate::edge`].

use crate::addons::{self, AppSettings, BaseApps, EtlApps};
use crate::artifact::{self, ImagePipeline, Storage};
use crate::cluster::{self, Cluster};
use crate::error::Result;
use crate::handler::{ASSETS_BUCKET_PARAM, HANDLER_CODE_PREFIX};
use crate::identity::{self, Identity};
use crate::network::{self, Network};
use crate::service_account::{self, ControllerAccounts};
use crate::spark_permission::{self, BucketSetting, SparkPermission};
use crate::telemetry::{self, Metrics, Telemetry};
use etlflow_config::StackConfig;
use etlflow_core::{
    Group, ManifestLoader, Output, Ref, RemovalPolicy, Resource, ResourceGraph, ResourceKind,
    Template, apply_tag, aws,
};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

pub const DESCRIPTION: &str = "(SO0141) SQL based ETL with Apache Spark on Amazon EKS. This solution provides a SQL based ETL option with a open-source declarative framework powered by Apache Spark.";
pub const LOGIN_NAME: &str = "sparkoneks";
pub const PROJECT_TAG: (&str, &str) = ("project", "sqlbasedetl");
pub const KEY_ALIAS: &str = "alias/secretsManager";

/// Directory with the application code, next to the source directory
pub fn app_code_dir(source_dir: &Path) -> PathBuf {
    source_dir
        .parent()
        .unwrap_or(source_dir)
        .join("deployment")
        .join("app_code")
}

/// Name of the generated notebook login secret
pub fn login_secret_name(cluster_name: &str) -> String {
    format!("jHubPwd-{cluster_name}")
}

#[derive(Debug, Clone)]
pub struct Stack {
    pub name: String,
    pub root: Group,
    pub secret: Ref,
    pub storage: Storage,
    pub image: ImagePipeline,
    pub network: Network,
    pub identity: Identity,
    pub cluster: Cluster,
    pub accounts: ControllerAccounts,
    pub base: BaseApps,
    pub permission: SparkPermission,
    pub apps: EtlApps,
    pub telemetry: Option<Telemetry>,
    outputs: Vec<Output>,
}

impl Stack {
    /// Validated dependency graph of every resource
    pub fn graph(&self) -> Result<ResourceGraph> {
        Ok(ResourceGraph::build(&self.root)?)
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Template sections outside `Resources`
    pub fn sections(&self) -> Template {
        let mut template = Template::new().with_description(DESCRIPTION);
        template.add_parameter(
            ASSETS_BUCKET_PARAM,
            json!({
                "Type": "String",
                "Description": "Bucket holding handler code and application assets",
            }),
        );
        if let Some(telemetry) = &self.telemetry {
            telemetry.register(&mut template);
        }
        for output in &self.outputs {
            template.add_output(output.clone());
        }
        template
    }

    /// Synthesized CloudFormation template
    pub fn template(&self) -> Result<Value> {
        Ok(self.sections().render(&self.graph()?))
    }

    pub fn template_json(&self) -> Result<String> {
        Ok(self.sections().render_json(&self.graph()?)?)
    }

    /// Assets bucket keys of the packaged handler code the template refers to
    pub fn handler_keys(&self) -> Result<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        collect_handler_keys(&self.template()?["Resources"], &mut keys);
        Ok(keys)
    }
}

fn collect_handler_keys(value: &Value, keys: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (name, inner) in map {
                match inner {
                    Value::String(key)
                        if name == "S3Key"
                            && key.starts_with(&format!("{HANDLER_CODE_PREFIX}/")) =>
                    {
                        keys.insert(key.clone());
                    }
                    _ => collect_handler_keys(inner, keys),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_handler_keys(item, keys)),
        _ => {}
    }
}

fn login_secret(root: &mut Group, cluster_name: &str) -> Ref {
    let key = root.add(
        Resource::new(
            "KMSKey",
            ResourceKind::KmsKey,
            json!({
                "EnableKeyRotation": true,
                "KeyPolicy": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": {
                            "AWS": format!("arn:{}:iam::{}:root", aws::PARTITION, aws::ACCOUNT_ID),
                        },
                        "Action": "kms:*",
                        "Resource": "*",
                    }],
                },
            }),
        )
        .with_removal(RemovalPolicy::Destroy),
    );
    root.add(Resource::new(
        "KMSKey/Alias",
        ResourceKind::KmsAlias,
        json!({ "AliasName": KEY_ALIAS, "TargetKeyId": key.attr("Arn") }),
    ));
    root.add(
        Resource::new(
            "jHubPwd",
            ResourceKind::Secret,
            json!({
                "Name": login_secret_name(cluster_name),
                "KmsKeyId": key.attr("Arn"),
                "GenerateSecretString": {
                    "SecretStringTemplate": json!({ "username": LOGIN_NAME }).to_string(),
                    "GenerateStringKey": "password",
                    "ExcludePunctuation": true,
                },
            }),
        )
        .with_removal(RemovalPolicy::Destroy),
    )
}

/// Build the full plan for `config`, reading templates through `loader`
#[instrument(skip_all, fields(stack = %config.stack_name, cluster = %config.cluster_name))]
pub fn build_stack(config: &StackConfig, loader: &ManifestLoader) -> Result<Stack> {
    let cluster_name = config.cluster_name.as_str();
    let mut root = Group::new("");

    let secret = login_secret(&mut root, cluster_name);

    let storage = artifact::storage_layer(&app_code_dir(loader.source_dir()))?;
    let image = artifact::image_pipeline(&storage);

    let network = network::network_layer(cluster_name, &storage.bucket);
    let identity = identity::identity_layer(cluster_name);

    let mut cluster = cluster::cluster_layer(cluster_name, &network, &identity);
    cluster.group.add_dependency(network::GROUP);
    cluster.group.add_dependency(identity::GROUP);

    let accounts = service_account::controller_service_accounts(&cluster, loader, &secret)?;
    let base = addons::base_apps(&cluster, &network, &accounts, loader)?;

    let buckets = BucketSetting::new(storage.code_bucket(), config.datalake_bucket());
    let mut permission =
        spark_permission::spark_permission(&cluster, loader, LOGIN_NAME, &buckets)?;
    permission.group.add_dependency(base.secret_controller.path());

    let apps = addons::etl_apps(
        &cluster,
        &network,
        loader,
        &AppSettings {
            code_bucket: storage.code_bucket(),
            jupyter_sa: permission.jupyter_sa(),
            secret_name: login_secret_name(cluster_name),
            permissions: spark_permission::GROUP,
            lookup_hostnames: config.lookup_hostnames,
        },
    )?;

    let telemetry = config.telemetry.then(|| {
        telemetry::telemetry_layer(
            &Metrics {
                solution: config.solution_id.clone(),
                version: config.version.clone(),
                use_datalake_bucket: config.datalake_bucket().is_some(),
                use_cicd: true,
                azs: network.availability_zones(),
            },
            &storage,
        )
    });

    let mut outputs = vec![
        Output::new("CODE_BUCKET", storage.code_bucket()),
        Output::new("IMAGE_URI", image.image_uri()),
    ];
    if let Some(argo) = &apps.argo_alb {
        outputs.push(Output::new(
            "ARGO_URL",
            format!("http://{}:{}", argo.attr("Value"), network::ARGO_ALB_PORT),
        ));
    }
    if let Some(jhub) = &apps.jhub_alb {
        outputs.push(Output::new("JUPYTER_URL", format!("http://{}", jhub.attr("Value"))));
    }

    root.add_group(storage.group.clone());
    root.add_group(image.group.clone());
    root.add_group(network.group.clone());
    root.add_group(identity.group.clone());
    root.add_group(cluster.group.clone());
    root.add_group(accounts.group.clone());
    root.add_group(base.group.clone());
    root.add_group(permission.group.clone());
    root.add_group(apps.group.clone());
    if let Some(t) = &telemetry {
        root.add_group(t.group.clone());
    }

    apply_tag(&mut root, PROJECT_TAG.0, PROJECT_TAG.1);
    for (key, value) in &config.tags {
        apply_tag(&mut root, key, value);
    }

    info!(
        resources = root.resources().len(),
        telemetry = config.telemetry,
        "Built provisioning plan"
    );
    Ok(Stack {
        name: config.stack_name.clone(),
        root,
        secret,
        storage,
        image,
        network,
        identity,
        cluster,
        accounts,
        base,
        permission,
        apps,
        telemetry,
        outputs,
    })
}
