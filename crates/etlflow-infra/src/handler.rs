//! Lambda-backed custom resource handlers
//!
//! Custom resources (Kubernetes objects, bucket deployment, SDK calls,
//! telemetry) are served by Lambda functions whose code is published to the
//! assets bucket before deployment.

use crate::iam;
use etlflow_core::{Group, Ref, Resource, ResourceKind, logical_id};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Template parameter naming the bucket that holds handler code and assets
pub const ASSETS_BUCKET_PARAM: &str = "AssetsBucket";

/// Key prefix of the packaged handler code in the assets bucket
pub const HANDLER_CODE_PREFIX: &str = "handlers";

pub const DEFAULT_RUNTIME: &str = "python3.11";

/// What a handler function needs
#[derive(Debug, Clone)]
pub struct HandlerSpec {
    pub id: String,
    pub description: String,
    /// Object key of the zipped code
    pub code_key: String,
    /// Bucket holding the code. Defaults to the assets bucket parameter.
    pub code_bucket: Option<String>,
    pub handler: String,
    pub timeout_seconds: u32,
    pub statements: Vec<Value>,
    pub environment: BTreeMap<String, String>,
}

impl HandlerSpec {
    pub fn new(id: &str, code_key: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            code_key: code_key.to_string(),
            code_bucket: None,
            handler: "index.handler".to_string(),
            timeout_seconds: 900,
            statements: Vec::new(),
            environment: BTreeMap::new(),
        }
    }

    pub fn with_statements(mut self, statements: Vec<Value>) -> Self {
        self.statements = statements;
        self
    }

    pub fn with_code_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.code_bucket = Some(bucket.into());
        self
    }

    pub fn with_handler(mut self, handler: &str) -> Self {
        self.handler = handler.to_string();
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.environment.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Handler {
    pub role: Ref,
    pub function: Ref,
}

impl Handler {
    /// Value for a custom resource's `ServiceToken`
    pub fn service_token(&self) -> String {
        self.function.attr("Arn")
    }
}

/// Add the execution role, its policy and the function to `group`
pub fn add_handler(group: &mut Group, spec: HandlerSpec) -> Handler {
    let role_path = group.child_path(&format!("{}Role", spec.id));
    let role = group.add(Resource::new(
        role_path.clone(),
        ResourceKind::Role,
        json!({
            "AssumeRolePolicyDocument": iam::service_trust("lambda.amazonaws.com"),
            "ManagedPolicyArns": [iam::managed_policy_arn("service-role/AWSLambdaBasicExecutionRole")],
        }),
    ));

    let mut depends = Vec::new();
    if !spec.statements.is_empty() {
        let wildcard = iam::has_wildcard_resource(&spec.statements);
        let policy_path = format!("{role_path}/DefaultPolicy");
        let mut policy = Resource::new(
            policy_path.clone(),
            ResourceKind::Policy,
            iam::policy_properties(
                &format!("{}DefaultPolicy", logical_id(&spec.id)),
                &[&role],
                spec.statements,
            ),
        );
        if wildcard {
            policy = policy.suppress(
                iam::W12_ID,
                "the handler API calls do not support resource-level permissions",
            );
        }
        group.add(policy);
        depends.push(policy_path);
    }

    let bucket = spec
        .code_bucket
        .unwrap_or_else(|| format!("${{{ASSETS_BUCKET_PARAM}}}"));
    let mut function = Resource::new(
        group.child_path(&spec.id),
        ResourceKind::Function,
        json!({
            "Description": spec.description,
            "Runtime": DEFAULT_RUNTIME,
            "Handler": spec.handler,
            "Timeout": spec.timeout_seconds,
            "Role": role.attr("Arn"),
            "Code": { "S3Bucket": bucket, "S3Key": spec.code_key },
        }),
    )
    .suppress("W58", "service role has permission to write logs to CloudWatch")
    .suppress("W89", "internal function does not need to associate to VPC")
    .suppress("W92", "reserved concurrency is not needed for a deployment-time handler");
    if !spec.environment.is_empty() {
        function.properties["Environment"] = json!({ "Variables": spec.environment });
    }
    for dep in depends {
        function.add_dependency(dep);
    }
    let function = group.add(function);

    Handler { role, function }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_without_statements() {
        let mut group = Group::new("eks_cluster");
        let h = add_handler(
            &mut group,
            HandlerSpec::new("KubectlHandler", "handlers/kubectl.zip", "kubectl"),
        );

        assert_eq!(group.resources().len(), 2);
        assert_eq!(h.service_token(), "${EksclusterKubectlHandler.Arn}");
        let f = group.find("eks_cluster/KubectlHandler").unwrap();
        assert_eq!(f.properties["Code"]["S3Bucket"], "${AssetsBucket}");
        assert_eq!(f.properties["Role"], "${EksclusterKubectlHandlerRole.Arn}");
    }

    #[test]
    fn test_handler_with_wildcard_policy() {
        let mut group = Group::new("network-sg");
        add_handler(
            &mut group,
            HandlerSpec::new("PrefixListHandler", "handlers/aws-sdk.zip", "sdk")
                .with_statements(vec![iam::allow(&["ec2:DescribeManagedPrefixLists"], &["*"])])
                .with_code_bucket("my-bucket"),
        );

        let policy = group
            .find("network-sg/PrefixListHandlerRole/DefaultPolicy")
            .unwrap();
        assert_eq!(policy.suppressions[0].id, "W12");
        let f = group.find("network-sg/PrefixListHandler").unwrap();
        assert_eq!(f.depends_on, vec!["network-sg/PrefixListHandlerRole/DefaultPolicy"]);
        assert_eq!(f.properties["Code"]["S3Bucket"], "my-bucket");
    }
}
