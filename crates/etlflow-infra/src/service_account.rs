//! Service accounts bound to IAM roles (IRSA)
//!
//! Every binding is declared in a fixed order: IAM role, Kubernetes service
//! account, optional RBAC documents, then the role's inline policy. Each
//! step waits for the previous one.

use crate::cluster::Cluster;
use crate::error::Result;
use crate::iam;
use etlflow_core::{Fields, Group, ManifestLoader, Ref, Resource, ResourceKind};
use serde_json::{Value, json};
use tracing::debug;

pub const GROUP: &str = "eks_sa";

#[derive(Debug, Clone, Default)]
pub struct ServiceAccountSpec {
    /// Construct id, unique within the parent group
    pub id: String,
    pub namespace: String,
    pub name: String,
    pub statements: Vec<Value>,
    /// Documents applied once the account exists, typically role bindings
    pub rbac: Vec<Value>,
    /// Paths the IAM role waits for (namespace manifests, secrets)
    pub wait_for: Vec<String>,
    /// Extra `cfn_nag` findings accepted on the policy
    pub suppressions: Vec<(String, String)>,
}

impl ServiceAccountSpec {
    pub fn new(id: &str, namespace: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn statements(mut self, statements: Vec<Value>) -> Self {
        self.statements = statements;
        self
    }

    pub fn rbac(mut self, documents: Vec<Value>) -> Self {
        self.rbac = documents;
        self
    }

    pub fn wait_for(mut self, path: impl Into<String>) -> Self {
        self.wait_for.push(path.into());
        self
    }

    pub fn suppress(mut self, id: &str, reason: &str) -> Self {
        self.suppressions.push((id.to_string(), reason.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServiceAccount {
    /// Path of the subtree holding every resource of this binding
    pub path: String,
    pub namespace: String,
    pub name: String,
    pub role: Ref,
    pub account: Ref,
    pub rbac: Option<Ref>,
    pub policy: Ref,
}

/// Declare a service account bound to its own IAM role under `parent`
pub fn add_service_account(
    parent: &mut Group,
    cluster: &Cluster,
    spec: ServiceAccountSpec,
) -> ServiceAccount {
    let mut group = Group::new(parent.child_path(&spec.id));
    let subject = format!("system:serviceaccount:{}:{}", spec.namespace, spec.name);

    let issuer = cluster.oidc_issuer();
    let condition = group.add(Resource::new(
        group.child_path("ConditionJson"),
        ResourceKind::Custom("AWSCDKCfnJson".into()),
        json!({
            "ServiceToken": cluster.cfn_utils.service_token(),
            "Value": {
                "Fn::Join": ["", [
                    "{\"StringEquals\":{\"", issuer.clone(),
                    format!(":sub\":\"{subject}\",\""), issuer,
                    ":aud\":\"sts.amazonaws.com\"}}",
                ]],
            },
        }),
    ));

    let mut role = Resource::new(
        group.child_path("Role"),
        ResourceKind::Role,
        json!({
            "AssumeRolePolicyDocument": iam::policy_document(vec![json!({
                "Effect": "Allow",
                "Principal": { "Federated": cluster.oidc_provider.id() },
                "Action": "sts:AssumeRoleWithWebIdentity",
                "Condition": condition.get_att("Value"),
            })]),
        }),
    );
    for path in &spec.wait_for {
        role.add_dependency(path.clone());
    }
    let role_path = role.path.clone();
    let role = group.add(role);

    let account_doc = json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
            "labels": { "app.kubernetes.io/name": spec.name },
            "annotations": { "eks.amazonaws.com/role-arn": role.attr("Arn") },
        },
    });
    let account_path = group.child_path("manifest-ServiceAccountResource");
    let account = group.add(
        cluster
            .manifest(account_path.clone(), vec![account_doc])
            .with_dependency(role_path),
    );

    let mut last = account_path;
    let rbac = if spec.rbac.is_empty() {
        None
    } else {
        let rbac_path = group.child_path("RoleBinding");
        let r = group.add(
            cluster
                .manifest(rbac_path.clone(), spec.rbac)
                .with_dependency(last.clone()),
        );
        last = rbac_path;
        Some(r)
    };

    let wildcard = iam::has_wildcard_resource(&spec.statements);
    let mut policy = Resource::new(
        group.child_path("Role/DefaultPolicy"),
        ResourceKind::Policy,
        iam::policy_properties(
            &format!("{}RoleDefaultPolicy", spec.id),
            &[&role],
            spec.statements,
        ),
    )
    .with_dependency(last);
    if wildcard {
        policy = policy.suppress(
            iam::W12_ID,
            format!("by default the role {} has * resource", spec.name),
        );
    }
    for (id, reason) in spec.suppressions {
        if !policy.suppressions.iter().any(|s| s.id == id) {
            policy = policy.suppress(id, reason);
        }
    }
    let policy = group.add(policy);

    let path = group.path.clone();
    parent.add_group(group);
    ServiceAccount {
        path,
        namespace: spec.namespace,
        name: spec.name,
        role,
        account,
        rbac,
        policy,
    }
}

/// Service accounts of the cluster controllers, all in `kube-system`
#[derive(Debug, Clone)]
pub struct ControllerAccounts {
    pub group: Group,
    pub autoscaler: ServiceAccount,
    pub alb: ServiceAccount,
    pub secrets: ServiceAccount,
}

/// Cluster autoscaler, load balancer controller and secret synchronizer
///
/// The secret synchronizer may read `secret` and waits for it.
pub fn controller_service_accounts(
    cluster: &Cluster,
    loader: &ManifestLoader,
    secret: &Ref,
) -> Result<ControllerAccounts> {
    let mut group = Group::new(GROUP);
    group.add_dependency(crate::cluster::GROUP);

    let scaler_statements = iam::statements_from_manifest(
        loader.load("autoscaler-iam-role.yaml", false)?,
        "autoscaler-iam-role.yaml",
    )?;
    let autoscaler = add_service_account(
        &mut group,
        cluster,
        ServiceAccountSpec::new("AutoScalerSa", "kube-system", "cluster-autoscaler")
            .statements(scaler_statements),
    );

    let alb_statements =
        iam::statements_from_manifest(loader.load("alb-iam-role.yaml", false)?, "alb-iam-role.yaml")?;
    let alb = add_service_account(
        &mut group,
        cluster,
        ServiceAccountSpec::new("ALBServiceAcct", "kube-system", "alb-aws-load-balancer-controller")
            .statements(alb_statements)
            .suppress("W76", "standard IAM role offered by ALB ingress controller"),
    );

    let fields = Fields::new().with("{{secretsmanager}}", format!("{}*", secret.id()));
    let secret_statements = iam::statements_from_manifest(
        loader.load_with("ex-secret-iam-role.yaml", &fields, false)?,
        "ex-secret-iam-role.yaml",
    )?;
    let secrets = add_service_account(
        &mut group,
        cluster,
        ServiceAccountSpec::new("ExSecretController", "kube-system", "external-secrets-controller")
            .statements(secret_statements)
            .wait_for(secret.path()),
    );

    debug!(accounts = 3, "Built controller service accounts");
    Ok(ControllerAccounts {
        group,
        autoscaler,
        alb,
        secrets,
    })
}
