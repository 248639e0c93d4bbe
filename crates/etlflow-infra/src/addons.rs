//! Helm add-ons and the manifests that configure them
//!
//! Two stages: the base controllers (load balancer, secret synchronizer,
//! autoscaler, Spark operator) and the ETL applications (JupyterHub, its
//! configuration, Argo Workflows and the Spark workflow template).

use crate::cluster::{Cluster, ObjectQuery};
use crate::error::Result;
use crate::network::Network;
use crate::service_account::ControllerAccounts;
use etlflow_core::{Fields, Group, ManifestLoader, Ref, Resource, ResourceKind, aws};
use serde_json::{Value, json};
use tracing::debug;

pub const BASE_GROUP: &str = "eks_base_app";
pub const APPS_GROUP: &str = "etl_apps";

/// A pinned chart release
#[derive(Debug, Clone)]
pub struct HelmRelease {
    pub id: String,
    pub chart: String,
    pub repository: String,
    pub release: String,
    pub version: Option<String>,
    pub namespace: String,
    pub create_namespace: bool,
    pub values: Value,
}

impl HelmRelease {
    pub fn new(id: &str, chart: &str, repository: &str, release: &str, namespace: &str) -> Self {
        Self {
            id: id.to_string(),
            chart: chart.to_string(),
            repository: repository.to_string(),
            release: release.to_string(),
            version: None,
            namespace: namespace.to_string(),
            create_namespace: false,
            values: json!({}),
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn create_namespace(mut self) -> Self {
        self.create_namespace = true;
        self
    }

    pub fn values(mut self, values: Value) -> Self {
        self.values = values;
        self
    }
}

/// Chart resource installing `release` on the cluster
pub fn helm_chart(cluster: &Cluster, path: impl Into<String>, release: &HelmRelease) -> Resource {
    let mut props = cluster.kubectl_properties();
    props.insert("Chart".into(), json!(release.chart));
    props.insert("Repository".into(), json!(release.repository));
    props.insert("Release".into(), json!(release.release));
    if let Some(version) = &release.version {
        props.insert("Version".into(), json!(version));
    }
    props.insert("Namespace".into(), json!(release.namespace));
    props.insert("CreateNamespace".into(), json!(release.create_namespace));
    props.insert("Values".into(), release.values.clone());
    props.insert("Wait".into(), json!(false));
    Resource::new(path, ResourceKind::HelmChart, Value::Object(props))
        .with_dependency(cluster.access_entry_path().to_string())
}

#[derive(Debug, Clone)]
pub struct BaseApps {
    pub group: Group,
    pub alb: Ref,
    /// Secret synchronizer; the Spark permissions wait for it
    pub secret_controller: Ref,
    pub autoscaler: Ref,
    pub spark_operator: Ref,
}

pub fn base_apps(
    cluster: &Cluster,
    network: &Network,
    accounts: &ControllerAccounts,
    loader: &ManifestLoader,
) -> Result<BaseApps> {
    let mut group = Group::new(BASE_GROUP);

    let alb_fields = Fields::new()
        .with("{{region_name}}", aws::REGION)
        .with("{{cluster_name}}", cluster.name.clone())
        .with("{{vpc_id}}", network.vpc_id());
    let alb_release = HelmRelease::new(
        "ALBChart",
        "aws-load-balancer-controller",
        "https://aws.github.io/eks-charts",
        "alb",
        "kube-system",
    )
    .version("1.5.5")
    .values(loader.load_with("alb-values.yaml", &alb_fields, false)?.into_value());
    let alb = group.add(
        helm_chart(cluster, group.child_path(&alb_release.id), &alb_release)
            .with_dependency(accounts.alb.path.clone()),
    );

    let secret_fields = Fields::new().with("{{region_name}}", aws::REGION);
    let secret_release = HelmRelease::new(
        "SecretContrChart",
        "kubernetes-external-secrets",
        "https://external-secrets.github.io/kubernetes-external-secrets/",
        "external-secrets",
        "kube-system",
    )
    .version("8.5.5")
    .values(loader.load_with("ex-secret-values.yaml", &secret_fields, false)?.into_value());
    let secret_controller = group.add(
        helm_chart(cluster, group.child_path(&secret_release.id), &secret_release)
            .with_dependency(accounts.secrets.path.clone())
            .with_dependency(alb.path()),
    );

    let scaler_fields = Fields::new()
        .with("{{region_name}}", aws::REGION)
        .with("{{cluster_name}}", cluster.name.clone());
    let scaler_release = HelmRelease::new(
        "ClusterAutoScaler",
        "cluster-autoscaler",
        "https://kubernetes.github.io/autoscaler",
        "nodescaler",
        "kube-system",
    )
    .version("9.29.3")
    .values(loader.load_with("autoscaler-values.yaml", &scaler_fields, false)?.into_value());
    let autoscaler = group.add(
        helm_chart(cluster, group.child_path(&scaler_release.id), &scaler_release)
            .with_dependency(accounts.autoscaler.path.clone()),
    );

    let operator_release = HelmRelease::new(
        "SparkOperatorChart",
        "spark-operator",
        "https://kubeflow.github.io/spark-operator",
        "spark-operator",
        "spark-operator",
    )
    .version("1.1.27")
    .create_namespace()
    .values(loader.load("spark-operator-values.yaml", false)?.into_value());
    let spark_operator = group.add(
        helm_chart(cluster, group.child_path(&operator_release.id), &operator_release)
            .with_dependency(alb.path())
            .with_dependency(secret_controller.path())
            .with_dependency(autoscaler.path()),
    );

    debug!(releases = 4, "Built base add-ons");
    Ok(BaseApps {
        group,
        alb,
        secret_controller,
        autoscaler,
        spark_operator,
    })
}

/// Inputs of the ETL application stage
#[derive(Debug, Clone)]
pub struct AppSettings<'a> {
    pub code_bucket: String,
    /// Service account of the notebook servers
    pub jupyter_sa: &'a str,
    pub secret_name: String,
    /// Group the notebook install waits for
    pub permissions: &'a str,
    pub lookup_hostnames: bool,
}

#[derive(Debug, Clone)]
pub struct EtlApps {
    pub group: Group,
    pub jhub: Ref,
    pub jhub_config: Ref,
    pub argo: Ref,
    pub workflow_template: Ref,
    pub jhub_alb: Option<Ref>,
    pub argo_alb: Option<Ref>,
}

pub fn etl_apps(
    cluster: &Cluster,
    network: &Network,
    loader: &ManifestLoader,
    settings: &AppSettings<'_>,
) -> Result<EtlApps> {
    let mut group = Group::new(APPS_GROUP);

    let jhub_fields = Fields::new()
        .with("{{codeBucket}}", settings.code_bucket.clone())
        .with("{{region}}", aws::REGION);
    let jhub_release = HelmRelease::new(
        "JHubChart",
        "jupyterhub",
        "https://jupyterhub.github.io/helm-chart",
        "jhub",
        "jupyter",
    )
    .version("1.2.0")
    .values(loader.load_with("jupyter-values.yaml", &jhub_fields, false)?.into_value());
    let jhub = group.add(
        helm_chart(cluster, group.child_path(&jhub_release.id), &jhub_release)
            .with_dependency(settings.permissions),
    );

    let config_fields = Fields::new()
        .with("{{MY_SA}}", settings.jupyter_sa)
        .with("{{REGION}}", aws::REGION)
        .with("{{SECRET_NAME}}", settings.secret_name.clone())
        .with("{{INBOUND_SG}}", network.jupyter_alb_sg.attr("GroupId"));
    let config_docs = loader
        .load_with("jupyter-config.yaml", &config_fields, true)?
        .into_documents();
    let jhub_config = group.add(
        cluster
            .manifest(group.child_path("JHubConfig"), config_docs)
            .with_dependency(jhub.path()),
    );

    let argo_fields = Fields::new().with("{{INBOUND_SG}}", network.argo_alb_sg.attr("GroupId"));
    let argo_release = HelmRelease::new(
        "ARGOChart",
        "argo-workflows",
        "https://argoproj.github.io/argo-helm",
        "argo",
        "argo",
    )
    .version("0.40.7")
    .create_namespace()
    .values(loader.load_with("argo-values.yaml", &argo_fields, false)?.into_value());
    let argo = group.add(
        helm_chart(cluster, group.child_path(&argo_release.id), &argo_release)
            .with_dependency(jhub_config.path()),
    );

    // dotted argo expressions in the template are not placeholders
    let template_docs = loader.load("spark-template.yaml", false)?.into_documents();
    let workflow_template = group.add(
        cluster
            .manifest(group.child_path("SubmitSparkWrktmpl"), template_docs)
            .with_dependency(argo.path()),
    );

    let (jhub_alb, argo_alb) = if settings.lookup_hostnames {
        let jhub_alb = group.add(
            cluster
                .object_value(
                    group.child_path("jhubALB"),
                    &ObjectQuery::ingress_hostname("jupyterhub", "jupyter"),
                )
                .with_dependency(jhub_config.path()),
        );
        let argo_alb = group.add(
            cluster
                .object_value(
                    group.child_path("argoALB"),
                    &ObjectQuery::ingress_hostname("argo-argo-workflows-server", "argo"),
                )
                .with_dependency(argo.path()),
        );
        (Some(jhub_alb), Some(argo_alb))
    } else {
        (None, None)
    };

    debug!(
        lookups = settings.lookup_hostnames,
        resources = group.resources().len(),
        "Built ETL applications"
    );
    Ok(EtlApps {
        group,
        jhub,
        jhub_config,
        argo,
        workflow_template,
        jhub_alb,
        argo_alb,
    })
}
