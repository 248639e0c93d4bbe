//! Spark workload identities
//!
//! Namespaces `spark` and `jupyter` plus three service accounts: the Arc ETL
//! job runner, the notebook user and the native Spark job runner.

use crate::cluster::Cluster;
use crate::error::Result;
use crate::iam;
use crate::service_account::{ServiceAccount, ServiceAccountSpec, add_service_account};
use etlflow_core::{Fields, Group, ManifestLoader};
use serde_json::{Value, json};
use tracing::debug;

pub const GROUP: &str = "spark_service_account";
pub const ETL_NAMESPACE: &str = "spark";
pub const JUPYTER_NAMESPACE: &str = "jupyter";
pub const ETL_SA: &str = "arcjob";
pub const NATIVE_SA: &str = "nativejob";

/// Bucket names substituted into the job role templates
#[derive(Debug, Clone)]
pub struct BucketSetting {
    pub code_bucket: String,
    pub datalake_bucket: String,
}

impl BucketSetting {
    /// A blank data-lake bucket falls back to the code bucket
    pub fn new(code_bucket: impl Into<String>, datalake_bucket: Option<&str>) -> Self {
        let code_bucket = code_bucket.into();
        let datalake_bucket = match datalake_bucket.map(str::trim) {
            Some(b) if !b.is_empty() => b.to_string(),
            _ => code_bucket.clone(),
        };
        Self {
            code_bucket,
            datalake_bucket,
        }
    }

    pub fn fields(&self) -> Fields {
        Fields::new()
            .with("{{codeBucket}}", self.code_bucket.clone())
            .with("{{datalakeBucket}}", self.datalake_bucket.clone())
    }
}

#[derive(Debug, Clone)]
pub struct SparkPermission {
    pub group: Group,
    pub etl: ServiceAccount,
    pub jupyter: ServiceAccount,
    pub native: ServiceAccount,
}

impl SparkPermission {
    /// Service account the notebook servers run as
    pub fn jupyter_sa(&self) -> &str {
        &self.jupyter.name
    }
}

fn namespace(name: &str, label: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name, "labels": { "name": label } },
    })
}

pub fn spark_permission(
    cluster: &Cluster,
    loader: &ManifestLoader,
    login_name: &str,
    buckets: &BucketSetting,
) -> Result<SparkPermission> {
    let mut group = Group::new(GROUP);

    let etl_ns = group.child_path("SparkNamespace");
    group.add(cluster.manifest(etl_ns.clone(), vec![namespace(ETL_NAMESPACE, "spark")]));
    let jupyter_ns = group.child_path("jhubNamespace");
    group.add(cluster.manifest(jupyter_ns.clone(), vec![namespace(JUPYTER_NAMESPACE, "jupyter")]));

    let bucket_fields = buckets.fields();
    let etl_statements = iam::statements_from_manifest(
        loader.load_with("etl-iam-role.yaml", &bucket_fields, false)?,
        "etl-iam-role.yaml",
    )?;

    let etl_rbac = loader
        .load_with(
            "etl-rbac.yaml",
            &Fields::new().with("{{MY_SA}}", ETL_SA),
            true,
        )?
        .into_documents();
    let etl = add_service_account(
        &mut group,
        cluster,
        ServiceAccountSpec::new("ETLSa", ETL_NAMESPACE, ETL_SA)
            .statements(etl_statements.clone())
            .rbac(etl_rbac)
            .wait_for(etl_ns.clone()),
    );

    // notebook permissions come from the notebook config, not a role binding
    let jupyter = add_service_account(
        &mut group,
        cluster,
        ServiceAccountSpec::new("jhubServiceAcct", JUPYTER_NAMESPACE, login_name)
            .statements(etl_statements)
            .wait_for(jupyter_ns),
    );

    let native_statements = iam::statements_from_manifest(
        loader.load_with("native-spark-iam-role.yaml", &bucket_fields, false)?,
        "native-spark-iam-role.yaml",
    )?;
    let native_rbac = loader
        .load_with(
            "native-spark-rbac.yaml",
            &Fields::new().with("{{MY_SA}}", NATIVE_SA),
            false,
        )?
        .into_documents();
    let native = add_service_account(
        &mut group,
        cluster,
        ServiceAccountSpec::new("NativeSparkSa", ETL_NAMESPACE, NATIVE_SA)
            .statements(native_statements)
            .rbac(native_rbac)
            .wait_for(etl_ns),
    );

    debug!(
        code_bucket = %buckets.code_bucket,
        datalake_bucket = %buckets.datalake_bucket,
        "Built spark permissions"
    );
    Ok(SparkPermission {
        group,
        etl,
        jupyter,
        native,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn build(datalake: Option<&str>) -> SparkPermission {
        let buckets = BucketSetting::new("${AppcodeAppcode}", datalake);
        spark_permission(&testing::cluster(), &testing::loader(), "sparkoneks", &buckets).unwrap()
    }

    #[test]
    fn test_datalake_falls_back_to_code_bucket() {
        assert_eq!(BucketSetting::new("code", None).datalake_bucket, "code");
        assert_eq!(BucketSetting::new("code", Some("  ")).datalake_bucket, "code");
        assert_eq!(BucketSetting::new("code", Some("lake")).datalake_bucket, "lake");

        let permission = build(None);
        let policy = permission.group.find(permission.etl.policy.path()).unwrap();
        let text = policy.properties.to_string();
        assert!(text.contains("arn:aws:s3:::${AppcodeAppcode}/*"));
        assert!(!text.contains("{{datalakeBucket}}"));
    }

    #[test]
    fn test_namespace_precedes_accounts() {
        let permission = build(Some("my-lake"));
        for sa in [&permission.etl, &permission.native] {
            let role = permission.group.find(sa.role.path()).unwrap();
            assert_eq!(role.depends_on, vec!["spark_service_account/SparkNamespace"]);
        }
        let role = permission.group.find(permission.jupyter.role.path()).unwrap();
        assert_eq!(role.depends_on, vec!["spark_service_account/jhubNamespace"]);
        assert_eq!(permission.jupyter_sa(), "sparkoneks");
    }

    #[test]
    fn test_role_bindings_name_the_account() {
        let permission = build(None);
        let rbac = permission.etl.rbac.as_ref().unwrap();
        let binding = permission.group.find(rbac.path()).unwrap();
        let docs = binding.properties["Manifest"].as_array().unwrap();
        assert_eq!(docs.len(), 4);
        assert_eq!(docs[1]["subjects"][0]["name"], "arcjob");

        let native = permission.native.rbac.as_ref().unwrap();
        let binding = permission.group.find(native.path()).unwrap();
        assert_eq!(binding.properties["Manifest"][0]["subjects"][0]["name"], "nativejob");
        assert!(permission.jupyter.rbac.is_none());
    }
}
