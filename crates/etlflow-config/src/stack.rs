use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_STACK_NAME: &str = "sql-based-etl-with-apache-spark-on-amazon-eks";
pub const DEFAULT_CLUSTER_NAME: &str = "spark-on-eks";
pub const DEFAULT_SOLUTION_ID: &str = "SO0141";
pub const DEFAULT_VERSION: &str = "v1.0.0";

/// Deployment parameters for one environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// CloudFormation stack name
    pub stack_name: String,

    /// EKS cluster name. Also used in tags and resource names.
    pub cluster_name: String,

    pub solution_id: String,

    pub version: String,

    /// Existing bucket holding the data lake. Falls back to the code bucket.
    pub datalake_bucket: Option<String>,

    /// Target region. The AWS CLI default applies when unset.
    pub region: Option<String>,

    /// Bucket holding handler code and application assets.
    /// Defaults to `etlflow-assets-<account>-<region>`.
    pub assets_bucket: Option<String>,

    /// Read the load balancer hostnames back from the cluster
    pub lookup_hostnames: bool,

    /// CloudFront in front of the notebook and workflow load balancers
    pub cdn: Option<CdnConfig>,

    /// Anonymous usage metrics. Off unless set.
    pub telemetry: bool,

    /// Extra tags added to every taggable resource
    pub tags: BTreeMap<String, String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: DEFAULT_STACK_NAME.to_string(),
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            solution_id: DEFAULT_SOLUTION_ID.to_string(),
            version: DEFAULT_VERSION.to_string(),
            datalake_bucket: None,
            region: None,
            assets_bucket: None,
            lookup_hostnames: true,
            cdn: None,
            telemetry: false,
            tags: BTreeMap::new(),
        }
    }
}

/// Origins for the CDN layer.
///
/// DNS names are optional here; when absent they are read back from the
/// deployed stack once the load balancers exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdnConfig {
    pub enabled: bool,
    pub jupyter_origin: Option<String>,
    pub argo_origin: Option<String>,
    pub jupyter_port: u16,
    pub argo_port: u16,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jupyter_origin: None,
            argo_origin: None,
            jupyter_port: 80,
            argo_port: 2746,
        }
    }
}

impl StackConfig {
    /// Parse YAML and validate
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        let config: StackConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.validate()?;
        debug!(stack = %config.stack_name, cluster = %config.cluster_name, "Parsed config");
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, path)
    }

    /// Data lake bucket, ignoring blank values
    pub fn datalake_bucket(&self) -> Option<&str> {
        self.datalake_bucket
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
    }

    /// Configured assets bucket, ignoring blank values
    pub fn assets_bucket(&self) -> Option<&str> {
        self.assets_bucket
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
    }

    pub fn cdn_enabled(&self) -> bool {
        self.cdn.as_ref().is_some_and(|c| c.enabled)
    }

    /// Name of the separate CDN stack
    pub fn cdn_stack_name(&self) -> String {
        format!("{}-cdn", self.stack_name)
    }

    pub fn validate(&self) -> Result<()> {
        check_name("cluster_name", &self.cluster_name, 100, &['-', '_'])?;
        check_name("stack_name", &self.stack_name, 128, &['-'])?;
        if self.solution_id.trim().is_empty() {
            return Err(ConfigError::Invalid("solution_id must not be empty".into()));
        }
        if self.version.trim().is_empty() {
            return Err(ConfigError::Invalid("version must not be empty".into()));
        }
        if let Some(cdn) = &self.cdn
            && (cdn.jupyter_port == 0 || cdn.argo_port == 0)
        {
            return Err(ConfigError::Invalid("cdn ports must be non-zero".into()));
        }
        Ok(())
    }
}

fn check_name(field: &str, value: &str, max: usize, extra: &[char]) -> Result<()> {
    let mut chars = value.chars();
    let starts_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || extra.contains(&c));
    if !starts_ok || !rest_ok || value.len() > max {
        return Err(ConfigError::Invalid(format!(
            "{field} '{value}' must start with a letter, contain only letters, digits or {extra:?}, and be at most {max} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<StackConfig> {
        StackConfig::from_yaml(yaml, Path::new("etlflow.yaml"))
    }

    #[test]
    fn test_defaults() {
        let config = parse("{}").unwrap();
        assert_eq!(config.cluster_name, DEFAULT_CLUSTER_NAME);
        assert_eq!(config.stack_name, DEFAULT_STACK_NAME);
        assert!(!config.telemetry);
        assert!(!config.cdn_enabled());
        assert!(config.datalake_bucket().is_none());
        assert!(config.assets_bucket().is_none());
        assert!(config.lookup_hostnames);
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
stack_name: etl-dev
cluster_name: etl-dev
solution_id: SO0141
version: v2.0.0
datalake_bucket: my-lake
region: us-west-2
assets_bucket: my-assets
lookup_hostnames: false
telemetry: true
cdn:
  argo_port: 2746
tags:
  team: data
"#,
        )
        .unwrap();
        assert_eq!(config.datalake_bucket(), Some("my-lake"));
        assert_eq!(config.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.assets_bucket(), Some("my-assets"));
        assert!(!config.lookup_hostnames);
        assert!(config.cdn_enabled());
        assert_eq!(config.cdn.as_ref().unwrap().jupyter_port, 80);
        assert_eq!(config.cdn_stack_name(), "etl-dev-cdn");
        assert_eq!(config.tags["team"], "data");
    }

    #[test]
    fn test_blank_datalake_bucket_is_none() {
        let config = parse("datalake_bucket: '  '").unwrap();
        assert!(config.datalake_bucket().is_none());
    }

    #[test]
    fn test_invalid_cluster_name() {
        assert!(matches!(
            parse("cluster_name: 1bad"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse("cluster_name: 'has space'"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            parse("cluster_name: [unclosed"),
            Err(ConfigError::Parse { .. })
        ));
    }
}
