//! CloudFront in front of the notebook and workflow load balancers
//!
//! Serves HTTPS on the CloudFront default domain. It stands in for a
//! customer certificate and can be removed without touching the main stack.
//! The layer is its own template, deployed once the load balancer hostnames
//! are known.

use crate::error::{InfraError, Result};
use etlflow_config::CdnConfig;
use etlflow_core::{Group, Output, Ref, Resource, ResourceGraph, ResourceKind, Template};
use serde_json::{Value, json};
use tracing::debug;

pub const GROUP: &str = "cdn";
pub const CACHING_DISABLED_POLICY: &str = "4135ea2d-6df8-44a3-9df3-4b5a84be39ad";
pub const ALL_VIEWER_POLICY: &str = "216adef6-5c7f-47e4-b989-5492eafa07d3";
pub const MINIMUM_PROTOCOL_VERSION: &str = "TLSv1.2_2019";

/// An internal load balancer to put behind CloudFront
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnOrigin {
    pub name: String,
    pub dns_name: String,
    pub http_port: u16,
    /// Stack output carrying the https URL
    pub output: String,
}

impl CdnOrigin {
    pub fn new(name: &str, dns_name: &str, http_port: u16, output: &str) -> Self {
        Self {
            name: name.to_string(),
            dns_name: dns_name.to_string(),
            http_port,
            output: output.to_string(),
        }
    }
}

fn pick_host(configured: Option<&str>, discovered: Option<&str>, name: &str) -> Result<String> {
    configured
        .or(discovered)
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .ok_or_else(|| InfraError::MissingOrigin(name.to_string()))
}

/// Notebook and workflow origins.
///
/// Hostnames set in `config` win over the ones read back from the main stack.
pub fn origins(
    config: &CdnConfig,
    jupyter_host: Option<&str>,
    argo_host: Option<&str>,
) -> Result<Vec<CdnOrigin>> {
    let jupyter = pick_host(config.jupyter_origin.as_deref(), jupyter_host, "jupyter")?;
    let argo = pick_host(config.argo_origin.as_deref(), argo_host, "argo")?;
    Ok(vec![
        CdnOrigin::new("jhub_dist", &jupyter, config.jupyter_port, "JUPYTER_URL"),
        CdnOrigin::new("argo_dist", &argo, config.argo_port, "ARGO_URL"),
    ])
}

#[derive(Debug, Clone)]
pub struct Cdn {
    pub group: Group,
    pub distributions: Vec<(CdnOrigin, Ref)>,
}

impl Cdn {
    pub fn outputs(&self) -> Vec<Output> {
        self.distributions
            .iter()
            .map(|(origin, dist)| {
                Output::new(&origin.output, format!("https://{}", dist.attr("DomainName")))
                    .with_description(format!("HTTPS endpoint in front of {}", origin.dns_name))
            })
            .collect()
    }

    pub fn template(&self, description: &str) -> Result<Value> {
        let graph = ResourceGraph::build(&self.group)?;
        let mut template = Template::new().with_description(description);
        for output in self.outputs() {
            template.add_output(output);
        }
        Ok(template.render(&graph))
    }
}

fn distribution(origin: &CdnOrigin, log_bucket: &str) -> Value {
    json!({
        "DistributionConfig": {
            "Enabled": true,
            "HttpVersion": "http2",
            "Origins": [{
                "Id": origin.name,
                "DomainName": origin.dns_name,
                "CustomOriginConfig": {
                    "HTTPPort": origin.http_port,
                    "OriginProtocolPolicy": "http-only",
                    "OriginSSLProtocols": ["TLSv1.2"],
                },
            }],
            "DefaultCacheBehavior": {
                "TargetOriginId": origin.name,
                "ViewerProtocolPolicy": "https-only",
                "AllowedMethods": ["GET", "HEAD", "OPTIONS", "PUT", "PATCH", "POST", "DELETE"],
                "CachedMethods": ["GET", "HEAD"],
                "CachePolicyId": CACHING_DISABLED_POLICY,
                "OriginRequestPolicyId": ALL_VIEWER_POLICY,
                "Compress": true,
            },
            "ViewerCertificate": {
                "CloudFrontDefaultCertificate": true,
                "MinimumProtocolVersion": MINIMUM_PROTOCOL_VERSION,
            },
            "Logging": {
                "Bucket": format!("{log_bucket}.s3.amazonaws.com"),
                "IncludeCookies": false,
                "Prefix": format!("{}/", origin.name),
            },
        },
    })
}

/// One distribution per origin, logging to `log_bucket`
pub fn cdn_layer(origins: Vec<CdnOrigin>, log_bucket: &str) -> Cdn {
    let mut group = Group::new(GROUP);
    let mut distributions = Vec::new();
    for origin in origins {
        let dist = group.add(
            Resource::new(
                group.child_path(&format!("CF-{}", origin.name)),
                ResourceKind::Distribution,
                distribution(&origin, log_bucket),
            )
            .suppress(
                "W70",
                "the distribution uses CloudFront domain name and automatically sets the policy to TLSv1",
            ),
        );
        distributions.push((origin, dist));
    }
    debug!(distributions = distributions.len(), "Built CDN layer");
    Cdn {
        group,
        distributions,
    }
}
