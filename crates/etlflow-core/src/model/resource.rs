use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of a resource node, mapped onto a CloudFormation type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vpc,
    Subnet,
    InternetGateway,
    GatewayAttachment,
    Eip,
    NatGateway,
    RouteTable,
    Route,
    SubnetRouteTableAssociation,
    FlowLog,
    SecurityGroup,
    VpcEndpoint,
    Role,
    Policy,
    KmsKey,
    KmsAlias,
    Secret,
    Cluster,
    OidcProvider,
    AccessEntry,
    Nodegroup,
    KubernetesManifest,
    HelmChart,
    KubernetesObjectValue,
    Bucket,
    BucketDeployment,
    Repository,
    BuildProject,
    Pipeline,
    Distribution,
    Function,
    AwsSdkCall,
    /// Free-form custom resource (`Custom::<name>`)
    Custom(String),
}

/// How tags are rendered for a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFormat {
    /// `[{"Key": .., "Value": ..}]`
    List,
    /// `{"key": "value"}`
    Map,
    /// not taggable
    None,
}

impl ResourceKind {
    pub fn cfn_type(&self) -> String {
        let t = match self {
            ResourceKind::Vpc => "AWS::EC2::VPC",
            ResourceKind::Subnet => "AWS::EC2::Subnet",
            ResourceKind::InternetGateway => "AWS::EC2::InternetGateway",
            ResourceKind::GatewayAttachment => "AWS::EC2::VPCGatewayAttachment",
            ResourceKind::Eip => "AWS::EC2::EIP",
            ResourceKind::NatGateway => "AWS::EC2::NatGateway",
            ResourceKind::RouteTable => "AWS::EC2::RouteTable",
            ResourceKind::Route => "AWS::EC2::Route",
            ResourceKind::SubnetRouteTableAssociation => "AWS::EC2::SubnetRouteTableAssociation",
            ResourceKind::FlowLog => "AWS::EC2::FlowLog",
            ResourceKind::SecurityGroup => "AWS::EC2::SecurityGroup",
            ResourceKind::VpcEndpoint => "AWS::EC2::VPCEndpoint",
            ResourceKind::Role => "AWS::IAM::Role",
            ResourceKind::Policy => "AWS::IAM::Policy",
            ResourceKind::KmsKey => "AWS::KMS::Key",
            ResourceKind::KmsAlias => "AWS::KMS::Alias",
            ResourceKind::Secret => "AWS::SecretsManager::Secret",
            ResourceKind::Cluster => "AWS::EKS::Cluster",
            ResourceKind::OidcProvider => "AWS::IAM::OIDCProvider",
            ResourceKind::AccessEntry => "AWS::EKS::AccessEntry",
            ResourceKind::Nodegroup => "AWS::EKS::Nodegroup",
            ResourceKind::KubernetesManifest => "Custom::AWSCDK-EKS-KubernetesResource",
            ResourceKind::HelmChart => "Custom::AWSCDK-EKS-HelmChart",
            ResourceKind::KubernetesObjectValue => "Custom::AWSCDK-EKS-KubernetesObjectValue",
            ResourceKind::Bucket => "AWS::S3::Bucket",
            ResourceKind::BucketDeployment => "Custom::CDKBucketDeployment",
            ResourceKind::Repository => "AWS::ECR::Repository",
            ResourceKind::BuildProject => "AWS::CodeBuild::Project",
            ResourceKind::Pipeline => "AWS::CodePipeline::Pipeline",
            ResourceKind::Distribution => "AWS::CloudFront::Distribution",
            ResourceKind::Function => "AWS::Lambda::Function",
            ResourceKind::AwsSdkCall => "Custom::AWS",
            ResourceKind::Custom(name) => return format!("Custom::{name}"),
        };
        t.to_string()
    }

    pub fn tag_format(&self) -> TagFormat {
        match self {
            ResourceKind::Nodegroup => TagFormat::Map,
            ResourceKind::Vpc
            | ResourceKind::Subnet
            | ResourceKind::InternetGateway
            | ResourceKind::Eip
            | ResourceKind::NatGateway
            | ResourceKind::RouteTable
            | ResourceKind::FlowLog
            | ResourceKind::SecurityGroup
            | ResourceKind::Role
            | ResourceKind::KmsKey
            | ResourceKind::Secret
            | ResourceKind::Cluster
            | ResourceKind::OidcProvider
            | ResourceKind::AccessEntry
            | ResourceKind::Bucket
            | ResourceKind::Repository
            | ResourceKind::BuildProject
            | ResourceKind::Pipeline
            | ResourceKind::Distribution
            | ResourceKind::Function => TagFormat::List,
            _ => TagFormat::None,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cfn_type())
    }
}

/// What happens to the physical resource when the stack is torn down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    Retain,
    #[default]
    Destroy,
}

/// A static-analysis rule the resource intentionally violates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suppression {
    pub id: String,
    pub reason: String,
}

/// A single cloud or Kubernetes resource in the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Construct path, e.g. `eks_cluster/EKS`
    pub path: String,

    pub kind: ResourceKind,

    /// Resource-specific configuration, rendered as CloudFormation `Properties`
    pub properties: serde_json::Value,

    pub tags: BTreeMap<String, String>,

    /// Paths of resources or groups that must exist first
    pub depends_on: Vec<String>,

    /// Deployment-time condition gating materialization
    pub condition: Option<String>,

    pub removal: RemovalPolicy,

    pub suppressions: Vec<Suppression>,
}

impl Resource {
    pub fn new(path: impl Into<String>, kind: ResourceKind, properties: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            kind,
            properties,
            tags: BTreeMap::new(),
            depends_on: Vec::new(),
            condition: None,
            removal: RemovalPolicy::default(),
            suppressions: Vec::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_dependency(mut self, path: impl Into<String>) -> Self {
        self.add_dependency(path);
        self
    }

    pub fn with_removal(mut self, removal: RemovalPolicy) -> Self {
        self.removal = removal;
        self
    }

    /// Mark a static-analysis finding as accepted risk
    pub fn suppress(mut self, id: impl Into<String>, reason: impl Into<String>) -> Self {
        self.suppressions.push(Suppression {
            id: id.into(),
            reason: reason.into(),
        });
        self
    }

    pub fn add_dependency(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.depends_on.contains(&path) {
            self.depends_on.push(path);
        }
    }

    pub fn logical_id(&self) -> String {
        logical_id(&self.path)
    }

    /// Handle for wiring this resource into later ones
    pub fn reference(&self) -> Ref {
        Ref::new(&self.path)
    }
}

/// Deterministic CloudFormation logical id for a construct path
///
/// Every path segment keeps only its ASCII alphanumerics, the first letter of
/// each segment is upper-cased, and segments are concatenated.
pub fn logical_id(path: &str) -> String {
    let mut id = String::with_capacity(path.len());
    for segment in path.split('/') {
        let mut chars = segment.chars().filter(|c| c.is_ascii_alphanumeric());
        if let Some(first) = chars.next() {
            id.push(first.to_ascii_uppercase());
            id.extend(chars);
        }
    }
    id
}

/// Logical ids referenced from `value`
///
/// Picks up `${Id}` / `${Id.Attr}` inside strings as well as `Ref` and
/// `Fn::GetAtt` objects. Pseudo parameters (`${AWS::Region}`) and escaped
/// literals (`${!Literal}`) are skipped.
pub fn referenced_ids(value: &serde_json::Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_refs(value, &mut out);
    out
}

fn collect_refs(value: &serde_json::Value, out: &mut Vec<String>) {
    use serde_json::Value;
    match value {
        Value::String(s) => scan_sub(s, out),
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("Ref") {
                push_id(id, out);
            }
            if let Some(Value::Array(parts)) = map.get("Fn::GetAtt")
                && let Some(Value::String(id)) = parts.first()
            {
                push_id(id, out);
            }
            map.values().for_each(|v| collect_refs(v, out));
        }
        _ => {}
    }
}

fn scan_sub(s: &str, out: &mut Vec<String>) {
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = after[..end].split('.').next().unwrap_or_default();
        push_id(name, out);
        rest = &after[end + 1..];
    }
}

fn push_id(id: &str, out: &mut Vec<String>) {
    if !id.is_empty()
        && id.chars().all(|c| c.is_ascii_alphanumeric())
        && !out.iter().any(|o| o == id)
    {
        out.push(id.to_string());
    }
}

/// Reference to a resource whose attributes are only known at deploy time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ref {
    path: String,
}

impl Ref {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn logical_id(&self) -> String {
        logical_id(&self.path)
    }

    /// `${LogicalId}`: the resource's primary identifier
    pub fn id(&self) -> String {
        format!("${{{}}}", self.logical_id())
    }

    /// `${LogicalId.Attr}`
    pub fn attr(&self, attribute: &str) -> String {
        format!("${{{}.{}}}", self.logical_id(), attribute)
    }

    /// `{"Fn::GetAtt": [LogicalId, Attr]}` for places where a string will not do
    pub fn get_att(&self, attribute: &str) -> serde_json::Value {
        serde_json::json!({ "Fn::GetAtt": [self.logical_id(), attribute] })
    }

    /// `{"Ref": LogicalId}`
    pub fn as_ref_json(&self) -> serde_json::Value {
        serde_json::json!({ "Ref": self.logical_id() })
    }
}

/// Pseudo parameters
pub mod aws {
    pub const REGION: &str = "${AWS::Region}";
    pub const ACCOUNT_ID: &str = "${AWS::AccountId}";
    pub const PARTITION: &str = "${AWS::Partition}";
    pub const URL_SUFFIX: &str = "${AWS::URLSuffix}";
    pub const STACK_NAME: &str = "${AWS::StackName}";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_id_from_path() {
        assert_eq!(logical_id("eks_cluster/EKS"), "EksclusterEKS");
        assert_eq!(logical_id("network-sg/eksVpc"), "NetworksgEksVpc");
        assert_eq!(logical_id("appcode/appcode"), "AppcodeAppcode");
    }

    #[test]
    fn test_ref_strings() {
        let r = Ref::new("appcode/appcode");
        assert_eq!(r.id(), "${AppcodeAppcode}");
        assert_eq!(r.attr("Arn"), "${AppcodeAppcode.Arn}");
        assert_eq!(
            r.get_att("Arn"),
            serde_json::json!({"Fn::GetAtt": ["AppcodeAppcode", "Arn"]})
        );
    }

    #[test]
    fn test_dependency_is_deduplicated() {
        let mut r = Resource::new("a", ResourceKind::Bucket, serde_json::json!({}));
        r.add_dependency("b");
        r.add_dependency("b");
        assert_eq!(r.depends_on, vec!["b".to_string()]);
    }

    #[test]
    fn test_referenced_ids() {
        let v = serde_json::json!({
            "Arn": "arn:${AWS::Partition}:s3:::${AppcodeAppcode}/*",
            "Sg": "${NetworksgEndpointSg.GroupId}",
            "Lit": "${!NotAnId}",
            "Role": {"Fn::GetAtt": ["IamrolesClusterAdmin", "Arn"]},
            "Vpc": {"Ref": "NetworksgEksVpc"},
            "Again": ["${AppcodeAppcode}"],
        });
        let mut ids = referenced_ids(&v);
        ids.sort();
        assert_eq!(
            ids,
            vec![
                "AppcodeAppcode",
                "IamrolesClusterAdmin",
                "NetworksgEksVpc",
                "NetworksgEndpointSg"
            ]
        );
    }

    #[test]
    fn test_custom_kind_type() {
        assert_eq!(
            ResourceKind::Custom("CreateUUID".into()).cfn_type(),
            "Custom::CreateUUID"
        );
        assert_eq!(ResourceKind::Nodegroup.tag_format(), TagFormat::Map);
        assert_eq!(ResourceKind::HelmChart.tag_format(), TagFormat::None);
    }
}
