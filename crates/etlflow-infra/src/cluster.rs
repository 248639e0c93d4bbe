//! Cluster layer
//!
//! The EKS control plane, its OIDC provider, admin access, the `aws-auth`
//! mapping and three managed node pools. [`Cluster`] is also the handle the
//! later layers use to declare Kubernetes objects against the cluster.

use crate::handler::{self, Handler, HandlerSpec};
use crate::iam;
use crate::identity::Identity;
use crate::network::Network;
use etlflow_core::{Group, Ref, Resource, ResourceKind, aws};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::debug;

pub const GROUP: &str = "eks_cluster";
pub const KUBERNETES_VERSION: &str = "1.27";

/// Json path of an ingress' load balancer hostname
pub const INGRESS_HOSTNAME_PATH: &str = "..status.loadBalancer.ingress[0].hostname";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityType {
    OnDemand,
    Spot,
}

impl CapacityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapacityType::OnDemand => "ON_DEMAND",
            CapacityType::Spot => "SPOT",
        }
    }
}

/// Which private subnets a pool spans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetSelection {
    OnePerAz,
    AllPrivate,
    FirstPrivate,
}

#[derive(Debug, Clone)]
pub struct NodegroupSpec {
    pub id: &'static str,
    pub name: &'static str,
    /// Used for the `Name` tag: `<kind>-<cluster>`
    pub kind: &'static str,
    pub capacity: CapacityType,
    pub min: u32,
    pub desired: u32,
    pub max: u32,
    pub instance_types: Vec<&'static str>,
    pub ami_type: &'static str,
    pub disk_size: u32,
    pub labels: BTreeMap<String, String>,
    pub subnets: SubnetSelection,
    /// Publish labels as autoscaler node-template tags so the pool can scale from zero
    pub node_template_tags: bool,
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// The three Spark node pools
pub fn default_nodegroups() -> Vec<NodegroupSpec> {
    vec![
        NodegroupSpec {
            id: "onDemand-mn",
            name: "etl-ondemand",
            kind: "OnDemand",
            capacity: CapacityType::OnDemand,
            min: 1,
            desired: 1,
            max: 5,
            instance_types: vec!["m5.xlarge"],
            ami_type: "AL2_x86_64",
            disk_size: 50,
            labels: labels(&[("app", "spark"), ("lifecycle", "OnDemand")]),
            subnets: SubnetSelection::OnePerAz,
            node_template_tags: false,
        },
        NodegroupSpec {
            id: "spot-mn",
            name: "etl-spot",
            kind: "Spot",
            capacity: CapacityType::Spot,
            min: 1,
            desired: 1,
            max: 30,
            instance_types: vec!["r5.xlarge", "r4.xlarge", "r5a.xlarge"],
            ami_type: "AL2_x86_64",
            disk_size: 50,
            labels: labels(&[("app", "spark"), ("lifecycle", "Ec2Spot")]),
            subnets: SubnetSelection::AllPrivate,
            node_template_tags: false,
        },
        NodegroupSpec {
            id: "arm-spot-mn",
            name: "etl-arm-spot",
            kind: "ArmSpot",
            capacity: CapacityType::Spot,
            min: 0,
            desired: 0,
            max: 30,
            instance_types: vec!["r6g.xlarge", "r6gd.xlarge", "r7g.xlarge"],
            ami_type: "AL2_ARM_64",
            disk_size: 50,
            labels: labels(&[("app", "spark"), ("lifecycle", "Ec2Spot"), ("arch", "arm64")]),
            subnets: SubnetSelection::FirstPrivate,
            node_template_tags: true,
        },
    ]
}

/// A Kubernetes object read back at deploy time
#[derive(Debug, Clone)]
pub struct ObjectQuery {
    pub object_type: String,
    pub name: String,
    pub namespace: String,
    pub json_path: String,
    pub timeout_seconds: u64,
}

impl ObjectQuery {
    /// Hostname of an ingress' load balancer, waiting up to 10 minutes
    pub fn ingress_hostname(name: &str, namespace: &str) -> Self {
        Self {
            object_type: "ingress.networking".to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            json_path: INGRESS_HOSTNAME_PATH.to_string(),
            timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub group: Group,
    pub name: String,
    pub cluster: Ref,
    pub oidc_provider: Ref,
    pub admin_role: Ref,
    pub kubectl: Handler,
    pub cfn_utils: Handler,
    /// Grants the admin role cluster access; kubectl calls wait for it
    access_entry: String,
}

impl Cluster {
    /// Properties shared by every kubectl-backed custom resource
    pub fn kubectl_properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("ServiceToken".into(), json!(self.kubectl.service_token()));
        props.insert("ClusterName".into(), json!(self.cluster.id()));
        props.insert("RoleArn".into(), json!(self.admin_role.attr("Arn")));
        props
    }

    /// Apply `documents` to the cluster
    pub fn manifest(&self, path: impl Into<String>, documents: Vec<Value>) -> Resource {
        let mut props = self.kubectl_properties();
        props.insert("Manifest".into(), Value::Array(documents));
        props.insert("Overwrite".into(), json!(true));
        Resource::new(path, ResourceKind::KubernetesManifest, Value::Object(props))
            .with_dependency(self.access_entry.clone())
    }

    /// Read a value from a live object, failing the deployment after the timeout
    pub fn object_value(&self, path: impl Into<String>, query: &ObjectQuery) -> Resource {
        let mut props = self.kubectl_properties();
        props.insert("ObjectType".into(), json!(query.object_type));
        props.insert("ObjectName".into(), json!(query.name));
        props.insert("ObjectNamespace".into(), json!(query.namespace));
        props.insert("JsonPath".into(), json!(query.json_path));
        props.insert("TimeoutSeconds".into(), json!(query.timeout_seconds));
        Resource::new(path, ResourceKind::KubernetesObjectValue, Value::Object(props))
            .with_dependency(self.access_entry.clone())
    }

    pub fn access_entry_path(&self) -> &str {
        &self.access_entry
    }

    /// OIDC issuer host and path, without the scheme
    pub fn oidc_issuer(&self) -> Value {
        json!({
            "Fn::Select": [1, {
                "Fn::Split": ["https://", self.cluster.get_att("OpenIdConnectIssuerUrl")],
            }],
        })
    }
}

pub fn cluster_layer(cluster_name: &str, network: &Network, identity: &Identity) -> Cluster {
    let mut group = Group::new(GROUP);

    let control_plane_sg = group.add(
        Resource::new(
            group.child_path("EKS/ControlPlaneSecurityGroup"),
            ResourceKind::SecurityGroup,
            json!({
                "GroupDescription": "EKS Control Plane Security Group",
                "VpcId": network.vpc_id(),
                "SecurityGroupEgress": [{
                    "IpProtocol": "-1",
                    "CidrIp": "0.0.0.0/0",
                    "Description": "Allow all outbound traffic by default",
                }],
            }),
        )
        .suppress("W40", "Egress IP Protocol of -1 is default and generally considered OK")
        .suppress("W5", "The Security Group with cidr open considered OK"),
    );

    let subnets: Vec<String> = network
        .public_subnets
        .iter()
        .chain(network.private_subnets.iter())
        .map(Ref::id)
        .collect();
    let cluster = group.add(Resource::new(
        group.child_path("EKS"),
        ResourceKind::Cluster,
        json!({
            "Name": cluster_name,
            "Version": KUBERNETES_VERSION,
            "RoleArn": identity.cluster_role.attr("Arn"),
            "ResourcesVpcConfig": {
                "SubnetIds": subnets,
                "SecurityGroupIds": [control_plane_sg.attr("GroupId")],
                "EndpointPublicAccess": true,
                "EndpointPrivateAccess": true,
            },
            "AccessConfig": {
                "AuthenticationMode": "API_AND_CONFIG_MAP",
                "BootstrapClusterCreatorAdminPermissions": true,
            },
        }),
    ));

    let oidc_provider = group.add(Resource::new(
        group.child_path("EKS/OpenIdConnectProvider"),
        ResourceKind::OidcProvider,
        json!({
            "Url": cluster.attr("OpenIdConnectIssuerUrl"),
            "ClientIdList": ["sts.amazonaws.com"],
        }),
    ));

    let access_entry = group.child_path("EKS/AdminAccess");
    group.add(Resource::new(
        access_entry.clone(),
        ResourceKind::AccessEntry,
        json!({
            "ClusterName": cluster.id(),
            "PrincipalArn": identity.admin_role.attr("Arn"),
            "AccessPolicies": [{
                "PolicyArn": format!(
                    "arn:{}:eks::aws:cluster-access-policy/AmazonEKSClusterAdminPolicy",
                    aws::PARTITION
                ),
                "AccessScope": { "Type": "cluster" },
            }],
        }),
    ));

    let cluster_arn = cluster.attr("Arn");
    let admin_arn = identity.admin_role.attr("Arn");
    let kubectl = handler::add_handler(
        &mut group,
        HandlerSpec::new(
            "KubectlHandler",
            "handlers/kubectl.zip",
            "Applies manifests and Helm charts to the EKS cluster",
        )
        .with_statements(vec![
            iam::allow(&["eks:DescribeCluster"], &[cluster_arn.as_str()]),
            iam::allow(&["sts:AssumeRole"], &[admin_arn.as_str()]),
        ]),
    );
    let cfn_utils = handler::add_handler(
        &mut group,
        HandlerSpec::new(
            "CfnUtilsHandler",
            "handlers/cfn-utils.zip",
            "Resolves JSON values with deploy-time keys",
        )
        .with_timeout(60),
    );

    let mut handle = Cluster {
        group,
        name: cluster_name.to_string(),
        cluster,
        oidc_provider,
        admin_role: identity.admin_role.clone(),
        kubectl,
        cfn_utils,
        access_entry,
    };

    let auth = handle.manifest(
        handle.group.child_path("EKS/AwsAuth/manifest"),
        vec![aws_auth(identity)],
    );
    handle.group.add(auth);

    for spec in default_nodegroups() {
        let pool = nodegroup(&spec, cluster_name, &handle.cluster, network, identity);
        handle.group.add(pool);
    }

    debug!(
        cluster = cluster_name,
        version = KUBERNETES_VERSION,
        resources = handle.group.resources().len(),
        "Built cluster layer"
    );
    handle
}

fn aws_auth(identity: &Identity) -> Value {
    let admin = identity.admin_role.attr("Arn");
    let node = identity.node_role.attr("Arn");
    let map_roles = format!(
        "- rolearn: {admin}\n  username: {admin}\n  groups:\n  - system:masters\n\
         - rolearn: {node}\n  username: system:node:{{{{EC2PrivateDNSName}}}}\n  groups:\n  - system:bootstrappers\n  - system:nodes\n"
    );
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": "aws-auth", "namespace": "kube-system" },
        "data": { "mapRoles": map_roles, "mapUsers": "[]", "mapAccounts": "[]" },
    })
}

/// Autoscaler discovery tags (and node-template label tags) for a pool
pub fn nodegroup_tags(spec: &NodegroupSpec, cluster_name: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert("Name".to_string(), format!("{}-{}", spec.kind, cluster_name));
    tags.insert(
        "k8s.io/cluster-autoscaler/enabled".to_string(),
        "true".to_string(),
    );
    tags.insert(
        format!("k8s.io/cluster-autoscaler/{cluster_name}"),
        "owned".to_string(),
    );
    if spec.node_template_tags {
        for (k, v) in &spec.labels {
            tags.insert(
                format!("k8s.io/cluster-autoscaler/node-template/label/{k}"),
                v.clone(),
            );
        }
    }
    tags
}

fn nodegroup(
    spec: &NodegroupSpec,
    cluster_name: &str,
    cluster: &Ref,
    network: &Network,
    identity: &Identity,
) -> Resource {
    let subnets: Vec<String> = match spec.subnets {
        SubnetSelection::OnePerAz | SubnetSelection::AllPrivate => {
            network.private_subnets.iter().map(Ref::id).collect()
        }
        SubnetSelection::FirstPrivate => network
            .private_subnets
            .iter()
            .take(1)
            .map(Ref::id)
            .collect(),
    };
    let mut resource = Resource::new(
        format!("{GROUP}/EKS/Nodegroup{}", spec.id),
        ResourceKind::Nodegroup,
        json!({
            "ClusterName": cluster.id(),
            "NodegroupName": spec.name,
            "NodeRole": identity.node_role.attr("Arn"),
            "CapacityType": spec.capacity.as_str(),
            "AmiType": spec.ami_type,
            "InstanceTypes": spec.instance_types,
            "DiskSize": spec.disk_size,
            "ScalingConfig": {
                "MinSize": spec.min,
                "DesiredSize": spec.desired,
                "MaxSize": spec.max,
            },
            "Labels": spec.labels,
            "Subnets": subnets,
        }),
    );
    resource.tags = nodegroup_tags(spec, cluster_name);
    resource
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::identity_layer;
    use crate::network::network_layer;

    fn build() -> Cluster {
        let network = network_layer("spark-on-eks", &Ref::new("appcode/appcode"));
        let identity = identity_layer("spark-on-eks");
        cluster_layer("spark-on-eks", &network, &identity)
    }

    fn pool<'a>(cluster: &'a Cluster, name: &str) -> &'a Resource {
        cluster
            .group
            .resources()
            .into_iter()
            .find(|r| r.kind == ResourceKind::Nodegroup && r.properties["NodegroupName"] == name)
            .unwrap()
    }

    #[test]
    fn test_cluster_version_and_endpoints() {
        let cluster = build();
        let eks = cluster.group.find("eks_cluster/EKS").unwrap();
        assert_eq!(eks.properties["Version"], "1.27");
        assert_eq!(eks.properties["ResourcesVpcConfig"]["EndpointPublicAccess"], true);
        assert_eq!(eks.properties["ResourcesVpcConfig"]["EndpointPrivateAccess"], true);
    }

    #[test]
    fn test_node_pool_sizes() {
        let cluster = build();
        let expect = [
            ("etl-ondemand", "ON_DEMAND", 1, 1, 5),
            ("etl-spot", "SPOT", 1, 1, 30),
            ("etl-arm-spot", "SPOT", 0, 0, 30),
        ];
        for (name, capacity, min, desired, max) in expect {
            let p = pool(&cluster, name);
            assert_eq!(p.properties["CapacityType"], capacity);
            assert_eq!(p.properties["ScalingConfig"]["MinSize"], min);
            assert_eq!(p.properties["ScalingConfig"]["DesiredSize"], desired);
            assert_eq!(p.properties["ScalingConfig"]["MaxSize"], max);
            assert_eq!(p.tags["k8s.io/cluster-autoscaler/enabled"], "true");
            assert_eq!(p.tags["k8s.io/cluster-autoscaler/spark-on-eks"], "owned");
        }
        assert_eq!(pool(&cluster, "etl-spot").tags["Name"], "Spot-spark-on-eks");
    }

    #[test]
    fn test_arm_pool_scales_from_zero() {
        let cluster = build();
        let arm = pool(&cluster, "etl-arm-spot");
        assert_eq!(arm.properties["AmiType"], "AL2_ARM_64");
        assert_eq!(arm.properties["Subnets"].as_array().unwrap().len(), 1);
        assert_eq!(
            arm.tags["k8s.io/cluster-autoscaler/node-template/label/arch"],
            "arm64"
        );
        assert_eq!(
            arm.tags["k8s.io/cluster-autoscaler/node-template/label/lifecycle"],
            "Ec2Spot"
        );

        let ondemand = pool(&cluster, "etl-ondemand");
        assert!(
            !ondemand
                .tags
                .keys()
                .any(|k| k.contains("node-template"))
        );
    }

    #[test]
    fn test_kubernetes_objects_wait_for_access() {
        let cluster = build();
        let m = cluster.manifest("x/manifest", vec![json!({"kind": "Namespace"})]);
        assert_eq!(m.depends_on, vec![cluster.access_entry_path().to_string()]);
        assert_eq!(m.properties["ServiceToken"], "${EksclusterKubectlHandler.Arn}");
        assert_eq!(m.properties["ClusterName"], "${EksclusterEKS}");

        let aws_auth = cluster.group.find("eks_cluster/EKS/AwsAuth/manifest").unwrap();
        let roles = aws_auth.properties["Manifest"][0]["data"]["mapRoles"]
            .as_str()
            .unwrap();
        assert!(roles.contains("system:masters"));
        assert!(roles.contains("system:node:{{EC2PrivateDNSName}}"));
    }
}
