//! Network layer
//!
//! Two-AZ VPC with public and private subnets, a single NAT gateway, VPC
//! endpoints sharing one security group, and the load balancer security
//! groups that only admit CloudFront origin traffic.

use crate::handler::{self, HandlerSpec};
use crate::iam;
use etlflow_core::{Group, Ref, Resource, ResourceKind, aws};
use serde_json::{Value, json};
use tracing::debug;

pub const GROUP: &str = "network-sg";
pub const VPC_CIDR: &str = "10.0.0.0/16";
pub const MAX_AZS: usize = 2;

/// Ingress ports opened on the endpoint security group, from the VPC CIDR only
pub const ENDPOINT_PORTS: [u16; 2] = [443, 444];

pub const JUPYTER_ALB_PORT: u16 = 80;
pub const ARGO_ALB_PORT: u16 = 2746;

pub const CLOUDFRONT_PREFIX_LIST: &str = "com.amazonaws.global.cloudfront.origin-facing";

/// Interface endpoints: (construct id, service suffix)
const INTERFACE_ENDPOINTS: [(&str, &str); 4] = [
    ("EcrDockerEndpoint", "ecr.dkr"),
    ("CWLogsEndpoint", "logs"),
    ("KMSEndpoint", "kms"),
    ("AthenaEndpoint", "athena"),
];

#[derive(Debug, Clone)]
pub struct Network {
    pub group: Group,
    pub vpc: Ref,
    pub public_subnets: Vec<Ref>,
    pub private_subnets: Vec<Ref>,
    pub endpoint_sg: Ref,
    pub jupyter_alb_sg: Ref,
    pub argo_alb_sg: Ref,
    /// Deploy-time id of the CloudFront origin-facing prefix list
    pub prefix_list_id: String,
}

impl Network {
    pub fn vpc_id(&self) -> String {
        self.vpc.id()
    }

    pub fn vpc_cidr(&self) -> String {
        self.vpc.attr("CidrBlock")
    }

    pub fn availability_zones(&self) -> usize {
        self.private_subnets.len()
    }
}

/// Build the network layer. Rejected traffic is logged to `log_bucket` under `vpcRejectlog/`.
pub fn network_layer(cluster_name: &str, log_bucket: &Ref) -> Network {
    let mut group = Group::new(GROUP);

    let vpc = group.add(
        Resource::new(
            group.child_path("eksVpc"),
            ResourceKind::Vpc,
            json!({
                "CidrBlock": VPC_CIDR,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
            }),
        )
        .with_tag("Name", format!("{cluster_name}EksVpc")),
    );

    let igw = group.add(Resource::new(
        group.child_path("eksVpc/IGW"),
        ResourceKind::InternetGateway,
        json!({}),
    ));
    let attachment_path = group.child_path("eksVpc/VPCGW");
    group.add(Resource::new(
        attachment_path.clone(),
        ResourceKind::GatewayAttachment,
        json!({ "VpcId": vpc.id(), "InternetGatewayId": igw.id() }),
    ));

    // 10.0.0.0/18 and 10.0.64.0/18 public, 10.0.128.0/18 and 10.0.192.0/18 private
    let mut public_subnets = Vec::new();
    let mut public_tables = Vec::new();
    for az in 0..MAX_AZS {
        let name = format!("eksVpc/PublicSubnet{}", az + 1);
        let subnet = group.add(
            Resource::new(
                group.child_path(&name),
                ResourceKind::Subnet,
                subnet_properties(&vpc, az, &format!("10.0.{}.0/18", az * 64), true),
            )
            .with_tag("Name", format!("{cluster_name}EksVpc/{name}"))
            .with_tag("kubernetes.io/role/elb", "1")
            .suppress(
                "W33",
                "a public facing ALB is required and ingress from the internet should be permitted.",
            ),
        );
        let table = route_table(&mut group, &vpc, &subnet, &name);
        group.add(
            Resource::new(
                group.child_path(&format!("{name}/DefaultRoute")),
                ResourceKind::Route,
                json!({
                    "RouteTableId": table.id(),
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "GatewayId": igw.id(),
                }),
            )
            .with_dependency(attachment_path.clone()),
        );
        public_subnets.push(subnet);
        public_tables.push(table);
    }

    let eip = group.add(Resource::new(
        group.child_path("eksVpc/PublicSubnet1/EIP"),
        ResourceKind::Eip,
        json!({ "Domain": "vpc" }),
    ));
    let nat = group.add(
        Resource::new(
            group.child_path("eksVpc/PublicSubnet1/NATGateway"),
            ResourceKind::NatGateway,
            json!({
                "SubnetId": public_subnets[0].id(),
                "AllocationId": eip.attr("AllocationId"),
            }),
        )
        .with_dependency(attachment_path.clone()),
    );

    let mut private_subnets = Vec::new();
    let mut private_tables = Vec::new();
    for az in 0..MAX_AZS {
        let name = format!("eksVpc/PrivateSubnet{}", az + 1);
        let subnet = group.add(
            Resource::new(
                group.child_path(&name),
                ResourceKind::Subnet,
                subnet_properties(&vpc, az, &format!("10.0.{}.0/18", 128 + az * 64), false),
            )
            .with_tag("Name", format!("{cluster_name}EksVpc/{name}"))
            .with_tag("kubernetes.io/role/internal-elb", "1"),
        );
        let table = route_table(&mut group, &vpc, &subnet, &name);
        group.add(Resource::new(
            group.child_path(&format!("{name}/DefaultRoute")),
            ResourceKind::Route,
            json!({
                "RouteTableId": table.id(),
                "DestinationCidrBlock": "0.0.0.0/0",
                "NatGatewayId": nat.id(),
            }),
        ));
        private_subnets.push(subnet);
        private_tables.push(table);
    }

    group.add(Resource::new(
        group.child_path("eksVpc/FlowLogCloudWatch"),
        ResourceKind::FlowLog,
        json!({
            "ResourceId": vpc.id(),
            "ResourceType": "VPC",
            "TrafficType": "REJECT",
            "LogDestinationType": "s3",
            "LogDestination": format!("{}/vpcRejectlog/", log_bucket.attr("Arn")),
        }),
    ));

    let vpc_cidr = vpc.attr("CidrBlock");
    let ingress: Vec<Value> = ENDPOINT_PORTS
        .iter()
        .map(|port| tcp_ingress(*port, json!({ "CidrIp": vpc_cidr })))
        .collect();
    let endpoint_sg = group.add(
        Resource::new(
            group.child_path("EndpointSg"),
            ResourceKind::SecurityGroup,
            security_group_properties(&vpc, "Security Group for Endpoint", ingress),
        )
        .with_tag("Name", "SparkOnEKS-VPCEndpointSg")
        .suppress("W40", "Egress IP Protocol of -1 is default and generally considered OK")
        .suppress("W5", "Security Groups with cidr open considered OK"),
    );

    let all_tables: Vec<String> = public_tables
        .iter()
        .chain(private_tables.iter())
        .map(Ref::id)
        .collect();
    group.add(Resource::new(
        group.child_path("eksVpc/S3GatewayEndpoint"),
        ResourceKind::VpcEndpoint,
        json!({
            "ServiceName": format!("com.amazonaws.{}.s3", aws::REGION),
            "VpcEndpointType": "Gateway",
            "VpcId": vpc.id(),
            "RouteTableIds": all_tables,
        }),
    ));

    let private_ids: Vec<String> = private_subnets.iter().map(Ref::id).collect();
    for (id, service) in INTERFACE_ENDPOINTS {
        group.add(Resource::new(
            group.child_path(&format!("eksVpc/{id}")),
            ResourceKind::VpcEndpoint,
            json!({
                "ServiceName": format!("com.amazonaws.{}.{}", aws::REGION, service),
                "VpcEndpointType": "Interface",
                "PrivateDnsEnabled": true,
                "VpcId": vpc.id(),
                "SubnetIds": private_ids,
                "SecurityGroupIds": [endpoint_sg.attr("GroupId")],
            }),
        ));
    }

    let prefix_list_id = managed_prefix_list(&mut group, CLOUDFRONT_PREFIX_LIST);

    let jupyter_alb_sg = group.add(
        Resource::new(
            group.child_path("JupyterAlbSg"),
            ResourceKind::SecurityGroup,
            security_group_properties(
                &vpc,
                "Jupyter ALB, CloudFront origin traffic only",
                vec![tcp_ingress(
                    JUPYTER_ALB_PORT,
                    json!({ "SourcePrefixListId": prefix_list_id }),
                )],
            ),
        )
        .with_tag("Name", format!("{cluster_name}-jupyter-alb"))
        .suppress("W40", "Egress IP Protocol of -1 is default and generally considered OK"),
    );
    let argo_alb_sg = group.add(
        Resource::new(
            group.child_path("ArgoAlbSg"),
            ResourceKind::SecurityGroup,
            security_group_properties(
                &vpc,
                "Argo ALB, CloudFront origin traffic only",
                vec![tcp_ingress(
                    ARGO_ALB_PORT,
                    json!({ "SourcePrefixListId": prefix_list_id }),
                )],
            ),
        )
        .with_tag("Name", format!("{cluster_name}-argo-alb"))
        .suppress("W40", "Egress IP Protocol of -1 is default and generally considered OK"),
    );

    debug!(
        resources = group.resources().len(),
        azs = MAX_AZS,
        "Built network layer"
    );

    Network {
        group,
        vpc,
        public_subnets,
        private_subnets,
        endpoint_sg,
        jupyter_alb_sg,
        argo_alb_sg,
        prefix_list_id,
    }
}

/// Resolve an AWS-managed prefix list id by name through an SDK-call custom resource
fn managed_prefix_list(group: &mut Group, name: &str) -> String {
    let handler = handler::add_handler(
        group,
        HandlerSpec::new(
            "AwsSdkHandler",
            "handlers/aws-sdk-call.zip",
            "Performs AWS SDK calls on behalf of the stack",
        )
        .with_timeout(120)
        .with_statements(vec![iam::allow(
            &["ec2:DescribeManagedPrefixLists"],
            &["*"],
        )]),
    );
    let call = json!({
        "service": "EC2",
        "action": "describeManagedPrefixLists",
        "parameters": {
            "Filters": [{ "Name": "prefix-list-name", "Values": [name] }],
        },
        "region": aws::REGION,
        "physicalResourceId": { "id": format!("{}-prefix-list", name) },
        "outputPaths": ["PrefixLists.0.PrefixListId"],
    });
    let lookup = group.add(Resource::new(
        group.child_path("CloudFrontPrefixList"),
        ResourceKind::AwsSdkCall,
        json!({
            "ServiceToken": handler.service_token(),
            "Create": call,
            "Update": call,
            "InstallLatestAwsSdk": false,
        }),
    ));
    lookup.attr("PrefixLists.0.PrefixListId")
}

fn subnet_properties(vpc: &Ref, az: usize, cidr: &str, public: bool) -> Value {
    json!({
        "VpcId": vpc.id(),
        "CidrBlock": cidr,
        "AvailabilityZone": { "Fn::Select": [az, { "Fn::GetAZs": "" }] },
        "MapPublicIpOnLaunch": public,
    })
}

fn route_table(group: &mut Group, vpc: &Ref, subnet: &Ref, name: &str) -> Ref {
    let table = group.add(Resource::new(
        group.child_path(&format!("{name}/RouteTable")),
        ResourceKind::RouteTable,
        json!({ "VpcId": vpc.id() }),
    ));
    group.add(Resource::new(
        group.child_path(&format!("{name}/RouteTableAssociation")),
        ResourceKind::SubnetRouteTableAssociation,
        json!({ "RouteTableId": table.id(), "SubnetId": subnet.id() }),
    ));
    table
}

fn tcp_ingress(port: u16, peer: Value) -> Value {
    let mut rule = json!({
        "IpProtocol": "tcp",
        "FromPort": port,
        "ToPort": port,
        "Description": format!("tcp {port}"),
    });
    if let (Some(rule), Some(peer)) = (rule.as_object_mut(), peer.as_object()) {
        rule.extend(peer.clone());
    }
    rule
}

fn security_group_properties(vpc: &Ref, description: &str, ingress: Vec<Value>) -> Value {
    json!({
        "GroupDescription": description,
        "VpcId": vpc.id(),
        "SecurityGroupIngress": ingress,
        "SecurityGroupEgress": [{
            "IpProtocol": "-1",
            "CidrIp": "0.0.0.0/0",
            "Description": "Allow all outbound traffic by default",
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> Network {
        network_layer("spark-on-eks", &Ref::new("appcode/appcode"))
    }

    fn ingress_of(network: &Network, sg: &Ref) -> Vec<Value> {
        network.group.find(sg.path()).unwrap().properties["SecurityGroupIngress"]
            .as_array()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_vpc_shape() {
        let network = build();
        assert_eq!(network.public_subnets.len(), 2);
        assert_eq!(network.private_subnets.len(), 2);
        assert_eq!(network.availability_zones(), 2);

        let vpc = network.group.find(network.vpc.path()).unwrap();
        assert_eq!(vpc.properties["CidrBlock"], VPC_CIDR);
        assert_eq!(vpc.tags["Name"], "spark-on-eksEksVpc");

        let nats = network
            .group
            .resources()
            .into_iter()
            .filter(|r| r.kind == ResourceKind::NatGateway)
            .count();
        assert_eq!(nats, 1);
    }

    #[test]
    fn test_endpoint_sg_ingress_is_exact() {
        let network = build();
        let ingress = ingress_of(&network, &network.endpoint_sg);
        let ports: Vec<u64> = ingress.iter().map(|r| r["FromPort"].as_u64().unwrap()).collect();
        assert_eq!(ports, vec![443, 444]);
        for rule in &ingress {
            assert_eq!(rule["CidrIp"], "${NetworksgEksVpc.CidrBlock}");
            assert!(rule.get("SourcePrefixListId").is_none());
        }
    }

    #[test]
    fn test_interface_endpoints_share_one_sg() {
        let network = build();
        let endpoints: Vec<_> = network
            .group
            .resources()
            .into_iter()
            .filter(|r| r.properties["VpcEndpointType"] == "Interface")
            .collect();
        assert_eq!(endpoints.len(), 4);
        for e in endpoints {
            assert_eq!(
                e.properties["SecurityGroupIds"],
                json!(["${NetworksgEndpointSg.GroupId}"])
            );
        }
    }

    #[test]
    fn test_alb_sgs_only_allow_prefix_list() {
        let network = build();
        for (sg, port) in [
            (&network.jupyter_alb_sg, JUPYTER_ALB_PORT),
            (&network.argo_alb_sg, ARGO_ALB_PORT),
        ] {
            let ingress = ingress_of(&network, sg);
            assert_eq!(ingress.len(), 1);
            assert_eq!(ingress[0]["FromPort"], port);
            assert_eq!(ingress[0]["ToPort"], port);
            assert_eq!(ingress[0]["SourcePrefixListId"], network.prefix_list_id);
            assert!(ingress[0].get("CidrIp").is_none());
        }
    }

    #[test]
    fn test_flow_log_rejects_to_code_bucket() {
        let network = build();
        let log = network
            .group
            .resources()
            .into_iter()
            .find(|r| r.kind == ResourceKind::FlowLog)
            .unwrap();
        assert_eq!(log.properties["TrafficType"], "REJECT");
        assert_eq!(
            log.properties["LogDestination"],
            "${AppcodeAppcode.Arn}/vpcRejectlog/"
        );
    }
}
