use crate::iam;
use etlflow_core::{Group, Ref, Resource, ResourceKind};
use serde_json::json;

pub const GROUP: &str = "iam_roles";

pub const ADMIN_ACTIONS: [&str; 6] = [
    "eks:Describe*",
    "eks:List*",
    "eks:AccessKubernetesApi",
    "ssm:GetParameter",
    "iam:ListRoles",
    "emr-containers:CreateVirtualCluster",
];

pub const NODE_MANAGED_POLICIES: [&str; 4] = [
    "AmazonEKSWorkerNodePolicy",
    "AmazonEKS_CNI_Policy",
    "AmazonEC2ContainerRegistryReadOnly",
    "CloudWatchAgentServerPolicy",
];

#[derive(Debug, Clone)]
pub struct Identity {
    pub group: Group,
    /// Cluster administrator, mapped to `system:masters`
    pub admin_role: Ref,
    /// Instance role of every node pool
    pub node_role: Ref,
    /// EKS control-plane service role
    pub cluster_role: Ref,
}

pub fn identity_layer(cluster_name: &str) -> Identity {
    let mut group = Group::new(GROUP);

    let admin_path = group.child_path("clusterAdmin");
    let admin_role = group.add(
        Resource::new(
            admin_path.clone(),
            ResourceKind::Role,
            json!({ "AssumeRolePolicyDocument": iam::account_root_trust() }),
        )
        .with_tag(format!("eks/{cluster_name}/type"), "admin-role"),
    );
    group.add(
        Resource::new(
            format!("{admin_path}/DefaultPolicy"),
            ResourceKind::Policy,
            iam::policy_properties(
                "clusterAdminDefaultPolicy",
                &[&admin_role],
                vec![iam::allow(&ADMIN_ACTIONS, &["*"])],
            ),
        )
        .suppress(iam::W12_ID, "by default the role has * resource"),
    );

    let managed: Vec<String> = NODE_MANAGED_POLICIES
        .iter()
        .map(|p| iam::managed_policy_arn(p))
        .collect();
    let node_role = group.add(Resource::new(
        group.child_path("NodeInstance-Role"),
        ResourceKind::Role,
        json!({
            "Path": "/",
            "AssumeRolePolicyDocument": iam::service_trust("ec2.amazonaws.com"),
            "ManagedPolicyArns": managed,
        }),
    ));

    let cluster_role = group.add(Resource::new(
        group.child_path("ClusterRole"),
        ResourceKind::Role,
        json!({
            "AssumeRolePolicyDocument": iam::service_trust("eks.amazonaws.com"),
            "ManagedPolicyArns": [iam::managed_policy_arn("AmazonEKSClusterPolicy")],
        }),
    ));

    Identity {
        group,
        admin_role,
        node_role,
        cluster_role,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_role() {
        let identity = identity_layer("spark-on-eks");
        let role = identity.group.find("iam_roles/clusterAdmin").unwrap();
        assert_eq!(role.tags["eks/spark-on-eks/type"], "admin-role");

        let policy = identity
            .group
            .find("iam_roles/clusterAdmin/DefaultPolicy")
            .unwrap();
        let actions = &policy.properties["PolicyDocument"]["Statement"][0]["Action"];
        assert_eq!(actions.as_array().unwrap().len(), ADMIN_ACTIONS.len());
        assert_eq!(policy.properties["Roles"], json!(["${IamrolesClusterAdmin}"]));
    }

    #[test]
    fn test_node_role_policies() {
        let identity = identity_layer("spark-on-eks");
        let role = identity.group.find(identity.node_role.path()).unwrap();
        let arns = role.properties["ManagedPolicyArns"].as_array().unwrap();
        assert_eq!(arns.len(), 4);
        assert_eq!(
            role.properties["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"],
            "ec2.amazonaws.com"
        );
    }
}
