//! Change plan between the synthesized template and the last deployment

use crate::state::{ResourceState, StackState};
use etlflow_core::ResourceGraph;
use etlflow_core::synth::render_resource;
use serde::{Deserialize, Serialize};

/// A planned change to one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,

    /// CloudFormation type, e.g. `AWS::EKS::Cluster`
    pub resource_type: String,

    pub logical_id: String,

    /// Construct path, e.g. `eks_cluster/EKS`
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Ordered list of changes
///
/// Creates, updates and no-ops follow the apply order of the graph. Deletes
/// come last, in reverse of the order they were deployed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,

    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
        }
    }

    pub fn empty() -> Self {
        Self {
            actions: Vec::new(),
            has_changes: false,
        }
    }

    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.no_change
        )
    }
}

/// Rendered resources of `graph` as they will be recorded after a deploy
pub fn snapshot(graph: &ResourceGraph) -> Vec<ResourceState> {
    graph
        .iter()
        .enumerate()
        .map(|(position, resource)| ResourceState {
            logical_id: resource.logical_id(),
            path: resource.path.clone(),
            resource_type: resource.kind.cfn_type(),
            position,
            definition: render_resource(resource),
        })
        .collect()
}

/// Compare `graph` against the last deployment of the stack
pub fn plan_changes(graph: &ResourceGraph, previous: Option<&StackState>) -> Plan {
    let current = snapshot(graph);
    let mut actions: Vec<Action> = current
        .iter()
        .map(|res| {
            let action_type = match previous.and_then(|p| p.get_resource(&res.logical_id)) {
                None => ActionType::Create,
                Some(old) if old.definition != res.definition => ActionType::Update,
                Some(_) => ActionType::NoOp,
            };
            Action {
                action_type,
                resource_type: res.resource_type.clone(),
                logical_id: res.logical_id.clone(),
                path: res.path.clone(),
            }
        })
        .collect();

    if let Some(previous) = previous {
        let mut removed: Vec<&ResourceState> = previous
            .resources
            .values()
            .filter(|old| !current.iter().any(|c| c.logical_id == old.logical_id))
            .collect();
        removed.sort_by(|a, b| b.position.cmp(&a.position));
        actions.extend(removed.into_iter().map(|old| Action {
            action_type: ActionType::Delete,
            resource_type: old.resource_type.clone(),
            logical_id: old.logical_id.clone(),
            path: old.path.clone(),
        }));
    }

    let plan = Plan::new(actions);
    tracing::debug!(summary = %plan.summary(), "Computed change plan");
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use etlflow_core::{Group, Resource, ResourceKind};
    use serde_json::json;

    fn graph(versioned: bool, with_queue: bool) -> ResourceGraph {
        let mut root = Group::new("");
        let bucket = root.add(Resource::new(
            "logs",
            ResourceKind::Bucket,
            json!({ "Versioning": versioned }),
        ));
        root.add(Resource::new(
            "role",
            ResourceKind::Role,
            json!({ "Bucket": bucket.id() }),
        ));
        if with_queue {
            root.add(Resource::new("queue", ResourceKind::Custom("Queue".into()), json!({})));
        }
        ResourceGraph::build(&root).unwrap()
    }

    fn deployed(graph: &ResourceGraph) -> StackState {
        let mut stack = StackState::new("etl");
        for res in snapshot(graph) {
            stack.set_resource(res);
        }
        stack
    }

    #[test]
    fn test_first_deploy_creates_everything_in_order() {
        let plan = plan_changes(&graph(false, false), None);
        let ids: Vec<&str> = plan.actions.iter().map(|a| a.logical_id.as_str()).collect();
        assert_eq!(ids, vec!["Logs", "Role"]);
        assert!(plan.actions.iter().all(|a| a.action_type == ActionType::Create));
        assert!(plan.has_changes);
    }

    #[test]
    fn test_unchanged_stack_is_noop() {
        let g = graph(false, false);
        let plan = plan_changes(&g, Some(&deployed(&g)));
        assert!(!plan.has_changes);
        assert_eq!(plan.summary().no_change, 2);
    }

    #[test]
    fn test_changed_and_removed_resources() {
        let before = graph(false, true);
        let plan = plan_changes(&graph(true, false), Some(&deployed(&before)));
        assert_eq!(
            plan.summary(),
            PlanSummary {
                create: 0,
                update: 1,
                delete: 1,
                no_change: 1,
            }
        );
        assert_eq!(plan.actions[0].action_type, ActionType::Update);
        let last = plan.actions.last().unwrap();
        assert_eq!(last.action_type, ActionType::Delete);
        assert_eq!(last.logical_id, "Queue");
        assert_eq!(last.resource_type, "Custom::Queue");
    }

    #[test]
    fn test_summary_display() {
        let plan = plan_changes(&graph(false, false), None);
        assert_eq!(
            plan.summary().to_string(),
            "2 to create, 0 to update, 0 to delete, 0 unchanged"
        );
    }
}
