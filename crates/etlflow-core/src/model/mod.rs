pub mod graph;
pub mod group;
pub mod resource;

pub use graph::ResourceGraph;
pub use group::{Group, Node, apply_condition, apply_tag};
pub use resource::{
    Ref, RemovalPolicy, Resource, ResourceKind, Suppression, TagFormat, aws, logical_id,
};
