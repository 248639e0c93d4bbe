use super::resource::{Ref, Resource};

/// A node of the construct tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Resource(Resource),
    Group(Group),
}

/// A named subtree, as returned by the component factories
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    pub path: String,
    pub children: Vec<Node>,
    /// Paths every resource in this group waits for
    pub depends_on: Vec<String>,
}

impl Group {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Path of a direct child called `id`
    pub fn child_path(&self, id: &str) -> String {
        if self.path.is_empty() {
            id.to_string()
        } else {
            format!("{}/{}", self.path, id)
        }
    }

    /// Add a resource and return a reference to it
    pub fn add(&mut self, resource: Resource) -> Ref {
        let r = resource.reference();
        self.children.push(Node::Resource(resource));
        r
    }

    pub fn add_group(&mut self, group: Group) {
        self.children.push(Node::Group(group));
    }

    pub fn add_dependency(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.depends_on.contains(&path) {
            self.depends_on.push(path);
        }
    }

    /// All resources below this group, in declaration order
    pub fn resources(&self) -> Vec<&Resource> {
        let mut out = Vec::new();
        collect(self, &mut out);
        out
    }

    pub fn find(&self, path: &str) -> Option<&Resource> {
        self.resources().into_iter().find(|r| r.path == path)
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut Resource> {
        for child in &mut self.children {
            match child {
                Node::Resource(r) if r.path == path => return Some(r),
                Node::Resource(_) => {}
                Node::Group(g) => {
                    if let Some(r) = g.find_mut(path) {
                        return Some(r);
                    }
                }
            }
        }
        None
    }

    pub fn find_group(&self, path: &str) -> Option<&Group> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|child| match child {
            Node::Group(g) => g.find_group(path),
            Node::Resource(_) => None,
        })
    }
}

fn collect<'a>(group: &'a Group, out: &mut Vec<&'a Resource>) {
    for child in &group.children {
        match child {
            Node::Resource(r) => out.push(r),
            Node::Group(g) => collect(g, out),
        }
    }
}

/// Attach `condition` to every resource under `group` matching `predicate`.
///
/// Returns how many resources were stamped.
pub fn apply_condition<F>(group: &mut Group, predicate: &F, condition: &str) -> usize
where
    F: Fn(&Resource) -> bool,
{
    let mut count = 0;
    for child in &mut group.children {
        match child {
            Node::Resource(r) => {
                if predicate(r) {
                    r.condition = Some(condition.to_string());
                    count += 1;
                }
            }
            Node::Group(g) => count += apply_condition(g, predicate, condition),
        }
    }
    count
}

/// Add a tag to every resource under `group`. Tags already set on a resource win.
pub fn apply_tag(group: &mut Group, key: &str, value: &str) {
    for child in &mut group.children {
        match child {
            Node::Resource(r) => {
                r.tags
                    .entry(key.to_string())
                    .or_insert_with(|| value.to_string());
            }
            Node::Group(g) => apply_tag(g, key, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::resource::ResourceKind;
    use serde_json::json;

    fn tree() -> Group {
        let mut root = Group::new("");
        let mut metrics = Group::new("SendMetrics");
        metrics.add(Resource::new(
            "SendMetrics/SolutionHelper",
            ResourceKind::Function,
            json!({}),
        ));
        metrics.add(Resource::new(
            "SendMetrics/UUIDCustomResource",
            ResourceKind::Custom("CreateUUID".into()),
            json!({}),
        ));
        let mut nested = Group::new("SendMetrics/LambdaProvider");
        nested.add(Resource::new(
            "SendMetrics/LambdaProvider/framework-onEvent",
            ResourceKind::Function,
            json!({}),
        ));
        metrics.add_group(nested);
        root.add(Resource::new("appcode/appcode", ResourceKind::Bucket, json!({})));
        root.add_group(metrics);
        root
    }

    #[test]
    fn test_apply_condition_stamps_matching_leaves() {
        let mut root = tree();
        let count = apply_condition(
            &mut root,
            &|r: &Resource| r.path.starts_with("SendMetrics/"),
            "AnonymousDatatoAWS",
        );

        assert_eq!(count, 3);
        assert!(root.find("appcode/appcode").unwrap().condition.is_none());
        assert_eq!(
            root.find("SendMetrics/LambdaProvider/framework-onEvent")
                .unwrap()
                .condition
                .as_deref(),
            Some("AnonymousDatatoAWS")
        );
    }

    #[test]
    fn test_apply_condition_by_kind() {
        let mut root = tree();
        let count = apply_condition(
            &mut root,
            &|r: &Resource| matches!(r.kind, ResourceKind::Custom(_)),
            "C",
        );
        assert_eq!(count, 1);
    }

    #[test]
    fn test_apply_tag_keeps_existing() {
        let mut root = Group::new("");
        root.add(
            Resource::new("vpc", ResourceKind::Vpc, json!({})).with_tag("project", "mine"),
        );
        root.add(Resource::new("bucket", ResourceKind::Bucket, json!({})));

        apply_tag(&mut root, "project", "sqlbasedetl");

        assert_eq!(root.find("vpc").unwrap().tags["project"], "mine");
        assert_eq!(root.find("bucket").unwrap().tags["project"], "sqlbasedetl");
    }

    #[test]
    fn test_child_path() {
        assert_eq!(Group::new("").child_path("x"), "x");
        assert_eq!(Group::new("eks_sa").child_path("x"), "eks_sa/x");
    }

    #[test]
    fn test_find_group_and_mut() {
        let mut root = tree();
        assert!(root.find_group("SendMetrics/LambdaProvider").is_some());

        root.find_mut("appcode/appcode").unwrap().add_dependency("x");
        assert_eq!(root.find("appcode/appcode").unwrap().depends_on, vec!["x"]);
    }
}
