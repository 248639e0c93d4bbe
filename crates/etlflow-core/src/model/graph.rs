//! Provisioning dependency graph
//!
//! Flattens a construct tree into a validated, topologically ordered list of
//! resources. Group dependencies are expanded: depending on a group means
//! depending on every resource inside it, and a dependency declared on a
//! group applies to every resource inside it.
//!
//! Besides declared dependencies, a resource also waits for every resource
//! it references through `${Id.Attr}`, `Ref` or `Fn::GetAtt`. Only declared
//! dependencies are rendered as `DependsOn`.

use super::group::{Group, Node};
use super::resource::{Resource, referenced_ids};
use crate::error::{CoreError, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Acyclic, topologically ordered resource graph
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    /// Resources in apply order
    resources: Vec<Resource>,
    /// Declared plus referenced dependencies, aligned with `resources`
    edges: Vec<Vec<String>>,
    /// path -> position in `resources`
    index: HashMap<String, usize>,
}

impl ResourceGraph {
    /// Flatten and validate `root`
    pub fn build(root: &Group) -> Result<Self> {
        let mut flat: Vec<Resource> = Vec::new();
        let mut members: HashMap<String, Vec<String>> = HashMap::new();
        flatten(root, &[], &mut flat, &mut members)?;

        let mut seen_ids: HashMap<String, String> = HashMap::new();
        let mut position: HashMap<String, usize> = HashMap::new();
        for (i, r) in flat.iter().enumerate() {
            if position.insert(r.path.clone(), i).is_some() {
                return Err(CoreError::DuplicateResource(r.path.clone()));
            }
            let id = r.logical_id();
            if id.is_empty() {
                return Err(CoreError::DuplicateResource(format!(
                    "'{}' has no usable logical id",
                    r.path
                )));
            }
            if let Some(other) = seen_ids.insert(id.clone(), r.path.clone()) {
                return Err(CoreError::DuplicateResource(format!(
                    "'{}' and '{}' both map to logical id {}",
                    other, r.path, id
                )));
            }
        }

        // expand group targets into resource paths
        for r in flat.iter_mut() {
            let mut resolved: Vec<String> = Vec::new();
            for target in &r.depends_on {
                let expanded: Vec<String> = if position.contains_key(target) {
                    vec![target.clone()]
                } else if let Some(paths) = members.get(target) {
                    paths.clone()
                } else {
                    return Err(CoreError::UnknownDependency {
                        from: r.path.clone(),
                        to: target.clone(),
                    });
                };
                for p in expanded {
                    if p != r.path && !resolved.contains(&p) {
                        resolved.push(p);
                    }
                }
            }
            r.depends_on = resolved;
        }

        let by_id: HashMap<String, &str> = flat
            .iter()
            .map(|r| (r.logical_id(), r.path.as_str()))
            .collect();
        let edges: Vec<Vec<String>> = flat
            .iter()
            .map(|r| {
                let mut deps = r.depends_on.clone();
                for id in referenced_ids(&r.properties) {
                    if let Some(&path) = by_id.get(&id)
                        && path != r.path
                        && !deps.iter().any(|d| d == path)
                    {
                        deps.push(path.to_string());
                    }
                }
                deps
            })
            .collect();

        let order = topological_order(&flat, &edges, &position)?;
        let mut slots: Vec<Option<(Resource, Vec<String>)>> =
            flat.into_iter().zip(edges).map(Some).collect();
        let (resources, edges): (Vec<Resource>, Vec<Vec<String>>) = order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .unzip();
        let index = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.path.clone(), i))
            .collect();

        debug!(resources = resources.len(), "Built resource graph");
        Ok(Self {
            resources,
            edges,
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources in apply order
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn order(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.path.as_str()).collect()
    }

    pub fn get(&self, path: &str) -> Option<&Resource> {
        self.index.get(path).map(|&i| &self.resources[i])
    }

    /// Position of `path` in apply order
    pub fn position(&self, path: &str) -> Option<usize> {
        self.index.get(path).copied()
    }

    /// Direct dependencies of `path`, declared and referenced
    pub fn dependencies(&self, path: &str) -> &[String] {
        self.index
            .get(path)
            .map(|&i| self.edges[i].as_slice())
            .unwrap_or(&[])
    }

    /// Whether `path` (transitively) waits for `on`
    pub fn depends_on(&self, path: &str, on: &str) -> bool {
        let mut stack: Vec<&str> = vec![path];
        let mut visited: HashSet<&str> = HashSet::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            for dep in self.dependencies(current) {
                if dep == on {
                    return true;
                }
                stack.push(dep.as_str());
            }
        }
        false
    }

    /// Resources that (transitively) wait for `path`
    pub fn dependents(&self, path: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|r| self.depends_on(&r.path, path))
            .map(|r| r.path.as_str())
            .collect()
    }
}

/// Collect resources and group membership, pushing group dependencies down
fn flatten(
    group: &Group,
    inherited: &[String],
    out: &mut Vec<Resource>,
    members: &mut HashMap<String, Vec<String>>,
) -> Result<Vec<String>> {
    let mut deps: Vec<String> = inherited.to_vec();
    for d in &group.depends_on {
        if !deps.contains(d) {
            deps.push(d.clone());
        }
    }

    let mut paths = Vec::new();
    for child in &group.children {
        match child {
            Node::Resource(r) => {
                let mut r = r.clone();
                for d in &deps {
                    r.add_dependency(d.clone());
                }
                paths.push(r.path.clone());
                out.push(r);
            }
            Node::Group(g) => {
                let nested = flatten(g, &deps, out, members)?;
                paths.extend(nested);
            }
        }
    }

    if !group.path.is_empty() {
        if members.contains_key(&group.path) {
            return Err(CoreError::DuplicateResource(group.path.clone()));
        }
        members.insert(group.path.clone(), paths.clone());
    }
    Ok(paths)
}

/// Kahn's algorithm; ties are broken by declaration order
fn topological_order(
    flat: &[Resource],
    edges: &[Vec<String>],
    position: &HashMap<String, usize>,
) -> Result<Vec<usize>> {
    let n = flat.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, deps) in edges.iter().enumerate() {
        for dep in deps {
            let j = position[dep];
            in_degree[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &k in &dependents[i] {
            in_degree[k] -= 1;
            if in_degree[k] == 0 {
                ready.insert(k);
            }
        }
    }

    if order.len() != n {
        let stuck: Vec<&str> = (0..n)
            .filter(|&i| in_degree[i] > 0)
            .map(|i| flat[i].path.as_str())
            .collect();
        return Err(CoreError::CircularDependency(stuck.join(", ")));
    }
    Ok(order)
}
