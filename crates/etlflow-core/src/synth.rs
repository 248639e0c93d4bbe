//! CloudFormation synthesis
//!
//! Renders a [`ResourceGraph`] into a CloudFormation template. Any string
//! that carries a `${...}` deploy-time reference is wrapped in `Fn::Sub`, so
//! resource builders can stay with plain strings.

use crate::error::Result;
use crate::model::{RemovalPolicy, Resource, ResourceGraph, TagFormat, logical_id};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

pub const FORMAT_VERSION: &str = "2010-09-09";

/// A stack output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub value: String,
    pub description: Option<String>,
}

impl Output {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Key under `Outputs`. Output keys are alphanumeric, so `CODE_BUCKET` becomes `CODEBUCKET`.
    pub fn key(&self) -> String {
        logical_id(&self.name)
    }
}

/// Template-level sections that do not belong to any single resource
#[derive(Debug, Clone, Default)]
pub struct Template {
    pub description: Option<String>,
    pub parameters: Map<String, Value>,
    pub mappings: Map<String, Value>,
    pub conditions: Map<String, Value>,
    pub outputs: Vec<Output>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, value: Value) {
        self.parameters.insert(name.into(), value);
    }

    pub fn add_mapping(&mut self, name: impl Into<String>, value: Value) {
        self.mappings.insert(name.into(), value);
    }

    pub fn add_condition(&mut self, name: impl Into<String>, value: Value) {
        self.conditions.insert(name.into(), value);
    }

    pub fn add_output(&mut self, output: Output) {
        self.outputs.push(output);
    }

    /// Render the full template document
    #[instrument(skip_all, fields(resources = graph.len()))]
    pub fn render(&self, graph: &ResourceGraph) -> Value {
        let mut doc = Map::new();
        doc.insert("AWSTemplateFormatVersion".into(), json!(FORMAT_VERSION));
        if let Some(description) = &self.description {
            doc.insert("Description".into(), json!(description));
        }
        if !self.parameters.is_empty() {
            doc.insert("Parameters".into(), Value::Object(self.parameters.clone()));
        }
        if !self.mappings.is_empty() {
            doc.insert("Mappings".into(), Value::Object(self.mappings.clone()));
        }
        if !self.conditions.is_empty() {
            doc.insert("Conditions".into(), Value::Object(self.conditions.clone()));
        }

        let mut resources = Map::new();
        for resource in graph.iter() {
            resources.insert(resource.logical_id(), render_resource(resource));
        }
        doc.insert("Resources".into(), Value::Object(resources));

        if !self.outputs.is_empty() {
            let mut outputs = Map::new();
            for output in &self.outputs {
                let mut body = Map::new();
                body.insert("Value".into(), wrap_sub(json!(output.value)));
                if let Some(description) = &output.description {
                    body.insert("Description".into(), json!(description));
                }
                outputs.insert(output.key(), Value::Object(body));
            }
            doc.insert("Outputs".into(), Value::Object(outputs));
        }

        debug!("Rendered template");
        Value::Object(doc)
    }

    pub fn render_json(&self, graph: &ResourceGraph) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.render(graph))?)
    }
}

/// Render one resource entry
pub fn render_resource(resource: &Resource) -> Value {
    let mut properties = match &resource.properties {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("Value".into(), other.clone());
            map
        }
    };

    if !resource.tags.is_empty() {
        match resource.kind.tag_format() {
            TagFormat::List => {
                let tags: Vec<Value> = resource
                    .tags
                    .iter()
                    .map(|(k, v)| json!({ "Key": k, "Value": v }))
                    .collect();
                properties.insert("Tags".into(), Value::Array(tags));
            }
            TagFormat::Map => {
                let tags: Map<String, Value> = resource
                    .tags
                    .iter()
                    .map(|(k, v)| (k.clone(), json!(v)))
                    .collect();
                properties.insert("Tags".into(), Value::Object(tags));
            }
            TagFormat::None => {}
        }
    }

    let mut entry = Map::new();
    entry.insert("Type".into(), json!(resource.kind.cfn_type()));
    if !properties.is_empty() {
        entry.insert("Properties".into(), wrap_sub(Value::Object(properties)));
    }
    if !resource.depends_on.is_empty() {
        let ids: Vec<String> = resource
            .depends_on
            .iter()
            .map(|p| crate::model::logical_id(p))
            .collect();
        entry.insert("DependsOn".into(), json!(ids));
    }
    if let Some(condition) = &resource.condition {
        entry.insert("Condition".into(), json!(condition));
    }
    let policy = match resource.removal {
        RemovalPolicy::Retain => "Retain",
        RemovalPolicy::Destroy => "Delete",
    };
    entry.insert("DeletionPolicy".into(), json!(policy));
    entry.insert("UpdateReplacePolicy".into(), json!(policy));

    if !resource.suppressions.is_empty() {
        let rules: Vec<Value> = resource
            .suppressions
            .iter()
            .map(|s| json!({ "id": s.id, "reason": s.reason }))
            .collect();
        entry.insert(
            "Metadata".into(),
            json!({ "cfn_nag": { "rules_to_suppress": rules } }),
        );
    }

    Value::Object(entry)
}

/// Wrap every string holding a `${...}` reference in `Fn::Sub`.
///
/// Existing intrinsic functions are left untouched.
pub fn wrap_sub(value: Value) -> Value {
    match value {
        Value::String(s) if s.contains("${") => json!({ "Fn::Sub": s }),
        Value::Array(items) => Value::Array(items.into_iter().map(wrap_sub).collect()),
        Value::Object(map) if is_intrinsic(&map) => Value::Object(map),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, wrap_sub(v))).collect()),
        other => other,
    }
}

fn is_intrinsic(map: &Map<String, Value>) -> bool {
    map.len() == 1
        && map
            .keys()
            .next()
            .is_some_and(|k| k == "Ref" || k == "Condition" || k.starts_with("Fn::"))
}
