//! Manifest loader
//!
//! Reads YAML templates from the local source tree or a remote URL, performs
//! literal `{{token}}` substitution and parses the result into JSON values
//! that can be embedded in the provisioning plan.
//!
//! Substitution is plain find/replace applied in the insertion order of
//! [`Fields`]. There is no escaping, so callers must pick placeholder tokens
//! that do not overlap.

use crate::error::{CoreError, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Directory (relative to the source dir) that holds the templates
pub const RESOURCE_DIR: &str = "app_resources";

/// Placeholders that must not survive substitution.
///
/// Dotted expressions such as Argo's `{{inputs.parameters.image}}` are left
/// alone on purpose: they belong to the workload, not to us.
const PLACEHOLDER_PATTERN: &str = r"\{\{[A-Za-z_][A-Za-z0-9_]*\}\}";

/// Ordered token -> replacement mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    entries: Vec<(String, String)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, token: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(token, value);
        self
    }

    /// Insert a token. Re-inserting an existing token keeps its original position.
    pub fn insert(&mut self, token: impl Into<String>, value: impl Into<String>) {
        let token = token.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(t, _)| *t == token) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((token, value)),
        }
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(t, v)| (t.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

/// A parsed template: one document, or every document of a multi-document stream
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    Single(serde_json::Value),
    Multi(Vec<serde_json::Value>),
}

impl Manifest {
    pub fn documents(&self) -> Vec<&serde_json::Value> {
        match self {
            Manifest::Single(doc) => vec![doc],
            Manifest::Multi(docs) => docs.iter().collect(),
        }
    }

    pub fn into_documents(self) -> Vec<serde_json::Value> {
        match self {
            Manifest::Single(doc) => vec![doc],
            Manifest::Multi(docs) => docs,
        }
    }

    /// Collapse into a single JSON value (multi-document streams become an array)
    pub fn into_value(self) -> serde_json::Value {
        match self {
            Manifest::Single(doc) => doc,
            Manifest::Multi(docs) => serde_json::Value::Array(docs),
        }
    }

    /// Canonical YAML rendering, documents separated by `---`
    pub fn to_yaml(&self) -> Result<String> {
        let mut out = String::new();
        for (i, doc) in self.documents().into_iter().enumerate() {
            if i > 0 {
                out.push_str("---\n");
            }
            let rendered = serde_yaml::to_string(doc).map_err(|e| CoreError::InvalidYaml {
                source_name: "<render>".to_string(),
                message: e.to_string(),
            })?;
            out.push_str(&rendered);
        }
        Ok(out)
    }
}

/// Where a template comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateLocation {
    Local(PathBuf),
    Remote(url::Url),
}

impl TemplateLocation {
    pub fn parse(location: &str) -> Result<Self> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let url = url::Url::parse(location)
                .map_err(|e| CoreError::InvalidLocation(format!("{location}: {e}")))?;
            Ok(TemplateLocation::Remote(url))
        } else if location.is_empty() {
            Err(CoreError::InvalidLocation("empty template location".to_string()))
        } else {
            Ok(TemplateLocation::Local(PathBuf::from(location)))
        }
    }
}

/// Apply every field to `text`, in insertion order
pub fn substitute(text: &str, fields: &Fields) -> String {
    let mut out = text.to_string();
    for (token, value) in fields.iter() {
        if token.is_empty() {
            continue;
        }
        out = out.replace(token, value);
    }
    out
}

/// Placeholder tokens still present in `text`, deduplicated, in order of appearance
pub fn unresolved_placeholders(text: &str) -> Result<Vec<String>> {
    let re = Regex::new(PLACEHOLDER_PATTERN)?;
    let mut found: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        if !found.iter().any(|f| f == m.as_str()) {
            found.push(m.as_str().to_string());
        }
    }
    Ok(found)
}

/// Parse YAML text into a manifest
pub fn parse_yaml(text: &str, source_name: &str, multi_resource: bool) -> Result<Manifest> {
    let invalid = |e: serde_yaml::Error| CoreError::InvalidYaml {
        source_name: source_name.to_string(),
        message: e.to_string(),
    };

    if multi_resource {
        let mut docs = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = serde_json::Value::deserialize(document).map_err(invalid)?;
            // a trailing `---` yields an empty document
            if !value.is_null() {
                docs.push(value);
            }
        }
        Ok(Manifest::Multi(docs))
    } else {
        let value: serde_json::Value = serde_yaml::from_str(text).map_err(invalid)?;
        Ok(Manifest::Single(value))
    }
}

fn substitute_checked(text: &str, fields: &Fields, source_name: &str) -> Result<String> {
    let replaced = substitute(text, fields);
    let leftover = unresolved_placeholders(&replaced)?;
    if !leftover.is_empty() {
        return Err(CoreError::UnresolvedPlaceholder {
            source_name: source_name.to_string(),
            tokens: leftover.join(", "),
        });
    }
    Ok(replaced)
}

fn read_local(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(CoreError::TemplateNotFound(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|e| CoreError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load a local YAML file as-is
#[instrument(fields(path = %path.display()))]
pub fn load_yaml_local(path: &Path, multi_resource: bool) -> Result<Manifest> {
    let content = read_local(path)?;
    debug!(bytes = content.len(), "Loaded template");
    parse_yaml(&content, &path.display().to_string(), multi_resource)
}

/// Load a local YAML file, substituting `fields` first.
///
/// With `write_output` the canonical YAML is written back over the source file.
#[instrument(skip(fields), fields(path = %path.display(), field_count = fields.len()))]
pub fn load_yaml_replace_var_local(
    path: &Path,
    fields: &Fields,
    multi_resource: bool,
    write_output: bool,
) -> Result<Manifest> {
    let source_name = path.display().to_string();
    let content = read_local(path)?;
    let replaced = substitute_checked(&content, fields, &source_name)?;
    let manifest = parse_yaml(&replaced, &source_name, multi_resource)?;

    if write_output {
        let rendered = manifest.to_yaml()?;
        std::fs::write(path, rendered).map_err(|e| CoreError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        info!("Wrote substituted template back to source");
    }

    Ok(manifest)
}

async fn fetch_remote(client: &reqwest::Client, url: &str) -> Result<String> {
    let fetch_err = |e: reqwest::Error| CoreError::RemoteFetch {
        url: url.to_string(),
        message: e.to_string(),
    };
    let response = client
        .get(url)
        .send()
        .await
        .map_err(fetch_err)?
        .error_for_status()
        .map_err(fetch_err)?;
    response.text().await.map_err(fetch_err)
}

/// Load a remote YAML document as-is
pub async fn load_yaml_remotely(url: &str, multi_resource: bool) -> Result<Manifest> {
    let client = reqwest::Client::new();
    let content = fetch_remote(&client, url).await?;
    parse_yaml(&content, url, multi_resource)
}

/// Load a remote YAML document, substituting `fields` first
pub async fn load_yaml_replace_var_remotely(
    url: &str,
    fields: &Fields,
    multi_resource: bool,
) -> Result<Manifest> {
    let client = reqwest::Client::new();
    let content = fetch_remote(&client, url).await?;
    let replaced = substitute_checked(&content, fields, url)?;
    parse_yaml(&replaced, url, multi_resource)
}

/// Template loader bound to a source directory
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    source_dir: PathBuf,
    client: reqwest::Client,
}

impl ManifestLoader {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Resolve a template name against `<source>/app_resources`. Absolute paths pass through.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.source_dir.join(RESOURCE_DIR).join(path)
        }
    }

    /// Load a template without substitution
    pub fn load(&self, name: &str, multi_resource: bool) -> Result<Manifest> {
        load_yaml_local(&self.resolve(name), multi_resource)
    }

    /// Load a template with substitution
    pub fn load_with(&self, name: &str, fields: &Fields, multi_resource: bool) -> Result<Manifest> {
        load_yaml_replace_var_local(&self.resolve(name), fields, multi_resource, false)
    }

    /// Load from either a local template name or an http(s) URL
    pub async fn fetch(
        &self,
        location: &str,
        fields: &Fields,
        multi_resource: bool,
    ) -> Result<Manifest> {
        match TemplateLocation::parse(location)? {
            TemplateLocation::Local(path) => {
                let path = self.resolve(&path.to_string_lossy());
                load_yaml_replace_var_local(&path, fields, multi_resource, false)
            }
            TemplateLocation::Remote(url) => {
                let content = fetch_remote(&self.client, url.as_str()).await?;
                let replaced = substitute_checked(&content, fields, url.as_str())?;
                parse_yaml(&replaced, url.as_str(), multi_resource)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_template(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_substitute_replaces_every_occurrence() {
        let fields = Fields::new()
            .with("{{region_name}}", "eu-west-1")
            .with("{{cluster_name}}", "spark-on-eks");
        let text = "region: {{region_name}}\nname: {{cluster_name}}\nagain: {{region_name}}";

        let out = substitute(text, &fields);

        assert_eq!(
            out,
            "region: eu-west-1\nname: spark-on-eks\nagain: eu-west-1"
        );
        assert!(!out.contains("{{"));
    }

    #[test]
    fn test_substitute_uses_insertion_order() {
        // the first replacement produces the second token
        let fields = Fields::new().with("{{a}}", "{{b}}").with("{{b}}", "done");
        assert_eq!(substitute("{{a}}", &fields), "done");

        let reversed = Fields::new().with("{{b}}", "done").with("{{a}}", "{{b}}");
        assert_eq!(substitute("{{a}}", &reversed), "{{b}}");
    }

    #[test]
    fn test_fields_reinsert_keeps_position() {
        let mut fields = Fields::new().with("{{x}}", "1").with("{{y}}", "2");
        fields.insert("{{x}}", "3");

        let entries: Vec<_> = fields.iter().collect();
        assert_eq!(entries, vec![("{{x}}", "3"), ("{{y}}", "2")]);
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let fields = Fields::new().with("", "");
        assert_eq!(substitute("image: spark", &fields), "image: spark");
    }

    #[test]
    fn test_unresolved_ignores_dotted_expressions() {
        let text = "a: {{inputs.parameters.image}}\nb: {{ .Release.Name }}\nc: {{codeBucket}}";
        let leftover = unresolved_placeholders(text).unwrap();
        assert_eq!(leftover, vec!["{{codeBucket}}".to_string()]);
    }

    #[test]
    fn test_load_replace_two_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(
            dir.path(),
            "alb-values.yaml",
            "region: {{region_name}}\nclusterName: {{cluster_name}}\nserviceAccount:\n  create: false\n",
        );
        let fields = Fields::new()
            .with("{{region_name}}", "us-east-1")
            .with("{{cluster_name}}", "spark-on-eks");

        let manifest = load_yaml_replace_var_local(&path, &fields, false, false).unwrap();
        let doc = manifest.into_value();

        assert_eq!(doc["region"], "us-east-1");
        assert_eq!(doc["clusterName"], "spark-on-eks");
        assert!(!serde_json::to_string(&doc).unwrap().contains("{{"));
    }

    #[test]
    fn test_missing_placeholder_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(dir.path(), "v.yaml", "a: {{codeBucket}}\nb: {{region}}\n");
        let fields = Fields::new().with("{{codeBucket}}", "bucket");

        let err = load_yaml_replace_var_local(&path, &fields, false, false).unwrap_err();
        match err {
            CoreError::UnresolvedPlaceholder { tokens, .. } => assert_eq!(tokens, "{{region}}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_yaml_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(dir.path(), "bad.yaml", "key: [unclosed\n  - : :\n");

        let err = load_yaml_local(&path, false).unwrap_err();
        assert!(matches!(err, CoreError::InvalidYaml { .. }));
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_yaml_local(&dir.path().join("nope.yaml"), false).unwrap_err();
        assert!(matches!(err, CoreError::TemplateNotFound(_)));
    }

    #[test]
    fn test_multi_document_drops_empty_documents() {
        let text = "kind: Role\n---\nkind: RoleBinding\n---\n";
        let manifest = parse_yaml(text, "rbac", true).unwrap();

        let docs = manifest.into_documents();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["kind"], "Role");
        assert_eq!(docs[1]["kind"], "RoleBinding");
    }

    #[test]
    fn test_single_document_rejects_streams() {
        let text = "kind: Role\n---\nkind: RoleBinding\n";
        assert!(parse_yaml(text, "rbac", false).is_err());
    }

    #[test]
    fn test_write_output_canonicalizes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(dir.path(), "out.yaml", "name:   {{MY_SA}}\n");
        let fields = Fields::new().with("{{MY_SA}}", "arcjob");

        load_yaml_replace_var_local(&path, &fields, false, true).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, "name: arcjob\n");
    }

    #[test]
    fn test_loader_resolves_against_resource_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(RESOURCE_DIR)).unwrap();
        write_template(
            &dir.path().join(RESOURCE_DIR),
            "spark-template.yaml",
            "image: \"{{inputs.parameters.image}}\"\n",
        );
        let loader = ManifestLoader::new(dir.path());

        let doc = loader.load("spark-template.yaml", false).unwrap().into_value();
        assert_eq!(doc["image"], "{{inputs.parameters.image}}");
    }

    #[test]
    fn test_template_location_parse() {
        assert!(matches!(
            TemplateLocation::parse("https://example.com/a.yaml").unwrap(),
            TemplateLocation::Remote(_)
        ));
        assert!(matches!(
            TemplateLocation::parse("alb-values.yaml").unwrap(),
            TemplateLocation::Local(_)
        ));
        assert!(TemplateLocation::parse("").is_err());
    }

    #[tokio::test]
    async fn test_fetch_local_location() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(RESOURCE_DIR)).unwrap();
        write_template(&dir.path().join(RESOURCE_DIR), "a.yaml", "x: {{v}}\n");
        let loader = ManifestLoader::new(dir.path());

        let doc = loader
            .fetch("a.yaml", &Fields::new().with("{{v}}", "1"), false)
            .await
            .unwrap()
            .into_value();
        assert_eq!(doc["x"], 1);
    }
}
