//! etlflow core
//!
//! Building blocks shared by the other etlflow crates:
//!
//! - [`manifest`]: YAML template loading with `{{token}}` substitution
//! - [`model`]: the provisioning plan (resources, groups, dependency graph)
//! - [`synth`]: CloudFormation rendering of a plan

pub mod error;
pub mod manifest;
pub mod model;
pub mod synth;

pub use error::{CoreError, Result};
pub use manifest::{
    Fields, Manifest, ManifestLoader, TemplateLocation, load_yaml_local,
    load_yaml_remotely, load_yaml_replace_var_local, load_yaml_replace_var_remotely,
};
pub use model::*;
pub use synth::{Output, Template};
