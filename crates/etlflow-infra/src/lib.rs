//! Component factories for the Spark ETL platform
//!
//! Each layer module returns a [`etlflow_core::Group`] plus typed handles to
//! the resources later layers refer to. [`stack::build_stack`] wires them in
//! order and [`edge`] builds the separate CDN template.

pub mod addons;
pub mod artifact;
pub mod cluster;
pub mod edge;
pub mod error;
pub mod handler;
pub mod iam;
pub mod identity;
pub mod network;
pub mod service_account;
pub mod spark_permission;
pub mod stack;
pub mod telemetry;

pub use error::{InfraError, Result};
pub use stack::{Stack, build_stack};

#[cfg(test)]
pub(crate) mod testing {
    use crate::cluster::{Cluster, cluster_layer};
    use crate::identity::identity_layer;
    use crate::network::{Network, network_layer};
    use etlflow_core::{ManifestLoader, Ref};

    pub const CLUSTER_NAME: &str = "spark-on-eks";

    pub fn loader() -> ManifestLoader {
        ManifestLoader::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../source"))
    }

    pub fn network() -> Network {
        network_layer(CLUSTER_NAME, &Ref::new("appcode/appcode"))
    }

    pub fn cluster() -> Cluster {
        cluster_layer(CLUSTER_NAME, &network(), &identity_layer(CLUSTER_NAME))
    }
}
