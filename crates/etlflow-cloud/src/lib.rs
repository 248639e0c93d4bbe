//! etlflow cloud
//!
//! Drives the external provisioning engine for a synthesized plan.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 etl CLI                      │
//! │        (etl plan / deploy / destroy)         │
//! └──────────────────┬───────────────────────────┘
//!                    │
//! ┌──────────────────▼───────────────────────────┐
//! │               etlflow-cloud                  │
//! │  ┌────────────────┐  ┌────────────────────┐  │
//! │  │  Provisioner   │  │ State + change plan│  │
//! │  └───────┬────────┘  └────────────────────┘  │
//! │  ┌───────┴────────┐  ┌────────────────────┐  │
//! │  │ CloudFormation │  │  kubectl lookups   │  │
//! │  │   (aws CLI)    │  │  (bounded wait)    │  │
//! │  └────────────────┘  └────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod cloudformation;
pub mod error;
pub mod kubectl;
pub mod lookup;
pub mod metrics;
pub mod provider;
pub mod state;

pub use action::{Action, ActionType, Plan, PlanSummary, plan_changes, snapshot};
pub use cloudformation::{AwsCli, CallerIdentity, CloudFormation, default_assets_bucket};
pub use error::{CloudError, Result};
pub use kubectl::Kubectl;
pub use lookup::{ObjectReader, ObjectRef, wait_for_object_value};
pub use metrics::{MetricsReporter, RequestType};
pub use provider::{AuthStatus, Provisioner, StackDeployment};
pub use state::{GlobalState, ResourceState, StackState, StackStatus, StateLock, StateManager};
