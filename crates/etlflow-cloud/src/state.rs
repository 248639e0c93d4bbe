//! Deployment state
//!
//! Manages `.etlflow/state.json`, the record of what was last deployed for
//! each stack: every resource's rendered definition plus the stack outputs.
//! A change plan is computed against it before each deploy.

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const STATE_VERSION: u32 = 1;
pub const STATE_DIR: &str = ".etlflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const STATE_STAGING: &str = "state.json.tmp";
const LOCK_FILE: &str = "lock.json";
pub const LOCK_TTL_HOURS: i64 = 1;

/// State of every stack deployed from this project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    pub version: u32,

    pub updated_at: DateTime<Utc>,

    /// Stacks indexed by stack name
    pub stacks: BTreeMap<String, StackState>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            stacks: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stack(&self, name: &str) -> Option<&StackState> {
        self.stacks.get(name)
    }

    /// Add or replace a stack
    pub fn set_stack(&mut self, state: StackState) {
        self.stacks.insert(state.name.clone(), state);
        self.updated_at = Utc::now();
    }

    pub fn remove_stack(&mut self, name: &str) -> Option<StackState> {
        let result = self.stacks.remove(name);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }
}

/// Last deployed version of one stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    pub name: String,

    /// Identifier sent with anonymous metrics, stable across updates
    pub deployment_id: String,

    /// Resources indexed by logical id
    pub resources: BTreeMap<String, ResourceState>,

    pub outputs: BTreeMap<String, String>,

    pub status: StackStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl StackState {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            deployment_id: uuid::Uuid::new_v4().to_string(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            status: StackStatus::Unknown,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: StackStatus) -> Self {
        self.status = status;
        self
    }

    pub fn set_resource(&mut self, state: ResourceState) {
        self.resources.insert(state.logical_id.clone(), state);
        self.updated_at = Utc::now();
    }

    pub fn get_resource(&self, logical_id: &str) -> Option<&ResourceState> {
        self.resources.get(logical_id)
    }
}

/// Rendered definition of a single deployed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub logical_id: String,

    /// Construct path, e.g. `eks_cluster/EKS`
    pub path: String,

    /// CloudFormation type
    pub resource_type: String,

    /// Position in apply order at deploy time
    pub position: usize,

    /// Template entry as deployed
    pub definition: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackStatus {
    Deploying,
    Deployed,
    Failed,
    Deleting,
    Unknown,
}

impl std::fmt::Display for StackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackStatus::Deploying => write!(f, "deploying"),
            StackStatus::Deployed => write!(f, "deployed"),
            StackStatus::Failed => write!(f, "failed"),
            StackStatus::Deleting => write!(f, "deleting"),
            StackStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Owns `.etlflow/` under a project root: the state file, its backup and the lock
pub struct StateManager {
    dir: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            dir: project_root.as_ref().join(STATE_DIR),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Load the current state, empty when nothing was saved yet
    pub async fn load(&self) -> Result<GlobalState> {
        let content = match fs::read_to_string(self.file(STATE_FILE)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(dir = %self.dir.display(), "No saved state");
                return Ok(GlobalState::new());
            }
            Err(e) => return Err(e.into()),
        };

        let state: GlobalState = serde_json::from_str(&content)?;
        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "{} was written by a newer etlflow (format {}, this build reads up to {})",
                self.file(STATE_FILE).display(),
                state.version,
                STATE_VERSION
            )));
        }

        debug!(stacks = state.stacks.len(), "Loaded state");
        Ok(state)
    }

    /// Write the state through a temporary file. The previous file is kept
    /// as `state.json.backup`.
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let current = self.file(STATE_FILE);
        let staged = self.file(STATE_STAGING);
        fs::write(&staged, serde_json::to_vec_pretty(state)?).await?;

        if fs::try_exists(&current).await? {
            fs::copy(&current, self.file(STATE_BACKUP)).await?;
        }
        fs::rename(&staged, &current).await?;

        debug!(stacks = state.stacks.len(), "Saved state");
        Ok(())
    }

    /// Take the project lock. A lock older than [`LOCK_TTL_HOURS`] is
    /// considered abandoned and replaced. An unreadable lock file counts as
    /// held until the file itself is that old.
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.file(LOCK_FILE);

        if let Some(existing) = read_lock(&path).await? {
            let age = Utc::now().signed_duration_since(existing.acquired_at);
            if age.num_hours() < LOCK_TTL_HOURS {
                return Err(CloudError::LockError(format!(
                    "{} (pid {}) holds the deployment lock since {}; remove {} if that run is gone",
                    existing.holder,
                    existing.pid,
                    existing.acquired_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    path.display()
                )));
            }
            warn!(
                holder = %existing.holder,
                hours = age.num_hours(),
                "Replacing abandoned lock"
            );
            fs::remove_file(&path).await?;
        }

        let info = LockInfo {
            holder: hostname(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CloudError::LockError(
                    "another etl run took the deployment lock".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&serde_json::to_vec(&info)?).await?;

        debug!(pid = info.pid, "Took deployment lock");
        Ok(StateLock { path: Some(path) })
    }
}

async fn read_lock(path: &Path) -> Result<Option<LockInfo>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if let Ok(info) = serde_json::from_slice(&bytes) {
        return Ok(Some(info));
    }

    // Empty or partly written lock: the file's age stands in for acquired_at
    let modified = fs::metadata(path).await?.modified()?;
    Ok(Some(LockInfo {
        holder: "unknown holder".to_string(),
        pid: 0,
        acquired_at: DateTime::<Utc>::from(modified),
    }))
}

fn hostname() -> String {
    ["HOSTNAME", "HOST", "COMPUTERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held deployment lock. Dropping it removes the lock file as well.
#[derive(Debug)]
pub struct StateLock {
    path: Option<PathBuf>,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if let Some(path) = self.path.take() {
            fs::remove_file(&path).await?;
            debug!("Released deployment lock");
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
