//! Runtime configuration, loaded from a YAML file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ---------------------------------------------------------------------------
// InquestConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InquestConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_queue_path")]
    pub queue_path: PathBuf,
    /// Node identity baked into generated ids; must differ between
    /// processes sharing a store.
    #[serde(default = "default_node_id")]
    pub node_id: u64,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub gitlab: Option<GitlabSection>,
}

impl Default for InquestConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            queue_path: default_queue_path(),
            node_id: default_node_id(),
            worker: WorkerSection::default(),
            queue: QueueSection::default(),
            orchestrator: OrchestratorSection::default(),
            planner: PlannerSection::default(),
            gitlab: None,
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/store.redb")
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/queue.redb")
}

fn default_node_id() -> u64 {
    1
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-message handling deadline. Keep below the reclaim idle time.
    #[serde(default = "default_handle_timeout_secs")]
    pub handle_timeout_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval_secs(),
            handle_timeout_secs: default_handle_timeout_secs(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_batch_size() -> usize {
    10
}

fn default_poll_interval_secs() -> u64 {
    1
}

fn default_handle_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,
    /// Must exceed the worst-case processing latency, or live work gets
    /// reclaimed out from under its owner.
    #[serde(default = "default_reclaim_min_idle_secs")]
    pub reclaim_min_idle_secs: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            group: default_group(),
            max_attempts: default_max_attempts(),
            reclaim_interval_secs: default_reclaim_interval_secs(),
            reclaim_min_idle_secs: default_reclaim_min_idle_secs(),
        }
    }
}

fn default_group() -> String {
    "inquest-workers".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_reclaim_interval_secs() -> u64 {
    60
}

fn default_reclaim_min_idle_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,
    #[serde(default = "default_max_validation_retries")]
    pub max_validation_retries: usize,
    #[serde(default = "default_stuck_after_minutes")]
    pub stuck_after_minutes: i64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            max_validation_retries: default_max_validation_retries(),
            stuck_after_minutes: default_stuck_after_minutes(),
        }
    }
}

fn default_max_cycles() -> usize {
    8
}

fn default_max_validation_retries() -> usize {
    2
}

fn default_stuck_after_minutes() -> i64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerSection {
    #[serde(default = "default_planner_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_planner_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            endpoint: default_planner_endpoint(),
            timeout_secs: default_planner_timeout_secs(),
        }
    }
}

fn default_planner_endpoint() -> String {
    "http://localhost:8600/plan".to_string()
}

fn default_planner_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitlabSection {
    pub base_url: String,
    /// Name of the environment variable holding the API token.
    #[serde(default = "default_gitlab_token_env")]
    pub token_env: String,
}

fn default_gitlab_token_env() -> String {
    "INQUEST_GITLAB_TOKEN".to_string()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl InquestConfig {
    /// Load from a YAML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
