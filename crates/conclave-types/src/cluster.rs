use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    Initializing,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ClusterState {
    /// `state` is monotone except for the explicit `stopping -> stopped` edge.
    pub fn can_transition_to(self, next: ClusterState) -> bool {
        use ClusterState::*;
        match (self, next) {
            (Initializing, Running) => true,
            (Initializing, Failed) => true,
            (Running, Stopping) => true,
            (Running, Failed) => true,
            (Stopping, Stopped) => true,
            (Stopping, Failed) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

/// A nested cluster configuration, reachable through an `agents[]` entry of `{type:"subcluster"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubClusterEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub config: ClusterConfig,
}

/// Either a leaf agent or a nested sub-cluster. Discriminated structurally: a sub-cluster entry
/// carries `type` and `config`, an agent entry does not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AgentEntry {
    SubCluster(SubClusterEntry),
    Agent(AgentConfig),
}

/// The root of a cluster configuration file (or a sub-cluster's `config`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    pub agents: Vec<AgentEntry>,
}

impl ClusterConfig {
    /// Flattens top-level agent entries, ignoring sub-clusters.
    pub fn top_level_agents(&self) -> impl Iterator<Item = &AgentConfig> {
        self.agents.iter().filter_map(|entry| match entry {
            AgentEntry::Agent(agent) => Some(agent),
            AgentEntry::SubCluster(_) => None,
        })
    }

    pub fn sub_clusters(&self) -> impl Iterator<Item = &SubClusterEntry> {
        self.agents.iter().filter_map(|entry| match entry {
            AgentEntry::SubCluster(sub) => Some(sub),
            AgentEntry::Agent(_) => None,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationAction {
    AddAgents,
    RemoveAgents,
    UpdateAgent,
}

/// `{action, agents?, agentIds?, patch?}`, carried in `data.operations[]` of a
/// `CLUSTER_OPERATIONS` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterOperation {
    pub action: OperationAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentConfig>>,
    #[serde(rename = "agentIds", skip_serializing_if = "Option::is_none")]
    pub agent_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Value>,
}

/// `{id, config, state, createdAt}` — the on-disk record in `clusters.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterRecord {
    pub id: String,
    pub config: ClusterConfig,
    pub state: ClusterState,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// `{text?, file?, issue?}`, resolved by an external adapter before `start` is called.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InputSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<IssueRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueRef {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub url: String,
    pub number: u64,
}
