//! Domain types for the bay state store.
//!
//! These types represent the persisted state of bays and baymodels. All
//! types are serializable to/from JSON for storage in redb tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// UUID of a bay.
pub type BayId = String;

/// UUID of a baymodel.
pub type BayModelId = String;

// ── COE ───────────────────────────────────────────────────────────

/// Container orchestration engine family a bay runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coe {
    Swarm,
    Kubernetes,
    Mesos,
}

/// Returned when a COE name is not one of the supported families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCoe(pub String);

impl fmt::Display for UnknownCoe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported COE: {}", self.0)
    }
}

impl std::error::Error for UnknownCoe {}

impl Coe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Coe::Swarm => "swarm",
            Coe::Kubernetes => "kubernetes",
            Coe::Mesos => "mesos",
        }
    }
}

impl fmt::Display for Coe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Coe {
    type Err = UnknownCoe;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "swarm" => Ok(Coe::Swarm),
            "kubernetes" => Ok(Coe::Kubernetes),
            "mesos" => Ok(Coe::Mesos),
            other => Err(UnknownCoe(other.to_string())),
        }
    }
}

// ── BayModel ──────────────────────────────────────────────────────

/// Reusable cluster configuration a bay is provisioned from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BayModel {
    pub uuid: BayModelId,
    pub name: Option<String>,
    pub coe: Coe,
    /// Glance image the servers boot from.
    pub image_id: String,
    /// Flavor for worker nodes.
    pub flavor_id: Option<String>,
    /// Flavor for master nodes.
    pub master_flavor_id: Option<String>,
    pub keypair_id: String,
    pub external_network_id: Option<String>,
    /// CIDR of the private network the bay is attached to.
    pub fixed_network: Option<String>,
    pub dns_nameserver: Option<String>,
    /// Docker storage volume size in GB.
    pub docker_volume_size: Option<u32>,
    pub ssh_authorized_key: Option<String>,
    pub apiserver_port: Option<u32>,
    /// OS distribution of the image (e.g. "fedora-atomic", "coreos").
    pub cluster_distro: String,
    /// Unix timestamp (seconds) when this baymodel was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last patch, if any.
    pub updated_at: Option<u64>,
}

// ── Bay ───────────────────────────────────────────────────────────

/// Lifecycle status of a bay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BayStatus {
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    UpdateInProgress,
    UpdateComplete,
    UpdateFailed,
    DeleteInProgress,
    DeleteComplete,
    DeleteFailed,
}

/// The operation family a status belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn in_progress(self) -> BayStatus {
        match self {
            Operation::Create => BayStatus::CreateInProgress,
            Operation::Update => BayStatus::UpdateInProgress,
            Operation::Delete => BayStatus::DeleteInProgress,
        }
    }

    pub fn complete(self) -> BayStatus {
        match self {
            Operation::Create => BayStatus::CreateComplete,
            Operation::Update => BayStatus::UpdateComplete,
            Operation::Delete => BayStatus::DeleteComplete,
        }
    }

    pub fn failed(self) -> BayStatus {
        match self {
            Operation::Create => BayStatus::CreateFailed,
            Operation::Update => BayStatus::UpdateFailed,
            Operation::Delete => BayStatus::DeleteFailed,
        }
    }
}

impl BayStatus {
    /// Statuses the reconciler polls.
    pub const IN_PROGRESS: [BayStatus; 3] = [
        BayStatus::CreateInProgress,
        BayStatus::UpdateInProgress,
        BayStatus::DeleteInProgress,
    ];

    /// Statuses from which an update may start.
    pub const UPDATABLE: [BayStatus; 3] = [
        BayStatus::CreateComplete,
        BayStatus::UpdateComplete,
        BayStatus::UpdateFailed,
    ];

    /// Every status a persisted bay can hold.
    pub const ALL: [BayStatus; 9] = [
        BayStatus::CreateInProgress,
        BayStatus::CreateComplete,
        BayStatus::CreateFailed,
        BayStatus::UpdateInProgress,
        BayStatus::UpdateComplete,
        BayStatus::UpdateFailed,
        BayStatus::DeleteInProgress,
        BayStatus::DeleteComplete,
        BayStatus::DeleteFailed,
    ];

    pub fn operation(&self) -> Operation {
        match self {
            BayStatus::CreateInProgress | BayStatus::CreateComplete | BayStatus::CreateFailed => {
                Operation::Create
            }
            BayStatus::UpdateInProgress | BayStatus::UpdateComplete | BayStatus::UpdateFailed => {
                Operation::Update
            }
            BayStatus::DeleteInProgress | BayStatus::DeleteComplete | BayStatus::DeleteFailed => {
                Operation::Delete
            }
        }
    }

    pub fn is_in_progress(&self) -> bool {
        Self::IN_PROGRESS.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BayStatus::CreateInProgress => "CREATE_IN_PROGRESS",
            BayStatus::CreateComplete => "CREATE_COMPLETE",
            BayStatus::CreateFailed => "CREATE_FAILED",
            BayStatus::UpdateInProgress => "UPDATE_IN_PROGRESS",
            BayStatus::UpdateComplete => "UPDATE_COMPLETE",
            BayStatus::UpdateFailed => "UPDATE_FAILED",
            BayStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
            BayStatus::DeleteComplete => "DELETE_COMPLETE",
            BayStatus::DeleteFailed => "DELETE_FAILED",
        }
    }
}

impl fmt::Display for BayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BayStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BayStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown bay status: {s}"))
    }
}

/// A provisioned cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bay {
    pub uuid: BayId,
    pub name: String,
    pub baymodel_id: BayModelId,
    pub master_count: u32,
    pub node_count: u32,
    /// Name the backend stack is created under; derived from name and UUID.
    pub stack_name: String,
    /// Backend stack identifier. Set once, never changed.
    pub stack_id: Option<String>,
    /// The create request may have reached the backend but its answer was
    /// lost, so a stack named `stack_name` may exist without `stack_id`.
    #[serde(default)]
    pub submission_unconfirmed: bool,
    pub status: BayStatus,
    pub status_reason: Option<String>,
    pub discovery_url: Option<String>,
    /// Stack creation timeout handed to the backend, in minutes.
    pub bay_create_timeout: u32,
    pub api_address: Option<String>,
    pub master_addresses: Vec<String>,
    pub node_addresses: Vec<String>,
    /// Unix timestamp (seconds) when this bay was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last status change.
    pub updated_at: u64,
}

// ── Listing ───────────────────────────────────────────────────────

/// Filter applied while listing bays. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BayFilter {
    pub statuses: Vec<BayStatus>,
    pub baymodel_id: Option<BayModelId>,
    pub name: Option<String>,
}

impl BayFilter {
    /// Bays the reconciler has to poll.
    pub fn in_progress() -> Self {
        Self {
            statuses: BayStatus::IN_PROGRESS.to_vec(),
            ..Default::default()
        }
    }

    pub fn matches(&self, bay: &Bay) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&bay.status) {
            return false;
        }
        if let Some(ref model) = self.baymodel_id {
            if &bay.baymodel_id != model {
                return false;
            }
        }
        if let Some(ref name) = self.name {
            if &bay.name != name {
                return false;
            }
        }
        true
    }
}

/// One page of a UUID-ordered listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// UUID of the last returned record, present when the page is full.
    pub next_marker: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_marker: None,
        }
    }
}
