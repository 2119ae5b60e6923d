//! Caller-supplied request bodies and their validation.

use bay_core::validate::{
    check_apiserver_port, check_ipv4, check_optional_string, check_range, check_string,
    require_string,
};
use bay_core::ValidationError;
use bay_state::{BayModel, Coe};
use bay_template::supported_distros;
use serde::{Deserialize, Serialize};

/// Fields accepted when creating a baymodel.
///
/// Numeric fields are signed so that out-of-range input is reported as a
/// validation error rather than a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BayModelSpec {
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub coe: Option<String>,
    pub image_id: Option<String>,
    pub flavor_id: Option<String>,
    pub master_flavor_id: Option<String>,
    pub keypair_id: Option<String>,
    pub external_network_id: Option<String>,
    pub fixed_network: Option<String>,
    pub dns_nameserver: Option<String>,
    pub docker_volume_size: Option<i64>,
    pub ssh_authorized_key: Option<String>,
    pub apiserver_port: Option<i64>,
    pub cluster_distro: Option<String>,
}

/// Baymodel fields a patch may touch.
pub(crate) const PATCHABLE_FIELDS: &[&str] = &[
    "name",
    "coe",
    "image_id",
    "flavor_id",
    "master_flavor_id",
    "keypair_id",
    "external_network_id",
    "fixed_network",
    "dns_nameserver",
    "docker_volume_size",
    "ssh_authorized_key",
    "apiserver_port",
    "cluster_distro",
];

impl BayModelSpec {
    /// Validate and build the stored record.
    ///
    /// `uuid` is used when the spec carries none.
    pub fn into_baymodel(self, uuid: String, created_at: u64) -> Result<BayModel, ValidationError> {
        let uuid = match self.uuid {
            Some(given) => {
                check_string("uuid", &given)?;
                uuid::Uuid::parse_str(&given).map_err(|_| {
                    ValidationError::Invalid(format!("uuid is not a valid UUID: {given}"))
                })?;
                given
            }
            None => uuid,
        };

        let coe: Coe = require_string("coe", self.coe.as_deref())?
            .parse()
            .map_err(|e: bay_state::UnknownCoe| ValidationError::Invalid(e.to_string()))?;
        let image_id = require_string("image_id", self.image_id.as_deref())?.to_string();
        let keypair_id = require_string("keypair_id", self.keypair_id.as_deref())?.to_string();
        let cluster_distro =
            require_string("cluster_distro", self.cluster_distro.as_deref())?.to_string();

        check_optional_string("name", self.name.as_deref())?;
        check_optional_string("flavor_id", self.flavor_id.as_deref())?;
        check_optional_string("master_flavor_id", self.master_flavor_id.as_deref())?;
        check_optional_string("external_network_id", self.external_network_id.as_deref())?;
        check_optional_string("fixed_network", self.fixed_network.as_deref())?;
        check_optional_string("ssh_authorized_key", self.ssh_authorized_key.as_deref())?;
        if let Some(ref dns) = self.dns_nameserver {
            check_ipv4("dns_nameserver", dns)?;
        }

        let docker_volume_size = match self.docker_volume_size {
            Some(size) => {
                check_range("docker_volume_size", size, 1, i64::from(u32::MAX))?;
                Some(size as u32)
            }
            None => None,
        };
        let apiserver_port = match self.apiserver_port {
            Some(port) => {
                let port = u32::try_from(port).map_err(|_| ValidationError::OutOfRange {
                    field: "apiserver_port",
                    value: port,
                    min: 1024,
                    max: i64::from(u16::MAX),
                })?;
                check_apiserver_port(port)?;
                Some(port)
            }
            None => None,
        };

        let supported = supported_distros(coe);
        if !supported.contains(&cluster_distro.as_str()) {
            return Err(ValidationError::Invalid(format!(
                "cluster_distro {cluster_distro:?} is not supported for {coe} (supported: {})",
                supported.join(", ")
            )));
        }

        Ok(BayModel {
            uuid,
            name: self.name,
            coe,
            image_id,
            flavor_id: self.flavor_id,
            master_flavor_id: self.master_flavor_id,
            keypair_id,
            external_network_id: self.external_network_id,
            fixed_network: self.fixed_network,
            dns_nameserver: self.dns_nameserver,
            docker_volume_size,
            ssh_authorized_key: self.ssh_authorized_key,
            apiserver_port,
            cluster_distro,
            created_at,
            updated_at: None,
        })
    }
}

impl From<&BayModel> for BayModelSpec {
    fn from(model: &BayModel) -> Self {
        Self {
            uuid: Some(model.uuid.clone()),
            name: model.name.clone(),
            coe: Some(model.coe.to_string()),
            image_id: Some(model.image_id.clone()),
            flavor_id: model.flavor_id.clone(),
            master_flavor_id: model.master_flavor_id.clone(),
            keypair_id: Some(model.keypair_id.clone()),
            external_network_id: model.external_network_id.clone(),
            fixed_network: model.fixed_network.clone(),
            dns_nameserver: model.dns_nameserver.clone(),
            docker_volume_size: model.docker_volume_size.map(i64::from),
            ssh_authorized_key: model.ssh_authorized_key.clone(),
            apiserver_port: model.apiserver_port.map(i64::from),
            cluster_distro: Some(model.cluster_distro.clone()),
        }
    }
}

/// One JSON-patch style operation on a baymodel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchKind,
    /// `/<field>`
    pub path: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Add,
    Replace,
    Remove,
}

impl PatchOp {
    pub fn replace(path: &str, value: serde_json::Value) -> Self {
        Self {
            op: PatchKind::Replace,
            path: path.to_string(),
            value: Some(value),
        }
    }

    pub fn remove(path: &str) -> Self {
        Self {
            op: PatchKind::Remove,
            path: path.to_string(),
            value: None,
        }
    }
}

/// Apply `ops` to the spec of an existing baymodel.
pub(crate) fn apply_patch(spec: BayModelSpec, ops: &[PatchOp]) -> Result<BayModelSpec, ValidationError> {
    let mut doc = serde_json::to_value(&spec)
        .map_err(|e| ValidationError::Invalid(format!("encoding baymodel: {e}")))?;
    let fields = doc
        .as_object_mut()
        .ok_or_else(|| ValidationError::Invalid("baymodel is not an object".to_string()))?;

    for op in ops {
        let field = op
            .path
            .strip_prefix('/')
            .filter(|f| !f.is_empty() && !f.contains('/'))
            .ok_or_else(|| ValidationError::Invalid(format!("invalid patch path: {}", op.path)))?;
        if field == "uuid" {
            return Err(ValidationError::Invalid("uuid cannot be changed".to_string()));
        }
        if !PATCHABLE_FIELDS.contains(&field) {
            return Err(ValidationError::Invalid(format!(
                "unknown baymodel attribute: {}",
                op.path
            )));
        }
        match op.op {
            PatchKind::Add | PatchKind::Replace => {
                let value = op.value.clone().ok_or_else(|| {
                    ValidationError::Invalid(format!("patch {} requires a value", op.path))
                })?;
                fields.insert(field.to_string(), value);
            }
            PatchKind::Remove => {
                fields.insert(field.to_string(), serde_json::Value::Null);
            }
        }
    }

    serde_json::from_value(doc)
        .map_err(|e| ValidationError::Invalid(format!("invalid patch value: {e}")))
}

/// Fields accepted when creating a bay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaySpec {
    pub name: Option<String>,
    pub master_count: Option<u32>,
    pub node_count: Option<u32>,
    pub discovery_url: Option<String>,
    /// Minutes; defaults to `bay.create_timeout_mins`.
    pub bay_create_timeout: Option<u32>,
}

/// A [`BaySpec`] with defaults applied and bounds checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidBaySpec {
    pub name: Option<String>,
    pub master_count: u32,
    pub node_count: u32,
    pub discovery_url: Option<String>,
    pub bay_create_timeout: Option<u32>,
}

impl BaySpec {
    pub fn validate(self) -> Result<ValidBaySpec, ValidationError> {
        check_optional_string("name", self.name.as_deref())?;
        check_optional_string("discovery_url", self.discovery_url.as_deref())?;
        let master_count = self.master_count.unwrap_or(1);
        let node_count = self.node_count.unwrap_or(1);
        check_count("master_count", master_count)?;
        check_count("node_count", node_count)?;
        if let Some(timeout) = self.bay_create_timeout {
            check_count("bay_create_timeout", timeout)?;
        }
        Ok(ValidBaySpec {
            name: self.name,
            master_count,
            node_count,
            discovery_url: self.discovery_url,
            bay_create_timeout: self.bay_create_timeout,
        })
    }
}

/// Changes accepted by a bay update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BayPatch {
    pub node_count: u32,
}

impl BayPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_count("node_count", self.node_count)
    }
}

fn check_count(field: &'static str, value: u32) -> Result<(), ValidationError> {
    check_range(field, i64::from(value), 1, i64::from(u32::MAX))
}
