//! COE dispatch and the parameters every template shares.

use bay_state::{Bay, BayModel, Coe};
use tracing::debug;

use crate::definition::{OutputKeys, Params, StackDefinition};
use crate::error::{TemplateError, TemplateResult};
use crate::{kubernetes, mesos, swarm};

/// Render the stack definition for `bay` from its baymodel.
pub fn render(model: &BayModel, bay: &Bay) -> TemplateResult<StackDefinition> {
    let definition = match model.coe {
        Coe::Swarm => swarm::render(model, bay)?,
        Coe::Kubernetes => kubernetes::render(model, bay)?,
        Coe::Mesos => mesos::render(model, bay)?,
    };
    debug!(
        bay = %bay.uuid,
        coe = %model.coe,
        template = definition.template_name,
        parameters = definition.parameters.len(),
        "stack definition rendered"
    );
    Ok(definition)
}

/// Stack outputs that populate the bay's addresses, per COE.
pub fn output_keys(coe: Coe) -> OutputKeys {
    match coe {
        Coe::Swarm => swarm::OUTPUTS,
        Coe::Kubernetes => kubernetes::OUTPUTS,
        Coe::Mesos => mesos::OUTPUTS,
    }
}

/// Cluster distros a COE has templates for.
pub fn supported_distros(coe: Coe) -> &'static [&'static str] {
    match coe {
        Coe::Swarm => swarm::DISTROS,
        Coe::Kubernetes => kubernetes::DISTROS,
        Coe::Mesos => mesos::DISTROS,
    }
}

/// Discovery URL for a bay that did not bring its own.
///
/// Derived from the bay UUID rather than fetched, so the same bay always
/// renders the same URL.
pub fn discovery_url(endpoint: &str, bay_uuid: &str, master_count: u32) -> String {
    format!(
        "{}/{bay_uuid}?size={master_count}",
        endpoint.trim_end_matches('/')
    )
}

pub(crate) fn check_distro(model: &BayModel) -> TemplateResult<()> {
    let supported = supported_distros(model.coe);
    if supported.contains(&model.cluster_distro.as_str()) {
        Ok(())
    } else {
        Err(TemplateError::UnsupportedDistro {
            coe: model.coe,
            distro: model.cluster_distro.clone(),
            supported: supported.join(", "),
        })
    }
}

pub(crate) fn require_discovery_url(model: &BayModel, bay: &Bay) -> TemplateResult<String> {
    bay.discovery_url
        .clone()
        .ok_or(TemplateError::MissingParameter {
            coe: model.coe,
            parameter: "discovery_url",
        })
}

/// Parameters every COE template accepts.
pub(crate) fn common_parameters(model: &BayModel, bay: &Bay) -> Params {
    let mut params = Params::default();
    params.set("bay_uuid", &bay.uuid);
    params.set("ssh_key_name", &model.keypair_id);
    params.set("server_image", &model.image_id);
    params.set_opt("external_network", model.external_network_id.as_deref());
    params.set_opt("dns_nameserver", model.dns_nameserver.as_deref());
    params.set_opt("fixed_network_cidr", model.fixed_network.as_deref());
    params.set_opt("docker_volume_size", model.docker_volume_size);
    params
}
