//! Docker Swarm on Fedora Atomic.

use bay_state::{Bay, BayModel};

use crate::definition::{OutputKeys, StackDefinition};
use crate::error::TemplateResult;
use crate::render::{check_distro, common_parameters, require_discovery_url};

pub(crate) const DISTROS: &[&str] = &["fedora-atomic"];

pub(crate) const OUTPUTS: OutputKeys = OutputKeys {
    api_address: "api_address",
    master_addresses: "swarm_master",
    node_addresses: "swarm_nodes",
};

const DEFAULT_SWARM_PORT: u32 = 2376;

const TEMPLATE: &str = include_str!("../templates/swarm-fedora-atomic.yaml");

pub(crate) fn render(model: &BayModel, bay: &Bay) -> TemplateResult<StackDefinition> {
    check_distro(model)?;

    let mut params = common_parameters(model, bay);
    params.set_opt("server_flavor", model.flavor_id.as_deref());
    params.set("number_of_nodes", bay.node_count);
    params.set("discovery_url", require_discovery_url(model, bay)?);
    params.set(
        "swarm_port",
        model.apiserver_port.unwrap_or(DEFAULT_SWARM_PORT),
    );

    Ok(StackDefinition {
        template_name: "swarm-fedora-atomic.yaml",
        template: TEMPLATE,
        parameters: params.into_inner(),
    })
}
