//! Kubernetes on Fedora Atomic or CoreOS.

use bay_state::{Bay, BayModel};

use crate::definition::{OutputKeys, StackDefinition};
use crate::error::TemplateResult;
use crate::render::{check_distro, common_parameters, require_discovery_url};

pub(crate) const DISTROS: &[&str] = &["fedora-atomic", "coreos"];

pub(crate) const OUTPUTS: OutputKeys = OutputKeys {
    api_address: "api_address",
    master_addresses: "kube_masters",
    node_addresses: "kube_minions_external",
};

const DEFAULT_KUBE_API_PORT: u32 = 6443;

const ATOMIC_TEMPLATE: &str = include_str!("../templates/kubecluster-fedora-atomic.yaml");
const COREOS_TEMPLATE: &str = include_str!("../templates/kubecluster-coreos.yaml");

pub(crate) fn render(model: &BayModel, bay: &Bay) -> TemplateResult<StackDefinition> {
    check_distro(model)?;

    let (template_name, template) = if model.cluster_distro == "coreos" {
        ("kubecluster-coreos.yaml", COREOS_TEMPLATE)
    } else {
        ("kubecluster-fedora-atomic.yaml", ATOMIC_TEMPLATE)
    };

    let mut params = common_parameters(model, bay);
    params.set_opt("master_flavor", model.master_flavor_id.as_deref());
    params.set_opt("minion_flavor", model.flavor_id.as_deref());
    params.set("number_of_masters", bay.master_count);
    params.set("number_of_minions", bay.node_count);
    params.set("discovery_url", require_discovery_url(model, bay)?);
    params.set(
        "kube_api_port",
        model.apiserver_port.unwrap_or(DEFAULT_KUBE_API_PORT),
    );

    Ok(StackDefinition {
        template_name,
        template,
        parameters: params.into_inner(),
    })
}
