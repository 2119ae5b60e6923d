//! Mesos with Marathon on Ubuntu.

use bay_state::{Bay, BayModel};

use crate::definition::{OutputKeys, StackDefinition};
use crate::error::TemplateResult;
use crate::render::{check_distro, common_parameters};

pub(crate) const DISTROS: &[&str] = &["ubuntu"];

pub(crate) const OUTPUTS: OutputKeys = OutputKeys {
    api_address: "api_address",
    master_addresses: "mesos_master",
    node_addresses: "mesos_slaves",
};

const TEMPLATE: &str = include_str!("../templates/mesoscluster-ubuntu.yaml");

pub(crate) fn render(model: &BayModel, bay: &Bay) -> TemplateResult<StackDefinition> {
    check_distro(model)?;

    let mut params = common_parameters(model, bay);
    params.set_opt("master_flavor", model.master_flavor_id.as_deref());
    params.set_opt("slave_flavor", model.flavor_id.as_deref());
    params.set("number_of_masters", bay.master_count);
    params.set("number_of_slaves", bay.node_count);

    Ok(StackDefinition {
        template_name: "mesoscluster-ubuntu.yaml",
        template: TEMPLATE,
        parameters: params.into_inner(),
    })
}
