//! Offline operator commands. None of them contact the stack service.

use std::path::Path;

use bay_conductor::{BayModelSpec, BaySpec, build_reservation};
use bay_core::ConductorConfig;
use bay_state::{Bay, BayFilter, BayStatus, StateStore};
use serde::de::DeserializeOwned;
use serde_json::json;

pub fn check_config(config: &ConductorConfig) -> anyhow::Result<()> {
    config.validate()?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

pub fn render(
    config: &ConductorConfig,
    baymodel: &Path,
    bay: Option<&Path>,
    bay_uuid: Option<String>,
    show_template: bool,
) -> anyhow::Result<()> {
    let model: BayModelSpec = read_toml(baymodel)?;
    let spec: BaySpec = match bay {
        Some(path) => read_toml(path)?,
        None => BaySpec::default(),
    };
    let out = render_json(config, model, spec, bay_uuid, show_template)?;
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Build the reservation a create would store and the definition it would
/// submit, as JSON.
fn render_json(
    config: &ConductorConfig,
    model: BayModelSpec,
    spec: BaySpec,
    bay_uuid: Option<String>,
    show_template: bool,
) -> anyhow::Result<serde_json::Value> {
    let now = epoch_secs();
    let model = model.into_baymodel(uuid::Uuid::new_v4().to_string(), now)?;
    let spec = spec.validate()?;
    let bay_uuid = match bay_uuid {
        Some(raw) => uuid::Uuid::parse_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid bay uuid {raw:?}: {e}"))?
            .to_string(),
        None => uuid::Uuid::new_v4().to_string(),
    };
    let bay = build_reservation(config, &model, spec, bay_uuid, now);
    let definition = bay_template::render(&model, &bay)?;

    let mut out = json!({
        "bay": bay,
        "stack_name": bay.stack_name,
        "template_name": definition.template_name,
        "fingerprint": definition.fingerprint(),
        "parameters": definition.parameters,
        "timeout_mins": bay.bay_create_timeout,
    });
    if show_template {
        out["template"] = json!(definition.template);
    }
    Ok(out)
}

pub fn list_bays(
    config: &ConductorConfig,
    statuses: &[String],
    baymodel: Option<String>,
    limit: Option<usize>,
    marker: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let filter = BayFilter {
        statuses: parse_statuses(statuses)?,
        baymodel_id: baymodel,
        name: None,
    };
    let store = StateStore::open(&config.database.path)?;
    let page = store.list_bays(&filter, marker, config.page_limit(limit))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    println!("{:<36}  {:<20}  {:<20}  {:>7}  {:>5}", "UUID", "NAME", "STATUS", "MASTERS", "NODES");
    for bay in &page.items {
        println!("{}", table_row(bay));
    }
    if let Some(next) = page.next_marker {
        println!("\nmore results: --marker {next}");
    }
    Ok(())
}

fn parse_statuses(raw: &[String]) -> anyhow::Result<Vec<BayStatus>> {
    raw.iter()
        .map(|s| s.to_ascii_uppercase().parse::<BayStatus>().map_err(anyhow::Error::msg))
        .collect()
}

fn table_row(bay: &Bay) -> String {
    format!(
        "{:<36}  {:<20}  {:<20}  {:>7}  {:>5}",
        bay.uuid, bay.name, bay.status, bay.master_count, bay.node_count
    )
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    toml::from_str(&content).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BAY_UUID: &str = "5d12f6fd-a196-4bf0-ae4c-1f639a523a52";

    fn swarm_model() -> BayModelSpec {
        BayModelSpec {
            name: Some("swarm".to_string()),
            coe: Some("swarm".to_string()),
            image_id: Some("fedora-atomic-latest".to_string()),
            keypair_id: Some("default".to_string()),
            cluster_distro: Some("fedora-atomic".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn render_is_deterministic_for_a_fixed_uuid() {
        let config = ConductorConfig::default();
        let spec = BaySpec {
            name: Some("web".to_string()),
            node_count: Some(3),
            ..Default::default()
        };
        let a = render_json(&config, swarm_model(), spec.clone(), Some(BAY_UUID.to_string()), false).unwrap();
        let b = render_json(&config, swarm_model(), spec, Some(BAY_UUID.to_string()), false).unwrap();

        assert_eq!(a["fingerprint"], b["fingerprint"]);
        assert_eq!(a["stack_name"], format!("web-{BAY_UUID}"));
        assert_eq!(a["bay"]["status"], "CREATE_IN_PROGRESS");
        assert_eq!(a["bay"]["node_count"], 3);
        assert_eq!(a["timeout_mins"], 60);
        assert!(a.get("template").is_none());
    }

    #[test]
    fn render_includes_template_on_request() {
        let out = render_json(
            &ConductorConfig::default(),
            swarm_model(),
            BaySpec::default(),
            None,
            true,
        )
        .unwrap();
        assert!(out["template"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[test]
    fn render_rejects_invalid_inputs() {
        let config = ConductorConfig::default();
        let mut model = swarm_model();
        model.image_id = None;
        assert!(render_json(&config, model, BaySpec::default(), None, false).is_err());

        let spec = BaySpec {
            node_count: Some(0),
            ..Default::default()
        };
        assert!(render_json(&config, swarm_model(), spec, None, false).is_err());

        let err = render_json(&config, swarm_model(), BaySpec::default(), Some("nope".to_string()), false)
            .unwrap_err();
        assert!(err.to_string().contains("invalid bay uuid"));
    }

    #[test]
    fn read_toml_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bay.toml");
        std::fs::write(&path, "node_count = 2\nbogus = 1\n").unwrap();
        let err = read_toml::<BaySpec>(&path).unwrap_err();
        assert!(err.to_string().contains("bay.toml"));

        std::fs::write(&path, "name = \"web\"\nnode_count = 2\n").unwrap();
        let spec: BaySpec = read_toml(&path).unwrap();
        assert_eq!(spec.node_count, Some(2));
    }

    #[test]
    fn shipped_samples_render() {
        let model: BayModelSpec = toml::from_str(include_str!("../../../config/baymodel-swarm.toml")).unwrap();
        let spec: BaySpec = toml::from_str(include_str!("../../../config/bay.toml")).unwrap();
        let out = render_json(&ConductorConfig::default(), model, spec, None, false).unwrap();
        assert_eq!(out["template_name"], "swarm-fedora-atomic.yaml");
        assert_eq!(out["parameters"]["number_of_nodes"], "3");
        assert_eq!(out["parameters"]["server_flavor"], "m1.small");
    }

    #[test]
    fn status_filters_are_case_insensitive() {
        let parsed = parse_statuses(&["create_failed".to_string(), "DELETE_FAILED".to_string()]).unwrap();
        assert_eq!(parsed, vec![BayStatus::CreateFailed, BayStatus::DeleteFailed]);
        assert!(parse_statuses(&["DONE".to_string()]).is_err());
    }
}
