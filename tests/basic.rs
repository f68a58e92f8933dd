use anyhow::Result;
use serde_json::json;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_plan_validation() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path().to_path_buf();
    let manifest_path = root.join("plan.json");
    let manifest = json!({
        "root": root.to_str().unwrap(),
        "actions": [
            { "action": "move", "source": "a.txt", "destination": "sorted/a.txt" },
            { "action": "skip", "source": "b.txt", "reason": "unclassified" }
        ]
    });
    fs::write(&manifest_path, manifest.to_string())?;

    let plan = tidytrail::model::load_plan(&manifest_path)?;
    plan.validate()?;
    let plan = plan.normalize()?;
    assert_eq!(plan.actions[0].source(), root.join("a.txt"));
    Ok(())
}

#[test]
fn test_unknown_action_rejected() -> Result<()> {
    let dir = tempdir()?;
    let manifest_path = dir.path().join("plan.json");
    fs::write(
        &manifest_path,
        json!({ "actions": [{ "action": "delete", "source": "a" }] }).to_string(),
    )?;
    assert!(tidytrail::model::load_plan(&manifest_path).is_err());
    Ok(())
}

#[test]
fn test_schema_generation() {
    let schema = tidytrail::model::generate_schema();
    assert!(schema.contains("$schema"));
    assert!(schema.contains("Plan"));
}

#[test]
fn test_config_file_with_log_dir_override() -> Result<()> {
    let dir = tempdir()?;
    let config_path = dir.path().join("tidytrail.toml");
    fs::write(
        &config_path,
        "[audit]\nlog_directory = \"/var/lib/tidytrail\"\nrotation_period = \"weekly\"\nretention_runs = 20\n",
    )?;

    let config = tidytrail::engine::load_config(&tidytrail::cli::GlobalArgs {
        config: Some(config_path),
        log_dir: Some(dir.path().join("audit")),
        verbose: 0,
    })?;
    assert_eq!(config.log_directory, dir.path().join("audit"));
    assert_eq!(config.rotation_period, tidytrail::RotationPeriod::Weekly);
    assert_eq!(config.retention_runs, 20);
    assert_eq!(config.retention_days, 90);
    Ok(())
}
