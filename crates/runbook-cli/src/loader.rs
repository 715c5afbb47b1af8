//! The thin configuration loader: one TOML or JSON document in, a
//! validated [`Configuration`] out. Discovery and multi-file merging live
//! outside the engine; this boundary only parses and validates.

use std::path::Path;

use anyhow::{Context, Result, bail};

use rb_config::Configuration;

pub fn load_configuration(path: &Path) -> Result<Configuration> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read configuration '{}'", path.display()))?;

    let config: Configuration = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&contents)
            .with_context(|| format!("invalid JSON configuration '{}'", path.display()))?,
        Some("toml") | None => {
            let document: toml::Value = toml::from_str(&contents)
                .with_context(|| format!("invalid TOML configuration '{}'", path.display()))?;
            let json = serde_json::to_value(document)?;
            serde_json::from_value(json)
                .with_context(|| format!("invalid configuration '{}'", path.display()))?
        }
        Some(other) => bail!("unsupported configuration extension '.{other}'"),
    };

    let report = config
        .validate()
        .with_context(|| format!("configuration '{}' failed validation", path.display()))?;
    for warning in report.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TOML_DOC: &str = r#"
[meta]
name = "demo"
version = "1.0.0"

[[scenarios]]
id = "main"
label = "Main"
flow = "entry"

[[flows.entry]]
type = "message"
id = "hello"
text = "hi"
"#;

    #[test]
    fn test_load_toml() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("runbook.toml");
        std::fs::write(&path, TOML_DOC).unwrap();
        let config = load_configuration(&path).unwrap();
        assert_eq!(config.meta.name, "demo");
        assert!(config.scenario("main").is_some());
    }

    #[test]
    fn test_load_json() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("runbook.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "meta": {"name": "demo", "version": "1.0.0"},
                "scenarios": [{"id": "main", "label": "Main", "flow": "entry"}],
                "flows": {"entry": [{"type": "message", "id": "hello", "text": "hi"}]}
            })
            .to_string(),
        )
        .unwrap();
        let config = load_configuration(&path).unwrap();
        assert_eq!(config.flows["entry"].len(), 1);
    }

    #[test]
    fn test_invalid_reference_fails_loudly() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("runbook.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "meta": {"name": "demo", "version": "1.0.0"},
                "scenarios": [{"id": "main", "label": "Main", "flow": "missing"}],
                "flows": {}
            })
            .to_string(),
        )
        .unwrap();
        let err = load_configuration(&path).unwrap_err();
        assert!(format!("{err:#}").contains("unknown flow 'missing'"));
    }

    #[test]
    fn test_missing_file() {
        let tmp = tempdir().unwrap();
        assert!(load_configuration(&tmp.path().join("nope.toml")).is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("runbook.yaml");
        std::fs::write(&path, "x").unwrap();
        let err = load_configuration(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported configuration extension"));
    }
}
