use super::*;
use serde_json::json;
use tempfile::tempdir;

fn source(value: serde_json::Value) -> DynamicSource {
    serde_json::from_value(value).unwrap()
}

async fn resolve_in(
    repo_root: &Path,
    descriptor: serde_json::Value,
    phase: RunPhase,
) -> Result<Vec<ResolvedOption>, EngineError> {
    let mut cache = SessionOptionsCache::default();
    let mut ctx = ResolverContext {
        repo_root,
        session_cache: &mut cache,
        phase,
    };
    resolve(&source(descriptor), &mut ctx).await
}

#[tokio::test]
async fn test_command_source_parses_stdout() {
    let tmp = tempdir().unwrap();
    let options = resolve_in(
        tmp.path(),
        json!({"source": "command", "command": "echo '[\"a\", \"b\"]'"}),
        RunPhase::Execute,
    )
    .await
    .unwrap();
    assert_eq!(options.len(), 2);
    assert_eq!(options[0].value, json!("a"));
    assert_eq!(options[0].label, "a");
}

#[tokio::test]
async fn test_command_source_banned_in_collect_phase() {
    let tmp = tempdir().unwrap();
    let err = resolve_in(
        tmp.path(),
        json!({"source": "command", "command": "echo '[]'"}),
        RunPhase::Collect,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "collect-mode");
}

#[tokio::test]
async fn test_command_source_object_entries() {
    let tmp = tempdir().unwrap();
    let options = resolve_in(
        tmp.path(),
        json!({
            "source": "command",
            "command": "echo '[{\"value\":\"x\",\"label\":\"X\",\"hint\":\"pick\"}]'"
        }),
        RunPhase::Execute,
    )
    .await
    .unwrap();
    assert_eq!(options[0].value, json!("x"));
    assert_eq!(options[0].label, "X");
    assert_eq!(options[0].hint.as_deref(), Some("pick"));
}

#[tokio::test]
async fn test_command_source_non_json_stdout_is_parse_error() {
    let tmp = tempdir().unwrap();
    let err = resolve_in(
        tmp.path(),
        json!({"source": "command", "command": "echo not-json"}),
        RunPhase::Execute,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "parse");
}

#[tokio::test]
async fn test_glob_source_relative_labels() {
    let tmp = tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("docs")).unwrap();
    std::fs::write(tmp.path().join("docs/a.md"), "a").unwrap();
    std::fs::write(tmp.path().join("docs/b.md"), "b").unwrap();
    std::fs::write(tmp.path().join("docs/skip.txt"), "no").unwrap();

    let options = resolve_in(
        tmp.path(),
        json!({"source": "glob", "patterns": ["docs/*.md"]}),
        RunPhase::Execute,
    )
    .await
    .unwrap();
    assert_eq!(options.len(), 2);
    assert_eq!(options[0].label, "docs/a.md");
    assert!(options[0].value.as_str().unwrap().starts_with('/'));
}

#[tokio::test]
async fn test_glob_source_ignore_list() {
    let tmp = tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("a")).unwrap();
    std::fs::create_dir_all(tmp.path().join("b")).unwrap();
    std::fs::write(tmp.path().join("a/one.md"), "x").unwrap();
    std::fs::write(tmp.path().join("b/two.md"), "x").unwrap();

    let options = resolve_in(
        tmp.path(),
        json!({"source": "glob", "patterns": ["*/*.md"], "ignore": ["b/"]}),
        RunPhase::Execute,
    )
    .await
    .unwrap();
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].label, "a/one.md");
}

#[tokio::test]
async fn test_json_source_with_pointer_and_map() {
    let tmp = tempdir().unwrap();
    std::fs::write(
        tmp.path().join("envs.json"),
        json!({
            "environments": [
                {"id": "dev", "title": "Development", "frozen": false},
                {"id": "prod", "title": "Production", "frozen": true}
            ]
        })
        .to_string(),
    )
    .unwrap();

    let options = resolve_in(
        tmp.path(),
        json!({
            "source": "json",
            "path": "envs.json",
            "pointer": "/environments",
            "map": {"value": "id", "label": "title", "disableWhen": "frozen"}
        }),
        RunPhase::Execute,
    )
    .await
    .unwrap();
    assert_eq!(options.len(), 2);
    assert_eq!(options[0].value, json!("dev"));
    assert_eq!(options[0].label, "Development");
    assert!(!options[0].disabled);
    assert!(options[1].disabled);
}

#[tokio::test]
async fn test_json_source_missing_pointer() {
    let tmp = tempdir().unwrap();
    std::fs::write(tmp.path().join("x.json"), "{}").unwrap();
    let err = resolve_in(
        tmp.path(),
        json!({"source": "json", "path": "x.json", "pointer": "/nope"}),
        RunPhase::Execute,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("pointer '/nope'"));
}

#[tokio::test]
async fn test_workspace_projects_discovery() {
    let tmp = tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("apps/web")).unwrap();
    std::fs::create_dir_all(tmp.path().join("apps/api")).unwrap();
    std::fs::create_dir_all(tmp.path().join("node_modules/dep")).unwrap();
    std::fs::write(
        tmp.path().join("apps/web/package.json"),
        json!({"name": "@acme/web"}).to_string(),
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("apps/api/Cargo.toml"),
        "[package]\nname = \"acme-api\"\nversion = \"0.1.0\"\n",
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("node_modules/dep/package.json"),
        json!({"name": "dep"}).to_string(),
    )
    .unwrap();

    let options = resolve_in(
        tmp.path(),
        json!({"source": "workspace-projects"}),
        RunPhase::Execute,
    )
    .await
    .unwrap();
    let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
    assert_eq!(labels, vec!["@acme/web", "acme-api"]);
    assert_eq!(options[0].hint.as_deref(), Some("apps/web"));
}

#[tokio::test]
async fn test_workspace_projects_include_root_and_limit() {
    let tmp = tempdir().unwrap();
    std::fs::write(
        tmp.path().join("package.json"),
        json!({"name": "root-pkg"}).to_string(),
    )
    .unwrap();
    std::fs::create_dir_all(tmp.path().join("lib")).unwrap();
    std::fs::write(
        tmp.path().join("lib/package.json"),
        json!({"name": "lib-pkg"}).to_string(),
    )
    .unwrap();

    let options = resolve_in(
        tmp.path(),
        json!({"source": "workspace-projects", "includeRoot": true, "limit": 1}),
        RunPhase::Execute,
    )
    .await
    .unwrap();
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].label, "root-pkg");
}

#[tokio::test]
async fn test_project_tsconfigs_canonical_first() {
    let tmp = tempdir().unwrap();
    std::fs::write(tmp.path().join("tsconfig.json"), "{}").unwrap();
    std::fs::write(tmp.path().join("tsconfig.build.json"), "{}").unwrap();
    std::fs::write(tmp.path().join("tsconfig.spec.json"), "{}").unwrap();
    std::fs::write(tmp.path().join("other.json"), "{}").unwrap();

    let options = resolve_in(
        tmp.path(),
        json!({"source": "project-tsconfigs", "allowCustomPath": true}),
        RunPhase::Execute,
    )
    .await
    .unwrap();
    let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
    assert_eq!(
        labels,
        vec![
            "tsconfig.json",
            "tsconfig.build.json",
            "tsconfig.spec.json",
            "Custom path…"
        ]
    );
    assert_eq!(options.last().unwrap().value, json!(CUSTOM_PATH_SENTINEL));
}

#[tokio::test]
async fn test_project_tsconfigs_canonical_included_even_when_missing() {
    let tmp = tempdir().unwrap();
    let options = resolve_in(
        tmp.path(),
        json!({"source": "project-tsconfigs"}),
        RunPhase::Execute,
    )
    .await
    .unwrap();
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].label, "tsconfig.json");
}

#[tokio::test]
async fn test_session_cache_avoids_second_run() {
    let tmp = tempdir().unwrap();
    let marker = tmp.path().join("ran");
    let command = format!("test -f {0} && echo '[]' || (touch {0} && echo '[\"fresh\"]')", marker.display());
    let descriptor = json!({"source": "command", "command": command, "cache": "session"});

    let mut cache = SessionOptionsCache::default();
    let mut ctx = ResolverContext {
        repo_root: tmp.path(),
        session_cache: &mut cache,
        phase: RunPhase::Execute,
    };
    let first = resolve(&source(descriptor.clone()), &mut ctx).await.unwrap();
    let second = resolve(&source(descriptor), &mut ctx).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].label, "fresh");
}

#[tokio::test]
async fn test_ttl_cache_expires() {
    let tmp = tempdir().unwrap();
    let counter = tmp.path().join("count");
    let command = format!(
        "echo x >> {0}; wc -l < {0} | tr -d ' \\n' | sed 's/.*/[\"run-&\"]/'",
        counter.display()
    );
    let descriptor = json!({"source": "command", "command": command, "cache": {"ttlMs": 40}});

    let mut cache = SessionOptionsCache::default();
    let mut ctx = ResolverContext {
        repo_root: tmp.path(),
        session_cache: &mut cache,
        phase: RunPhase::Execute,
    };
    let first = resolve(&source(descriptor.clone()), &mut ctx).await.unwrap();
    assert_eq!(first[0].label, "run-1");
    let cached = resolve(&source(descriptor.clone()), &mut ctx).await.unwrap();
    assert_eq!(cached[0].label, "run-1");
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    let refreshed = resolve(&source(descriptor), &mut ctx).await.unwrap();
    assert_eq!(refreshed[0].label, "run-2");
}
