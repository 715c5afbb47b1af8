use super::*;
use serde_json::json;

fn step_from(value: serde_json::Value) -> Step {
    serde_json::from_value(value).expect("step should deserialize")
}

#[test]
fn test_prompt_step_roundtrip() {
    let step = step_from(json!({
        "type": "prompt",
        "id": "pick-name",
        "label": "Project name",
        "mode": "input",
        "prompt": "Name?",
        "storeAs": "name",
        "validate": {"pattern": "^[a-z-]+$", "minLength": 2, "message": "lowercase only"},
        "persist": {"scope": "deploy", "key": "project-name"}
    }));
    let Step::Prompt(prompt) = &step else {
        panic!("expected prompt step");
    };
    assert_eq!(prompt.store_as, "name");
    assert_eq!(prompt.mode, rb_core::types::PromptMode::Input);
    assert_eq!(
        prompt.persist.as_ref().unwrap().effective_key("name"),
        "deploy:project-name"
    );

    let reserialized = serde_json::to_value(&step).unwrap();
    assert_eq!(reserialized["type"], "prompt");
    assert_eq!(reserialized["storeAs"], "name");
}

#[test]
fn test_persistence_key_defaults_to_store_as() {
    let persist = PromptPersistence {
        scope: None,
        key: None,
    };
    assert_eq!(persist.effective_key("name"), "name");

    let scoped = PromptPersistence {
        scope: Some("release".into()),
        key: None,
    };
    assert_eq!(scoped.effective_key("name"), "release:name");
}

#[test]
fn test_command_step_descriptor_fields() {
    let step = step_from(json!({
        "type": "command",
        "id": "fetch",
        "commands": [{
            "run": "fetch-data",
            "captureStdout": true,
            "storeStdoutAs": "payload",
            "parseJson": true,
            "redactKeys": ["token"],
            "storeWhen": "always",
            "dryRunStrategy": "execute",
            "warnAfterMs": 2000
        }],
        "collectSafe": true
    }));
    let Step::Command(cmd) = &step else {
        panic!("expected command step");
    };
    assert!(cmd.collect_safe);
    let spec = &cmd.commands[0];
    assert!(spec.capture_stdout);
    assert_eq!(spec.store_stdout_as.as_deref(), Some("payload"));
    assert_eq!(spec.parse_json, Some(ParseJson::Flag(true)));
    assert_eq!(spec.store_when, StoreWhen::Always);
    assert_eq!(spec.dry_run_strategy, DryRunStrategy::Execute);
    assert_eq!(spec.warn_after_ms, Some(2000));
}

#[test]
fn test_parse_json_object_form() {
    let parse: ParseJson = serde_json::from_value(json!({"onError": "warn"})).unwrap();
    assert!(parse.enabled());
    assert_eq!(parse.on_error(), ParseErrorMode::Warn);

    let flag: ParseJson = serde_json::from_value(json!(false)).unwrap();
    assert!(!flag.enabled());
    assert_eq!(ParseJson::Flag(true).on_error(), ParseErrorMode::Fail);
}

#[test]
fn test_store_when_matches() {
    assert!(StoreWhen::Always.matches(true));
    assert!(StoreWhen::Always.matches(false));
    assert!(StoreWhen::Success.matches(true));
    assert!(!StoreWhen::Success.matches(false));
    assert!(!StoreWhen::Failure.matches(true));
    assert!(StoreWhen::Failure.matches(false));
}

#[test]
fn test_on_error_auto_default_limit() {
    let on_error: OnError = serde_json::from_value(json!({
        "auto": {"strategy": "retry"}
    }))
    .unwrap();
    let auto = on_error.auto.unwrap();
    assert_eq!(auto.strategy, AutoStrategy::Retry);
    assert_eq!(auto.limit, 1);
}

#[test]
fn test_branch_step() {
    let step = step_from(json!({
        "type": "branch",
        "id": "route",
        "conditions": [
            {"when": "state.answers.mode === \"fast\"", "next": "fast-path"},
            {"when": "state.answers.count > 3", "next": "slow-path", "description": "big batch"}
        ],
        "defaultNext": "fallback"
    }));
    let Step::Branch(branch) = &step else {
        panic!("expected branch step");
    };
    assert_eq!(branch.conditions.len(), 2);
    assert_eq!(branch.default_next.as_deref(), Some("fallback"));
}

#[test]
fn test_iterate_sources() {
    let inline: IterateSource =
        serde_json::from_value(json!({"from": "items", "items": ["a", "b"]})).unwrap();
    assert!(matches!(inline, IterateSource::Items { .. }));

    let answers: IterateSource =
        serde_json::from_value(json!({"from": "answers", "key": "packages"})).unwrap();
    assert!(matches!(answers, IterateSource::Answers { .. }));

    let file: IterateSource =
        serde_json::from_value(json!({"from": "json", "path": "pkgs.json", "pointer": "/list"}))
            .unwrap();
    assert!(matches!(file, IterateSource::Json { .. }));

    let dynamic: IterateSource = serde_json::from_value(json!({
        "from": "dynamic",
        "source": {"source": "glob", "patterns": ["*.md"]}
    }))
    .unwrap();
    assert!(matches!(dynamic, IterateSource::Dynamic { .. }));
}

#[test]
fn test_dynamic_source_kinds() {
    let source: DynamicSource = serde_json::from_value(json!({
        "source": "workspace-projects",
        "includeRoot": true,
        "maxDepth": 2,
        "limit": 10,
        "cache": "session"
    }))
    .unwrap();
    assert_eq!(source.kind.kind_name(), "workspace-projects");
    assert!(source.cache.is_some());

    let tsconfigs: DynamicSource = serde_json::from_value(json!({
        "source": "project-tsconfigs",
        "dir": "apps/web",
        "allowCustomPath": true
    }))
    .unwrap();
    assert_eq!(tsconfigs.kind.kind_name(), "project-tsconfigs");
}

#[test]
fn test_unknown_type_becomes_plugin() {
    let step = step_from(json!({
        "type": "slack-notify",
        "id": "notify",
        "label": "Notify",
        "channel": "#deploys"
    }));
    let Step::Plugin(plugin) = &step else {
        panic!("expected plugin step");
    };
    assert_eq!(plugin.step_type, "slack-notify");
    assert_eq!(plugin.id, "notify");
    assert_eq!(plugin.body["channel"], "#deploys");
    assert_eq!(step.kind(), "slack-notify");

    // Plugin bodies reserialize untouched.
    let reserialized = serde_json::to_value(&step).unwrap();
    assert_eq!(reserialized["channel"], "#deploys");
    assert_eq!(reserialized["type"], "slack-notify");
}

#[test]
fn test_step_missing_type_is_error() {
    let result: Result<Step, _> = serde_json::from_value(json!({"id": "x"}));
    assert!(result.is_err());
}

#[test]
fn test_plugin_step_missing_id_is_error() {
    let result: Result<Step, _> =
        serde_json::from_value(json!({"type": "custom-thing", "label": "no id"}));
    assert!(result.is_err());
}

#[test]
fn test_worktree_guard_defaults() {
    let step = step_from(json!({
        "type": "git-worktree-guard",
        "id": "guard",
        "storeAs": "treeStrategy"
    }));
    let Step::GitWorktreeGuard(guard) = &step else {
        panic!("expected worktree guard step");
    };
    assert_eq!(guard.strategies.len(), 4);
    assert_eq!(guard.store_as, "treeStrategy");
}

#[test]
fn test_step_accessors() {
    let step = step_from(json!({
        "type": "message",
        "id": "hello",
        "level": "success",
        "text": "done"
    }));
    assert_eq!(step.id(), "hello");
    assert_eq!(step.kind(), "message");
    assert_eq!(step.display_label(), "hello");

    let labelled = step_from(json!({
        "type": "message",
        "id": "hello",
        "label": "Greeting",
        "text": "hi"
    }));
    assert_eq!(labelled.display_label(), "Greeting");
}

#[test]
fn test_compute_step_inline_and_handler() {
    let inline = step_from(json!({
        "type": "compute",
        "id": "derive",
        "values": {"fullName": "{{ state.answers.name }}-svc"}
    }));
    let Step::Compute(compute) = &inline else {
        panic!("expected compute step");
    };
    assert!(compute.values.is_some());
    assert!(compute.handler.is_none());

    let handler = step_from(json!({
        "type": "compute",
        "id": "window",
        "handler": "maintenance-window",
        "params": {"durationMinutes": 30},
        "storeAs": "window"
    }));
    let Step::Compute(compute) = &handler else {
        panic!("expected compute step");
    };
    assert_eq!(compute.handler.as_deref(), Some("maintenance-window"));
}
