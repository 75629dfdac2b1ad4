mod common;

use std::time::Duration;

use common::write_selector_tree;
use pagescout::events::{EventBus, EventType};
use pagescout::selector_store::{ConfigError, SelectorStore, StrategySpec};

const GLOBAL: &str = r#"{
    "defaults": { "timeout_ms": 9000, "retry_count": 3 }
}"#;

const MATCH_CONTEXT: &str = r#"{
    "defaults": { "page_type": "match", "wait_strategy": "network_idle", "timeout_ms": 4000 },
    "templates": {
        "team_name": {
            "kind": "css",
            "selector": ".team",
            "weight": 0.9
        }
    }
}"#;

const MATCH_HEADER: &str = r#"{
    "selectors": {
        "home_team": {
            "description": "Home team name in the match header",
            "strategies": [
                { "template": "team_name", "selector": ".team.home", "priority": 0 },
                { "kind": "text_anchor", "text": "Arsenal", "priority": 1, "weight": 0.6 }
            ],
            "validation": { "required": true, "min_length": 2 }
        },
        "score": {
            "strategies": [
                { "kind": "css", "selector": ".score", "priority": 0, "weight": 1.0 }
            ],
            "confidence": { "threshold": 0.5 },
            "timeout_ms": 2500
        }
    }
}"#;

fn base_tree() -> Vec<(&'static str, &'static str)> {
    vec![
        ("_global.json", GLOBAL),
        ("match/_context.json", MATCH_CONTEXT),
        ("match/header.json", MATCH_HEADER),
    ]
}

#[test]
fn load_resolves_inheritance_and_templates() {
    let dir = write_selector_tree(&base_tree());
    let store = SelectorStore::new(EventBus::default());
    let snapshot = store.load(dir.path()).expect("load");
    assert_eq!(snapshot.len(), 2);

    let home = snapshot
        .get_exact("match.header.home_team")
        .expect("home_team");
    assert_eq!(home.context, "match.header");
    // Template expanded, reference overrides template body.
    assert_eq!(
        home.strategies[0].spec,
        StrategySpec::Css {
            selector: ".team.home".into()
        }
    );
    assert_eq!(home.strategies[0].weight, 0.9);
    // Nearest scope's timeout wins over the global default.
    assert_eq!(home.timeout, Duration::from_millis(4000));
    // Retry count only exists at the root.
    assert_eq!(home.retry_count, 3);
    assert_eq!(home.page_type.as_deref(), Some("match"));
    assert!(home.validation.is_some());

    let score = snapshot.get_exact("match.header.score").expect("score");
    // Descriptor's own timeout beats every inherited level.
    assert_eq!(score.timeout, Duration::from_millis(2500));
    assert_eq!(score.confidence_threshold, 0.5);
}

#[test]
fn unqualified_names_resolve_against_the_context_scope() {
    let dir = write_selector_tree(&base_tree());
    let store = SelectorStore::new(EventBus::default());
    store.load_and_swap(dir.path()).expect("load");

    let hit = store
        .get("home_team", Some("match.header"))
        .expect("context-relative hit");
    assert_eq!(hit.semantic_name, "match.header.home_team");
    assert!(store.get("home_team", None).is_none());
}

#[test]
fn duplicate_semantic_names_reject_the_snapshot() {
    let mut files = base_tree();
    // Same fully qualified name from a second file via explicit context.
    files.push((
        "extra.json",
        r#"{
            "context": "match.header",
            "selectors": {
                "home_team": {
                    "strategies": [ { "kind": "css", "selector": ".x", "priority": 0, "weight": 1.0 } ]
                }
            }
        }"#,
    ));
    let dir = write_selector_tree(&files);
    let store = SelectorStore::new(EventBus::default());
    let err = store.load(dir.path()).expect_err("duplicate");
    match err {
        ConfigError::Configuration { reason } => {
            assert!(reason.contains("match.header.home_team"), "{reason}");
        }
        other => panic!("expected ConfigurationError, got {other:?}"),
    }
}

#[test]
fn failed_reload_preserves_the_active_snapshot_and_emits() {
    let events = EventBus::default();
    let mut failures = events.subscribe_to(&[EventType::ConfigReloadFailed]);
    let store = SelectorStore::new(events);

    let good = write_selector_tree(&base_tree());
    store.load_and_swap(good.path()).expect("initial load");
    assert!(store.get("match.header.score", None).is_some());

    let bad = write_selector_tree(&[(
        "broken.json",
        r#"{ "selectors": { "thing": { "strategies": [] } } }"#,
    )]);
    let err = store.load_and_swap(bad.path());
    assert!(err.is_err());

    // Still serving snapshot A in full.
    assert!(store.get("match.header.score", None).is_some());
    assert!(store.get("match.header.home_team", None).is_some());

    // The failed reload was recorded with the offending root.
    let recorded = failures.try_recv().expect("recv").expect("event");
    assert_eq!(recorded.event_type, EventType::ConfigReloadFailed);
    assert!(
        recorded.payload["root"]
            .as_str()
            .expect("root path")
            .contains(bad.path().file_name().unwrap().to_str().unwrap())
    );
}

#[test]
fn invalid_strategy_params_are_schema_errors() {
    let dir = write_selector_tree(&[(
        "page.json",
        r#"{
            "selectors": {
                "broken": {
                    "strategies": [ { "kind": "css", "selector": "div[", "priority": 0, "weight": 1.0 } ]
                }
            }
        }"#,
    )]);
    let store = SelectorStore::new(EventBus::default());
    assert!(matches!(
        store.load(dir.path()),
        Err(ConfigError::SchemaValidation { .. })
    ));
}

#[test]
fn out_of_range_weight_is_rejected() {
    let dir = write_selector_tree(&[(
        "page.json",
        r#"{
            "selectors": {
                "heavy": {
                    "strategies": [ { "kind": "css", "selector": "div", "priority": 0, "weight": 1.5 } ]
                }
            }
        }"#,
    )]);
    let store = SelectorStore::new(EventBus::default());
    assert!(matches!(
        store.load(dir.path()),
        Err(ConfigError::SchemaValidation { .. })
    ));
}

#[test]
fn circular_template_references_are_inheritance_errors() {
    let dir = write_selector_tree(&[
        (
            "_global.json",
            r#"{
                "templates": {
                    "a": { "template": "b" },
                    "b": { "template": "a" }
                }
            }"#,
        ),
        (
            "page.json",
            r#"{
                "selectors": {
                    "thing": {
                        "strategies": [ { "template": "a", "priority": 0 } ]
                    }
                }
            }"#,
        ),
    ]);
    let store = SelectorStore::new(EventBus::default());
    assert!(matches!(
        store.load(dir.path()),
        Err(ConfigError::Inheritance { .. })
    ));
}

#[test]
fn reserved_and_malformed_names_are_rejected() {
    // A selector key is a single segment; a literal `.` inside it would
    // collide with the dot that separates scope levels, so it must be
    // rejected just like uppercase or reserved names.
    for key in ["Bad-Name", "home.team", "_context", "_global", ""] {
        let leaf = format!(
            r#"{{
                "selectors": {{
                    "{key}": {{
                        "strategies": [ {{ "kind": "css", "selector": "div", "priority": 0, "weight": 1.0 }} ]
                    }}
                }}
            }}"#,
        );
        let dir = write_selector_tree(&[("page.json", leaf.as_str())]);
        let store = SelectorStore::new(EventBus::default());
        assert!(
            matches!(
                store.load(dir.path()),
                Err(ConfigError::SchemaValidation { .. })
            ),
            "selector key {key:?} should be rejected"
        );
    }
}
