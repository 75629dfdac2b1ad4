//! Selector configuration file parsing
//!
//! Scans a directory tree of JSON documents: `_context.json` files hold
//! per-scope defaults and strategy templates, `_global.json` at the root
//! holds root defaults, and every other `*.json` file holds concrete
//! descriptors. The directory path (plus file stem) derives the scope;
//! a leaf file may override it with an explicit `context` field.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::errors::ConfigError;
use super::schema::{
    self, ContextDefaults, SelectorDescriptor, Strategy, StrategySpec, ValidationRules,
};

/// One scope's parsed `_context` document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawContextFile {
    /// Optional extra scope whose defaults/templates this scope extends,
    /// in addition to its dotted-path ancestors.
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub defaults: ContextDefaults,
    #[serde(default)]
    pub templates: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfidence {
    threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    description: String,
    strategies: Vec<Value>,
    #[serde(default)]
    validation: Option<ValidationRules>,
    #[serde(default)]
    confidence: Option<RawConfidence>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    retry_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawLeafFile {
    #[serde(default)]
    context: Option<String>,
    selectors: BTreeMap<String, RawDescriptor>,
}

/// Strategy body after template expansion, before schema validation.
#[derive(Debug, Clone, Deserialize)]
struct RawStrategy {
    #[serde(flatten)]
    spec: StrategySpec,
    #[serde(default)]
    priority: Option<u32>,
    #[serde(default)]
    weight: Option<f64>,
}

/// Everything gathered from one directory walk, keyed by scope.
#[derive(Debug, Default)]
pub struct ParsedTree {
    pub contexts: HashMap<String, RawContextFile>,
    leaves: Vec<(PathBuf, String, BTreeMap<String, RawDescriptor>)>,
}

/// Walk the configuration root and parse every document.
pub fn scan_tree(root: &Path) -> Result<ParsedTree, ConfigError> {
    let mut tree = ParsedTree::default();
    scan_dir(root, "", &mut tree)?;
    Ok(tree)
}

fn scan_dir(dir: &Path, scope: &str, tree: &mut ParsedTree) -> Result<(), ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() {
            let segment = name;
            if !schema::is_valid_segment(&segment) {
                return Err(ConfigError::SchemaValidation {
                    file: path.display().to_string(),
                    reason: format!("directory name {segment:?} is not a valid scope segment"),
                });
            }
            let child_scope = join_scope(scope, &segment);
            scan_dir(&path, &child_scope, tree)?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;
        if stem == "_context" || (stem == "_global" && scope.is_empty()) {
            let parsed: RawContextFile =
                serde_json::from_str(&text).map_err(|e| ConfigError::SchemaValidation {
                    file: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            tree.contexts.insert(scope.to_string(), parsed);
        } else {
            if !schema::is_valid_segment(&stem) {
                return Err(ConfigError::SchemaValidation {
                    file: path.display().to_string(),
                    reason: format!("file stem {stem:?} is not a valid scope segment"),
                });
            }
            let parsed: RawLeafFile =
                serde_json::from_str(&text).map_err(|e| ConfigError::SchemaValidation {
                    file: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            let derived = join_scope(scope, &stem);
            let leaf_scope = match parsed.context {
                Some(explicit) => {
                    if !schema::is_valid_dotted_name(&explicit) {
                        return Err(ConfigError::SchemaValidation {
                            file: path.display().to_string(),
                            reason: format!("context {explicit:?} is not a valid dotted scope"),
                        });
                    }
                    explicit
                }
                None => derived,
            };
            tree.leaves.push((path, leaf_scope, parsed.selectors));
        }
    }
    Ok(())
}

fn join_scope(scope: &str, segment: &str) -> String {
    if scope.is_empty() {
        segment.to_string()
    } else {
        format!("{scope}.{segment}")
    }
}

/// Ancestor chain for a scope, farthest first: root, `a`, `a.b`, `a.b.c`.
fn scope_chain(scope: &str) -> Vec<String> {
    let mut chain = vec![String::new()];
    let mut acc = String::new();
    for segment in scope.split('.').filter(|s| !s.is_empty()) {
        acc = join_scope(&acc, segment);
        chain.push(acc.clone());
    }
    chain
}

impl ParsedTree {
    /// Resolve defaults for a scope: dotted-path ancestors far→near, each
    /// optionally extended by its `extends` target. Nearer scopes win.
    pub fn resolve_defaults(&self, scope: &str) -> Result<ContextDefaults, ConfigError> {
        let mut resolved = ContextDefaults::default();
        for level in scope_chain(scope) {
            let mut visiting = HashSet::new();
            self.apply_scope_defaults(&level, &mut resolved, &mut visiting)?;
        }
        Ok(resolved)
    }

    fn apply_scope_defaults(
        &self,
        scope: &str,
        onto: &mut ContextDefaults,
        visiting: &mut HashSet<String>,
    ) -> Result<(), ConfigError> {
        if !visiting.insert(scope.to_string()) {
            return Err(ConfigError::Inheritance {
                scope: scope.to_string(),
                reason: "circular `extends` chain".to_string(),
            });
        }
        let Some(ctx) = self.contexts.get(scope) else {
            return Ok(());
        };
        if let Some(parent) = &ctx.extends {
            self.apply_scope_defaults(parent, onto, visiting)?;
        }
        overlay_defaults(onto, &ctx.defaults);
        Ok(())
    }

    /// Find a template by name, searching the scope chain nearest-first,
    /// following each scope's `extends` link.
    fn find_template(&self, scope: &str, name: &str) -> Option<&Value> {
        for level in scope_chain(scope).into_iter().rev() {
            let mut current = Some(level);
            let mut hops = 0;
            while let Some(s) = current.take() {
                let Some(ctx) = self.contexts.get(&s) else {
                    break;
                };
                if let Some(body) = ctx.templates.get(name) {
                    return Some(body);
                }
                current = ctx.extends.clone();
                hops += 1;
                if hops > 32 {
                    break;
                }
            }
        }
        None
    }

    /// Expand a raw strategy value: follow `template` references (reference
    /// overrides template body), recursively, with cycle detection.
    fn expand_strategy(
        &self,
        scope: &str,
        raw: &Value,
        file: &Path,
        seen: &mut HashSet<String>,
    ) -> Result<Value, ConfigError> {
        let Some(obj) = raw.as_object() else {
            return Err(ConfigError::SchemaValidation {
                file: file.display().to_string(),
                reason: "strategy entries must be objects".to_string(),
            });
        };
        let Some(template_name) = obj.get("template").and_then(Value::as_str) else {
            return Ok(raw.clone());
        };
        if !seen.insert(template_name.to_string()) {
            return Err(ConfigError::Inheritance {
                scope: scope.to_string(),
                reason: format!("circular template reference through {template_name:?}"),
            });
        }
        let Some(body) = self.find_template(scope, template_name) else {
            return Err(ConfigError::SchemaValidation {
                file: file.display().to_string(),
                reason: format!("unknown strategy template {template_name:?}"),
            });
        };
        let expanded_body = self.expand_strategy(scope, body, file, seen)?;
        let mut merged = expanded_body.as_object().cloned().unwrap_or_default();
        for (key, value) in obj {
            if key != "template" {
                merged.insert(key.clone(), value.clone());
            }
        }
        Ok(Value::Object(merged))
    }

    /// Produce the fully resolved descriptors, fail-fast on any violation.
    pub fn resolve_descriptors(
        &self,
    ) -> Result<HashMap<String, SelectorDescriptor>, ConfigError> {
        let mut out: HashMap<String, SelectorDescriptor> = HashMap::new();
        let mut origin: HashMap<String, String> = HashMap::new();
        for (file, scope, selectors) in &self.leaves {
            let defaults = self.resolve_defaults(scope)?;
            for (key, raw) in selectors {
                if !schema::is_valid_segment(key) {
                    return Err(ConfigError::SchemaValidation {
                        file: file.display().to_string(),
                        reason: format!("selector key {key:?} is not a valid segment"),
                    });
                }
                let semantic_name = join_scope(scope, key);
                if let Some(first) = origin.get(&semantic_name) {
                    return Err(ConfigError::Configuration {
                        reason: format!(
                            "duplicate semantic name {semantic_name:?} (first defined in {first}, again in {})",
                            file.display()
                        ),
                    });
                }
                let descriptor =
                    self.resolve_one(file, scope, &semantic_name, raw, &defaults)?;
                origin.insert(semantic_name.clone(), file.display().to_string());
                out.insert(semantic_name, descriptor);
            }
        }
        Ok(out)
    }

    fn resolve_one(
        &self,
        file: &Path,
        scope: &str,
        semantic_name: &str,
        raw: &RawDescriptor,
        defaults: &ContextDefaults,
    ) -> Result<SelectorDescriptor, ConfigError> {
        if raw.strategies.is_empty() {
            return Err(ConfigError::SchemaValidation {
                file: file.display().to_string(),
                reason: format!("{semantic_name}: strategies must be non-empty"),
            });
        }
        let mut strategies = Vec::with_capacity(raw.strategies.len());
        for (index, raw_strategy) in raw.strategies.iter().enumerate() {
            let mut seen = HashSet::new();
            let expanded = self.expand_strategy(scope, raw_strategy, file, &mut seen)?;
            let parsed: RawStrategy =
                serde_json::from_value(expanded).map_err(|e| ConfigError::SchemaValidation {
                    file: file.display().to_string(),
                    reason: format!("{semantic_name}: strategy {index}: {e}"),
                })?;
            parsed
                .spec
                .validate()
                .map_err(|reason| ConfigError::SchemaValidation {
                    file: file.display().to_string(),
                    reason: format!("{semantic_name}: strategy {index}: {reason}"),
                })?;
            let weight = parsed.weight.unwrap_or(1.0);
            if !(0.0..=1.0).contains(&weight) {
                return Err(ConfigError::SchemaValidation {
                    file: file.display().to_string(),
                    reason: format!("{semantic_name}: strategy {index}: weight {weight} outside [0, 1]"),
                });
            }
            strategies.push(Strategy {
                spec: parsed.spec,
                priority: parsed.priority.unwrap_or(index as u32),
                weight,
            });
        }
        strategies.sort_by_key(|s| s.priority);

        let threshold = raw
            .confidence
            .as_ref()
            .map_or(schema::DEFAULT_CONFIDENCE_THRESHOLD, |c| c.threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::SchemaValidation {
                file: file.display().to_string(),
                reason: format!("{semantic_name}: confidence threshold {threshold} outside [0, 1]"),
            });
        }

        let validation = raw
            .validation
            .clone()
            .or_else(|| defaults.validation.clone())
            .filter(|v| !v.is_empty());

        Ok(SelectorDescriptor {
            semantic_name: semantic_name.to_string(),
            description: raw.description.clone(),
            context: scope.to_string(),
            strategies,
            validation,
            confidence_threshold: threshold,
            timeout: std::time::Duration::from_millis(
                raw.timeout_ms
                    .or(defaults.timeout_ms)
                    .unwrap_or(schema::DEFAULT_TIMEOUT_MS),
            ),
            retry_count: raw
                .retry_count
                .or(defaults.retry_count)
                .unwrap_or(schema::DEFAULT_RETRY_COUNT),
            page_type: defaults.page_type.clone(),
            wait_strategy: defaults.wait_strategy.unwrap_or_default(),
        })
    }
}

fn overlay_defaults(onto: &mut ContextDefaults, over: &ContextDefaults) {
    if over.page_type.is_some() {
        onto.page_type = over.page_type.clone();
    }
    if over.wait_strategy.is_some() {
        onto.wait_strategy = over.wait_strategy;
    }
    if over.timeout_ms.is_some() {
        onto.timeout_ms = over.timeout_ms;
    }
    if over.retry_count.is_some() {
        onto.retry_count = over.retry_count;
    }
    if over.validation.is_some() {
        onto.validation = over.validation.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_chain_is_far_to_near() {
        assert_eq!(
            scope_chain("a.b.c"),
            vec!["".to_string(), "a".into(), "a.b".into(), "a.b.c".into()]
        );
        assert_eq!(scope_chain(""), vec![String::new()]);
    }

    #[test]
    fn nearer_defaults_override_farther() {
        let mut tree = ParsedTree::default();
        tree.contexts.insert(
            String::new(),
            RawContextFile {
                defaults: ContextDefaults {
                    timeout_ms: Some(10_000),
                    retry_count: Some(3),
                    ..ContextDefaults::default()
                },
                ..RawContextFile::default()
            },
        );
        tree.contexts.insert(
            "match".into(),
            RawContextFile {
                defaults: ContextDefaults {
                    timeout_ms: Some(4_000),
                    ..ContextDefaults::default()
                },
                ..RawContextFile::default()
            },
        );
        let resolved = tree.resolve_defaults("match.header").expect("resolve");
        assert_eq!(resolved.timeout_ms, Some(4_000));
        assert_eq!(resolved.retry_count, Some(3));
    }

    #[test]
    fn circular_extends_is_rejected() {
        let mut tree = ParsedTree::default();
        tree.contexts.insert(
            "a".into(),
            RawContextFile {
                extends: Some("b".into()),
                ..RawContextFile::default()
            },
        );
        tree.contexts.insert(
            "b".into(),
            RawContextFile {
                extends: Some("a".into()),
                ..RawContextFile::default()
            },
        );
        let err = tree.resolve_defaults("a").expect_err("cycle");
        assert!(matches!(err, ConfigError::Inheritance { .. }));
    }
}
