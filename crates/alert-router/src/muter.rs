//! Expression muter for planned maintenance.
//!
//! Active maintenance entries are scoped by rule ids and an optional Rhai
//! boolean expression over the alert's labels. Dotted label keys become
//! nested maps, so `{"service.name": "api"}` is reachable as
//! `service.name == "api"`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rhai::{AST, Dynamic, Engine, Map, Scope};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::labels::{LabelSet, RULE_ID_LABEL};

const MAX_OPERATIONS: u64 = 10_000;
const MAX_CALL_LEVELS: usize = 8;
const MAX_STRING_SIZE: usize = 4096;
const MAX_EXPR_DEPTH: usize = 64;

const DISABLED_SYMBOLS: &[&str] = &["eval", "import", "export", "print", "debug"];

/// Scope of one active maintenance entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveMaintenanceExpr {
    /// Rules the entry applies to; empty means every rule.
    #[serde(default)]
    pub rule_ids: Vec<String>,
    /// Boolean expression over labels; empty matches every alert.
    #[serde(default)]
    pub expression: String,
}

fn create_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.set_max_string_size(MAX_STRING_SIZE);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
    for &symbol in DISABLED_SYMBOLS {
        engine.disable_symbol(symbol);
    }
    engine
}

/// Compiles an expression, returning the parse error message on failure.
pub fn validate_expression(expression: &str) -> Result<(), String> {
    create_engine()
        .compile_expression(expression)
        .map(drop)
        .map_err(|e| e.to_string())
}

/// Mutes alerts matching any active maintenance entry.
///
/// The active set is swapped atomically by
/// [`set_active_expressions`](Self::set_active_expressions) and may be
/// replaced while other threads call [`mutes`](Self::mutes).
pub struct MaintenanceExprMuter {
    engine: Engine,
    active: RwLock<Arc<Vec<ActiveMaintenanceExpr>>>,
    compiled: Mutex<HashMap<String, Arc<AST>>>,
}

impl std::fmt::Debug for MaintenanceExprMuter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceExprMuter")
            .field("active", &self.active.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for MaintenanceExprMuter {
    fn default() -> Self {
        Self::new()
    }
}

impl MaintenanceExprMuter {
    /// Creates a muter with no active entries.
    #[must_use]
    pub fn new() -> Self {
        Self {
            engine: create_engine(),
            active: RwLock::new(Arc::new(Vec::new())),
            compiled: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the active entries.
    pub fn set_active_expressions(&self, exprs: Vec<ActiveMaintenanceExpr>) {
        {
            let mut compiled = self.compiled.lock();
            compiled.retain(|expression, _| exprs.iter().any(|e| &e.expression == expression));
        }
        debug!(count = exprs.len(), "active maintenance expressions updated");
        *self.active.write() = Arc::new(exprs);
    }

    /// Returns the active entries.
    #[must_use]
    pub fn active_expressions(&self) -> Arc<Vec<ActiveMaintenanceExpr>> {
        Arc::clone(&self.active.read())
    }

    /// True if any active entry matches `labels`.
    #[must_use]
    pub fn mutes(&self, labels: &LabelSet) -> bool {
        let active = self.active_expressions();
        if active.is_empty() {
            return false;
        }

        let rule_id = labels.get(RULE_ID_LABEL).map(String::as_str);
        let mut scope = None;
        active.iter().any(|entry| {
            if !entry.rule_ids.is_empty() && !rule_id.is_some_and(|id| entry.rule_ids.iter().any(|r| r == id)) {
                return false;
            }
            if entry.expression.is_empty() {
                return true;
            }
            let scope = scope.get_or_insert_with(|| label_scope(labels));
            self.evaluate(&entry.expression, scope)
        })
    }

    fn evaluate(&self, expression: &str, scope: &mut Scope<'static>) -> bool {
        let ast = match self.compile(expression) {
            Ok(ast) => ast,
            Err(e) => {
                warn!(expression, error = %e, "failed to compile maintenance expression");
                return false;
            }
        };
        match self.engine.eval_ast_with_scope::<bool>(scope, &ast) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(expression, error = %e, "failed to evaluate maintenance expression");
                false
            }
        }
    }

    fn compile(&self, expression: &str) -> Result<Arc<AST>, rhai::ParseError> {
        if let Some(ast) = self.compiled.lock().get(expression) {
            return Ok(Arc::clone(ast));
        }
        let ast = Arc::new(self.engine.compile_expression(expression)?);
        self.compiled
            .lock()
            .insert(expression.to_string(), Arc::clone(&ast));
        Ok(ast)
    }
}

/// Label values arranged by dotted key path.
///
/// When a key is both a value and a prefix of other keys (`a` and `a.b`),
/// the nested map wins. Keys with an empty segment stay verbatim.
#[derive(Debug, Default, PartialEq)]
struct LabelTree(BTreeMap<String, LabelNode>);

#[derive(Debug, PartialEq)]
enum LabelNode {
    Leaf(String),
    Tree(LabelTree),
}

impl LabelTree {
    fn from_labels(labels: &LabelSet) -> Self {
        let mut tree = Self::default();
        for (key, value) in labels {
            let path: Vec<&str> = key.split('.').collect();
            if path.iter().any(|segment| segment.is_empty()) {
                tree.insert(&[key.as_str()], value);
            } else {
                tree.insert(&path, value);
            }
        }
        tree
    }

    fn insert(&mut self, path: &[&str], value: &str) {
        let Some((head, rest)) = path.split_first() else {
            return;
        };
        if rest.is_empty() {
            self.0
                .entry((*head).to_string())
                .or_insert_with(|| LabelNode::Leaf(value.to_string()));
            return;
        }
        let node = self
            .0
            .entry((*head).to_string())
            .or_insert_with(|| LabelNode::Tree(Self::default()));
        if matches!(node, LabelNode::Leaf(_)) {
            *node = LabelNode::Tree(Self::default());
        }
        if let LabelNode::Tree(tree) = node {
            tree.insert(rest, value);
        }
    }

    fn into_map(self) -> Map {
        self.0
            .into_iter()
            .map(|(key, node)| (key.into(), node.into_dynamic()))
            .collect()
    }
}

impl LabelNode {
    fn into_dynamic(self) -> Dynamic {
        match self {
            Self::Leaf(value) => Dynamic::from(value),
            Self::Tree(tree) => Dynamic::from_map(tree.into_map()),
        }
    }
}

fn label_scope(labels: &LabelSet) -> Scope<'static> {
    let mut scope = Scope::new();
    for (key, node) in LabelTree::from_labels(labels).0 {
        scope.push_constant_dynamic(key, node.into_dynamic());
    }
    scope
}
