//! Rule Store
//!
//! Holds the active rule set behind an `Arc` snapshot. Readers take a snapshot
//! once per dispatch and never see it change; writers build a complete new set
//! and swap it in. There is no in-place mutation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use stagehand_types::{Rule, RuleError};
use tokio::sync::watch;

use crate::expr::{ExprError, Expression};
use crate::template::CompiledParams;

// ─────────────────────────────────────────────────────────────────────────────
// Compile Error
// ─────────────────────────────────────────────────────────────────────────────

/// A rule that cannot enter the active set
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Invalid(#[from] RuleError),

    #[error("Rule '{rule_id}': {location} does not parse: {source}")]
    Expression {
        rule_id: String,
        location: String,
        #[source]
        source: ExprError,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Compiled Rule
// ─────────────────────────────────────────────────────────────────────────────

/// A validated rule with its expressions parsed
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    condition: Option<Expression>,
    bindings: Vec<(String, Expression)>,
    actions: Vec<CompiledAction>,
}

/// Parsed guard and params of one action invocation
#[derive(Debug, Clone)]
struct CompiledAction {
    guard: Option<Expression>,
    params: CompiledParams,
}

impl CompiledRule {
    /// Validate a rule and parse every expression it carries
    pub fn compile(rule: Rule) -> Result<Self, CompileError> {
        rule.validate()?;

        let parse = |location: String, source: &str| {
            Expression::parse(source).map_err(|e| CompileError::Expression {
                rule_id: rule.id.clone(),
                location,
                source: e,
            })
        };

        let condition = match &rule.condition {
            Some(src) if !src.trim().is_empty() => Some(parse("condition".to_string(), src)?),
            _ => None,
        };

        let bindings = rule
            .bindings
            .iter()
            .map(|(name, src)| {
                let expr = parse(format!("binding '{}'", name), src)?;
                Ok::<_, CompileError>((name.clone(), expr))
            })
            .collect::<Result<Vec<_>, CompileError>>()?;

        let mut actions = Vec::with_capacity(rule.actions.len());
        for (index, action) in rule.actions.iter().enumerate() {
            let params = CompiledParams::compile(&action.params).map_err(|e| CompileError::Expression {
                rule_id: rule.id.clone(),
                location: format!("params of action {} ('{}')", index, action.action_type),
                source: e,
            })?;
            let guard = match &action.when {
                Some(src) if !src.trim().is_empty() => {
                    Some(parse(format!("guard of action {}", index), src)?)
                }
                _ => None,
            };
            actions.push(CompiledAction { guard, params });
        }

        Ok(Self {
            rule,
            condition,
            bindings,
            actions,
        })
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn condition(&self) -> Option<&Expression> {
        self.condition.as_ref()
    }

    pub fn bindings(&self) -> &[(String, Expression)] {
        &self.bindings
    }

    /// Guard of the action at `index`, if any
    pub fn guard(&self, index: usize) -> Option<&Expression> {
        self.actions.get(index).and_then(|a| a.guard.as_ref())
    }

    /// Parsed params of the action at `index`
    pub fn params(&self, index: usize) -> Option<&CompiledParams> {
        self.actions.get(index).map(|a| &a.params)
    }
}

/// Compile a batch, splitting accepted rules from rejected ones
pub fn compile_rules(rules: impl IntoIterator<Item = Rule>) -> (Vec<CompiledRule>, Vec<CompileError>) {
    let mut compiled = Vec::new();
    let mut errors = Vec::new();
    for rule in rules {
        match CompiledRule::compile(rule) {
            Ok(rule) => compiled.push(rule),
            Err(e) => errors.push(e),
        }
    }
    (compiled, errors)
}

// ─────────────────────────────────────────────────────────────────────────────
// Rule Set
// ─────────────────────────────────────────────────────────────────────────────

/// An immutable, ordered rule set indexed by event name
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Arc<CompiledRule>>,
    by_event: HashMap<String, Vec<usize>>,
    generation: u64,
}

impl RuleSet {
    /// Build a set from rules in store order
    ///
    /// A repeated id keeps its first occurrence; later ones are dropped and
    /// logged.
    pub fn new(rules: impl IntoIterator<Item = CompiledRule>) -> Self {
        let mut seen = HashSet::new();
        let mut set = Self::default();

        for rule in rules {
            if !seen.insert(rule.id().to_string()) {
                tracing::warn!(rule_id = %rule.id(), "Duplicate rule id, keeping the first definition");
                continue;
            }
            let index = set.rules.len();
            set.by_event
                .entry(rule.rule().event_name.clone())
                .or_default()
                .push(index);
            set.rules.push(Arc::new(rule));
        }

        set
    }

    /// Enabled rules bound to `event_name`, in store order
    pub fn matching<'a>(&'a self, event_name: &str) -> impl Iterator<Item = &'a Arc<CompiledRule>> + 'a {
        self.by_event
            .get(event_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|&i| &self.rules[i])
            .filter(|rule| rule.rule().enabled)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<CompiledRule>> {
        self.rules.iter().find(|r| r.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledRule>> {
        self.rules.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Swap counter value this set was installed under
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rule Store
// ─────────────────────────────────────────────────────────────────────────────

/// Holder of the active rule set
pub struct RuleStore {
    current: RwLock<Arc<RuleSet>>,
    generation_tx: watch::Sender<u64>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore {
    /// Create a store with an empty set (generation 0)
    pub fn new() -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            current: RwLock::new(Arc::new(RuleSet::default())),
            generation_tx,
        }
    }

    /// Current active set
    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.read())
    }

    /// Install a new active set, returning its generation
    pub fn replace(&self, rules: impl IntoIterator<Item = CompiledRule>) -> u64 {
        let mut set = RuleSet::new(rules);
        let count = set.len();

        let generation = {
            let mut current = self.current.write();
            set.generation = current.generation + 1;
            let generation = set.generation;
            *current = Arc::new(set);
            generation
        };

        self.generation_tx.send_replace(generation);
        tracing::info!(generation, rules = count, "Active rule set replaced");
        generation
    }

    /// Generation of the active set
    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Receiver that observes every swap
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = self.snapshot();
        f.debug_struct("RuleStore")
            .field("generation", &set.generation())
            .field("rules", &set.ids())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
