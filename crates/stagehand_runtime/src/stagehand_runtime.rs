//! Stagehand Runtime - Event dispatch, rules and plugins
//!
//! This crate contains everything between an incoming platform event and the
//! actions it triggers: the expression language, the helper and action
//! registries, the rule store, the rule engine, the plugin host and the
//! playlist sequencer.

pub use stagehand_types;

pub mod action;
pub mod context;
pub mod engine;
pub mod expr;
pub mod helper;
pub mod playlist;
pub mod plugin;
pub mod store;
pub mod template;

pub use action::{ActionError, ActionHandler, ActionRegistry, ActionResult, Registrar, RegistrationPolicy};
pub use context::EvalContext;
pub use engine::{ActionStatus, DispatchReport, RuleEngine, RuleStatus};
pub use expr::{ExprError, Expression};
pub use helper::{HelperRegistry, HelperSet};
pub use playlist::{PlaybackDevice, PlaylistConfig, PlaylistManager};
pub use plugin::{EventBus, Plugin, PluginContext, PluginError, PluginManager, PluginResult};
pub use store::{CompileError, CompiledRule, RuleSet, RuleStore, compile_rules};
pub use template::{CompiledParams, Template};
