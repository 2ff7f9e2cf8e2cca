// Workflow Automation Engine
//
// Trigger / condition / action rules for the sales pipeline.
// Rules are evaluated per event and every run is written to the execution log.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod fixtures;
pub mod triggers;

pub use actions::{Action, ACTION_TYPES};
pub use conditions::{ComparisonOperator, Condition, CONDITION_TYPES};
pub use engine::{
    AutomationRule, ExecutionLog, ExecutionResult, InvokeRequest, InvokeResponse, RuleDefinition, RuleEngine,
    RunState,
};
pub use triggers::{EventPayload, EventSource, Trigger, TriggerEvent, TriggerType};
