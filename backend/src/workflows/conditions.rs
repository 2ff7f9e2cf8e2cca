// Workflow Conditions - Typed gates evaluated before a rule's actions run

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use futures::future::{BoxFuture, FutureExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::triggers::{value_as_decimal, value_as_text, value_at, EventPayload};
use crate::error::{ApiResult, ValidationBuilder};
use crate::services::NotificationSink;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

/// Condition type keys accepted in stored rules
pub const CONDITION_TYPES: [&str; 10] = [
    "deal_value",
    "deal_probability",
    "task_priority",
    "contact_tags",
    "time_based",
    "custom_field",
    "complex_logic",
    "data_validation",
    "external_api_check",
    "machine_learning",
];

/// A single condition; stored as `{"type": ..., "config": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum Condition {
    DealValue(NumericCondition),
    DealProbability(NumericCondition),
    TaskPriority(FieldComparison),
    ContactTags(ContactTagsCondition),
    TimeBased(TimeBasedCondition),
    CustomField(FieldCondition),
    ComplexLogic(ConditionGroup),
    DataValidation(DataValidationCondition),
    ExternalApiCheck(ExternalApiCheckCondition),
    MachineLearning(ScoreCondition),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    // Equality
    #[serde(alias = "eq", alias = "==")]
    Equals,
    #[serde(alias = "ne", alias = "!=")]
    NotEquals,

    // String operations
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Regex,

    // Numeric comparisons
    #[serde(alias = "gt", alias = ">")]
    GreaterThan,
    #[serde(alias = "gte", alias = ">=")]
    GreaterThanOrEqual,
    #[serde(alias = "lt", alias = "<")]
    LessThan,
    #[serde(alias = "lte", alias = "<=")]
    LessThanOrEqual,

    // Array operations
    In,
    NotIn,

    // Null/Empty checks
    IsEmpty,
    IsNotEmpty,
}

impl ComparisonOperator {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Equals
                | Self::NotEquals
                | Self::GreaterThan
                | Self::GreaterThanOrEqual
                | Self::LessThan
                | Self::LessThanOrEqual
        )
    }

    pub fn compare_decimal(&self, actual: Decimal, expected: Decimal) -> bool {
        match self {
            Self::Equals => actual == expected,
            Self::NotEquals => actual != expected,
            Self::GreaterThan => actual > expected,
            Self::GreaterThanOrEqual => actual >= expected,
            Self::LessThan => actual < expected,
            Self::LessThanOrEqual => actual <= expected,
            _ => false,
        }
    }

    /// Apply the operator to a (possibly missing) payload value.
    pub fn apply(&self, actual: Option<&serde_json::Value>, expected: &serde_json::Value) -> bool {
        let actual = actual.filter(|v| !v.is_null());

        match self {
            Self::IsEmpty => actual.map(is_blank).unwrap_or(true),
            Self::IsNotEmpty => actual.map(|v| !is_blank(v)).unwrap_or(false),
            Self::NotEquals => actual.map(|v| !loosely_equal(v, expected)).unwrap_or(true),
            Self::NotContains => actual
                .map(|v| !contains_ci(v, expected))
                .unwrap_or(true),
            Self::NotIn => match expected.as_array() {
                Some(options) => actual
                    .map(|v| !options.iter().any(|o| loosely_equal(v, o)))
                    .unwrap_or(true),
                None => false,
            },
            _ => {
                let Some(actual) = actual else {
                    return false;
                };
                match self {
                    Self::Equals => loosely_equal(actual, expected),
                    Self::Contains => contains_ci(actual, expected),
                    Self::StartsWith => value_as_text(actual)
                        .to_lowercase()
                        .starts_with(&value_as_text(expected).to_lowercase()),
                    Self::EndsWith => value_as_text(actual)
                        .to_lowercase()
                        .ends_with(&value_as_text(expected).to_lowercase()),
                    Self::Regex => expected
                        .as_str()
                        .and_then(|p| regex::Regex::new(p).ok())
                        .map(|re| re.is_match(&value_as_text(actual)))
                        .unwrap_or(false),
                    Self::In => expected
                        .as_array()
                        .map(|options| options.iter().any(|o| loosely_equal(actual, o)))
                        .unwrap_or(false),
                    Self::GreaterThan
                    | Self::GreaterThanOrEqual
                    | Self::LessThan
                    | Self::LessThanOrEqual => {
                        match (value_as_decimal(actual), value_as_decimal(expected)) {
                            (Some(a), Some(e)) => self.compare_decimal(a, e),
                            _ => false,
                        }
                    }
                    _ => false,
                }
            }
        }
    }
}

fn is_blank(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

// 5000 and "5000" compare equal; decimals travel as strings.
fn loosely_equal(actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
    if actual == expected {
        return true;
    }
    match (value_as_decimal(actual), value_as_decimal(expected)) {
        (Some(a), Some(e)) => a == e,
        _ => false,
    }
}

fn contains_ci(actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
    match actual {
        serde_json::Value::Array(items) => items.iter().any(|i| loosely_equal(i, expected)),
        other => value_as_text(other)
            .to_lowercase()
            .contains(&value_as_text(expected).to_lowercase()),
    }
}

/// deal_value / deal_probability config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NumericCondition {
    pub operator: ComparisonOperator,
    pub value: Decimal,
}

/// task_priority config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldComparison {
    pub operator: ComparisonOperator,
    pub value: serde_json::Value,
}

/// contact_tags config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactTagsCondition {
    pub operator: TagMatch,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TagMatch {
    ContainsAny,
    ContainsAll,
    ContainsNone,
}

/// time_based config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeBasedCondition {
    pub mode: TimeMode,
    /// Payload path of an RFC 3339 timestamp (older_than_hours / within_hours)
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub hours: Option<i64>,
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
}

fn default_start_hour() -> u32 {
    9
}

fn default_end_hour() -> u32 {
    17
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeMode {
    BusinessHours,
    Weekday,
    OlderThanHours,
    WithinHours,
}

/// custom_field config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldCondition {
    /// Field path to evaluate (dot notation for nested fields)
    pub field: String,
    pub operator: ComparisonOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// complex_logic config: nested group with AND/OR logic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionGroup {
    pub logic: GroupLogic,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupLogic {
    #[serde(alias = "AND")]
    And,
    #[serde(alias = "OR")]
    Or,
}

/// data_validation config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataValidationCondition {
    pub field: String,
    pub rule: ValidationRule,
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    Required,
    Email,
    Numeric,
    Regex,
}

/// external_api_check config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalApiCheckCondition {
    pub url: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

fn default_expected_status() -> u16 {
    200
}

/// machine_learning config: gate on a model score already present in the payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreCondition {
    #[serde(default = "default_score_field")]
    pub score_field: String,
    pub threshold: Decimal,
}

fn default_score_field() -> String {
    "lead.score".to_string()
}

/// Outcome of one top-level condition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionResult {
    pub condition_type: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Inputs a condition may consult besides the payload
pub struct EvaluationContext<'a> {
    pub now: DateTime<Utc>,
    pub sink: &'a dyn NotificationSink,
}

impl Condition {
    /// Decode a `(type, config)` pair from the catalog.
    pub fn decode(condition_type: &str, config: serde_json::Value) -> ApiResult<Self> {
        if !CONDITION_TYPES.contains(&condition_type) {
            return Err(crate::error::validation_error(
                "conditions",
                &format!("unknown condition type '{}'", condition_type),
            ));
        }

        let condition: Condition = serde_json::from_value(serde_json::json!({
            "type": condition_type,
            "config": config,
        }))
        .map_err(|e| {
            crate::error::validation_error(
                "conditions",
                &format!("malformed {} config: {}", condition_type, e),
            )
        })?;

        condition.validate()?;
        Ok(condition)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::DealValue(_) => "deal_value",
            Self::DealProbability(_) => "deal_probability",
            Self::TaskPriority(_) => "task_priority",
            Self::ContactTags(_) => "contact_tags",
            Self::TimeBased(_) => "time_based",
            Self::CustomField(_) => "custom_field",
            Self::ComplexLogic(_) => "complex_logic",
            Self::DataValidation(_) => "data_validation",
            Self::ExternalApiCheck(_) => "external_api_check",
            Self::MachineLearning(_) => "machine_learning",
        }
    }

    /// Structural checks serde cannot express.
    pub fn validate(&self) -> ApiResult<()> {
        let mut errors = ValidationBuilder::new();
        self.collect_errors("conditions", &mut errors);
        match errors.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn collect_errors(&self, field: &str, errors: &mut ValidationBuilder) {
        let mut push = |message: String| errors.push(field, &message);

        match self {
            Self::DealValue(c) | Self::DealProbability(c) if !c.operator.is_numeric() => {
                push(format!("{} does not support operator {:?}", self.kind(), c.operator));
            }
            Self::TaskPriority(c)
                if !matches!(
                    c.operator,
                    ComparisonOperator::Equals
                        | ComparisonOperator::NotEquals
                        | ComparisonOperator::In
                        | ComparisonOperator::NotIn
                ) =>
            {
                push(format!("task_priority does not support operator {:?}", c.operator));
            }
            Self::ContactTags(c) if c.tags.is_empty() => {
                push("contact_tags needs at least one tag".to_string());
            }
            Self::TimeBased(c) => {
                let needs_field = matches!(c.mode, TimeMode::OlderThanHours | TimeMode::WithinHours);
                if needs_field && (c.field.is_none() || c.hours.is_none()) {
                    push(format!("time_based {:?} needs field and hours", c.mode));
                }
                if c.start_hour >= c.end_hour || c.end_hour > 24 {
                    push("time_based business hours window is empty".to_string());
                }
            }
            Self::CustomField(c) if c.field.trim().is_empty() => {
                push("custom_field needs a field path".to_string());
            }
            Self::CustomField(c) if c.operator == ComparisonOperator::Regex => {
                if c.value.as_str().map(regex::Regex::new).map(|r| r.is_err()).unwrap_or(true) {
                    push("custom_field regex is not a valid pattern".to_string());
                }
            }
            Self::ComplexLogic(group) => {
                if group.conditions.is_empty() {
                    push("complex_logic needs at least one condition".to_string());
                }
                for nested in &group.conditions {
                    nested.collect_errors(field, errors);
                }
            }
            Self::DataValidation(c) if c.rule == ValidationRule::Regex => {
                let valid = c
                    .pattern
                    .as_deref()
                    .map(|p| regex::Regex::new(p).is_ok())
                    .unwrap_or(false);
                if !valid {
                    push("data_validation regex rule needs a valid pattern".to_string());
                }
            }
            Self::ExternalApiCheck(c) if !c.url.starts_with("http") => {
                push("external_api_check needs an http(s) url".to_string());
            }
            _ => {}
        }
    }

    /// Evaluate against a payload. I/O failures count as a failed condition.
    pub fn evaluate<'a>(
        &'a self,
        payload: &'a EventPayload,
        ctx: &'a EvaluationContext<'a>,
    ) -> BoxFuture<'a, ApiResult<bool>> {
        async move {
            let passed = match self {
                Self::DealValue(c) => numeric(payload, "deal.value", c),
                Self::DealProbability(c) => numeric(payload, "deal.probability", c),
                Self::TaskPriority(c) => c.operator.apply(value_at(payload, "task.priority"), &c.value),
                Self::ContactTags(c) => contact_tags(payload, c),
                Self::TimeBased(c) => time_based(payload, c, ctx.now),
                Self::CustomField(c) => c.operator.apply(value_at(payload, &c.field), &c.value),
                Self::ComplexLogic(group) => {
                    match group.logic {
                        GroupLogic::And => {
                            for nested in &group.conditions {
                                if !nested.evaluate(payload, ctx).await? {
                                    return Ok(false);
                                }
                            }
                            true
                        }
                        GroupLogic::Or => {
                            let mut any = false;
                            for nested in &group.conditions {
                                if nested.evaluate(payload, ctx).await? {
                                    any = true;
                                    break;
                                }
                            }
                            any
                        }
                    }
                }
                Self::DataValidation(c) => data_validation(payload, c),
                Self::ExternalApiCheck(c) => {
                    let status = ctx.sink.check_status(&c.url).await?;
                    status == c.expected_status
                }
                Self::MachineLearning(c) => value_at(payload, &c.score_field)
                    .and_then(value_as_decimal)
                    .map(|score| score >= c.threshold)
                    .unwrap_or(false),
            };
            Ok(passed)
        }
        .boxed()
    }
}

fn numeric(payload: &EventPayload, path: &str, condition: &NumericCondition) -> bool {
    value_at(payload, path)
        .and_then(value_as_decimal)
        .map(|actual| condition.operator.compare_decimal(actual, condition.value))
        .unwrap_or(false)
}

fn contact_tags(payload: &EventPayload, condition: &ContactTagsCondition) -> bool {
    let tags: Vec<String> = value_at(payload, "contact.tags")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().map(|t| value_as_text(t).to_lowercase()).collect())
        .unwrap_or_default();
    let has = |tag: &String| tags.contains(&tag.to_lowercase());

    match condition.operator {
        TagMatch::ContainsAny => condition.tags.iter().any(has),
        TagMatch::ContainsAll => condition.tags.iter().all(has),
        TagMatch::ContainsNone => !condition.tags.iter().any(has),
    }
}

fn time_based(payload: &EventPayload, condition: &TimeBasedCondition, now: DateTime<Utc>) -> bool {
    let is_weekday = !matches!(now.weekday(), Weekday::Sat | Weekday::Sun);

    match condition.mode {
        TimeMode::Weekday => is_weekday,
        TimeMode::BusinessHours => {
            is_weekday && now.hour() >= condition.start_hour && now.hour() < condition.end_hour
        }
        TimeMode::OlderThanHours | TimeMode::WithinHours => {
            let timestamp = condition
                .field
                .as_deref()
                .and_then(|f| value_at(payload, f))
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc));
            let (Some(timestamp), Some(hours)) = (timestamp, condition.hours) else {
                return false;
            };
            let age = now - timestamp;

            if condition.mode == TimeMode::OlderThanHours {
                age.num_hours() >= hours
            } else {
                age.num_hours().abs() <= hours
            }
        }
    }
}

fn data_validation(payload: &EventPayload, condition: &DataValidationCondition) -> bool {
    let value = value_at(payload, &condition.field).filter(|v| !is_blank(v));

    match condition.rule {
        ValidationRule::Required => value.is_some(),
        ValidationRule::Email => match (value, regex::Regex::new(EMAIL_PATTERN)) {
            (Some(v), Ok(re)) => re.is_match(&value_as_text(v)),
            _ => false,
        },
        ValidationRule::Numeric => value.and_then(value_as_decimal).is_some(),
        ValidationRule::Regex => match (value, condition.pattern.as_deref()) {
            (Some(v), Some(pattern)) => regex::Regex::new(pattern)
                .map(|re| re.is_match(&value_as_text(v)))
                .unwrap_or(false),
            _ => false,
        },
    }
}

impl FieldCondition {
    pub fn new(field: &str, operator: ComparisonOperator, value: serde_json::Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }
}

/// Builders for common conditions
impl Condition {
    pub fn deal_value(operator: ComparisonOperator, value: Decimal) -> Self {
        Self::DealValue(NumericCondition { operator, value })
    }

    pub fn deal_probability(operator: ComparisonOperator, value: i64) -> Self {
        Self::DealProbability(NumericCondition {
            operator,
            value: Decimal::from(value),
        })
    }

    pub fn task_priority_in(priorities: &[&str]) -> Self {
        Self::TaskPriority(FieldComparison {
            operator: ComparisonOperator::In,
            value: serde_json::json!(priorities),
        })
    }

    pub fn contact_has_any_tag(tags: &[&str]) -> Self {
        Self::ContactTags(ContactTagsCondition {
            operator: TagMatch::ContainsAny,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        })
    }

    pub fn field(field: &str, operator: ComparisonOperator, value: serde_json::Value) -> Self {
        Self::CustomField(FieldCondition::new(field, operator, value))
    }

    pub fn any_of(conditions: Vec<Condition>) -> Self {
        Self::ComplexLogic(ConditionGroup {
            logic: GroupLogic::Or,
            conditions,
        })
    }

    pub fn all_of(conditions: Vec<Condition>) -> Self {
        Self::ComplexLogic(ConditionGroup {
            logic: GroupLogic::And,
            conditions,
        })
    }

    pub fn valid_email(field: &str) -> Self {
        Self::DataValidation(DataValidationCondition {
            field: field.to_string(),
            rule: ValidationRule::Email,
            pattern: None,
        })
    }
}
