use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};

/// The closed set of step kinds a flow may contain.
///
/// Each variant is interpreted generically by the engine; adding a flow or a
/// step is a data change, never new control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Form,
    YesNoDetails,
    Checkbox,
    FileUpload,
    PremiumSummary,
    FinalConfirmation,
    ProceedToPayment,
}

/// One selectable option for choice / multi-select fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldOption {
    pub id: String,
    pub label: String,
}

impl FieldOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Semantic kind of a field plus its normalization/validation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Text {
        #[serde(skip_serializing_if = "Option::is_none")]
        min_len: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_len: Option<usize>,
    },
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<Decimal>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<Decimal>,
    },
    Date {
        not_future: bool,
        /// Earliest acceptable date expressed as days from "today"
        /// (1 = tomorrow).
        #[serde(skip_serializing_if = "Option::is_none")]
        min_days_ahead: Option<i64>,
        /// Inclusive age band derived from the date (date of birth fields).
        #[serde(skip_serializing_if = "Option::is_none")]
        age_min: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        age_max: Option<u32>,
    },
    Choice {
        options: Vec<FieldOption>,
    },
    MultiSelect {
        options: Vec<FieldOption>,
    },
    /// Reference token for an externally uploaded file. `accept` is the
    /// lowercase extension allowlist.
    FileRef {
        accept: Vec<String>,
    },
    Tel,
    Email,
    /// Boolean acknowledgement. A required flag must be accepted, not merely
    /// present (consent semantics).
    Flag,
}

/// Declaration of a single form field within a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub label: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            required: true,
            placeholder: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }
}

/// Within-step visibility rule: when `field` equals (or, for multi-select,
/// contains) `equals`, the field named by `reveals` becomes visible. A field
/// named by any branch rule is conditional: ignored unless revealed,
/// required-if-revealed per its own flag. Step order is never affected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRule {
    pub field: String,
    pub equals: Value,
    pub reveals: String,
}

impl BranchRule {
    pub fn new(
        field: impl Into<String>,
        equals: impl Into<Value>,
        reveals: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            equals: equals.into(),
            reveals: reveals.into(),
        }
    }
}

/// Editable default: `target_field` in this step defaults to the value the
/// user gave for `source_field` in the strictly earlier step `source_step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutofillRule {
    pub source_step: String,
    pub source_field: String,
    pub target_field: String,
}

impl AutofillRule {
    pub fn new(
        source_step: impl Into<String>,
        source_field: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        Self {
            source_step: source_step.into(),
            source_field: source_field.into(),
            target_field: target_field.into(),
        }
    }
}

/// One unit of user interaction within a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSchema {
    pub index: usize,
    pub name: String,
    pub title: String,
    pub step_type: StepType,
    pub fields: Vec<FieldSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branch_rules: Vec<BranchRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub autofill_rules: Vec<AutofillRule>,
}

impl StepSchema {
    pub fn new(
        index: usize,
        name: impl Into<String>,
        title: impl Into<String>,
        step_type: StepType,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            title: title.into(),
            step_type,
            fields: Vec::new(),
            branch_rules: Vec::new(),
            autofill_rules: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn branch(mut self, rule: BranchRule) -> Self {
        self.branch_rules.push(rule);
        self
    }

    pub fn autofill(mut self, rule: AutofillRule) -> Self {
        self.autofill_rules.push(rule);
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Which collected fields feed the premium calculator. Pricing runs as soon
/// as coverage amount and date of birth are both present; the optional
/// `as_of` field (policy start / departure date) defaults to today.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteBinding {
    pub coverage_step: String,
    pub coverage_field: String,
    pub dob_step: String,
    pub dob_field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of_field: Option<String>,
}

/// Static benefit table entry for one coverage amount. Benefit text is looked
/// up, never computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageTier {
    pub amount: Decimal,
    pub label: String,
    pub benefits: Vec<String>,
}

/// Immutable description of one guided quoting journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSchema {
    pub flow_id: String,
    pub product_name: String,
    pub steps: Vec<StepSchema>,
    pub quote_binding: QuoteBinding,
    pub tiers: Vec<CoverageTier>,
}

impl FlowSchema {
    pub fn steps_total(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, index: usize) -> Option<&StepSchema> {
        self.steps.get(index)
    }

    pub fn step_by_name(&self, name: &str) -> Option<&StepSchema> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn last_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    pub fn tier_for(&self, amount: Decimal) -> Option<&CoverageTier> {
        self.tiers.iter().find(|t| t.amount == amount)
    }

    /// Structural validation, run once at registry build. A bad flow
    /// definition is a startup error, not a runtime surprise.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(FlowError::InvalidFlow(format!(
                "flow {} has no steps",
                self.flow_id
            )));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.index != i {
                return Err(FlowError::InvalidFlow(format!(
                    "flow {}: step {} declares index {}, expected {}",
                    self.flow_id, step.name, step.index, i
                )));
            }
        }
        let terminal_count = self
            .steps
            .iter()
            .filter(|s| s.step_type == StepType::ProceedToPayment)
            .count();
        if terminal_count != 1 {
            return Err(FlowError::InvalidFlow(format!(
                "flow {}: expected exactly one proceed_to_payment step, found {}",
                self.flow_id, terminal_count
            )));
        }
        let last = self.steps.last().expect("non-empty");
        if last.step_type != StepType::ProceedToPayment {
            return Err(FlowError::InvalidFlow(format!(
                "flow {}: proceed_to_payment must be the last step",
                self.flow_id
            )));
        }

        let mut names = std::collections::HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(FlowError::InvalidFlow(format!(
                    "flow {}: duplicate step name {}",
                    self.flow_id, step.name
                )));
            }
        }

        for step in &self.steps {
            for rule in &step.branch_rules {
                if !step.has_field(&rule.field) || !step.has_field(&rule.reveals) {
                    return Err(FlowError::InvalidFlow(format!(
                        "flow {}: step {} branch rule references unknown field ({} -> {})",
                        self.flow_id, step.name, rule.field, rule.reveals
                    )));
                }
            }
            for rule in &step.autofill_rules {
                if !step.has_field(&rule.target_field) {
                    return Err(FlowError::InvalidFlow(format!(
                        "flow {}: step {} autofill target {} is not a field of the step",
                        self.flow_id, step.name, rule.target_field
                    )));
                }
                let source = self.step_by_name(&rule.source_step).ok_or_else(|| {
                    FlowError::InvalidFlow(format!(
                        "flow {}: step {} autofill source step {} does not exist",
                        self.flow_id, step.name, rule.source_step
                    ))
                })?;
                if source.index >= step.index {
                    return Err(FlowError::InvalidFlow(format!(
                        "flow {}: step {} autofill source {} must come strictly earlier",
                        self.flow_id, step.name, rule.source_step
                    )));
                }
                if !source.has_field(&rule.source_field) {
                    return Err(FlowError::InvalidFlow(format!(
                        "flow {}: autofill source field {}.{} does not exist",
                        self.flow_id, rule.source_step, rule.source_field
                    )));
                }
            }
        }

        for (step_name, field_name) in [
            (
                &self.quote_binding.coverage_step,
                &self.quote_binding.coverage_field,
            ),
            (&self.quote_binding.dob_step, &self.quote_binding.dob_field),
        ] {
            let step = self.step_by_name(step_name).ok_or_else(|| {
                FlowError::InvalidFlow(format!(
                    "flow {}: quote binding references unknown step {}",
                    self.flow_id, step_name
                ))
            })?;
            if !step.has_field(field_name) {
                return Err(FlowError::InvalidFlow(format!(
                    "flow {}: quote binding references unknown field {}.{}",
                    self.flow_id, step_name, field_name
                )));
            }
        }

        Ok(())
    }
}

/// Catalog entry returned when listing flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSummary {
    pub flow_id: String,
    pub product_name: String,
    pub steps_total: usize,
}

/// Registry of all flows known to the process, built at startup.
pub struct FlowRegistry {
    flows: HashMap<String, Arc<FlowSchema>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self {
            flows: HashMap::new(),
        }
    }

    /// Validate and register a flow. Returns an error for a structurally
    /// invalid definition or a duplicate id.
    pub fn register(&mut self, flow: FlowSchema) -> Result<()> {
        flow.validate()?;
        if self.flows.contains_key(&flow.flow_id) {
            return Err(FlowError::InvalidFlow(format!(
                "flow {} registered twice",
                flow.flow_id
            )));
        }
        self.flows.insert(flow.flow_id.clone(), Arc::new(flow));
        Ok(())
    }

    pub fn get(&self, flow_id: &str) -> Result<Arc<FlowSchema>> {
        self.flows
            .get(flow_id)
            .cloned()
            .ok_or_else(|| FlowError::FlowNotFound(flow_id.to_string()))
    }

    pub fn list(&self) -> Vec<FlowSummary> {
        let mut summaries: Vec<FlowSummary> = self
            .flows
            .values()
            .map(|f| FlowSummary {
                flow_id: f.flow_id.clone(),
                product_name: f.product_name.clone(),
                steps_total: f.steps_total(),
            })
            .collect();
        summaries.sort_by(|a, b| a.flow_id.cmp(&b.flow_id));
        summaries
    }
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::new()
    }
}
