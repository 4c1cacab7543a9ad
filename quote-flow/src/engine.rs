use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{FlowError, Result};
use crate::pricing::{Premium, PricingConfig, price};
use crate::quote::QuoteManager;
use crate::repository::QuoteRepository;
use crate::schema::{FlowRegistry, FlowSchema, FlowSummary, StepType};
use crate::session::{
    CollectedData, FlowProgress, FormDraft, Session, SessionMode, StepCursor, StepData,
};
use crate::storage::{Cache, DraftStore, SessionStore, StoreConfig};
use crate::validator::{FieldErrors, validate_step};

/// What a client needs to render the current step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepView {
    pub flow_id: String,
    pub step: usize,
    pub steps_total: usize,
    pub name: String,
    pub title: String,
    pub step_type: StepType,
    pub fields: Vec<crate::schema::FieldSchema>,
    /// Editable defaults: autofill values overlaid with anything already
    /// collected for this step.
    pub prefill: StepData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium: Option<PremiumView>,
}

/// Premium figures for summary / confirmation steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiumView {
    pub quote_id: String,
    pub coverage_amount: Decimal,
    pub monthly: Decimal,
    pub annual: Decimal,
    pub age_loading_applied: bool,
    pub breakdown: crate::pricing::PremiumBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier_label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub benefits: Vec<String>,
}

/// Terminal result of a flow: the finalized quote plus the handoff marker
/// for the next journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub quote_id: String,
    pub next_flow: String,
}

/// Discriminated outcome of a step submission. Rejection is a normal
/// outcome, not an error; it never advances state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Next(StepView),
    Rejected { field_errors: FieldErrors },
    Complete(Completion),
}

/// Result of starting (or restarting) a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResult {
    pub session_id: String,
    pub view: StepView,
}

/// Summary of a session for status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub mode: SessionMode,
    pub current_flow: Option<String>,
    pub current_step: Option<StepCursor>,
    pub steps_total: Option<usize>,
    pub collected_keys: Vec<String>,
}

const PAYMENT_HANDOFF: &str = "payment";

/// The guided-flow state machine.
///
/// All mutation for one session is serialized behind a per-session lock, so
/// two racing duplicate submissions resolve as one advance plus one replay of
/// the advanced view.
pub struct FlowEngine {
    registry: Arc<FlowRegistry>,
    sessions: SessionStore,
    drafts: DraftStore,
    quotes: QuoteManager,
    pricing: PricingConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FlowEngine {
    pub fn new(
        registry: Arc<FlowRegistry>,
        cache: Arc<dyn Cache>,
        repository: Arc<dyn QuoteRepository>,
        store_config: StoreConfig,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            registry,
            sessions: SessionStore::new(cache.clone(), store_config.session_ttl),
            drafts: DraftStore::new(cache, store_config.draft_ttl),
            quotes: QuoteManager::new(repository),
            pricing,
            locks: DashMap::new(),
        }
    }

    // Lock entries are tiny and never evicted: eviction could hand two
    // mutexes to one session mid-race.
    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }

    pub fn get_schema(&self, flow_id: &str) -> Result<Arc<FlowSchema>> {
        self.registry.get(flow_id)
    }

    pub fn list_flows(&self) -> Vec<FlowSummary> {
        self.registry.list()
    }

    /// Start `flow_id` for a user. Reuses the session when `session_id`
    /// names an existing one; restarting the active flow resets the cursor
    /// to 0 but keeps collected data. Starting a different flow while one is
    /// active is a conflict (cancel first).
    #[instrument(skip(self, initial_data), fields(flow_id = %flow_id))]
    pub async fn start_flow(
        &self,
        flow_id: &str,
        user_id: &str,
        session_id: Option<String>,
        initial_data: Option<StepData>,
    ) -> Result<StartResult> {
        let flow = self.registry.get(flow_id)?;

        let mut session = match session_id {
            Some(id) => {
                let lock = self.lock_for(&id);
                let _guard = lock.lock().await;
                let session = self
                    .sessions
                    .get(&id)
                    .await?
                    .ok_or_else(|| FlowError::SessionNotFound(id.clone()))?;
                if let Some(progress) = &session.flow {
                    if progress.flow_id != flow_id && !progress.cursor.is_complete() {
                        return Err(FlowError::Conflict(format!(
                            "flow {} is already in progress; cancel it first",
                            progress.flow_id
                        )));
                    }
                }
                session
            }
            None => Session::new(user_id),
        };

        let lock = self.lock_for(&session.session_id);
        let _guard = lock.lock().await;

        let mut progress = match session.flow.take() {
            Some(existing) if existing.flow_id == flow_id && !existing.cursor.is_complete() => {
                // Restart keeps what the user already entered.
                FlowProgress {
                    cursor: StepCursor::At(0),
                    ..existing
                }
            }
            _ => FlowProgress::new(flow_id),
        };

        // Initial data is prefill only: editable, never entering
        // collected_data unvalidated.
        if let Some(initial) = initial_data {
            for (field_name, value) in initial {
                if let Some(step) = flow.steps.iter().find(|s| s.has_field(&field_name)) {
                    progress
                        .prefill
                        .entry(step.name.clone())
                        .or_default()
                        .insert(field_name, value);
                }
            }
        }

        session.flow = Some(progress);
        session.touch();

        let progress = session.flow.as_ref().expect("just set");
        let draft = FormDraft::snapshot(&session, progress);
        self.drafts.save(&draft).await?;
        self.sessions.save(&session).await?;

        info!(session_id = %session.session_id, "started flow");
        let view = self.step_view(&flow, progress, 0).await?;
        Ok(StartResult {
            session_id: session.session_id,
            view,
        })
    }

    /// Advance one step. `step_index` is the index the client believes it is
    /// submitting; a submission tagged with the immediately previous index
    /// (or the last index once complete) is treated as a duplicate retry and
    /// replays the current view without mutating.
    #[instrument(skip(self, form_data), fields(session_id = %session_id, step_index))]
    pub async fn submit_step(
        &self,
        session_id: &str,
        step_index: usize,
        form_data: StepData,
    ) -> Result<SubmitOutcome> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))?;
        let mut progress = session
            .flow
            .take()
            .ok_or_else(|| FlowError::Conflict("no guided flow is active".to_string()))?;
        let flow = self.registry.get(&progress.flow_id)?;

        let current = match progress.cursor {
            StepCursor::Complete => {
                if step_index == flow.last_index() {
                    // Duplicate of the terminal submission.
                    let quote_id = progress.quote_id.clone().ok_or_else(|| {
                        FlowError::Conflict("completed flow has no quote".to_string())
                    })?;
                    debug!("replaying completion for duplicate terminal submission");
                    session.flow = Some(progress);
                    return Ok(SubmitOutcome::Complete(Completion {
                        quote_id,
                        next_flow: PAYMENT_HANDOFF.to_string(),
                    }));
                }
                return Err(FlowError::Conflict("flow is already complete".to_string()));
            }
            StepCursor::At(current) => {
                if step_index + 1 == current {
                    // Duplicate retry of the step that just advanced.
                    debug!("duplicate submission, replaying current view");
                    let view = self.step_view(&flow, &progress, current).await?;
                    session.flow = Some(progress);
                    return Ok(SubmitOutcome::Next(view));
                }
                if step_index != current {
                    return Err(FlowError::Conflict(format!(
                        "submission for step {step_index} but the flow is at step {current}"
                    )));
                }
                current
            }
        };

        let step = flow
            .step(current)
            .ok_or_else(|| FlowError::Conflict(format!("step {current} is out of range")))?;

        let normalized = match validate_step(step, &form_data, self.today()) {
            Ok(values) => values,
            Err(field_errors) => {
                debug!(errors = field_errors.len(), "submission rejected");
                // State untouched: put the progress back unchanged.
                session.flow = Some(progress);
                return Ok(SubmitOutcome::Rejected { field_errors });
            }
        };

        // Wholesale replacement of this step's values, never a deep merge.
        progress.collected.insert(step.name.clone(), normalized);
        recompute_prefill(&flow, &mut progress);

        // Price as soon as the binding is satisfied; editing a priced input
        // reprices on the same draft quote.
        if let Some((coverage, premium)) = self.compute_premium(&flow, &progress.collected) {
            let quote = self
                .quotes
                .upsert_draft(
                    session_id,
                    &flow.flow_id,
                    &session.user_id,
                    coverage,
                    premium,
                    progress.collected.clone(),
                )
                .await?;
            progress.quote_id = Some(quote.quote_id);
        }

        if step.step_type == StepType::ProceedToPayment {
            let quote_id = progress
                .quote_id
                .clone()
                .ok_or_else(|| FlowError::Conflict("flow reached payment without a priced quote".to_string()))?;
            let quote = self.quotes.finalize(&quote_id).await?;
            progress.cursor = StepCursor::Complete;

            self.drafts.delete(session_id, &flow.flow_id).await?;
            session.flow = Some(progress);
            session.touch();
            self.sessions.save(&session).await?;

            info!(quote_id = %quote.quote_id, "flow complete, handing off to payment");
            return Ok(SubmitOutcome::Complete(Completion {
                quote_id: quote.quote_id,
                next_flow: PAYMENT_HANDOFF.to_string(),
            }));
        }

        progress.cursor = StepCursor::At(current + 1);
        session.flow = Some(progress);
        session.touch();

        // Persist quote (above) -> draft -> session. The session save is the
        // commit point for advancement, so a failed write surfaces as
        // Storage and a client retry converges.
        let progress = session.flow.as_ref().expect("just set");
        let draft = FormDraft::snapshot(&session, progress);
        self.drafts.save(&draft).await?;
        self.sessions.save(&session).await?;

        debug!(next_step = current + 1, "step advanced");
        let view = self.step_view(&flow, progress, current + 1).await?;
        Ok(SubmitOutcome::Next(view))
    }

    /// Back-navigation to an earlier, already-completed step. Collected data
    /// for later steps is retained so re-advancing can reuse it.
    #[instrument(skip(self), fields(session_id = %session_id, target_step))]
    pub async fn retreat(&self, session_id: &str, target_step: usize) -> Result<StepView> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))?;
        let progress = session
            .flow
            .as_mut()
            .ok_or_else(|| FlowError::Conflict("no guided flow is active".to_string()))?;
        let flow = self.registry.get(&progress.flow_id)?;

        let current = progress.cursor.index().ok_or_else(|| {
            FlowError::Conflict("cannot retreat: flow is already complete".to_string())
        })?;
        if target_step >= current {
            return Err(FlowError::Conflict(format!(
                "can only retreat to a step before {current}, got {target_step}"
            )));
        }

        progress.cursor = StepCursor::At(target_step);
        session.touch();

        let progress = session.flow.as_ref().expect("checked above");
        let draft = FormDraft::snapshot(&session, progress);
        self.drafts.save(&draft).await?;
        self.sessions.save(&session).await?;

        info!("retreated to step {target_step}");
        self.step_view(&flow, progress, target_step).await
    }

    /// Resume a flow from its draft. This is the path that survives session
    /// TTL expiry: when the live session is gone, it is rebuilt from the
    /// draft snapshot.
    #[instrument(skip(self), fields(session_id = %session_id, flow_id = %flow_id))]
    pub async fn resume(&self, session_id: &str, flow_id: &str) -> Result<StepView> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let flow = self.registry.get(flow_id)?;

        let session = match self.sessions.get(session_id).await? {
            Some(session) if session.flow.as_ref().is_some_and(|p| p.flow_id == flow_id) => session,
            _ => {
                let draft = self
                    .drafts
                    .get(session_id, flow_id)
                    .await?
                    .ok_or_else(|| {
                        FlowError::DraftNotFound(session_id.to_string(), flow_id.to_string())
                    })?;
                if let Some(step) = draft.step.index() {
                    if step >= flow.steps_total() {
                        return Err(FlowError::Conflict(format!(
                            "draft step {step} is outside flow {flow_id}; the draft is stale"
                        )));
                    }
                }
                info!("rebuilding session from draft");
                let session = draft.restore_session();
                self.sessions.save(&session).await?;
                session
            }
        };

        let progress = session.flow.as_ref().expect("resume always yields a flow");
        let step = progress.cursor.index().ok_or_else(|| {
            FlowError::Conflict("flow is already complete".to_string())
        })?;
        self.step_view(&flow, progress, step).await
    }

    /// Abort the flow: delete the draft, abandon any draft quote, return the
    /// session to conversational mode. Finalized quotes stay finalized.
    #[instrument(skip(self), fields(session_id = %session_id, flow_id = %flow_id))]
    pub async fn cancel(&self, session_id: &str, flow_id: &str) -> Result<()> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        self.drafts.delete(session_id, flow_id).await?;
        self.quotes.abandon_active(session_id, flow_id).await?;

        if let Some(mut session) = self.sessions.get(session_id).await? {
            if session
                .flow
                .as_ref()
                .is_some_and(|p| p.flow_id == flow_id)
            {
                session.flow = None;
                session.touch();
                self.sessions.save(&session).await?;
            }
        }

        info!("flow cancelled");
        Ok(())
    }

    pub async fn get_draft(&self, session_id: &str, flow_id: &str) -> Result<FormDraft> {
        self.drafts
            .get(session_id, flow_id)
            .await?
            .ok_or_else(|| FlowError::DraftNotFound(session_id.to_string(), flow_id.to_string()))
    }

    pub async fn delete_draft(&self, session_id: &str, flow_id: &str) -> Result<()> {
        self.drafts.delete(session_id, flow_id).await
    }

    pub async fn get_session_state(&self, session_id: &str) -> Result<SessionState> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))?;

        let (current_flow, current_step, steps_total, collected_keys) = match &session.flow {
            Some(progress) => (
                Some(progress.flow_id.clone()),
                Some(progress.cursor),
                self.registry
                    .get(&progress.flow_id)
                    .ok()
                    .map(|f| f.steps_total()),
                progress.collected.keys().cloned().collect(),
            ),
            None => (None, None, None, Vec::new()),
        };

        Ok(SessionState {
            session_id: session.session_id.clone(),
            mode: session.mode(),
            current_flow,
            current_step,
            steps_total,
            collected_keys,
        })
    }

    /// Load an existing session or create a fresh conversational one.
    pub async fn get_or_create_session(
        &self,
        session_id: Option<String>,
        user_id: &str,
    ) -> Result<Session> {
        if let Some(id) = session_id {
            self.sessions
                .get(&id)
                .await?
                .ok_or(FlowError::SessionNotFound(id))
        } else {
            let session = Session::new(user_id);
            self.sessions.save(&session).await?;
            Ok(session)
        }
    }

    /// The view for the session's current step, if a flow is active.
    pub async fn current_view(&self, session: &Session) -> Result<Option<StepView>> {
        let Some(progress) = &session.flow else {
            return Ok(None);
        };
        let Some(step) = progress.cursor.index() else {
            return Ok(None);
        };
        let flow = self.registry.get(&progress.flow_id)?;
        Ok(Some(self.step_view(&flow, progress, step).await?))
    }

    fn compute_premium(
        &self,
        flow: &FlowSchema,
        collected: &CollectedData,
    ) -> Option<(Decimal, Premium)> {
        let binding = &flow.quote_binding;
        let coverage = collected
            .get(&binding.coverage_step)
            .and_then(|step| step.get(&binding.coverage_field))
            .and_then(value_as_decimal)?;
        let dob = collected
            .get(&binding.dob_step)
            .and_then(|step| step.get(&binding.dob_field))
            .and_then(value_as_date)?;
        let as_of = binding
            .as_of_step
            .as_ref()
            .zip(binding.as_of_field.as_ref())
            .and_then(|(step, field)| collected.get(step).and_then(|s| s.get(field)))
            .and_then(value_as_date)
            .unwrap_or_else(|| self.today());

        Some((coverage, price(&self.pricing, coverage, dob, as_of)))
    }

    async fn step_view(
        &self,
        flow: &FlowSchema,
        progress: &FlowProgress,
        index: usize,
    ) -> Result<StepView> {
        let step = flow
            .step(index)
            .ok_or_else(|| FlowError::Conflict(format!("step {index} is out of range")))?;

        let mut prefill = progress
            .prefill
            .get(&step.name)
            .cloned()
            .unwrap_or_default();
        if let Some(collected) = progress.collected.get(&step.name) {
            for (k, v) in collected {
                prefill.insert(k.clone(), v.clone());
            }
        }

        let premium = match step.step_type {
            StepType::PremiumSummary | StepType::FinalConfirmation | StepType::ProceedToPayment => {
                match &progress.quote_id {
                    Some(quote_id) => {
                        let quote = self.quotes.get(quote_id).await?;
                        let tier = flow.tier_for(quote.coverage_amount);
                        Some(PremiumView {
                            quote_id: quote.quote_id,
                            coverage_amount: quote.coverage_amount,
                            monthly: quote.premium.monthly,
                            annual: quote.premium.annual,
                            age_loading_applied: quote.premium.age_loading_applied(),
                            breakdown: quote.premium.breakdown,
                            tier_label: tier.map(|t| t.label.clone()),
                            benefits: tier.map(|t| t.benefits.clone()).unwrap_or_default(),
                        })
                    }
                    None => {
                        warn!(step = %step.name, "summary step reached without a priced quote");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(StepView {
            flow_id: flow.flow_id.clone(),
            step: index,
            steps_total: flow.steps_total(),
            name: step.name.clone(),
            title: step.title.clone(),
            step_type: step.step_type,
            fields: step.fields.clone(),
            prefill,
            premium,
        })
    }
}

/// Recompute every step's autofill defaults from the collected data.
/// Defaults never overwrite collected values; the overlay happens at view
/// time.
fn recompute_prefill(flow: &FlowSchema, progress: &mut FlowProgress) {
    for step in &flow.steps {
        for rule in &step.autofill_rules {
            let value = progress
                .collected
                .get(&rule.source_step)
                .and_then(|s| s.get(&rule.source_field))
                .cloned();
            if let Some(value) = value {
                progress
                    .prefill
                    .entry(step.name.clone())
                    .or_default()
                    .insert(rule.target_field.clone(), value);
            }
        }
    }
}

fn value_as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn value_as_date(value: &Value) -> Option<NaiveDate> {
    value
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}
