use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate, Utc};
use rust_decimal_macros::dec;
use serde_json::json;

use quote_flow::{
    AutofillRule, BranchRule, Cache, CoverageTier, FieldKind, FieldOption, FieldSchema, FlowEngine,
    FlowError, FlowRegistry, FlowSchema, FormDraft, InMemoryCache, InMemoryQuoteRepository,
    PricingConfig, QuoteBinding, QuoteRepository, QuoteStatus, SessionMode, StepCursor, StepData,
    StepSchema, StepType, StoreConfig, SubmitOutcome,
};

fn personal_accident_test_flow() -> FlowSchema {
    FlowSchema {
        flow_id: "pa".into(),
        product_name: "Personal Accident".into(),
        steps: vec![
            StepSchema::new(0, "personal_details", "Personal details", StepType::Form)
                .field(FieldSchema::new(
                    "surname",
                    "Surname",
                    FieldKind::Text {
                        min_len: Some(2),
                        max_len: Some(50),
                    },
                ))
                .field(FieldSchema::new(
                    "date_of_birth",
                    "Date of Birth",
                    FieldKind::Date {
                        not_future: true,
                        min_days_ahead: None,
                        age_min: Some(18),
                        age_max: Some(65),
                    },
                ))
                .field(FieldSchema::new("mobile_number", "Mobile Number", FieldKind::Tel)),
            StepSchema::new(1, "previous_policy", "Previous policy", StepType::YesNoDetails)
                .field(FieldSchema::new(
                    "had_policy",
                    "Previously held a PA policy",
                    FieldKind::Choice {
                        options: vec![FieldOption::new("yes", "Yes"), FieldOption::new("no", "No")],
                    },
                ))
                .field(FieldSchema::new(
                    "insurer_name",
                    "Name of insurer",
                    FieldKind::Text {
                        min_len: Some(2),
                        max_len: Some(50),
                    },
                ))
                .branch(BranchRule::new("had_policy", json!("yes"), "insurer_name")),
            StepSchema::new(2, "coverage", "Choose your coverage", StepType::Form)
                .field(FieldSchema::new(
                    "coverage_amount",
                    "Coverage",
                    FieldKind::Choice {
                        options: vec![
                            FieldOption::new("10000000", "Basic – UGX 10,000,000"),
                            FieldOption::new("25000000", "Standard – UGX 25,000,000"),
                        ],
                    },
                ))
                .field(FieldSchema::new(
                    "policy_start_date",
                    "Policy Start Date",
                    FieldKind::Date {
                        not_future: false,
                        min_days_ahead: Some(1),
                        age_min: None,
                        age_max: None,
                    },
                )),
            StepSchema::new(3, "beneficiary", "Beneficiary", StepType::Form)
                .field(FieldSchema::new(
                    "beneficiary_name",
                    "Beneficiary name",
                    FieldKind::Text {
                        min_len: Some(2),
                        max_len: Some(50),
                    },
                ))
                .autofill(AutofillRule::new("personal_details", "surname", "beneficiary_name")),
            StepSchema::new(4, "summary", "Premium summary", StepType::PremiumSummary),
            StepSchema::new(5, "pay", "Proceed to payment", StepType::ProceedToPayment),
        ],
        quote_binding: QuoteBinding {
            coverage_step: "coverage".into(),
            coverage_field: "coverage_amount".into(),
            dob_step: "personal_details".into(),
            dob_field: "date_of_birth".into(),
            as_of_step: Some("coverage".into()),
            as_of_field: Some("policy_start_date".into()),
        },
        tiers: vec![
            CoverageTier {
                amount: dec!(10_000_000),
                label: "Basic".into(),
                benefits: vec!["Accidental death cover".into()],
            },
            CoverageTier {
                amount: dec!(25_000_000),
                label: "Standard".into(),
                benefits: vec!["Accidental death cover".into(), "Hospital cash".into()],
            },
        ],
    }
}

fn engine_with(cache: Arc<dyn Cache>, config: StoreConfig) -> (FlowEngine, Arc<InMemoryQuoteRepository>) {
    let mut registry = FlowRegistry::new();
    registry.register(personal_accident_test_flow()).unwrap();
    let repo = Arc::new(InMemoryQuoteRepository::new());
    let engine = FlowEngine::new(
        Arc::new(registry),
        cache,
        repo.clone(),
        config,
        PricingConfig::default(),
    );
    (engine, repo)
}

fn engine() -> (FlowEngine, Arc<InMemoryQuoteRepository>) {
    engine_with(Arc::new(InMemoryCache::new()), StoreConfig::default())
}

/// Date of birth making the applicant exactly `age` for any pricing date
/// within the next few months.
fn dob_with_age(age: i32) -> String {
    let anchor = Utc::now().date_naive() - Days::new(100);
    let dob =
        NaiveDate::from_ymd_opt(anchor.year() - age, anchor.month(), anchor.day().min(28)).unwrap();
    dob.format("%Y-%m-%d").to_string()
}

fn tomorrow() -> String {
    (Utc::now().date_naive() + Days::new(1))
        .format("%Y-%m-%d")
        .to_string()
}

fn payload(value: serde_json::Value) -> StepData {
    value.as_object().unwrap().clone()
}

fn personal_details(age: i32) -> StepData {
    payload(json!({
        "surname": "Okello",
        "date_of_birth": dob_with_age(age),
        "mobile_number": "0772123456"
    }))
}

async fn advance_to_summary(engine: &FlowEngine, session_id: &str, coverage: &str) {
    for (i, body) in [
        personal_details(35),
        payload(json!({"had_policy": "no"})),
        payload(json!({"coverage_amount": coverage, "policy_start_date": tomorrow()})),
        payload(json!({"beneficiary_name": "Akello"})),
    ]
    .into_iter()
    .enumerate()
    {
        let outcome = engine.submit_step(session_id, i, body).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Next(_)), "step {i} must advance");
    }
}

#[tokio::test]
async fn end_to_end_flow_finalizes_a_quote() {
    let (engine, _repo) = engine();
    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let session_id = started.session_id.clone();
    assert_eq!(started.view.step, 0);
    assert_eq!(started.view.steps_total, 6);

    advance_to_summary(&engine, &session_id, "10000000").await;

    // The premium summary view carries the exact figures.
    let state = engine.get_session_state(&session_id).await.unwrap();
    assert_eq!(state.current_step, Some(StepCursor::At(4)));
    let view = engine.resume(&session_id, "pa").await.unwrap();
    let premium = view.premium.expect("summary must be priced");
    assert_eq!(premium.monthly, dec!(1250.00));
    assert_eq!(premium.annual, dec!(15000.00));
    assert!(!premium.age_loading_applied);
    assert_eq!(premium.tier_label.as_deref(), Some("Basic"));

    let outcome = engine
        .submit_step(&session_id, 4, StepData::new())
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Next(_)));

    let outcome = engine
        .submit_step(&session_id, 5, StepData::new())
        .await
        .unwrap();
    let SubmitOutcome::Complete(completion) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(completion.next_flow, "payment");

    // Draft is gone, session is complete, quote is finalized.
    assert!(matches!(
        engine.get_draft(&session_id, "pa").await,
        Err(FlowError::DraftNotFound(..))
    ));
    let state = engine.get_session_state(&session_id).await.unwrap();
    assert_eq!(state.current_step, Some(StepCursor::Complete));
}

#[tokio::test]
async fn terminal_step_is_idempotent() {
    let (engine, repo) = engine();
    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let session_id = started.session_id;
    advance_to_summary(&engine, &session_id, "10000000").await;
    engine.submit_step(&session_id, 4, StepData::new()).await.unwrap();

    let first = engine.submit_step(&session_id, 5, StepData::new()).await.unwrap();
    let second = engine.submit_step(&session_id, 5, StepData::new()).await.unwrap();
    let (SubmitOutcome::Complete(a), SubmitOutcome::Complete(b)) = (first, second) else {
        panic!("both terminal submissions must complete");
    };
    assert_eq!(a.quote_id, b.quote_id);

    let quote = repo.get_quote(&a.quote_id).await.unwrap().unwrap();
    assert_eq!(quote.status, QuoteStatus::Finalized);
    // No second quote row for the pair.
    assert!(repo.find_active(&session_id, "pa").await.unwrap().is_some());
}

#[tokio::test]
async fn duplicate_resubmission_replays_the_current_view() {
    let (engine, _repo) = engine();
    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let session_id = started.session_id;

    let first = engine
        .submit_step(&session_id, 0, personal_details(35))
        .await
        .unwrap();
    let SubmitOutcome::Next(first_view) = first else {
        panic!("expected next view");
    };
    assert_eq!(first_view.step, 1);

    // Client retry of the same step: replayed, not re-advanced.
    let retry = engine
        .submit_step(&session_id, 0, personal_details(35))
        .await
        .unwrap();
    let SubmitOutcome::Next(retry_view) = retry else {
        panic!("expected replayed view");
    };
    assert_eq!(retry_view.step, 1);

    let state = engine.get_session_state(&session_id).await.unwrap();
    assert_eq!(state.current_step, Some(StepCursor::At(1)));
}

#[tokio::test]
async fn stale_step_index_is_a_conflict() {
    let (engine, _repo) = engine();
    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let result = engine
        .submit_step(&started.session_id, 3, StepData::new())
        .await;
    assert!(matches!(result, Err(FlowError::Conflict(_))));
}

#[tokio::test]
async fn rejection_never_mutates_state() {
    let (engine, _repo) = engine();
    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let session_id = started.session_id;

    let before = engine.get_session_state(&session_id).await.unwrap();
    let outcome = engine
        .submit_step(
            &session_id,
            0,
            payload(json!({"surname": "O", "date_of_birth": "not-a-date"})),
        )
        .await
        .unwrap();
    let SubmitOutcome::Rejected { field_errors } = outcome else {
        panic!("expected rejection");
    };
    assert!(field_errors.contains_key("surname"));
    assert!(field_errors.contains_key("date_of_birth"));
    assert!(field_errors.contains_key("mobile_number"));

    let after = engine.get_session_state(&session_id).await.unwrap();
    assert_eq!(after.current_step, before.current_step);
    assert_eq!(after.collected_keys, before.collected_keys);
}

#[tokio::test]
async fn retreat_preserves_later_data_and_reprices() {
    let (engine, _repo) = engine();
    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let session_id = started.session_id;
    advance_to_summary(&engine, &session_id, "10000000").await;

    // Edit the coverage step.
    let view = engine.retreat(&session_id, 2).await.unwrap();
    assert_eq!(view.step, 2);
    assert_eq!(view.prefill["coverage_amount"], json!("10000000"));

    let outcome = engine
        .submit_step(
            &session_id,
            2,
            payload(json!({"coverage_amount": "25000000", "policy_start_date": tomorrow()})),
        )
        .await
        .unwrap();
    let SubmitOutcome::Next(view) = outcome else {
        panic!("expected next view");
    };
    // Later-step data survives the edit: the beneficiary form is pre-filled
    // with what was entered before.
    assert_eq!(view.step, 3);
    assert_eq!(view.prefill["beneficiary_name"], json!("Akello"));

    let outcome = engine
        .submit_step(&session_id, 3, payload(json!({"beneficiary_name": "Akello"})))
        .await
        .unwrap();
    let SubmitOutcome::Next(summary) = outcome else {
        panic!("expected summary view");
    };
    let premium = summary.premium.expect("repriced quote");
    assert_eq!(premium.annual, dec!(37500.00));
    assert_eq!(premium.monthly, dec!(3125.00));
    assert_eq!(premium.tier_label.as_deref(), Some("Standard"));
}

#[tokio::test]
async fn retreat_to_current_or_later_step_is_a_conflict() {
    let (engine, _repo) = engine();
    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let session_id = started.session_id;
    engine
        .submit_step(&session_id, 0, personal_details(35))
        .await
        .unwrap();
    assert!(matches!(
        engine.retreat(&session_id, 1).await,
        Err(FlowError::Conflict(_))
    ));
    assert!(matches!(
        engine.retreat(&session_id, 4).await,
        Err(FlowError::Conflict(_))
    ));
}

#[tokio::test]
async fn autofill_defaults_later_steps_from_earlier_answers() {
    let (engine, _repo) = engine();
    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let session_id = started.session_id;
    engine
        .submit_step(&session_id, 0, personal_details(35))
        .await
        .unwrap();
    engine
        .submit_step(&session_id, 1, payload(json!({"had_policy": "no"})))
        .await
        .unwrap();
    let outcome = engine
        .submit_step(
            &session_id,
            2,
            payload(json!({"coverage_amount": "10000000", "policy_start_date": tomorrow()})),
        )
        .await
        .unwrap();
    let SubmitOutcome::Next(view) = outcome else {
        panic!("expected beneficiary view");
    };
    assert_eq!(view.step, 3);
    assert_eq!(view.prefill["beneficiary_name"], json!("Okello"));
}

#[tokio::test]
async fn draft_outlives_the_session() {
    let cache = Arc::new(InMemoryCache::new());
    let config = StoreConfig::new(Duration::from_millis(50), Duration::from_secs(60)).unwrap();
    let (engine, _repo) = engine_with(cache, config);

    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let session_id = started.session_id;
    engine
        .submit_step(&session_id, 0, personal_details(35))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;

    // The live session is gone...
    assert!(matches!(
        engine.get_session_state(&session_id).await,
        Err(FlowError::SessionNotFound(_))
    ));
    // ...but resume rebuilds it from the draft.
    let view = engine.resume(&session_id, "pa").await.unwrap();
    assert_eq!(view.step, 1);
    let state = engine.get_session_state(&session_id).await.unwrap();
    assert_eq!(state.collected_keys, vec!["personal_details".to_string()]);
}

#[tokio::test]
async fn cancel_abandons_the_quote_and_resets_the_session() {
    let (engine, repo) = engine();
    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let session_id = started.session_id;
    advance_to_summary(&engine, &session_id, "10000000").await;

    let quote_before = repo.find_active(&session_id, "pa").await.unwrap().unwrap();

    engine.cancel(&session_id, "pa").await.unwrap();

    assert!(matches!(
        engine.get_draft(&session_id, "pa").await,
        Err(FlowError::DraftNotFound(..))
    ));
    let state = engine.get_session_state(&session_id).await.unwrap();
    assert_eq!(state.mode, SessionMode::Conversational);
    assert!(state.current_flow.is_none());

    // Abandoned, never deleted.
    let quote = repo.get_quote(&quote_before.quote_id).await.unwrap().unwrap();
    assert_eq!(quote.status, QuoteStatus::Abandoned);
    assert!(repo.find_active(&session_id, "pa").await.unwrap().is_none());
}

/// Cache double whose writes fail on demand.
struct FlakyCache {
    inner: InMemoryCache,
    failures_left: AtomicUsize,
}

impl FlakyCache {
    fn new() -> Self {
        Self {
            inner: InMemoryCache::new(),
            failures_left: AtomicUsize::new(0),
        }
    }

    fn fail_next_writes(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Cache for FlakyCache {
    async fn get(&self, key: &str) -> quote_flow::Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> quote_flow::Result<()> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FlowError::Storage("cache write refused".to_string()));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> quote_flow::Result<()> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn storage_failure_fails_the_submission_and_a_retry_converges() {
    let cache = Arc::new(FlakyCache::new());
    let (engine, _repo) = engine_with(cache.clone(), StoreConfig::default());

    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let session_id = started.session_id;

    cache.fail_next_writes(1);
    let result = engine
        .submit_step(&session_id, 0, personal_details(35))
        .await;
    assert!(matches!(result, Err(FlowError::Storage(_))));

    // Nothing was silently lost: the session never advanced, and the same
    // submission succeeds once storage is back.
    let state = engine.get_session_state(&session_id).await.unwrap();
    assert_eq!(state.current_step, Some(StepCursor::At(0)));

    let outcome = engine
        .submit_step(&session_id, 0, personal_details(35))
        .await
        .unwrap();
    let SubmitOutcome::Next(view) = outcome else {
        panic!("retry must advance");
    };
    assert_eq!(view.step, 1);
}

#[tokio::test]
async fn racing_duplicate_submissions_advance_exactly_once() {
    let (engine, _repo) = engine();
    let engine = Arc::new(engine);
    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let session_id = started.session_id;

    let a = {
        let engine = engine.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move { engine.submit_step(&session_id, 0, personal_details(35)).await })
    };
    let b = {
        let engine = engine.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move { engine.submit_step(&session_id, 0, personal_details(35)).await })
    };

    let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
    for outcome in [a, b] {
        let SubmitOutcome::Next(view) = outcome else {
            panic!("both racers must see the advanced view");
        };
        assert_eq!(view.step, 1);
    }

    let state = engine.get_session_state(&session_id).await.unwrap();
    assert_eq!(state.current_step, Some(StepCursor::At(1)));
}

#[tokio::test]
async fn restarting_the_active_flow_keeps_collected_data() {
    let (engine, _repo) = engine();
    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let session_id = started.session_id;
    engine
        .submit_step(&session_id, 0, personal_details(35))
        .await
        .unwrap();

    let restarted = engine
        .start_flow("pa", "user-1", Some(session_id.clone()), None)
        .await
        .unwrap();
    assert_eq!(restarted.session_id, session_id);
    assert_eq!(restarted.view.step, 0);
    // Previously entered values come back as prefill.
    assert_eq!(restarted.view.prefill["surname"], json!("Okello"));
}

#[tokio::test]
async fn starting_a_second_flow_mid_journey_is_a_conflict() {
    let mut registry = FlowRegistry::new();
    registry.register(personal_accident_test_flow()).unwrap();
    let mut other = personal_accident_test_flow();
    other.flow_id = "travel".into();
    registry.register(other).unwrap();
    let engine = FlowEngine::new(
        Arc::new(registry),
        Arc::new(InMemoryCache::new()),
        Arc::new(InMemoryQuoteRepository::new()),
        StoreConfig::default(),
        PricingConfig::default(),
    );

    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let result = engine
        .start_flow("travel", "user-1", Some(started.session_id), None)
        .await;
    assert!(matches!(result, Err(FlowError::Conflict(_))));
}

#[tokio::test]
async fn start_flow_initial_data_becomes_editable_prefill() {
    let (engine, _repo) = engine();
    let started = engine
        .start_flow(
            "pa",
            "user-1",
            None,
            Some(payload(json!({"surname": "Nansubuga"}))),
        )
        .await
        .unwrap();
    assert_eq!(started.view.prefill["surname"], json!("Nansubuga"));

    // Prefill never enters collected data unvalidated.
    let state = engine
        .get_session_state(&started.session_id)
        .await
        .unwrap();
    assert!(state.collected_keys.is_empty());
}

#[tokio::test]
async fn resume_with_no_draft_is_not_found() {
    let (engine, _repo) = engine();
    assert!(matches!(
        engine.resume("missing-session", "pa").await,
        Err(FlowError::DraftNotFound(..))
    ));
}

#[tokio::test]
async fn delete_draft_removes_the_snapshot() {
    let (engine, _repo) = engine();
    let started = engine.start_flow("pa", "user-1", None, None).await.unwrap();
    let draft: FormDraft = engine.get_draft(&started.session_id, "pa").await.unwrap();
    assert_eq!(draft.step, StepCursor::At(0));
    engine.delete_draft(&started.session_id, "pa").await.unwrap();
    assert!(matches!(
        engine.get_draft(&started.session_id, "pa").await,
        Err(FlowError::DraftNotFound(..))
    ));
}
