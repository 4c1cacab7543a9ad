//! Full quoting journeys through the production flow definitions.

use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Utc};
use insurance_sales_service::flows;
use quote_flow::{
    FlowEngine, FlowError, InMemoryCache, InMemoryQuoteRepository, PricingConfig, QuoteRepository,
    QuoteStatus, StepData, StepType, StoreConfig, SubmitOutcome,
};
use rust_decimal_macros::dec;
use serde_json::json;

fn engine() -> (FlowEngine, Arc<InMemoryQuoteRepository>) {
    let registry = Arc::new(flows::build_registry().unwrap());
    let repo = Arc::new(InMemoryQuoteRepository::new());
    let engine = FlowEngine::new(
        registry,
        Arc::new(InMemoryCache::new()),
        repo.clone(),
        StoreConfig::default(),
        PricingConfig::default(),
    );
    (engine, repo)
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

fn pa_personal_details(age: i32) -> StepData {
    payload(json!({
        "surname": "Okello",
        "first_name": "Grace",
        "date_of_birth": dob_with_age(age),
        "email": "grace.okello@example.com",
        "mobile_number": "0772 123 456",
        "national_id_number": "CF123456789",
        "nationality": "Ugandan",
        "occupation": "Accountant",
        "gender": "female",
        "country_of_residence": "Uganda",
        "physical_address": "Plot 12, Kampala Road, Kampala"
    }))
}

fn pa_next_of_kin() -> StepData {
    payload(json!({
        "nok_first_name": "Peter",
        "nok_last_name": "Okello",
        "nok_phone_number": "0701234567",
        "nok_relationship": "Brother",
        "nok_address": "Plot 4, Gulu"
    }))
}

async fn expect_next(engine: &FlowEngine, session_id: &str, step: usize, body: StepData) -> quote_flow::StepView {
    match engine.submit_step(session_id, step, body).await.unwrap() {
        SubmitOutcome::Next(view) => view,
        other => panic!("step {step} did not advance: {other:?}"),
    }
}

#[tokio::test]
async fn personal_accident_journey_finalizes_a_priced_quote() {
    let (engine, repo) = engine();
    let started = engine
        .start_flow("personal_accident", "user-1", None, None)
        .await
        .unwrap();
    let session_id = started.session_id.clone();
    assert_eq!(started.view.steps_total, 10);

    expect_next(&engine, &session_id, 0, pa_personal_details(35)).await;
    expect_next(&engine, &session_id, 1, pa_next_of_kin()).await;
    expect_next(
        &engine,
        &session_id,
        2,
        payload(json!({"had_previous_pa_policy": "no"})),
    )
    .await;
    expect_next(
        &engine,
        &session_id,
        3,
        payload(json!({"free_from_disability": "yes"})),
    )
    .await;
    expect_next(&engine, &session_id, 4, StepData::new()).await;
    let upload_view = expect_next(
        &engine,
        &session_id,
        5,
        payload(json!({
            "coverage_amount": "10000000",
            "policy_start_date": tomorrow()
        })),
    )
    .await;
    assert_eq!(upload_view.step_type, StepType::FileUpload);

    let summary = expect_next(
        &engine,
        &session_id,
        6,
        payload(json!({"national_id_file_ref": "uploads/national-id.pdf"})),
    )
    .await;
    let premium = summary.premium.expect("summary must be priced");
    assert_eq!(premium.monthly, dec!(1250.00));
    assert_eq!(premium.annual, dec!(15000.00));
    assert!(!premium.age_loading_applied);
    assert_eq!(premium.tier_label.as_deref(), Some("Basic"));
    assert!(!premium.benefits.is_empty());

    expect_next(&engine, &session_id, 7, StepData::new()).await;
    expect_next(
        &engine,
        &session_id,
        8,
        payload(json!({"declaration_accepted": true})),
    )
    .await;

    let outcome = engine
        .submit_step(&session_id, 9, StepData::new())
        .await
        .unwrap();
    let SubmitOutcome::Complete(completion) = outcome else {
        panic!("terminal step must complete the flow");
    };
    assert_eq!(completion.next_flow, "payment");

    let quote = repo.get_quote(&completion.quote_id).await.unwrap().unwrap();
    assert_eq!(quote.status, QuoteStatus::Finalized);
    assert_eq!(quote.coverage_amount, dec!(10_000_000));
    assert_eq!(
        quote.underwriting_data["personal_details"]["surname"],
        json!("Okello")
    );
    // Phone numbers are stored in normalized international form.
    assert_eq!(
        quote.underwriting_data["personal_details"]["mobile_number"],
        json!("256772123456")
    );

    // The draft is gone once the quote is finalized.
    assert!(matches!(
        engine.get_draft(&session_id, "personal_accident").await,
        Err(FlowError::DraftNotFound(_, _))
    ));
}

#[tokio::test]
async fn declaration_must_be_accepted() {
    let (engine, _repo) = engine();
    let started = engine
        .start_flow("personal_accident", "user-2", None, None)
        .await
        .unwrap();
    let session_id = started.session_id.clone();

    expect_next(&engine, &session_id, 0, pa_personal_details(40)).await;
    expect_next(&engine, &session_id, 1, pa_next_of_kin()).await;
    expect_next(
        &engine,
        &session_id,
        2,
        payload(json!({"had_previous_pa_policy": "no"})),
    )
    .await;
    expect_next(
        &engine,
        &session_id,
        3,
        payload(json!({"free_from_disability": "yes"})),
    )
    .await;
    expect_next(&engine, &session_id, 4, StepData::new()).await;
    expect_next(
        &engine,
        &session_id,
        5,
        payload(json!({
            "coverage_amount": "25000000",
            "policy_start_date": tomorrow()
        })),
    )
    .await;
    expect_next(
        &engine,
        &session_id,
        6,
        payload(json!({"national_id_file_ref": "id.pdf"})),
    )
    .await;
    expect_next(&engine, &session_id, 7, StepData::new()).await;

    let outcome = engine
        .submit_step(
            &session_id,
            8,
            payload(json!({"declaration_accepted": false})),
        )
        .await
        .unwrap();
    let SubmitOutcome::Rejected { field_errors } = outcome else {
        panic!("unaccepted declaration must be rejected");
    };
    assert!(field_errors.contains_key("declaration_accepted"));
}

#[tokio::test]
async fn previous_insurer_is_required_when_answer_is_yes() {
    let (engine, _repo) = engine();
    let started = engine
        .start_flow("personal_accident", "user-3", None, None)
        .await
        .unwrap();
    let session_id = started.session_id.clone();

    expect_next(&engine, &session_id, 0, pa_personal_details(30)).await;
    expect_next(&engine, &session_id, 1, pa_next_of_kin()).await;

    let outcome = engine
        .submit_step(
            &session_id,
            2,
            payload(json!({"had_previous_pa_policy": "yes"})),
        )
        .await
        .unwrap();
    let SubmitOutcome::Rejected { field_errors } = outcome else {
        panic!("revealed field must be required");
    };
    assert!(field_errors.contains_key("previous_insurer_name"));

    expect_next(
        &engine,
        &session_id,
        2,
        payload(json!({
            "had_previous_pa_policy": "yes",
            "previous_insurer_name": "Jubilee Insurance"
        })),
    )
    .await;
}

#[tokio::test]
async fn travel_journey_autofills_traveller_details_and_prices_the_plan() {
    let (engine, _repo) = engine();
    let started = engine
        .start_flow("travel_insurance", "user-4", None, None)
        .await
        .unwrap();
    let session_id = started.session_id.clone();
    assert_eq!(started.view.steps_total, 9);

    expect_next(
        &engine,
        &session_id,
        0,
        payload(json!({"coverage_amount": "100000000"})),
    )
    .await;
    expect_next(
        &engine,
        &session_id,
        1,
        payload(json!({
            "first_name": "Daniel",
            "surname": "Mugisha",
            "phone_number": "0712345678",
            "email": "daniel.mugisha@example.com"
        })),
    )
    .await;
    expect_next(
        &engine,
        &session_id,
        2,
        payload(json!({
            "travel_party": "myself_only",
            "num_travellers_18_69": 1,
            "departure_country": "Uganda",
            "destination_country": "Portugal",
            "departure_date": tomorrow(),
            "return_date": tomorrow()
        })),
    )
    .await;

    // Traveller details come prefilled from "about you".
    let traveller_view = expect_next(
        &engine,
        &session_id,
        3,
        payload(json!({
            "terms_and_conditions_agreed": true,
            "consent_data_outside_uganda": true
        })),
    )
    .await;
    assert_eq!(traveller_view.name, "traveller_details");
    assert_eq!(traveller_view.prefill["first_name"], json!("Daniel"));
    assert_eq!(traveller_view.prefill["surname"], json!("Mugisha"));
    assert_eq!(traveller_view.prefill["phone_number"], json!("256712345678"));

    expect_next(
        &engine,
        &session_id,
        4,
        payload(json!({
            "first_name": "Daniel",
            "surname": "Mugisha",
            "nationality_type": "ugandan",
            "passport_number": "B1234567",
            "date_of_birth": dob_with_age(30),
            "occupation": "Engineer",
            "phone_number": "0712345678",
            "email": "daniel.mugisha@example.com",
            "postal_address": "PO Box 100, Kampala",
            "town_city": "Kampala"
        })),
    )
    .await;
    expect_next(
        &engine,
        &session_id,
        5,
        payload(json!({
            "ec_first_name": "Janet",
            "ec_surname": "Mugisha",
            "ec_phone_number": "0751234567",
            "ec_relationship": "spouse"
        })),
    )
    .await;

    let summary = expect_next(
        &engine,
        &session_id,
        6,
        payload(json!({"passport_file_ref": "uploads/passport.jpg"})),
    )
    .await;
    let premium = summary.premium.expect("summary must be priced");
    assert_eq!(premium.annual, dec!(150000.00));
    assert_eq!(premium.monthly, dec!(12500.00));
    assert_eq!(premium.tier_label.as_deref(), Some("Schengen Essential"));

    expect_next(&engine, &session_id, 7, StepData::new()).await;
    let outcome = engine
        .submit_step(&session_id, 8, StepData::new())
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Complete(_)));
}

#[tokio::test]
async fn required_consents_cannot_be_skipped() {
    let (engine, _repo) = engine();
    let started = engine
        .start_flow("travel_insurance", "user-5", None, None)
        .await
        .unwrap();
    let session_id = started.session_id.clone();

    expect_next(
        &engine,
        &session_id,
        0,
        payload(json!({"coverage_amount": "150000000"})),
    )
    .await;
    expect_next(
        &engine,
        &session_id,
        1,
        payload(json!({
            "first_name": "Daniel",
            "surname": "Mugisha",
            "phone_number": "0712345678",
            "email": "daniel.mugisha@example.com"
        })),
    )
    .await;
    expect_next(
        &engine,
        &session_id,
        2,
        payload(json!({
            "travel_party": "myself_only",
            "num_travellers_18_69": 1,
            "departure_country": "Uganda",
            "destination_country": "Japan",
            "departure_date": tomorrow(),
            "return_date": tomorrow()
        })),
    )
    .await;

    let outcome = engine
        .submit_step(
            &session_id,
            3,
            payload(json!({"terms_and_conditions_agreed": true})),
        )
        .await
        .unwrap();
    let SubmitOutcome::Rejected { field_errors } = outcome else {
        panic!("missing consent must be rejected");
    };
    assert!(field_errors.contains_key("consent_data_outside_uganda"));
    // Optional marketing consent is genuinely optional.
    assert!(!field_errors.contains_key("consent_marketing"));
}
