//! Travel Insurance quoting journey: plan selection, about you, trip details,
//! data consents, traveller details (autofilled from "about you"), emergency
//! contact, passport upload, premium summary, then payment handoff.

use quote_flow::{
    AutofillRule, CoverageTier, FieldKind, FieldOption, FieldSchema, FlowSchema, QuoteBinding,
    StepSchema, StepType,
};
use rust_decimal_macros::dec;

pub const FLOW_ID: &str = "travel_insurance";

fn text(min: usize, max: usize) -> FieldKind {
    FieldKind::Text {
        min_len: Some(min),
        max_len: Some(max),
    }
}

fn name_field(name: &str, label: &str) -> FieldSchema {
    FieldSchema::new(name, label, text(2, 50))
}

fn traveller_count(name: &str, label: &str) -> FieldSchema {
    FieldSchema::new(
        name,
        label,
        FieldKind::Number {
            min: Some(dec!(0)),
            max: Some(dec!(20)),
        },
    )
    .optional()
}

fn relationship_options() -> Vec<FieldOption> {
    [
        "Spouse",
        "Parent",
        "Child",
        "Sibling",
        "Sister-in-law",
        "Brother-in-law",
        "Friend",
        "Other",
    ]
    .iter()
    .map(|label| FieldOption::new(label.to_lowercase().replace(' ', "_"), *label))
    .collect()
}

pub fn flow() -> FlowSchema {
    FlowSchema {
        flow_id: FLOW_ID.into(),
        product_name: "Travel Insurance".into(),
        steps: vec![
            StepSchema::new(
                0,
                "plan_selection",
                "Select your travel insurance cover",
                StepType::Form,
            )
            .field(FieldSchema::new(
                "coverage_amount",
                "Travel plan",
                FieldKind::Choice {
                    options: vec![
                        FieldOption::new("100000000", "Schengen Essential"),
                        FieldOption::new("150000000", "Worldwide Essential"),
                        FieldOption::new("300000000", "Worldwide Elite"),
                    ],
                },
            )),
            StepSchema::new(1, "about_you", "About you", StepType::Form)
                .field(name_field("first_name", "First Name"))
                .field(name_field("middle_name", "Middle Name").optional())
                .field(name_field("surname", "Surname"))
                .field(
                    FieldSchema::new("phone_number", "Phone Number", FieldKind::Tel)
                        .with_placeholder("07XX XXX XXX"),
                )
                .field(FieldSchema::new("email", "Email", FieldKind::Email)),
            StepSchema::new(2, "trip_details", "Travel details", StepType::Form)
                .field(FieldSchema::new(
                    "travel_party",
                    "Travel party",
                    FieldKind::Choice {
                        options: vec![
                            FieldOption::new("myself_only", "Myself only"),
                            FieldOption::new("myself_and_someone_else", "Myself and someone else"),
                            FieldOption::new("group", "Group"),
                        ],
                    },
                ))
                .field(
                    FieldSchema::new(
                        "num_travellers_18_69",
                        "Number of travellers (18–69 years)",
                        FieldKind::Number {
                            min: Some(dec!(1)),
                            max: Some(dec!(20)),
                        },
                    ),
                )
                .field(traveller_count("num_travellers_0_17", "Number of travellers (0–17 years)"))
                .field(traveller_count(
                    "num_travellers_70_75",
                    "Number of travellers (70–75 years)",
                ))
                .field(
                    FieldSchema::new("departure_country", "Departure Country", text(2, 60))
                        .with_placeholder("e.g. Uganda"),
                )
                .field(
                    FieldSchema::new("destination_country", "Destination Country", text(2, 60))
                        .with_placeholder("e.g. Portugal"),
                )
                .field(FieldSchema::new(
                    "departure_date",
                    "Departure Date",
                    FieldKind::Date {
                        not_future: false,
                        min_days_ahead: Some(1),
                        age_min: None,
                        age_max: None,
                    },
                ))
                .field(FieldSchema::new(
                    "return_date",
                    "Return Date",
                    FieldKind::Date {
                        not_future: false,
                        min_days_ahead: Some(1),
                        age_min: None,
                        age_max: None,
                    },
                )),
            StepSchema::new(3, "data_consent", "Before we begin – Data consent", StepType::Checkbox)
                .field(FieldSchema::new(
                    "terms_and_conditions_agreed",
                    "I have read and understand the Terms and Conditions",
                    FieldKind::Flag,
                ))
                .field(FieldSchema::new(
                    "consent_data_outside_uganda",
                    "I consent to processing of my personal data outside Uganda",
                    FieldKind::Flag,
                ))
                .field(
                    FieldSchema::new(
                        "consent_child_data",
                        "I consent to processing of my child's personal data",
                        FieldKind::Flag,
                    )
                    .optional(),
                )
                .field(
                    FieldSchema::new(
                        "consent_marketing",
                        "I consent to receive information about products and offers",
                        FieldKind::Flag,
                    )
                    .optional(),
                ),
            StepSchema::new(4, "traveller_details", "Traveller details", StepType::Form)
                .field(name_field("first_name", "First Name"))
                .field(name_field("middle_name", "Middle Name").optional())
                .field(name_field("surname", "Surname"))
                .field(FieldSchema::new(
                    "nationality_type",
                    "Nationality Type",
                    FieldKind::Choice {
                        options: vec![
                            FieldOption::new("ugandan", "Ugandan"),
                            FieldOption::new("non_ugandan", "Non-Ugandan"),
                        ],
                    },
                ))
                .field(name_field("passport_number", "Passport Number"))
                .field(FieldSchema::new(
                    "date_of_birth",
                    "Date of Birth",
                    FieldKind::Date {
                        not_future: true,
                        min_days_ahead: None,
                        age_min: Some(0),
                        age_max: Some(85),
                    },
                ))
                .field(name_field("occupation", "Profession/Occupation"))
                .field(FieldSchema::new("phone_number", "Phone Number", FieldKind::Tel))
                .field(FieldSchema::new("email", "Email Address", FieldKind::Email))
                .field(FieldSchema::new("postal_address", "Postal/Home Address", text(2, 200)))
                .field(name_field("town_city", "Town/City"))
                .autofill(AutofillRule::new("about_you", "first_name", "first_name"))
                .autofill(AutofillRule::new("about_you", "middle_name", "middle_name"))
                .autofill(AutofillRule::new("about_you", "surname", "surname"))
                .autofill(AutofillRule::new("about_you", "phone_number", "phone_number"))
                .autofill(AutofillRule::new("about_you", "email", "email")),
            StepSchema::new(5, "emergency_contact", "Emergency contact", StepType::Form)
                .field(name_field("ec_first_name", "First Name"))
                .field(name_field("ec_surname", "Surname"))
                .field(FieldSchema::new("ec_phone_number", "Phone Number", FieldKind::Tel))
                .field(FieldSchema::new(
                    "ec_relationship",
                    "Relationship",
                    FieldKind::Choice {
                        options: relationship_options(),
                    },
                )),
            StepSchema::new(
                6,
                "upload_passport",
                "Upload your passport (PDF or JPEG)",
                StepType::FileUpload,
            )
            .field(FieldSchema::new(
                "passport_file_ref",
                "Passport",
                FieldKind::FileRef {
                    accept: vec!["pdf".into(), "jpeg".into(), "jpg".into()],
                },
            )),
            StepSchema::new(
                7,
                "premium_summary",
                "Your travel insurance premium",
                StepType::PremiumSummary,
            ),
            StepSchema::new(
                8,
                "proceed_to_payment",
                "Proceed to payment",
                StepType::ProceedToPayment,
            ),
        ],
        quote_binding: QuoteBinding {
            coverage_step: "plan_selection".into(),
            coverage_field: "coverage_amount".into(),
            dob_step: "traveller_details".into(),
            dob_field: "date_of_birth".into(),
            as_of_step: Some("trip_details".into()),
            as_of_field: Some("departure_date".into()),
        },
        tiers: vec![
            CoverageTier {
                amount: dec!(100_000_000),
                label: "Schengen Essential".into(),
                benefits: vec![
                    "Emergency medical expenses – up to $30,000".into(),
                    "Emergency medical evacuation and repatriation – actual expenses".into(),
                    "Replacement of passport and driving license – up to $300".into(),
                ],
            },
            CoverageTier {
                amount: dec!(150_000_000),
                label: "Worldwide Essential".into(),
                benefits: vec![
                    "Emergency medical expenses (including epidemics) – up to $40,000".into(),
                    "Compulsory quarantine expenses – $85 per night up to 14 nights".into(),
                    "Emergency medical evacuation and repatriation – actual expenses".into(),
                    "Emergency dental care – up to $250".into(),
                    "Baggage delay – $50 per hour up to $250".into(),
                ],
            },
            CoverageTier {
                amount: dec!(300_000_000),
                label: "Worldwide Elite".into(),
                benefits: vec![
                    "Emergency medical expenses (including epidemics) – up to $100,000".into(),
                    "Compulsory quarantine expenses – $100 per night up to 14 nights".into(),
                    "Emergency medical evacuation and repatriation – actual expenses".into(),
                    "Emergency dental care – up to $500".into(),
                    "Optical expenses – up to $100".into(),
                    "Baggage delay – $50 per hour up to $500".into(),
                    "Personal liability – up to $100,000".into(),
                ],
            },
        ],
    }
}
