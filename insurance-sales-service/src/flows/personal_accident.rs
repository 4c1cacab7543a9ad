//! Personal Accident quoting journey: personal details, next of kin,
//! underwriting questions, coverage selection, national ID upload, premium
//! summary, confirmation, then payment handoff.

use quote_flow::{
    BranchRule, CoverageTier, FieldKind, FieldOption, FieldSchema, FlowSchema, QuoteBinding,
    StepSchema, StepType,
};
use rust_decimal_macros::dec;
use serde_json::json;

pub const FLOW_ID: &str = "personal_accident";

fn text(min: usize, max: usize) -> FieldKind {
    FieldKind::Text {
        min_len: Some(min),
        max_len: Some(max),
    }
}

fn name_field(name: &str, label: &str) -> FieldSchema {
    FieldSchema::new(name, label, text(2, 50))
}

fn risky_activity_options() -> Vec<FieldOption> {
    vec![
        FieldOption::new("manufacture_wire_works", "Manufacture of wire works"),
        FieldOption::new("mining", "Mining / Quarrying"),
        FieldOption::new("explosives", "Handling explosives or flammable materials"),
        FieldOption::new("construction_heights", "Construction work at heights"),
        FieldOption::new("diving", "Underwater diving"),
        FieldOption::new("racing", "Motor or speed racing"),
        FieldOption::new("other_risky", "Other risky activity"),
    ]
}

pub fn flow() -> FlowSchema {
    FlowSchema {
        flow_id: FLOW_ID.into(),
        product_name: "Personal Accident".into(),
        steps: vec![
            StepSchema::new(
                0,
                "personal_details",
                "Personal details for Personal Accident cover",
                StepType::Form,
            )
            .field(name_field("surname", "Surname"))
            .field(name_field("first_name", "First Name"))
            .field(name_field("middle_name", "Middle Name").optional())
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
            .field(FieldSchema::new("email", "Email Address", FieldKind::Email))
            .field(
                FieldSchema::new("mobile_number", "Mobile Number", FieldKind::Tel)
                    .with_placeholder("07XX XXX XXX"),
            )
            .field(name_field("national_id_number", "National ID Number"))
            .field(name_field("nationality", "Nationality"))
            .field(name_field("occupation", "Occupation"))
            .field(FieldSchema::new(
                "gender",
                "Gender",
                FieldKind::Choice {
                    options: vec![
                        FieldOption::new("male", "Male"),
                        FieldOption::new("female", "Female"),
                        FieldOption::new("other", "Other"),
                    ],
                },
            ))
            .field(name_field("country_of_residence", "Country of Residence"))
            .field(FieldSchema::new(
                "physical_address",
                "Physical Address",
                text(2, 200),
            )),
            StepSchema::new(1, "next_of_kin", "Next of kin details", StepType::Form)
                .field(name_field("nok_first_name", "First Name"))
                .field(name_field("nok_last_name", "Last Name"))
                .field(name_field("nok_middle_name", "Middle Name").optional())
                .field(FieldSchema::new("nok_phone_number", "Phone Number", FieldKind::Tel))
                .field(name_field("nok_relationship", "Relationship"))
                .field(FieldSchema::new("nok_address", "Address", text(2, 200)))
                .field(name_field("nok_id_number", "ID Number").optional()),
            StepSchema::new(
                2,
                "previous_pa_policy",
                "Have you previously had a Personal Accident policy?",
                StepType::YesNoDetails,
            )
            .field(FieldSchema::new(
                "had_previous_pa_policy",
                "Previously held a PA policy",
                FieldKind::Choice {
                    options: vec![FieldOption::new("yes", "Yes"), FieldOption::new("no", "No")],
                },
            ))
            .field(name_field("previous_insurer_name", "Name of insurer"))
            .branch(BranchRule::new(
                "had_previous_pa_policy",
                json!("yes"),
                "previous_insurer_name",
            )),
            StepSchema::new(
                3,
                "physical_disability",
                "Are you free from any physical disability?",
                StepType::YesNoDetails,
            )
            .field(FieldSchema::new(
                "free_from_disability",
                "Free from physical disability",
                FieldKind::Choice {
                    options: vec![FieldOption::new("yes", "Yes"), FieldOption::new("no", "No")],
                },
            ))
            .field(FieldSchema::new(
                "disability_details",
                "Please give details",
                text(2, 500),
            ))
            .branch(BranchRule::new(
                "free_from_disability",
                json!("no"),
                "disability_details",
            )),
            StepSchema::new(
                4,
                "risky_activities",
                "Are you engaged in any of these activities?",
                StepType::Checkbox,
            )
            .field(
                FieldSchema::new(
                    "risky_activities",
                    "Risky activities",
                    FieldKind::MultiSelect {
                        options: risky_activity_options(),
                    },
                )
                .optional(),
            )
            .field(FieldSchema::new(
                "risky_activity_other",
                "Other (please specify)",
                text(2, 200),
            ))
            .branch(BranchRule::new(
                "risky_activities",
                json!("other_risky"),
                "risky_activity_other",
            )),
            StepSchema::new(5, "coverage_selection", "Choose your coverage", StepType::Form)
                .field(FieldSchema::new(
                    "coverage_amount",
                    "Coverage",
                    FieldKind::Choice {
                        options: vec![
                            FieldOption::new("10000000", "Basic – UGX 10,000,000"),
                            FieldOption::new("25000000", "Standard – UGX 25,000,000"),
                            FieldOption::new("50000000", "Premium – UGX 50,000,000"),
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
            StepSchema::new(
                6,
                "upload_national_id",
                "Upload your National ID (PDF)",
                StepType::FileUpload,
            )
            .field(FieldSchema::new(
                "national_id_file_ref",
                "National ID",
                FieldKind::FileRef {
                    accept: vec!["pdf".into()],
                },
            )),
            StepSchema::new(
                7,
                "premium_summary",
                "Your Personal Accident premium",
                StepType::PremiumSummary,
            ),
            StepSchema::new(
                8,
                "final_confirmation",
                "Confirm your application",
                StepType::FinalConfirmation,
            )
            .field(FieldSchema::new(
                "declaration_accepted",
                "I declare the information given is true and complete",
                FieldKind::Flag,
            )),
            StepSchema::new(
                9,
                "proceed_to_payment",
                "Proceed to payment",
                StepType::ProceedToPayment,
            ),
        ],
        quote_binding: QuoteBinding {
            coverage_step: "coverage_selection".into(),
            coverage_field: "coverage_amount".into(),
            dob_step: "personal_details".into(),
            dob_field: "date_of_birth".into(),
            as_of_step: Some("coverage_selection".into()),
            as_of_field: Some("policy_start_date".into()),
        },
        tiers: vec![
            CoverageTier {
                amount: dec!(10_000_000),
                label: "Basic".into(),
                benefits: vec![
                    "Accidental death – UGX 10,000,000".into(),
                    "Permanent total disability – UGX 10,000,000".into(),
                    "Medical expenses after an accident – up to UGX 1,000,000".into(),
                ],
            },
            CoverageTier {
                amount: dec!(25_000_000),
                label: "Standard".into(),
                benefits: vec![
                    "Accidental death – UGX 25,000,000".into(),
                    "Permanent total disability – UGX 25,000,000".into(),
                    "Medical expenses after an accident – up to UGX 2,500,000".into(),
                    "Hospital cash – UGX 50,000 per night".into(),
                ],
            },
            CoverageTier {
                amount: dec!(50_000_000),
                label: "Premium".into(),
                benefits: vec![
                    "Accidental death – UGX 50,000,000".into(),
                    "Permanent total disability – UGX 50,000,000".into(),
                    "Medical expenses after an accident – up to UGX 5,000,000".into(),
                    "Hospital cash – UGX 100,000 per night".into(),
                    "Funeral expenses – UGX 2,000,000".into(),
                ],
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_is_structurally_valid() {
        flow().validate().unwrap();
    }

    #[test]
    fn terminal_step_is_last() {
        let flow = flow();
        assert_eq!(flow.steps.last().unwrap().step_type, StepType::ProceedToPayment);
        assert_eq!(flow.steps_total(), 10);
    }

    #[test]
    fn every_tier_matches_a_coverage_option() {
        let flow = flow();
        let step = flow.step_by_name("coverage_selection").unwrap();
        let FieldKind::Choice { options } = &step.get_field("coverage_amount").unwrap().kind else {
            panic!("coverage_amount must be a choice");
        };
        for tier in &flow.tiers {
            assert!(
                options.iter().any(|o| o.id == tier.amount.to_string()),
                "tier {} has no option",
                tier.label
            );
        }
    }
}
