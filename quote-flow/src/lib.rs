pub mod engine;
pub mod error;
pub mod pricing;
pub mod quote;
pub mod repository;
pub mod schema;
pub mod session;
pub mod storage;
pub mod validator;

// Re-export commonly used types
pub use engine::{
    Completion, FlowEngine, PremiumView, SessionState, StartResult, StepView, SubmitOutcome,
};
pub use error::{FlowError, Result};
pub use pricing::{Premium, PremiumBreakdown, PricingConfig, age_years, price};
pub use quote::{Quote, QuoteManager, QuoteStatus};
pub use repository::{ChatMessage, InMemoryQuoteRepository, PostgresQuoteRepository, QuoteRepository};
pub use schema::{
    AutofillRule, BranchRule, CoverageTier, FieldKind, FieldOption, FieldSchema, FlowRegistry,
    FlowSchema, FlowSummary, QuoteBinding, StepSchema, StepType,
};
pub use session::{
    CollectedData, DraftStatus, FlowProgress, FormDraft, Session, SessionMode, StepCursor, StepData,
};
pub use storage::{Cache, DraftStore, InMemoryCache, SessionStore, StoreConfig};
pub use validator::{FieldErrors, normalize_phone_ug, validate_step};
