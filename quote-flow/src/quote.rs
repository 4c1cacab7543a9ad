use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FlowError, Result};
use crate::pricing::Premium;
use crate::repository::QuoteRepository;
use crate::session::CollectedData;

/// Lifecycle status of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Draft,
    Finalized,
    Abandoned,
}

/// Durable business record for one priced policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub quote_id: String,
    pub session_id: String,
    pub flow_id: String,
    pub user_id: String,
    pub coverage_amount: Decimal,
    pub premium: Premium,
    pub underwriting_data: CollectedData,
    pub status: QuoteStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Enforces the quote lifecycle on top of the repository: at most one
/// non-abandoned quote per (session, flow), idempotent finalization,
/// abandon-never-delete.
#[derive(Clone)]
pub struct QuoteManager {
    repository: Arc<dyn QuoteRepository>,
}

impl QuoteManager {
    pub fn new(repository: Arc<dyn QuoteRepository>) -> Self {
        Self { repository }
    }

    pub async fn get(&self, quote_id: &str) -> Result<Quote> {
        self.repository
            .get_quote(quote_id)
            .await?
            .ok_or_else(|| FlowError::QuoteNotFound(quote_id.to_string()))
    }

    /// Create or refresh the draft quote for a (session, flow).
    ///
    /// If the active quote is already finalized this is a no-op returning the
    /// finalized record unchanged, which is how a racing duplicate of the
    /// terminal step resolves.
    pub async fn upsert_draft(
        &self,
        session_id: &str,
        flow_id: &str,
        user_id: &str,
        coverage_amount: Decimal,
        premium: Premium,
        underwriting_data: CollectedData,
    ) -> Result<Quote> {
        let existing = self.repository.find_active(session_id, flow_id).await?;
        let quote = match existing {
            Some(quote) if quote.status == QuoteStatus::Finalized => {
                debug!(quote_id = %quote.quote_id, "quote already finalized, skipping draft update");
                return Ok(quote);
            }
            Some(mut quote) => {
                quote.coverage_amount = coverage_amount;
                quote.premium = premium;
                quote.underwriting_data = underwriting_data;
                quote.updated_at = Utc::now();
                quote
            }
            None => {
                let now = Utc::now();
                let quote = Quote {
                    quote_id: Uuid::new_v4().to_string(),
                    session_id: session_id.to_string(),
                    flow_id: flow_id.to_string(),
                    user_id: user_id.to_string(),
                    coverage_amount,
                    premium,
                    underwriting_data,
                    status: QuoteStatus::Draft,
                    created_at: now,
                    updated_at: now,
                };
                info!(quote_id = %quote.quote_id, %session_id, %flow_id, "creating draft quote");
                quote
            }
        };
        self.repository.upsert_quote(quote).await
    }

    /// Transition a quote to finalized. Re-finalizing returns the existing
    /// finalized record unchanged; finalizing an abandoned quote is a
    /// conflict.
    pub async fn finalize(&self, quote_id: &str) -> Result<Quote> {
        let mut quote = self.get(quote_id).await?;
        match quote.status {
            QuoteStatus::Finalized => {
                debug!(%quote_id, "finalize replay, returning existing record");
                Ok(quote)
            }
            QuoteStatus::Abandoned => Err(FlowError::Conflict(format!(
                "quote {quote_id} was abandoned and cannot be finalized"
            ))),
            QuoteStatus::Draft => {
                quote.status = QuoteStatus::Finalized;
                quote.updated_at = Utc::now();
                info!(%quote_id, "finalizing quote");
                self.repository.upsert_quote(quote).await
            }
        }
    }

    /// Abandon the active draft quote for a (session, flow), if any.
    /// Finalized quotes are immutable business records and stay finalized.
    pub async fn abandon_active(&self, session_id: &str, flow_id: &str) -> Result<Option<Quote>> {
        match self.repository.find_active(session_id, flow_id).await? {
            Some(mut quote) if quote.status == QuoteStatus::Draft => {
                quote.status = QuoteStatus::Abandoned;
                quote.updated_at = Utc::now();
                info!(quote_id = %quote.quote_id, %session_id, %flow_id, "abandoning draft quote");
                Ok(Some(self.repository.upsert_quote(quote).await?))
            }
            Some(quote) => {
                warn!(quote_id = %quote.quote_id, status = ?quote.status, "cancel leaves non-draft quote untouched");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
