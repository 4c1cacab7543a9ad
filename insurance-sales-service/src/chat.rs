//! Conversational mode: an opaque answer-generation seam plus a
//! deterministic product-catalog fallback used when no retrieval engine is
//! wired in.

use async_trait::async_trait;
use quote_flow::{ChatMessage, FlowSummary};

/// Opaque answer generation for free-chat mode. A retrieval-augmented
/// engine can slot in behind this trait; the flow engine never depends on it.
#[async_trait]
pub trait AnswerEngine: Send + Sync {
    async fn answer(&self, query: &str, prior_turns: &[ChatMessage]) -> anyhow::Result<String>;
}

/// Deterministic fallback answerer grounded in the flow catalog.
pub struct ProductCatalogAnswerer {
    products: Vec<FlowSummary>,
}

impl ProductCatalogAnswerer {
    pub fn new(products: Vec<FlowSummary>) -> Self {
        Self { products }
    }

    fn catalog_line(&self) -> String {
        let names: Vec<&str> = self
            .products
            .iter()
            .map(|p| p.product_name.as_str())
            .collect();
        names.join(", ")
    }
}

#[async_trait]
impl AnswerEngine for ProductCatalogAnswerer {
    async fn answer(&self, query: &str, _prior_turns: &[ChatMessage]) -> anyhow::Result<String> {
        let lower = query.to_lowercase();
        let matched = self
            .products
            .iter()
            .find(|p| lower.contains(&p.product_name.to_lowercase()));
        Ok(match matched {
            Some(product) => format!(
                "{} is one of our covers. I can walk you through a quote in a few quick steps \
                 – just start the {} journey when you're ready.",
                product.product_name, product.product_name
            ),
            None => format!(
                "I can help you with our insurance products: {}. Ask about any of them, or \
                 start a guided quote.",
                self.catalog_line()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answerer() -> ProductCatalogAnswerer {
        ProductCatalogAnswerer::new(vec![
            FlowSummary {
                flow_id: "personal_accident".into(),
                product_name: "Personal Accident".into(),
                steps_total: 10,
            },
            FlowSummary {
                flow_id: "travel_insurance".into(),
                product_name: "Travel Insurance".into(),
                steps_total: 9,
            },
        ])
    }

    #[tokio::test]
    async fn mentions_the_matched_product() {
        let reply = answerer()
            .answer("how much is personal accident cover?", &[])
            .await
            .unwrap();
        assert!(reply.contains("Personal Accident"));
    }

    #[tokio::test]
    async fn falls_back_to_the_catalog() {
        let reply = answerer().answer("what do you sell?", &[]).await.unwrap();
        assert!(reply.contains("Personal Accident"));
        assert!(reply.contains("Travel Insurance"));
    }
}
