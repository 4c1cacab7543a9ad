use quote_flow::StepData;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct StartFlowRequest {
    pub user_id: String,
    pub session_id: Option<String>,
    pub initial_data: Option<StepData>,
}

#[derive(Debug, Deserialize)]
pub struct RetreatRequest {
    pub target_step: usize,
}

#[derive(Debug, Deserialize)]
pub struct FlowRef {
    pub flow_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub mode: quote_flow::SessionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    /// Set instead of `reply` when the session is mid-flow: the client
    /// should render the pending step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<quote_flow::StepView>,
}
