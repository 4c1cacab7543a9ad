pub mod chat;
pub mod config;
pub mod flows;
pub mod models;
pub mod service;

pub use chat::{AnswerEngine, ProductCatalogAnswerer};
pub use config::ServiceConfig;
pub use service::{AppState, build_router};
