use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::linkedin::Visibility;
use crate::llm::Provider;

#[derive(Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub expires_in_secs: u64,
}

#[derive(Serialize)]
pub struct ProviderModels {
    pub provider: Provider,
    pub name: &'static str,
    pub models: &'static [&'static str],
    /// OpenRouter accepts any model id it routes to.
    pub custom_models: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PublishRequest {
    pub visibility: Option<Visibility>,
}
