use chrono::{DateTime, Utc};
use serde::Serialize;
use zeroize::Zeroizing;

pub type AgentId = i64;

/// Credentials and endpoint of the decision provider an agent is bound to.
#[derive(Clone)]
pub struct ProviderBinding {
    pub provider_id: i64,
    pub api_url: String,
    pub api_key: Zeroizing<String>,
}

impl std::fmt::Debug for ProviderBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBinding")
            .field("provider_id", &self.provider_id)
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// One autonomous trading identity. Created by the CRUD layer; the core only
/// reads it.
#[derive(Debug, Clone, Serialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub model_name: String,
    #[serde(skip)]
    pub provider: ProviderBinding,
    pub initial_capital: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_binding_debug_hides_key() {
        let binding = ProviderBinding {
            provider_id: 1,
            api_url: "https://api.example.com".to_string(),
            api_key: Zeroizing::new("sk-secret".to_string()),
        };
        let rendered = format!("{:?}", binding);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
