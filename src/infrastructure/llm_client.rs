//! OpenAI-compatible chat completion client used as an agent's decision function

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, error};
use zeroize::Zeroizing;

use crate::domain::entities::agent::Agent;
use crate::domain::errors::DecisionError;
use crate::domain::repositories::decision_maker::{
    DecisionExchange, DecisionMaker, DecisionRequest,
};
use crate::domain::value_objects::leverage::{MAX_LEVERAGE, MIN_LEVERAGE};

const SYSTEM_PROMPT: &str =
    "You are a professional cryptocurrency trader. Output JSON format only.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: Zeroizing<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(
        api_url: &str,
        api_key: Zeroizing<String>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, DecisionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DecisionError::Request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(api_url),
            api_key,
            model: model.to_string(),
            temperature: 0.7,
            max_tokens: 2000,
        })
    }

    pub fn for_agent(agent: &Agent, timeout: Duration) -> Result<Self, DecisionError> {
        Self::new(
            &agent.provider.api_url,
            agent.provider.api_key.clone(),
            &agent.model_name,
            timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn complete(&self, prompt: &str) -> Result<String, DecisionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(model = %self.model, error = %e, "Decision request failed");
                DecisionError::Request(format!("Connection to {} failed: {}", self.base_url, e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(model = %self.model, %status, "Decision provider returned an error");
            return Err(DecisionError::Request(format!(
                "API error: {} - {}",
                status, error_text
            )));
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| DecisionError::Malformed(format!("Unreadable completion: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| DecisionError::Malformed("Completion has no content".to_string()))
    }
}

#[async_trait]
impl DecisionMaker for LlmClient {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionExchange, DecisionError> {
        let prompt = build_prompt(request);
        debug!(model = %self.model, prompt_len = prompt.len(), "Requesting decision");
        let response = self.complete(&prompt).await?;
        Ok(DecisionExchange { prompt, response })
    }
}

/// Ensures the base URL ends in `/v1`, dropping anything after an existing `/v1`.
pub fn normalize_base_url(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        return trimmed.to_string();
    }
    match trimmed.find("/v1") {
        Some(index) => format!("{}/v1", &trimmed[..index]),
        None => format!("{}/v1", trimmed),
    }
}

pub fn build_prompt(request: &DecisionRequest) -> String {
    let mut prompt = String::from(
        "You are a professional cryptocurrency trader. Analyze the market and make trading decisions.\n\nMARKET DATA:\n",
    );

    for state in &request.market {
        let quote = &state.quote;
        let _ = writeln!(
            prompt,
            "{}: ${:.2} ({:+.2}%)",
            quote.instrument, quote.price, quote.change_24h
        );
        if let Some(indicators) = &state.indicators {
            let _ = writeln!(
                prompt,
                "  SMA7: ${:.2}, SMA14: ${:.2}, RSI: {:.1}, 7d: {:+.2}%",
                indicators.sma_7, indicators.sma_14, indicators.rsi_14, indicators.price_change_7d
            );
        }
    }

    let portfolio = &request.portfolio;
    let _ = write!(
        prompt,
        "\nACCOUNT STATUS:\n\
         - Time: {}\n\
         - Initial Capital: ${:.2}\n\
         - Total Value: ${:.2}\n\
         - Cash: ${:.2}\n\
         - Total Return: {:.2}%\n\
         \nCURRENT POSITIONS:\n",
        request.account.current_time.to_rfc3339(),
        request.account.initial_capital,
        portfolio.total_value,
        portfolio.cash,
        request.account.total_return_pct,
    );

    if portfolio.positions.is_empty() {
        prompt.push_str("None\n");
    }
    for view in &portfolio.positions {
        let position = &view.position;
        let _ = writeln!(
            prompt,
            "- {} {}: {:.4} @ ${:.2} ({}x)",
            position.instrument, position.side, position.quantity, position.avg_price, position.leverage
        );
    }

    let _ = write!(
        prompt,
        r#"
TRADING RULES:
1. Signals: buy_to_enter (long), sell_to_enter (short), close_position, hold
2. Risk Management:
   - Max 3 positions
   - Risk 1-5% per trade
   - Use appropriate leverage ({}-{}x)
3. Position Sizing:
   - Conservative: 1-2% risk
   - Moderate: 2-4% risk
   - Aggressive: 4-5% risk
4. Exit Strategy:
   - Close losing positions quickly
   - Let winners run
   - Use technical indicators

OUTPUT FORMAT (JSON only):
```json
{{
  "COIN": {{
    "signal": "buy_to_enter|sell_to_enter|hold|close_position",
    "quantity": 0.5,
    "leverage": 10,
    "profit_target": 45000.0,
    "stop_loss": 42000.0,
    "confidence": 0.75,
    "justification": "Brief reason"
  }}
}}
```

Analyze and output JSON only.
"#,
        MIN_LEVERAGE, MAX_LEVERAGE
    );

    prompt
}
