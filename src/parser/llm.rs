//! An optional [TransactionParser] backed by a hosted LLM.
//!
//! The model is asked for the same JSON shape the heuristic produces, so the
//! two parsers are interchangeable behind the trait. Rate limits are retried
//! with bounded exponential backoff, sequentially for a single input; quota
//! exhaustion is surfaced immediately so the operator checks billing instead
//! of waiting; output that is not decodable JSON is surfaced together with the
//! raw text, never silently defaulted.

use std::{env, future::Future, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    Error,
    parser::{ParsedTransaction, TransactionParser},
    transaction::{Category, TransactionType},
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// The outcome of one call to the model provider.
///
/// Modeling the outcome explicitly keeps the retry driver a plain loop over
/// this type rather than control flow smuggled through error interception.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The provider answered; the payload is the model's text output.
    Ok(String),
    /// The provider rate-limited the request. Retryable.
    RateLimited {
        /// The delay the provider asked for, when it said.
        retry_after: Option<Duration>,
    },
    /// The provider reported quota exhaustion. Not retryable.
    QuotaExhausted,
    /// Any other failure, with detail for the server logs.
    Other(String),
}

/// Drive `call` until it succeeds or the retry budget is spent.
///
/// Only [CallOutcome::RateLimited] is retried, sleeping `base_delay * 2^attempt`
/// between attempts (or the provider-supplied delay when present). Attempts are
/// strictly sequential; a single input never fans out concurrently.
pub async fn call_with_backoff<F, Fut>(
    mut call: F,
    max_retries: u32,
    base_delay: Duration,
) -> Result<String, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CallOutcome>,
{
    for attempt in 0..=max_retries {
        match call().await {
            CallOutcome::Ok(text) => return Ok(text),
            CallOutcome::RateLimited { retry_after } if attempt < max_retries => {
                let delay = retry_after.unwrap_or_else(|| base_delay * 2u32.pow(attempt));
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "model provider rate-limited the request, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            CallOutcome::RateLimited { .. } => return Err(Error::RateLimited),
            CallOutcome::QuotaExhausted => return Err(Error::QuotaExhausted),
            CallOutcome::Other(detail) => return Err(Error::LlmError(detail)),
        }
    }

    Err(Error::RateLimited)
}

/// A [TransactionParser] that asks a hosted chat-completions model to extract
/// the fields.
#[derive(Debug, Clone)]
pub struct LlmParser {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
    base_delay: Duration,
}

impl LlmParser {
    /// Build a parser from the environment.
    ///
    /// `LLM_API_KEY` is required; `LLM_BASE_URL`, `LLM_MODEL` and
    /// `LLM_TIMEOUT_SECS` override the defaults.
    ///
    /// # Errors
    /// Returns an error when the API key is missing or the HTTP client cannot
    /// be built.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = env::var("LLM_API_KEY")
            .map_err(|_| Error::LlmError("the environment variable LLM_API_KEY must be set".to_owned()))?;
        let base_url = env::var("LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let model = env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_owned());
        let timeout_secs = env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|error| Error::LlmError(error.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        })
    }

    /// The fixed instruction prompt sent for every input.
    fn prompt(text: &str) -> String {
        format!(
            "Parse the following transaction text into JSON with fields: \
             amount (number), category (string), description (string), \
             type ('income' or 'expense'), confidence (number between 0 and 1). \
             If any field is missing or unclear, return null for that field.\n\n\
             Text: \"{text}\"\n\nOutput JSON:"
        )
    }

    /// Make one chat-completions request and classify the result.
    async fn call_model(&self, prompt: &str) -> CallOutcome {
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let request = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = match self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => return CallOutcome::Other(format!("request failed: {error}")),
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs);

        let text = match response.text().await {
            Ok(text) => text,
            Err(error) => return CallOutcome::Other(format!("could not read response body: {error}")),
        };

        if !status.is_success() {
            let code = serde_json::from_str::<ProviderErrorBody>(&text)
                .ok()
                .and_then(|body| body.error.code);

            return match code.as_deref() {
                Some("insufficient_quota") => CallOutcome::QuotaExhausted,
                Some("rate_limit_exceeded") => CallOutcome::RateLimited { retry_after },
                _ if status == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    CallOutcome::RateLimited { retry_after }
                }
                _ => CallOutcome::Other(format!("status={status}: {text}")),
            };
        }

        match serde_json::from_str::<CompletionResponse>(&text) {
            Ok(completion) => match completion.choices.into_iter().next() {
                Some(choice) => CallOutcome::Ok(choice.message.content),
                None => CallOutcome::Other("response contained no choices".to_owned()),
            },
            Err(error) => CallOutcome::Other(format!("could not decode response: {error}")),
        }
    }
}

#[async_trait]
impl TransactionParser for LlmParser {
    async fn parse(&self, text: &str) -> Result<ParsedTransaction, Error> {
        let prompt = Self::prompt(text);
        let output = call_with_backoff(
            || self.call_model(&prompt),
            self.max_retries,
            self.base_delay,
        )
        .await?;

        decode_candidate(&output)
    }
}

// ============================================================================
// OUTPUT DECODING
// ============================================================================

/// Strip Markdown code fences (```json ... ``` or ``` ... ```) from `text`,
/// falling back to the span between the first `{` and the last `}`.
pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

/// The fields as the model reports them; null means "missing or unclear".
#[derive(Debug, Deserialize)]
struct RawCandidate {
    amount: Option<f64>,
    category: Option<String>,
    description: Option<String>,
    #[serde(rename = "type")]
    transaction_type: Option<TransactionType>,
    confidence: Option<f64>,
}

/// Decode the model's text output into a candidate.
///
/// Null or unknown fields degrade to the same defaults the heuristic uses;
/// output that is not JSON at all surfaces as [Error::ParseFailure] carrying
/// the raw text.
pub fn decode_candidate(output: &str) -> Result<ParsedTransaction, Error> {
    let json_text = extract_json(output).unwrap_or_else(|| output.trim().to_string());

    let raw = serde_json::from_str::<RawCandidate>(&json_text)
        .map_err(|_| Error::ParseFailure(output.to_owned()))?;

    let category = raw
        .category
        .as_deref()
        .and_then(|label| label.parse::<Category>().ok())
        .unwrap_or(Category::Other);

    let description = match raw.description {
        Some(description) if !description.trim().is_empty() => description,
        _ => "Transaction".to_owned(),
    };

    Ok(ParsedTransaction {
        amount: raw.amount.unwrap_or(0.0).max(0.0),
        description,
        category,
        transaction_type: raw.transaction_type.unwrap_or(TransactionType::Expense),
        confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
    })
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderError,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    code: Option<String>,
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod decode_candidate_tests {
    use crate::{
        Error,
        parser::llm::decode_candidate,
        transaction::{Category, TransactionType},
    };

    #[test]
    fn decodes_complete_candidate() {
        let output = r#"{"amount": 6.5, "category": "Food & Dining", "description": "Coffee", "type": "expense", "confidence": 0.92}"#;

        let parsed = decode_candidate(output).unwrap();

        assert_eq!(parsed.amount, 6.5);
        assert_eq!(parsed.category, Category::FoodAndDining);
        assert_eq!(parsed.description, "Coffee");
        assert_eq!(parsed.transaction_type, TransactionType::Expense);
        assert_eq!(parsed.confidence, 0.92);
    }

    #[test]
    fn null_fields_degrade_to_defaults() {
        let output = r#"{"amount": null, "category": null, "description": null, "type": null, "confidence": null}"#;

        let parsed = decode_candidate(output).unwrap();

        assert_eq!(parsed.amount, 0.0);
        assert_eq!(parsed.category, Category::Other);
        assert_eq!(parsed.description, "Transaction");
        assert_eq!(parsed.transaction_type, TransactionType::Expense);
        assert_eq!(parsed.confidence, 0.5);
    }

    #[test]
    fn unknown_category_label_degrades_to_other() {
        let output = r#"{"amount": 5.0, "category": "Snacks", "description": "Chips", "type": "expense", "confidence": 0.8}"#;

        let parsed = decode_candidate(output).unwrap();

        assert_eq!(parsed.category, Category::Other);
    }

    #[test]
    fn fenced_output_is_decoded() {
        let output = "```json\n{\"amount\": 10.0, \"category\": \"Travel\", \"description\": \"Taxi\", \"type\": \"expense\", \"confidence\": 0.7}\n```";

        let parsed = decode_candidate(output).unwrap();

        assert_eq!(parsed.category, Category::Travel);
    }

    #[test]
    fn non_json_output_surfaces_with_raw_text() {
        let output = "I'm sorry, I can't parse that.";

        let result = decode_candidate(output);

        assert_eq!(result, Err(Error::ParseFailure(output.to_owned())));
    }
}
