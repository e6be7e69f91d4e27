//! Turning free text or a receipt photo into candidate line items.
//!
//! The remote extractor speaks the OpenAI-compatible chat-completions
//! protocol. When it is not configured, or when it fails, the local
//! heuristic reads `<description> <amount>` lines.

use std::{future::Future, pin::Pin};

use base64::Engine as _;
use engine::{Money, method_key};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const TEMPERATURE: f64 = 0.1;
const MAX_TOKENS: u32 = 1024;

/// What the user sent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractRequest {
    pub text: Option<String>,
    /// Raw JPEG bytes of a photo.
    pub image: Option<Vec<u8>>,
    /// Catalog method names, so the extractor can recognise them.
    pub known_methods: Vec<String>,
}

/// One best-effort guess. Every field may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Candidate {
    pub description: Option<String>,
    pub amount: Option<Money>,
    pub merchant: Option<String>,
    pub method: Option<String>,
    pub date: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{status}: {message}")]
    Server { status: StatusCode, message: String },
    #[error("malformed extractor reply: {0}")]
    Malformed(String),
}

pub trait Extractor: Send + Sync + 'static {
    fn extract<'a>(
        &'a self,
        request: &'a ExtractRequest,
    ) -> BoxFuture<'a, Result<Vec<Candidate>, ExtractError>>;
}

/// Remote extractor behind a chat-completions endpoint.
#[derive(Clone, Debug)]
pub struct HttpExtractor {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpExtractor {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    fn body(&self, request: &ExtractRequest) -> Value {
        let text = request
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Read the transaction from this receipt.");

        let user = match &request.image {
            Some(image) => {
                let encoded = base64::prelude::BASE64_STANDARD.encode(image);
                json!([
                    { "type": "text", "text": text },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{encoded}") }
                    }
                ])
            }
            None => Value::String(text.to_string()),
        };

        json!({
            "model": self.model,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
            "messages": [
                { "role": "system", "content": system_prompt(&request.known_methods) },
                { "role": "user", "content": user }
            ]
        })
    }

    async fn call(&self, request: &ExtractRequest) -> Result<Vec<Candidate>, ExtractError> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .text()
                .await
                .unwrap_or_else(|_| "extractor error".to_string());
            return Err(ExtractError::Server { status, message });
        }

        let completion: Completion = resp.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ExtractError::Malformed("empty completion".to_string()))?;
        parse_reply(&content)
    }
}

impl Extractor for HttpExtractor {
    fn extract<'a>(
        &'a self,
        request: &'a ExtractRequest,
    ) -> BoxFuture<'a, Result<Vec<Candidate>, ExtractError>> {
        Box::pin(self.call(request))
    }
}

fn system_prompt(known_methods: &[String]) -> String {
    format!(
        "You extract purchase records from chat messages and receipt photos. \
         Reply with JSON only, shaped as {{\"items\": [{{\"description\": string|null, \
         \"amount\": number|null, \"merchant\": string|null, \"method\": string|null, \
         \"date\": \"YYYY-MM-DD\"|null, \"category\": string|null}}]}}. \
         One object per purchased item. Amounts are whole Rupiah. \
         Use null for anything that is not stated. \
         Known payment methods: {}.",
        known_methods.join(", ")
    )
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCandidate {
    #[serde(default, alias = "items", alias = "item")]
    description: Option<String>,
    #[serde(default, alias = "harga", alias = "price")]
    amount: Option<Value>,
    #[serde(default, alias = "namaToko")]
    merchant: Option<String>,
    #[serde(default, alias = "metodePembayaran")]
    method: Option<String>,
    #[serde(default, alias = "tanggal")]
    date: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

impl From<RawCandidate> for Candidate {
    fn from(raw: RawCandidate) -> Self {
        let amount = match raw.amount {
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|v| v.is_finite() && *v > 0.0)
                .map(|v| Money::new(v.round() as i64)),
            Some(Value::String(s)) => s.parse::<Money>().ok().filter(|m| m.is_positive()),
            _ => None,
        };
        Self {
            description: non_empty(raw.description),
            amount,
            merchant: non_empty(raw.merchant),
            method: non_empty(raw.method),
            date: non_empty(raw.date),
            category: non_empty(raw.category),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

/// Reads the model reply: `{"items": [...]}`, a bare array or a single object,
/// optionally wrapped in a markdown code fence.
pub(crate) fn parse_reply(content: &str) -> Result<Vec<Candidate>, ExtractError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let value: Value = serde_json::from_str(unfenced)
        .map_err(|err| ExtractError::Malformed(err.to_string()))?;
    let raw: Vec<RawCandidate> = match value {
        Value::Object(mut map) if map.get("items").is_some_and(Value::is_array) => {
            let items = map.remove("items").unwrap_or_default();
            serde_json::from_value(items).map_err(|err| ExtractError::Malformed(err.to_string()))?
        }
        Value::Array(_) => {
            serde_json::from_value(value).map_err(|err| ExtractError::Malformed(err.to_string()))?
        }
        Value::Object(_) => vec![
            serde_json::from_value(value)
                .map_err(|err| ExtractError::Malformed(err.to_string()))?,
        ],
        other => return Err(ExtractError::Malformed(format!("unexpected reply: {other}"))),
    };

    Ok(raw
        .into_iter()
        .map(Candidate::from)
        .filter(|c| c.description.is_some() || c.amount.is_some())
        .collect())
}

/// Local parser for `<description> <amount> [method]` lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn parse(&self, request: &ExtractRequest) -> Vec<Candidate> {
        let Some(text) = request.text.as_deref() else {
            return Vec::new();
        };
        text.lines()
            .flat_map(|line| line.split(';'))
            .filter_map(|line| parse_line(line, &request.known_methods))
            .collect()
    }
}

impl Extractor for HeuristicExtractor {
    fn extract<'a>(
        &'a self,
        request: &'a ExtractRequest,
    ) -> BoxFuture<'a, Result<Vec<Candidate>, ExtractError>> {
        Box::pin(async move { Ok(self.parse(request)) })
    }
}

fn parse_line(line: &str, known_methods: &[String]) -> Option<Candidate> {
    let mut words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }

    let mut method = None;
    if let Some(last) = words.last()
        && let Some(known) = known_methods
            .iter()
            .find(|m| method_key(m) == method_key(last))
    {
        method = Some(known.clone());
        words.pop();
    }

    let mut amount = None;
    if let Some(idx) = words
        .iter()
        .rposition(|w| w.parse::<Money>().is_ok_and(Money::is_positive))
    {
        amount = words[idx].parse::<Money>().ok();
        words.remove(idx);
    }

    let description = words.join(" ");
    let description = (!description.is_empty()).then_some(description);
    if description.is_none() && amount.is_none() {
        return None;
    }
    Some(Candidate {
        description,
        amount,
        method,
        ..Candidate::default()
    })
}

/// Remote extractor with the heuristic as a safety net.
pub struct FallbackExtractor {
    primary: Box<dyn Extractor>,
    fallback: HeuristicExtractor,
}

impl FallbackExtractor {
    pub fn new(primary: impl Extractor) -> Self {
        Self {
            primary: Box::new(primary),
            fallback: HeuristicExtractor,
        }
    }
}

impl Extractor for FallbackExtractor {
    fn extract<'a>(
        &'a self,
        request: &'a ExtractRequest,
    ) -> BoxFuture<'a, Result<Vec<Candidate>, ExtractError>> {
        Box::pin(async move {
            match self.primary.extract(request).await {
                Ok(found) => Ok(found),
                Err(err) if request.text.is_some() => {
                    tracing::warn!("remote extractor failed, using heuristic: {err}");
                    Ok(self.fallback.parse(request))
                }
                Err(err) => Err(err),
            }
        })
    }
}
