//! LLM refinement of the model's severity score.
//!
//! The narrative and raw score are sent to an OpenAI-compatible chat
//! completions endpoint, which answers with a corrected score and three
//! preventive tips as a JSON object. Refinement is best-effort: every
//! failure is logged and degrades to the rounded model score with no tips.

use std::time::Duration;

use lacrime_core::config::LlmSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum RefineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response has no choices")]
    NoChoices,
    #[error("response message has no content")]
    EmptyContent,
    #[error("invalid refinement payload: {0}")]
    Schema(String),
    #[error("no API key configured")]
    Disabled,
}

impl RefineError {
    /// Connect failures, timeouts, 429 and 5xx are worth another attempt.
    fn is_transient(&self) -> bool {
        match self {
            RefineError::Http(e) => e.is_connect() || e.is_timeout(),
            RefineError::Server { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Outcome of a refinement call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Refinement {
    /// Rounded to two decimals.
    pub final_score: f64,
    pub tips: Vec<String>,
    /// False when the call failed or was skipped and the model score was used.
    pub refined: bool,
}

impl Refinement {
    fn degraded(model_score: f64) -> Self {
        Self {
            final_score: round2(model_score),
            tips: vec![],
            refined: false,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Chat-completions client for score refinement.
pub struct Refiner {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
}

impl Refiner {
    /// Build a refiner from settings. Without an API key the refiner is
    /// disabled and [`Refiner::refine`] never touches the network.
    pub fn new(settings: &LlmSettings) -> Result<Self, RefineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        let api_key = settings
            .api_key
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            info!("no LLM API key, score refinement disabled");
        }
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            api_key,
            max_retries: settings.max_retries,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Override the pause between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Ask the LLM to confirm or correct `model_score` for `narrative`.
    ///
    /// Never fails: on any error the result is `round2(model_score)` with no
    /// tips and `refined == false`.
    pub async fn refine(&self, narrative: &str, model_score: f64) -> Refinement {
        match self.try_refine(narrative, model_score).await {
            Ok((final_score, tips)) => {
                info!(model_score, final_score, tips = tips.len(), "refined severity score");
                Refinement {
                    final_score,
                    tips,
                    refined: true,
                }
            }
            Err(RefineError::Disabled) => Refinement::degraded(model_score),
            Err(e) => {
                warn!(error = %e, model_score, "LLM refinement failed, using model score");
                Refinement::degraded(model_score)
            }
        }
    }

    async fn try_refine(
        &self,
        narrative: &str,
        model_score: f64,
    ) -> Result<(f64, Vec<String>), RefineError> {
        let api_key = self.api_key.as_deref().ok_or(RefineError::Disabled)?;
        let prompt = build_prompt(narrative, model_score);

        let mut attempt = 0;
        let content = loop {
            match self.complete(api_key, &prompt).await {
                Ok(content) => break content,
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "transient LLM failure, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        parse_content(&content, model_score)
    }

    /// One chat-completions round trip, returning the first choice's content.
    async fn complete(&self, api_key: &str, prompt: &str) -> Result<String, RefineError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };

        debug!(endpoint = %self.endpoint, model = %self.model, "calling LLM");
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RefineError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(RefineError::NoChoices)?;
        choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(RefineError::EmptyContent)
    }
}

/// Prompt asking for a JSON verdict on `model_score`.
pub fn build_prompt(narrative: &str, model_score: f64) -> String {
    format!(
        r#"You are an expert in assessing the severity of crimes. Consider this case:

"""{narrative}"""

A regression model scored its severity at {model_score:.2} out of 10.

Decide whether that score reflects the gravity of the case. If it does, keep it; otherwise give your corrected score. Be objective and base the score on severity alone.
Then write 3 detailed preventive awareness tips for the victim, specific to this case.

Respond with JSON only, in this shape:
{{
  "final_score": <number between 0 and 10>,
  "tips": ["tip 1", "tip 2", "tip 3"]
}}"#
    )
}

/// Remove a surrounding markdown code fence and its info string, whether the
/// fence spans several lines or just one (```` ```json {...}``` ````).
pub fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = rest.strip_suffix("```").unwrap_or(rest);
    // Info string: a leading word such as `json`, up to whitespace or `{`.
    let tag_len = inner
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(inner.len());
    inner[tag_len..].trim()
}

/// Validate the LLM's JSON payload.
///
/// A missing or null `final_score` falls back to `model_score`; missing or
/// null `tips` means none. Any other shape is a schema error.
pub fn parse_content(content: &str, model_score: f64) -> Result<(f64, Vec<String>), RefineError> {
    let value: Value = serde_json::from_str(strip_fences(content))?;
    let Value::Object(map) = value else {
        return Err(RefineError::Schema("payload is not a JSON object".into()));
    };

    let score = match map.get("final_score") {
        None | Some(Value::Null) => model_score,
        Some(Value::Number(n)) => {
            let score = n
                .as_f64()
                .ok_or_else(|| RefineError::Schema(format!("final_score {n} is not an f64")))?;
            if !score.is_finite() || !(0.0..=10.0).contains(&score) {
                return Err(RefineError::Schema(format!(
                    "final_score {score} is outside 0..=10"
                )));
            }
            score
        }
        Some(other) => {
            return Err(RefineError::Schema(format!(
                "final_score is not a number: {other}"
            )));
        }
    };

    let tips = match map.get("tips") {
        None | Some(Value::Null) => vec![],
        Some(Value::Array(items)) => items
            .iter()
            .map(|t| match t {
                Value::String(s) => Ok(s.clone()),
                other => Err(RefineError::Schema(format!("tip is not a string: {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(RefineError::Schema(format!("tips is not an array: {other}")));
        }
    };

    Ok((round2(score), tips))
}

/// Round to two decimals, ties to even (`1.125` becomes `1.12`).
///
/// Ties are judged on `x * 100` in binary, so a value such as `2.675`,
/// stored just below the tie, rounds down.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round_ties_even() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn settings(endpoint: String, api_key: Option<&str>) -> LlmSettings {
        LlmSettings {
            endpoint,
            model: "test-model".into(),
            temperature: 0.5,
            timeout_secs: 5,
            max_retries: 1,
            api_key: api_key.map(String::from),
        }
    }

    fn refiner(server: &Server) -> Refiner {
        Refiner::new(&settings(format!("{}/chat", server.url()), Some("test-key")))
            .unwrap()
            .with_retry_delay(Duration::from_millis(10))
    }

    fn chat_body(content: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    const GOOD: &str =
        r#"{"final_score": 7.456, "tips": ["Lock doors", "Install lighting", "Know your neighbours"]}"#;

    #[tokio::test]
    async fn refines_score_and_tips() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "test-model",
                "temperature": 0.5
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_body(GOOD))
            .expect(1)
            .create_async()
            .await;

        let result = refiner(&server).refine("a burglary occurred", 6.0).await;
        mock.assert_async().await;

        assert!(result.refined);
        assert_eq!(result.final_score, 7.46);
        assert_eq!(result.tips.len(), 3);
        assert_eq!(result.tips[0], "Lock doors");
    }

    #[tokio::test]
    async fn accepts_fenced_json() {
        let mut server = Server::new_async().await;
        let fenced = format!("```json\n{GOOD}\n```");
        server
            .mock("POST", "/chat")
            .with_status(200)
            .with_body(chat_body(&fenced))
            .create_async()
            .await;

        let result = refiner(&server).refine("text", 6.0).await;
        assert!(result.refined);
        assert_eq!(result.final_score, 7.46);
    }

    #[tokio::test]
    async fn out_of_range_score_degrades() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat")
            .with_status(200)
            .with_body(chat_body(r#"{"final_score": 42, "tips": ["a", "b", "c"]}"#))
            .create_async()
            .await;

        let result = refiner(&server).refine("text", 5.678).await;
        assert!(!result.refined);
        assert_eq!(result.final_score, 5.68);
        assert!(result.tips.is_empty());
    }

    #[tokio::test]
    async fn non_json_content_degrades() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat")
            .with_status(200)
            .with_body(chat_body("I would rate this 7 out of 10."))
            .create_async()
            .await;

        let result = refiner(&server).refine("text", 3.333).await;
        assert_eq!(result, Refinement::degraded(3.333));
        assert_eq!(result.final_score, 3.33);
    }

    #[tokio::test]
    async fn server_error_is_retried_once() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .with_status(503)
            .with_body("overloaded")
            .expect(2)
            .create_async()
            .await;

        let result = refiner(&server).refine("text", 4.0).await;
        mock.assert_async().await;
        assert!(!result.refined);
        assert_eq!(result.final_score, 4.0);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .with_status(400)
            .with_body("bad request")
            .expect(1)
            .create_async()
            .await;

        let result = refiner(&server).refine("text", 4.0).await;
        mock.assert_async().await;
        assert!(!result.refined);
    }

    #[tokio::test]
    async fn unreachable_endpoint_degrades() {
        let refiner = Refiner::new(&settings(
            "http://127.0.0.1:9/chat".into(),
            Some("test-key"),
        ))
        .unwrap()
        .with_retry_delay(Duration::from_millis(10));

        let result = refiner.refine("text", 8.129).await;
        assert_eq!(result.final_score, 8.13);
        assert!(result.tips.is_empty());
        assert!(!result.refined);
    }

    #[tokio::test]
    async fn stalled_endpoint_times_out_and_retries_once() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        // Accept and hold every connection without ever answering.
        let counter = accepted.clone();
        let stall = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        let mut cfg = settings(format!("http://{addr}/chat"), Some("test-key"));
        cfg.timeout_secs = 1;
        let refiner = Refiner::new(&cfg)
            .unwrap()
            .with_retry_delay(Duration::from_millis(10));

        let result = refiner.refine("text", 6.666).await;
        stall.abort();

        assert_eq!(result, Refinement::degraded(6.666));
        assert_eq!(result.final_score, 6.67);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn without_key_skips_network() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .with_status(200)
            .with_body(chat_body(GOOD))
            .expect(0)
            .create_async()
            .await;

        let refiner = Refiner::new(&settings(format!("{}/chat", server.url()), Some("  "))).unwrap();
        assert!(!refiner.is_enabled());
        let result = refiner.refine("text", 2.0).await;
        mock.assert_async().await;
        assert_eq!(result, Refinement::degraded(2.0));
    }

    #[test]
    fn missing_fields_fall_back() {
        assert_eq!(parse_content("{}", 6.789).unwrap(), (6.79, vec![]));
        let (score, tips) = parse_content(r#"{"tips": ["x"]}"#, 1.0).unwrap();
        assert_eq!(score, 1.0);
        assert_eq!(tips, vec!["x".to_string()]);
    }

    #[test]
    fn rejects_malformed_payloads() {
        for bad in [
            r#"[1, 2, 3]"#,
            r#"{"final_score": "7"}"#,
            r#"{"final_score": -0.5}"#,
            r#"{"final_score": 5, "tips": "be careful"}"#,
            r#"{"final_score": 5, "tips": ["ok", 3]}"#,
        ] {
            assert!(
                matches!(parse_content(bad, 5.0), Err(RefineError::Schema(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn strips_code_fences() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_fences("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(strip_fences("```{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_fences("```json {\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_fences("```JSON{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn single_line_fence_parses() {
        let (score, tips) =
            parse_content(r#"```json {"final_score": 6.5, "tips": ["a", "b", "c"]}```"#, 1.0)
                .unwrap();
        assert_eq!(score, 6.5);
        assert_eq!(tips.len(), 3);
    }

    #[test]
    fn prompt_carries_case_and_score() {
        let prompt = build_prompt("The victim was an adult individual.", 6.5);
        assert!(prompt.contains("\"\"\"The victim was an adult individual.\"\"\""));
        assert!(prompt.contains("6.50 out of 10"));
        assert!(prompt.contains("\"final_score\""));
    }

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(round2(7.456), 7.46);
        assert_eq!(round2(3.0), 3.0);
        assert_eq!(round2(-1.234), -1.23);
    }

    #[test]
    fn exact_ties_round_to_even() {
        assert_eq!(round2(1.125), 1.12);
        assert_eq!(round2(1.375), 1.38);
        assert_eq!(round2(-0.625), -0.62);
    }
}
