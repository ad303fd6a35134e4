use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Wall-clock budget for one generation request; local models are slow.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(900);

/// Budget for the availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_ATTEMPTS: u32 = 3;
const FIRST_BACKOFF: Duration = Duration::from_secs(1);
const MAX_TOKENS: u32 = 500;
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("summary request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("summary service returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("summary service returned an empty response")]
    Empty,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<serde_json::Value>,
}

/// Client for an Ollama-compatible text generation endpoint, used to turn
/// finished transcripts into meeting minutes.
///
/// Every caller treats summarization as best-effort: a transcription never
/// fails for lack of a summary.
#[derive(Debug, Clone)]
pub struct SummaryClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl SummaryClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            model: model.into(),
        }
    }

    /// `true` when the service answers and has at least one model loaded.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<TagsResponse>().await {
                    Ok(tags) => !tags.models.is_empty(),
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }

    /// Generate meeting minutes for a transcript, retrying transient
    /// failures with doubling backoff.
    pub async fn generate(&self, transcript: &str) -> Result<String, SummaryError> {
        let url = format!("{}/api/generate", self.base_url);
        let prompt = build_prompt(transcript);
        let mut backoff = FIRST_BACKOFF;
        let mut last_error = SummaryError::Empty;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_generate(&url, &prompt).await {
                Ok(summary) => return Ok(summary),
                Err(e) => {
                    warn!(attempt, error = %e, "summary attempt failed");
                    last_error = e;
                }
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
        Err(last_error)
    }

    async fn try_generate(&self, url: &str, prompt: &str) -> Result<String, SummaryError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: MAX_TOKENS,
                temperature: TEMPERATURE,
            },
        };
        let response = self
            .http
            .post(url)
            .timeout(GENERATE_TIMEOUT)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SummaryError::Status(response.status()));
        }
        let body: GenerateResponse = response.json().await?;
        let summary = strip_reasoning(&body.response).trim().to_string();
        if summary.is_empty() {
            return Err(SummaryError::Empty);
        }
        Ok(summary)
    }
}

fn build_prompt(transcript: &str) -> String {
    format!(
        "Summarize the following meeting transcript into concise meeting \
         minutes. List the main topics discussed, the decisions made and \
         any action items.\n\nTranscript:\n{transcript}"
    )
}

/// Reasoning models wrap their chain of thought in `<think>` tags; only
/// the text after the final closing tag is the answer.
fn strip_reasoning(response: &str) -> &str {
    match response.rfind("</think>") {
        Some(index) => &response[index + "</think>".len()..],
        None => response,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reasoning_blocks_are_stripped() {
        let raw = "<think>\nlots of private deliberation\n</think>\nThe minutes.";
        assert_eq!(strip_reasoning(raw).trim(), "The minutes.");
        assert_eq!(strip_reasoning("plain answer"), "plain answer");
    }

    #[test]
    fn prompt_embeds_the_transcript() {
        let prompt = build_prompt("we agreed to ship on friday");
        assert!(prompt.contains("we agreed to ship on friday"));
        assert!(prompt.starts_with("Summarize"));
    }
}
