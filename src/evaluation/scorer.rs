//! Scoring step: content signals to a quality score and verdict.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::entities::{FetchedPage, RenderedPage, Verdict};

/// Score assigned when the inference collaborator fails.
pub const NEUTRAL_SCORE: u8 = 50;
/// Minimum score for a `healthy` verdict.
pub const HEALTHY_THRESHOLD: u8 = 60;

const SLOW_LATENCY_MS: u64 = 3_000;
const VERY_SLOW_LATENCY_MS: u64 = 8_000;
const THIN_CONTENT_CHARS: usize = 200;
/// Only the head of the content is sent for inference.
const INFERENCE_MAX_CHARS: usize = 8_000;

/// Phrases that signal a soft error page served with a 2xx status.
const ERROR_MARKERS: [&str; 9] = [
    "404 not found",
    "page not found",
    "this domain is for sale",
    "domain for sale",
    "account suspended",
    "site has been suspended",
    "internal server error",
    "service unavailable",
    "bad gateway",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Request(String),
    #[error("inference response invalid: {0}")]
    InvalidResponse(String),
}

/// External content-quality model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Returns a quality score in `0..=100`.
    async fn score_content(&self, content: &str) -> Result<u8, InferenceError>;
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct InferenceResponse {
    score: f64,
}

/// [`InferenceClient`] speaking JSON over HTTP: `POST {content}` → `{score}`.
pub struct HttpInferenceClient {
    client: Client,
    endpoint: String,
}

impl HttpInferenceClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn score_content(&self, content: &str) -> Result<u8, InferenceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&InferenceRequest { content })
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        let body: InferenceResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        if !body.score.is_finite() || !(0.0..=100.0).contains(&body.score) {
            return Err(InferenceError::InvalidResponse(format!(
                "score {} outside 0..=100",
                body.score
            )));
        }

        Ok(body.score.round() as u8)
    }
}

/// Outcome of the scoring step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub quality_score: u8,
    pub verdict: Verdict,
}

/// Combines local content heuristics with the optional inference signal.
///
/// Never fails: an inference error yields [`NEUTRAL_SCORE`] and `degraded`.
#[derive(Clone, Default)]
pub struct ContentScorer {
    inference: Option<Arc<dyn InferenceClient>>,
}

impl ContentScorer {
    pub fn new(inference: Option<Arc<dyn InferenceClient>>) -> Self {
        Self { inference }
    }

    pub async fn score(&self, page: &FetchedPage, rendered: Option<&RenderedPage>) -> Score {
        let content = match rendered {
            Some(r) => r.text.as_str(),
            None => page.body.as_str(),
        };
        let has_error_marker = contains_error_marker(content, rendered.and_then(|r| r.title.as_deref()));
        let heuristic = heuristic_score(page, rendered, has_error_marker);

        let quality_score = match &self.inference {
            None => heuristic,
            Some(client) => {
                let sample: String = content.chars().take(INFERENCE_MAX_CHARS).collect();
                match client.score_content(&sample).await {
                    Ok(inferred) => ((u16::from(heuristic) + u16::from(inferred.min(100))) / 2) as u8,
                    Err(e) => {
                        tracing::warn!(url = %page.final_url, error = %e, "Inference failed, using neutral score");
                        metrics::counter!("evaluation_inference_failures_total").increment(1);
                        return Score {
                            quality_score: NEUTRAL_SCORE,
                            verdict: Verdict::Degraded,
                        };
                    }
                }
            }
        };

        let verdict = if has_error_marker || quality_score < HEALTHY_THRESHOLD {
            Verdict::Degraded
        } else {
            Verdict::Healthy
        };

        Score {
            quality_score,
            verdict,
        }
    }
}

fn contains_error_marker(content: &str, title: Option<&str>) -> bool {
    let haystack = format!("{} {}", title.unwrap_or_default(), content).to_lowercase();
    ERROR_MARKERS.iter().any(|m| haystack.contains(m))
}

fn heuristic_score(page: &FetchedPage, rendered: Option<&RenderedPage>, error_marker: bool) -> u8 {
    let mut score: i32 = 100;

    if page.latency_ms > VERY_SLOW_LATENCY_MS {
        score -= 30;
    } else if page.latency_ms > SLOW_LATENCY_MS {
        score -= 15;
    }

    let content_len = match rendered {
        Some(r) => r.text.chars().count(),
        None => page.body.chars().count(),
    };
    if content_len < THIN_CONTENT_CHARS {
        score -= 25;
    }

    if error_marker {
        score -= 50;
    }

    if let Some(r) = rendered
        && r.title.is_none()
    {
        score -= 5;
    }

    score.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str, latency_ms: u64) -> FetchedPage {
        FetchedPage {
            final_url: "https://example.com/".to_string(),
            status: 200,
            content_type: Some("text/html".to_string()),
            body: body.to_string(),
            latency_ms,
        }
    }

    fn rendered(title: Option<&str>, text: &str) -> RenderedPage {
        RenderedPage {
            title: title.map(|t| t.to_string()),
            text: text.to_string(),
            link_count: 3,
        }
    }

    #[tokio::test]
    async fn test_fast_rich_page_is_healthy() {
        let text = "lorem ipsum ".repeat(50);
        let score = ContentScorer::default()
            .score(&page(&text, 120), Some(&rendered(Some("Home"), &text)))
            .await;

        assert_eq!(score.quality_score, 100);
        assert_eq!(score.verdict, Verdict::Healthy);
    }

    #[tokio::test]
    async fn test_soft_error_page_is_degraded() {
        let text = format!("Oops! Page Not Found. {}", "filler ".repeat(50));
        let score = ContentScorer::default()
            .score(&page(&text, 100), Some(&rendered(Some("Oops"), &text)))
            .await;

        assert_eq!(score.verdict, Verdict::Degraded);
        assert_eq!(score.quality_score, 50);
    }

    #[tokio::test]
    async fn test_slow_thin_page_scores_low() {
        let score = ContentScorer::default().score(&page("tiny", 9_000), None).await;

        assert_eq!(score.quality_score, 45);
        assert_eq!(score.verdict, Verdict::Degraded);
    }

    #[tokio::test]
    async fn test_inference_is_averaged_with_heuristics() {
        let mut inference = MockInferenceClient::new();
        inference
            .expect_score_content()
            .times(1)
            .returning(|_| Ok(80));

        let text = "content ".repeat(50);
        let scorer = ContentScorer::new(Some(Arc::new(inference)));
        let score = scorer
            .score(&page(&text, 100), Some(&rendered(Some("T"), &text)))
            .await;

        assert_eq!(score.quality_score, 90);
        assert_eq!(score.verdict, Verdict::Healthy);
    }

    #[tokio::test]
    async fn test_inference_error_yields_neutral_degraded() {
        let mut inference = MockInferenceClient::new();
        inference
            .expect_score_content()
            .returning(|_| Err(InferenceError::Request("connection refused".to_string())));

        let text = "content ".repeat(50);
        let scorer = ContentScorer::new(Some(Arc::new(inference)));
        let score = scorer.score(&page(&text, 100), None).await;

        assert_eq!(
            score,
            Score {
                quality_score: NEUTRAL_SCORE,
                verdict: Verdict::Degraded
            }
        );
    }
}
