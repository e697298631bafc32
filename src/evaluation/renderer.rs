//! Optional render step: turns fetched HTML into readable content.

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::domain::entities::{FetchedPage, RenderedPage};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("content type '{0}' cannot be rendered")]
    Unsupported(String),
    #[error("render failed: {0}")]
    Failed(String),
}

/// Produces rendered content for scoring.
///
/// A failure here never fails the job; scoring falls back to the raw body.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, page: &FetchedPage) -> Result<RenderedPage, RenderError>;
}

/// Static HTML renderer built on `scraper`. Scripts are not executed.
#[derive(Default)]
pub struct HtmlRenderer;

impl HtmlRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PageRenderer for HtmlRenderer {
    async fn render(&self, page: &FetchedPage) -> Result<RenderedPage, RenderError> {
        if let Some(content_type) = &page.content_type {
            let lowered = content_type.to_ascii_lowercase();
            if !lowered.contains("html") && !lowered.starts_with("text/") {
                return Err(RenderError::Unsupported(content_type.clone()));
            }
        }

        let body = page.body.clone();
        // html5ever parsing is CPU-bound
        tokio::task::spawn_blocking(move || extract(&body))
            .await
            .map_err(|e| RenderError::Failed(e.to_string()))?
    }
}

fn selector(css: &str) -> Result<Selector, RenderError> {
    Selector::parse(css).map_err(|e| RenderError::Failed(format!("selector '{css}': {e}")))
}

fn extract(html: &str) -> Result<RenderedPage, RenderError> {
    let document = Html::parse_document(html);
    let title_sel = selector("title")?;
    let body_sel = selector("body")?;
    let link_sel = selector("a[href]")?;
    let skip_sel = selector("script, style, noscript")?;

    let title = document
        .select(&title_sel)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let skipped: Vec<_> = document.select(&skip_sel).map(|e| e.id()).collect();
    let text = match document.select(&body_sel).next() {
        Some(body) => body
            .descendants()
            .filter_map(|node| {
                let parent_skipped = node
                    .ancestors()
                    .any(|a| skipped.contains(&a.id()));
                match node.value().as_text() {
                    Some(t) if !parent_skipped => Some(t.trim()),
                    _ => None,
                }
            })
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        None => String::new(),
    };

    Ok(RenderedPage {
        title,
        text,
        link_count: document.select(&link_sel).count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str, content_type: Option<&str>) -> FetchedPage {
        FetchedPage {
            final_url: "https://example.com/".to_string(),
            status: 200,
            content_type: content_type.map(|s| s.to_string()),
            body: body.to_string(),
            latency_ms: 12,
        }
    }

    #[tokio::test]
    async fn test_extracts_title_text_and_links() {
        let html = r#"<html><head><title> Hello </title><style>p{}</style></head>
            <body><h1>Welcome</h1><script>var x = 1;</script>
            <p>Some text</p><a href="/a">A</a><a href="/b">B</a><a>no href</a></body></html>"#;

        let rendered = HtmlRenderer::new()
            .render(&page(html, Some("text/html; charset=utf-8")))
            .await
            .unwrap();

        assert_eq!(rendered.title.as_deref(), Some("Hello"));
        assert!(rendered.text.contains("Welcome"));
        assert!(rendered.text.contains("Some text"));
        assert!(!rendered.text.contains("var x"));
        assert_eq!(rendered.link_count, 2);
    }

    #[tokio::test]
    async fn test_rejects_binary_content() {
        let err = HtmlRenderer::new()
            .render(&page("%PDF-1.7", Some("application/pdf")))
            .await
            .unwrap_err();

        assert!(matches!(err, RenderError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_missing_title_is_none() {
        let rendered = HtmlRenderer::new()
            .render(&page("<html><body>plain</body></html>", None))
            .await
            .unwrap();

        assert!(rendered.title.is_none());
        assert_eq!(rendered.text, "plain");
        assert_eq!(rendered.link_count, 0);
    }
}
