//! Content extraction
//!
//! Reduces a full page to its readable content, the way reader views do:
//! chrome such as navigation, scripts and footers is dropped and the main
//! article body is returned as HTML, Markdown or plain text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::html;

/// Elements that never carry readable content
const NOISE_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "iframe", "nav", "footer", "aside", "form", "svg",
];

/// Words kept in the excerpt
const EXCERPT_WORDS: usize = 40;

/// Format of [`ExtractedDocument::content`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Html,
    Markdown,
    Text,
}

/// Simplified document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDocument {
    pub title: Option<String>,
    pub content: String,
    pub url: String,
    pub excerpt: String,
    pub word_count: usize,
}

/// Readability-style content transform
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn parse(&self, url: &str, html: &str, content_type: ContentType)
        -> Result<ExtractedDocument>;
}

/// Built-in extractor working on serialized HTML
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadabilityExtractor;

impl ReadabilityExtractor {
    pub fn new() -> Self {
        Self
    }

    fn title(document: &str) -> Option<String> {
        ["title", "h1"]
            .iter()
            .filter_map(|tag| html::inner_html(document, tag))
            .map(html::strip_tags)
            .find(|t| !t.is_empty())
    }

    /// Most specific container holding the main content
    fn main_content(document: &str) -> &str {
        ["article", "main", "body"]
            .iter()
            .find_map(|tag| html::inner_html(document, tag))
            .unwrap_or(document)
    }
}

#[async_trait]
impl ContentExtractor for ReadabilityExtractor {
    async fn parse(
        &self,
        url: &str,
        document: &str,
        content_type: ContentType,
    ) -> Result<ExtractedDocument> {
        let title = Self::title(document);
        let cleaned = html::strip_elements(document, NOISE_ELEMENTS);
        let body = Self::main_content(&cleaned).trim().to_string();

        let text = html::strip_tags(&body);
        let words: Vec<&str> = text.split_whitespace().collect();
        let excerpt = words
            .iter()
            .take(EXCERPT_WORDS)
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        let content = match content_type {
            ContentType::Html => body,
            ContentType::Markdown => htmd::convert(&body)?,
            ContentType::Text => text.clone(),
        };

        tracing::debug!(
            "Extracted {} words from {} ({:?})",
            words.len(),
            url,
            content_type
        );
        Ok(ExtractedDocument {
            title,
            content,
            url: url.to_string(),
            excerpt,
            word_count: words.len(),
        })
    }
}
