use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::error::{AppError, Result};

const USER_AGENT: &str = concat!("convo-post/", env!("CARGO_PKG_VERSION"));

const SHARE_HOSTS: [&str; 3] = ["chatgpt.com", "chat.openai.com", "www.chatgpt.com"];

// Create static selectors to avoid recompiling them each time
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("Failed to parse title selector"));

static ROLE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("[data-message-author-role]").expect("Failed to parse role selector")
});

static FALLBACK_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.markdown, div[class*='prose'], div[class*='message']")
        .expect("Failed to parse fallback selector")
});

/// Elements whose text is page chrome rather than conversation.
const SKIPPED_TAGS: [&str; 9] = [
    "button", "nav", "aside", "footer", "header", "script", "style", "svg", "noscript",
];

const BLOCK_TAGS: [&str; 16] = [
    "p", "div", "li", "pre", "br", "tr", "ul", "ol", "blockquote", "h1", "h2", "h3", "h4", "h5",
    "h6", "table",
];

const UI_LINES: [&str; 8] = [
    "copy code", "copy", "regenerate", "edit", "share", "like", "dislike", "read aloud",
];

const UI_PHRASES: [&str; 6] = [
    "log in", "sign up", "skip to content", "what can i help", "loading", "menu",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("User"),
            Role::Assistant => f.write_str("Assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Conversation pulled out of a shared page.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationText {
    pub url: String,
    pub title: Option<String>,
    pub turns: Vec<Turn>,
}

impl ConversationText {
    /// Render the conversation as the plain text handed to the summarizer.
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::new();
        if let Some(title) = &self.title {
            out.push_str("Title: ");
            out.push_str(title);
            out.push_str("\n\n");
        }
        for (i, turn) in self.turns.iter().enumerate() {
            if i > 0 {
                out.push_str("\n\n");
            }
            out.push_str(&format!("{}: {}", turn.role, turn.content));
        }
        out
    }

    pub fn word_count(&self) -> usize {
        self.turns
            .iter()
            .map(|t| t.content.split_whitespace().count())
            .sum()
    }
}

/// Validate and normalise a shared conversation link.
pub fn parse_share_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::InvalidInput("URL cannot be empty".to_string()));
    }

    // Ensure URL uses HTTPS
    let rest = match raw.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") => rest,
        Some((scheme, _)) => {
            return Err(AppError::InvalidInput(format!(
                "Unsupported URL scheme '{}'",
                scheme
            )));
        }
        None => raw,
    };
    let mut url = Url::parse(&format!("https://{}", rest))
        .map_err(|e| AppError::InvalidInput(format!("Invalid URL format: {}", e)))?;

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if !SHARE_HOSTS.contains(&host.as_str()) {
        return Err(AppError::InvalidInput(format!(
            "URL must be from one of: chatgpt.com, chat.openai.com (got '{}')",
            host
        )));
    }

    let segments: Vec<String> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();

    let path = match segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["share", id] | ["share", "e", id] | ["g", id, ..] if is_id(id) => None,
        // Private conversation links have the same id as their shared page
        ["c", id] if host == "chat.openai.com" && is_id(id) => Some(format!("/share/{}", id)),
        _ => {
            return Err(AppError::InvalidInput(
                "URL must be a ChatGPT shared link (chatgpt.com/share/...) or a GPT link (chat.openai.com/g/...)"
                    .to_string(),
            ));
        }
    };
    if let Some(path) = path {
        url.set_path(&path);
    }
    url.set_fragment(None);

    Ok(url)
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Source of raw share-page HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Extraction("Timed out fetching the shared page".to_string())
            } else {
                AppError::Extraction(format!("Failed to fetch HTML: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Extraction(format!(
                "Shared page returned HTTP {}",
                status
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::Extraction(format!("Failed to read page body: {}", e)))
    }
}

/// Fetch a shared conversation and extract its turns.
pub async fn extract(fetcher: &dyn PageFetcher, raw_url: &str) -> Result<ConversationText> {
    let url = parse_share_url(raw_url)?;
    tracing::info!(url = %url, "fetching shared conversation");

    let html = fetcher.fetch(&url).await?;
    tracing::debug!(bytes = html.len(), "fetched shared page");

    let conversation = parse_conversation(url.as_str(), &html)?;
    tracing::info!(
        turns = conversation.turns.len(),
        words = conversation.word_count(),
        "extracted conversation"
    );
    Ok(conversation)
}

pub fn parse_conversation(url: &str, html: &str) -> Result<ConversationText> {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let mut seen = HashSet::new();
    let mut turns = Vec::new();

    let mut push = |role: Role, element: ElementRef| {
        let content = element_text(element);
        if content.is_empty() || !seen.insert(content.clone()) {
            return;
        }
        if is_meaningful_text(&content) {
            turns.push(Turn { role, content });
        }
    };

    let mut found_roles = false;
    for element in document.select(&ROLE_SELECTOR) {
        found_roles = true;
        let role = match element.value().attr("data-message-author-role") {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            _ => continue,
        };
        push(role, element);
    }

    if !found_roles {
        tracing::warn!("no role-tagged messages found, using prose containers");
        for element in document.select(&FALLBACK_SELECTOR) {
            push(fallback_role(element), element);
        }
    }

    if turns.is_empty() {
        return Err(AppError::Extraction(
            "Failed to extract meaningful conversation turns from the page".to_string(),
        ));
    }

    Ok(ConversationText {
        url: url.to_string(),
        title,
        turns,
    })
}

fn fallback_role(element: ElementRef) -> Role {
    let classes = element.value().attr("class").unwrap_or_default();
    if classes.contains("user") || classes.contains("human") {
        Role::User
    } else {
        Role::Assistant
    }
}

/// Readable text of an element, one line per block.
fn element_text(element: ElementRef) -> String {
    let mut raw = String::new();
    collect_text(element, &mut raw);

    raw.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .filter(|line| !UI_LINES.contains(&line.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            let name = child_el.value().name();
            if SKIPPED_TAGS.contains(&name) {
                continue;
            }
            let block = BLOCK_TAGS.contains(&name);
            if block {
                out.push('\n');
            }
            if name == "li" {
                out.push_str("- ");
            }
            collect_text(child_el, out);
            if block {
                out.push('\n');
            }
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Filter out UI fragments and symbol noise.
fn is_meaningful_text(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    if lower.chars().count() < 5 {
        return false;
    }
    if lower.len() <= 40 && UI_PHRASES.iter().any(|p| lower.contains(p)) {
        return false;
    }

    let total = lower.chars().count();
    let readable = lower
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || ".,!?-_()[]{}".contains(*c))
        .count();
    readable * 10 >= total
}
