//! LinkedIn post rendering.
//!
//! A summary is turned into a post by wrapping it in a hook line, a closing
//! call-to-action and hashtags picked from the requested style and tone. The
//! result always fits LinkedIn's commentary limit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::llm::{CompletionProvider, CompletionRequest, Provider};

/// LinkedIn rejects share commentary longer than this.
pub const MAX_POST_CHARS: usize = 3000;

const ELLIPSIS: char = '…';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Insight,
    Story,
    Announcement,
    Tutorial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Professional,
    Casual,
    Enthusiastic,
    Thoughtful,
}

impl Style {
    pub const ALL: [Style; 4] = [Style::Insight, Style::Story, Style::Announcement, Style::Tutorial];

    pub fn as_str(self) -> &'static str {
        match self {
            Style::Insight => "insight",
            Style::Story => "story",
            Style::Announcement => "announcement",
            Style::Tutorial => "tutorial",
        }
    }

    fn hashtags(self) -> &'static str {
        match self {
            Style::Insight => "#AI #ChatGPT #Insights",
            Style::Story => "#AI #ChatGPT #Learning",
            Style::Announcement => "#AI #ChatGPT #Update",
            Style::Tutorial => "#AI #ChatGPT #HowTo",
        }
    }

    fn guidance(self) -> &'static str {
        match self {
            Style::Insight => "lead with the single most useful insight, then support it",
            Style::Story => "tell it as a short first-person story with a clear arc",
            Style::Announcement => "frame it as news the author is sharing with their network",
            Style::Tutorial => "present it as concise numbered steps the reader can follow",
        }
    }
}

impl Tone {
    pub const ALL: [Tone; 4] = [Tone::Professional, Tone::Casual, Tone::Enthusiastic, Tone::Thoughtful];

    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Casual => "casual",
            Tone::Enthusiastic => "enthusiastic",
            Tone::Thoughtful => "thoughtful",
        }
    }

    fn closing(self) -> &'static str {
        match self {
            Tone::Professional => {
                "What's your experience with this? I'd welcome your perspective in the comments."
            }
            Tone::Casual => "Have you run into this too? Let me know 👇",
            Tone::Enthusiastic => "Drop a comment if this sparked an idea! 🙌",
            Tone::Thoughtful => "I'm curious how others approach this.",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Style {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Style::ALL
            .into_iter()
            .find(|style| style.as_str() == wanted)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown style '{}'", s.trim())))
    }
}

impl FromStr for Tone {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Tone::ALL
            .into_iter()
            .find(|tone| tone.as_str() == wanted)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown tone '{}'", s.trim())))
    }
}

fn hook(style: Style, tone: Tone) -> &'static str {
    match (style, tone) {
        (Style::Story, Tone::Professional) => "Here's a story from a recent deep-dive conversation with AI.",
        (Style::Story, Tone::Casual) => "So, I had an interesting chat with ChatGPT the other day...",
        (Style::Story, Tone::Enthusiastic) => "I just had one of the most exciting problem-solving sessions with AI! 🚀",
        (Style::Story, Tone::Thoughtful) => "A recent conversation with AI left me reflecting on something.",
        (Style::Insight, Tone::Professional) => "Key insight from a recent AI-assisted deep dive:",
        (Style::Insight, Tone::Casual) => "Quick thing I learned today:",
        (Style::Insight, Tone::Enthusiastic) => "This insight genuinely changed how I think! 💡",
        (Style::Insight, Tone::Thoughtful) => "Something worth pausing on:",
        (Style::Announcement, Tone::Professional) => "I'm pleased to share what I've been exploring recently.",
        (Style::Announcement, Tone::Casual) => "Hey network, sharing something I've been working through!",
        (Style::Announcement, Tone::Enthusiastic) => "Big news from my learning journey! 🎉",
        (Style::Announcement, Tone::Thoughtful) => "I want to share something I've been considering carefully.",
        (Style::Tutorial, Tone::Professional) => "A practical walkthrough, distilled from a recent session:",
        (Style::Tutorial, Tone::Casual) => "Here's a quick how-to I picked up:",
        (Style::Tutorial, Tone::Enthusiastic) => "Let's level up together! Here's how it works 👇",
        (Style::Tutorial, Tone::Thoughtful) => "Let me walk through this step by step.",
    }
}

/// A post ready to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedPost {
    pub text: String,
    pub style: Style,
    pub tone: Tone,
}

impl FormattedPost {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Render a summary as a LinkedIn post.
pub fn generate(summary: &str, style: Style, tone: Tone) -> Result<FormattedPost> {
    let body = format_body(summary, style);
    if body.is_empty() {
        return Err(AppError::InvalidInput("Summary is empty".to_string()));
    }

    let hook = hook(style, tone);
    let closing = tone.closing();
    let hashtags = style.hashtags();

    // Separators: three blank-line breaks between four parts
    let fixed = hook.chars().count() + closing.chars().count() + hashtags.chars().count() + 6;
    let body = truncate_words(&body, MAX_POST_CHARS.saturating_sub(fixed));

    let text = format!("{}\n\n{}\n\n{}\n\n{}", hook, body, closing, hashtags);
    debug_assert!(text.chars().count() <= MAX_POST_CHARS);

    Ok(FormattedPost { text, style, tone })
}

/// Have the provider rewrite a templated post in its style and tone.
pub async fn rewrite(
    completions: &dyn CompletionProvider,
    post: &FormattedPost,
    provider: Provider,
    model: &str,
    api_key: &str,
) -> Result<FormattedPost> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(AppError::Auth(format!(
            "{} API key is required",
            provider.display_name()
        )));
    }

    let prompt = format!(
        "Rewrite the following LinkedIn post in a {tone} tone. Style: {guidance}. \
         Keep it under {limit} characters, keep the hashtags on the last line, \
         use plain text without markdown, and reply with the post only.\n\n{text}",
        tone = post.tone,
        guidance = post.style.guidance(),
        limit = MAX_POST_CHARS,
        text = post.text,
    );

    let reply = completions
        .complete(CompletionRequest {
            provider,
            model: provider.resolve_model(model),
            api_key: api_key.to_string(),
            system: Some("You write engaging, authentic LinkedIn posts.".to_string()),
            prompt,
        })
        .await?;

    let text = truncate_words(&strip_markdown(reply.trim()), MAX_POST_CHARS);
    if text.is_empty() {
        return Err(AppError::Provider("Rewrite returned no text".to_string()));
    }

    Ok(FormattedPost {
        text,
        style: post.style,
        tone: post.tone,
    })
}

/// Turn markdown-ish summary text into LinkedIn-friendly plain paragraphs.
fn format_body(summary: &str, style: Style) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut step = 0;

    for raw in strip_markdown(summary).lines() {
        let line = raw.trim();
        if line.is_empty() {
            if lines.last().is_some_and(|l| !l.is_empty()) {
                lines.push(String::new());
            }
            continue;
        }

        let line = line
            .strip_prefix("Summary:")
            .map(str::trim_start)
            .unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        match bullet_text(line) {
            Some(item) if style == Style::Tutorial => {
                step += 1;
                lines.push(format!("{}. {}", step, item));
            }
            Some(item) => lines.push(format!("• {}", item)),
            None => lines.push(line.to_string()),
        }
    }

    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines.join("\n")
}

fn bullet_text(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "+ ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    None
}

fn strip_markdown(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let unheaded = trimmed.trim_start_matches('#');
            let line = if unheaded.len() != trimmed.len() {
                unheaded.trim_start()
            } else {
                line
            };
            line.replace("**", "").replace("__", "").replace('`', "")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cut `text` to at most `max_chars` characters on a word boundary.
fn truncate_words(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }

    // Leave room for the ellipsis
    let (cut, next) = match text.char_indices().nth(max_chars - 1) {
        Some((i, c)) => (i, Some(c)),
        None => (text.len(), None),
    };
    let head = &text[..cut];
    let head = if next.is_some_and(char::is_whitespace) {
        head
    } else {
        match head.rfind(char::is_whitespace) {
            Some(i) if i > 0 => &head[..i],
            _ => head,
        }
    };

    let mut out = head.trim_end().to_string();
    out.push(ELLIPSIS);
    out
}
