use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::linkedin::{self, PostConfirmation, Publisher, Visibility};
use crate::llm::{self, CompletionProvider, Provider};
use crate::postgen::{self, FormattedPost, Style, Tone};
use crate::scraper::{self, PageFetcher};
use crate::session::{Preferences, SessionStore};

/// One request to turn a shared conversation into a post.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    pub url: String,
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub style: Option<Style>,
    pub tone: Option<Tone>,
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub auto_post: bool,
    #[serde(default)]
    pub rewrite: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub url: String,
    pub title: Option<String>,
    pub word_count: usize,
    pub provider: Provider,
    pub model: String,
    pub summary: String,
    pub post: FormattedPost,
    pub published: Option<PostConfirmation>,
}

/// Extract → summarize → generate → publish, one stage at a time.
#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn PageFetcher>,
    completions: Arc<dyn CompletionProvider>,
    publisher: Arc<dyn Publisher>,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        completions: Arc<dyn CompletionProvider>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            fetcher,
            completions,
            publisher,
        }
    }

    pub async fn run(
        &self,
        sessions: &SessionStore,
        id: Uuid,
        req: GenerateRequest,
    ) -> Result<RunOutcome> {
        // Checks run against a snapshot; the session only changes once a post exists
        let ctx = sessions.snapshot(id)?;
        let url = scraper::parse_share_url(&req.url)?;

        let provider = req
            .provider
            .or(ctx.preferences.provider)
            .or_else(|| ctx.credentials.configured_providers().first().copied())
            .ok_or_else(|| AppError::Auth("Enter an API key for at least one provider".to_string()))?;
        let model = req
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| ctx.preferences.model.clone().filter(|_| ctx.preferences.provider == Some(provider)))
            .unwrap_or_else(|| provider.default_model().to_string());
        let preferences = Preferences {
            provider: Some(provider),
            model: Some(model.clone()),
            style: req.style.unwrap_or(ctx.preferences.style),
            tone: req.tone.unwrap_or(ctx.preferences.tone),
            visibility: req.visibility.unwrap_or(ctx.preferences.visibility),
        };

        let api_key = ctx.credentials.api_key(provider).unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(AppError::Auth(format!(
                "{} API key is required",
                provider.display_name()
            )));
        }

        // Claim the publish slot up front so a rate-limited run never hits the network
        let permit = if req.auto_post {
            Some(sessions.reserve_post(id)?)
        } else {
            None
        };

        tracing::info!(session = %id, provider = %provider, model = %model, "pipeline started");

        let conversation = scraper::extract(self.fetcher.as_ref(), url.as_str()).await?;
        let summary = llm::summarize(
            self.completions.as_ref(),
            &conversation.to_prompt_text(),
            provider,
            &model,
            api_key,
        )
        .await?;
        tracing::info!(session = %id, chars = summary.text.len(), "summary received");

        let mut post = postgen::generate(&summary.text, preferences.style, preferences.tone)?;
        if req.rewrite {
            post = postgen::rewrite(self.completions.as_ref(), &post, provider, &model, api_key).await?;
        }
        let visibility = preferences.visibility;
        sessions.record_run(id, ctx.epoch, preferences, post.clone())?;
        tracing::info!(session = %id, chars = post.char_count(), style = %post.style, tone = %post.tone, "post generated");

        let published = match permit {
            Some(permit) => {
                let access_token = permit.confirm()?;
                let confirmation =
                    linkedin::post(self.publisher.as_ref(), &post, visibility, &access_token).await?;
                permit.commit();
                Some(confirmation)
            }
            None => None,
        };

        Ok(RunOutcome {
            url: conversation.url.clone(),
            title: conversation.title.clone(),
            word_count: conversation.word_count(),
            provider,
            model: summary.model,
            summary: summary.text,
            post,
            published,
        })
    }

    /// Publish the post stored by the last run.
    pub async fn publish(
        &self,
        sessions: &SessionStore,
        id: Uuid,
        visibility: Option<Visibility>,
    ) -> Result<PostConfirmation> {
        let permit = sessions.reserve_post(id)?;
        let post = sessions
            .last_post(id)?
            .ok_or_else(|| AppError::InvalidInput("No generated post to publish".to_string()))?;
        let visibility = match visibility {
            Some(v) => v,
            None => sessions.status(id)?.preferences.visibility,
        };

        let access_token = permit.confirm()?;
        let confirmation =
            linkedin::post(self.publisher.as_ref(), &post, visibility, &access_token).await?;
        permit.commit();
        Ok(confirmation)
    }
}
