use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::postgen::{FormattedPost, MAX_POST_CHARS};

const USERINFO_URL: &str = "https://api.linkedin.com/v2/userinfo";
const UGC_POSTS_URL: &str = "https://api.linkedin.com/v2/ugcPosts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Connections,
}

impl Visibility {
    /// Value of `com.linkedin.ugc.MemberNetworkVisibility`.
    pub fn as_api(self) -> &'static str {
        match self {
            Visibility::Public => "PUBLIC",
            Visibility::Connections => "CONNECTIONS",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => f.write_str("public"),
            Visibility::Connections => f.write_str("connections"),
        }
    }
}

impl FromStr for Visibility {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "connections" => Ok(Visibility::Connections),
            other => Err(AppError::InvalidInput(format!(
                "Unknown visibility '{}', expected public or connections",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRequest {
    pub text: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostConfirmation {
    /// Share URN returned by LinkedIn, when it sends one back.
    pub post_id: Option<String>,
}

/// Something that can put a post on LinkedIn.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, request: &PostRequest, access_token: &str) -> Result<PostConfirmation>;
}

/// Client for LinkedIn's UGC publishing API.
#[derive(Clone)]
pub struct LinkedInClient {
    client: Client,
}

impl LinkedInClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn member_id(&self, access_token: &str) -> Result<String> {
        let res = self
            .client
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let json: serde_json::Value = res
            .json()
            .await
            .map_err(|e| AppError::Posting(format!("Invalid profile response: {}", e)))?;

        json["sub"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AppError::Auth("LinkedIn profile did not include a member id".to_string()))
    }
}

#[async_trait]
impl Publisher for LinkedInClient {
    async fn publish(&self, request: &PostRequest, access_token: &str) -> Result<PostConfirmation> {
        let member_id = self.member_id(access_token).await?;

        let res = self
            .client
            .post(UGC_POSTS_URL)
            .bearer_auth(access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&ugc_payload(&member_id, request))
            .send()
            .await
            .map_err(transport_error)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let header_id = res
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let post_id = match header_id {
            Some(id) => Some(id),
            None => res
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v["id"].as_str().map(str::to_string)),
        };

        Ok(PostConfirmation { post_id })
    }
}

fn ugc_payload(member_id: &str, request: &PostRequest) -> serde_json::Value {
    json!({
        "author": format!("urn:li:person:{}", member_id),
        "lifecycleState": "PUBLISHED",
        "specificContent": {
            "com.linkedin.ugc.ShareContent": {
                "shareCommentary": { "text": request.text },
                "shareMediaCategory": "NONE"
            }
        },
        "visibility": {
            "com.linkedin.ugc.MemberNetworkVisibility": request.visibility.as_api()
        }
    })
}

fn transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Posting("LinkedIn request timed out".to_string())
    } else {
        AppError::Posting(err.to_string())
    }
}

fn classify_failure(status: StatusCode, body: &str) -> AppError {
    let snippet: String = body.chars().take(300).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AppError::Auth("LinkedIn rejected the access token".to_string())
        }
        _ => AppError::Posting(format!("LinkedIn returned {}: {}", status, snippet)),
    }
}

/// Publish a formatted post with the given token.
pub async fn post(
    publisher: &dyn Publisher,
    post: &FormattedPost,
    visibility: Visibility,
    access_token: &str,
) -> Result<PostConfirmation> {
    let access_token = access_token.trim();
    if access_token.is_empty() {
        return Err(AppError::Auth("LinkedIn access token is required".to_string()));
    }
    if post.text.trim().is_empty() {
        return Err(AppError::InvalidInput("Post text is empty".to_string()));
    }
    if post.char_count() > MAX_POST_CHARS {
        return Err(AppError::InvalidInput(format!(
            "Post is {} characters, LinkedIn allows {}",
            post.char_count(),
            MAX_POST_CHARS
        )));
    }

    let request = PostRequest {
        text: post.text.clone(),
        visibility,
    };
    let confirmation = publisher.publish(&request, access_token).await?;
    tracing::info!(
        visibility = %visibility,
        post_id = confirmation.post_id.as_deref().unwrap_or("unknown"),
        "published post to LinkedIn"
    );
    Ok(confirmation)
}
