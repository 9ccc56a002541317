#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

use convo_post::clock::ManualClock;
use convo_post::config::Config;
use convo_post::error::{AppError, Result};
use convo_post::linkedin::{PostConfirmation, PostRequest, Publisher};
use convo_post::llm::{CompletionProvider, CompletionRequest};
use convo_post::pipeline::Pipeline;
use convo_post::scraper::PageFetcher;
use convo_post::session::SessionStore;
use convo_post::{session_store, AppState};

pub const SHARE_URL: &str = "https://chatgpt.com/share/6620e0f1-abcd-4e2f-9a1b-123456789abc";

pub const SHARE_PAGE: &str = r#"
<html>
  <head><title>Designing a rate limiter</title></head>
  <body>
    <div data-message-author-role="user"><div>How should I rate limit posting in a web app?</div></div>
    <div data-message-author-role="assistant">
      <div class="markdown prose">
        <p>Track the last successful post per session and reject attempts inside the cooldown.</p>
        <ul><li>Check before any network call.</li><li>Only start the cooldown after success.</li></ul>
      </div>
    </div>
  </body>
</html>
"#;

#[derive(Default)]
pub struct FakeFetcher {
    pub calls: AtomicUsize,
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, _url: &Url) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SHARE_PAGE.to_string())
    }
}

#[derive(Default)]
pub struct FakeCompletions {
    pub calls: AtomicUsize,
}

#[async_trait]
impl CompletionProvider for FakeCompletions {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if request.prompt.starts_with("Rewrite") {
            return Ok(format!("**Rewritten** post number {}\n\n#AI #ChatGPT", n));
        }
        Ok("## Rate limiting\n\nPer-session cooldowns keep automated posting polite.\n\n\
            - Check the cooldown before calling out\n\
            - Start the clock only after a successful post"
            .to_string())
    }
}

pub struct FakePublisher {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakePublisher {
    pub fn ok() -> Self {
        Self { calls: AtomicUsize::new(0), fail: false }
    }

    pub fn failing() -> Self {
        Self { calls: AtomicUsize::new(0), fail: true }
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, _request: &PostRequest, _token: &str) -> Result<PostConfirmation> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::Posting("LinkedIn returned 422: duplicate".to_string()));
        }
        Ok(PostConfirmation {
            post_id: Some(format!("urn:li:share:{}", n + 1)),
        })
    }
}

pub struct Harness {
    pub clock: ManualClock,
    pub fetcher: Arc<FakeFetcher>,
    pub completions: Arc<FakeCompletions>,
    pub publisher: Arc<FakePublisher>,
    pub sessions: SessionStore,
    pub pipeline: Pipeline,
    pub config: Config,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_publisher(FakePublisher::ok())
    }

    pub fn with_publisher(publisher: FakePublisher) -> Self {
        let config = Config::from_lookup(|_| None).expect("default config");
        let clock = ManualClock::default();
        let fetcher = Arc::new(FakeFetcher::default());
        let completions = Arc::new(FakeCompletions::default());
        let publisher = Arc::new(publisher);
        let sessions = session_store(&config, Arc::new(clock.clone()));
        let pipeline = Pipeline::new(fetcher.clone(), completions.clone(), publisher.clone());

        Self {
            clock,
            fetcher,
            completions,
            publisher,
            sessions,
            pipeline,
            config,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.config.clone(), self.sessions.clone(), self.pipeline.clone())
    }

    pub fn network_calls(&self) -> (usize, usize, usize) {
        (
            self.fetcher.calls.load(Ordering::SeqCst),
            self.completions.calls.load(Ordering::SeqCst),
            self.publisher.calls.load(Ordering::SeqCst),
        )
    }
}
