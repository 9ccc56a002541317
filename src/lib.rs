pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod linkedin;
pub mod llm;
pub mod pipeline;
pub mod postgen;
pub mod scraper;
pub mod session;

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::linkedin::LinkedInClient;
use crate::llm::HttpCompletionClient;
use crate::pipeline::Pipeline;
use crate::scraper::HttpFetcher;
use crate::session::{Credentials, SessionPolicy, SessionStore};

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionStore,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Wire the HTTP-backed pipeline and a session store from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let pipeline = Pipeline::new(
            Arc::new(HttpFetcher::new(config.fetch_timeout)?),
            Arc::new(HttpCompletionClient::new(
                config.provider_timeout,
                config.site_url.clone(),
                config.site_name.clone(),
            )?),
            Arc::new(LinkedInClient::new(config.publish_timeout)?),
        );
        let seed = if config.seed_sessions_from_env {
            config.env_credentials.clone()
        } else {
            Credentials::default()
        };
        let sessions = session_store(&config, Arc::new(SystemClock)).with_seed(seed);

        Ok(Self::new(config, sessions, pipeline))
    }

    pub fn new(config: Config, sessions: SessionStore, pipeline: Pipeline) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            pipeline: Arc::new(pipeline),
        }
    }
}

/// An empty session store following the configured timeout and cooldown.
pub fn session_store(config: &Config, clock: Arc<dyn Clock>) -> SessionStore {
    SessionStore::new(
        clock,
        SessionPolicy {
            timeout: config.session_timeout,
            post_cooldown: config.post_cooldown,
            max_sessions: config.max_sessions,
        },
    )
}
