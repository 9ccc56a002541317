use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use convo_post::{
    api::routes::create_router,
    config::Config,
    error::AppError,
    linkedin::Visibility,
    llm::Provider,
    pipeline::GenerateRequest,
    postgen::{Style, Tone},
    AppState,
};

#[derive(Parser)]
#[command(name = "convo-post")]
#[command(author, version, about = "Turn shared ChatGPT conversations into LinkedIn posts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Generate a post from a shared conversation URL
    Generate {
        /// Shared conversation URL
        url: String,
        /// AI provider: openai, claude or mistral
        #[arg(long, default_value = "openai")]
        provider: Provider,
        /// Model id, provider default when omitted
        #[arg(long)]
        model: Option<String>,
        /// insight, story, announcement or tutorial
        #[arg(long, default_value = "insight")]
        style: Style,
        /// professional, casual, enthusiastic or thoughtful
        #[arg(long, default_value = "professional")]
        tone: Tone,
        /// public or connections
        #[arg(long, default_value = "public")]
        visibility: Visibility,
        /// Publish to LinkedIn using LINKEDIN_ACCESS_TOKEN
        #[arg(long)]
        post: bool,
        /// Let the provider rewrite the templated post
        #[arg(long)]
        rewrite: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await,
        Commands::Generate {
            url,
            provider,
            model,
            style,
            tone,
            visibility,
            post,
            rewrite,
        } => {
            let req = GenerateRequest {
                url,
                provider: Some(provider),
                model,
                style: Some(style),
                tone: Some(tone),
                visibility: Some(visibility),
                auto_post: post,
                rewrite,
            };
            generate(req).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(kind = err.kind(), "{}", err);
            eprintln!("Error: {}", err);
            // Exit codes are all in 1..=8
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

async fn serve() -> Result<(), AppError> {
    let config = Config::load()?;
    let server_addr = config.server_addr;
    let app_state = AppState::from_config(config)?;

    // Sweep abandoned sessions once a minute
    let sessions = app_state.sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let purged = sessions.purge_expired();
            if purged > 0 {
                tracing::info!(purged, remaining = sessions.len(), "purged expired sessions");
            }
        }
    });

    let app = create_router(app_state);

    let listener = TcpListener::bind(server_addr)
        .await
        .map_err(|e| AppError::Config(format!("Failed to bind {}: {}", server_addr, e)))?;

    tracing::info!(addr = %server_addr, "listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Config(format!("Server error: {}", e)))
}

async fn generate(req: GenerateRequest) -> Result<(), AppError> {
    let mut config = Config::load()?;
    // Local runs take their secrets from the environment
    config.seed_sessions_from_env = true;
    let wants_post = req.auto_post;

    let state = AppState::from_config(config)?;
    let sessions = &state.sessions;
    let id = sessions.create()?;

    let outcome = state.pipeline.run(sessions, id, req).await;
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            // Keep the generated text available when only publishing failed
            if let Ok(Some(post)) = sessions.last_post(id) {
                println!("{}", post.text);
            }
            return Err(err);
        }
    };

    println!("{}", outcome.post.text);
    if wants_post {
        match &outcome.published {
            Some(confirmation) => eprintln!(
                "Published to LinkedIn ({})",
                confirmation.post_id.as_deref().unwrap_or("id not returned")
            ),
            None => eprintln!("Post was not published"),
        }
    }
    Ok(())
}
