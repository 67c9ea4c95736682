use std::{sync::Arc, time::Duration};

use clap::Parser;
use tessera_tokens::{
    session::FileSession, sources::HttpRefreshSource, RefreshCoordinator, SessionEvent,
    TokenEvaluator, TokenSession, TokenStatus,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// Base URL of the authority serving `/auth/refresh-token`
    #[clap(short, long, env)]
    authority_url: reqwest::Url,

    /// The local file holding the session's tokens
    #[clap(short = 'f', long, env, default_value = ".session.json")]
    session_file: std::path::PathBuf,

    /// Seconds between checks of the access token
    #[clap(short, long, env, default_value_t = 5)]
    interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let session = Arc::new(FileSession::new(opts.session_file));
    let source = HttpRefreshSource::new(opts.authority_url);
    let coordinator = RefreshCoordinator::new(Arc::new(source), session.clone());
    let evaluator = TokenEvaluator::new();
    let threshold = coordinator.config().threshold();

    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::Refreshed { expires_at } => {
                    tracing::info!(expires_at = expires_at.map(|e| e.0), "session refreshed")
                }
                SessionEvent::LogoutRequired { reason } => {
                    tracing::error!(?reason, "session ended, sign in again")
                }
                SessionEvent::LoggedOut => tracing::info!("logged out"),
            }
        }
    });

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        let token = match session.access_token().await {
            Some(token) => token,
            None => {
                tracing::warn!("no session, nothing to refresh");
                continue;
            }
        };

        let status = evaluator.status(&token, threshold);
        let expires_at = evaluator.expires_at(&token).map(|e| e.0);
        match status {
            TokenStatus::Fresh => tracing::debug!(?status, expires_at, "checked token"),
            TokenStatus::ExpiringSoon | TokenStatus::Expired => {
                tracing::warn!(?status, expires_at, "checked token, refreshing");
                coordinator.refresh_if_needed().await;
            }
        }
    }
}
