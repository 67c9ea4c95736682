//! Serves the refresh and logout endpoints for a single demo user
//!
//! A token pair for `demo` is printed at startup so a client can be pointed at
//! `http://127.0.0.1:8080/` right away.

use std::{sync::Arc, time::Duration};

use tessera_store::{
    Grants, Hs256Signer, InMemoryRefreshTokenStore, RefreshTokenService, RefreshTokenStore,
    StaticDirectory, UserId,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let directory = StaticDirectory::new().with_subject(
        UserId::from_static("demo"),
        Grants {
            roles: vec!["member".to_owned()],
            permissions: Vec::new(),
        },
    );
    let store = Arc::new(InMemoryRefreshTokenStore::new());
    let service = Arc::new(RefreshTokenService::new(
        store.clone(),
        Arc::new(Hs256Signer::new(b"demo secret, replace before deploying")),
        Arc::new(directory),
    ));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Err(error) = store.sweep_expired().await {
                tracing::warn!(error = (&error as &dyn std::error::Error), "sweep failed");
            }
        }
    });

    let tokens = service.issue(&UserId::from_static("demo")).await?;
    println!("access token:  {:#}", tokens.access_token);
    println!("refresh token: {:#}", tokens.refresh_token);
    println!("Press Ctrl+C to exit");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
    axum::serve(listener, tessera_axum::router(service)).await?;
    Ok(())
}
