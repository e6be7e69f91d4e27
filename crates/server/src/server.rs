use axum::{
    Router,
    routing::{get, post},
};
use axum_extra::headers::{Error as AxumError, Header};
use chrono_tz::Tz;

use std::sync::Arc;

use crate::mirror_sync;
use engine::Engine;

static WEBHOOK_SECRET_HEADER: axum::http::HeaderName =
    axum::http::HeaderName::from_static("x-webhook-secret");

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
    /// Zone used for mirror dates without an offset.
    pub timezone: Tz,
}

/// `TypedHeader` for the mirror webhook secret
///
/// Mirror deliveries carry the shared secret in "x-webhook-secret".
#[derive(Debug)]
pub(crate) struct WebhookSecret(pub(crate) String);

impl Header for WebhookSecret {
    fn name() -> &'static axum::http::HeaderName {
        &WEBHOOK_SECRET_HEADER
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, AxumError>
    where
        Self: Sized,
        I: Iterator<Item = &'i axum::http::HeaderValue>,
    {
        let value = values.next().ok_or_else(AxumError::invalid)?;
        let Ok(value) = value.to_str() else {
            return Err(AxumError::invalid());
        };

        Ok(WebhookSecret(value.trim().to_string()))
    }

    fn encode<E: Extend<axum::http::HeaderValue>>(&self, values: &mut E) {
        match axum::http::HeaderValue::from_str(&self.0) {
            Ok(value) => values.extend(std::iter::once(value)),
            Err(_) => tracing::error!("failed to encode x-webhook-secret header"),
        }
    }
}

async fn health() -> &'static str {
    "Bot is running"
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/webhook/mirror-sync", post(mirror_sync::sync))
        .route("/webhook/sheets-sync", post(mirror_sync::sync))
        .with_state(state)
}

pub async fn run(state: ServerState, bind: &str, port: u16) {
    let listener = match tokio::net::TcpListener::bind((bind, port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("failed to bind server listener on {bind}:{port}: {err}");
            return;
        }
    };
    if let Err(err) = run_with_listener(state, listener).await {
        tracing::error!("server failed: {err}");
    }
}

pub async fn run_with_listener(
    state: ServerState,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(state)).await
}

pub fn spawn_with_listener(
    state: ServerState,
    listener: tokio::net::TcpListener,
) -> Result<std::net::SocketAddr, std::io::Error> {
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = run_with_listener(state, listener).await {
            tracing::error!("server failed: {err}");
        }
    });

    Ok(addr)
}
