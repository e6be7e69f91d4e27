//! Outbound mirror: journal entries appended to the user's spreadsheet.
//!
//! Pushes are best-effort. A failed push leaves the entries unsynced and the
//! periodic sweep retries them later.

use std::{sync::Arc, time::Duration};

use chrono_tz::Tz;
use engine::{Engine, EngineError, MirrorLink, Transaction};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::extractor::BoxFuture;

const SHEET_RANGE: &str = "Transactions!A:G";
const SWEEP_BATCH: u64 = 50;
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";

/// One spreadsheet row: grouping id, description, amount, merchant, method,
/// date, type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorRow {
    pub grouping_id: String,
    pub description: String,
    pub amount: i64,
    pub merchant: String,
    pub method: String,
    pub date: String,
    pub kind: String,
}

impl MirrorRow {
    pub fn new(tx: &Transaction, timezone: Tz) -> Self {
        Self {
            grouping_id: tx.grouping_id.clone(),
            description: tx.description.clone(),
            amount: tx.amount.units(),
            merchant: tx.merchant.clone(),
            method: tx.method.clone(),
            date: tx
                .occurred_at
                .with_timezone(&timezone)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            kind: tx.kind.as_str().to_string(),
        }
    }

    fn cells(&self) -> serde_json::Value {
        json!([
            self.grouping_id,
            self.description,
            self.amount,
            self.merchant,
            self.method,
            self.date,
            self.kind
        ])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{status}: {message}")]
    Server { status: StatusCode, message: String },
    #[error("malformed mirror reply: {0}")]
    Malformed(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub trait MirrorSink: Send + Sync + 'static {
    fn append<'a>(
        &'a self,
        link: &'a MirrorLink,
        rows: &'a [MirrorRow],
    ) -> BoxFuture<'a, Result<(), MirrorError>>;

    /// `false` when pushes can never succeed, so entries stay unsynced
    /// without anyone trying.
    fn enabled(&self) -> bool {
        true
    }
}

/// No spreadsheet integration configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledMirror;

impl MirrorSink for DisabledMirror {
    fn append<'a>(
        &'a self,
        _link: &'a MirrorLink,
        _rows: &'a [MirrorRow],
    ) -> BoxFuture<'a, Result<(), MirrorError>> {
        Box::pin(async { Ok(()) })
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// Google Sheets through its REST API. The stored credential is a refresh
/// token exchanged for an access token on every push.
#[derive(Clone, Debug)]
pub struct SheetsMirror {
    client: Client,
    client_id: String,
    client_secret: String,
    token_url: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: String,
}

impl SheetsMirror {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self::with_endpoints(client_id, client_secret, DEFAULT_TOKEN_URL, DEFAULT_API_BASE)
    }

    pub fn with_endpoints(
        client_id: &str,
        client_secret: &str,
        token_url: &str,
        api_base: &str,
    ) -> Self {
        Self {
            client: Client::new(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token_url: token_url.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn access_token(&self, refresh_token: &str) -> Result<String, MirrorError> {
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(server_error(status, resp).await);
        }
        let reply: TokenReply = resp
            .json()
            .await
            .map_err(|err| MirrorError::Malformed(err.to_string()))?;
        Ok(reply.access_token)
    }

    async fn push(&self, link: &MirrorLink, rows: &[MirrorRow]) -> Result<(), MirrorError> {
        let token = self.access_token(&link.credential).await?;
        let url = format!(
            "{}/spreadsheets/{}/values/{}:append",
            self.api_base, link.document_id, SHEET_RANGE
        );
        let values: Vec<_> = rows.iter().map(MirrorRow::cells).collect();
        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({ "values": values }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(server_error(status, resp).await);
        }
        Ok(())
    }
}

impl MirrorSink for SheetsMirror {
    fn append<'a>(
        &'a self,
        link: &'a MirrorLink,
        rows: &'a [MirrorRow],
    ) -> BoxFuture<'a, Result<(), MirrorError>> {
        Box::pin(self.push(link, rows))
    }
}

async fn server_error(status: StatusCode, resp: reqwest::Response) -> MirrorError {
    let message = resp
        .text()
        .await
        .unwrap_or_else(|_| "mirror error".to_string());
    MirrorError::Server { status, message }
}

/// Push freshly written entries of one user and flag them synced.
///
/// Silently does nothing when the user has no linked document. Returns how
/// many entries were marked synced.
pub async fn push_entries(
    engine: &Engine,
    mirror: &dyn MirrorSink,
    external_id: i64,
    entries: &[Transaction],
    timezone: Tz,
) -> Result<u64, MirrorError> {
    if entries.is_empty() || !mirror.enabled() {
        return Ok(0);
    }
    let Some(link) = engine
        .user(external_id)
        .await?
        .and_then(|user| user.mirror_link())
    else {
        tracing::debug!(external_id, "no linked spreadsheet, push skipped");
        return Ok(0);
    };
    push_linked(engine, mirror, external_id, &link, entries, timezone).await
}

async fn push_linked(
    engine: &Engine,
    mirror: &dyn MirrorSink,
    external_id: i64,
    link: &MirrorLink,
    entries: &[Transaction],
    timezone: Tz,
) -> Result<u64, MirrorError> {
    let _guard = engine.lock_mirror_pushes(external_id).await;
    let ids: Vec<i64> = entries.iter().map(|tx| tx.id).collect();
    let unsynced = engine.still_unsynced(&ids).await?;
    append_and_mark(engine, mirror, external_id, link, &unsynced, timezone).await
}

/// Caller holds the user's push lock and has just re-read `entries`.
async fn append_and_mark(
    engine: &Engine,
    mirror: &dyn MirrorSink,
    external_id: i64,
    link: &MirrorLink,
    entries: &[Transaction],
    timezone: Tz,
) -> Result<u64, MirrorError> {
    if entries.is_empty() {
        return Ok(0);
    }
    let rows: Vec<MirrorRow> = entries.iter().map(|tx| MirrorRow::new(tx, timezone)).collect();
    mirror.append(link, &rows).await?;
    let ids: Vec<i64> = entries.iter().map(|tx| tx.id).collect();
    let marked = engine.mark_synced(&ids).await?;
    tracing::info!(external_id, rows = rows.len(), "entries pushed to mirror");
    Ok(marked)
}

/// Retry every unsynced entry of every linked user once.
pub async fn sweep_once(
    engine: &Engine,
    mirror: &dyn MirrorSink,
    timezone: Tz,
) -> Result<u64, MirrorError> {
    if !mirror.enabled() {
        return Ok(0);
    }
    let mut synced = 0;
    for pending in engine.pending_mirror_pushes(SWEEP_BATCH).await? {
        let external_id = pending.user.external_id;
        match sweep_user(engine, mirror, external_id, &pending.link, timezone).await {
            Ok(marked) => synced += marked,
            Err(err) => {
                tracing::warn!(external_id, "mirror sweep push failed: {err}");
            }
        }
    }
    Ok(synced)
}

async fn sweep_user(
    engine: &Engine,
    mirror: &dyn MirrorSink,
    external_id: i64,
    link: &MirrorLink,
    timezone: Tz,
) -> Result<u64, MirrorError> {
    let _guard = engine.lock_mirror_pushes(external_id).await;
    let entries = engine.unsynced_transactions(external_id, SWEEP_BATCH).await?;
    append_and_mark(engine, mirror, external_id, link, &entries, timezone).await
}

/// Periodic sweep; runs until the task is dropped.
pub async fn run_sweep(
    engine: Arc<Engine>,
    mirror: Arc<dyn MirrorSink>,
    timezone: Tz,
    every: Duration,
) {
    if !mirror.enabled() {
        tracing::info!("mirror disabled, sweep not started");
        return;
    }
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match sweep_once(&engine, mirror.as_ref(), timezone).await {
            Ok(0) => {}
            Ok(synced) => tracing::info!(synced, "mirror sweep completed"),
            Err(err) => tracing::error!("mirror sweep failed: {err}"),
        }
    }
}
