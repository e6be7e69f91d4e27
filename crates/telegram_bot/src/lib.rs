//! Telegram bot.
//!
//! The bot drives the capture conversation and the command flows. It calls
//! the [`engine::Engine`] in-process, delegates free text and receipt photos
//! to an [`extractor::Extractor`] and pushes every recorded entry to the
//! user's spreadsheet through a [`mirror::MirrorSink`].

use std::{sync::Arc, time::Duration};

use chrono_tz::Tz;
use engine::Engine;
use teloxide::prelude::*;

pub mod capture;
pub mod extractor;
pub mod mirror;

mod handlers;
mod parsing;
mod state;
mod ui;

const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);
const UPDATE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct ConfigParameters {
    allowed_users: Option<Vec<UserId>>,
    engine: Arc<Engine>,
    extractor: Arc<dyn extractor::Extractor>,
    mirror: Arc<dyn mirror::MirrorSink>,
    timezone: Tz,
    confirm_timeout: Duration,
    conversations: capture::Conversations,
    sessions: state::SessionStore,
    throttle: state::Throttle,
}

pub struct Bot {
    token: String,
    parameters: ConfigParameters,
    sync_interval: Duration,
}

impl Bot {
    pub fn builder() -> BotBuilder {
        BotBuilder::default()
    }

    pub async fn run(&self) {
        tracing::info!("Starting telegram bot...");

        let bot = teloxide::Bot::new(&self.token);

        let sweep = tokio::spawn(mirror::run_sweep(
            Arc::clone(&self.parameters.engine),
            Arc::clone(&self.parameters.mirror),
            self.parameters.timezone,
            self.sync_interval,
        ));

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(handlers::handle_message))
            .branch(Update::filter_callback_query().endpoint(handlers::handle_callback));

        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![self.parameters.clone()])
            .default_handler(|upd| async move {
                tracing::warn!("Unhandled update: {:?}", upd);
            })
            .error_handler(LoggingErrorHandler::with_custom_text(
                "An error has occurred in the dispatcher",
            ))
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        sweep.abort();
    }
}

#[derive(Default)]
pub struct BotBuilder {
    token: String,
    allowed_users: Option<Vec<UserId>>,
    engine: Option<Arc<Engine>>,
    extractor: Option<Arc<dyn extractor::Extractor>>,
    mirror: Option<Arc<dyn mirror::MirrorSink>>,
    timezone: Option<Tz>,
    confirm_timeout: Option<Duration>,
    sync_interval: Option<Duration>,
}

impl BotBuilder {
    pub fn token(mut self, token: &str) -> BotBuilder {
        self.token = token.to_string();
        self
    }

    pub fn allowed_users(mut self, allowed_users: Vec<UserId>) -> BotBuilder {
        if !allowed_users.is_empty() {
            self.allowed_users = Some(allowed_users);
        }
        self
    }

    pub fn engine(mut self, engine: Arc<Engine>) -> BotBuilder {
        self.engine = Some(engine);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn extractor::Extractor>) -> BotBuilder {
        self.extractor = Some(extractor);
        self
    }

    pub fn mirror(mut self, mirror: Arc<dyn mirror::MirrorSink>) -> BotBuilder {
        self.mirror = Some(mirror);
        self
    }

    pub fn timezone(mut self, timezone: Tz) -> BotBuilder {
        self.timezone = Some(timezone);
        self
    }

    /// Idle time on the summary before the entry is saved automatically.
    pub fn confirm_timeout(mut self, timeout: Duration) -> BotBuilder {
        self.confirm_timeout = Some(timeout);
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> BotBuilder {
        self.sync_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<Bot, String> {
        tracing::info!("Initializing telegram bot...");
        if self.token.is_empty() {
            return Err("telegram token is required".to_string());
        }
        let engine = self.engine.ok_or("engine is required")?;
        let extractor = self.extractor.unwrap_or_else(|| {
            tracing::warn!("no extractor configured, using the offline parser only");
            Arc::new(extractor::HeuristicExtractor)
        });
        let mirror = self
            .mirror
            .unwrap_or_else(|| Arc::new(mirror::DisabledMirror));

        Ok(Bot {
            token: self.token,
            parameters: ConfigParameters {
                allowed_users: self.allowed_users,
                engine,
                extractor,
                mirror,
                timezone: self.timezone.unwrap_or(chrono_tz::Asia::Jakarta),
                confirm_timeout: self.confirm_timeout.unwrap_or(DEFAULT_CONFIRM_TIMEOUT),
                conversations: capture::Conversations::default(),
                sessions: state::SessionStore::default(),
                throttle: state::Throttle::new(UPDATE_WINDOW),
            },
            sync_interval: self.sync_interval.unwrap_or(DEFAULT_SYNC_INTERVAL),
        })
    }
}
