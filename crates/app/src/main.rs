use std::{sync::Arc, time::Duration};

use chrono_tz::Tz;
use migration::{Migrator, MigratorTrait};
use settings::Database;
use teloxide::types::UserId;

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;
    let mut tasks = tokio::task::JoinSet::new();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "dompet={level},telegram_bot={level},server={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let db = parse_database(&settings.database).await?;
    let webhook_secret = settings
        .server
        .as_ref()
        .and_then(|server| server.webhook_secret.as_deref());
    let engine = Arc::new(
        engine::Engine::builder()
            .database(db)
            .webhook_secret(webhook_secret)
            .build()
            .await?,
    );

    let timezone: Tz = match &settings.telegram {
        Some(telegram) => telegram
            .timezone
            .parse()
            .map_err(|err| format!("invalid timezone {}: {err}", telegram.timezone))?,
        None => chrono_tz::Asia::Jakarta,
    };

    if let Some(server) = settings.server {
        let state = server::ServerState {
            engine: Arc::clone(&engine),
            timezone,
        };
        tasks.spawn(async move {
            tracing::info!("Found server settings...");
            let bind = server.bind.unwrap_or_else(|| "127.0.0.1".to_string());
            server::run(state, &bind, server.port).await;
        });
    }

    if let Some(telegram) = settings.telegram {
        let extractor: Option<Arc<dyn telegram_bot::extractor::Extractor>> =
            settings.extractor.map(|cfg| {
                let remote = telegram_bot::extractor::HttpExtractor::new(
                    &cfg.base_url,
                    &cfg.api_key,
                    &cfg.model,
                );
                Arc::new(telegram_bot::extractor::FallbackExtractor::new(remote))
                    as Arc<dyn telegram_bot::extractor::Extractor>
            });
        let mirror: Option<Arc<dyn telegram_bot::mirror::MirrorSink>> =
            settings.sheets.map(|cfg| {
                let sheets = telegram_bot::mirror::SheetsMirror::with_endpoints(
                    &cfg.client_id,
                    &cfg.client_secret,
                    cfg.token_url
                        .as_deref()
                        .unwrap_or(telegram_bot::mirror::DEFAULT_TOKEN_URL),
                    cfg.api_base
                        .as_deref()
                        .unwrap_or(telegram_bot::mirror::DEFAULT_API_BASE),
                );
                Arc::new(sheets) as Arc<dyn telegram_bot::mirror::MirrorSink>
            });
        let engine = Arc::clone(&engine);

        tasks.spawn(async move {
            tracing::info!("Found telegram settings...");
            let mut builder = telegram_bot::Bot::builder()
                .token(&telegram.token)
                .allowed_users(telegram.allowed_users.into_iter().map(UserId).collect())
                .engine(engine)
                .timezone(timezone)
                .confirm_timeout(Duration::from_secs(telegram.confirm_timeout_secs))
                .sync_interval(Duration::from_secs(telegram.sync_interval_secs));
            if let Some(extractor) = extractor {
                builder = builder.extractor(extractor);
            }
            if let Some(mirror) = mirror {
                builder = builder.mirror(mirror);
            }
            match builder.build() {
                Ok(bot) => bot.run().await,
                Err(err) => tracing::error!("failed to initialize telegram bot: {err}"),
            }
        });
    }

    if tasks.is_empty() {
        tracing::warn!("neither [server] nor [telegram] is configured, nothing to run");
    }

    while tasks.join_next().await.is_some() {
        tasks.shutdown().await;
    }

    Ok(())
}

async fn parse_database(
    config: &Database,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let url = match config {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{}?mode=rwc", path),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
