use engine::EngineError;
use teloxide::{
    net::Download,
    prelude::*,
    types::{CallbackQuery, ChatId, MessageId, User},
};

use crate::{
    ConfigParameters,
    capture::{Button, CaptureKind},
    extractor::ExtractRequest,
    parsing::{Command, parse_command},
    state::Admission,
    ui,
};

mod capture;
mod flows;
mod overview;

pub(crate) async fn handle_message(
    bot: Bot,
    msg: Message,
    cfg: ConfigParameters,
) -> ResponseResult<()> {
    if !is_allowed(&cfg, msg.from.as_ref()) {
        return Ok(());
    }

    let Some(external_id) = msg.from.as_ref().and_then(external_id) else {
        bot.send_message(msg.chat.id, "Unable to identify the user.")
            .await?;
        return Ok(());
    };
    let chat_id = msg.chat.id;

    if let Admission::Limited { warn } = cfg.throttle.admit(external_id).await {
        if warn {
            bot.send_message(chat_id, ui::TOO_FAST).await?;
        }
        return Ok(());
    }

    if let Some(cmd) = msg.text().and_then(parse_command) {
        return handle_command(&bot, chat_id, external_id, &cfg, cmd).await;
    }

    if let Some(photos) = msg.photo() {
        // Telegram lists sizes ascending; the last one is the original.
        let Some(photo) = photos.last() else {
            return Ok(());
        };
        leave_flows(&cfg, chat_id).await;
        let file = bot.get_file(photo.file.id.clone()).await?;
        let mut image = Vec::new();
        if let Err(err) = bot.download_file(&file.path, &mut image).await {
            tracing::warn!(external_id, "photo download failed: {err}");
            bot.send_message(chat_id, "I couldn't download that photo, please try again.")
                .await?;
            return Ok(());
        }
        let request = ExtractRequest {
            text: msg.caption().map(str::to_string),
            image: Some(image),
            known_methods: Vec::new(),
        };
        return capture::start(&bot, &cfg, chat_id, external_id, CaptureKind::Expense, request, true)
            .await;
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };

    if let Some(pending) = cfg.sessions.take_pending(chat_id).await {
        return flows::handle_pending_text(&bot, chat_id, external_id, &cfg, pending, text).await;
    }
    if let Some(conversation) = cfg.conversations.get(chat_id).await {
        return capture::on_text(&bot, &cfg, conversation, text).await;
    }

    let request = ExtractRequest {
        text: Some(text.to_string()),
        ..ExtractRequest::default()
    };
    capture::start(&bot, &cfg, chat_id, external_id, CaptureKind::Expense, request, false).await
}

async fn handle_command(
    bot: &Bot,
    chat_id: ChatId,
    external_id: i64,
    cfg: &ConfigParameters,
    cmd: Command,
) -> ResponseResult<()> {
    // Any command abandons the flow or capture in progress.
    let was_busy = leave_flows(cfg, chat_id).await;

    match cmd {
        Command::Start => {
            if let Err(err) = cfg.engine.find_or_create_user(external_id).await {
                return report_engine_error(bot, chat_id, err).await;
            }
            bot.send_message(chat_id, ui::welcome_text()).await?;
        }
        Command::Help | Command::Unknown => {
            bot.send_message(chat_id, ui::help_text()).await?;
        }
        Command::Cancel => {
            let text = if was_busy {
                "⛔ Cancelled."
            } else {
                "Nothing to cancel."
            };
            bot.send_message(chat_id, text).await?;
        }
        Command::Income { text: Some(text) } => {
            let request = ExtractRequest {
                text: Some(text),
                ..ExtractRequest::default()
            };
            capture::start(bot, cfg, chat_id, external_id, CaptureKind::Income, request, false)
                .await?;
        }
        Command::Income { text: None } => {
            bot.send_message(
                chat_id,
                "Send the income with the command, e.g. `/income salary 5jt`.",
            )
            .await?;
        }
        Command::Transfer => flows::start_transfer(bot, chat_id, external_id, cfg).await?,
        Command::Debt => flows::start_debt(bot, chat_id, cfg).await?,
        Command::PayDebt => flows::start_pay_debt(bot, chat_id, external_id, cfg).await?,
        Command::SetBalance => flows::start_set_balance(bot, chat_id, external_id, cfg).await?,
        Command::AddMethod => flows::start_add_method(bot, chat_id, cfg).await?,
        Command::Reset => flows::start_reset(bot, chat_id, cfg).await?,
        Command::Balance => overview::show_balances(bot, chat_id, external_id, cfg).await?,
        Command::Debts => overview::show_debts(bot, chat_id, external_id, cfg).await?,
        Command::Report { args } => {
            overview::show_report(bot, chat_id, external_id, cfg, args.as_deref()).await?
        }
        Command::ConnectSheet { args } => {
            overview::connect_sheet(bot, chat_id, external_id, cfg, args.as_deref()).await?
        }
        Command::DisconnectSheet => {
            overview::disconnect_sheet(bot, chat_id, external_id, cfg).await?
        }
    }
    Ok(())
}

pub(crate) async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    cfg: ConfigParameters,
) -> ResponseResult<()> {
    if !is_allowed(&cfg, Some(&q.from)) {
        return Ok(());
    }

    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let chat_id = message.chat().id;
    let message_id = message.id();
    let Some(external_id) = external_id(&q.from) else {
        return Ok(());
    };

    if let Admission::Limited { warn } = cfg.throttle.admit(external_id).await {
        let mut answer = bot.answer_callback_query(q.id.clone());
        if warn {
            answer = answer.text(ui::TOO_FAST);
        }
        let _ = answer.await;
        return Ok(());
    }
    let _ = bot.answer_callback_query(q.id.clone()).await;

    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };

    if let Some(button) = Button::parse(data) {
        capture::on_button(&bot, &cfg, chat_id, message_id, button).await
    } else if let Some(choice) = data.strip_prefix("report:") {
        overview::on_report_button(&bot, chat_id, message_id, external_id, &cfg, choice).await
    } else {
        flows::handle_flow_callback(&bot, chat_id, message_id, external_id, &cfg, data).await
    }
}

/// Drop any pending flow and active capture of the chat. Returns whether
/// something was in progress.
async fn leave_flows(cfg: &ConfigParameters, chat_id: ChatId) -> bool {
    let pending = cfg.sessions.take_pending(chat_id).await.is_some();
    let capture = match cfg.conversations.remove(chat_id).await {
        Some(conversation) => {
            conversation.finish().await;
            true
        }
        None => false,
    };
    pending || capture
}

/// Edit `message_id` in place, falling back to a new message.
async fn edit_or_send(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    text: String,
    kb: Option<teloxide::types::InlineKeyboardMarkup>,
) -> ResponseResult<MessageId> {
    if let Some(message_id) = message_id {
        let mut edit = bot.edit_message_text(chat_id, message_id, text.clone());
        if let Some(kb) = kb.clone() {
            edit = edit.reply_markup(kb);
        }
        if edit.await.is_ok() {
            return Ok(message_id);
        }
    }

    let mut send = bot.send_message(chat_id, text);
    if let Some(kb) = kb {
        send = send.reply_markup(kb);
    }
    Ok(send.await?.id)
}

fn is_allowed(cfg: &ConfigParameters, from: Option<&User>) -> bool {
    let Some(from) = from else {
        return false;
    };
    match &cfg.allowed_users {
        None => true,
        Some(ids) => ids.contains(&from.id),
    }
}

fn external_id(user: &User) -> Option<i64> {
    i64::try_from(user.id.0).ok()
}

fn user_message_for_engine_error(err: &EngineError) -> String {
    match err {
        EngineError::InsufficientFunds(msg) => format!("❌ Insufficient funds: {msg}"),
        EngineError::KeyNotFound(_) => "❌ Not found.".to_string(),
        EngineError::ExistingKey(name) => format!("❌ \"{name}\" already exists."),
        EngineError::AlreadyPaid(_) => "ℹ️ That debt is already paid.".to_string(),
        EngineError::InvalidAmount(msg) | EngineError::InvalidInput(msg) => format!("❌ {msg}"),
        EngineError::Unauthorized(_) | EngineError::Database(_) => {
            "❌ Sorry, something went wrong. Please try again later.".to_string()
        }
    }
}

async fn report_engine_error(bot: &Bot, chat_id: ChatId, err: EngineError) -> ResponseResult<()> {
    if matches!(err, EngineError::Database(_)) {
        tracing::error!(chat_id = %chat_id, "engine failure: {err}");
    } else {
        tracing::info!(chat_id = %chat_id, "request rejected: {err}");
    }
    bot.send_message(chat_id, user_message_for_engine_error(&err))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debt_errors_get_specific_messages() {
        assert!(
            user_message_for_engine_error(&EngineError::InsufficientFunds(
                "Cash has Rp 0".to_string()
            ))
            .contains("Insufficient funds")
        );
        assert!(
            user_message_for_engine_error(&EngineError::AlreadyPaid("debt 1".to_string()))
                .contains("already paid")
        );
        assert_eq!(
            user_message_for_engine_error(&EngineError::KeyNotFound("debt 9".to_string())),
            "❌ Not found."
        );
    }

    #[test]
    fn database_errors_are_not_leaked() {
        let err = EngineError::Database(sea_orm::DbErr::Custom("disk I/O".to_string()));
        assert!(!user_message_for_engine_error(&err).contains("disk"));
    }
}
