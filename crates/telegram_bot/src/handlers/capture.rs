use std::{collections::VecDeque, sync::Arc};

use chrono::Utc;
use engine::PaymentMethod;
use teloxide::{
    prelude::*,
    types::{ChatAction, ChatId, MessageId},
};

use crate::{
    ConfigParameters,
    capture::{
        Button, CaptureKind, Claim, Conversation, Draft, Effect, Event, FinalizeDeps, Press,
        finalize, schedule_auto_finalize,
    },
    extractor::ExtractRequest,
    ui,
};

use super::{edit_or_send, report_engine_error};

const EXTRACT_FAILED: &str =
    "⚠️ I couldn't read that right now. Try again, or use a simple format like `nasi goreng 15k`.";

fn method_names(catalog: &[PaymentMethod]) -> Vec<String> {
    catalog.iter().map(|m| m.name.clone()).collect()
}

/// Parse step: run the extractor and open a conversation.
pub(super) async fn start(
    bot: &Bot,
    cfg: &ConfigParameters,
    chat_id: ChatId,
    external_id: i64,
    kind: CaptureKind,
    mut request: ExtractRequest,
    force_method_prompt: bool,
) -> ResponseResult<()> {
    let catalog = match cfg.engine.payment_methods(external_id).await {
        Ok(catalog) => catalog,
        Err(err) => return report_engine_error(bot, chat_id, err).await,
    };
    request.known_methods = method_names(&catalog);

    let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
    let candidates = match cfg.extractor.extract(&request).await {
        Ok(candidates) => candidates,
        Err(err) => {
            tracing::warn!(external_id, "extraction failed: {err}");
            bot.send_message(chat_id, EXTRACT_FAILED).await?;
            return Ok(());
        }
    };

    let (draft, effects) = match Draft::begin(kind, candidates, &catalog, force_method_prompt) {
        Ok(started) => started,
        Err(abort) => {
            bot.send_message(chat_id, ui::abort_text(abort)).await?;
            return Ok(());
        }
    };

    let conversation = Conversation::new(chat_id, external_id, draft);
    if let Some(previous) = cfg.conversations.insert(Arc::clone(&conversation)).await {
        previous.finish().await;
    }
    tracing::debug!(external_id, "capture started");
    run_effects(bot, cfg, &conversation, &catalog, effects, None).await
}

pub(super) async fn on_text(
    bot: &Bot,
    cfg: &ConfigParameters,
    conversation: Arc<Conversation>,
    text: &str,
) -> ResponseResult<()> {
    let catalog = match cfg.engine.payment_methods(conversation.external_id).await {
        Ok(catalog) => catalog,
        Err(err) => return report_engine_error(bot, conversation.chat_id, err).await,
    };
    let Some(effects) = conversation.dispatch(Event::Text(text), &catalog).await else {
        return Ok(());
    };
    run_effects(bot, cfg, &conversation, &catalog, effects, None).await
}

pub(super) async fn on_button(
    bot: &Bot,
    cfg: &ConfigParameters,
    chat_id: ChatId,
    message_id: MessageId,
    button: Button,
) -> ResponseResult<()> {
    let Some(conversation) = cfg.conversations.get(chat_id).await else {
        bot.send_message(chat_id, ui::NO_LONGER_ACTIVE).await?;
        return Ok(());
    };
    let catalog = match cfg.engine.payment_methods(conversation.external_id).await {
        Ok(catalog) => catalog,
        Err(err) => return report_engine_error(bot, chat_id, err).await,
    };
    match conversation.press(message_id, button, &catalog).await {
        Press::Effects(effects) => {
            run_effects(bot, cfg, &conversation, &catalog, effects, Some(message_id)).await
        }
        Press::Saved => {
            bot.send_message(chat_id, ui::ALREADY_SAVED).await?;
            Ok(())
        }
        Press::Stale => {
            bot.send_message(chat_id, ui::NO_LONGER_ACTIVE).await?;
            Ok(())
        }
    }
}

async fn show(
    bot: &Bot,
    conversation: &Conversation,
    origin: Option<MessageId>,
    text: String,
    kb: teloxide::types::InlineKeyboardMarkup,
) -> ResponseResult<()> {
    let id = edit_or_send(bot, conversation.chat_id, origin, text, Some(kb)).await?;
    conversation.set_surface(Some(id)).await;
    Ok(())
}

async fn run_effects(
    bot: &Bot,
    cfg: &ConfigParameters,
    conversation: &Arc<Conversation>,
    catalog: &[PaymentMethod],
    effects: Vec<Effect>,
    origin: Option<MessageId>,
) -> ResponseResult<()> {
    let chat_id = conversation.chat_id;
    let mut queue: VecDeque<Effect> = effects.into();
    while let Some(effect) = queue.pop_front() {
        match effect {
            Effect::Notice(notice) => {
                bot.send_message(chat_id, ui::notice_text(notice)).await?;
            }
            Effect::AskMerchant => {
                bot.send_message(chat_id, ui::ASK_MERCHANT).await?;
            }
            Effect::AskItems => {
                bot.send_message(chat_id, ui::ASK_ITEMS).await?;
            }
            Effect::ShowPaymentMenu(level) => {
                let (text, kb) = ui::render_payment_menu(catalog, level);
                show(bot, conversation, origin, text, kb).await?;
            }
            Effect::ShowConfirm => {
                let draft = conversation.draft().await;
                let (text, kb) = ui::render_confirm(&draft, cfg.timezone, Utc::now());
                show(bot, conversation, origin, text, kb).await?;
                arm_timer(bot, cfg, conversation).await;
            }
            Effect::ShowEditMenu => {
                let (text, kb) = ui::render_edit_menu();
                show(bot, conversation, origin, text, kb).await?;
            }
            Effect::Reparse(text) => {
                let request = ExtractRequest {
                    text: Some(text),
                    image: None,
                    known_methods: method_names(catalog),
                };
                match cfg.extractor.extract(&request).await {
                    Ok(candidates) => match conversation.reparse(candidates, catalog).await {
                        Some(Ok(next)) => queue.extend(next),
                        Some(Err(abort)) => {
                            bot.send_message(chat_id, ui::abort_text(abort)).await?;
                            bot.send_message(chat_id, ui::ASK_ITEMS).await?;
                        }
                        None => {}
                    },
                    Err(err) => {
                        tracing::warn!(external_id = conversation.external_id, "extraction failed: {err}");
                        bot.send_message(chat_id, EXTRACT_FAILED).await?;
                    }
                }
            }
            Effect::Finalize => {
                match conversation.claim(Claim::User).await {
                    Some(draft) => complete(bot, cfg, conversation, draft).await?,
                    None => {
                        bot.send_message(chat_id, ui::ALREADY_SAVED).await?;
                    }
                }
            }
            Effect::Cancelled => {
                conversation.finish().await;
                cfg.conversations.remove_if_same(conversation).await;
                let surface = origin.or(conversation.surface().await);
                edit_or_send(bot, chat_id, surface, "🗑 Transaction cancelled.".to_string(), None)
                    .await?;
            }
        }
    }
    Ok(())
}

async fn arm_timer(bot: &Bot, cfg: &ConfigParameters, conversation: &Arc<Conversation>) {
    let Some(generation) = conversation.arm().await else {
        return;
    };
    let bot = bot.clone();
    let timer_cfg = cfg.clone();
    schedule_auto_finalize(
        conversation,
        generation,
        cfg.confirm_timeout,
        move |conversation, draft| async move {
            if let Err(err) = complete(&bot, &timer_cfg, &conversation, draft).await {
                tracing::error!(chat_id = %conversation.chat_id, "auto-finalize reply failed: {err}");
            }
        },
    );
}

/// Finalize a claimed draft and replace the summary with the outcome.
async fn complete(
    bot: &Bot,
    cfg: &ConfigParameters,
    conversation: &Arc<Conversation>,
    draft: Draft,
) -> ResponseResult<()> {
    let deps = FinalizeDeps {
        engine: Arc::clone(&cfg.engine),
        mirror: Arc::clone(&cfg.mirror),
        timezone: cfg.timezone,
    };
    let text = match finalize(&deps, conversation.external_id, &draft).await {
        Ok(receipt) => ui::render_success(&draft, &receipt),
        Err(err) => {
            tracing::error!(
                external_id = conversation.external_id,
                items = draft.items.len(),
                "finalize failed: {err}"
            );
            "❌ Sorry, saving failed and nothing was recorded. Please send it again.".to_string()
        }
    };
    conversation.finish().await;
    cfg.conversations.remove_if_same(conversation).await;

    let surface = conversation.surface().await;
    edit_or_send(bot, conversation.chat_id, surface, text, None).await?;
    Ok(())
}
