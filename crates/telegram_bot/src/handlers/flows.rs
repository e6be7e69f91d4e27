//! Command flows: transfer, debts, balance and catalog management.

use chrono::Utc;
use engine::{NewDebt, PaymentCategory, TransferRequest, resolve_method};
use teloxide::{
    prelude::*,
    types::{ChatId, MessageId},
};

use crate::{
    ConfigParameters,
    mirror::push_entries,
    parsing::{parse_amount, parse_item, parse_non_negative},
    state::PendingAction,
    ui,
};

use super::{edit_or_send, report_engine_error};

pub(super) async fn start_transfer(
    bot: &Bot,
    chat_id: ChatId,
    external_id: i64,
    cfg: &ConfigParameters,
) -> ResponseResult<()> {
    let catalog = match cfg.engine.payment_methods(external_id).await {
        Ok(c) => c,
        Err(err) => return report_engine_error(bot, chat_id, err).await,
    };
    cfg.sessions
        .set_pending(chat_id, Some(PendingAction::TransferSource))
        .await;
    bot.send_message(chat_id, "🔁 Transfer from which method?")
        .reply_markup(ui::method_keyboard(&catalog, "tr:src:", None))
        .await?;
    Ok(())
}

pub(super) async fn start_debt(
    bot: &Bot,
    chat_id: ChatId,
    cfg: &ConfigParameters,
) -> ResponseResult<()> {
    cfg.sessions
        .set_pending(chat_id, Some(PendingAction::DebtCreditor))
        .await;
    bot.send_message(chat_id, "📒 Who do you owe?").await?;
    Ok(())
}

pub(super) async fn start_pay_debt(
    bot: &Bot,
    chat_id: ChatId,
    external_id: i64,
    cfg: &ConfigParameters,
) -> ResponseResult<()> {
    let unpaid = match cfg
        .engine
        .debts(external_id, Some(engine::DebtStatus::Unpaid))
        .await
    {
        Ok(debts) => debts,
        Err(err) => return report_engine_error(bot, chat_id, err).await,
    };
    if unpaid.is_empty() {
        bot.send_message(chat_id, "🎉 No unpaid debts.").await?;
        return Ok(());
    }
    cfg.sessions
        .set_pending(chat_id, Some(PendingAction::PayDebtPick))
        .await;
    bot.send_message(chat_id, "Which debt do you want to pay?")
        .reply_markup(ui::debt_keyboard(&unpaid))
        .await?;
    Ok(())
}

pub(super) async fn start_set_balance(
    bot: &Bot,
    chat_id: ChatId,
    external_id: i64,
    cfg: &ConfigParameters,
) -> ResponseResult<()> {
    let catalog = match cfg.engine.payment_methods(external_id).await {
        Ok(c) => c,
        Err(err) => return report_engine_error(bot, chat_id, err).await,
    };
    cfg.sessions
        .set_pending(chat_id, Some(PendingAction::SetBalanceMethod))
        .await;
    bot.send_message(chat_id, "Which balance do you want to set?")
        .reply_markup(ui::method_keyboard(&catalog, "sb:m:", None))
        .await?;
    Ok(())
}

pub(super) async fn start_add_method(
    bot: &Bot,
    chat_id: ChatId,
    cfg: &ConfigParameters,
) -> ResponseResult<()> {
    cfg.sessions
        .set_pending(chat_id, Some(PendingAction::AddMethodName))
        .await;
    bot.send_message(chat_id, "➕ Name of the new payment method?")
        .await?;
    Ok(())
}

pub(super) async fn start_reset(
    bot: &Bot,
    chat_id: ChatId,
    cfg: &ConfigParameters,
) -> ResponseResult<()> {
    cfg.sessions
        .set_pending(chat_id, Some(PendingAction::ResetConfirm))
        .await;
    bot.send_message(
        chat_id,
        "⚠️ This sets every balance back to zero and removes your custom methods. Continue?",
    )
    .reply_markup(ui::reset_keyboard())
    .await?;
    Ok(())
}

/// Text typed while a flow waits. The pending action was already taken out
/// of the session; it is put back when the input must be asked again.
pub(super) async fn handle_pending_text(
    bot: &Bot,
    chat_id: ChatId,
    external_id: i64,
    cfg: &ConfigParameters,
    pending: PendingAction,
    text: &str,
) -> ResponseResult<()> {
    let text = text.trim();
    match pending {
        PendingAction::TransferAmount {
            source,
            destination,
        } => match parse_amount(text) {
            Ok(amount) => {
                cfg.sessions
                    .set_pending(
                        chat_id,
                        Some(PendingAction::TransferFee {
                            source,
                            destination,
                            amount,
                        }),
                    )
                    .await;
                bot.send_message(chat_id, "Transfer fee? Send 0 if none.")
                    .await?;
            }
            Err(err) => {
                ask_again(
                    bot,
                    chat_id,
                    cfg,
                    PendingAction::TransferAmount {
                        source,
                        destination,
                    },
                    &format!("❌ {err}. How much do you want to transfer?"),
                )
                .await?;
            }
        },
        PendingAction::TransferFee {
            source,
            destination,
            amount,
        } => match parse_non_negative(text) {
            Ok(fee) => {
                let request = TransferRequest {
                    source,
                    destination,
                    amount,
                    fee,
                    occurred_at: Utc::now(),
                };
                match cfg.engine.transfer(external_id, request).await {
                    Ok(receipt) => {
                        push_best_effort(cfg, external_id, &[receipt.transaction.clone()]).await;
                        let mut reply = format!(
                            "✅ Transferred {amount} from {} to {}.",
                            receipt.source.method, receipt.destination.method
                        );
                        if fee.is_positive() {
                            reply.push_str(&format!(" Fee: {fee}."));
                        }
                        reply.push_str(&format!(
                            "\n{}: {}\n{}: {}",
                            receipt.source.method,
                            receipt.source.current,
                            receipt.destination.method,
                            receipt.destination.current
                        ));
                        bot.send_message(chat_id, reply).await?;
                    }
                    Err(err) => return report_engine_error(bot, chat_id, err).await,
                }
            }
            Err(err) => {
                ask_again(
                    bot,
                    chat_id,
                    cfg,
                    PendingAction::TransferFee {
                        source,
                        destination,
                        amount,
                    },
                    &format!("❌ {err}. Transfer fee? Send 0 if none."),
                )
                .await?;
            }
        },
        PendingAction::DebtCreditor => {
            if text.is_empty() {
                ask_again(
                    bot,
                    chat_id,
                    cfg,
                    PendingAction::DebtCreditor,
                    "Who do you owe?",
                )
                .await?;
            } else {
                cfg.sessions
                    .set_pending(
                        chat_id,
                        Some(PendingAction::DebtItem {
                            creditor: text.to_string(),
                        }),
                    )
                    .await;
                bot.send_message(chat_id, "What was it for and how much? e.g. `lunch 50k`")
                    .await?;
            }
        }
        PendingAction::DebtItem { creditor } => match parse_item(text) {
            Ok((description, amount)) => {
                cfg.sessions
                    .set_pending(
                        chat_id,
                        Some(PendingAction::DebtMerchant {
                            creditor,
                            description,
                            amount,
                        }),
                    )
                    .await;
                bot.send_message(chat_id, "Where? Send - if it doesn't matter.")
                    .await?;
            }
            Err(err) => {
                ask_again(
                    bot,
                    chat_id,
                    cfg,
                    PendingAction::DebtItem { creditor },
                    &format!("❌ {err}, e.g. `lunch 50k`."),
                )
                .await?;
            }
        },
        PendingAction::DebtMerchant {
            creditor,
            description,
            amount,
        } => {
            let merchant = if text.is_empty() { "-" } else { text };
            let debt = NewDebt {
                creditor,
                description,
                amount,
                merchant: merchant.to_string(),
                occurred_at: Utc::now(),
            };
            match cfg.engine.create_debt(external_id, debt).await {
                Ok((debt, entry)) => {
                    push_best_effort(cfg, external_id, &[entry]).await;
                    bot.send_message(
                        chat_id,
                        format!(
                            "📒 Debt #{} recorded: {} to {} for {}.",
                            debt.id, debt.amount, debt.creditor, debt.description
                        ),
                    )
                    .await?;
                }
                Err(err) => return report_engine_error(bot, chat_id, err).await,
            }
        }
        PendingAction::SetBalanceAmount { method } => match parse_non_negative(text) {
            Ok(amount) => match cfg.engine.set_balance(external_id, &method, amount).await {
                Ok(change) => {
                    bot.send_message(
                        chat_id,
                        format!(
                            "✅ {} balance set to {} (was {}).",
                            change.method, change.current, change.previous
                        ),
                    )
                    .await?;
                }
                Err(err) => return report_engine_error(bot, chat_id, err).await,
            },
            Err(err) => {
                ask_again(
                    bot,
                    chat_id,
                    cfg,
                    PendingAction::SetBalanceAmount { method },
                    &format!("❌ {err}. What is the new balance?"),
                )
                .await?;
            }
        },
        PendingAction::AddMethodName => {
            let catalog = match cfg.engine.payment_methods(external_id).await {
                Ok(c) => c,
                Err(err) => return report_engine_error(bot, chat_id, err).await,
            };
            if text.is_empty() {
                ask_again(
                    bot,
                    chat_id,
                    cfg,
                    PendingAction::AddMethodName,
                    "Name of the new payment method?",
                )
                .await?;
            } else if let Some(existing) = resolve_method(&catalog, text) {
                bot.send_message(chat_id, format!("❌ \"{}\" already exists.", existing.name))
                    .await?;
            } else {
                cfg.sessions
                    .set_pending(
                        chat_id,
                        Some(PendingAction::AddMethodCategory {
                            name: text.to_string(),
                        }),
                    )
                    .await;
                bot.send_message(chat_id, format!("Which kind of method is \"{text}\"?"))
                    .reply_markup(ui::custom_category_keyboard())
                    .await?;
            }
        }
        button_step @ (PendingAction::TransferSource
        | PendingAction::TransferDestination { .. }
        | PendingAction::PayDebtPick
        | PendingAction::PayDebtMethod { .. }
        | PendingAction::SetBalanceMethod
        | PendingAction::AddMethodCategory { .. }
        | PendingAction::ResetConfirm) => {
            ask_again(
                bot,
                chat_id,
                cfg,
                button_step,
                "Please use the buttons above, or /cancel.",
            )
            .await?;
        }
    }
    Ok(())
}

pub(super) async fn handle_flow_callback(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    external_id: i64,
    cfg: &ConfigParameters,
    data: &str,
) -> ResponseResult<()> {
    if data == "flow:cancel" {
        cfg.sessions.set_pending(chat_id, None).await;
        edit_or_send(bot, chat_id, Some(message_id), "⛔ Cancelled.".to_string(), None).await?;
        return Ok(());
    }

    let pending = cfg.sessions.take_pending(chat_id).await;
    match (pending, data.split_once(':')) {
        (Some(PendingAction::TransferSource), Some(("tr", rest))) => {
            let Some(source) = rest.strip_prefix("src:") else {
                return stale(bot, chat_id, message_id).await;
            };
            let catalog = match cfg.engine.payment_methods(external_id).await {
                Ok(c) => c,
                Err(err) => return report_engine_error(bot, chat_id, err).await,
            };
            cfg.sessions
                .set_pending(
                    chat_id,
                    Some(PendingAction::TransferDestination {
                        source: source.to_string(),
                    }),
                )
                .await;
            edit_or_send(
                bot,
                chat_id,
                Some(message_id),
                format!("🔁 From {source} to which method?"),
                Some(ui::method_keyboard(&catalog, "tr:dst:", Some(source))),
            )
            .await?;
        }
        (Some(PendingAction::TransferDestination { source }), Some(("tr", rest))) => {
            let Some(destination) = rest.strip_prefix("dst:") else {
                return stale(bot, chat_id, message_id).await;
            };
            if destination == source {
                cfg.sessions
                    .set_pending(chat_id, Some(PendingAction::TransferDestination { source }))
                    .await;
                bot.send_message(chat_id, "❌ Source and destination must differ.")
                    .await?;
                return Ok(());
            }
            let prompt = format!("🔁 {source} → {destination}. How much?");
            cfg.sessions
                .set_pending(
                    chat_id,
                    Some(PendingAction::TransferAmount {
                        source,
                        destination: destination.to_string(),
                    }),
                )
                .await;
            edit_or_send(bot, chat_id, Some(message_id), prompt, None).await?;
        }
        (Some(PendingAction::PayDebtPick), Some(("pd", rest))) => {
            let Some(debt_id) = rest
                .strip_prefix("debt:")
                .and_then(|id| id.parse::<i64>().ok())
            else {
                return stale(bot, chat_id, message_id).await;
            };
            let (debt, catalog) = match tokio::try_join!(
                cfg.engine.debt(external_id, debt_id),
                cfg.engine.payment_methods(external_id)
            ) {
                Ok(found) => found,
                Err(err) => return report_engine_error(bot, chat_id, err).await,
            };
            cfg.sessions
                .set_pending(chat_id, Some(PendingAction::PayDebtMethod { debt_id }))
                .await;
            edit_or_send(
                bot,
                chat_id,
                Some(message_id),
                format!(
                    "Pay {} to {} with which method?",
                    debt.amount, debt.creditor
                ),
                Some(ui::method_keyboard(&catalog, "pd:pay:", None)),
            )
            .await?;
        }
        (Some(PendingAction::PayDebtMethod { debt_id }), Some(("pd", rest))) => {
            let Some(method) = rest.strip_prefix("pay:") else {
                return stale(bot, chat_id, message_id).await;
            };
            match cfg.engine.pay_debt(external_id, debt_id, method).await {
                Ok(payment) => {
                    push_best_effort(cfg, external_id, &[payment.transaction.clone()]).await;
                    edit_or_send(
                        bot,
                        chat_id,
                        Some(message_id),
                        format!(
                            "✅ Paid {} to {}.\n💳 {} balance: {}",
                            payment.debt.amount,
                            payment.debt.creditor,
                            payment.balance.method,
                            payment.balance.current
                        ),
                        None,
                    )
                    .await?;
                }
                Err(err) => return report_engine_error(bot, chat_id, err).await,
            }
        }
        (Some(PendingAction::SetBalanceMethod), Some(("sb", rest))) => {
            let Some(method) = rest.strip_prefix("m:") else {
                return stale(bot, chat_id, message_id).await;
            };
            let current = cfg
                .engine
                .balance(external_id, method)
                .await
                .unwrap_or_default();
            cfg.sessions
                .set_pending(
                    chat_id,
                    Some(PendingAction::SetBalanceAmount {
                        method: method.to_string(),
                    }),
                )
                .await;
            edit_or_send(
                bot,
                chat_id,
                Some(message_id),
                format!("{method} is at {current}. What is the new balance?"),
                None,
            )
            .await?;
        }
        (Some(PendingAction::AddMethodCategory { name }), Some(("am", rest))) => {
            let Some(category) = rest
                .strip_prefix("cat:")
                .and_then(|c| PaymentCategory::try_from(c).ok())
            else {
                return stale(bot, chat_id, message_id).await;
            };
            match cfg
                .engine
                .add_payment_method(external_id, &name, category)
                .await
            {
                Ok(method) => {
                    edit_or_send(
                        bot,
                        chat_id,
                        Some(message_id),
                        format!(
                            "✅ Added {} ({}).",
                            method.name,
                            method.category.as_str()
                        ),
                        None,
                    )
                    .await?;
                }
                Err(err) => return report_engine_error(bot, chat_id, err).await,
            }
        }
        (Some(PendingAction::ResetConfirm), Some(("rs", "yes"))) => {
            let reset = async {
                let balances = cfg.engine.reset_balances(external_id).await?;
                let methods = cfg.engine.reset_payment_methods(external_id).await?;
                Ok::<_, engine::EngineError>((balances, methods))
            };
            match reset.await {
                Ok((balances, methods)) => {
                    tracing::info!(external_id, balances, methods, "user data reset");
                    edit_or_send(
                        bot,
                        chat_id,
                        Some(message_id),
                        "✅ Balances and custom methods were reset.".to_string(),
                        None,
                    )
                    .await?;
                }
                Err(err) => return report_engine_error(bot, chat_id, err).await,
            }
        }
        (pending, _) => {
            // Button of a flow that is no longer the current one.
            cfg.sessions.set_pending(chat_id, pending).await;
            return stale(bot, chat_id, message_id).await;
        }
    }
    Ok(())
}

async fn ask_again(
    bot: &Bot,
    chat_id: ChatId,
    cfg: &ConfigParameters,
    pending: PendingAction,
    prompt: &str,
) -> ResponseResult<()> {
    cfg.sessions.set_pending(chat_id, Some(pending)).await;
    bot.send_message(chat_id, prompt).await?;
    Ok(())
}

async fn stale(bot: &Bot, chat_id: ChatId, message_id: MessageId) -> ResponseResult<()> {
    edit_or_send(
        bot,
        chat_id,
        Some(message_id),
        "This menu has expired.".to_string(),
        None,
    )
    .await?;
    Ok(())
}

async fn push_best_effort(
    cfg: &ConfigParameters,
    external_id: i64,
    entries: &[engine::Transaction],
) {
    if let Err(err) = push_entries(
        &cfg.engine,
        cfg.mirror.as_ref(),
        external_id,
        entries,
        cfg.timezone,
    )
    .await
    {
        tracing::error!(external_id, "mirror push failed, sweep will retry: {err}");
    }
}
