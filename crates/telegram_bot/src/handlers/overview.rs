use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use teloxide::{
    prelude::*,
    types::{ChatId, MessageId},
};

use crate::{
    ConfigParameters,
    parsing::{ReportRange, parse_connect_args, parse_report_args},
    ui,
};

use super::{edit_or_send, report_engine_error};

pub(super) async fn show_balances(
    bot: &Bot,
    chat_id: ChatId,
    external_id: i64,
    cfg: &ConfigParameters,
) -> ResponseResult<()> {
    match cfg.engine.balances(external_id).await {
        Ok(sheet) => {
            bot.send_message(chat_id, ui::render_balances(&sheet))
                .await?;
            Ok(())
        }
        Err(err) => report_engine_error(bot, chat_id, err).await,
    }
}

pub(super) async fn show_debts(
    bot: &Bot,
    chat_id: ChatId,
    external_id: i64,
    cfg: &ConfigParameters,
) -> ResponseResult<()> {
    match cfg.engine.debts(external_id, None).await {
        Ok(debts) => {
            bot.send_message(chat_id, ui::render_debts(&debts, cfg.timezone))
                .await?;
            Ok(())
        }
        Err(err) => report_engine_error(bot, chat_id, err).await,
    }
}

/// `/report`: a range keyboard without arguments, the report otherwise.
pub(super) async fn show_report(
    bot: &Bot,
    chat_id: ChatId,
    external_id: i64,
    cfg: &ConfigParameters,
    args: Option<&str>,
) -> ResponseResult<()> {
    match parse_report_args(args) {
        Ok(Some(range)) => send_report(bot, chat_id, None, external_id, cfg, range).await,
        Ok(None) => {
            bot.send_message(chat_id, "📊 Report\n\nPick a period:")
                .reply_markup(ui::report_keyboard())
                .await?;
            Ok(())
        }
        Err(err) => {
            bot.send_message(chat_id, format!("❌ {err}\n\n{}", ui::REPORT_USAGE))
                .await?;
            Ok(())
        }
    }
}

/// Buttons of the range keyboard (`report:<choice>`).
pub(super) async fn on_report_button(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    external_id: i64,
    cfg: &ConfigParameters,
    choice: &str,
) -> ResponseResult<()> {
    if let Some(range) = ReportRange::preset(choice) {
        return send_report(bot, chat_id, Some(message_id), external_id, cfg, range).await;
    }
    let text = match choice {
        "custom" => ui::REPORT_USAGE,
        _ => "Report cancelled.",
    };
    edit_or_send(bot, chat_id, Some(message_id), text.to_string(), None).await?;
    Ok(())
}

async fn send_report(
    bot: &Bot,
    chat_id: ChatId,
    origin: Option<MessageId>,
    external_id: i64,
    cfg: &ConfigParameters,
    range: ReportRange,
) -> ResponseResult<()> {
    let Some(window) = report_window(range, Utc::now(), cfg.timezone) else {
        bot.send_message(chat_id, "❌ Couldn't work out that period.")
            .await?;
        return Ok(());
    };
    match cfg
        .engine
        .expense_report(external_id, window.from, window.to)
        .await
    {
        Ok(report) => {
            let text = ui::render_report(&report, window.first, window.last, cfg.timezone);
            edit_or_send(bot, chat_id, origin, text, None).await?;
            Ok(())
        }
        Err(err) => report_engine_error(bot, chat_id, err).await,
    }
}

pub(super) async fn connect_sheet(
    bot: &Bot,
    chat_id: ChatId,
    external_id: i64,
    cfg: &ConfigParameters,
    args: Option<&str>,
) -> ResponseResult<()> {
    let (document_id, credential) = match parse_connect_args(args) {
        Ok(parsed) => parsed,
        Err(_) => {
            bot.send_message(
                chat_id,
                "Usage: /connectsheet <spreadsheet-id> <refresh-token>",
            )
            .await?;
            return Ok(());
        }
    };

    match cfg
        .engine
        .link_mirror(external_id, &document_id, &credential)
        .await
    {
        Ok(user) => {
            let secret = user.mirror_webhook_secret.unwrap_or_default();
            let mut text = format!(
                "✅ Sheet linked. New entries will be appended to it.\n\n\
                 Webhook secret for sheet edits: {secret}"
            );
            if !cfg.mirror.enabled() {
                text.push_str("\n\nℹ️ Sheet sync is not configured on this server yet.");
            }
            bot.send_message(chat_id, text).await?;
            Ok(())
        }
        Err(err) => report_engine_error(bot, chat_id, err).await,
    }
}

pub(super) async fn disconnect_sheet(
    bot: &Bot,
    chat_id: ChatId,
    external_id: i64,
    cfg: &ConfigParameters,
) -> ResponseResult<()> {
    match cfg.engine.unlink_mirror(external_id).await {
        Ok(_) => {
            bot.send_message(chat_id, "🔌 Sheet disconnected.").await?;
            Ok(())
        }
        Err(err) => report_engine_error(bot, chat_id, err).await,
    }
}

/// Local days `first..=last` of a report and the matching `[from, to)` in UTC.
#[derive(Debug, PartialEq, Eq)]
struct ReportWindow {
    first: NaiveDate,
    last: NaiveDate,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

fn report_window(range: ReportRange, now: DateTime<Utc>, timezone: Tz) -> Option<ReportWindow> {
    let today = now.with_timezone(&timezone).date_naive();
    let (first, last) = match range {
        ReportRange::Today => (today, today),
        ReportRange::Week => {
            let monday = today.checked_sub_days(Days::new(u64::from(
                today.weekday().num_days_from_monday(),
            )))?;
            (monday, monday.checked_add_days(Days::new(6))?)
        }
        ReportRange::Month => {
            let first = today.checked_sub_days(Days::new(u64::from(today.day0())))?;
            let next = first.checked_add_months(Months::new(1))?;
            (first, next.pred_opt()?)
        }
        ReportRange::Custom { from, to } => (from, to),
    };
    let start_of = |date: NaiveDate| {
        timezone
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    };
    Some(ReportWindow {
        first,
        last,
        from: start_of(first)?,
        to: start_of(last.succ_opt()?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono_tz::Asia::Jakarta;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn windows_follow_the_local_calendar() {
        // 2025-03-01 01:00 in Jakarta is still February in UTC.
        let now = Utc.with_ymd_and_hms(2025, 2, 28, 18, 0, 0).unwrap();
        let day = report_window(ReportRange::Today, now, Jakarta).unwrap();
        assert_eq!(day.first, date(2025, 3, 1));
        assert_eq!(day.from, Utc.with_ymd_and_hms(2025, 2, 28, 17, 0, 0).unwrap());
        assert_eq!(day.to, Utc.with_ymd_and_hms(2025, 3, 1, 17, 0, 0).unwrap());

        let month = report_window(ReportRange::Month, now, Jakarta).unwrap();
        assert_eq!((month.first, month.last), (date(2025, 3, 1), date(2025, 3, 31)));
        assert_eq!(month.from, day.from);
        assert_eq!(month.to, Utc.with_ymd_and_hms(2025, 3, 31, 17, 0, 0).unwrap());
    }

    #[test]
    fn week_runs_monday_to_sunday() {
        // Thursday 2025-06-05 in Jakarta.
        let now = Utc.with_ymd_and_hms(2025, 6, 5, 3, 0, 0).unwrap();
        let week = report_window(ReportRange::Week, now, Jakarta).unwrap();
        assert_eq!((week.first, week.last), (date(2025, 6, 2), date(2025, 6, 8)));
        assert_eq!(week.from, Utc.with_ymd_and_hms(2025, 6, 1, 17, 0, 0).unwrap());
        assert_eq!(week.to, Utc.with_ymd_and_hms(2025, 6, 8, 17, 0, 0).unwrap());

        // Sunday still belongs to the week that started on Monday.
        let sunday = Utc.with_ymd_and_hms(2025, 6, 8, 10, 0, 0).unwrap();
        let same = report_window(ReportRange::Week, sunday, Jakarta).unwrap();
        assert_eq!(same, week);
    }

    #[test]
    fn custom_range_includes_the_last_day() {
        let now = Utc.with_ymd_and_hms(2025, 6, 5, 3, 0, 0).unwrap();
        let range = ReportRange::Custom {
            from: date(2025, 5, 1),
            to: date(2025, 5, 31),
        };
        let window = report_window(range, now, Jakarta).unwrap();
        assert_eq!(window.from, Utc.with_ymd_and_hms(2025, 4, 30, 17, 0, 0).unwrap());
        assert_eq!(window.to, Utc.with_ymd_and_hms(2025, 5, 31, 17, 0, 0).unwrap());
    }
}
