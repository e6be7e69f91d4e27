use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use engine::{
    BalanceSheet, CASH, Debt, DebtStatus, ExpenseReport, PaymentCategory, PaymentMethod,
    auto_category, methods_in, title_case,
};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::capture::{Abort, Button, Draft, MenuLevel, Notice, Receipt};

const FLOW_CANCEL: &str = "flow:cancel";

fn button(label: impl Into<String>, data: impl Into<String>) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label.into(), data.into())
}

fn capture_button(label: &str, action: Button) -> InlineKeyboardButton {
    button(label, action.data())
}

fn in_pairs(buttons: Vec<InlineKeyboardButton>) -> Vec<Vec<InlineKeyboardButton>> {
    buttons.chunks(2).map(<[_]>::to_vec).collect()
}

fn category_label(category: PaymentCategory) -> &'static str {
    match category {
        PaymentCategory::Cash => "💵 Cash",
        PaymentCategory::Bank => "🏦 Bank",
        PaymentCategory::EWallet => "📱 E-Wallet",
        PaymentCategory::Other => "🗂 Other",
    }
}

fn day(date: NaiveDate) -> String {
    date.format("%d %b %Y").to_string()
}

fn local_day(at: DateTime<Utc>, timezone: Tz) -> NaiveDate {
    at.with_timezone(&timezone).date_naive()
}

/// Two-level payment menu of the capture flow.
pub(crate) fn render_payment_menu(
    catalog: &[PaymentMethod],
    level: MenuLevel,
) -> (String, InlineKeyboardMarkup) {
    let mut rows = match level {
        MenuLevel::Main => {
            let mut rows = vec![
                vec![capture_button(
                    category_label(PaymentCategory::Cash),
                    Button::Method(CASH.to_string()),
                )],
                vec![
                    capture_button(
                        category_label(PaymentCategory::Bank),
                        Button::Menu(MenuLevel::Category(PaymentCategory::Bank)),
                    ),
                    capture_button(
                        category_label(PaymentCategory::EWallet),
                        Button::Menu(MenuLevel::Category(PaymentCategory::EWallet)),
                    ),
                ],
            ];
            if !methods_in(catalog, PaymentCategory::Other).is_empty() {
                rows.push(vec![capture_button(
                    category_label(PaymentCategory::Other),
                    Button::Menu(MenuLevel::Category(PaymentCategory::Other)),
                )]);
            }
            rows
        }
        MenuLevel::Category(category) => {
            let buttons = methods_in(catalog, category)
                .into_iter()
                .map(|m| capture_button(&m.name, Button::Method(m.name.clone())))
                .collect();
            let mut rows = in_pairs(buttons);
            rows.push(vec![capture_button("⬅️ Back", Button::Menu(MenuLevel::Main))]);
            rows
        }
    };
    rows.push(vec![capture_button("🗑 Cancel", Button::Cancel)]);

    let text = match level {
        MenuLevel::Main => "💳 How did you pay? Pick a method or type its name.".to_string(),
        MenuLevel::Category(category) => format!("💳 {} methods:", category.as_str()),
    };
    (text, InlineKeyboardMarkup::new(rows))
}

pub(crate) fn render_confirm(
    draft: &Draft,
    timezone: Tz,
    now: DateTime<Utc>,
) -> (String, InlineKeyboardMarkup) {
    let today = local_day(now, timezone);
    let purchased = draft
        .items
        .first()
        .and_then(|i| i.occurred_on)
        .unwrap_or(today);
    let dates = if purchased == today {
        format!("📅 Date: {}", day(today))
    } else {
        format!("📅 Purchased: {}\n🕒 Recorded: {}", day(purchased), day(today))
    };

    let items = draft
        .items
        .iter()
        .map(|item| {
            format!(
                "• {} — {} ({})",
                title_case(&item.description),
                item.amount,
                auto_category(&item.description).as_str()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let text = format!(
        "🧾 Please confirm:\n\n{dates}\n🏪 Merchant: {}\n💳 Method: {}\n💰 Total: {}\n\nItems:\n{items}\n\nSaving automatically in a few seconds.",
        title_case(draft.merchant()),
        draft.methods().join(", "),
        draft.total(),
    );
    let kb = InlineKeyboardMarkup::new(vec![
        vec![
            capture_button("✅ Yes", Button::Yes),
            capture_button("✏️ No", Button::No),
        ],
        vec![capture_button("🗑 Cancel", Button::Cancel)],
    ]);
    (text, kb)
}

pub(crate) fn render_edit_menu() -> (String, InlineKeyboardMarkup) {
    let kb = InlineKeyboardMarkup::new(vec![
        vec![capture_button("🏪 Change merchant", Button::EditMerchant)],
        vec![capture_button("💳 Change method", Button::EditMethod)],
        vec![capture_button("📝 Change items", Button::EditItems)],
        vec![
            capture_button("⬅️ Back", Button::EditBack),
            capture_button("🗑 Cancel", Button::Cancel),
        ],
    ]);
    ("What do you want to change?".to_string(), kb)
}

pub(crate) fn render_success(draft: &Draft, receipt: &Receipt) -> String {
    let count = receipt.entries.len();
    let mut text = format!(
        "✅ Saved {count} item{} — {} at {}.",
        if count == 1 { "" } else { "s" },
        draft.total(),
        title_case(draft.merchant()),
    );
    match receipt.balance {
        Some(balance) => text.push_str(&format!(
            "\n💳 {} balance: {balance}",
            receipt.balance_method
        )),
        None => text.push_str("\n⚠️ The balance could not be updated."),
    }
    if receipt.ledger_failed && receipt.balance.is_some() {
        text.push_str("\n⚠️ The balance update failed; the entry is recorded.");
    }
    if receipt.mirror_failed {
        text.push_str("\n⚠️ Spreadsheet sync failed; it will be retried.");
    }
    text
}

pub(crate) fn notice_text(notice: Notice) -> &'static str {
    match notice {
        Notice::MerchantNumeric => "That looks like a number. Please type the store name.",
        Notice::MerchantDefaulted => "No store name, using \"Unknown\".",
        Notice::MethodUnknown => "I don't know that payment method. Please pick one below.",
        Notice::MethodDefaulted => "Still unknown, using Cash.",
        Notice::UseButtons => "Please use the buttons above.",
    }
}

pub(crate) fn abort_text(abort: Abort) -> &'static str {
    match abort {
        Abort::NothingFound => {
            "I couldn't find a transaction there. Try something like `nasi goreng 15k`."
        }
        Abort::Incomplete => {
            "Every item needs a description and an amount, e.g. `es teh 5k`. Please try again."
        }
    }
}

pub(crate) const ASK_MERCHANT: &str = "🏪 Where did you buy it?";
pub(crate) const ASK_ITEMS: &str = "📝 Send the items again, e.g. `nasi goreng 15k`.";
pub(crate) const ALREADY_SAVED: &str = "ℹ️ That transaction has already been saved.";
pub(crate) const NO_LONGER_ACTIVE: &str = "That transaction is no longer active.";
pub(crate) const TOO_FAST: &str = "⚠️ Too fast! Please wait a moment.";

/// Flat method keyboard for command flows.
pub(crate) fn method_keyboard(
    catalog: &[PaymentMethod],
    prefix: &str,
    exclude: Option<&str>,
) -> InlineKeyboardMarkup {
    let buttons = catalog
        .iter()
        .filter(|m| Some(m.name.as_str()) != exclude)
        .map(|m| button(m.name.clone(), format!("{prefix}{}", m.name)))
        .collect();
    let mut rows = in_pairs(buttons);
    rows.push(vec![button("🗑 Cancel", FLOW_CANCEL)]);
    InlineKeyboardMarkup::new(rows)
}

pub(crate) fn debt_keyboard(debts: &[Debt]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = debts
        .iter()
        .map(|d| {
            vec![button(
                format!("{} — {} ({})", d.creditor, d.amount, d.description),
                format!("pd:debt:{}", d.id),
            )]
        })
        .collect();
    rows.push(vec![button("🗑 Cancel", FLOW_CANCEL)]);
    InlineKeyboardMarkup::new(rows)
}

pub(crate) fn custom_category_keyboard() -> InlineKeyboardMarkup {
    let buttons = PaymentCategory::custom_choices()
        .into_iter()
        .map(|c| button(category_label(c), format!("am:cat:{}", c.as_str())))
        .collect();
    let mut rows = vec![buttons];
    rows.push(vec![button("🗑 Cancel", FLOW_CANCEL)]);
    InlineKeyboardMarkup::new(rows)
}

pub(crate) fn reset_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("⚠️ Yes, reset", "rs:yes"),
        button("Keep", FLOW_CANCEL),
    ]])
}

pub(crate) fn render_balances(sheet: &BalanceSheet) -> String {
    let mut text = String::from("💰 Balances\n");
    for line in &sheet.balances {
        text.push_str(&format!("\n{}: {}", line.method, line.amount));
    }
    text.push_str(&format!("\n\nTotal: {}", sheet.total));
    text
}

pub(crate) fn render_debts(debts: &[Debt], timezone: Tz) -> String {
    if debts.is_empty() {
        return "No debts recorded.".to_string();
    }
    let mut text = String::from("📒 Debts\n");
    for debt in debts {
        let status = match (debt.status, &debt.paid_with) {
            (DebtStatus::Paid, Some(method)) => format!("paid with {method}"),
            (DebtStatus::Paid, None) => "paid".to_string(),
            (DebtStatus::Unpaid, _) => "unpaid".to_string(),
        };
        text.push_str(&format!(
            "\n#{} {} — {} to {} ({}, {status})",
            debt.id,
            title_case(&debt.description),
            debt.amount,
            debt.creditor,
            day(local_day(debt.created_at, timezone)),
        ));
    }
    text
}

pub(crate) fn report_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("📅 Today", "report:today")],
        vec![button("📆 This week (Mon-Sun)", "report:week")],
        vec![button("🗓 This month", "report:month")],
        vec![button("🔎 Pick dates", "report:custom")],
        vec![button("🗑 Cancel", "report:cancel")],
    ])
}

pub(crate) const REPORT_USAGE: &str =
    "Usage: /report [today | week | month | <from> <to>]\nDates look like 2025-06-30, e.g. /report 2025-06-01 2025-06-30";

/// Report for the local days `first..=last`.
pub(crate) fn render_report(
    report: &ExpenseReport,
    first: NaiveDate,
    last: NaiveDate,
    timezone: Tz,
) -> String {
    let period = if first == last {
        day(first)
    } else {
        format!("{} to {}", day(first), day(last))
    };
    let mut text = format!("📊 Report: {period}\n");
    if report.count == 0 {
        text.push_str("\n📭 No expenses in this period.");
    } else {
        text.push_str(&format!(
            "\n💰 Spent {} in {} entries",
            report.total, report.count
        ));
        text.push_str("\n\nBy category:");
        for line in &report.by_category {
            text.push_str(&format!("\n• {}: {}", line.key.as_str(), line.total));
        }
        text.push_str("\n\nBy method:");
        for line in &report.by_method {
            text.push_str(&format!("\n• {}: {}", line.key, line.total));
        }
    }

    if !report.debts.is_empty() {
        text.push_str(&format!(
            "\n\n📒 Debts: {} (unpaid {}, paid {})",
            report.unpaid_debt.saturating_add(report.paid_debt),
            report.unpaid_debt,
            report.paid_debt
        ));
        for debt in &report.debts {
            let status = match debt.status {
                DebtStatus::Paid => "paid",
                DebtStatus::Unpaid => "unpaid",
            };
            text.push_str(&format!(
                "\n• {}: {} at {}, {} ({status}, {})",
                debt.creditor,
                title_case(&debt.description),
                debt.merchant,
                debt.amount,
                day(local_day(debt.created_at, timezone)),
            ));
        }
    }
    text
}

pub(crate) fn welcome_text() -> &'static str {
    "👋 Welcome to Dompet!\n\n\
     Send me what you spent, for example:\n\
     👉 nasi goreng 15k\n\
     👉 bensin 50rb at Pertamina with Cash\n\
     or a photo of the receipt.\n\n\
     Use /help to see every command."
}

pub(crate) fn help_text() -> &'static str {
    "📚 Commands\n\n\
     Send free text or a receipt photo to record an expense.\n\
     Amounts: 15000, 15.000, 15k, 15rb, 1,5jt\n\n\
     /income <text> - record income\n\
     /transfer - move money between methods\n\
     /debt - record a debt\n\
     /paydebt - settle a debt\n\
     /balance - show balances\n\
     /debts - list debts\n\
     /setbalance - set a method balance\n\
     /addmethod - add a payment method\n\
     /report [today|week|month|<from> <to>] - spending report\n\
     /reset - clear balances and custom methods\n\
     /connectsheet <document-id> <credential> - link a spreadsheet\n\
     /disconnectsheet - unlink the spreadsheet\n\
     /cancel - stop the current action"
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono_tz::Asia::Jakarta;
    use engine::{Money, catalog};

    use super::*;
    use crate::{
        capture::{CaptureKind, LineItem, Step},
        extractor::Candidate,
    };

    fn draft() -> Draft {
        let candidate = |description: &str, amount: i64| Candidate {
            description: Some(description.to_string()),
            amount: Some(Money::new(amount)),
            merchant: Some("warung bu sri".to_string()),
            method: Some("DANA".to_string()),
            ..Candidate::default()
        };
        Draft::begin(
            CaptureKind::Expense,
            vec![candidate("nasi goreng", 15_000), candidate("es teh", 5_000)],
            &catalog(Vec::new()),
            false,
        )
        .unwrap()
        .0
    }

    fn labels(kb: &InlineKeyboardMarkup) -> Vec<String> {
        kb.inline_keyboard
            .iter()
            .flatten()
            .map(|b| b.text.clone())
            .collect()
    }

    #[test]
    fn main_menu_shows_other_only_with_custom_methods() {
        let (_, kb) = render_payment_menu(&catalog(Vec::new()), MenuLevel::Main);
        assert!(!labels(&kb).iter().any(|l| l.contains("Other")));

        let with_custom = catalog(vec![PaymentMethod::custom("Arisan", PaymentCategory::Other)]);
        let (_, kb) = render_payment_menu(&with_custom, MenuLevel::Main);
        assert!(labels(&kb).iter().any(|l| l.contains("Other")));
    }

    #[test]
    fn bank_menu_lists_banks_in_order() {
        let (_, kb) = render_payment_menu(
            &catalog(Vec::new()),
            MenuLevel::Category(PaymentCategory::Bank),
        );
        assert_eq!(
            labels(&kb),
            vec!["BCA", "BNI", "BRI", "Blu", "⬅️ Back", "🗑 Cancel"]
        );
    }

    #[test]
    fn confirm_lists_items_with_categories() {
        let draft = draft();
        assert_eq!(draft.step, Step::Confirm);
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 3, 0, 0).unwrap();
        let (text, _) = render_confirm(&draft, Jakarta, now);
        assert!(text.contains("📅 Date: 18 Oct 2026"));
        assert!(text.contains("🏪 Merchant: Warung Bu Sri"));
        assert!(text.contains("💳 Method: DANA"));
        assert!(text.contains("💰 Total: Rp 20.000"));
        assert!(text.contains("• Nasi Goreng — Rp 15.000 (Food)"));
    }

    #[test]
    fn confirm_shows_both_dates_for_past_purchases() {
        let mut draft = draft();
        draft.items = vec![LineItem {
            occurred_on: NaiveDate::from_ymd_opt(2026, 10, 1),
            ..draft.items[0].clone()
        }];
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 3, 0, 0).unwrap();
        let (text, _) = render_confirm(&draft, Jakarta, now);
        assert!(text.contains("📅 Purchased: 01 Oct 2026"));
        assert!(text.contains("🕒 Recorded: 18 Oct 2026"));
    }

    #[test]
    fn success_mentions_balance_and_sync_problems() {
        let receipt = Receipt {
            entries: Vec::new(),
            balance_method: "DANA".to_string(),
            balance: Some(Money::new(80_000)),
            ledger_failed: false,
            mirror_failed: true,
        };
        let text = render_success(&draft(), &receipt);
        assert!(text.contains("DANA balance: Rp 80.000"));
        assert!(text.contains("Spreadsheet sync failed"));
    }

    #[test]
    fn report_lists_debts_after_the_expenses() {
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap();
        let debt = |creditor: &str, amount: i64, status: DebtStatus| Debt {
            id: 1,
            creditor: creditor.to_string(),
            description: "makan siang".to_string(),
            amount: Money::new(amount),
            merchant: "Warteg".to_string(),
            status,
            grouping_id: "g".to_string(),
            paid_at: None,
            paid_with: None,
            created_at: at,
        };
        let report = ExpenseReport {
            from: at,
            to: at,
            total: Money::ZERO,
            count: 0,
            by_category: Vec::new(),
            by_method: Vec::new(),
            debts: vec![
                debt("Budi", 25_000, DebtStatus::Paid),
                debt("Sari", 40_000, DebtStatus::Unpaid),
            ],
            unpaid_debt: Money::new(40_000),
            paid_debt: Money::new(25_000),
        };
        let first = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let last = NaiveDate::from_ymd_opt(2025, 6, 8).unwrap();
        let text = render_report(&report, first, last, Jakarta);

        assert!(text.starts_with("📊 Report: 02 Jun 2025 to 08 Jun 2025"));
        assert!(text.contains("No expenses in this period"));
        assert!(text.contains("📒 Debts: Rp 65.000 (unpaid Rp 40.000, paid Rp 25.000)"));
        assert!(text.contains("• Sari: Makan Siang at Warteg, Rp 40.000 (unpaid, 02 Jun 2025)"));
    }
}
