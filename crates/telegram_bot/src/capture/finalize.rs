use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use engine::{
    CASH, Engine, EngineError, Money, NewTransaction, Transaction, TransactionKind, title_case,
};

use crate::mirror::{MirrorSink, push_entries};

use super::machine::{CaptureKind, Draft, UNKNOWN_MERCHANT};

/// What finalize needs besides the draft.
#[derive(Clone)]
pub struct FinalizeDeps {
    pub engine: Arc<Engine>,
    pub mirror: Arc<dyn MirrorSink>,
    pub timezone: Tz,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub entries: Vec<Transaction>,
    pub balance_method: String,
    /// Balance of `balance_method` after the batch, when it could be read.
    pub balance: Option<Money>,
    pub ledger_failed: bool,
    pub mirror_failed: bool,
}

/// Write the draft: journal first, then the ledger, then the mirror.
///
/// Only the journal write can fail the call. Ledger and mirror failures are
/// logged and flagged on the receipt; the written entries stand.
pub async fn finalize(
    deps: &FinalizeDeps,
    external_id: i64,
    draft: &Draft,
) -> Result<Receipt, EngineError> {
    if Money::checked_sum(draft.items.iter().map(|item| item.amount)).is_none() {
        return Err(EngineError::InvalidAmount("batch total too large".to_string()));
    }
    let now = Utc::now();
    let kind = match draft.kind {
        CaptureKind::Expense => TransactionKind::Expense,
        CaptureKind::Income => TransactionKind::Income,
    };
    let entries: Vec<NewTransaction> = draft
        .items
        .iter()
        .map(|item| NewTransaction {
            description: title_case(&item.description),
            amount: item.amount,
            merchant: item
                .merchant
                .clone()
                .unwrap_or_else(|| UNKNOWN_MERCHANT.to_string()),
            method: item.method.clone().unwrap_or_else(|| CASH.to_string()),
            occurred_at: occurred_at(item.occurred_on, now, deps.timezone),
            kind,
        })
        .collect();

    let written = deps.engine.record_transactions(external_id, &entries).await?;
    let balance_method = draft.primary_method().to_string();

    let (balance, ledger_failed) = match deps.engine.apply_to_ledger(external_id, &written).await {
        Ok(changes) => (
            changes
                .iter()
                .find(|change| change.method == balance_method)
                .map(|change| change.current),
            false,
        ),
        Err(err) => {
            tracing::error!(
                external_id,
                grouping_id = %written.first().map(|t| t.grouping_id.as_str()).unwrap_or("-"),
                "ledger update failed after journal write: {err}"
            );
            (None, true)
        }
    };

    let mirror_failed = match push_entries(
        &deps.engine,
        deps.mirror.as_ref(),
        external_id,
        &written,
        deps.timezone,
    )
    .await
    {
        Ok(_) => false,
        Err(err) => {
            tracing::error!(external_id, "mirror push failed, sweep will retry: {err}");
            true
        }
    };

    let balance = match balance {
        Some(balance) => Some(balance),
        None => deps.engine.balance(external_id, &balance_method).await.ok(),
    };

    Ok(Receipt {
        entries: written,
        balance_method,
        balance,
        ledger_failed,
        mirror_failed,
    })
}

/// Purchase day mentioned by the user at local noon; today means now.
fn occurred_at(day: Option<NaiveDate>, now: DateTime<Utc>, timezone: Tz) -> DateTime<Utc> {
    let Some(day) = day else {
        return now;
    };
    if day == now.with_timezone(&timezone).date_naive() {
        return now;
    }
    day.and_hms_opt(12, 0, 0)
        .and_then(|noon| timezone.from_local_datetime(&noon).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(now)
}
