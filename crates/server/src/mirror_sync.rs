//! Inbound mirror webhook.

use api_types::mirror::{MirrorSyncPayload, MirrorSyncResponse};
use axum::{Json, extract::State};
use axum_extra::TypedHeader;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use engine::{EngineError, Money, MirrorUpdate, ReconcileOutcome, SkipReason, TransactionKind};

use crate::{
    ServerError,
    server::{ServerState, WebhookSecret},
};

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

pub(crate) async fn sync(
    State(state): State<ServerState>,
    secret: Option<TypedHeader<WebhookSecret>>,
    Json(payload): Json<MirrorSyncPayload>,
) -> Result<Json<MirrorSyncResponse>, ServerError> {
    let secret = secret.map(|TypedHeader(WebhookSecret(value))| value);
    let update = mirror_update(payload, state.timezone)?;
    let grouping_id = update.grouping_id.clone();

    let outcome = state.engine.reconcile(secret.as_deref(), update).await?;
    let message = match outcome {
        ReconcileOutcome::Updated(_) => "updated",
        ReconcileOutcome::Inserted(_) => "inserted",
        ReconcileOutcome::Skipped(SkipReason::Unattributed) => "ignored: unknown owner",
        ReconcileOutcome::Skipped(SkipReason::Duplicate) => "ignored: version already applied",
    };
    tracing::info!(grouping_id = %grouping_id, outcome = message, "mirror sync handled");
    Ok(Json(MirrorSyncResponse::ok(message)))
}

fn mirror_update(payload: MirrorSyncPayload, timezone: Tz) -> Result<MirrorUpdate, ServerError> {
    let amount = payload.amount.map(to_money).transpose()?;
    let occurred_at = payload.date.as_deref().and_then(|raw| {
        let parsed = parse_date(raw, timezone);
        if parsed.is_none() && !raw.trim().is_empty() {
            tracing::warn!(date = raw, "unparseable mirror date, keeping stored value");
        }
        parsed
    });
    let kind = payload.kind.as_deref().and_then(|raw| {
        TransactionKind::try_from(raw.trim().to_lowercase().as_str()).ok()
    });

    Ok(MirrorUpdate {
        grouping_id: payload.transaction_id,
        external_id: payload.telegram_id,
        mirror_row_id: payload.sheet_row_id,
        description: payload.description,
        amount,
        merchant: payload.merchant,
        method: payload.method,
        occurred_at,
        kind,
        version: payload.version,
    })
}

fn to_money(amount: f64) -> Result<Money, ServerError> {
    if !amount.is_finite() {
        return Err(EngineError::InvalidAmount("amount must be a finite number".to_string()).into());
    }
    Ok(Money::new(amount.round() as i64))
}

/// RFC3339 is taken as is; naive timestamps and plain dates are read in
/// `timezone`.
pub(crate) fn parse_date(raw: &str, timezone: Tz) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    let naive = NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339() {
        let parsed = parse_date("2026-03-01T10:00:00+07:00", chrono_tz::Asia::Jakarta).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap());
    }

    #[test]
    fn naive_values_use_the_configured_timezone() {
        let tz = chrono_tz::Asia::Jakarta;
        assert_eq!(
            parse_date("2026-03-01T10:00:00", tz),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap())
        );
        assert_eq!(
            parse_date("2026-03-01", tz),
            Some(Utc.with_ymd_and_hms(2026, 2, 28, 17, 0, 0).unwrap())
        );
    }

    #[test]
    fn garbage_dates_are_none() {
        assert!(parse_date("kemarin", chrono_tz::UTC).is_none());
        assert!(parse_date("  ", chrono_tz::UTC).is_none());
    }

    #[test]
    fn payload_maps_to_update() {
        let payload = MirrorSyncPayload {
            telegram_id: Some(1),
            transaction_id: "g-1".to_string(),
            amount: Some(15_000.4),
            kind: Some(" Income ".to_string()),
            ..MirrorSyncPayload::default()
        };
        let update = mirror_update(payload, chrono_tz::UTC).unwrap();
        assert_eq!(update.amount, Some(Money::new(15_000)));
        assert_eq!(update.kind, Some(TransactionKind::Income));
        assert_eq!(update.external_id, Some(1));
    }

    #[test]
    fn unknown_type_maps_to_none() {
        let payload = MirrorSyncPayload {
            transaction_id: "g-1".to_string(),
            kind: Some("refund".to_string()),
            ..MirrorSyncPayload::default()
        };
        assert!(mirror_update(payload, chrono_tz::UTC).unwrap().kind.is_none());
    }
}
