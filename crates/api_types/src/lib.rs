use serde::{Deserialize, Serialize};

pub mod mirror {
    use super::*;

    /// Body of `POST /webhook/mirror-sync`: the current state of one
    /// spreadsheet row.
    ///
    /// Field names are camelCase; the legacy names sent by older sheet
    /// scripts are accepted as aliases.
    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MirrorSyncPayload {
        /// Owning user. Required only when the row is new to the journal.
        #[serde(default, alias = "externalId")]
        pub telegram_id: Option<i64>,
        #[serde(default)]
        pub sheet_row_id: Option<String>,
        /// Journal grouping id written in column A.
        pub transaction_id: String,
        #[serde(default, alias = "items")]
        pub description: Option<String>,
        #[serde(default, alias = "harga")]
        pub amount: Option<f64>,
        #[serde(default, alias = "namaToko")]
        pub merchant: Option<String>,
        #[serde(default, alias = "metodePembayaran")]
        pub method: Option<String>,
        /// RFC3339, or a naive `YYYY-MM-DDTHH:MM:SS` / `YYYY-MM-DD` in the
        /// server's timezone.
        #[serde(default, alias = "tanggal")]
        pub date: Option<String>,
        #[serde(default, rename = "type")]
        pub kind: Option<String>,
        /// Row etag; a repeated version is acknowledged without effect.
        #[serde(default)]
        pub version: Option<String>,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MirrorSyncResponse {
        pub success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub message: Option<String>,
    }

    impl MirrorSyncResponse {
        pub fn ok(message: impl Into<String>) -> Self {
            Self {
                success: true,
                message: Some(message.into()),
            }
        }

        pub fn failed(message: impl Into<String>) -> Self {
            Self {
                success: false,
                message: Some(message.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mirror::*;

    #[test]
    fn accepts_camel_case_body() {
        let payload: MirrorSyncPayload = serde_json::from_str(
            r#"{"telegramId": 12, "sheetRowId": "5", "transactionId": "g-1",
                "description": "Bakso", "amount": 15000, "merchant": "Pak Kumis",
                "method": "Cash", "date": "2026-03-01", "type": "expense", "version": "v1"}"#,
        )
        .unwrap();
        assert_eq!(payload.telegram_id, Some(12));
        assert_eq!(payload.amount, Some(15000.0));
        assert_eq!(payload.kind.as_deref(), Some("expense"));
        assert_eq!(payload.version.as_deref(), Some("v1"));
    }

    #[test]
    fn accepts_legacy_field_names() {
        let payload: MirrorSyncPayload = serde_json::from_str(
            r#"{"telegramId": 12, "transactionId": "g-1", "items": "Bakso",
                "harga": 15000, "namaToko": "Pak Kumis", "metodePembayaran": "BCA",
                "tanggal": "2026-03-01T10:00:00", "type": "income"}"#,
        )
        .unwrap();
        assert_eq!(payload.description.as_deref(), Some("Bakso"));
        assert_eq!(payload.merchant.as_deref(), Some("Pak Kumis"));
        assert_eq!(payload.method.as_deref(), Some("BCA"));
        assert_eq!(payload.date.as_deref(), Some("2026-03-01T10:00:00"));
    }

    #[test]
    fn only_grouping_id_is_required() {
        let payload: MirrorSyncPayload =
            serde_json::from_str(r#"{"transactionId": "g-1"}"#).unwrap();
        assert_eq!(payload.transaction_id, "g-1");
        assert!(payload.telegram_id.is_none());
        assert!(serde_json::from_str::<MirrorSyncPayload>("{}").is_err());
    }
}
