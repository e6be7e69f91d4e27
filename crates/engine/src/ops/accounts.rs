use chrono::Utc;
use sea_orm::{
    ActiveValue, ConnectionTrait, QueryFilter, TransactionTrait, prelude::*,
    sea_query::OnConflict,
};
use uuid::Uuid;

use crate::{EngineError, ResultEngine, User, users};

use super::{Engine, normalize_required_text, with_tx};

impl Engine {
    /// Return the user with `external_id`, if it ever interacted.
    pub async fn user(&self, external_id: i64) -> ResultEngine<Option<User>> {
        Ok(self
            .user_model(&self.database, external_id)
            .await?
            .map(User::from))
    }

    /// Find or lazily create the user with `external_id`.
    pub async fn find_or_create_user(&self, external_id: i64) -> ResultEngine<User> {
        with_tx!(self, |db_tx| {
            let model = self.ensure_user(&db_tx, external_id).await?;
            Ok(User::from(model))
        })
    }

    /// Insert-if-missing then read back; safe against concurrent creation.
    pub(crate) async fn ensure_user<C: ConnectionTrait>(
        &self,
        db: &C,
        external_id: i64,
    ) -> ResultEngine<users::Model> {
        if let Some(model) = self.user_model(db, external_id).await? {
            return Ok(model);
        }

        let now = Utc::now();
        let model = users::ActiveModel {
            id: ActiveValue::NotSet,
            external_id: ActiveValue::Set(external_id),
            mirror_document_id: ActiveValue::Set(None),
            mirror_credential: ActiveValue::Set(None),
            mirror_webhook_secret: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        users::Entity::insert(model)
            .on_conflict(
                OnConflict::column(users::Column::ExternalId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        tracing::info!(external_id, "created user");

        self.require_user(db, external_id).await
    }

    /// Link a mirror document to the user and mint a fresh webhook secret.
    ///
    /// Returns the updated user; the secret is in `mirror_webhook_secret`.
    pub async fn link_mirror(
        &self,
        external_id: i64,
        document_id: &str,
        credential: &str,
    ) -> ResultEngine<User> {
        let document_id = normalize_required_text(document_id, "mirror document id")?;
        let credential = normalize_required_text(credential, "mirror credential")?;
        with_tx!(self, |db_tx| {
            let model = self.ensure_user(&db_tx, external_id).await?;
            let mut active: users::ActiveModel = model.into();
            active.mirror_document_id = ActiveValue::Set(Some(document_id));
            active.mirror_credential = ActiveValue::Set(Some(credential));
            active.mirror_webhook_secret =
                ActiveValue::Set(Some(Uuid::new_v4().simple().to_string()));
            active.updated_at = ActiveValue::Set(Utc::now());
            let model = active.update(&db_tx).await?;
            tracing::info!(external_id, "linked mirror document");
            Ok(User::from(model))
        })
    }

    /// Forget the mirror document, credential and webhook secret.
    pub async fn unlink_mirror(&self, external_id: i64) -> ResultEngine<User> {
        with_tx!(self, |db_tx| {
            let model = self.require_user(&db_tx, external_id).await?;
            let mut active: users::ActiveModel = model.into();
            active.mirror_document_id = ActiveValue::Set(None);
            active.mirror_credential = ActiveValue::Set(None);
            active.mirror_webhook_secret = ActiveValue::Set(None);
            active.updated_at = ActiveValue::Set(Utc::now());
            let model = active.update(&db_tx).await?;
            Ok(User::from(model))
        })
    }

    /// Users with a usable mirror link.
    pub async fn linked_users(&self) -> ResultEngine<Vec<User>> {
        let models = users::Entity::find()
            .filter(users::Column::MirrorDocumentId.is_not_null())
            .filter(users::Column::MirrorCredential.is_not_null())
            .all(&self.database)
            .await?;
        Ok(models.into_iter().map(User::from).collect())
    }

    pub(crate) fn check_secret(
        &self,
        presented: Option<&str>,
        owner: Option<&users::Model>,
    ) -> ResultEngine<()> {
        let Some(presented) = presented.map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(EngineError::Unauthorized("missing webhook secret".to_string()));
        };
        if self.webhook_secret.as_deref() == Some(presented) {
            return Ok(());
        }
        if owner.and_then(|u| u.mirror_webhook_secret.as_deref()) == Some(presented) {
            return Ok(());
        }
        Err(EngineError::Unauthorized("invalid webhook secret".to_string()))
    }
}
