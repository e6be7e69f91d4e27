use chrono::Utc;
use sea_orm::{ActiveValue, QueryFilter, QueryOrder, TransactionTrait, prelude::*};

use crate::{
    EngineError, PaymentCategory, PaymentMethod, ResultEngine,
    catalog::{self, method_key, normalize_method_name},
    payment_methods,
};

use super::{Engine, with_tx};

impl Engine {
    /// Built-in methods merged with the user's custom ones, in display order.
    pub async fn payment_methods(&self, external_id: i64) -> ResultEngine<Vec<PaymentMethod>> {
        let Some(user) = self.user_model(&self.database, external_id).await? else {
            return Ok(catalog::catalog(Vec::new()));
        };
        let rows = payment_methods::Entity::find()
            .filter(payment_methods::Column::UserId.eq(user.id))
            .order_by_asc(payment_methods::Column::Id)
            .all(&self.database)
            .await?;

        let mut custom = Vec::with_capacity(rows.len());
        for row in rows {
            let category = PaymentCategory::try_from(row.category.as_str())?;
            custom.push(PaymentMethod::custom(&row.name, category));
        }
        Ok(catalog::catalog(custom))
    }

    /// Persist a custom method. Duplicates of built-ins or of existing custom
    /// methods (case-insensitive) are rejected with `ExistingKey`.
    pub async fn add_payment_method(
        &self,
        external_id: i64,
        name: &str,
        category: PaymentCategory,
    ) -> ResultEngine<PaymentMethod> {
        if category == PaymentCategory::Cash {
            return Err(EngineError::InvalidInput(
                "custom methods must be Bank, E-Wallet or Other".to_string(),
            ));
        }
        let name = normalize_method_name(name)?;
        let key = method_key(&name);
        if catalog::builtin_methods()
            .iter()
            .any(|m| method_key(&m.name) == key)
        {
            return Err(EngineError::ExistingKey(name));
        }

        with_tx!(self, |db_tx| {
            let user = self.ensure_user(&db_tx, external_id).await?;
            let exists = payment_methods::Entity::find()
                .filter(payment_methods::Column::UserId.eq(user.id))
                .filter(payment_methods::Column::NameNorm.eq(key.clone()))
                .one(&db_tx)
                .await?
                .is_some();
            if exists {
                return Err(EngineError::ExistingKey(name));
            }

            payment_methods::ActiveModel {
                id: ActiveValue::NotSet,
                user_id: ActiveValue::Set(user.id),
                name: ActiveValue::Set(name.clone()),
                name_norm: ActiveValue::Set(key),
                category: ActiveValue::Set(category.as_str().to_string()),
                created_at: ActiveValue::Set(Utc::now()),
            }
            .insert(&db_tx)
            .await?;
            tracing::info!(external_id, method = %name, category = category.as_str(), "custom payment method added");
            Ok(PaymentMethod::custom(&name, category))
        })
    }

    /// Drop every custom method of the user.
    pub async fn reset_payment_methods(&self, external_id: i64) -> ResultEngine<u64> {
        let Some(user) = self.user_model(&self.database, external_id).await? else {
            return Ok(0);
        };
        let result = payment_methods::Entity::delete_many()
            .filter(payment_methods::Column::UserId.eq(user.id))
            .exec(&self.database)
            .await?;
        Ok(result.rows_affected)
    }
}
