use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::wallet::{self, Entity as Wallet},
    errors::ServiceError,
};

/// Credits a wallet on the caller's connection, creating it on first use.
pub async fn apply_credit<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    if amount < 0 {
        return Err(ServiceError::InvalidOperation(
            "Credit amount must be non-negative".to_string(),
        ));
    }

    let updated = Wallet::update_many()
        .col_expr(
            wallet::Column::Balance,
            Expr::col(wallet::Column::Balance).add(amount),
        )
        .col_expr(wallet::Column::UpdatedAt, Expr::value(now))
        .filter(wallet::Column::UserId.eq(user_id))
        .exec(conn)
        .await?;

    if updated.rows_affected == 0 {
        wallet::ActiveModel {
            user_id: Set(user_id),
            balance: Set(amount),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;
    }

    Ok(())
}

/// Debits a wallet on the caller's connection. The balance check and the
/// decrement are one conditional update, so the non-negative invariant holds
/// under concurrent settlement attempts.
pub async fn apply_debit<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    if amount < 0 {
        return Err(ServiceError::InvalidOperation(
            "Debit amount must be non-negative".to_string(),
        ));
    }

    let updated = Wallet::update_many()
        .col_expr(
            wallet::Column::Balance,
            Expr::col(wallet::Column::Balance).sub(amount),
        )
        .col_expr(wallet::Column::UpdatedAt, Expr::value(now))
        .filter(wallet::Column::UserId.eq(user_id))
        .filter(wallet::Column::Balance.gte(amount))
        .exec(conn)
        .await?;

    if updated.rows_affected == 0 {
        let balance = Wallet::find_by_id(user_id)
            .one(conn)
            .await?
            .map(|w| w.balance)
            .unwrap_or(0);
        return Err(ServiceError::InsufficientFunds {
            user_id,
            balance,
            required: amount,
        });
    }

    Ok(())
}

#[derive(Clone)]
pub struct WalletService {
    db: Arc<DatabaseConnection>,
}

impl WalletService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get_balance(&self, user_id: Uuid) -> Result<i64, ServiceError> {
        Ok(Wallet::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .map(|w| w.balance)
            .unwrap_or(0))
    }

    #[instrument(skip(self), fields(user_id = %user_id, amount = amount))]
    pub async fn credit(&self, user_id: Uuid, amount: i64) -> Result<i64, ServiceError> {
        let txn = self.db.begin().await?;
        apply_credit(&txn, user_id, amount, Utc::now()).await?;
        txn.commit().await?;
        let balance = self.get_balance(user_id).await?;
        info!(user_id = %user_id, balance = balance, "wallet credited");
        Ok(balance)
    }

    #[instrument(skip(self), fields(user_id = %user_id, amount = amount))]
    pub async fn debit(&self, user_id: Uuid, amount: i64) -> Result<i64, ServiceError> {
        let txn = self.db.begin().await?;
        apply_debit(&txn, user_id, amount, Utc::now()).await?;
        txn.commit().await?;
        let balance = self.get_balance(user_id).await?;
        info!(user_id = %user_id, balance = balance, "wallet debited");
        Ok(balance)
    }
}
