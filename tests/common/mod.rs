#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use mealdrop_api::entities::{
    coupon::{self, CouponKind},
    coupon_usage, menu_item, order, order_line, order_status_history, vendor, wallet,
};
use mealdrop_api::AppServices;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend,
    Schema, Set,
};
use uuid::Uuid;

/// In-memory SQLite with the full schema, on a single-connection pool so
/// every session sees the same database.
pub async fn setup_db() -> Arc<DatabaseConnection> {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.expect("sqlite connect");

    let schema = Schema::new(DbBackend::Sqlite);
    let backend = db.get_database_backend();
    let statements = [
        schema.create_table_from_entity(vendor::Entity),
        schema.create_table_from_entity(menu_item::Entity),
        schema.create_table_from_entity(coupon::Entity),
        schema.create_table_from_entity(coupon_usage::Entity),
        schema.create_table_from_entity(order::Entity),
        schema.create_table_from_entity(order_line::Entity),
        schema.create_table_from_entity(order_status_history::Entity),
        schema.create_table_from_entity(wallet::Entity),
    ];
    for statement in &statements {
        db.execute(backend.build(statement))
            .await
            .expect("create table");
    }

    Arc::new(db)
}

pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = setup_db().await;
        let services = AppServices::with_sender(db.clone(), None);
        Self { db, services }
    }

    pub async fn seed_vendor(&self, tax_fee: i64, additional_fee: i64, courier_fee: i64) -> vendor::Model {
        let now = Utc::now();
        vendor::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Test Kitchen".to_string()),
            owner_id: Set(Uuid::new_v4()),
            tax_fee: Set(tax_fee),
            additional_fee: Set(additional_fee),
            courier_fee: Set(courier_fee),
            is_open: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed vendor")
    }

    pub async fn seed_item(&self, vendor_id: Uuid, name: &str, unit_price: i64) -> menu_item::Model {
        let now = Utc::now();
        menu_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            vendor_id: Set(vendor_id),
            name: Set(name.to_string()),
            unit_price: Set(unit_price),
            is_available: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed menu item")
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn seed_coupon(
        &self,
        code: &str,
        kind: CouponKind,
        value: i64,
        min_order_price: i64,
        remaining_uses: i32,
        max_uses_per_user: i32,
        starts_on: NaiveDate,
        ends_on: NaiveDate,
    ) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            kind: Set(kind),
            value: Set(value),
            min_order_price: Set(min_order_price),
            remaining_uses: Set(remaining_uses),
            max_uses_per_user: Set(max_uses_per_user),
            starts_on: Set(starts_on),
            ends_on: Set(ends_on),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed coupon")
    }

    /// Coupon valid from 30 days ago to 30 days from now.
    pub async fn seed_open_coupon(
        &self,
        code: &str,
        kind: CouponKind,
        value: i64,
        min_order_price: i64,
        remaining_uses: i32,
        max_uses_per_user: i32,
    ) -> coupon::Model {
        let today = Utc::now().date_naive();
        self.seed_coupon(
            code,
            kind,
            value,
            min_order_price,
            remaining_uses,
            max_uses_per_user,
            today - chrono::Duration::days(30),
            today + chrono::Duration::days(30),
        )
        .await
    }

    pub async fn seed_wallet(&self, user_id: Uuid, balance: i64) {
        wallet::ActiveModel {
            user_id: Set(user_id),
            balance: Set(balance),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed wallet");
    }
}
