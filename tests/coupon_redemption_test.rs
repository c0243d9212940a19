//! Coupon validation and atomic redemption: usage caps must hold even when
//! many checkouts race on the same coupon.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestApp;
use mealdrop_api::{
    entities::{coupon, coupon_usage::Entity as CouponUsage},
    errors::{CouponRejection, ServiceError},
    services::coupons::CouponDecision,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

async fn reload_coupon(app: &TestApp, id: Uuid) -> coupon::Model {
    coupon::Entity::find_by_id(id)
        .one(&*app.db)
        .await
        .expect("query coupon")
        .expect("coupon exists")
}

async fn usage_count(app: &TestApp, coupon_id: Uuid) -> u64 {
    CouponUsage::find()
        .filter(mealdrop_api::entities::coupon_usage::Column::CouponId.eq(coupon_id))
        .count(&*app.db)
        .await
        .expect("count usages")
}

#[tokio::test]
async fn fixed_coupon_respects_minimum_price() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    app.seed_open_coupon("FIXED100", coupon::CouponKind::Fixed, 100, 500, 10, 3)
        .await;

    // Total 300: rejected without consuming anything.
    let preview = app
        .services
        .coupons
        .preview("FIXED100", 300, user)
        .await
        .expect("preview");
    assert!(!preview.valid);
    assert_eq!(preview.discount, 0);
    assert_matches!(
        preview.reason,
        Some(CouponRejection::BelowMinimumPrice { required: 500, total: 300 })
    );

    let err = app
        .services
        .redemption
        .redeem("FIXED100", user, 300)
        .await
        .expect_err("below minimum must reject");
    assert_matches!(
        err,
        ServiceError::CouponRejected(CouponRejection::BelowMinimumPrice { .. })
    );

    // Total 500: discount of exactly 100.
    let redeemed = app
        .services
        .redemption
        .redeem("FIXED100", user, 500)
        .await
        .expect("valid redemption");
    assert_eq!(redeemed.discount, 100);
}

#[tokio::test]
async fn validate_is_read_only() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let seeded = app
        .seed_open_coupon("PREVIEW", coupon::CouponKind::Percent, 20, 0, 5, 1)
        .await;

    let decision = app
        .services
        .coupons
        .validate("PREVIEW", 1000, user, Utc::now().date_naive())
        .await
        .expect("validate");
    assert_matches!(decision, CouponDecision::Eligible(_));

    // No decrement, no ledger row.
    assert_eq!(reload_coupon(&app, seeded.id).await.remaining_uses, 5);
    assert_eq!(usage_count(&app, seeded.id).await, 0);
}

#[tokio::test]
async fn unknown_code_is_rejected() {
    let app = TestApp::new().await;
    let decision = app
        .services
        .coupons
        .validate("NOPE", 1000, Uuid::new_v4(), Utc::now().date_naive())
        .await
        .expect("validate");
    assert_matches!(decision, CouponDecision::Rejected(CouponRejection::NotFound));
}

#[tokio::test]
async fn validity_window_is_date_inclusive() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let today = Utc::now().date_naive();
    app.seed_coupon(
        "WINDOW",
        coupon::CouponKind::Fixed,
        50,
        0,
        5,
        1,
        today - Duration::days(1),
        today + Duration::days(30),
    )
    .await;

    // Two days before the window opens.
    let decision = app
        .services
        .coupons
        .validate("WINDOW", 1000, user, today - Duration::days(2))
        .await
        .expect("validate");
    assert_matches!(
        decision,
        CouponDecision::Rejected(CouponRejection::NotYetStarted)
    );

    // One day past the window.
    let decision = app
        .services
        .coupons
        .validate("WINDOW", 1000, user, today + Duration::days(31))
        .await
        .expect("validate");
    assert_matches!(decision, CouponDecision::Rejected(CouponRejection::Expired));

    // Boundary days are valid.
    for day in [today - Duration::days(1), today + Duration::days(30)] {
        let decision = app
            .services
            .coupons
            .validate("WINDOW", 1000, user, day)
            .await
            .expect("validate");
        assert_matches!(decision, CouponDecision::Eligible(_));
    }
}

#[tokio::test]
async fn race_on_last_remaining_use_admits_exactly_one() {
    let app = TestApp::new().await;
    let seeded = app
        .seed_open_coupon("LASTONE", coupon::CouponKind::Fixed, 100, 0, 1, 1)
        .await;

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let redemption = app.services.redemption.clone();
        let user = Uuid::new_v4();
        tasks.push(tokio::spawn(async move {
            redemption.redeem("LASTONE", user, 1000).await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        match task.await.expect("join") {
            Ok(_) => successes += 1,
            Err(err) => assert_matches!(
                err,
                ServiceError::CouponRejected(CouponRejection::GloballyExhausted)
                    | ServiceError::RedemptionConflict(_)
            ),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(reload_coupon(&app, seeded.id).await.remaining_uses, 0);
    assert_eq!(usage_count(&app, seeded.id).await, 1);
}

#[tokio::test]
async fn global_allotment_is_never_exceeded() {
    let app = TestApp::new().await;
    let seeded = app
        .seed_open_coupon("LIMITED5", coupon::CouponKind::Fixed, 100, 0, 5, 1)
        .await;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let redemption = app.services.redemption.clone();
        let user = Uuid::new_v4();
        tasks.push(tokio::spawn(async move {
            redemption.redeem("LIMITED5", user, 1000).await.is_ok()
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.expect("join") {
            successes += 1;
        }
    }

    assert_eq!(successes, 5);
    assert_eq!(reload_coupon(&app, seeded.id).await.remaining_uses, 0);
    assert_eq!(usage_count(&app, seeded.id).await, 5);
}

#[tokio::test]
async fn per_user_limit_is_enforced() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let seeded = app
        .seed_open_coupon("TWICE", coupon::CouponKind::Fixed, 100, 0, 10, 2)
        .await;

    for _ in 0..2 {
        app.services
            .redemption
            .redeem("TWICE", user, 1000)
            .await
            .expect("within per-user cap");
    }

    let err = app
        .services
        .redemption
        .redeem("TWICE", user, 1000)
        .await
        .expect_err("third use must reject");
    assert_matches!(
        err,
        ServiceError::CouponRejected(CouponRejection::UserLimitReached)
    );

    // The two consumed uses are the only ledger rows, with ordinals 1 and 2.
    assert_eq!(usage_count(&app, seeded.id).await, 2);
    // Another user is unaffected by this user's cap.
    app.services
        .redemption
        .redeem("TWICE", Uuid::new_v4(), 1000)
        .await
        .expect("other user may redeem");
}

#[tokio::test]
async fn per_user_limit_holds_under_concurrency() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let seeded = app
        .seed_open_coupon("RACER", coupon::CouponKind::Fixed, 100, 0, 50, 2)
        .await;

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let redemption = app.services.redemption.clone();
        tasks.push(tokio::spawn(async move {
            redemption.redeem("RACER", user, 1000).await.is_ok()
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.expect("join") {
            successes += 1;
        }
    }

    assert!(successes <= 2, "cap of 2 exceeded: {}", successes);
    let rows = CouponUsage::find()
        .filter(mealdrop_api::entities::coupon_usage::Column::CouponId.eq(seeded.id))
        .filter(mealdrop_api::entities::coupon_usage::Column::UserId.eq(user))
        .count(&*app.db)
        .await
        .expect("count user usages");
    assert_eq!(rows, successes);
    // Remaining uses reflect exactly the successful consumptions.
    assert_eq!(
        reload_coupon(&app, seeded.id).await.remaining_uses,
        50 - successes as i32
    );
}

#[tokio::test]
async fn deleting_a_coupon_cascades_its_ledger() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let seeded = app
        .seed_open_coupon("GONE", coupon::CouponKind::Fixed, 100, 0, 5, 5)
        .await;

    app.services
        .redemption
        .redeem("GONE", user, 1000)
        .await
        .expect("redeem before delete");
    assert_eq!(usage_count(&app, seeded.id).await, 1);

    app.services
        .coupons
        .delete_coupon(seeded.id)
        .await
        .expect("delete coupon");
    assert_eq!(usage_count(&app, seeded.id).await, 0);
    assert!(app
        .services
        .coupons
        .get_coupon(seeded.id)
        .await
        .expect("query")
        .is_none());
}
