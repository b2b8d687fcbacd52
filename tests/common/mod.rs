#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use lottery_engine::config::{LotterySettings, SettingsHandle};
use lottery_engine::database::run_migrations;
use lottery_engine::models::{CreateLotteryRequest, CurrentUser, Reservation, ReservationHandle, UserRole};
use lottery_engine::services::*;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use uuid::Uuid;

/// Fixed clock so timestamps compare exactly in SQLite.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
}

pub fn admin() -> CurrentUser {
    CurrentUser {
        id: 1,
        role: UserRole::Admin,
    }
}

pub fn user(id: i64) -> CurrentUser {
    CurrentUser {
        id,
        role: UserRole::User,
    }
}

/// Service account the payment service confirms with.
pub fn payment_service() -> CurrentUser {
    CurrentUser {
        id: 900,
        role: UserRole::PaymentService,
    }
}

pub async fn setup_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    run_migrations(&db).await.unwrap();
    db
}

#[derive(Clone)]
pub struct Engine {
    pub db: DatabaseConnection,
    pub settings: SettingsHandle,
    pub numbers: NumberSpaceService,
    pub reservations: ReservationService,
    pub ledger: PurchaseLedger,
    pub winners: WinnerSelector,
    pub lifecycle: LotteryLifecycleService,
    pub purchase: PurchaseService,
    pub sweep: SweepService,
}

pub async fn engine() -> Engine {
    engine_with(LotterySettings::default()).await
}

pub async fn engine_with(settings: LotterySettings) -> Engine {
    let db = setup_db().await;
    let settings = SettingsHandle::new(settings);
    let numbers = NumberSpaceService::new(db.clone());
    let reservations = ReservationService::new(db.clone(), settings.clone());
    let ledger = PurchaseLedger::new(db.clone());
    let winners = WinnerSelector::with_seed(db.clone(), 7);
    let lifecycle = LotteryLifecycleService::new(db.clone(), winners.clone());
    let purchase = PurchaseService::new(
        settings.clone(),
        numbers.clone(),
        reservations.clone(),
        ledger.clone(),
        lifecycle.clone(),
        winners.clone(),
    );
    let sweep = SweepService::new(reservations.clone(), lifecycle.clone());
    Engine {
        db,
        settings,
        numbers,
        reservations,
        ledger,
        winners,
        lifecycle,
        purchase,
        sweep,
    }
}

pub fn lottery_request(max_tickets: i32, min_tickets: i32, num_winners: i32) -> CreateLotteryRequest {
    CreateLotteryRequest {
        title: "Autumn raffle".into(),
        description: "Test lottery".into(),
        is_free: false,
        ticket_price: 500,
        min_tickets,
        max_tickets,
        num_winners,
        start_date: t0() - Duration::hours(1),
        end_date: t0() + Duration::days(1),
        prize_description: Some("A bicycle".into()),
        terms: None,
    }
}

/// Create and activate a paid lottery open at `t0()`.
pub async fn active_lottery(e: &Engine, max_tickets: i32, min_tickets: i32, num_winners: i32) -> Uuid {
    open_lottery(e, lottery_request(max_tickets, min_tickets, num_winners)).await
}

pub async fn open_lottery(e: &Engine, req: CreateLotteryRequest) -> Uuid {
    let lottery = e.purchase.create_lottery(&admin(), req, t0()).await.unwrap();
    e.purchase
        .activate_lottery(&admin(), lottery.id, t0())
        .await
        .unwrap();
    lottery.id
}

pub fn held(reservation: Reservation) -> ReservationHandle {
    match reservation {
        Reservation::Held(handle) => handle,
        Reservation::Confirmed(_) => panic!("expected a held reservation"),
    }
}

pub fn card() -> lottery_engine::external::PaymentResult {
    lottery_engine::external::PaymentResult::Confirmed {
        method: "card".into(),
        reference: Some("ch_test".into()),
    }
}

/// Reserve as `user_id`, then settle through the payment service.
pub async fn buy(e: &Engine, lottery_id: Uuid, user_id: i64, numbers: &[i32]) {
    let handle = held(
        e.purchase
            .reserve_tickets(&user(user_id), lottery_id, numbers, t0())
            .await
            .unwrap(),
    );
    e.purchase
        .confirm_purchase(&payment_service(), handle.reservation_id, card(), t0())
        .await
        .unwrap();
}
