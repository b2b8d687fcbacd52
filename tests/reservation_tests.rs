mod common;

use chrono::Duration;
use common::*;
use lottery_engine::config::LotterySettings;
use lottery_engine::entities::{LotteryStatus, PaymentStatus};
use lottery_engine::error::AppError;
use lottery_engine::external::PaymentResult;
use lottery_engine::models::Reservation;
use lottery_engine::services::{NumberStatus, ReservationService};
use sea_orm::TransactionTrait;
use std::collections::HashSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservers_never_share_a_number() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 8, 1, 1).await;

    // 20 个用户争抢 8 个号码, 请求集合相互重叠
    let mut tasks = Vec::new();
    for user_id in 0..20i64 {
        let reservations = e.reservations.clone();
        let numbers: Vec<i32> = vec![(user_id % 8) as i32 + 1, ((user_id + 3) % 8) as i32 + 1];
        tasks.push(tokio::spawn(async move {
            reservations
                .reserve(lottery_id, 100 + user_id, &numbers, Duration::minutes(15), t0())
                .await
        }));
    }

    let mut granted = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(r) => granted.extend(held(r).numbers),
            Err(err) => {
                assert!(err.is_retryable(), "unexpected error: {err}");
            }
        }
    }

    let unique: HashSet<i32> = granted.iter().copied().collect();
    assert_eq!(unique.len(), granted.len(), "double allocation in {granted:?}");
    assert!(!granted.is_empty());

    let space = e.numbers.snapshot(lottery_id, t0()).await.unwrap();
    assert_eq!(space.reserved_count(), granted.len() as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_number_lottery_has_exactly_one_winner_of_the_race() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 1, 1, 1).await;

    let a = {
        let r = e.reservations.clone();
        tokio::spawn(async move { r.reserve(lottery_id, 10, &[1], Duration::minutes(5), t0()).await })
    };
    let b = {
        let r = e.reservations.clone();
        tokio::spawn(async move { r.reserve(lottery_id, 11, &[1], Duration::minutes(5), t0()).await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser, AppError::NumberUnavailable(n) if n == &vec![1]));
}

#[tokio::test]
async fn reserve_is_all_or_nothing() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;

    e.purchase
        .reserve_tickets(&user(2), lottery_id, &[3], t0())
        .await
        .unwrap();

    let err = e
        .purchase
        .reserve_tickets(&user(3), lottery_id, &[2, 3, 4], t0())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NumberUnavailable(n) if n == vec![3]));

    // 2 和 4 没有被部分占用
    assert_eq!(e.numbers.status(lottery_id, 2, t0()).await.unwrap(), NumberStatus::Available);
    assert_eq!(e.numbers.status(lottery_id, 4, t0()).await.unwrap(), NumberStatus::Available);
}

#[tokio::test]
async fn reserve_rejects_out_of_range_and_inactive() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 5, 1, 1).await;

    let err = e
        .purchase
        .reserve_tickets(&user(2), lottery_id, &[0, 3, 6], t0())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidNumberRange(n) if n == vec![0, 6]));

    let draft = e
        .purchase
        .create_lottery(&admin(), lottery_request(5, 1, 1), t0())
        .await
        .unwrap();
    let err = e
        .purchase
        .reserve_tickets(&user(2), draft.id, &[1], t0())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::LotteryNotActive));

    // 活动结束后不再售票
    let err = e
        .purchase
        .reserve_tickets(&user(2), lottery_id, &[1], t0() + Duration::days(2))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::LotteryNotActive));
}

#[tokio::test]
async fn reserve_then_confirm_marks_numbers_sold() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;

    let handle = held(
        e.purchase
            .reserve_tickets(&user(5), lottery_id, &[7, 2], t0())
            .await
            .unwrap(),
    );
    assert_eq!(handle.numbers, vec![2, 7]);
    assert_eq!(handle.amount_due, 1000);
    assert_eq!(handle.expires_at, t0() + Duration::seconds(900));
    assert_eq!(e.numbers.status(lottery_id, 7, t0()).await.unwrap(), NumberStatus::Reserved);

    let tickets = e
        .purchase
        .confirm_purchase(&payment_service(), handle.reservation_id, card(), t0() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(tickets.len(), 2);
    assert!(tickets.iter().all(|t| t.payment_status == PaymentStatus::Paid));
    assert!(tickets.iter().all(|t| t.payment_method.as_deref() == Some("card")));

    assert_eq!(e.numbers.status(lottery_id, 7, t0()).await.unwrap(), NumberStatus::Sold);
    assert_eq!(e.ledger.count_paid(lottery_id).await.unwrap(), 2);

    // 重复确认返回同一批票据
    let again = e
        .purchase
        .confirm_purchase(&payment_service(), handle.reservation_id, card(), t0() + Duration::minutes(2))
        .await
        .unwrap();
    assert_eq!(again.len(), 2);
    assert_eq!(e.ledger.count_paid(lottery_id).await.unwrap(), 2);
}

#[tokio::test]
async fn reserve_then_release_frees_numbers() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;

    let handle = held(
        e.purchase
            .reserve_tickets(&user(5), lottery_id, &[4], t0())
            .await
            .unwrap(),
    );
    assert_eq!(
        e.purchase
            .release_reservation(&user(5), handle.reservation_id, t0())
            .await
            .unwrap(),
        1
    );
    // 幂等
    assert_eq!(
        e.purchase
            .release_reservation(&user(5), handle.reservation_id, t0())
            .await
            .unwrap(),
        0
    );
    assert_eq!(e.numbers.status(lottery_id, 4, t0()).await.unwrap(), NumberStatus::Available);

    // 号码可以被他人重新预约
    e.purchase
        .reserve_tickets(&user(6), lottery_id, &[4], t0())
        .await
        .unwrap();
}

#[tokio::test]
async fn only_the_holder_may_release() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;
    let handle = held(
        e.purchase
            .reserve_tickets(&user(5), lottery_id, &[1], t0())
            .await
            .unwrap(),
    );

    let err = e
        .purchase
        .release_reservation(&user(6), handle.reservation_id, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = e
        .purchase
        .confirm_purchase(&payment_service(), uuid::Uuid::new_v4(), card(), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn holder_cannot_settle_their_own_payment() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;
    let handle = held(
        e.purchase
            .reserve_tickets(&user(5), lottery_id, &[1], t0())
            .await
            .unwrap(),
    );

    let err = e
        .purchase
        .confirm_purchase(&user(5), handle.reservation_id, card(), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    assert_eq!(e.ledger.count_paid(lottery_id).await.unwrap(), 0);
    assert_eq!(e.numbers.status(lottery_id, 1, t0()).await.unwrap(), NumberStatus::Reserved);

    // 支付服务回传后才入账
    let tickets = e
        .purchase
        .confirm_purchase(&payment_service(), handle.reservation_id, card(), t0())
        .await
        .unwrap();
    assert_eq!(tickets[0].user_id, 5);
    assert_eq!(e.ledger.count_paid(lottery_id).await.unwrap(), 1);
}

#[tokio::test]
async fn confirm_after_expiry_fails_and_writes_no_ticket() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;
    let handle = held(
        e.reservations
            .reserve(lottery_id, 5, &[3], Duration::minutes(5), t0())
            .await
            .unwrap(),
    );

    let late = t0() + Duration::minutes(5);
    let err = e
        .reservations
        .confirm(handle.reservation_id, card(), late)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ReservationExpired));

    // 再次确认依旧失败
    let err = e
        .reservations
        .confirm(handle.reservation_id, card(), late)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ReservationExpired));

    assert_eq!(e.ledger.count_paid(lottery_id).await.unwrap(), 0);
    assert_eq!(
        e.ledger
            .count_by_status(lottery_id, PaymentStatus::Expired)
            .await
            .unwrap(),
        1
    );
    assert_eq!(e.numbers.status(lottery_id, 3, late).await.unwrap(), NumberStatus::Available);
}

#[tokio::test]
async fn expire_stale_is_idempotent() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;
    e.reservations
        .reserve(lottery_id, 5, &[1, 2], Duration::minutes(5), t0())
        .await
        .unwrap();
    e.reservations
        .reserve(lottery_id, 6, &[3], Duration::minutes(30), t0())
        .await
        .unwrap();

    let later = t0() + Duration::minutes(10);
    assert_eq!(e.reservations.expire_stale(later).await.unwrap(), 2);
    assert_eq!(e.reservations.expire_stale(later).await.unwrap(), 0);

    let space = e.numbers.snapshot(lottery_id, later).await.unwrap();
    assert_eq!(space.status(1), NumberStatus::Available);
    assert_eq!(space.status(3), NumberStatus::Reserved);
}

#[tokio::test]
async fn expired_hold_is_reclaimed_lazily_by_the_next_reserve() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;
    e.reservations
        .reserve(lottery_id, 5, &[9], Duration::minutes(5), t0())
        .await
        .unwrap();

    // 未经过定时清理, 直接被下一位用户预约
    let later = t0() + Duration::minutes(6);
    let handle = held(
        e.reservations
            .reserve(lottery_id, 6, &[9], Duration::minutes(5), later)
            .await
            .unwrap(),
    );
    assert_eq!(handle.user_id, 6);
    assert_eq!(
        e.ledger
            .count_by_status(lottery_id, PaymentStatus::Expired)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn hold_never_outlives_the_lottery() {
    let e = engine().await;
    let mut req = lottery_request(10, 1, 1);
    req.end_date = t0() + Duration::minutes(3);
    let lottery_id = open_lottery(&e, req).await;

    let handle = held(
        e.purchase
            .reserve_tickets(&user(5), lottery_id, &[1], t0())
            .await
            .unwrap(),
    );
    assert_eq!(handle.expires_at, t0() + Duration::minutes(3));
}

#[tokio::test]
async fn rejected_payment_frees_numbers() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;
    let handle = held(
        e.purchase
            .reserve_tickets(&user(5), lottery_id, &[1], t0())
            .await
            .unwrap(),
    );

    let err = e
        .purchase
        .confirm_purchase(
            &payment_service(),
            handle.reservation_id,
            PaymentResult::Rejected {
                reason: "card declined".into(),
            },
            t0(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PaymentRejected(_)));
    assert_eq!(
        e.ledger
            .count_by_status(lottery_id, PaymentStatus::Failed)
            .await
            .unwrap(),
        1
    );
    assert_eq!(e.numbers.status(lottery_id, 1, t0()).await.unwrap(), NumberStatus::Available);

    e.purchase
        .reserve_tickets(&user(6), lottery_id, &[1], t0())
        .await
        .unwrap();
}

#[tokio::test]
async fn free_lottery_auto_confirms_when_enabled() {
    let e = engine().await;
    let mut req = lottery_request(10, 1, 1);
    req.is_free = true;
    req.ticket_price = 0;
    let lottery_id = open_lottery(&e, req).await;

    let reservation = e
        .purchase
        .reserve_tickets(&user(5), lottery_id, &[1, 2], t0())
        .await
        .unwrap();
    let Reservation::Confirmed(tickets) = reservation else {
        panic!("free lottery should confirm immediately");
    };
    assert_eq!(tickets.len(), 2);
    assert!(tickets.iter().all(|t| t.payment_status == PaymentStatus::Paid && t.payment_amount == 0));

    let err = e
        .purchase
        .reserve_tickets(&user(6), lottery_id, &[2], t0())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NumberUnavailable(_)));
}

#[tokio::test]
async fn free_lottery_holds_when_auto_confirm_is_off() {
    let e = engine_with(LotterySettings {
        free_lottery_auto_confirm: false,
        ..LotterySettings::default()
    })
    .await;
    let mut req = lottery_request(10, 1, 1);
    req.is_free = true;
    req.ticket_price = 0;
    let lottery_id = open_lottery(&e, req).await;

    let handle = held(
        e.purchase
            .reserve_tickets(&user(5), lottery_id, &[1], t0())
            .await
            .unwrap(),
    );
    assert_eq!(handle.amount_due, 0);
    assert_eq!(e.ledger.count_paid(lottery_id).await.unwrap(), 0);
}

#[tokio::test]
async fn settings_reload_changes_the_ttl_of_new_holds() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;

    e.settings.replace(LotterySettings {
        reservation_ttl_secs: 60,
        ..LotterySettings::default()
    });
    let handle = held(
        e.purchase
            .reserve_tickets(&user(5), lottery_id, &[1], t0())
            .await
            .unwrap(),
    );
    assert_eq!(handle.expires_at, t0() + Duration::seconds(60));
}

#[tokio::test]
async fn available_numbers_are_listed_in_order_with_limit() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 6, 1, 1).await;
    buy(&e, lottery_id, 5, &[1]).await;
    e.purchase
        .reserve_tickets(&user(6), lottery_id, &[3], t0())
        .await
        .unwrap();

    let listed = e
        .purchase
        .list_available_numbers(lottery_id, Some(2), t0())
        .await
        .unwrap();
    assert_eq!(listed.numbers, vec![2, 4]);
    assert_eq!(listed.available_count, 4);

    let status = e.purchase.get_lottery_status(lottery_id, t0()).await.unwrap();
    assert_eq!(status.counts.paid, 1);
    assert_eq!(status.counts.sold, 1);
    assert_eq!(status.counts.reserved, 1);
    assert_eq!(status.counts.pending, 1);
    assert_eq!(status.counts.available, 4);

    let mine = e.purchase.list_my_tickets(&user(5), lottery_id).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].ticket_number, 1);
}

#[tokio::test]
async fn ledger_enforces_one_live_claim_per_number() {
    use lottery_engine::services::NewTicket;

    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;
    let ticket = |user_id: i64, status: PaymentStatus| NewTicket {
        lottery_id,
        reservation_id: None,
        ticket_number: 4,
        user_id,
        payment_status: status,
        payment_amount: 500,
        payment_method: Some("manual".into()),
    };

    let first = e.ledger.record_ticket(ticket(5, PaymentStatus::Paid)).await.unwrap();
    assert!(first.paid_at.is_some());

    // 失败 / 过期记录不占用号码, 第二张已支付票据被唯一索引拒绝
    e.ledger.record_ticket(ticket(6, PaymentStatus::Failed)).await.unwrap();
    let err = e
        .ledger
        .record_ticket(ticket(7, PaymentStatus::Paid))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DatabaseError(_)));

    assert_eq!(e.ledger.list_by_lottery(lottery_id).await.unwrap().len(), 2);
    assert_eq!(e.ledger.list_by_user(6, lottery_id).await.unwrap().len(), 1);
    assert_eq!(e.ledger.count_paid(lottery_id).await.unwrap(), 1);
    assert_eq!(e.numbers.available_count(lottery_id, t0()).await.unwrap(), 9);
}

#[tokio::test]
async fn whole_number_space_of_a_large_lottery_can_be_bought_at_once() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 5000, 1, 3).await;
    let numbers: Vec<i32> = (1..=5000).collect();

    let handle = held(
        e.purchase
            .reserve_tickets(&user(5), lottery_id, &numbers, t0())
            .await
            .unwrap(),
    );
    assert_eq!(handle.numbers.len(), 5000);
    assert_eq!(handle.amount_due, 5000 * 500);
    assert_eq!(e.numbers.available_count(lottery_id, t0()).await.unwrap(), 0);

    let tickets = e
        .purchase
        .confirm_purchase(&payment_service(), handle.reservation_id, card(), t0())
        .await
        .unwrap();
    assert_eq!(tickets.len(), 5000);
    assert_eq!(e.ledger.count_paid(lottery_id).await.unwrap(), 5000);

    // 售罄后立即关闭并开奖
    let lottery = e.purchase.get_lottery(lottery_id).await.unwrap();
    assert_eq!(lottery.status, LotteryStatus::Finished);
    assert_eq!(e.winners.list_winners(lottery_id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn large_expired_hold_is_reclaimed_by_the_next_reserve() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 5000, 1, 1).await;
    let numbers: Vec<i32> = (1..=5000).collect();

    e.reservations
        .reserve(lottery_id, 5, &numbers, Duration::minutes(5), t0())
        .await
        .unwrap();
    let later = t0() + Duration::minutes(10);
    let handle = held(
        e.reservations
            .reserve(lottery_id, 6, &numbers, Duration::minutes(5), later)
            .await
            .unwrap(),
    );
    assert_eq!(handle.user_id, 6);
    assert_eq!(
        e.ledger
            .count_by_status(lottery_id, PaymentStatus::Expired)
            .await
            .unwrap(),
        5000
    );
}

#[tokio::test]
async fn claim_after_stale_admission_reports_contention() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;
    let lottery = e.purchase.get_lottery(lottery_id).await.unwrap();

    // 两个调用者读到同一快照, 都认为号码 1 可用
    let space = e.numbers.snapshot(lottery_id, t0()).await.unwrap();
    assert!(space.unavailable_among(&[1]).is_empty());

    // 先到者提交
    held(
        e.reservations
            .reserve(lottery_id, 5, &[1], Duration::minutes(15), t0())
            .await
            .unwrap(),
    );

    // 后到者跳过准入直接写入, 由唯一索引裁决
    let txn = e.db.begin().await.unwrap();
    let err = ReservationService::claim_in(&txn, &lottery, 6, &[1], Duration::minutes(15), false, t0())
        .await
        .unwrap_err();
    txn.rollback().await.unwrap();
    assert!(
        matches!(&err, AppError::NumberUnavailable(n) if n == &vec![1]),
        "unexpected error: {err:?}"
    );
    assert!(err.is_retryable());

    // 免费自动确认路径同样映射为号码冲突
    let txn = e.db.begin().await.unwrap();
    let err = ReservationService::claim_in(&txn, &lottery, 7, &[1], Duration::minutes(15), true, t0())
        .await
        .unwrap_err();
    txn.rollback().await.unwrap();
    assert!(matches!(err, AppError::NumberUnavailable(_)));

    assert!(e.ledger.list_by_user(6, lottery_id).await.unwrap().is_empty());
    assert_eq!(e.numbers.status(lottery_id, 1, t0()).await.unwrap(), NumberStatus::Reserved);
}
