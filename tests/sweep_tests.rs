mod common;

use chrono::Duration;
use common::*;
use lottery_engine::entities::LotteryStatus;
use lottery_engine::services::NumberStatus;
use sea_orm::{ConnectionTrait, DbBackend, Statement};

#[tokio::test]
async fn sweep_expires_holds_and_advances_due_lotteries() {
    let e = engine().await;
    let due = active_lottery(&e, 10, 1, 1).await;
    for n in 1..=2 {
        buy(&e, due, 100 + n as i64, &[n]).await;
    }
    e.reservations
        .reserve(due, 200, &[5], Duration::minutes(5), t0())
        .await
        .unwrap();

    let mut req = lottery_request(10, 1, 1);
    req.end_date = t0() + Duration::days(7);
    let running = open_lottery(&e, req).await;
    e.reservations
        .reserve(running, 201, &[1], Duration::minutes(5), t0())
        .await
        .unwrap();

    let end = t0() + Duration::days(1);
    let report = e.sweep.run_once(end).await.unwrap();
    assert_eq!(report.expired_holds, 2);
    assert!(report.failures.is_empty());
    let for_due: Vec<_> = report
        .transitions
        .iter()
        .filter(|t| t.lottery_id == due)
        .map(|t| t.to)
        .collect();
    assert_eq!(for_due, vec![LotteryStatus::Closed, LotteryStatus::Finished]);
    assert!(report.transitions.iter().all(|t| t.lottery_id != running));

    assert_eq!(e.lifecycle.get(due).await.unwrap().status, LotteryStatus::Finished);
    assert_eq!(e.lifecycle.get(running).await.unwrap().status, LotteryStatus::Active);
    assert_eq!(e.numbers.status(running, 1, end).await.unwrap(), NumberStatus::Available);
    assert_eq!(e.winners.list_winners(due).await.unwrap().len(), 1);
}

#[tokio::test]
async fn repeated_sweeps_are_no_ops() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 5, 1).await;
    buy(&e, lottery_id, 5, &[1]).await;

    let end = t0() + Duration::days(1);
    let first = e.sweep.run_once(end).await.unwrap();
    assert_eq!(first.transitions.len(), 2);
    assert_eq!(e.lifecycle.get(lottery_id).await.unwrap().status, LotteryStatus::Cancelled);

    let second = e.sweep.run_once(end).await.unwrap();
    assert_eq!(second.expired_holds, 0);
    assert!(second.transitions.is_empty());
}

#[tokio::test]
async fn sweep_before_deadline_changes_nothing() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;
    buy(&e, lottery_id, 5, &[1]).await;

    let report = e.sweep.run_once(t0() + Duration::minutes(1)).await.unwrap();
    assert_eq!(report.expired_holds, 0);
    assert!(report.transitions.is_empty());
    assert_eq!(e.lifecycle.get(lottery_id).await.unwrap().status, LotteryStatus::Active);
}

#[tokio::test]
async fn failed_hold_expiry_does_not_stall_lottery_advancement() {
    let e = engine().await;
    let lottery_id = active_lottery(&e, 10, 1, 1).await;
    for n in 1..=2 {
        buy(&e, lottery_id, 100 + n as i64, &[n]).await;
    }

    // 占用表不可用时过期清理必然失败
    e.db.execute(Statement::from_string(
        DbBackend::Sqlite,
        "DROP TABLE reserved_numbers".to_owned(),
    ))
    .await
    .unwrap();

    let end = t0() + Duration::days(1);
    let report = e.sweep.run_once(end).await.unwrap();
    assert!(report.expiry_failed);
    assert_eq!(report.expired_holds, 0);
    assert!(report.failures.is_empty());
    let path: Vec<_> = report.transitions.iter().map(|t| t.to).collect();
    assert_eq!(path, vec![LotteryStatus::Closed, LotteryStatus::Finished]);
    assert_eq!(e.winners.list_winners(lottery_id).await.unwrap().len(), 1);
}
