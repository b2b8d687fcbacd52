use crate::config::SettingsHandle;
use crate::entities::{
    LotteryStatus, PaymentStatus, lottery_entity as lotteries, reserved_number_entity as reserved,
    ticket_entity as tickets,
};
use crate::error::{AppError, AppResult};
use crate::external::PaymentResult;
use crate::models::{Reservation, ReservationHandle};
use crate::services::number_space::NumberSpace;
use crate::services::purchase_ledger::{NewTicket, PurchaseLedger, WRITE_CHUNK};
use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};
use std::collections::BTreeSet;
use uuid::Uuid;

/// 免费活动自动确认时记录的支付方式
pub const FREE_PAYMENT_METHOD: &str = "free";

/// Map a unique-constraint violation on the claim insert to contention.
fn claim_conflict(err: DbErr, numbers: &[i32]) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            log::debug!("Claim conflict on numbers {numbers:?}");
            AppError::NumberUnavailable(numbers.to_vec())
        }
        _ => AppError::DatabaseError(err),
    }
}

/// Time-limited exclusive holds on ticket numbers.
///
/// Every mutation runs in a single store transaction and relies on the unique
/// indexes over `reserved_numbers` and live `tickets` rows; no in-process lock
/// is involved, so several instances may share one database.
#[derive(Clone)]
pub struct ReservationService {
    pool: DatabaseConnection,
    settings: SettingsHandle,
}

impl ReservationService {
    pub fn new(pool: DatabaseConnection, settings: SettingsHandle) -> Self {
        Self { pool, settings }
    }

    /// 预约号码 (全有或全无)
    ///
    /// 逻辑:
    /// 1. 校验活动处于售票窗口、号码在 [1, max_tickets] 范围内
    /// 2. 清理请求号码上已过期但未被定时任务处理的占用
    /// 3. 根据号码快照做准入控制, 任一号码不可用则整体失败
    /// 4. 写入 pending 票据与占用行, 唯一索引冲突即视为被他人抢占
    ///
    /// Free lotteries skip the hold and write paid tickets directly when
    /// `free_lottery_auto_confirm` is on.
    pub async fn reserve(
        &self,
        lottery_id: Uuid,
        user_id: i64,
        numbers: &[i32],
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        let numbers: Vec<i32> = numbers
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if numbers.is_empty() {
            return Err(AppError::ValidationError("No ticket numbers requested".into()));
        }
        if ttl <= Duration::zero() {
            return Err(AppError::ValidationError("Reservation TTL must be positive".into()));
        }

        let txn = self.pool.begin().await?;

        let lottery = lotteries::Entity::find_by_id(lottery_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("Lottery not found".into()))?;

        if !lottery.is_open_at(now) {
            return Err(AppError::LotteryNotActive);
        }

        let out_of_range: Vec<i32> = numbers
            .iter()
            .copied()
            .filter(|n| !lottery.contains_number(*n))
            .collect();
        if !out_of_range.is_empty() {
            return Err(AppError::InvalidNumberRange(out_of_range));
        }

        // 顺带释放请求号码上的过期占用, 不必等待定时任务
        let mut stale_reservations = BTreeSet::new();
        for chunk in numbers.chunks(WRITE_CHUNK) {
            let stale = reserved::Entity::find()
                .filter(reserved::Column::LotteryId.eq(lottery_id))
                .filter(reserved::Column::TicketNumber.is_in(chunk.to_vec()))
                .filter(reserved::Column::ExpiresAt.lte(now))
                .all(&txn)
                .await?;
            stale_reservations.extend(stale.into_iter().map(|h| h.reservation_id));
        }
        for reservation_id in stale_reservations {
            Self::expire_reservation_in(&txn, reservation_id, now).await?;
        }

        let space = NumberSpace::load(&txn, &lottery, now).await?;
        if space.available_count() < numbers.len() as u64 {
            return Err(AppError::NumberUnavailable(space.unavailable_among(&numbers)));
        }
        let taken = space.unavailable_among(&numbers);
        if !taken.is_empty() {
            log::debug!("Lottery {lottery_id}: numbers {taken:?} already claimed");
            return Err(AppError::NumberUnavailable(taken));
        }

        let auto_confirm = lottery.is_free && self.settings.current().free_lottery_auto_confirm;
        let reservation =
            Self::claim_in(&txn, &lottery, user_id, &numbers, ttl, auto_confirm, now).await?;
        txn.commit().await?;

        match &reservation {
            Reservation::Confirmed(_) => {
                log::info!("Lottery {lottery_id}: user {user_id} claimed free numbers {numbers:?}")
            }
            Reservation::Held(handle) => log::info!(
                "Lottery {lottery_id}: reservation {} holds {numbers:?} for user {user_id} until {}",
                handle.reservation_id,
                handle.expires_at
            ),
        }
        Ok(reservation)
    }

    /// Write the claim for numbers that already passed admission.
    ///
    /// Admission reads a snapshot, so two callers can both pass it; the
    /// unique indexes decide, and the loser gets `NumberUnavailable`. The
    /// lottery row is locked first so a concurrent cancel either sees these
    /// holds or makes this claim fail with `LotteryNotActive`.
    pub async fn claim_in<C: ConnectionTrait>(
        conn: &C,
        lottery: &lotteries::Model,
        user_id: i64,
        numbers: &[i32],
        ttl: Duration,
        auto_confirm: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        if !Self::lock_active_lottery_in(conn, lottery.id).await? {
            return Err(AppError::LotteryNotActive);
        }
        let lottery_id = lottery.id;

        if auto_confirm {
            let new_tickets = numbers
                .iter()
                .map(|n| NewTicket {
                    lottery_id,
                    reservation_id: None,
                    ticket_number: *n,
                    user_id,
                    payment_status: PaymentStatus::Paid,
                    payment_amount: 0,
                    payment_method: Some(FREE_PAYMENT_METHOD.to_string()),
                })
                .collect();
            let written = PurchaseLedger::record_tickets(conn, new_tickets, now)
                .await
                .map_err(|e| claim_conflict(e, numbers))?;
            return Ok(Reservation::Confirmed(written));
        }

        let reservation_id = Uuid::new_v4();
        // 占用不能跨过活动结束时间, 否则关闭后仍可能出现新的已支付票据
        let expires_at = (now + ttl).min(lottery.end_date);

        let new_tickets = numbers
            .iter()
            .map(|n| NewTicket {
                lottery_id,
                reservation_id: Some(reservation_id),
                ticket_number: *n,
                user_id,
                payment_status: PaymentStatus::Pending,
                payment_amount: lottery.ticket_price,
                payment_method: None,
            })
            .collect();
        PurchaseLedger::record_tickets(conn, new_tickets, now)
            .await
            .map_err(|e| claim_conflict(e, numbers))?;

        for chunk in numbers.chunks(WRITE_CHUNK) {
            let holds = chunk.iter().map(|n| reserved::ActiveModel {
                id: Set(Uuid::new_v4()),
                reservation_id: Set(reservation_id),
                lottery_id: Set(lottery_id),
                ticket_number: Set(*n),
                user_id: Set(user_id),
                reserved_at: Set(now),
                expires_at: Set(expires_at),
            });
            reserved::Entity::insert_many(holds)
                .exec_without_returning(conn)
                .await
                .map_err(|e| claim_conflict(e, numbers))?;
        }

        Ok(Reservation::Held(ReservationHandle {
            reservation_id,
            lottery_id,
            user_id,
            amount_due: lottery.ticket_price * numbers.len() as i64,
            numbers: numbers.to_vec(),
            reserved_at: now,
            expires_at,
        }))
    }

    /// 根据支付结果确认或释放一次预约
    ///
    /// Confirmation deletes the hold rows (only those still unexpired) and
    /// promotes the pending tickets to paid in one transaction. Confirming an
    /// already-confirmed reservation returns its paid tickets again.
    pub async fn confirm(
        &self,
        reservation_id: Uuid,
        payment: PaymentResult,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<tickets::Model>> {
        let txn = self.pool.begin().await?;

        let holds = reserved::Entity::find()
            .filter(reserved::Column::ReservationId.eq(reservation_id))
            .all(&txn)
            .await?;

        if holds.is_empty() {
            let existing = PurchaseLedger::list_by_reservation(&txn, reservation_id).await?;
            txn.commit().await?;
            return match existing.first().map(|t| t.payment_status) {
                None => Err(AppError::NotFound("Reservation not found".into())),
                Some(PaymentStatus::Paid) => Ok(existing),
                Some(PaymentStatus::Failed) => Err(AppError::PaymentRejected(
                    "Reservation was already rejected".into(),
                )),
                Some(_) => Err(AppError::ReservationExpired),
            };
        }

        if holds.iter().any(|h| h.is_expired_at(now)) {
            Self::expire_reservation_in(&txn, reservation_id, now).await?;
            txn.commit().await?;
            log::info!("Reservation {reservation_id} confirmed after expiry");
            return Err(AppError::ReservationExpired);
        }

        match payment {
            PaymentResult::Rejected { reason } => {
                reserved::Entity::delete_many()
                    .filter(reserved::Column::ReservationId.eq(reservation_id))
                    .exec(&txn)
                    .await?;
                PurchaseLedger::settle_pending(&txn, reservation_id, PaymentStatus::Failed, now)
                    .await?;
                txn.commit().await?;
                log::info!("Reservation {reservation_id} payment rejected: {reason}");
                Err(AppError::PaymentRejected(reason))
            }
            PaymentResult::Confirmed { method, reference } => {
                // 活动已取消 (或已关闭) 时不再入账, 支付方据此撤销扣款
                let lottery_id = holds[0].lottery_id;
                if !Self::lock_active_lottery_in(&txn, lottery_id).await? {
                    Self::release_in(&txn, reservation_id, now).await?;
                    txn.commit().await?;
                    log::warn!(
                        "Reservation {reservation_id}: lottery {lottery_id} is no longer active, payment not recorded"
                    );
                    return Err(AppError::LotteryNotActive);
                }

                let expected = holds.len() as u64;

                // 条件删除: 与定时过期竞争时只有一方能删除成功
                let deleted = reserved::Entity::delete_many()
                    .filter(reserved::Column::ReservationId.eq(reservation_id))
                    .filter(reserved::Column::ExpiresAt.gt(now))
                    .exec(&txn)
                    .await?
                    .rows_affected;
                if deleted != expected {
                    return Err(AppError::ReservationExpired);
                }

                let promoted =
                    PurchaseLedger::mark_paid(&txn, reservation_id, &method, reference, now)
                        .await?;
                if promoted != expected {
                    return Err(AppError::InternalError(format!(
                        "reservation {reservation_id}: promoted {promoted} of {expected} tickets"
                    )));
                }

                let paid = PurchaseLedger::list_by_reservation(&txn, reservation_id).await?;
                txn.commit().await?;

                log::info!(
                    "Reservation {reservation_id} confirmed via {method}: {} tickets paid",
                    paid.len()
                );
                Ok(paid)
            }
        }
    }

    /// 主动释放 (幂等), 返回释放的号码数量
    pub async fn release(&self, reservation_id: Uuid, now: DateTime<Utc>) -> AppResult<u64> {
        let txn = self.pool.begin().await?;
        let released = Self::release_in(&txn, reservation_id, now).await?;
        txn.commit().await?;
        if released > 0 {
            log::info!("Reservation {reservation_id} released {released} numbers");
        }
        Ok(released)
    }

    /// 定时任务调用: 删除所有已过期的占用并将对应 pending 票据置为 expired
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let expired = reserved::Entity::find()
            .filter(reserved::Column::ExpiresAt.lte(now))
            .order_by_asc(reserved::Column::ExpiresAt)
            .all(&self.pool)
            .await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let reservation_ids: BTreeSet<Uuid> = expired.iter().map(|h| h.reservation_id).collect();

        let txn = self.pool.begin().await?;
        let mut freed = 0;
        for reservation_id in reservation_ids {
            freed += Self::expire_reservation_in(&txn, reservation_id, now).await?;
        }
        txn.commit().await?;

        if freed > 0 {
            log::info!("Expired {freed} stale reserved numbers");
        }
        Ok(freed)
    }

    /// Holder of a reservation, if it ever existed.
    pub async fn reservation_owner(&self, reservation_id: Uuid) -> AppResult<Option<i64>> {
        let tickets = PurchaseLedger::list_by_reservation(&self.pool, reservation_id).await?;
        Ok(tickets.first().map(|t| t.user_id))
    }

    /// Conditional expiry of one reservation: only rows whose `expires_at`
    /// has passed are deleted, so a concurrent confirm that already consumed
    /// them turns this into a no-op.
    pub(crate) async fn expire_reservation_in<C: ConnectionTrait>(
        conn: &C,
        reservation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let deleted = reserved::Entity::delete_many()
            .filter(reserved::Column::ReservationId.eq(reservation_id))
            .filter(reserved::Column::ExpiresAt.lte(now))
            .exec(conn)
            .await?
            .rows_affected;
        if deleted > 0 {
            PurchaseLedger::settle_pending(conn, reservation_id, PaymentStatus::Expired, now)
                .await?;
        }
        Ok(deleted)
    }

    /// Row-lock the lottery if it is still active.
    ///
    /// A no-op update: on PostgreSQL it blocks until a concurrent status
    /// change commits and then re-checks the status, so callers and `cancel`
    /// serialize on the lottery row. `false` means the lottery left `active`.
    pub(crate) async fn lock_active_lottery_in<C: ConnectionTrait>(
        conn: &C,
        lottery_id: Uuid,
    ) -> Result<bool, DbErr> {
        let res = lotteries::Entity::update_many()
            .col_expr(
                lotteries::Column::UpdatedAt,
                Expr::col(lotteries::Column::UpdatedAt).into(),
            )
            .filter(lotteries::Column::Id.eq(lottery_id))
            .filter(lotteries::Column::Status.eq(LotteryStatus::Active))
            .exec(conn)
            .await?;
        Ok(res.rows_affected == 1)
    }

    pub(crate) async fn release_in<C: ConnectionTrait>(
        conn: &C,
        reservation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let deleted = reserved::Entity::delete_many()
            .filter(reserved::Column::ReservationId.eq(reservation_id))
            .exec(conn)
            .await?
            .rows_affected;
        if deleted > 0 {
            PurchaseLedger::settle_pending(conn, reservation_id, PaymentStatus::Expired, now)
                .await?;
        }
        Ok(deleted)
    }

    /// 释放某个活动的全部占用 (活动取消时使用)
    pub(crate) async fn release_all_in<C: ConnectionTrait>(
        conn: &C,
        lottery_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let holds = reserved::Entity::find()
            .filter(reserved::Column::LotteryId.eq(lottery_id))
            .all(conn)
            .await?;
        let reservation_ids: BTreeSet<Uuid> = holds.iter().map(|h| h.reservation_id).collect();
        let mut released = 0;
        for reservation_id in reservation_ids {
            released += Self::release_in(conn, reservation_id, now).await?;
        }
        Ok(released)
    }
}
