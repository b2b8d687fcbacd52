use crate::entities::{LotteryStatus, lottery_entity as lotteries};
use crate::error::{AppError, AppResult};
use crate::models::{CreateLotteryRequest, LotteryTransition, UpdateLotteryRequest};
use crate::services::purchase_ledger::PurchaseLedger;
use crate::services::reservation_service::ReservationService;
use crate::services::winner_selector::{DrawOutcome, WinnerSelector};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use uuid::Uuid;

/// 单个活动号码空间上限
pub const MAX_NUMBER_SPACE: i32 = 100_000;

/// Automatic transition due for a lottery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// active -> closed (end_date reached or sold out)
    Close,
    /// closed -> finished via the winner draw
    Draw,
    /// closed -> cancelled, participation below threshold
    CancelInsufficient,
}

/// Decide the next automatic transition from the current row and paid count.
pub fn evaluate(lottery: &lotteries::Model, paid: u64, now: DateTime<Utc>) -> Option<Transition> {
    match lottery.status {
        LotteryStatus::Active => {
            let sold_out = paid >= lottery.max_tickets.max(0) as u64;
            (now >= lottery.end_date || sold_out).then_some(Transition::Close)
        }
        LotteryStatus::Closed if lottery.winner_selected_at.is_none() => {
            let floor = lottery.min_tickets.max(lottery.num_winners).max(1) as u64;
            if paid < floor {
                Some(Transition::CancelInsufficient)
            } else {
                Some(Transition::Draw)
            }
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotteryParams {
    pub title: String,
    pub is_free: bool,
    pub ticket_price: i64,
    pub min_tickets: i32,
    pub max_tickets: i32,
    pub num_winners: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl From<&lotteries::Model> for LotteryParams {
    fn from(m: &lotteries::Model) -> Self {
        LotteryParams {
            title: m.title.clone(),
            is_free: m.is_free,
            ticket_price: m.ticket_price,
            min_tickets: m.min_tickets,
            max_tickets: m.max_tickets,
            num_winners: m.num_winners,
            start_date: m.start_date,
            end_date: m.end_date,
        }
    }
}

/// 校验活动参数
pub fn validate_params(p: &LotteryParams) -> AppResult<()> {
    if p.title.trim().is_empty() {
        return Err(AppError::ValidationError("Title is required".into()));
    }
    if p.min_tickets < 1 {
        return Err(AppError::ValidationError("min_tickets must be at least 1".into()));
    }
    if p.max_tickets < p.min_tickets {
        return Err(AppError::ValidationError(
            "max_tickets must not be lower than min_tickets".into(),
        ));
    }
    if p.max_tickets > MAX_NUMBER_SPACE {
        return Err(AppError::ValidationError(format!(
            "max_tickets must not exceed {MAX_NUMBER_SPACE}"
        )));
    }
    if p.num_winners < 1 || p.num_winners > p.max_tickets {
        return Err(AppError::ValidationError(
            "num_winners must be between 1 and max_tickets".into(),
        ));
    }
    if p.end_date <= p.start_date {
        return Err(AppError::ValidationError("end_date must be after start_date".into()));
    }
    if p.is_free && p.ticket_price != 0 {
        return Err(AppError::ValidationError("Free lotteries must have a zero price".into()));
    }
    if !p.is_free && p.ticket_price <= 0 {
        return Err(AppError::ValidationError("ticket_price must be positive".into()));
    }
    Ok(())
}

/// Lottery state machine: draft -> active -> closed -> finished, with
/// cancelled reachable from any state before finished.
///
/// Every transition is a conditional update on the expected source status,
/// so concurrent sweeps and admin actions apply each step at most once.
#[derive(Clone)]
pub struct LotteryLifecycleService {
    pool: DatabaseConnection,
    winner_selector: WinnerSelector,
}

impl LotteryLifecycleService {
    pub fn new(pool: DatabaseConnection, winner_selector: WinnerSelector) -> Self {
        Self {
            pool,
            winner_selector,
        }
    }

    /// 创建活动 (draft)
    pub async fn create_lottery(
        &self,
        created_by: i64,
        req: CreateLotteryRequest,
        now: DateTime<Utc>,
    ) -> AppResult<lotteries::Model> {
        validate_params(&LotteryParams {
            title: req.title.clone(),
            is_free: req.is_free,
            ticket_price: req.ticket_price,
            min_tickets: req.min_tickets,
            max_tickets: req.max_tickets,
            num_winners: req.num_winners,
            start_date: req.start_date,
            end_date: req.end_date,
        })?;

        let lottery = lotteries::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(req.title.trim().to_string()),
            description: Set(req.description),
            is_free: Set(req.is_free),
            ticket_price: Set(req.ticket_price),
            min_tickets: Set(req.min_tickets),
            max_tickets: Set(req.max_tickets),
            num_winners: Set(req.num_winners),
            start_date: Set(req.start_date),
            end_date: Set(req.end_date),
            status: Set(LotteryStatus::Draft),
            winner_selected_at: Set(None),
            prize_description: Set(req.prize_description),
            terms: Set(req.terms),
            created_by: Set(created_by),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.pool)
        .await?;

        log::info!("Lottery {} created by {created_by}", lottery.id);
        Ok(lottery)
    }

    /// 修改 draft 活动; 已有票据时不允许修改 max_tickets
    pub async fn update_lottery(
        &self,
        lottery_id: Uuid,
        req: UpdateLotteryRequest,
        now: DateTime<Utc>,
    ) -> AppResult<lotteries::Model> {
        let txn = self.pool.begin().await?;
        let current = Self::find_in(&txn, lottery_id).await?;
        if current.status != LotteryStatus::Draft {
            return Err(AppError::InvalidTransition(format!(
                "only draft lotteries can be edited, this one is {}",
                current.status
            )));
        }

        if let Some(max) = req.max_tickets {
            if max != current.max_tickets && PurchaseLedger::has_any_ticket(&txn, lottery_id).await? {
                return Err(AppError::ValidationError(
                    "max_tickets cannot change once tickets exist".into(),
                ));
            }
        }

        let mut merged = current.clone();
        if let Some(v) = req.title {
            merged.title = v.trim().to_string();
        }
        if let Some(v) = req.description {
            merged.description = v;
        }
        if let Some(v) = req.is_free {
            merged.is_free = v;
        }
        if let Some(v) = req.ticket_price {
            merged.ticket_price = v;
        }
        if let Some(v) = req.min_tickets {
            merged.min_tickets = v;
        }
        if let Some(v) = req.max_tickets {
            merged.max_tickets = v;
        }
        if let Some(v) = req.num_winners {
            merged.num_winners = v;
        }
        if let Some(v) = req.start_date {
            merged.start_date = v;
        }
        if let Some(v) = req.end_date {
            merged.end_date = v;
        }
        if req.prize_description.is_some() {
            merged.prize_description = req.prize_description;
        }
        if req.terms.is_some() {
            merged.terms = req.terms;
        }
        validate_params(&LotteryParams::from(&merged))?;

        let mut active: lotteries::ActiveModel = current.into();
        active.title = Set(merged.title);
        active.description = Set(merged.description);
        active.is_free = Set(merged.is_free);
        active.ticket_price = Set(merged.ticket_price);
        active.min_tickets = Set(merged.min_tickets);
        active.max_tickets = Set(merged.max_tickets);
        active.num_winners = Set(merged.num_winners);
        active.start_date = Set(merged.start_date);
        active.end_date = Set(merged.end_date);
        active.prize_description = Set(merged.prize_description);
        active.terms = Set(merged.terms);
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        txn.commit().await?;
        log::info!("Lottery {lottery_id} updated");
        Ok(updated)
    }

    /// draft -> active
    ///
    /// start_date may lie in the future; tickets are only sold once it passes.
    pub async fn activate(&self, lottery_id: Uuid, now: DateTime<Utc>) -> AppResult<lotteries::Model> {
        let txn = self.pool.begin().await?;
        let lottery = Self::find_in(&txn, lottery_id).await?;

        if lottery.status == LotteryStatus::Active {
            txn.commit().await?;
            return Ok(lottery);
        }
        if !lottery.status.can_transition_to(LotteryStatus::Active) {
            return Err(AppError::InvalidTransition(format!(
                "cannot activate a {} lottery",
                lottery.status
            )));
        }
        validate_params(&LotteryParams::from(&lottery))?;
        if lottery.end_date <= now {
            return Err(AppError::ValidationError("end_date has already passed".into()));
        }

        let moved = Self::move_status(&txn, lottery_id, LotteryStatus::Draft, LotteryStatus::Active, now)
            .await?;
        if !moved {
            return Err(AppError::InvalidTransition("lottery changed concurrently".into()));
        }
        let activated = Self::find_in(&txn, lottery_id).await?;
        txn.commit().await?;

        log::info!("Lottery {lottery_id}: draft -> active");
        Ok(activated)
    }

    /// 管理员取消活动: 释放所有占用, 已支付票据标记待退款
    pub async fn cancel(&self, lottery_id: Uuid, now: DateTime<Utc>) -> AppResult<lotteries::Model> {
        let txn = self.pool.begin().await?;
        let lottery = Self::find_in(&txn, lottery_id).await?;

        if lottery.status == LotteryStatus::Cancelled {
            txn.commit().await?;
            return Ok(lottery);
        }
        if lottery.status == LotteryStatus::Finished || lottery.winner_selected_at.is_some() {
            return Err(AppError::InvalidTransition(
                "winners have already been drawn".into(),
            ));
        }

        let res = lotteries::Entity::update_many()
            .set(lotteries::ActiveModel {
                status: Set(LotteryStatus::Cancelled),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(lotteries::Column::Id.eq(lottery_id))
            .filter(lotteries::Column::Status.eq(lottery.status))
            .filter(lotteries::Column::WinnerSelectedAt.is_null())
            .exec(&txn)
            .await?;
        if res.rows_affected != 1 {
            return Err(AppError::InvalidTransition("lottery changed concurrently".into()));
        }

        let released = ReservationService::release_all_in(&txn, lottery_id, now).await?;
        let refunds = PurchaseLedger::flag_refunds(&txn, lottery_id, now).await?;
        let cancelled = Self::find_in(&txn, lottery_id).await?;
        txn.commit().await?;

        log::info!(
            "Lottery {lottery_id}: {} -> cancelled by admin, {released} holds released, {refunds} tickets flagged for refund",
            lottery.status
        );
        Ok(cancelled)
    }

    /// Apply at most one automatic transition.
    pub async fn advance(
        &self,
        lottery_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<LotteryTransition>> {
        let txn = self.pool.begin().await?;
        let lottery = Self::find_in(&txn, lottery_id).await?;
        let paid = PurchaseLedger::count_paid_in(&txn, lottery_id).await?;

        let Some(next) = evaluate(&lottery, paid, now) else {
            txn.commit().await?;
            return Ok(None);
        };

        match next {
            Transition::Close => {
                let moved =
                    Self::move_status(&txn, lottery_id, LotteryStatus::Active, LotteryStatus::Closed, now)
                        .await?;
                txn.commit().await?;
                if !moved {
                    return Ok(None);
                }
                log::info!("Lottery {lottery_id}: active -> closed ({paid} paid)");
                Ok(Some(LotteryTransition {
                    lottery_id,
                    from: LotteryStatus::Active,
                    to: LotteryStatus::Closed,
                }))
            }
            Transition::CancelInsufficient => {
                let res = lotteries::Entity::update_many()
                    .set(lotteries::ActiveModel {
                        status: Set(LotteryStatus::Cancelled),
                        updated_at: Set(now),
                        ..Default::default()
                    })
                    .filter(lotteries::Column::Id.eq(lottery_id))
                    .filter(lotteries::Column::Status.eq(LotteryStatus::Closed))
                    .filter(lotteries::Column::WinnerSelectedAt.is_null())
                    .exec(&txn)
                    .await?;
                if res.rows_affected != 1 {
                    txn.commit().await?;
                    return Ok(None);
                }
                ReservationService::release_all_in(&txn, lottery_id, now).await?;
                let refunds = PurchaseLedger::flag_refunds(&txn, lottery_id, now).await?;
                txn.commit().await?;

                log::warn!(
                    "Lottery {lottery_id}: closed -> cancelled, only {paid} paid of {} required; {refunds} tickets flagged for refund",
                    lottery.min_tickets
                );
                Ok(Some(LotteryTransition {
                    lottery_id,
                    from: LotteryStatus::Closed,
                    to: LotteryStatus::Cancelled,
                }))
            }
            Transition::Draw => {
                // 开奖在自己的事务中完成; 只有真正执行开奖的调用者上报状态变化
                txn.commit().await?;
                match self.winner_selector.draw_once(lottery_id, now).await {
                    Ok(DrawOutcome::Drawn(_)) => Ok(Some(LotteryTransition {
                        lottery_id,
                        from: LotteryStatus::Closed,
                        to: LotteryStatus::Finished,
                    })),
                    Ok(DrawOutcome::AlreadyDrawn(_)) => Ok(None),
                    // 读事务提交后活动已被取消或推进
                    Err(AppError::InvalidTransition(reason)) => {
                        log::debug!("Lottery {lottery_id}: draw skipped, {reason}");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Advance until no transition applies.
    pub async fn advance_until_stable(
        &self,
        lottery_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<LotteryTransition>> {
        let mut applied = Vec::new();
        // active -> closed -> finished/cancelled 最多两步
        for _ in 0..3 {
            match self.advance(lottery_id, now).await? {
                Some(t) => applied.push(t),
                None => break,
            }
        }
        Ok(applied)
    }

    pub async fn get(&self, lottery_id: Uuid) -> AppResult<lotteries::Model> {
        lotteries::Entity::find_by_id(lottery_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Lottery not found".into()))
    }

    pub async fn list(&self, status: Option<LotteryStatus>) -> AppResult<Vec<lotteries::Model>> {
        let mut query = lotteries::Entity::find();
        if let Some(status) = status {
            query = query.filter(lotteries::Column::Status.eq(status));
        }
        Ok(query
            .order_by_desc(lotteries::Column::CreatedAt)
            .all(&self.pool)
            .await?)
    }

    /// Lotteries the sweep has to look at.
    pub async fn list_in_progress(&self) -> AppResult<Vec<Uuid>> {
        let rows = lotteries::Entity::find()
            .filter(lotteries::Column::Status.is_in([LotteryStatus::Active, LotteryStatus::Closed]))
            .order_by_asc(lotteries::Column::EndDate)
            .all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|l| l.id).collect())
    }

    async fn find_in<C: sea_orm::ConnectionTrait>(
        conn: &C,
        lottery_id: Uuid,
    ) -> AppResult<lotteries::Model> {
        lotteries::Entity::find_by_id(lottery_id)
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Lottery not found".into()))
    }

    async fn move_status<C: sea_orm::ConnectionTrait>(
        conn: &C,
        lottery_id: Uuid,
        from: LotteryStatus,
        to: LotteryStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let res = lotteries::Entity::update_many()
            .set(lotteries::ActiveModel {
                status: Set(to),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(lotteries::Column::Id.eq(lottery_id))
            .filter(lotteries::Column::Status.eq(from))
            .exec(conn)
            .await?;
        Ok(res.rows_affected == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lottery(status: LotteryStatus, now: DateTime<Utc>) -> lotteries::Model {
        lotteries::Model {
            id: Uuid::new_v4(),
            title: "Spring draw".into(),
            description: String::new(),
            is_free: false,
            ticket_price: 500,
            min_tickets: 5,
            max_tickets: 10,
            num_winners: 2,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            status,
            winner_selected_at: None,
            prize_description: None,
            terms: None,
            created_by: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_active_closes_at_end_date_or_sold_out() {
        let now = Utc::now();
        let l = lottery(LotteryStatus::Active, now);
        assert_eq!(evaluate(&l, 3, now), None);
        assert_eq!(evaluate(&l, 10, now), Some(Transition::Close));
        assert_eq!(evaluate(&l, 0, l.end_date), Some(Transition::Close));
    }

    #[test]
    fn test_closed_draws_or_cancels() {
        let now = Utc::now();
        let l = lottery(LotteryStatus::Closed, now);
        assert_eq!(evaluate(&l, 3, now), Some(Transition::CancelInsufficient));
        assert_eq!(evaluate(&l, 5, now), Some(Transition::Draw));

        // 已开奖后不再迁移
        let mut drawn = l.clone();
        drawn.winner_selected_at = Some(now);
        assert_eq!(evaluate(&drawn, 5, now), None);
    }

    #[test]
    fn test_closed_with_fewer_paid_than_winners_cancels() {
        let now = Utc::now();
        let mut l = lottery(LotteryStatus::Closed, now);
        l.min_tickets = 1;
        l.num_winners = 3;
        assert_eq!(evaluate(&l, 2, now), Some(Transition::CancelInsufficient));
    }

    #[test]
    fn test_terminal_and_draft_never_move_automatically() {
        let now = Utc::now();
        for status in [LotteryStatus::Draft, LotteryStatus::Finished, LotteryStatus::Cancelled] {
            let mut l = lottery(status, now);
            l.end_date = now - Duration::hours(1);
            assert_eq!(evaluate(&l, 10, now), None, "{status}");
        }
    }

    #[test]
    fn test_validate_params() {
        let now = Utc::now();
        let base = LotteryParams::from(&lottery(LotteryStatus::Draft, now));
        assert!(validate_params(&base).is_ok());

        let bad = [
            LotteryParams { min_tickets: 0, ..base.clone() },
            LotteryParams { max_tickets: 4, ..base.clone() },
            LotteryParams { num_winners: 11, ..base.clone() },
            LotteryParams { num_winners: 0, ..base.clone() },
            LotteryParams { end_date: base.start_date, ..base.clone() },
            LotteryParams { is_free: true, ..base.clone() },
            LotteryParams { ticket_price: 0, ..base.clone() },
            LotteryParams { max_tickets: MAX_NUMBER_SPACE + 1, ..base.clone() },
            LotteryParams { title: "  ".into(), ..base.clone() },
        ];
        for p in bad {
            assert!(matches!(validate_params(&p), Err(AppError::ValidationError(_))), "{p:?}");
        }

        let free = LotteryParams {
            is_free: true,
            ticket_price: 0,
            ..base
        };
        assert!(validate_params(&free).is_ok());
    }
}
