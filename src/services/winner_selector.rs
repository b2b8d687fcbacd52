use crate::entities::{LotteryStatus, lottery_entity as lotteries, winner_entity as winners};
use crate::error::{AppError, AppResult};
use crate::services::purchase_ledger::{PurchaseLedger, WRITE_CHUNK};
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

/// Uniform draw of `count` distinct entries without replacement.
///
/// Partial Fisher–Yates: every entry has the same chance of landing in each
/// rank regardless of its position in `entries`.
pub fn draw<T: Clone, R: rand::Rng + ?Sized>(entries: &[T], count: usize, rng: &mut R) -> Vec<T> {
    let mut pool = entries.to_vec();
    let count = count.min(pool.len());
    let (chosen, _) = pool.partial_shuffle(rng, count);
    chosen.to_vec()
}

/// Result of one draw attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOutcome {
    /// This call moved the lottery closed -> finished and wrote these winners.
    Drawn(Vec<winners::Model>),
    /// Someone else drew first; the winners already on record.
    AlreadyDrawn(Vec<winners::Model>),
}

impl DrawOutcome {
    pub fn into_winners(self) -> Vec<winners::Model> {
        match self {
            DrawOutcome::Drawn(w) | DrawOutcome::AlreadyDrawn(w) => w,
        }
    }
}

/// 开奖
#[derive(Clone)]
pub struct WinnerSelector {
    pool: DatabaseConnection,
    seed: Option<u64>,
}

impl WinnerSelector {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool, seed: None }
    }

    /// Deterministic draws, for replaying a draw in tests.
    pub fn with_seed(pool: DatabaseConnection, seed: u64) -> Self {
        Self {
            pool,
            seed: Some(seed),
        }
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// 抽取中奖票据并将活动置为 finished, 返回全部中奖记录
    pub async fn select_winners(
        &self,
        lottery_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<winners::Model>> {
        Ok(self.draw_once(lottery_id, now).await?.into_winners())
    }

    /// 抽取中奖票据, 并区分本次调用是否真正执行了开奖
    ///
    /// 1. 已开奖 (winner_selected_at 非空) 直接返回已有结果
    /// 2. 条件更新 closed -> finished 并写入 winner_selected_at, 只有一个调用者能成功
    /// 3. 在同一事务中写入全部中奖记录并标记票据
    pub async fn draw_once(&self, lottery_id: Uuid, now: DateTime<Utc>) -> AppResult<DrawOutcome> {
        let txn = self.pool.begin().await?;

        let lottery = lotteries::Entity::find_by_id(lottery_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("Lottery not found".into()))?;

        if lottery.winner_selected_at.is_some() {
            let existing = Self::winners_in(&txn, lottery_id).await?;
            txn.commit().await?;
            return Ok(DrawOutcome::AlreadyDrawn(existing));
        }
        if lottery.status != LotteryStatus::Closed {
            return Err(AppError::InvalidTransition(format!(
                "cannot draw winners for a {} lottery",
                lottery.status
            )));
        }

        let paid = PurchaseLedger::list_paid_in(&txn, lottery_id).await?;
        let required = lottery.num_winners.max(1) as usize;
        if paid.len() < required {
            return Err(AppError::InsufficientPaidTickets {
                paid: paid.len() as u64,
                required: required as u64,
            });
        }

        let claimed = lotteries::Entity::update_many()
            .set(lotteries::ActiveModel {
                status: Set(LotteryStatus::Finished),
                winner_selected_at: Set(Some(now)),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(lotteries::Column::Id.eq(lottery_id))
            .filter(lotteries::Column::Status.eq(LotteryStatus::Closed))
            .filter(lotteries::Column::WinnerSelectedAt.is_null())
            .exec(&txn)
            .await?
            .rows_affected;

        if claimed != 1 {
            // 另一个调用者已开奖
            drop(txn);
            log::warn!("Lottery {lottery_id}: draw already taken by a concurrent caller");
            return Ok(DrawOutcome::AlreadyDrawn(self.list_winners(lottery_id).await?));
        }

        let chosen = draw(&paid, required, &mut self.rng());
        let rows: Vec<winners::Model> = chosen
            .iter()
            .enumerate()
            .map(|(i, ticket)| winners::Model {
                id: Uuid::new_v4(),
                lottery_id,
                ticket_id: ticket.id,
                ticket_number: ticket.ticket_number,
                user_id: ticket.user_id,
                rank: i as i32 + 1,
                selected_at: now,
            })
            .collect();

        for chunk in rows.chunks(WRITE_CHUNK) {
            winners::Entity::insert_many(chunk.iter().map(|w| winners::ActiveModel {
                id: Set(w.id),
                lottery_id: Set(w.lottery_id),
                ticket_id: Set(w.ticket_id),
                ticket_number: Set(w.ticket_number),
                user_id: Set(w.user_id),
                rank: Set(w.rank),
                selected_at: Set(w.selected_at),
            }))
            .exec_without_returning(&txn)
            .await?;
        }

        PurchaseLedger::mark_winners(&txn, rows.iter().map(|w| w.ticket_id).collect(), now)
            .await?;

        txn.commit().await?;

        log::info!(
            "Lottery {lottery_id}: drew {} winners from {} paid tickets, numbers {:?}",
            rows.len(),
            paid.len(),
            rows.iter().map(|w| w.ticket_number).collect::<Vec<_>>()
        );

        Ok(DrawOutcome::Drawn(rows))
    }

    pub async fn list_winners(&self, lottery_id: Uuid) -> AppResult<Vec<winners::Model>> {
        Ok(Self::winners_in(&self.pool, lottery_id).await?)
    }

    async fn winners_in<C: ConnectionTrait>(
        conn: &C,
        lottery_id: Uuid,
    ) -> Result<Vec<winners::Model>, DbErr> {
        winners::Entity::find()
            .filter(winners::Column::LotteryId.eq(lottery_id))
            .order_by_asc(winners::Column::Rank)
            .all(conn)
            .await
    }
}
