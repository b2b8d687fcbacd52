//! Derived view of a lottery's ticket-number space.
//!
//! A number is `sold` when a paid ticket holds it, `reserved` when a live hold
//! (or a pending ticket tied to a live hold) holds it, and `available`
//! otherwise. The view is rebuilt from the store on every call and never
//! outlives the transaction it was read in.

use crate::entities::{
    PaymentStatus, lottery_entity as lotteries, reserved_number_entity as reserved,
    ticket_entity as tickets,
};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberStatus {
    Available,
    Reserved,
    Sold,
}

/// Point-in-time snapshot of `[1, max_tickets]`.
#[derive(Debug, Clone)]
pub struct NumberSpace {
    max_tickets: i32,
    claimed: BTreeMap<i32, NumberStatus>,
}

impl NumberSpace {
    pub fn new(max_tickets: i32) -> Self {
        Self {
            max_tickets: max_tickets.max(0),
            claimed: BTreeMap::new(),
        }
    }

    /// Mark a number as held. A sold number stays sold.
    pub fn mark_reserved(&mut self, number: i32) {
        if self.in_range(number) {
            self.claimed.entry(number).or_insert(NumberStatus::Reserved);
        }
    }

    pub fn mark_sold(&mut self, number: i32) {
        if self.in_range(number) {
            self.claimed.insert(number, NumberStatus::Sold);
        }
    }

    pub fn max_tickets(&self) -> i32 {
        self.max_tickets
    }

    pub fn in_range(&self, number: i32) -> bool {
        number >= 1 && number <= self.max_tickets
    }

    pub fn status(&self, number: i32) -> NumberStatus {
        self.claimed
            .get(&number)
            .copied()
            .unwrap_or(NumberStatus::Available)
    }

    pub fn available_count(&self) -> u64 {
        self.max_tickets as u64 - self.claimed.len() as u64
    }

    pub fn reserved_count(&self) -> u64 {
        self.count(NumberStatus::Reserved)
    }

    pub fn sold_count(&self) -> u64 {
        self.count(NumberStatus::Sold)
    }

    fn count(&self, status: NumberStatus) -> u64 {
        self.claimed.values().filter(|s| **s == status).count() as u64
    }

    /// Available numbers in ascending order, at most `limit` of them.
    pub fn list_available(&self, limit: usize) -> Vec<i32> {
        (1..=self.max_tickets)
            .filter(|n| !self.claimed.contains_key(n))
            .take(limit)
            .collect()
    }

    /// Requested numbers that are currently reserved or sold.
    pub fn unavailable_among(&self, numbers: &[i32]) -> Vec<i32> {
        numbers
            .iter()
            .copied()
            .filter(|n| self.status(*n) != NumberStatus::Available)
            .collect()
    }

    /// Build the snapshot for one lottery from its hold and ticket rows.
    pub async fn load<C: ConnectionTrait>(
        conn: &C,
        lottery: &lotteries::Model,
        now: DateTime<Utc>,
    ) -> Result<Self, DbErr> {
        let holds = reserved::Entity::find()
            .filter(reserved::Column::LotteryId.eq(lottery.id))
            .filter(reserved::Column::ExpiresAt.gt(now))
            .all(conn)
            .await?;

        let claims = tickets::Entity::find()
            .filter(tickets::Column::LotteryId.eq(lottery.id))
            .filter(tickets::Column::PaymentStatus.is_in(PaymentStatus::CLAIMING))
            .all(conn)
            .await?;

        let live_reservations: HashSet<Uuid> = holds.iter().map(|h| h.reservation_id).collect();

        let mut space = NumberSpace::new(lottery.max_tickets);
        for hold in &holds {
            space.mark_reserved(hold.ticket_number);
        }
        for ticket in &claims {
            match ticket.payment_status {
                PaymentStatus::Paid => space.mark_sold(ticket.ticket_number),
                // 过期未清理的 pending 票不再占用号码, 下一次预约会将其置为 expired
                PaymentStatus::Pending => {
                    let live = ticket
                        .reservation_id
                        .map(|rid| live_reservations.contains(&rid))
                        .unwrap_or(true);
                    if live {
                        space.mark_reserved(ticket.ticket_number);
                    }
                }
                _ => {}
            }
        }

        Ok(space)
    }
}

#[derive(Clone)]
pub struct NumberSpaceService {
    pool: DatabaseConnection,
}

impl NumberSpaceService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    /// Snapshot read inside its own short transaction.
    pub async fn snapshot(&self, lottery_id: Uuid, now: DateTime<Utc>) -> AppResult<NumberSpace> {
        let txn = self.pool.begin().await?;
        let lottery = lotteries::Entity::find_by_id(lottery_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("Lottery not found".into()))?;
        let space = NumberSpace::load(&txn, &lottery, now).await?;
        txn.commit().await?;
        Ok(space)
    }

    pub async fn status(
        &self,
        lottery_id: Uuid,
        number: i32,
        now: DateTime<Utc>,
    ) -> AppResult<NumberStatus> {
        let space = self.snapshot(lottery_id, now).await?;
        if !space.in_range(number) {
            return Err(AppError::InvalidNumberRange(vec![number]));
        }
        Ok(space.status(number))
    }

    pub async fn available_count(&self, lottery_id: Uuid, now: DateTime<Utc>) -> AppResult<u64> {
        Ok(self.snapshot(lottery_id, now).await?.available_count())
    }

    pub async fn list_available(
        &self,
        lottery_id: Uuid,
        limit: usize,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<i32>> {
        Ok(self.snapshot(lottery_id, now).await?.list_available(limit))
    }
}
