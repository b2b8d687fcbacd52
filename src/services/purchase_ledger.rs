use crate::entities::{PaymentStatus, ticket_entity as tickets};
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

/// Rows per multi-row statement; keeps bind parameters well under the
/// SQLite and PostgreSQL limits for any number space size.
pub const WRITE_CHUNK: usize = 500;

/// A ticket row about to be written.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub lottery_id: Uuid,
    pub reservation_id: Option<Uuid>,
    pub ticket_number: i32,
    pub user_id: i64,
    pub payment_status: PaymentStatus,
    pub payment_amount: i64,
    pub payment_method: Option<String>,
}

impl NewTicket {
    fn into_model(self, now: DateTime<Utc>) -> tickets::Model {
        let paid_at = (self.payment_status == PaymentStatus::Paid).then_some(now);
        tickets::Model {
            id: Uuid::new_v4(),
            lottery_id: self.lottery_id,
            reservation_id: self.reservation_id,
            ticket_number: self.ticket_number,
            user_id: self.user_id,
            payment_status: self.payment_status,
            payment_amount: self.payment_amount,
            payment_method: self.payment_method,
            payment_reference: None,
            is_winner: false,
            refund_requested: false,
            paid_at,
            created_at: now,
            updated_at: now,
        }
    }
}

fn to_active(m: &tickets::Model) -> tickets::ActiveModel {
    tickets::ActiveModel {
        id: Set(m.id),
        lottery_id: Set(m.lottery_id),
        reservation_id: Set(m.reservation_id),
        ticket_number: Set(m.ticket_number),
        user_id: Set(m.user_id),
        payment_status: Set(m.payment_status),
        payment_amount: Set(m.payment_amount),
        payment_method: Set(m.payment_method.clone()),
        payment_reference: Set(m.payment_reference.clone()),
        is_winner: Set(m.is_winner),
        refund_requested: Set(m.refund_requested),
        paid_at: Set(m.paid_at),
        created_at: Set(m.created_at),
        updated_at: Set(m.updated_at),
    }
}

/// Durable record of tickets and their payment state.
///
/// The associated functions taking a `conn` run inside the caller's
/// transaction; the methods on `&self` are standalone reads.
#[derive(Clone)]
pub struct PurchaseLedger {
    pool: DatabaseConnection,
}

impl PurchaseLedger {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    /// 写入单张票据
    pub async fn record_ticket(&self, ticket: NewTicket) -> AppResult<tickets::Model> {
        let mut written = Self::record_tickets(&self.pool, vec![ticket], Utc::now()).await?;
        written
            .pop()
            .ok_or_else(|| DbErr::Custom("ticket insert returned nothing".into()).into())
    }

    /// Insert all rows, `WRITE_CHUNK` per statement. Inside a transaction, a
    /// claim that collides with a live pending/paid ticket fails the whole
    /// batch with a unique violation.
    pub async fn record_tickets<C: ConnectionTrait>(
        conn: &C,
        new_tickets: Vec<NewTicket>,
        now: DateTime<Utc>,
    ) -> Result<Vec<tickets::Model>, DbErr> {
        if new_tickets.is_empty() {
            return Ok(Vec::new());
        }
        let models: Vec<tickets::Model> =
            new_tickets.into_iter().map(|t| t.into_model(now)).collect();
        for chunk in models.chunks(WRITE_CHUNK) {
            tickets::Entity::insert_many(chunk.iter().map(to_active))
                .exec_without_returning(conn)
                .await?;
        }
        Ok(models)
    }

    pub async fn list_by_lottery(&self, lottery_id: Uuid) -> AppResult<Vec<tickets::Model>> {
        let list = tickets::Entity::find()
            .filter(tickets::Column::LotteryId.eq(lottery_id))
            .order_by_asc(tickets::Column::TicketNumber)
            .order_by_asc(tickets::Column::CreatedAt)
            .all(&self.pool)
            .await?;
        Ok(list)
    }

    pub async fn list_by_user(
        &self,
        user_id: i64,
        lottery_id: Uuid,
    ) -> AppResult<Vec<tickets::Model>> {
        let list = tickets::Entity::find()
            .filter(tickets::Column::LotteryId.eq(lottery_id))
            .filter(tickets::Column::UserId.eq(user_id))
            .order_by_asc(tickets::Column::TicketNumber)
            .all(&self.pool)
            .await?;
        Ok(list)
    }

    pub async fn list_by_reservation<C: ConnectionTrait>(
        conn: &C,
        reservation_id: Uuid,
    ) -> Result<Vec<tickets::Model>, DbErr> {
        tickets::Entity::find()
            .filter(tickets::Column::ReservationId.eq(reservation_id))
            .order_by_asc(tickets::Column::TicketNumber)
            .all(conn)
            .await
    }

    pub async fn list_paid_in<C: ConnectionTrait>(
        conn: &C,
        lottery_id: Uuid,
    ) -> Result<Vec<tickets::Model>, DbErr> {
        tickets::Entity::find()
            .filter(tickets::Column::LotteryId.eq(lottery_id))
            .filter(tickets::Column::PaymentStatus.eq(PaymentStatus::Paid))
            .order_by_asc(tickets::Column::TicketNumber)
            .all(conn)
            .await
    }

    /// Paid tickets of a cancelled lottery awaiting a refund by the payment side.
    pub async fn list_refund_requested(&self, lottery_id: Uuid) -> AppResult<Vec<tickets::Model>> {
        let list = tickets::Entity::find()
            .filter(tickets::Column::LotteryId.eq(lottery_id))
            .filter(tickets::Column::RefundRequested.eq(true))
            .order_by_asc(tickets::Column::TicketNumber)
            .all(&self.pool)
            .await?;
        Ok(list)
    }

    pub async fn count_paid(&self, lottery_id: Uuid) -> AppResult<u64> {
        self.count_by_status(lottery_id, PaymentStatus::Paid).await
    }

    pub async fn count_by_status(&self, lottery_id: Uuid, status: PaymentStatus) -> AppResult<u64> {
        Ok(Self::count_by_status_in(&self.pool, lottery_id, status).await?)
    }

    pub async fn count_paid_in<C: ConnectionTrait>(conn: &C, lottery_id: Uuid) -> Result<u64, DbErr> {
        Self::count_by_status_in(conn, lottery_id, PaymentStatus::Paid).await
    }

    pub async fn count_by_status_in<C: ConnectionTrait>(
        conn: &C,
        lottery_id: Uuid,
        status: PaymentStatus,
    ) -> Result<u64, DbErr> {
        tickets::Entity::find()
            .filter(tickets::Column::LotteryId.eq(lottery_id))
            .filter(tickets::Column::PaymentStatus.eq(status))
            .count(conn)
            .await
    }

    pub async fn has_any_ticket<C: ConnectionTrait>(conn: &C, lottery_id: Uuid) -> Result<bool, DbErr> {
        let n = tickets::Entity::find()
            .filter(tickets::Column::LotteryId.eq(lottery_id))
            .count(conn)
            .await?;
        Ok(n > 0)
    }

    /// Move the pending tickets of one reservation to `to`.
    /// Rows already moved by a concurrent caller are left alone.
    pub async fn settle_pending<C: ConnectionTrait>(
        conn: &C,
        reservation_id: Uuid,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let res = tickets::Entity::update_many()
            .set(tickets::ActiveModel {
                payment_status: Set(to),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(tickets::Column::ReservationId.eq(reservation_id))
            .filter(tickets::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(conn)
            .await?;
        Ok(res.rows_affected)
    }

    /// pending -> paid, recording how it was paid.
    pub async fn mark_paid<C: ConnectionTrait>(
        conn: &C,
        reservation_id: Uuid,
        method: &str,
        reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let res = tickets::Entity::update_many()
            .set(tickets::ActiveModel {
                payment_status: Set(PaymentStatus::Paid),
                payment_method: Set(Some(method.to_string())),
                payment_reference: Set(reference),
                paid_at: Set(Some(now)),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(tickets::Column::ReservationId.eq(reservation_id))
            .filter(tickets::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(conn)
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn mark_winners<C: ConnectionTrait>(
        conn: &C,
        ticket_ids: Vec<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let mut marked = 0;
        for chunk in ticket_ids.chunks(WRITE_CHUNK) {
            marked += tickets::Entity::update_many()
                .col_expr(tickets::Column::IsWinner, Expr::value(true))
                .col_expr(tickets::Column::UpdatedAt, Expr::value(now))
                .filter(tickets::Column::Id.is_in(chunk.to_vec()))
                .exec(conn)
                .await?
                .rows_affected;
        }
        Ok(marked)
    }

    /// 活动取消时标记所有已支付票据待退款
    pub async fn flag_refunds<C: ConnectionTrait>(
        conn: &C,
        lottery_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let res = tickets::Entity::update_many()
            .col_expr(tickets::Column::RefundRequested, Expr::value(true))
            .col_expr(tickets::Column::UpdatedAt, Expr::value(now))
            .filter(tickets::Column::LotteryId.eq(lottery_id))
            .filter(tickets::Column::PaymentStatus.eq(PaymentStatus::Paid))
            .exec(conn)
            .await?;
        Ok(res.rows_affected)
    }
}
