use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{PaymentStatus, ticket_entity};

/// 预约号码请求
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReserveTicketsRequest {
    pub numbers: Vec<i32>,
}

/// 一次号码占用的凭据, 支付确认时回传 reservation_id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationHandle {
    pub reservation_id: Uuid,
    pub lottery_id: Uuid,
    pub user_id: i64,
    pub numbers: Vec<i32>,
    /// 应付金额 (美分)
    pub amount_due: i64,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a reserve call: a hold awaiting payment, or tickets already
/// confirmed (free lotteries with auto-confirm).
#[derive(Debug, Clone)]
pub enum Reservation {
    Held(ReservationHandle),
    Confirmed(Vec<ticket_entity::Model>),
}

impl Reservation {
    pub fn handle(&self) -> Option<&ReservationHandle> {
        match self {
            Reservation::Held(handle) => Some(handle),
            Reservation::Confirmed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReservationResponse {
    Held { reservation: ReservationHandle },
    Confirmed { tickets: Vec<TicketResponse> },
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        match r {
            Reservation::Held(reservation) => ReservationResponse::Held { reservation },
            Reservation::Confirmed(tickets) => ReservationResponse::Confirmed {
                tickets: tickets.into_iter().map(Into::into).collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketResponse {
    pub id: Uuid,
    pub lottery_id: Uuid,
    pub ticket_number: i32,
    pub user_id: i64,
    pub payment_status: PaymentStatus,
    pub payment_amount: i64,
    pub payment_method: Option<String>,
    pub is_winner: bool,
    pub refund_requested: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ticket_entity::Model> for TicketResponse {
    fn from(m: ticket_entity::Model) -> Self {
        TicketResponse {
            id: m.id,
            lottery_id: m.lottery_id,
            ticket_number: m.ticket_number,
            user_id: m.user_id,
            payment_status: m.payment_status,
            payment_amount: m.payment_amount,
            payment_method: m.payment_method,
            is_winner: m.is_winner,
            refund_requested: m.refund_requested,
            paid_at: m.paid_at,
            created_at: m.created_at,
        }
    }
}
