use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{LotteryStatus, lottery_entity, winner_entity};

/// 创建抽奖活动请求 (管理员)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateLotteryRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_free: bool,
    /// 单价 (美分), 免费活动为 0
    #[serde(default)]
    pub ticket_price: i64,
    pub min_tickets: i32,
    pub max_tickets: i32,
    pub num_winners: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub prize_description: Option<String>,
    pub terms: Option<String>,
}

/// 修改抽奖活动 (仅 draft 状态); 未提供的字段保持不变
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateLotteryRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_free: Option<bool>,
    pub ticket_price: Option<i64>,
    pub min_tickets: Option<i32>,
    pub max_tickets: Option<i32>,
    pub num_winners: Option<i32>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub prize_description: Option<String>,
    pub terms: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LotteryResponse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub is_free: bool,
    pub ticket_price: i64,
    pub min_tickets: i32,
    pub max_tickets: i32,
    pub num_winners: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: LotteryStatus,
    pub winner_selected_at: Option<DateTime<Utc>>,
    pub prize_description: Option<String>,
    pub terms: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

impl From<lottery_entity::Model> for LotteryResponse {
    fn from(m: lottery_entity::Model) -> Self {
        LotteryResponse {
            id: m.id,
            title: m.title,
            description: m.description,
            is_free: m.is_free,
            ticket_price: m.ticket_price,
            min_tickets: m.min_tickets,
            max_tickets: m.max_tickets,
            num_winners: m.num_winners,
            start_date: m.start_date,
            end_date: m.end_date,
            status: m.status,
            winner_selected_at: m.winner_selected_at,
            prize_description: m.prize_description,
            terms: m.terms,
            created_by: m.created_by,
            created_at: m.created_at,
        }
    }
}

/// 号码统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LotteryCounts {
    pub paid: u64,
    pub pending: u64,
    pub reserved: u64,
    pub sold: u64,
    pub available: u64,
}

/// 活动状态 (含号码统计)
#[derive(Debug, Clone, Serialize)]
pub struct LotteryStatusResponse {
    #[serde(flatten)]
    pub lottery: LotteryResponse,
    pub counts: LotteryCounts,
}

/// 可用号码查询参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AvailableNumbersQuery {
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableNumbersResponse {
    pub lottery_id: Uuid,
    pub available_count: u64,
    pub numbers: Vec<i32>,
}

/// 中奖信息
#[derive(Debug, Clone, Serialize)]
pub struct WinnerResponse {
    pub rank: i32,
    pub ticket_id: Uuid,
    pub ticket_number: i32,
    pub user_id: i64,
    pub selected_at: DateTime<Utc>,
}

impl From<winner_entity::Model> for WinnerResponse {
    fn from(m: winner_entity::Model) -> Self {
        WinnerResponse {
            rank: m.rank,
            ticket_id: m.ticket_id,
            ticket_number: m.ticket_number,
            user_id: m.user_id,
            selected_at: m.selected_at,
        }
    }
}

/// Result of one lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LotteryTransition {
    pub lottery_id: Uuid,
    pub from: LotteryStatus,
    pub to: LotteryStatus,
}
