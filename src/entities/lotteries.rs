use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};

/// 抽奖活动状态
///
/// draft -> active -> closed -> finished, 任意非 finished 状态可进入 cancelled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, DeriveActiveEnum, EnumIter)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum LotteryStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "closed")]
    Closed,
    #[sea_orm(string_value = "finished")]
    Finished,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl LotteryStatus {
    /// finished / cancelled 之后不再有任何迁移
    pub fn is_terminal(&self) -> bool {
        matches!(self, LotteryStatus::Finished | LotteryStatus::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            LotteryStatus::Draft => 0,
            LotteryStatus::Active => 1,
            LotteryStatus::Closed => 2,
            LotteryStatus::Finished => 3,
            LotteryStatus::Cancelled => 4,
        }
    }

    /// Monotonic transitions only; `cancelled` is reachable from every
    /// non-terminal state.
    pub fn can_transition_to(&self, next: LotteryStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            LotteryStatus::Cancelled => true,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl std::fmt::Display for LotteryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LotteryStatus::Draft => write!(f, "draft"),
            LotteryStatus::Active => write!(f, "active"),
            LotteryStatus::Closed => write!(f, "closed"),
            LotteryStatus::Finished => write!(f, "finished"),
            LotteryStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 抽奖活动实体
/// 说明:
/// - ticket_price 单位为美分, is_free 时为 0
/// - max_tickets 即号码空间大小 [1, max_tickets], 一旦有票据产生不可修改
/// - winner_selected_at 非空表示已开奖 (开奖防重入标记)
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "lotteries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub title: String,
    #[sea_orm(column_type = "Text")]
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
    #[sea_orm(column_type = "Text", nullable)]
    pub prize_description: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub terms: Option<String>,
    /// 创建者 (外部用户ID)
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// 号码是否在 [1, max_tickets] 范围内
    pub fn contains_number(&self, number: i32) -> bool {
        number >= 1 && number <= self.max_tickets
    }

    /// 当前时间是否处于售票窗口
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LotteryStatus::Active && self.start_date <= now && now < self.end_date
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tickets::Entity")]
    Tickets,
    #[sea_orm(has_many = "super::reserved_numbers::Entity")]
    ReservedNumbers,
    #[sea_orm(has_many = "super::lottery_winners::Entity")]
    Winners,
}

impl Related<super::tickets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tickets.def()
    }
}

impl Related<super::reserved_numbers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReservedNumbers.def()
    }
}

impl Related<super::lottery_winners::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Winners.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
