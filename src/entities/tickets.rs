use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};

/// 票据支付状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, DeriveActiveEnum, EnumIter)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl PaymentStatus {
    /// pending / paid 的票据占用号码; failed / expired 不阻塞重新认领
    pub fn claims_number(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Paid)
    }

    pub const CLAIMING: [PaymentStatus; 2] = [PaymentStatus::Pending, PaymentStatus::Paid];
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Expired => write!(f, "expired"),
        }
    }
}

/// 票据实体 (一个号码一行)
/// 说明:
/// - 预约时以 pending 创建, 支付确认后变为 paid
/// - (lottery_id, ticket_number) 在 pending/paid 范围内唯一 (部分唯一索引)
/// - reservation_id 指向创建它的占用批次, 免费自动确认的票为空
/// - refund_requested 由活动取消时标记, 供外部支付方处理退款
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "tickets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub lottery_id: Uuid,
    pub reservation_id: Option<Uuid>,
    pub ticket_number: i32,
    pub user_id: i64,
    pub payment_status: PaymentStatus,
    /// 支付金额 (美分)
    pub payment_amount: i64,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub is_winner: bool,
    pub refund_requested: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::lotteries::Entity",
        from = "Column::LotteryId",
        to = "super::lotteries::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Lottery,
}

impl Related<super::lotteries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lottery.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
