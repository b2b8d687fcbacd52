use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 号码占用 (短期独占锁)
/// 说明:
/// - 同一 reservation_id 的多行构成一次全有或全无的占用
/// - (lottery_id, ticket_number) 唯一, 未过期期间即为独占锁
/// - 确认支付 / 主动释放 / 定时过期时删除
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "reserved_numbers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub lottery_id: Uuid,
    pub ticket_number: i32,
    /// 持有者 (外部用户ID)
    pub user_id: i64,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Model {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
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
