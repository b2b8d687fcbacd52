use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 中奖记录
/// - 开奖时一次性写入, 之后不可修改
/// - (lottery_id, rank) 唯一, ticket_id 唯一
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "lottery_winners")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub lottery_id: Uuid,
    pub ticket_id: Uuid,
    pub ticket_number: i32,
    pub user_id: i64,
    /// 名次 1..=num_winners
    pub rank: i32,
    pub selected_at: DateTime<Utc>,
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
    #[sea_orm(
        belongs_to = "super::tickets::Entity",
        from = "Column::TicketId",
        to = "super::tickets::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Ticket,
}

impl Related<super::lotteries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lottery.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
