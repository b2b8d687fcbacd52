use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

/// Lotteries (抽奖活动)
#[derive(DeriveIden)]
enum Lotteries {
    Table,
    Id,
    Title,
    Description,
    IsFree,
    TicketPrice,
    MinTickets,
    MaxTickets,
    NumWinners,
    StartDate,
    EndDate,
    Status,
    WinnerSelectedAt,
    PrizeDescription,
    Terms,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}

/// Reserved numbers (号码临时占用)
#[derive(DeriveIden)]
enum ReservedNumbers {
    Table,
    Id,
    ReservationId,
    LotteryId,
    TicketNumber,
    UserId,
    ReservedAt,
    ExpiresAt,
}

/// Tickets (已认领号码)
#[derive(DeriveIden)]
enum Tickets {
    Table,
    Id,
    LotteryId,
    ReservationId,
    TicketNumber,
    UserId,
    PaymentStatus,
    PaymentAmount,
    PaymentMethod,
    PaymentReference,
    IsWinner,
    RefundRequested,
    PaidAt,
    CreatedAt,
    UpdatedAt,
}

/// Lottery winners (中奖记录)
#[derive(DeriveIden)]
enum LotteryWinners {
    Table,
    Id,
    LotteryId,
    TicketId,
    TicketNumber,
    UserId,
    Rank,
    SelectedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Status columns are plain text (no native enum types) so the schema runs
/// unchanged on PostgreSQL and SQLite.
///
/// Exclusivity of a ticket number is carried by two unique indexes:
/// - `reserved_numbers (lottery_id, ticket_number)` for live holds
/// - `tickets (lottery_id, ticket_number)` restricted to pending/paid rows,
///   so failed/expired rows never block a re-claim
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Lotteries::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Lotteries::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Lotteries::Title).string_len(255).not_null())
                    .col(ColumnDef::new(Lotteries::Description).text().not_null())
                    .col(
                        ColumnDef::new(Lotteries::IsFree)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Lotteries::TicketPrice)
                            .big_integer()
                            .not_null()
                            .default(0), // 美分, 免费活动为 0
                    )
                    .col(ColumnDef::new(Lotteries::MinTickets).integer().not_null())
                    .col(ColumnDef::new(Lotteries::MaxTickets).integer().not_null())
                    .col(ColumnDef::new(Lotteries::NumWinners).integer().not_null())
                    .col(
                        ColumnDef::new(Lotteries::StartDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Lotteries::EndDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Lotteries::Status)
                            .string_len(16)
                            .not_null()
                            .default("draft"),
                    )
                    .col(
                        ColumnDef::new(Lotteries::WinnerSelectedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Lotteries::PrizeDescription).text().null())
                    .col(ColumnDef::new(Lotteries::Terms).text().null())
                    .col(ColumnDef::new(Lotteries::CreatedBy).big_integer().not_null())
                    .col(
                        ColumnDef::new(Lotteries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Lotteries::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 定时任务按状态扫描
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_lotteries_status")
                    .table(Lotteries::Table)
                    .col(Lotteries::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ReservedNumbers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReservedNumbers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReservedNumbers::ReservationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ReservedNumbers::LotteryId).uuid().not_null())
                    .col(
                        ColumnDef::new(ReservedNumbers::TicketNumber)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReservedNumbers::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReservedNumbers::ReservedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReservedNumbers::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reserved_numbers_lottery")
                            .from(ReservedNumbers::Table, ReservedNumbers::LotteryId)
                            .to(Lotteries::Table, Lotteries::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // 号码独占锁: 同一活动同一号码同时只能有一条占用
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_reserved_numbers_lottery_number_unique")
                    .table(ReservedNumbers::Table)
                    .col(ReservedNumbers::LotteryId)
                    .col(ReservedNumbers::TicketNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_reserved_numbers_reservation")
                    .table(ReservedNumbers::Table)
                    .col(ReservedNumbers::ReservationId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_reserved_numbers_expires_at")
                    .table(ReservedNumbers::Table)
                    .col(ReservedNumbers::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Tickets::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tickets::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Tickets::LotteryId).uuid().not_null())
                    .col(ColumnDef::new(Tickets::ReservationId).uuid().null())
                    .col(ColumnDef::new(Tickets::TicketNumber).integer().not_null())
                    .col(ColumnDef::new(Tickets::UserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Tickets::PaymentStatus)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Tickets::PaymentAmount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Tickets::PaymentMethod).string_len(64).null())
                    .col(
                        ColumnDef::new(Tickets::PaymentReference)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Tickets::IsWinner)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Tickets::RefundRequested)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Tickets::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Tickets::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Tickets::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tickets_lottery")
                            .from(Tickets::Table, Tickets::LotteryId)
                            .to(Lotteries::Table, Lotteries::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tickets_lottery_user")
                    .table(Tickets::Table)
                    .col(Tickets::LotteryId)
                    .col(Tickets::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tickets_reservation")
                    .table(Tickets::Table)
                    .col(Tickets::ReservationId)
                    .to_owned(),
            )
            .await?;

        // 部分唯一索引: 只有 pending/paid 的票占用号码 (PostgreSQL 与 SQLite 语法一致)
        let conn = manager.get_connection();
        let partial_unique_sql = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_tickets_active_number_unique
    ON tickets (lottery_id, ticket_number)
    WHERE payment_status IN ('pending', 'paid');
"#;
        conn.execute(Statement::from_string(
            manager.get_database_backend(),
            partial_unique_sql.to_string(),
        ))
        .await?;

        manager
            .create_table(
                Table::create()
                    .table(LotteryWinners::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LotteryWinners::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LotteryWinners::LotteryId).uuid().not_null())
                    .col(ColumnDef::new(LotteryWinners::TicketId).uuid().not_null())
                    .col(
                        ColumnDef::new(LotteryWinners::TicketNumber)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LotteryWinners::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LotteryWinners::Rank).integer().not_null())
                    .col(
                        ColumnDef::new(LotteryWinners::SelectedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_lottery_winners_lottery")
                            .from(LotteryWinners::Table, LotteryWinners::LotteryId)
                            .to(Lotteries::Table, Lotteries::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_lottery_winners_ticket")
                            .from(LotteryWinners::Table, LotteryWinners::TicketId)
                            .to(Tickets::Table, Tickets::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_lottery_winners_rank_unique")
                    .table(LotteryWinners::Table)
                    .col(LotteryWinners::LotteryId)
                    .col(LotteryWinners::Rank)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 同一张票不能中两次
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_lottery_winners_ticket_unique")
                    .table(LotteryWinners::Table)
                    .col(LotteryWinners::TicketId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 删除顺序：中奖 -> 票 -> 占用 -> 活动
        manager
            .drop_table(
                Table::drop()
                    .if_exists()
                    .table(LotteryWinners::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().if_exists().table(Tickets::Table).to_owned())
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .if_exists()
                    .table(ReservedNumbers::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().if_exists().table(Lotteries::Table).to_owned())
            .await?;

        Ok(())
    }
}
