use crate::config::SettingsHandle;
use crate::entities::{
    LotteryStatus, PaymentStatus, lottery_entity as lotteries, ticket_entity as tickets,
    winner_entity as winners,
};
use crate::error::{AppError, AppResult};
use crate::external::PaymentResult;
use crate::models::{
    AvailableNumbersResponse, CreateLotteryRequest, CurrentUser, LotteryCounts,
    LotteryStatusResponse, Reservation, UpdateLotteryRequest,
};
use crate::services::lottery_lifecycle::LotteryLifecycleService;
use crate::services::number_space::NumberSpaceService;
use crate::services::purchase_ledger::PurchaseLedger;
use crate::services::reservation_service::ReservationService;
use crate::services::winner_selector::WinnerSelector;
use chrono::{DateTime, Utc};
use uuid::Uuid;

fn require_admin(user: &CurrentUser) -> AppResult<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// The operations the engine exposes to its callers.
///
/// Authorization (admin, payment service or holder) is checked here; the component services
/// underneath trust their arguments.
#[derive(Clone)]
pub struct PurchaseService {
    settings: SettingsHandle,
    numbers: NumberSpaceService,
    reservations: ReservationService,
    ledger: PurchaseLedger,
    lifecycle: LotteryLifecycleService,
    winners: WinnerSelector,
}

impl PurchaseService {
    pub fn new(
        settings: SettingsHandle,
        numbers: NumberSpaceService,
        reservations: ReservationService,
        ledger: PurchaseLedger,
        lifecycle: LotteryLifecycleService,
        winners: WinnerSelector,
    ) -> Self {
        Self {
            settings,
            numbers,
            reservations,
            ledger,
            lifecycle,
            winners,
        }
    }

    // ---- 管理员操作 ----

    pub async fn create_lottery(
        &self,
        user: &CurrentUser,
        req: CreateLotteryRequest,
        now: DateTime<Utc>,
    ) -> AppResult<lotteries::Model> {
        require_admin(user)?;
        self.lifecycle.create_lottery(user.id, req, now).await
    }

    pub async fn update_lottery(
        &self,
        user: &CurrentUser,
        lottery_id: Uuid,
        req: UpdateLotteryRequest,
        now: DateTime<Utc>,
    ) -> AppResult<lotteries::Model> {
        require_admin(user)?;
        self.lifecycle.update_lottery(lottery_id, req, now).await
    }

    pub async fn activate_lottery(
        &self,
        user: &CurrentUser,
        lottery_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<lotteries::Model> {
        require_admin(user)?;
        self.lifecycle.activate(lottery_id, now).await
    }

    pub async fn cancel_lottery(
        &self,
        user: &CurrentUser,
        lottery_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<lotteries::Model> {
        require_admin(user)?;
        self.lifecycle.cancel(lottery_id, now).await
    }

    /// 待退款票据列表, 由支付方拉取处理
    pub async fn list_refund_requested(
        &self,
        user: &CurrentUser,
        lottery_id: Uuid,
    ) -> AppResult<Vec<tickets::Model>> {
        require_admin(user)?;
        self.ledger.list_refund_requested(lottery_id).await
    }

    // ---- 购票流程 ----

    /// Hold `numbers` for the current user with the configured TTL.
    pub async fn reserve_tickets(
        &self,
        user: &CurrentUser,
        lottery_id: Uuid,
        numbers: &[i32],
        now: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        let ttl = self.settings.current().reservation_ttl();
        let reservation = self
            .reservations
            .reserve(lottery_id, user.id, numbers, ttl, now)
            .await?;
        if let Reservation::Confirmed(_) = reservation {
            self.settle_lifecycle(lottery_id, now).await;
        }
        Ok(reservation)
    }

    /// 支付结果回传, 仅支付服务 (或管理员) 可调用; 持有人不能自行确认
    pub async fn confirm_purchase(
        &self,
        user: &CurrentUser,
        reservation_id: Uuid,
        payment: PaymentResult,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<tickets::Model>> {
        if !user.can_settle_payments() {
            log::warn!("User {} tried to settle reservation {reservation_id}", user.id);
            return Err(AppError::Forbidden);
        }
        let paid = self.reservations.confirm(reservation_id, payment, now).await?;
        if let Some(first) = paid.first() {
            self.settle_lifecycle(first.lottery_id, now).await;
        }
        Ok(paid)
    }

    pub async fn release_reservation(
        &self,
        user: &CurrentUser,
        reservation_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        self.require_holder(user, reservation_id).await?;
        self.reservations.release(reservation_id, now).await
    }

    // ---- 查询 ----

    pub async fn list_available_numbers(
        &self,
        lottery_id: Uuid,
        limit: Option<u64>,
        now: DateTime<Utc>,
    ) -> AppResult<AvailableNumbersResponse> {
        let cap = self.settings.current().available_list_limit;
        let limit = limit.unwrap_or(cap).min(cap) as usize;
        let space = self.numbers.snapshot(lottery_id, now).await?;
        Ok(AvailableNumbersResponse {
            lottery_id,
            available_count: space.available_count(),
            numbers: space.list_available(limit),
        })
    }

    pub async fn get_lottery_status(
        &self,
        lottery_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<LotteryStatusResponse> {
        let lottery = self.lifecycle.get(lottery_id).await?;
        let space = self.numbers.snapshot(lottery_id, now).await?;
        let paid = self.ledger.count_paid(lottery_id).await?;
        let pending = self
            .ledger
            .count_by_status(lottery_id, PaymentStatus::Pending)
            .await?;
        Ok(LotteryStatusResponse {
            lottery: lottery.into(),
            counts: LotteryCounts {
                paid,
                pending,
                reserved: space.reserved_count(),
                sold: space.sold_count(),
                available: space.available_count(),
            },
        })
    }

    pub async fn get_lottery(&self, lottery_id: Uuid) -> AppResult<lotteries::Model> {
        self.lifecycle.get(lottery_id).await
    }

    pub async fn list_lotteries(
        &self,
        status: Option<LotteryStatus>,
    ) -> AppResult<Vec<lotteries::Model>> {
        self.lifecycle.list(status).await
    }

    pub async fn get_winners(&self, lottery_id: Uuid) -> AppResult<Vec<winners::Model>> {
        self.lifecycle.get(lottery_id).await?;
        self.winners.list_winners(lottery_id).await
    }

    pub async fn list_my_tickets(
        &self,
        user: &CurrentUser,
        lottery_id: Uuid,
    ) -> AppResult<Vec<tickets::Model>> {
        self.ledger.list_by_user(user.id, lottery_id).await
    }

    async fn require_holder(&self, user: &CurrentUser, reservation_id: Uuid) -> AppResult<()> {
        match self.reservations.reservation_owner(reservation_id).await? {
            None => Err(AppError::NotFound("Reservation not found".into())),
            Some(owner) if owner == user.id || user.is_admin() => Ok(()),
            Some(_) => Err(AppError::Forbidden),
        }
    }

    /// 支付成功后重新评估活动状态 (售罄即关闭); 失败留给定时任务
    async fn settle_lifecycle(&self, lottery_id: Uuid, now: DateTime<Utc>) {
        if let Err(e) = self.lifecycle.advance_until_stable(lottery_id, now).await {
            log::warn!("Lottery {lottery_id}: post-purchase advance failed: {e}");
        }
    }
}
