use crate::error::AppResult;
use crate::models::LotteryTransition;
use crate::services::lottery_lifecycle::LotteryLifecycleService;
use crate::services::reservation_service::ReservationService;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub expired_holds: u64,
    /// 过期清理失败; 活动推进照常进行, 下一轮重试清理
    pub expiry_failed: bool,
    pub transitions: Vec<LotteryTransition>,
    /// 推进失败的活动, 下一轮重试
    pub failures: Vec<Uuid>,
}

/// 定时维护: 过期占用清理 + 活动状态推进
#[derive(Clone)]
pub struct SweepService {
    reservations: ReservationService,
    lifecycle: LotteryLifecycleService,
}

impl SweepService {
    pub fn new(reservations: ReservationService, lifecycle: LotteryLifecycleService) -> Self {
        Self {
            reservations,
            lifecycle,
        }
    }

    /// Stateless; safe to run concurrently with itself since every step is a
    /// conditional write. A failing step is logged and skipped, so one bad
    /// reservation or lottery never stalls the rest of the pass.
    pub async fn run_once(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();
        match self.reservations.expire_stale(now).await {
            Ok(freed) => report.expired_holds = freed,
            Err(e) => {
                log::error!("Sweep: failed to expire stale holds: {e}");
                report.expiry_failed = true;
            }
        }

        for lottery_id in self.lifecycle.list_in_progress().await? {
            match self.lifecycle.advance_until_stable(lottery_id, now).await {
                Ok(mut applied) => report.transitions.append(&mut applied),
                Err(e) => {
                    log::error!("Sweep: failed to advance lottery {lottery_id}: {e}");
                    report.failures.push(lottery_id);
                }
            }
        }

        if report.expired_holds > 0 || !report.transitions.is_empty() || report.expiry_failed {
            log::info!(
                "Sweep: {} holds expired, {} transitions, {} failures",
                report.expired_holds,
                report.transitions.len(),
                report.failures.len()
            );
        }
        Ok(report)
    }
}
