//! Background scheduled tasks.
//!
//! Call `spawn_all` once during startup; tasks are detached via `tokio::spawn`.

use crate::config::SettingsHandle;
use crate::services::SweepService;

/// Spawn all background tasks.
///
/// The sweep interval is re-read from `settings` before every sleep, so a
/// hot reload takes effect after the current pass.
pub fn spawn_all(sweep_service: SweepService, settings: SettingsHandle) {
    // 过期占用清理 + 活动状态推进
    tokio::spawn(async move {
        loop {
            match sweep_service.run_once(chrono::Utc::now()).await {
                Ok(report) if !report.failures.is_empty() => {
                    log::warn!("Sweep finished with failing lotteries: {:?}", report.failures)
                }
                Ok(_) => {}
                Err(e) => log::error!("Sweep failed: {e:?}"),
            }
            tokio::time::sleep(settings.current().sweep_interval()).await;
        }
    });
}
