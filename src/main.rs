use actix_web::{App, HttpResponse, HttpServer, middleware::Logger, web};
use anyhow::Context;
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter

use lottery_engine::{
    config::{Config, SettingsHandle},
    database::{create_pool, run_migrations},
    handlers,
    middlewares::{AuthMiddleware, create_cors},
    services::*,
    tasks,
    utils::JwtService,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config = Config::from_toml()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("Failed to load configuration")?;

    // 创建数据库连接池
    let pool = create_pool(&config.database)
        .await
        .context("Failed to create database connection pool")?;

    // 运行数据库迁移
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let settings = SettingsHandle::new(config.lottery.clone());
    let jwt_service = JwtService::new(&config.jwt.secret, config.jwt.access_token_expires_in);

    // 创建服务
    let winner_selector = WinnerSelector::new(pool.clone());
    let reservation_service = ReservationService::new(pool.clone(), settings.clone());
    let lifecycle_service = LotteryLifecycleService::new(pool.clone(), winner_selector.clone());
    let purchase_service = PurchaseService::new(
        settings.clone(),
        NumberSpaceService::new(pool.clone()),
        reservation_service.clone(),
        PurchaseLedger::new(pool.clone()),
        lifecycle_service.clone(),
        winner_selector,
    );
    let sweep_service = SweepService::new(reservation_service, lifecycle_service);

    // 启动后台定时任务
    tasks::spawn_all(sweep_service.clone(), settings.clone());
    spawn_settings_reload(settings.clone());

    log::info!(
        "Starting HTTP server at {}:{} (reservation ttl {}s, sweep every {}s)",
        config.server.host,
        config.server.port,
        config.lottery.reservation_ttl_secs,
        config.lottery.sweep_interval_secs
    );

    HttpServer::new(move || {
        App::new()
            .wrap(AuthMiddleware::new(jwt_service.clone()))
            .wrap(create_cors())
            .wrap(Logger::default())
            .app_data(web::Data::new(purchase_service.clone()))
            .app_data(web::Data::new(sweep_service.clone()))
            .route("/health", web::get().to(|| async { HttpResponse::Ok().body("ok") }))
            .service(
                web::scope("/api/v1")
                    .configure(handlers::lottery_config)
                    .configure(handlers::purchase_config)
                    .configure(handlers::admin_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}

/// SIGHUP 时重新读取 [lottery] 配置
#[cfg(unix)]
fn spawn_settings_reload(settings: SettingsHandle) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Failed to install SIGHUP handler: {e}");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            match Config::reload_lottery_settings() {
                Ok(next) => {
                    log::info!("Reloaded lottery settings: {next:?}");
                    settings.replace(next);
                }
                Err(e) => log::error!("Failed to reload lottery settings, keeping current: {e}"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_settings_reload(_settings: SettingsHandle) {}
