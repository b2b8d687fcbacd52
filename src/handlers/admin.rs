use crate::middlewares::current_user;
use crate::models::*;
use crate::services::{PurchaseService, SweepService};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use uuid::Uuid;

macro_rules! admin_user {
    ($req:expr) => {
        match current_user(&$req) {
            Ok(u) if u.is_admin() => u,
            Ok(_) => return Ok(crate::error::AppError::Forbidden.error_response()),
            Err(e) => return Ok(e.error_response()),
        }
    };
}

/// 创建活动 (draft)
pub async fn create_lottery(
    service: web::Data<PurchaseService>,
    req: HttpRequest,
    body: web::Json<CreateLotteryRequest>,
) -> Result<HttpResponse> {
    let user = admin_user!(req);
    match service
        .create_lottery(&user, body.into_inner(), chrono::Utc::now())
        .await
    {
        Ok(l) => Ok(HttpResponse::Created().json(ApiResponse::success(LotteryResponse::from(l)))),
        Err(e) => Ok(e.error_response()),
    }
}

pub async fn update_lottery(
    service: web::Data<PurchaseService>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<UpdateLotteryRequest>,
) -> Result<HttpResponse> {
    let user = admin_user!(req);
    match service
        .update_lottery(&user, path.into_inner(), body.into_inner(), chrono::Utc::now())
        .await
    {
        Ok(l) => Ok(HttpResponse::Ok().json(ApiResponse::success(LotteryResponse::from(l)))),
        Err(e) => Ok(e.error_response()),
    }
}

pub async fn activate_lottery(
    service: web::Data<PurchaseService>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let user = admin_user!(req);
    match service
        .activate_lottery(&user, path.into_inner(), chrono::Utc::now())
        .await
    {
        Ok(l) => Ok(HttpResponse::Ok().json(ApiResponse::success(LotteryResponse::from(l)))),
        Err(e) => Ok(e.error_response()),
    }
}

/// 取消活动, 已支付票据标记待退款
pub async fn cancel_lottery(
    service: web::Data<PurchaseService>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let user = admin_user!(req);
    match service
        .cancel_lottery(&user, path.into_inner(), chrono::Utc::now())
        .await
    {
        Ok(l) => Ok(HttpResponse::Ok().json(ApiResponse::success(LotteryResponse::from(l)))),
        Err(e) => Ok(e.error_response()),
    }
}

pub async fn list_refunds(
    service: web::Data<PurchaseService>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let user = admin_user!(req);
    match service.list_refund_requested(&user, path.into_inner()).await {
        Ok(list) => {
            let data: Vec<TicketResponse> = list.into_iter().map(Into::into).collect();
            Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
        }
        Err(e) => Ok(e.error_response()),
    }
}

/// 手动触发一次维护扫描
pub async fn run_sweep(
    sweep: web::Data<SweepService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let _user = admin_user!(req);
    match sweep.run_once(chrono::Utc::now()).await {
        Ok(report) => Ok(HttpResponse::Ok().json(ApiResponse::success(report))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn admin_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .route("/lotteries", web::post().to(create_lottery))
            .route("/lotteries/{id}", web::put().to(update_lottery))
            .route("/lotteries/{id}/activate", web::post().to(activate_lottery))
            .route("/lotteries/{id}/cancel", web::post().to(cancel_lottery))
            .route("/lotteries/{id}/refunds", web::get().to(list_refunds))
            .route("/sweep", web::post().to(run_sweep)),
    );
}
