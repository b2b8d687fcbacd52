use crate::external::PaymentResult;
use crate::middlewares::current_user;
use crate::models::*;
use crate::services::PurchaseService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use serde_json::json;
use uuid::Uuid;

/// 支付结果回传 (仅支付服务令牌可调用)
pub async fn confirm_purchase(
    service: web::Data<PurchaseService>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<PaymentResult>,
) -> Result<HttpResponse> {
    let user = match current_user(&req) {
        Ok(u) => u,
        Err(e) => return Ok(e.error_response()),
    };
    match service
        .confirm_purchase(&user, path.into_inner(), body.into_inner(), chrono::Utc::now())
        .await
    {
        Ok(list) => {
            let data: Vec<TicketResponse> = list.into_iter().map(Into::into).collect();
            Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
        }
        Err(e) => Ok(e.error_response()),
    }
}

/// 主动释放预约 (幂等)
pub async fn release_reservation(
    service: web::Data<PurchaseService>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let user = match current_user(&req) {
        Ok(u) => u,
        Err(e) => return Ok(e.error_response()),
    };
    match service
        .release_reservation(&user, path.into_inner(), chrono::Utc::now())
        .await
    {
        Ok(released) => Ok(HttpResponse::Ok().json(ApiResponse::success(json!({ "released": released })))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn purchase_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/reservations")
            .route("/{id}/confirm", web::post().to(confirm_purchase))
            .route("/{id}", web::delete().to(release_reservation)),
    );
}
