use crate::entities::LotteryStatus;
use crate::middlewares::current_user;
use crate::models::*;
use crate::services::PurchaseService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListLotteriesQuery {
    pub status: Option<LotteryStatus>,
}

/// 活动列表, 可按状态筛选
pub async fn list_lotteries(
    service: web::Data<PurchaseService>,
    query: web::Query<ListLotteriesQuery>,
) -> Result<HttpResponse> {
    match service.list_lotteries(query.status).await {
        Ok(list) => {
            let data: Vec<LotteryResponse> = list.into_iter().map(Into::into).collect();
            Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
        }
        Err(e) => Ok(e.error_response()),
    }
}

/// 活动详情 (含已售 / 占用 / 可用数量)
pub async fn get_lottery_status(
    service: web::Data<PurchaseService>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    match service
        .get_lottery_status(path.into_inner(), chrono::Utc::now())
        .await
    {
        Ok(data) => Ok(HttpResponse::Ok().json(ApiResponse::success(data))),
        Err(e) => Ok(e.error_response()),
    }
}

/// 可用号码 (升序, 受 available_list_limit 限制)
pub async fn list_available_numbers(
    service: web::Data<PurchaseService>,
    path: web::Path<Uuid>,
    query: web::Query<AvailableNumbersQuery>,
) -> Result<HttpResponse> {
    match service
        .list_available_numbers(path.into_inner(), query.limit, chrono::Utc::now())
        .await
    {
        Ok(data) => Ok(HttpResponse::Ok().json(ApiResponse::success(data))),
        Err(e) => Ok(e.error_response()),
    }
}

pub async fn get_winners(
    service: web::Data<PurchaseService>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    match service.get_winners(path.into_inner()).await {
        Ok(list) => {
            let data: Vec<WinnerResponse> = list.into_iter().map(Into::into).collect();
            Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
        }
        Err(e) => Ok(e.error_response()),
    }
}

/// 当前用户在该活动下的票据
pub async fn list_my_tickets(
    service: web::Data<PurchaseService>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let user = match current_user(&req) {
        Ok(u) => u,
        Err(e) => return Ok(e.error_response()),
    };
    match service.list_my_tickets(&user, path.into_inner()).await {
        Ok(list) => {
            let data: Vec<TicketResponse> = list.into_iter().map(Into::into).collect();
            Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
        }
        Err(e) => Ok(e.error_response()),
    }
}

/// 预约号码; 冲突时返回 409 并附带不可用号码
pub async fn reserve_tickets(
    service: web::Data<PurchaseService>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<ReserveTicketsRequest>,
) -> Result<HttpResponse> {
    let user = match current_user(&req) {
        Ok(u) => u,
        Err(e) => return Ok(e.error_response()),
    };
    match service
        .reserve_tickets(&user, path.into_inner(), &body.numbers, chrono::Utc::now())
        .await
    {
        Ok(reservation) => {
            let data = ReservationResponse::from(reservation);
            Ok(HttpResponse::Created().json(ApiResponse::success(data)))
        }
        Err(e) => Ok(e.error_response()),
    }
}

pub fn lottery_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/lotteries")
            .route("", web::get().to(list_lotteries))
            .route("/{id}", web::get().to(get_lottery_status))
            .route("/{id}/available", web::get().to(list_available_numbers))
            .route("/{id}/winners", web::get().to(get_winners))
            .route("/{id}/tickets/me", web::get().to(list_my_tickets))
            .route("/{id}/reservations", web::post().to(reserve_tickets)),
    );
}
