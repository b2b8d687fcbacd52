use crate::error::AppError;
use crate::models::CurrentUser;
use crate::utils::JwtService;
use actix_web::http::Method;
use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures_util::future::LocalBoxFuture;
use std::future::{Ready, ready};

// 公开路径配置
struct PublicPaths {
    exact_paths: Vec<&'static str>,
    /// 仅 GET 公开的前缀 (活动详情、可用号码、中奖名单)
    read_only_prefixes: Vec<&'static str>,
    /// 需要排除的后缀（即使在公开前缀下也需要认证）
    excluded_suffixes: Vec<&'static str>,
}

impl PublicPaths {
    fn new() -> Self {
        Self {
            exact_paths: vec!["/health"],
            read_only_prefixes: vec!["/api/v1/lotteries"],
            excluded_suffixes: vec!["/tickets/me"],
        }
    }

    fn is_public(&self, method: &Method, path: &str) -> bool {
        if self.exact_paths.contains(&path) {
            return true;
        }
        if method != Method::GET {
            return false;
        }
        if self
            .excluded_suffixes
            .iter()
            .any(|&suffix| path.ends_with(suffix))
        {
            return false;
        }
        self.read_only_prefixes
            .iter()
            .any(|&prefix| path.starts_with(prefix))
    }
}

/// Resolves the bearer token into a [`CurrentUser`] request extension.
pub struct AuthMiddleware {
    jwt_service: JwtService,
}

impl AuthMiddleware {
    pub fn new(jwt_service: JwtService) -> Self {
        Self { jwt_service }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service,
            jwt_service: self.jwt_service.clone(),
            public_paths: PublicPaths::new(),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: S,
    jwt_service: JwtService,
    public_paths: PublicPaths,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // 放行所有 CORS 预检请求
        if req.method() == Method::OPTIONS {
            return Box::pin(self.service.call(req));
        }

        let token = req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(str::to_owned);

        // 公开路径: 有合法令牌时仍注入用户, 无令牌直接放行
        if self.public_paths.is_public(req.method(), req.path()) {
            if let Some(user) = token
                .as_deref()
                .and_then(|t| self.jwt_service.verify_access_token(t).ok())
                .and_then(|claims| claims.current_user().ok())
            {
                req.extensions_mut().insert(user);
            }
            return Box::pin(self.service.call(req));
        }

        let Some(token) = token else {
            let error = AppError::AuthError("Missing access token".to_string());
            return Box::pin(async move { Err(error.into()) });
        };

        match self
            .jwt_service
            .verify_access_token(&token)
            .and_then(|claims| claims.current_user())
        {
            Ok(user) => {
                req.extensions_mut().insert(user);
                Box::pin(self.service.call(req))
            }
            Err(e) => {
                log::debug!("Rejected token: {e}");
                let error = AppError::AuthError("Invalid access token".to_string());
                Box::pin(async move { Err(error.into()) })
            }
        }
    }
}

/// 用于获取当前用户的辅助函数
pub fn current_user(req: &actix_web::HttpRequest) -> Result<CurrentUser, AppError> {
    req.extensions()
        .get::<CurrentUser>()
        .copied()
        .ok_or_else(|| AppError::AuthError("Missing access token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        let paths = PublicPaths::new();
        assert!(paths.is_public(&Method::GET, "/health"));
        assert!(paths.is_public(&Method::GET, "/api/v1/lotteries/abc/available"));
        assert!(!paths.is_public(&Method::POST, "/api/v1/lotteries/abc/reservations"));
        assert!(!paths.is_public(&Method::GET, "/api/v1/lotteries/abc/tickets/me"));
        assert!(!paths.is_public(&Method::GET, "/api/v1/admin/lotteries/abc/refunds"));
    }
}
