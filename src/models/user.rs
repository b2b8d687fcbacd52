use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Admin,
    /// 支付服务的服务账号, 只用于回传支付结果
    PaymentService,
}

/// 当前请求的用户 (由鉴权中间件注入)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
    pub role: UserRole,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Callers trusted to report a payment outcome.
    pub fn can_settle_payments(&self) -> bool {
        matches!(self.role, UserRole::Admin | UserRole::PaymentService)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_admin_and_payment_service_settle_payments() {
        let user = |role| CurrentUser { id: 1, role };
        assert!(!user(UserRole::User).can_settle_payments());
        assert!(user(UserRole::Admin).can_settle_payments());
        assert!(user(UserRole::PaymentService).can_settle_payments());
        assert!(!user(UserRole::PaymentService).is_admin());

        let role: UserRole = serde_json::from_str(r#""payment_service""#).unwrap();
        assert_eq!(role, UserRole::PaymentService);
    }
}
