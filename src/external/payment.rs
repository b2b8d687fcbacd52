use serde::{Deserialize, Serialize};

/// Terminal outcome reported by the payment service.
///
/// The client hands the reservation id and `amount_due` to the payment
/// service; once the charge settles, the service posts this body to
/// `/reservations/{id}/confirm` with its own `payment_service` token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentResult {
    Confirmed {
        method: String,
        #[serde(default)]
        reference: Option<String>,
    },
    Rejected {
        reason: String,
    },
}
