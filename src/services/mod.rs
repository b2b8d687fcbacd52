pub mod lottery_lifecycle;
pub mod number_space;
pub mod purchase_ledger;
pub mod purchase_service;
pub mod reservation_service;
pub mod sweep_service;
pub mod winner_selector;

pub use lottery_lifecycle::*;
pub use number_space::*;
pub use purchase_ledger::*;
pub use purchase_service::*;
pub use reservation_service::*;
pub use sweep_service::*;
pub use winner_selector::*;
