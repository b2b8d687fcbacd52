pub mod admin;
pub mod lottery;
pub mod purchase;

pub use admin::admin_config;
pub use lottery::lottery_config;
pub use purchase::purchase_config;
