pub mod common;
pub mod lottery;
pub mod ticket;
pub mod user;

pub use common::*;
pub use lottery::*;
pub use ticket::*;
pub use user::*;
