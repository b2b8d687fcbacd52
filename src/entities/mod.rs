pub mod lotteries;
pub mod lottery_winners;
pub mod reserved_numbers;
pub mod tickets;

pub use lotteries::LotteryStatus;
pub use tickets::PaymentStatus;

pub use lotteries as lottery_entity;
pub use lottery_winners as winner_entity;
pub use reserved_numbers as reserved_number_entity;
pub use tickets as ticket_entity;
