pub mod deal;
pub mod discount;
pub mod grade;
pub mod money;
pub mod payment;
pub mod ports;
pub mod pricing;
pub mod retention;
pub mod settings;
pub mod user;
