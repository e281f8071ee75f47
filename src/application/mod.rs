//! Application services. Each one holds the ports it needs and runs a single
//! use case end to end: load, apply domain rules, persist, log.

pub mod auth;
pub mod checkout;
pub mod deals;
pub mod grading;
pub mod settings;
pub mod uploads;
pub mod withdrawal;
