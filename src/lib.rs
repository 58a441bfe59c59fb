pub mod auth;
pub mod bidding;
pub mod database;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod payment;
pub mod query;
pub mod settlement;
