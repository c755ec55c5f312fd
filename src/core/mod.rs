pub mod cache;
pub mod detector;
pub mod error;
pub mod message;
pub mod strategy;
