//! HTTP request handlers.

pub mod clips;
pub mod health;
pub mod history;
pub mod media;

pub use health::{health, ready};
