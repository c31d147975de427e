//! Grok Token 池模块

pub mod error;
pub mod model;
pub mod probe;
pub mod token_manager;

pub use error::TokenError;
pub use token_manager::TokenManager;
