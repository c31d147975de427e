//! Grok.rs Library
//!
//! Grok SSO Token 池与 API Key 的管理控制面

pub mod admin;
pub mod common;
pub mod grok;
pub mod http_client;
pub mod model;
pub mod storage;
