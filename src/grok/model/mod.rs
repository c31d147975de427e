//! Grok 数据模型

pub mod token;
