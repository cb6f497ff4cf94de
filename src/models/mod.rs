//! 数据模型模块
//! 与后端交互的线上结构

pub mod auth;
pub mod envelope;

pub use auth::{LoginResponse, TokenPair, UserProfile};
pub use envelope::ApiEnvelope;
