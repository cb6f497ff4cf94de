//! 洗车管理系统 API 客户端
//! 带令牌自动刷新的后端访问层，以及凭证的本地持久化

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod models;
pub mod sanitize;
pub mod telemetry;

pub use client::{ApiClient, ApiClientBuilder, SessionEvent};
pub use credentials::{CredentialPair, CredentialStore};
pub use error::{ClientError, Result};
