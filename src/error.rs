//! 统一错误模型
//! 客户端所有失败都以 ClientError 返回给调用方，并可映射为失败信封

use crate::models::envelope::{generic_failure, ApiEnvelope};
use serde_json::Value;
use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ClientError>;

/// 客户端错误类型
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// 401：保留后端信封，便于展示"用户名或密码错误"等原始消息
    #[error("{}", .envelope.error_message())]
    Unauthorized { envelope: ApiEnvelope<Value> },

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Session expired: {source}")]
    SessionExpired {
        #[source]
        source: Box<ClientError>,
    },

    #[error("API error {status}: {}", .envelope.error_message())]
    Api {
        status: u16,
        envelope: ApiEnvelope<Value>,
    },

    #[error("Request rejected: {}", .envelope.error_message())]
    Rejected { envelope: ApiEnvelope<Value> },

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// HTTP 状态码（仅对来自后端的错误有意义）
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Unauthorized { .. } => Some(401),
            ClientError::Api { status, .. } => Some(*status),
            ClientError::SessionExpired { source } => source.status(),
            _ => None,
        }
    }

    /// 转换为失败信封；后端信封原样返回，其余错误生成通用信封
    pub fn envelope(&self) -> ApiEnvelope<Value> {
        match self {
            ClientError::Api { envelope, .. }
            | ClientError::Unauthorized { envelope }
            | ClientError::Rejected { envelope } => envelope.clone(),
            other => ApiEnvelope::failure(other.to_string()),
        }
    }

    /// 是否为认证失败（调用方应重新登录）
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Unauthorized { .. }
                | ClientError::NoRefreshToken
                | ClientError::SessionExpired { .. }
        )
    }

    // 便捷方法
    pub fn storage(msg: impl std::fmt::Display) -> Self {
        ClientError::Storage(msg.to_string())
    }

    pub fn decode(msg: impl std::fmt::Display) -> Self {
        ClientError::Decode(msg.to_string())
    }

    pub fn session_expired(source: ClientError) -> Self {
        ClientError::SessionExpired {
            source: Box::new(source),
        }
    }

    /// 由状态码与响应体构造后端错误
    pub fn from_response(status: u16, body: &str) -> Self {
        let envelope = serde_json::from_str::<ApiEnvelope<Value>>(body)
            .ok()
            .filter(|e| e.error.is_some())
            .unwrap_or_else(|| generic_failure(status));

        if status == 401 {
            return ClientError::Unauthorized { envelope };
        }

        ClientError::Api { status, envelope }
    }

    /// 传输层错误：区分超时与其他网络失败
    pub fn from_transport(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(timeout_secs)
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Storage(e.to_string())
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for ClientError {
    fn from(e: config::ConfigError) -> Self {
        ClientError::Config(e.to_string())
    }
}
