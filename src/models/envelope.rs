//! 统一响应信封
//! 后端所有响应（成功或失败）都使用 `{ success, data, error }` 结构

use serde::{Deserialize, Serialize};

/// API 响应信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// 成功信封
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// 失败信封
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// 错误消息，缺失时给出通用描述
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("Unknown error")
    }
}

/// 非 2xx 响应且响应体不是信封时使用的通用失败信封
pub fn generic_failure(status: u16) -> ApiEnvelope<serde_json::Value> {
    ApiEnvelope::failure(format!("Request failed with status code {}", status))
}
