//! Authentication-related models
//!
//! Field names follow the backend's camelCase wire format.

use serde::{Deserialize, Serialize};

/// Token pair issued by login and refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Login request
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Login response
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub user: UserProfile,
    pub tokens: TokenPair,
}

/// Token refresh request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest<'a> {
    pub refresh_token: &'a str,
}

/// Token refresh response
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenResponse {
    pub tokens: TokenPair,
}

/// Logout request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest<'a> {
    pub refresh_token: &'a str,
}

/// Current user as returned by `/auth/me` and login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: serde_json::Value,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Fields this client does not model explicitly
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
