//! 认证流程：登录、刷新、登出

use super::{ApiClient, Attempt, OutboundRequest, SessionEvent};
use crate::error::{ClientError, Result};
use crate::models::auth::{
    LoginRequest, LoginResponse, LogoutRequest, RefreshTokenRequest, RefreshTokenResponse,
    TokenPair, UserProfile,
};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const ME_PATH: &str = "/auth/me";

impl ApiClient {
    /// 登录并保存返回的令牌对
    ///
    /// 登录接口的 401 表示用户名或密码错误，不会触发刷新。
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let body = serde_json::to_value(LoginRequest { username, password })?;
        let req = OutboundRequest::new(Method::POST, LOGIN_PATH)
            .body(&body)
            .without_refresh();

        let response: LoginResponse = self.send_once(&req, None, Attempt::Initial).await?;

        self.credentials
            .set(&response.tokens.access_token, &response.tokens.refresh_token)?;

        info!(username = %response.user.username, "Logged in");
        self.events.publish(SessionEvent::LoggedIn {
            username: response.user.username.clone(),
        });

        Ok(response)
    }

    /// 登出
    ///
    /// 尽力通知后端吊销刷新令牌；无论后端结果如何都会清除本地凭证。
    pub async fn logout(&self) -> Result<()> {
        let current = self.credentials.get();

        if let Some(refresh_token) = current.refresh_token() {
            let body = serde_json::to_value(LogoutRequest { refresh_token })?;
            let req = OutboundRequest::new(Method::POST, LOGOUT_PATH)
                .body(&body)
                .without_refresh();

            if let Err(e) = self
                .send_once::<Value>(&req, current.access_token(), Attempt::Initial)
                .await
            {
                warn!(error = %e, "Logout request failed, clearing local session anyway");
            }
        }

        self.credentials.clear()?;
        info!("Logged out");
        self.events.publish(SessionEvent::LoggedOut);
        Ok(())
    }

    /// 当前登录用户
    pub async fn current_user(&self) -> Result<UserProfile> {
        self.get(ME_PATH).await
    }

    /// 401 后恢复会话，返回可用于重发的访问令牌
    ///
    /// `stale_access` 是被拒绝的请求所携带的访问令牌。持锁后若发现存储中的
    /// 访问令牌已经变化，说明其他请求刚完成刷新，直接复用新令牌。
    pub(crate) async fn refresh_session(&self, stale_access: Option<&str>) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.credentials.get();
        if current.is_empty() && stale_access.is_some() {
            // 前一个持锁者刷新失败并已清空凭证，过期事件已发布过
            debug!("Session already expired by a concurrent request");
            return Err(ClientError::session_expired(ClientError::NoRefreshToken));
        }
        if let Some(access) = current.access_token() {
            if Some(access) != stale_access {
                debug!("Session already refreshed by a concurrent request");
                return Ok(access.to_string());
            }
        }

        let Some(refresh_token) = current.refresh_token() else {
            return Err(self.expire_session(ClientError::NoRefreshToken));
        };

        match self.call_refresh(refresh_token).await {
            Ok(tokens) => {
                if let Err(e) = self
                    .credentials
                    .set(&tokens.access_token, &tokens.refresh_token)
                {
                    // 内存已更新，持久化失败不影响本次重发
                    warn!(error = %e, "Refreshed tokens could not be persisted");
                }

                metrics::counter!("api_client_token_refresh_total", "outcome" => "success")
                    .increment(1);
                info!("Access token refreshed");
                self.events.publish(SessionEvent::Refreshed);

                Ok(tokens.access_token)
            }
            Err(e) => Err(self.expire_session(e)),
        }
    }

    async fn call_refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let body = serde_json::to_value(RefreshTokenRequest { refresh_token })?;
        let req = OutboundRequest::new(Method::POST, REFRESH_PATH)
            .body(&body)
            .without_refresh();

        let response: RefreshTokenResponse = self.send_once(&req, None, Attempt::Initial).await?;
        Ok(response.tokens)
    }

    /// 清除凭证并通知上层跳转登录
    fn expire_session(&self, cause: ClientError) -> ClientError {
        metrics::counter!("api_client_token_refresh_total", "outcome" => "failure").increment(1);
        warn!(error = %cause, login_path = %self.login_path, "Session expired");

        if let Err(e) = self.credentials.clear() {
            warn!(error = %e, "Failed to clear credentials after session expiry");
        }

        self.events.publish(SessionEvent::Expired {
            login_path: self.login_path.clone(),
            reason: cause.to_string(),
        });

        ClientError::session_expired(cause)
    }
}
