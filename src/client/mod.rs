//! 后端 API 客户端
//!
//! 所有请求都经过同一条管道：
//! 1. 附加当前访问令牌（`Authorization: Bearer ...`）
//! 2. 发送并解析 `{ success, data, error }` 信封
//! 3. 遇到 401 且是首次发送时，用刷新令牌换取新令牌对并重发一次
//!
//! 刷新失败或没有刷新令牌时清除凭证、发布 [`SessionEvent::Expired`]，
//! 并把刷新错误返回给调用方。

pub mod auth;
pub mod session;

pub use session::{SessionEvent, SessionEvents};

use crate::config::ApiConfig;
use crate::credentials::{CredentialPair, CredentialStore};
use crate::error::{ClientError, Result};
use crate::models::ApiEnvelope;
use crate::sanitize;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as TokioMutex};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// 请求关联 ID 头
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// 日志中响应体的最大长度
const LOG_BODY_LIMIT: usize = 512;

/// 同一逻辑请求的发送次数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attempt {
    /// 首次发送
    Initial,
    /// 刷新令牌后的唯一一次重发
    Resubmit,
}

impl Attempt {
    fn may_refresh(self) -> bool {
        self == Attempt::Initial
    }

    fn as_str(self) -> &'static str {
        match self {
            Attempt::Initial => "initial",
            Attempt::Resubmit => "resubmit",
        }
    }
}

/// 单次出站请求描述，发送过程中不会被修改
pub(crate) struct OutboundRequest<'a> {
    pub method: Method,
    pub path: &'a str,
    pub body: Option<&'a Value>,
    pub query: &'a [(&'a str, &'a str)],
    /// 401 时是否走刷新流程（登录、刷新、登出接口不走）
    pub refresh_on_unauthorized: bool,
}

impl<'a> OutboundRequest<'a> {
    pub fn new(method: Method, path: &'a str) -> Self {
        Self {
            method,
            path,
            body: None,
            query: &[],
            refresh_on_unauthorized: true,
        }
    }

    pub fn body(mut self, body: &'a Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, query: &'a [(&'a str, &'a str)]) -> Self {
        self.query = query;
        self
    }

    pub fn without_refresh(mut self) -> Self {
        self.refresh_on_unauthorized = false;
        self
    }
}

/// 带认证的 API 客户端
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    /// origin + 版本前缀，不带结尾斜杠
    api_root: String,
    timeout_secs: u64,
    login_path: String,
    credentials: Arc<CredentialStore>,
    /// 串行化刷新，多个并发 401 只触发一次刷新调用
    refresh_lock: Arc<TokioMutex<()>>,
    events: SessionEvents,
}

impl ApiClient {
    /// 创建客户端构建器
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// 从配置创建客户端
    pub fn from_config(config: &ApiConfig, credentials: Arc<CredentialStore>) -> Result<Self> {
        Self::builder()
            .base_url(&config.base_url)
            .prefix(&config.prefix)
            .timeout(config.timeout())
            .login_path(&config.login_path)
            .user_agent(&config.user_agent)
            .credentials(credentials)
            .build()
    }

    /// API 根地址（origin + 版本前缀）
    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    /// 会话失效时的登录路径
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    // ===== 凭证 =====

    /// 写入凭证对（内存 + 持久化）
    pub fn set_credentials(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        self.credentials.set(access_token, refresh_token)
    }

    /// 清除凭证（内存 + 持久化）
    pub fn clear_credentials(&self) -> Result<()> {
        self.credentials.clear()
    }

    /// 当前凭证对
    pub fn get_credentials(&self) -> CredentialPair {
        self.credentials.get()
    }

    /// 是否持有访问令牌
    pub fn is_authenticated(&self) -> bool {
        self.credentials.access_token().is_some()
    }

    /// 订阅会话事件
    pub fn subscribe_session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ===== 请求 =====

    /// 发送请求并返回信封中的 `data`
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let mut req = OutboundRequest::new(method, path).query(query);
        if let Some(body) = body.as_ref() {
            req = req.body(body);
        }
        self.execute(&req).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None, &[]).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        self.request(Method::GET, path, None, query).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.request(Method::POST, path, Some(body), &[]).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.request(Method::PUT, path, Some(body), &[]).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.request(Method::PATCH, path, Some(body), &[]).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::DELETE, path, None, &[]).await
    }

    /// 请求管道：发送，401 时刷新并最多重发一次
    pub(crate) async fn execute<T: DeserializeOwned>(&self, req: &OutboundRequest<'_>) -> Result<T> {
        let mut access = self.credentials.access_token();
        let mut attempt = Attempt::Initial;

        loop {
            let result = self.send_once(req, access.as_deref(), attempt).await;
            match result {
                Err(ClientError::Unauthorized { .. })
                    if req.refresh_on_unauthorized && attempt.may_refresh() =>
                {
                    debug!(
                        method = %req.method,
                        path = req.path,
                        "Access token rejected, refreshing session"
                    );
                    let refreshed = self.refresh_session(access.as_deref()).await?;
                    access = Some(refreshed);
                    attempt = Attempt::Resubmit;
                }
                result => return result,
            }
        }
    }

    /// 发送一次请求，不做任何重试
    pub(crate) async fn send_once<T: DeserializeOwned>(
        &self,
        req: &OutboundRequest<'_>,
        access_token: Option<&str>,
        attempt: Attempt,
    ) -> Result<T> {
        let url = self.endpoint(req.path, req.query)?;
        let request_id = Uuid::new_v4().to_string();

        let mut builder = self
            .http
            .request(req.method.clone(), url)
            .header(REQUEST_ID_HEADER, &request_id);

        if let Some(token) = access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = req.body {
            builder = builder.json(body);
        }

        debug!(
            method = %req.method,
            path = req.path,
            request_id = %request_id,
            attempt = attempt.as_str(),
            authenticated = access_token.is_some(),
            "Sending API request"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::from_transport(e, self.timeout_secs))?;

        let status = response.status();
        metrics::counter!(
            "api_client_requests_total",
            "method" => req.method.to_string(),
            "status" => status.as_u16().to_string()
        )
        .increment(1);

        let body = response
            .text()
            .await
            .map_err(|e| ClientError::from_transport(e, self.timeout_secs))?;

        if !status.is_success() {
            debug!(
                status = status.as_u16(),
                request_id = %request_id,
                body = %sanitize::summarize(&body, LOG_BODY_LIMIT),
                "API request failed"
            );
            return Err(ClientError::from_response(status.as_u16(), &body));
        }

        decode_envelope(&body)
    }

    /// 拼接完整 URL 并附加查询参数
    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        let mut url = Url::parse(&format!("{}{}", self.api_root, path))
            .map_err(|e| ClientError::Config(format!("Invalid request path '{}': {}", path, e)))?;

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }
}

/// 解析成功响应的信封
fn decode_envelope<T: DeserializeOwned>(body: &str) -> Result<T> {
    // 204 等空响应视为无数据的成功
    let envelope: ApiEnvelope<Value> = if body.trim().is_empty() {
        ApiEnvelope {
            success: true,
            data: None,
            error: None,
        }
    } else {
        serde_json::from_str(body).map_err(|e| {
            ClientError::decode(format!(
                "expected API envelope ({}): {}",
                e,
                sanitize::summarize(body, LOG_BODY_LIMIT)
            ))
        })?
    };

    if !envelope.success {
        warn!(error = envelope.error_message(), "API returned success=false");
        return Err(ClientError::Rejected { envelope });
    }

    serde_json::from_value(envelope.data.unwrap_or(Value::Null)).map_err(ClientError::decode)
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("api_root", &self.api_root)
            .field("timeout_secs", &self.timeout_secs)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// ApiClient 构建器
pub struct ApiClientBuilder {
    base_url: Option<String>,
    prefix: String,
    timeout: Duration,
    login_path: String,
    user_agent: Option<String>,
    credentials: Option<Arc<CredentialStore>>,
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        let defaults = ApiConfig::default();
        let timeout = defaults.timeout();
        Self {
            base_url: None,
            prefix: defaults.prefix,
            timeout,
            login_path: defaults.login_path,
            user_agent: None,
            credentials: None,
        }
    }
}

impl ApiClientBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// 版本前缀，默认 `/api/v1`
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// 注入凭证存储，默认使用纯内存存储
    pub fn credentials(mut self, store: Arc<CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Config("base_url is required".into()))?;

        Url::parse(&base_url)
            .map_err(|e| ClientError::Config(format!("Invalid base_url '{}': {}", base_url, e)))?;

        let api_root = format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            self.prefix.trim_end_matches('/')
        );

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("carwash-client/{}", env!("CARGO_PKG_VERSION")));

        let http = Client::builder()
            .timeout(self.timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ApiClient {
            http,
            api_root,
            timeout_secs: self.timeout.as_secs(),
            login_path: self.login_path,
            credentials: self
                .credentials
                .unwrap_or_else(|| Arc::new(CredentialStore::in_memory())),
            refresh_lock: Arc::new(TokioMutex::new(())),
            events: SessionEvents::default(),
        })
    }
}
