//! 测试公共模块
//! 进程内的桩后端：实现登录、刷新（令牌轮换）、登出以及几个受保护的资源

#![allow(dead_code)]

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use carwash_client::{ApiClient, CredentialStore};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_USERNAME: &str = "cashier";
pub const TEST_PASSWORD: &str = "Wash2024!";

/// 桩后端状态
#[derive(Default)]
pub struct StubState {
    issued: AtomicUsize,
    valid_access: Mutex<HashSet<String>>,
    valid_refresh: Mutex<HashSet<String>>,
    /// 刷新接口被调用的次数
    pub refresh_calls: AtomicUsize,
    /// 刷新接口是否一律拒绝
    refresh_disabled: Mutex<bool>,
    /// 刷新接口响应前的延迟
    refresh_delay: Mutex<Option<Duration>>,
    /// 受保护资源收到的 Authorization 头（按到达顺序）
    seen_auth: Mutex<Vec<(String, Option<String>)>>,
}

impl StubState {
    /// 签发新的令牌对：A{n} / R{n}
    pub fn issue_pair(&self) -> (String, String) {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("A{}", n);
        let refresh = format!("R{}", n);
        self.valid_access.lock().unwrap().insert(access.clone());
        self.valid_refresh.lock().unwrap().insert(refresh.clone());
        (access, refresh)
    }

    /// 让访问令牌过期
    pub fn expire_access(&self, access: &str) {
        self.valid_access.lock().unwrap().remove(access);
    }

    /// 吊销刷新令牌
    pub fn revoke_refresh(&self, refresh: &str) {
        self.valid_refresh.lock().unwrap().remove(refresh);
    }

    pub fn is_refresh_valid(&self, refresh: &str) -> bool {
        self.valid_refresh.lock().unwrap().contains(refresh)
    }

    pub fn disable_refresh(&self) {
        *self.refresh_disabled.lock().unwrap() = true;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// 指定路径收到的 Authorization 头
    pub fn auth_headers_for(&self, path: &str) -> Vec<Option<String>> {
        self.seen_auth
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, auth)| auth.clone())
            .collect()
    }

    fn record(&self, path: &str, headers: &HeaderMap) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        self.seen_auth.lock().unwrap().push((path.to_string(), auth));
    }

    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| self.valid_access.lock().unwrap().contains(token))
            .unwrap_or(false)
    }
}

type StubResponse = (StatusCode, Json<Value>);

fn unauthorized(message: &str) -> StubResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"success": false, "error": message})),
    )
}

fn ok(data: Value) -> StubResponse {
    (StatusCode::OK, Json(json!({"success": true, "data": data})))
}

async fn login(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> StubResponse {
    if body["username"] != TEST_USERNAME || body["password"] != TEST_PASSWORD {
        return unauthorized("Invalid username or password");
    }

    let (access, refresh) = state.issue_pair();
    ok(json!({
        "user": {"id": 1, "username": TEST_USERNAME, "role": "cashier"},
        "tokens": {"accessToken": access, "refreshToken": refresh}
    }))
}

async fn refresh(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> StubResponse {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);

    let delay = *state.refresh_delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    if *state.refresh_disabled.lock().unwrap() {
        return unauthorized("Refresh token expired");
    }

    let Some(token) = body["refreshToken"].as_str() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "refreshToken is required"})),
        );
    };

    // 轮换：旧刷新令牌只能使用一次
    if !state.valid_refresh.lock().unwrap().remove(token) {
        return unauthorized("Invalid refresh token");
    }

    let (access, refresh) = state.issue_pair();
    ok(json!({"tokens": {"accessToken": access, "refreshToken": refresh}}))
}

async fn logout(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> StubResponse {
    if let Some(token) = body["refreshToken"].as_str() {
        state.revoke_refresh(token);
    }
    ok(json!({"message": "Logged out"}))
}

async fn me(State(state): State<Arc<StubState>>, headers: HeaderMap) -> StubResponse {
    state.record("/auth/me", &headers);
    if !state.is_authorized(&headers) {
        return unauthorized("Token expired");
    }
    ok(json!({"id": 1, "username": TEST_USERNAME, "role": "cashier"}))
}

async fn get_job(
    State(state): State<Arc<StubState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> StubResponse {
    state.record("/jobs", &headers);
    if !state.is_authorized(&headers) {
        return unauthorized("Token expired");
    }
    if id == 404 {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "Job not found"})),
        );
    }
    ok(json!({"id": id, "plate": "KDA 512Q", "service": "full-wash", "status": "washing"}))
}

/// 无论令牌如何都返回 401
async fn always_unauthorized(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
) -> StubResponse {
    state.record("/reports/locked", &headers);
    unauthorized("Token expired")
}

/// 运行中的桩后端
pub struct StubBackend {
    pub addr: SocketAddr,
    pub state: Arc<StubState>,
}

impl StubBackend {
    pub async fn start() -> Self {
        let state = Arc::new(StubState::default());

        let api = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/auth/logout", post(logout))
            .route("/auth/me", get(me))
            .route("/jobs/{id}", get(get_job))
            .route("/reports/locked", get(always_unauthorized));

        let app = Router::new().nest("/api/v1", api).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stub backend");
        let addr = listener.local_addr().expect("Failed to read local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Stub backend crashed");
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// 使用给定凭证存储创建客户端
    pub fn client_with(&self, credentials: Arc<CredentialStore>) -> ApiClient {
        ApiClient::builder()
            .base_url(self.base_url())
            .timeout(Duration::from_secs(5))
            .credentials(credentials)
            .build()
            .expect("Failed to build client")
    }

    /// 使用内存凭证存储创建客户端
    pub fn client(&self) -> ApiClient {
        self.client_with(Arc::new(CredentialStore::in_memory()))
    }
}
