//! carwash 命令行入口
//! 登录、登出以及带认证的原始 API 调用

use anyhow::{bail, Context};
use carwash_client::{
    client::SessionEvent,
    config::ClientConfig,
    credentials::{CredentialStore, FileStore},
    telemetry, ApiClient,
};
use clap::{Parser, Subcommand};
use reqwest::Method;
use secrecy::{ExposeSecret, Secret};
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

#[derive(Debug, Parser)]
#[command(name = "carwash", version, about = "Car wash management API client")]
struct Cli {
    /// 覆盖后端地址（等价于 CARWASH_API__BASE_URL）
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 登录并保存令牌
    Login {
        #[arg(short, long)]
        username: String,
        /// 不提供时从标准输入读取
        #[arg(short, long, env = "CARWASH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// 登出并清除本地令牌
    Logout,
    /// 显示当前用户
    Whoami,
    /// 显示本地会话状态
    Status,
    /// 发送任意 API 请求，输出响应中的 data
    Request {
        /// HTTP 方法，例如 GET、POST
        method: String,
        /// 版本前缀之后的路径，例如 /jobs/42
        path: String,
        /// JSON 请求体
        #[arg(long)]
        body: Option<String>,
        /// 查询参数 key=value，可重复
        #[arg(long = "query", value_parser = parse_query_pair)]
        query: Vec<(String, String)>,
    },
}

fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载 .env 文件（开发环境）
    if let Ok(env) = std::env::var("CARWASH_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env().context("Failed to load configuration")?;
    if let Some(base_url) = cli.base_url.clone() {
        config.api.base_url = base_url;
        config.validate().context("Invalid --base-url")?;
    }

    telemetry::init_telemetry(&config.logging);

    let durable = Arc::new(FileStore::new(&config.storage.credentials_path));
    let credentials = Arc::new(CredentialStore::new(durable));
    let client = ApiClient::from_config(&config.api, credentials)?;

    let mut session_events = client.subscribe_session_events();
    let result = run(&client, &config, cli.command).await;

    // 会话失效时提示重新登录
    loop {
        match session_events.try_recv() {
            Ok(SessionEvent::Expired { reason, .. }) => {
                eprintln!("Session expired ({}). Run `carwash login` to sign in again.", reason);
            }
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }

    result
}

async fn run(client: &ApiClient, config: &ClientConfig, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Login { username, password } => {
            let password = match password {
                Some(p) => Secret::new(p),
                None => read_password()?,
            };

            let response = client
                .login(&username, password.expose_secret())
                .await
                .context("Login failed")?;
            println!("Logged in as {}", response.user.username);
        }
        Command::Logout => {
            client.logout().await?;
            println!("Logged out");
        }
        Command::Whoami => {
            let user = client.current_user().await.context("Failed to fetch current user")?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Command::Status => {
            println!("API:         {}", client.api_root());
            println!("Credentials: {}", config.storage.credentials_path.display());
            println!(
                "Session:     {}",
                if client.is_authenticated() {
                    "signed in"
                } else {
                    "signed out"
                }
            );
        }
        Command::Request {
            method,
            path,
            body,
            query,
        } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method '{}'", method))?;
            let body = body
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .context("--body is not valid JSON")?;
            let query: Vec<(&str, &str)> =
                query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

            match client.request::<Value>(method, &path, body, &query).await {
                Ok(data) => println!("{}", serde_json::to_string_pretty(&data)?),
                Err(e) => {
                    eprintln!("{}", serde_json::to_string_pretty(&e.envelope())?);
                    bail!(e);
                }
            }
        }
    }

    Ok(())
}

fn read_password() -> anyhow::Result<Secret<String>> {
    eprint!("Password: ");
    std::io::stderr().flush().ok();

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;

    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(Secret::new(password))
}
