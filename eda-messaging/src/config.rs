//! 运行配置
//!
//! 启动时先加载 `.env.{ENVIRONMENT}` 与 `.env`（已存在的环境变量优先），
//! 再从环境变量读取。时长支持 `500ms`、`30s`、`2m`、`1h`，以及 `1m30s`
//! 这样的组合写法。
//!
use crate::error::{MessagingError, MessagingResult};
use crate::requester::DEFAULT_REQUEST_TIMEOUT;
use bon::Builder;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_LOG_LEVEL: &str = "DEBUG";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RPC_HOST: &str = "0.0.0.0";
pub const DEFAULT_RPC_PORT: &str = ":9000";
pub const DEFAULT_NATS_STREAM: &str = "mallbots";

/// 服务地址配置
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct RpcConfig {
    #[builder(default = DEFAULT_RPC_HOST.to_string(), into)]
    host: String,
    #[builder(default = DEFAULT_RPC_PORT.to_string(), into)]
    port: String,
    /// 服务名（大写）到地址
    #[builder(default)]
    services: HashMap<String, String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RpcConfig {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// 监听地址：主机与端口直接拼接（端口自带冒号）
    pub fn address(&self) -> String {
        format!("{}{}", self.host, self.port)
    }

    /// 指定服务的地址，未配置时回落到本服务地址
    pub fn service(&self, name: &str) -> String {
        self.services
            .get(&name.to_uppercase())
            .cloned()
            .unwrap_or_else(|| self.address())
    }
}

/// 消息中间件配置
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct NatsConfig {
    #[builder(into)]
    url: Option<String>,
    #[builder(default = DEFAULT_NATS_STREAM.to_string(), into)]
    stream: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl NatsConfig {
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct AppConfig {
    #[builder(default, into)]
    environment: String,
    #[builder(default = DEFAULT_LOG_LEVEL.to_string(), into)]
    log_level: String,
    #[builder(default = DEFAULT_SHUTDOWN_TIMEOUT)]
    shutdown_timeout: Duration,
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    request_timeout: Duration,
    #[builder(default)]
    rpc: RpcConfig,
    #[builder(default)]
    nats: NatsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AppConfig {
    /// 加载 `.env` 文件后从进程环境变量读取
    pub fn from_env() -> MessagingResult<Self> {
        if let Ok(environment) = std::env::var("ENVIRONMENT") {
            dotenvy::from_filename(format!(".env.{}", environment.to_lowercase())).ok();
        }
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源读取；空值按未设置处理
    pub fn from_lookup<F>(lookup: F) -> MessagingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let duration = |key: &str, default: Duration| {
            get(key).map_or(Ok(default), |value| parse_duration(key, &value))
        };

        let services = match get("RPC_SERVICES") {
            Some(value) => parse_services(&value)?,
            None => HashMap::new(),
        };

        Ok(Self {
            environment: get("ENVIRONMENT").unwrap_or_default(),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            shutdown_timeout: duration("SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT)?,
            request_timeout: duration("REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT)?,
            rpc: RpcConfig {
                host: get("RPC_HOST").unwrap_or_else(|| DEFAULT_RPC_HOST.to_string()),
                port: get("RPC_PORT").unwrap_or_else(|| DEFAULT_RPC_PORT.to_string()),
                services,
            },
            nats: NatsConfig {
                url: get("NATS_URL"),
                stream: get("NATS_STREAM").unwrap_or_else(|| DEFAULT_NATS_STREAM.to_string()),
            },
        })
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// `tracing_subscriber::EnvFilter` 可用的日志指令
    pub fn log_directive(&self) -> String {
        self.log_level.to_lowercase()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn rpc(&self) -> &RpcConfig {
        &self.rpc
    }

    pub fn nats(&self) -> &NatsConfig {
        &self.nats
    }
}

/// 解析 `500ms`、`30s`、`1m30s` 形式的时长
pub fn parse_duration(key: &str, value: &str) -> MessagingResult<Duration> {
    let invalid = |reason: &str| MessagingError::Config {
        key: key.to_string(),
        reason: format!("{reason}: {value:?}"),
    };

    let mut rest = value.trim();
    if rest.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| invalid("missing unit"))?;
        if digits == 0 {
            return Err(invalid("expected a number"));
        }
        let amount: u64 = rest[..digits]
            .parse()
            .map_err(|_| invalid("number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount * 60),
            "h" => Duration::from_secs(amount * 60 * 60),
            _ => return Err(invalid("unknown unit")),
        };
        total += part;
        rest = &rest[unit_len..];
    }

    Ok(total)
}

/// 解析 `NAME=addr,...`，服务名统一转为大写
pub fn parse_services(value: &str) -> MessagingResult<HashMap<String, String>> {
    let mut services = HashMap::new();
    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((name, address)) = pair.split_once('=') else {
            return Err(MessagingError::Config {
                key: "RPC_SERVICES".to_string(),
                reason: format!("invalid service pair: {pair:?}"),
            });
        };
        if address.contains('=') {
            return Err(MessagingError::Config {
                key: "RPC_SERVICES".to_string(),
                reason: format!("invalid service pair: {pair:?}"),
            });
        }
        services.insert(name.trim().to_uppercase(), address.trim().to_string());
    }
    Ok(services)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let pairs: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| pairs.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, AppConfig::default());
        assert_eq!(config.log_level(), "DEBUG");
        assert_eq!(config.log_directive(), "debug");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.rpc().address(), "0.0.0.0:9000");
        assert_eq!(config.nats().stream(), "mallbots");
        assert_eq!(config.nats().url(), None);
    }

    #[test]
    fn reads_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("ENVIRONMENT", "test"),
            ("LOG_LEVEL", "INFO"),
            ("SHUTDOWN_TIMEOUT", "1m30s"),
            ("REQUEST_TIMEOUT", "250ms"),
            ("RPC_HOST", "127.0.0.1"),
            ("RPC_PORT", ":8085"),
            ("RPC_SERVICES", "stores=stores:9000, payments=payments:9000"),
            ("NATS_URL", "nats:4222"),
        ]))
        .unwrap();

        assert_eq!(config.environment(), "test");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(90));
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.rpc().address(), "127.0.0.1:8085");
        assert_eq!(config.rpc().service("payments"), "payments:9000");
        assert_eq!(config.rpc().service("STORES"), "stores:9000");
        assert_eq!(config.rpc().service("customers"), "127.0.0.1:8085");
        assert_eq!(config.nats().url(), Some("nats:4222"));
    }

    #[test]
    fn rejects_malformed_values() {
        for bad in ["", "30", "s", "5d", "1.5s"] {
            assert!(parse_duration("X", bad).is_err(), "{bad:?}");
        }
        assert!(matches!(
            parse_services("stores"),
            Err(MessagingError::Config { .. })
        ));
        assert!(parse_services("a=b=c").is_err());
        assert!(parse_services(" , ").unwrap().is_empty());

        let err = AppConfig::from_lookup(lookup(&[("SHUTDOWN_TIMEOUT", "soon")])).unwrap_err();
        assert!(matches!(err, MessagingError::Config { key, .. } if key == "SHUTDOWN_TIMEOUT"));
    }
}
