//! 监控器配置
//!
//! 支持从环境变量覆盖默认值:
//! - `LIBVIRT_URI` — libvirt 连接 URI (默认 qemu:///system)

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

fn default_uri() -> String {
    "qemu:///system".to_string()
}

fn default_cpu_cache_ttl_secs() -> u64 {
    5
}

fn default_cpu_sample_window_ms() -> u64 {
    1000
}

/// 监控器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// libvirt 连接 URI (本地 KVM 默认 qemu:///system)
    #[serde(default = "default_uri")]
    pub uri: String,

    /// CPU 采样缓存有效期 (秒)，缓存内的基准点可复用，避免每次阻塞采样
    #[serde(default = "default_cpu_cache_ttl_secs")]
    pub cpu_cache_ttl_secs: u64,

    /// 冷采样的阻塞窗口 (毫秒)，两次 CPU 时间读取之间的间隔
    #[serde(default = "default_cpu_sample_window_ms")]
    pub cpu_sample_window_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            cpu_cache_ttl_secs: default_cpu_cache_ttl_secs(),
            cpu_sample_window_ms: default_cpu_sample_window_ms(),
        }
    }
}

impl SupervisorConfig {
    /// 加载配置: 默认值 + 环境变量覆盖
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(uri) = env::var("LIBVIRT_URI") {
            if !uri.is_empty() {
                config.uri = uri;
            }
        }
        config
    }

    pub fn cpu_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cpu_cache_ttl_secs)
    }

    pub fn cpu_sample_window(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();
        assert_eq!(config.uri, "qemu:///system");
        assert_eq!(config.cpu_cache_ttl(), Duration::from_secs(5));
        assert_eq!(config.cpu_sample_window(), Duration::from_millis(1000));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SupervisorConfig =
            serde_json::from_str(r#"{"uri": "qemu+ssh://root@host/system"}"#).unwrap();
        assert_eq!(config.uri, "qemu+ssh://root@host/system");
        assert_eq!(config.cpu_cache_ttl_secs, 5);
    }
}
