//! CPU 采样缓存
//!
//! CPU 使用率需要两次 cpu_time 读数求差。冷采样要阻塞约一秒，
//! 缓存最近一次读数作为基准点，有效期内的重复查询可以立即返回。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

/// 某台虚拟机的一次 CPU 时间读数
#[derive(Debug, Clone, Copy)]
pub struct CpuSample {
    /// 累计 CPU 时间 (纳秒)
    pub cpu_time_ns: u64,

    /// 读数时刻
    pub taken_at: Instant,
}

/// 按虚拟机名称缓存 CPU 读数
///
/// 整个监控器共享一份，互斥锁保证同名条目的读写原子性。
/// 条目只增不清理——虚拟机数量有限，不值得做过期回收。
pub struct CpuSampleCache {
    ttl: Duration,
    samples: Mutex<HashMap<String, CpuSample>>,
}

impl CpuSampleCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// 取出仍在有效期内的基准读数，过期或不存在返回 None
    pub async fn fresh(&self, name: &str) -> Option<CpuSample> {
        let samples = self.samples.lock().await;
        let sample = samples.get(name)?;
        if sample.taken_at.elapsed() < self.ttl {
            debug!("复用缓存的 CPU 基准读数: {}", name);
            Some(*sample)
        } else {
            None
        }
    }

    /// 写入最新读数 (无条件覆盖，下一次查询以此为基准)
    pub async fn store(&self, name: &str, cpu_time_ns: u64, taken_at: Instant) {
        let mut samples = self.samples.lock().await;
        samples.insert(
            name.to_string(),
            CpuSample {
                cpu_time_ns,
                taken_at,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_sample_is_reused() {
        let cache = CpuSampleCache::new(Duration::from_secs(5));
        cache.store("web-01", 1_000_000_000, Instant::now()).await;

        let sample = cache.fresh("web-01").await.unwrap();
        assert_eq!(sample.cpu_time_ns, 1_000_000_000);
    }

    #[tokio::test]
    async fn test_expired_sample_is_ignored() {
        let cache = CpuSampleCache::new(Duration::from_secs(5));
        let old = Instant::now() - Duration::from_secs(6);
        cache.store("web-01", 1_000_000_000, old).await;

        assert!(cache.fresh("web-01").await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_vm_has_no_sample() {
        let cache = CpuSampleCache::new(Duration::from_secs(5));
        assert!(cache.fresh("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_store_overwrites_previous_sample() {
        let cache = CpuSampleCache::new(Duration::from_secs(5));
        cache.store("web-01", 1_000, Instant::now()).await;
        cache.store("web-01", 2_000, Instant::now()).await;

        let sample = cache.fresh("web-01").await.unwrap();
        assert_eq!(sample.cpu_time_ns, 2_000);
    }
}
