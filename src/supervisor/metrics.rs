//! 实时指标采样
//!
//! CPU 使用率没有现成计数器，必须在一个时间窗口内取两次累计 CPU 时间求差:
//!
//! ```text
//! cpu% = (t1 - t0) / (dt * ncpus * 1e9) * 100
//! ```
//!
//! 基准读数带缓存 (见 [`crate::cache`])，有效期内的重复查询无需阻塞等待。

use std::time::Instant;

use tracing::{debug, warn};
use virt::sys;

use super::{domain_config, state_from_code, VmSupervisor};
use crate::error::{Error, Result};
use crate::models::{DiskIoStats, NetIoStats, VmMetrics};

impl VmSupervisor {
    /// 采样单台虚拟机的实时指标
    ///
    /// 未运行的虚拟机直接返回全零样本，不报错。
    /// 冷采样会阻塞约一个采样窗口 (默认 1 秒)。
    pub async fn vm_metrics(&self, name: &str) -> Result<VmMetrics> {
        let conn = self.connect()?;
        let domain = Self::resolve(&conn, name)?;

        if !domain.is_active().unwrap_or(false) {
            debug!("虚拟机 {} 未运行, 返回全零指标", name);
            return Ok(VmMetrics::stopped(name));
        }

        let info = domain
            .get_info()
            .map_err(|e| Error::operation(name, format!("获取域信息失败: {}", e)))?;
        let config = domain_config(&domain)?;

        // CPU: 优先用缓存基准点, 否则冷采样 (阻塞一个窗口)
        let (t0_ns, t0_at, t1_ns, t1_at) = match self.cpu_cache().fresh(name).await {
            Some(baseline) => (
                baseline.cpu_time_ns,
                baseline.taken_at,
                info.cpu_time,
                Instant::now(),
            ),
            None => {
                let t0_ns = info.cpu_time;
                let t0_at = Instant::now();
                tokio::time::sleep(self.config().cpu_sample_window()).await;
                let second = domain
                    .get_info()
                    .map_err(|e| Error::operation(name, format!("获取域信息失败: {}", e)))?;
                (t0_ns, t0_at, second.cpu_time, Instant::now())
            }
        };

        let dt = t1_at.duration_since(t0_at).as_secs_f64();
        let cpu_percent = cpu_percent_from_samples(t0_ns, t1_ns, dt, info.nr_virt_cpu);
        self.cpu_cache().store(name, t1_ns, t1_at).await;

        // 内存: memory_stats 的 RSS 比 get_info 的粗粒度计数器更准
        let used_kib = memory_used_kib(&domain, info.memory);
        let total_kib = if config.memory_kib > 0 {
            config.memory_kib
        } else {
            info.max_mem
        };
        let memory_percent = if total_kib > 0 {
            round2(((used_kib as f64 / total_kib as f64) * 100.0).clamp(0.0, 100.0))
        } else {
            0.0
        };

        // 每个设备独立读取, 单个失败只丢该设备
        let mut disk_io = Vec::with_capacity(config.disks.len());
        for disk in &config.disks {
            match domain.get_block_stats(&disk.device) {
                Ok(stats) => disk_io.push(DiskIoStats {
                    device: disk.device.clone(),
                    read_bytes: stats.rd_bytes,
                    write_bytes: stats.wr_bytes,
                    read_requests: stats.rd_req,
                    write_requests: stats.wr_req,
                    errors: stats.errs,
                }),
                Err(e) => warn!("读取磁盘 {} I/O 统计失败: {}", disk.device, e),
            }
        }

        let mut network_io = Vec::with_capacity(config.interfaces.len());
        for iface in &config.interfaces {
            match domain.interface_stats(iface) {
                Ok(stats) => network_io.push(NetIoStats {
                    interface: iface.clone(),
                    rx_bytes: stats.rx_bytes,
                    rx_packets: stats.rx_packets,
                    rx_errors: stats.rx_errs,
                    rx_drops: stats.rx_drop,
                    tx_bytes: stats.tx_bytes,
                    tx_packets: stats.tx_packets,
                    tx_errors: stats.tx_errs,
                    tx_drops: stats.tx_drop,
                }),
                Err(e) => warn!("读取接口 {} 统计失败: {}", iface, e),
            }
        }

        let vcpus = if config.vcpus > 0 {
            config.vcpus
        } else {
            info.nr_virt_cpu
        };

        Ok(VmMetrics {
            name: name.to_string(),
            state: state_from_code(info.state),
            cpu_percent,
            vcpus,
            memory_percent,
            memory_used_mb: used_kib / 1024,
            memory_total_mb: total_kib / 1024,
            disk_io,
            network_io,
            sampled_at: chrono::Utc::now(),
            message: None,
        })
    }
}

/// 当前使用内存 (KiB)，RSS 优先，拿不到退回 get_info 的计数器
fn memory_used_kib(domain: &virt::domain::Domain, fallback_kib: u64) -> u64 {
    match domain.memory_stats(0) {
        Ok(stats) => stats
            .iter()
            .find(|s| s.tag as u32 == sys::VIR_DOMAIN_MEMORY_STAT_RSS as u32)
            .map(|s| s.val)
            .unwrap_or(fallback_kib),
        Err(e) => {
            debug!("memory_stats 不可用, 退回粗粒度计数器: {}", e);
            fallback_kib
        }
    }
}

/// 两次累计 CPU 时间读数 → 使用率百分比
///
/// 结果恒在 [0, 100]，保留两位小数。dt 非正或读数回退 (如域重启) 时返回 0。
pub(crate) fn cpu_percent_from_samples(t0_ns: u64, t1_ns: u64, dt_secs: f64, ncpus: u32) -> f64 {
    if dt_secs <= 0.0 {
        return 0.0;
    }
    let ncpus = ncpus.max(1) as f64;
    let delta = t1_ns as f64 - t0_ns as f64;
    let percent = delta / (dt_secs * ncpus * 1_000_000_000.0) * 100.0;
    round2(percent.clamp(0.0, 100.0))
}

/// 四舍五入到两位小数
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_percent_half_load() {
        // 2 vCPU, 2 秒窗口内消耗 2 秒 CPU 时间 → 50%
        let percent = cpu_percent_from_samples(0, 2_000_000_000, 2.0, 2);
        assert_eq!(percent, 50.0);
    }

    #[test]
    fn test_cpu_percent_clamped_to_100() {
        // 计数器抖动导致超出理论上限
        let percent = cpu_percent_from_samples(0, 10_000_000_000, 1.0, 1);
        assert_eq!(percent, 100.0);
    }

    #[test]
    fn test_cpu_percent_counter_went_backwards() {
        // 域重启后累计时间回退, 负差值夹到 0
        let percent = cpu_percent_from_samples(5_000_000_000, 1_000_000_000, 1.0, 2);
        assert_eq!(percent, 0.0);
    }

    #[test]
    fn test_cpu_percent_zero_window() {
        assert_eq!(cpu_percent_from_samples(0, 1_000_000_000, 0.0, 1), 0.0);
        assert_eq!(cpu_percent_from_samples(0, 1_000_000_000, -1.0, 1), 0.0);
    }

    #[test]
    fn test_cpu_percent_zero_vcpus_treated_as_one() {
        let with_zero = cpu_percent_from_samples(0, 500_000_000, 1.0, 0);
        let with_one = cpu_percent_from_samples(0, 500_000_000, 1.0, 1);
        assert_eq!(with_zero, with_one);
        assert_eq!(with_one, 50.0);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(33.333333), 33.33);
        assert_eq!(round2(66.666666), 66.67);
        assert_eq!(round2(0.0), 0.0);
    }
}
