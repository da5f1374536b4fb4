//! 虚拟机监控器
//!
//! 所有操作都是短生命周期的: 打开连接、查询/变更、关闭连接。
//! 不维护连接池，也不缓存任何虚拟机状态 (CPU 采样基准除外)。

mod fleet;
mod lifecycle;
mod metrics;
mod resources;
mod snapshot;

use std::ops::Deref;

use tracing::{debug, error, info, warn};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::storage_vol::StorageVol;
use virt::sys;

use crate::cache::CpuSampleCache;
use crate::config::SupervisorConfig;
use crate::error::{Error, Result};
use crate::models::{DiskInfo, VmDetails, VmInfo, VmState};
use crate::xml::{self, DomainConfig};

/// 连接守卫，离开作用域时关闭连接
///
/// 任何退出路径 (成功、未找到、操作失败) 都会释放连接。
pub(crate) struct ConnGuard {
    conn: Connect,
}

impl ConnGuard {
    fn open(uri: &str) -> Result<Self> {
        debug!("连接 libvirt: {}", uri);
        let conn = Connect::open(Some(uri)).map_err(|e| {
            error!("连接 libvirt 失败 ({}): {}", uri, e);
            Error::Connection(e.to_string())
        })?;
        Ok(Self { conn })
    }
}

impl Deref for ConnGuard {
    type Target = Connect;

    fn deref(&self) -> &Connect {
        &self.conn
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if let Err(e) = self.conn.close() {
            error!("关闭 libvirt 连接失败: {}", e);
        }
    }
}

/// 虚拟机监控器
///
/// 每个逻辑操作独占一条 libvirt 连接；唯一的共享可变状态是 CPU 采样缓存。
pub struct VmSupervisor {
    config: SupervisorConfig,
    cpu_cache: CpuSampleCache,
}

impl VmSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let cpu_cache = CpuSampleCache::new(config.cpu_cache_ttl());
        Self { config, cpu_cache }
    }

    /// 从环境变量构造 (LIBVIRT_URI 覆盖默认 URI)
    pub fn from_env() -> Self {
        Self::new(SupervisorConfig::from_env())
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub(crate) fn connect(&self) -> Result<ConnGuard> {
        ConnGuard::open(&self.config.uri)
    }

    pub(crate) fn cpu_cache(&self) -> &CpuSampleCache {
        &self.cpu_cache
    }

    /// 按名称解析虚拟机，找不到统一报 VmNotFound
    pub(crate) fn resolve(conn: &Connect, name: &str) -> Result<Domain> {
        Domain::lookup_by_name(conn, name).map_err(|e| {
            debug!("查找虚拟机 {} 失败: {}", name, e);
            Error::VmNotFound(name.to_string())
        })
    }

    /// 探测 libvirt 可用性 (打开并立即关闭一条连接)
    pub async fn health_check(&self) -> Result<()> {
        let conn = self.connect()?;
        let version = conn
            .get_lib_version()
            .map_err(|e| Error::Connection(e.to_string()))?;
        info!("libvirt 可用, 库版本 {}", format_version(version as u64));
        Ok(())
    }

    /// 查询单台虚拟机的基本信息
    pub async fn vm_info(&self, name: &str) -> Result<VmInfo> {
        let conn = self.connect()?;
        let domain = Self::resolve(&conn, name)?;
        build_vm_info(&domain)
    }

    /// 查询单台虚拟机的详情 (基本信息 + 配置信息)
    pub async fn vm_details(&self, name: &str) -> Result<VmDetails> {
        let conn = self.connect()?;
        let domain = Self::resolve(&conn, name)?;

        let info = build_vm_info(&domain)?;
        let config = domain_config(&domain)?;
        let is_active = info.is_active;

        let disks = config
            .disks
            .iter()
            .map(|d| describe_disk(&conn, &domain, is_active, &d.device, d.path.as_deref()))
            .collect();

        Ok(VmDetails {
            info,
            is_persistent: domain.is_persistent().unwrap_or(false),
            autostart: domain.get_autostart().ok(),
            disks,
            network_interfaces: config.interfaces,
            os_type: config.os_type,
            vnc_port: config.vnc_port,
        })
    }
}

/// libvirt 域状态码 → 状态枚举。未识别的状态码落到 Unknown，永不失败
pub(crate) fn state_from_code(code: u32) -> VmState {
    match code {
        sys::VIR_DOMAIN_NOSTATE => VmState::NoState,
        sys::VIR_DOMAIN_RUNNING => VmState::Running,
        sys::VIR_DOMAIN_BLOCKED => VmState::Blocked,
        sys::VIR_DOMAIN_PAUSED => VmState::Paused,
        sys::VIR_DOMAIN_SHUTDOWN => VmState::Shutdown,
        sys::VIR_DOMAIN_SHUTOFF => VmState::Stopped,
        sys::VIR_DOMAIN_CRASHED => VmState::Crashed,
        sys::VIR_DOMAIN_PMSUSPENDED => VmState::Suspended,
        _ => VmState::Unknown,
    }
}

/// 解析域的当前 XML 配置
pub(crate) fn domain_config(domain: &Domain) -> Result<DomainConfig> {
    let name = domain.get_name().unwrap_or_default();
    let desc = domain
        .get_xml_desc(0)
        .map_err(|e| Error::operation(&name, format!("获取域 XML 失败: {}", e)))?;
    xml::parse_domain_xml(&desc)
}

/// 组装基本信息: 实时计数器 + XML 配置
///
/// vcpus / memory_mb 以 XML 为准 (XML 值为零时才退回计数器)。
/// uptime 由累计 CPU 时间折算，只是近似值。
pub(crate) fn build_vm_info(domain: &Domain) -> Result<VmInfo> {
    let name = domain.get_name().unwrap_or_default();
    let uuid = domain
        .get_uuid_string()
        .map_err(|e| Error::operation(&name, format!("获取 UUID 失败: {}", e)))?;
    let info = domain
        .get_info()
        .map_err(|e| Error::operation(&name, format!("获取域信息失败: {}", e)))?;
    let is_active = domain.is_active().unwrap_or(false);

    let config = domain_config(domain)?;
    let state = state_from_code(info.state);

    let vcpus = if config.vcpus > 0 {
        config.vcpus
    } else {
        info.nr_virt_cpu
    };
    let memory_mb = if config.memory_kib > 0 {
        config.memory_kib / 1024
    } else {
        info.max_mem / 1024
    };

    Ok(VmInfo {
        name,
        uuid,
        state,
        vcpus,
        memory_mb,
        used_memory_mb: info.memory / 1024,
        uptime_seconds: uptime_from_cpu_time(state, info.cpu_time),
        is_active,
    })
}

/// 累计 CPU 时间 → 估算运行时长 (秒)
///
/// 只对运行中且计数器已走动的域给出估值；刚启动计数器还是 0 时
/// 不给出 0 秒的假值。
fn uptime_from_cpu_time(state: VmState, cpu_time_ns: u64) -> Option<u64> {
    if state == VmState::Running && cpu_time_ns > 0 {
        Some(cpu_time_ns / 1_000_000_000)
    } else {
        None
    }
}

/// 补全磁盘容量信息
///
/// 运行中的域直接问 hypervisor；停止的域退回存储卷查询。
/// 两条路径都是尽力而为，失败记日志并置零。
fn describe_disk(
    conn: &Connect,
    domain: &Domain,
    is_active: bool,
    device: &str,
    path: Option<&str>,
) -> DiskInfo {
    let mut disk = DiskInfo {
        device: device.to_string(),
        path: path.map(str::to_string),
        capacity_bytes: 0,
        allocation_bytes: 0,
    };

    if is_active {
        match domain.get_block_info(device, 0) {
            Ok(block) => {
                disk.capacity_bytes = block.capacity;
                disk.allocation_bytes = block.allocation;
            }
            Err(e) => warn!("读取磁盘 {} 容量失败: {}", device, e),
        }
    } else if let Some(path) = path {
        match StorageVol::lookup_by_path(conn, path).and_then(|vol| vol.get_info()) {
            Ok(vol_info) => {
                disk.capacity_bytes = vol_info.capacity;
                disk.allocation_bytes = vol_info.allocation;
            }
            Err(e) => debug!("存储卷查询失败 ({}): {}", path, e),
        }
    }

    disk
}

/// libvirt 打包版本号 → "major.minor.patch"
pub(crate) fn format_version(version: u64) -> String {
    let major = version / 1_000_000;
    let minor = (version % 1_000_000) / 1_000;
    let patch = version % 1_000;
    format!("{}.{}.{}", major, minor, patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping_is_total() {
        assert_eq!(state_from_code(sys::VIR_DOMAIN_NOSTATE), VmState::NoState);
        assert_eq!(state_from_code(sys::VIR_DOMAIN_RUNNING), VmState::Running);
        assert_eq!(state_from_code(sys::VIR_DOMAIN_BLOCKED), VmState::Blocked);
        assert_eq!(state_from_code(sys::VIR_DOMAIN_PAUSED), VmState::Paused);
        assert_eq!(state_from_code(sys::VIR_DOMAIN_SHUTDOWN), VmState::Shutdown);
        assert_eq!(state_from_code(sys::VIR_DOMAIN_SHUTOFF), VmState::Stopped);
        assert_eq!(state_from_code(sys::VIR_DOMAIN_CRASHED), VmState::Crashed);
        assert_eq!(
            state_from_code(sys::VIR_DOMAIN_PMSUSPENDED),
            VmState::Suspended
        );
        // 未来新增的状态码不会让映射失败
        for code in 8..64 {
            assert_eq!(state_from_code(code), VmState::Unknown);
        }
    }

    #[test]
    fn test_uptime_requires_running_and_nonzero_counter() {
        assert_eq!(
            uptime_from_cpu_time(VmState::Running, 90_000_000_000),
            Some(90)
        );
        // 刚启动计数器未走动, 不报 0 秒
        assert_eq!(uptime_from_cpu_time(VmState::Running, 0), None);
        assert_eq!(uptime_from_cpu_time(VmState::Stopped, 90_000_000_000), None);
        assert_eq!(uptime_from_cpu_time(VmState::Paused, 90_000_000_000), None);
    }

    #[test]
    fn test_format_version() {
        assert_eq!(format_version(9_003_000), "9.3.0");
        assert_eq!(format_version(1_002_003), "1.2.3");
        assert_eq!(format_version(0), "0.0.0");
    }

    #[test]
    #[ignore] // 需要实际的 libvirt 环境才能运行
    fn test_health_check_against_local_libvirt() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let supervisor = VmSupervisor::from_env();
        rt.block_on(supervisor.health_check()).unwrap();
    }
}
