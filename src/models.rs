//! 数据模型
//!
//! 所有对外模型均派生 serde，供上层传输层直接序列化。
//! 模型按需构建，不做本地持久化——每次查询都反映 libvirt 的实时状态。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 虚拟机状态
///
/// 与 libvirt 域状态码一一对应；未识别的状态码统一落到 [`VmState::Unknown`]，
/// 状态映射永远不会失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    NoState,
    Running,
    Blocked,
    Paused,
    Shutdown,
    Stopped,
    Crashed,
    Suspended,
    Unknown,
}

impl VmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmState::NoState => "no_state",
            VmState::Running => "running",
            VmState::Blocked => "blocked",
            VmState::Paused => "paused",
            VmState::Shutdown => "shutdown",
            VmState::Stopped => "stopped",
            VmState::Crashed => "crashed",
            VmState::Suspended => "suspended",
            VmState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 虚拟机基本信息 (列表视图)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    /// 虚拟机名称 (唯一键)
    pub name: String,

    /// UUID (重命名后仍然稳定)
    pub uuid: String,

    /// 当前状态
    pub state: VmState,

    /// vCPU 数量 (优先取 XML 配置值)
    pub vcpus: u32,

    /// 配置的内存上限 (MB)
    pub memory_mb: u64,

    /// 当前使用内存 (MB)
    pub used_memory_mb: u64,

    /// 估算运行时长 (秒)。由累计 CPU 时间折算，并非真实的墙钟开机时长；
    /// 精确值需要 libvirt 提供的其他来源 (如 guest agent)。
    pub uptime_seconds: Option<u64>,

    /// 是否处于活动状态
    pub is_active: bool,
}

/// 虚拟机详情 (在基本信息之上追加配置信息)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmDetails {
    #[serde(flatten)]
    pub info: VmInfo,

    /// 是否为持久化定义的域
    pub is_persistent: bool,

    /// 是否随宿主机自启 (查询失败时为 None)
    pub autostart: Option<bool>,

    /// 磁盘设备列表 (按 XML 中的顺序)
    pub disks: Vec<DiskInfo>,

    /// 网络接口设备名列表 (如 vnet0)
    pub network_interfaces: Vec<String>,

    /// 操作系统类型 (XML os/type 文本，通常为 hvm)
    pub os_type: String,

    /// VNC 端口 (未配置或 autoport 未分配时为 None)
    pub vnc_port: Option<u16>,
}

/// 磁盘设备信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
    /// 目标设备名 (如 vda)
    pub device: String,

    /// 后端文件路径
    pub path: Option<String>,

    /// 容量 (字节)，无法获取时为 0
    pub capacity_bytes: u64,

    /// 已分配 (字节)，无法获取时为 0
    pub allocation_bytes: u64,
}

/// 单个磁盘设备的 I/O 计数器 (单调递增)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskIoStats {
    pub device: String,
    pub read_bytes: i64,
    pub write_bytes: i64,
    pub read_requests: i64,
    pub write_requests: i64,
    pub errors: i64,
}

/// 单个网络接口的 I/O 计数器 (单调递增)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetIoStats {
    pub interface: String,
    pub rx_bytes: i64,
    pub rx_packets: i64,
    pub rx_errors: i64,
    pub rx_drops: i64,
    pub tx_bytes: i64,
    pub tx_packets: i64,
    pub tx_errors: i64,
    pub tx_drops: i64,
}

/// 虚拟机实时指标 (每次调用重新采样，不持久化)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmMetrics {
    pub name: String,

    pub state: VmState,

    /// CPU 使用率 (0-100，保留两位小数)
    pub cpu_percent: f64,

    pub vcpus: u32,

    /// 内存使用率 (0-100，保留两位小数)
    pub memory_percent: f64,

    pub memory_used_mb: u64,

    pub memory_total_mb: u64,

    pub disk_io: Vec<DiskIoStats>,

    pub network_io: Vec<NetIoStats>,

    /// 采样时间
    pub sampled_at: DateTime<Utc>,

    /// 附加说明 (虚拟机未运行时给出提示)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VmMetrics {
    /// 未运行虚拟机的全零指标
    pub fn stopped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: VmState::Stopped,
            cpu_percent: 0.0,
            vcpus: 0,
            memory_percent: 0.0,
            memory_used_mb: 0,
            memory_total_mb: 0,
            disk_io: Vec::new(),
            network_io: Vec::new(),
            sampled_at: Utc::now(),
            message: Some("指标仅在虚拟机运行时可用".to_string()),
        }
    }
}

/// 快照描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// 快照名称 (同一虚拟机内唯一)
    pub name: String,

    /// 创建时间 (unix 秒)
    pub creation_time: i64,

    /// 创建快照时的虚拟机状态 (如 running / shutoff)
    pub state: String,

    /// 是否为当前快照
    pub is_current: bool,
}

/// 生命周期操作结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Started,
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
    Restarted,
    RestartedHard,
}

/// 生命周期操作结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleOutcome {
    pub status: LifecycleStatus,
    pub name: String,
    pub message: String,
}

impl LifecycleOutcome {
    pub fn new(status: LifecycleStatus, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            name: name.into(),
            message: message.into(),
        }
    }
}

/// 资源调整结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUpdate {
    pub name: String,

    /// 目标 vCPU 数量
    pub vcpus: u32,

    /// 目标内存上限 (MB)
    pub memory_mb: u64,

    /// 运行中的虚拟机只更新持久化配置，需要重启才能生效
    pub restart_needed: bool,
}

/// 宿主机信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub cpu_model: String,
    pub memory_total_mb: u64,
    pub cpus: u32,
    pub cpu_frequency_mhz: u32,
    /// libvirt 库版本 (major.minor.patch)
    pub libvirt_version: String,
    /// 虚拟化类型 (如 QEMU)
    pub hypervisor_type: String,
}

/// 全局统计 (仪表盘视图)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub host: HostInfo,
    pub vms_total: usize,
    pub vms_active: usize,
    pub vms_inactive: usize,
    /// 按状态标签的数量分布，总和等于 vms_total
    pub state_distribution: HashMap<String, usize>,
    pub vms: Vec<VmInfo>,
}
