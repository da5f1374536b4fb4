//! KVM 虚拟机监控核心
//!
//! 基于 libvirt 的虚拟机监控与生命周期管理库，把有状态的底层查询
//! 整理成一致、幂等、可采样的虚拟机视图。上层传输 (HTTP/WebSocket)、
//! 认证等由调用方负责，本库只做核心逻辑。
//!
//! # 功能
//!
//! - **清单**: 合并运行中与已定义未启动两个枚举口径 (`list_vms`)
//! - **详情**: 实时计数器 + 域 XML 配置合并 (`vm_info` / `vm_details`)
//! - **指标**: 两点采样计算 CPU 使用率, 带缓存基准点 (`vm_metrics`)
//! - **生命周期**: 幂等的启动/停止/重启 (`start_vm` / `stop_vm` / `restart_vm`)
//! - **快照**: 创建/列表/回滚/删除 (`create_snapshot` 等)
//! - **资源**: vCPU 与内存调整, 区分运行中/停止语义 (`update_resources`)
//! - **聚合**: 宿主机信息与全局统计 (`host_info` / `global_stats`)
//!
//! # 示例
//!
//! ```ignore
//! use kvm_supervisor::{SupervisorConfig, VmSupervisor};
//!
//! let supervisor = VmSupervisor::from_env();
//!
//! // 列出全部虚拟机
//! let vms = supervisor.list_vms().await?;
//!
//! // 采样实时指标
//! let metrics = supervisor.vm_metrics("web-01").await?;
//! println!("CPU: {}%", metrics.cpu_percent);
//!
//! // 优雅关机
//! supervisor.stop_vm("web-01", false).await?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod supervisor;
pub mod xml;

pub use config::SupervisorConfig;
pub use error::{Error, Result};
pub use models::{
    DiskInfo, DiskIoStats, GlobalStats, HostInfo, LifecycleOutcome, LifecycleStatus, NetIoStats,
    ResourceUpdate, SnapshotInfo, VmDetails, VmInfo, VmMetrics, VmState,
};
pub use supervisor::VmSupervisor;
