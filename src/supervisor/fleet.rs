//! 虚拟机清单与全局统计
//!
//! libvirt 对活动域和已定义未启动域给出两个枚举口径 (ID 列表 / 名称列表)，
//! 清单把两者合并成统一视图。单台虚拟机读取失败不中断整个清单，
//! 记日志后跳过。

use std::collections::HashMap;

use tracing::{info, warn};
use virt::connect::Connect;
use virt::domain::Domain;

use super::{build_vm_info, format_version, VmSupervisor};
use crate::error::{Error, Result};
use crate::models::{GlobalStats, HostInfo, VmInfo};

impl VmSupervisor {
    /// 列出所有虚拟机 (运行中 + 已定义未启动)
    pub async fn list_vms(&self) -> Result<Vec<VmInfo>> {
        let conn = self.connect()?;
        let vms = collect_vms(&conn)?;
        info!("清单共 {} 台虚拟机", vms.len());
        Ok(vms)
    }

    /// 宿主机信息
    pub async fn host_info(&self) -> Result<HostInfo> {
        let conn = self.connect()?;
        host_info_from(&conn)
    }

    /// 全局统计: 宿主机信息 + 整个清单按状态聚合
    pub async fn global_stats(&self) -> Result<GlobalStats> {
        let conn = self.connect()?;
        let host = host_info_from(&conn)?;
        let vms = collect_vms(&conn)?;
        Ok(summarize(host, vms))
    }
}

/// 合并两个枚举口径。活动域按 ID 解析, 停止域按名称解析
fn collect_vms(conn: &Connect) -> Result<Vec<VmInfo>> {
    let mut vms = Vec::new();

    let active_ids = conn
        .list_domains()
        .map_err(|e| Error::operation("host", format!("枚举活动域失败: {}", e)))?;
    for id in active_ids {
        let domain = match Domain::lookup_by_id(conn, id) {
            Ok(domain) => domain,
            Err(e) => {
                // 枚举和解析之间域可能刚好消失
                warn!("按 ID {} 解析域失败, 跳过: {}", id, e);
                continue;
            }
        };
        match build_vm_info(&domain) {
            Ok(vm) => vms.push(vm),
            Err(e) => warn!("读取域 (ID {}) 信息失败, 跳过: {}", id, e),
        }
    }

    let defined_names = conn
        .list_defined_domains()
        .map_err(|e| Error::operation("host", format!("枚举已定义域失败: {}", e)))?;
    for name in defined_names {
        let domain = match Domain::lookup_by_name(conn, &name) {
            Ok(domain) => domain,
            Err(e) => {
                warn!("按名称 {} 解析域失败, 跳过: {}", name, e);
                continue;
            }
        };
        match build_vm_info(&domain) {
            Ok(vm) => vms.push(vm),
            Err(e) => warn!("读取域 {} 信息失败, 跳过: {}", name, e),
        }
    }

    Ok(vms)
}

fn host_info_from(conn: &Connect) -> Result<HostInfo> {
    let node = conn
        .get_node_info()
        .map_err(|e| Error::operation("host", format!("获取节点信息失败: {}", e)))?;
    let hostname = conn
        .get_hostname()
        .map_err(|e| Error::operation("host", format!("获取主机名失败: {}", e)))?;
    let hypervisor_type = conn
        .get_type()
        .map_err(|e| Error::operation("host", format!("获取虚拟化类型失败: {}", e)))?;
    let version = conn
        .get_lib_version()
        .map_err(|e| Error::operation("host", format!("获取 libvirt 版本失败: {}", e)))?;

    Ok(HostInfo {
        hostname,
        cpu_model: node.model,
        memory_total_mb: node.memory / 1024,
        cpus: node.cpus,
        cpu_frequency_mhz: node.mhz,
        libvirt_version: format_version(version as u64),
        hypervisor_type,
    })
}

/// 清单 → 全局统计。状态分布的数量之和恒等于清单总数
fn summarize(host: HostInfo, vms: Vec<VmInfo>) -> GlobalStats {
    let vms_active = vms.iter().filter(|vm| vm.is_active).count();
    let vms_inactive = vms.len() - vms_active;

    let mut state_distribution: HashMap<String, usize> = HashMap::new();
    for vm in &vms {
        *state_distribution
            .entry(vm.state.as_str().to_string())
            .or_insert(0) += 1;
    }

    GlobalStats {
        host,
        vms_total: vms.len(),
        vms_active,
        vms_inactive,
        state_distribution,
        vms,
    }
}
