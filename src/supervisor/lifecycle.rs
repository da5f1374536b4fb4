//! 生命周期控制
//!
//! 所有操作对当前状态幂等: 重复启动/停止不报错，返回 already_* 状态。
//! 注意优雅关机是"发出请求即成功"——返回 stopped 不代表虚拟机已断电。

use tracing::{info, warn};
use virt::sys;

use super::VmSupervisor;
use crate::error::{Error, Result};
use crate::models::{LifecycleOutcome, LifecycleStatus};

impl VmSupervisor {
    /// 启动虚拟机。已在运行时不做任何变更
    pub async fn start_vm(&self, name: &str) -> Result<LifecycleOutcome> {
        let conn = self.connect()?;
        let domain = Self::resolve(&conn, name)?;

        if domain.is_active().unwrap_or(false) {
            info!("虚拟机 {} 已在运行, 跳过启动", name);
            return Ok(LifecycleOutcome::new(
                LifecycleStatus::AlreadyRunning,
                name,
                "虚拟机已在运行",
            ));
        }

        domain
            .create()
            .map_err(|e| Error::operation(name, format!("启动失败: {}", e)))?;
        info!("虚拟机 {} 已启动", name);
        Ok(LifecycleOutcome::new(
            LifecycleStatus::Started,
            name,
            "虚拟机已启动",
        ))
    }

    /// 停止虚拟机。已停止时不做任何变更
    ///
    /// force=false 发送 ACPI 关机请求 (异步, 客户机可能忽略)；
    /// force=true 立即断电。
    pub async fn stop_vm(&self, name: &str, force: bool) -> Result<LifecycleOutcome> {
        let conn = self.connect()?;
        let domain = Self::resolve(&conn, name)?;

        if !domain.is_active().unwrap_or(false) {
            info!("虚拟机 {} 已停止, 跳过", name);
            return Ok(LifecycleOutcome::new(
                LifecycleStatus::AlreadyStopped,
                name,
                "虚拟机已处于停止状态",
            ));
        }

        let message = if force {
            domain
                .destroy()
                .map_err(|e| Error::operation(name, format!("强制停止失败: {}", e)))?;
            info!("虚拟机 {} 已强制停止", name);
            "虚拟机已强制停止"
        } else {
            domain
                .shutdown()
                .map_err(|e| Error::operation(name, format!("发送关机请求失败: {}", e)))?;
            info!("已向虚拟机 {} 发送关机请求", name);
            "已发送关机请求, 客户机正在关机"
        };

        Ok(LifecycleOutcome::new(LifecycleStatus::Stopped, name, message))
    }

    /// 重启虚拟机
    ///
    /// 运行中: force=false 发 ACPI 重启, force=true 硬复位 (配置不支持
    /// 复位时退化为断电再启动)。未运行时退化为启动。
    pub async fn restart_vm(&self, name: &str, force: bool) -> Result<LifecycleOutcome> {
        let conn = self.connect()?;
        let domain = Self::resolve(&conn, name)?;

        if !domain.is_active().unwrap_or(false) {
            domain
                .create()
                .map_err(|e| Error::operation(name, format!("启动失败: {}", e)))?;
            info!("虚拟机 {} 未运行, 已直接启动", name);
            return Ok(LifecycleOutcome::new(
                LifecycleStatus::Started,
                name,
                "虚拟机未运行, 已直接启动",
            ));
        }

        if !force {
            domain
                .reboot(sys::VIR_DOMAIN_REBOOT_DEFAULT)
                .map_err(|e| Error::operation(name, format!("重启失败: {}", e)))?;
            info!("虚拟机 {} 重启中", name);
            return Ok(LifecycleOutcome::new(
                LifecycleStatus::Restarted,
                name,
                "虚拟机重启中",
            ));
        }

        if let Err(e) = domain.reset() {
            // 部分配置不支持复位, 退化为断电再启动
            warn!("虚拟机 {} 复位失败 ({}), 改为断电重启", name, e);
            domain
                .destroy()
                .map_err(|e| Error::operation(name, format!("断电失败: {}", e)))?;
            domain
                .create()
                .map_err(|e| Error::operation(name, format!("断电后启动失败: {}", e)))?;
        }
        info!("虚拟机 {} 已硬重启", name);
        Ok(LifecycleOutcome::new(
            LifecycleStatus::RestartedHard,
            name,
            "虚拟机已硬重启",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // 需要实际的 libvirt 环境和测试虚拟机才能运行
    async fn test_start_is_idempotent_on_running_vm() {
        let supervisor = VmSupervisor::from_env();
        let first = supervisor.start_vm("test-vm").await.unwrap();
        let second = supervisor.start_vm("test-vm").await.unwrap();
        assert_eq!(second.status, LifecycleStatus::AlreadyRunning);
        assert!(matches!(
            first.status,
            LifecycleStatus::Started | LifecycleStatus::AlreadyRunning
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_on_unknown_vm_is_not_found() {
        let supervisor = VmSupervisor::from_env();
        // 本地无 libvirt 时为 Connection, 有 libvirt 时为 VmNotFound
        match supervisor.start_vm("不存在的虚拟机").await {
            Err(Error::VmNotFound(name)) => assert_eq!(name, "不存在的虚拟机"),
            Err(Error::Connection(_)) => {}
            other => panic!("预期失败, 实际: {:?}", other.map(|o| o.status)),
        }
    }
}
