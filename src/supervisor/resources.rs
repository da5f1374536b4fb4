//! 资源调整
//!
//! 运行中的域只写持久化配置 (AFFECT_CONFIG)，重启后生效；
//! 停止的域写当前配置 (AFFECT_CURRENT)，下次启动即生效。
//! 上限和当前值一起调, vCPU 与内存使用同一作用域, 避免两者状态不一致。

use tracing::info;
use virt::sys;

use super::VmSupervisor;
use crate::error::{Error, Result};
use crate::models::ResourceUpdate;

impl VmSupervisor {
    /// 调整虚拟机的 vCPU 数量和内存上限 (MB)
    pub async fn update_resources(
        &self,
        name: &str,
        vcpus: u32,
        memory_mb: u64,
    ) -> Result<ResourceUpdate> {
        if vcpus == 0 {
            return Err(Error::operation(name, "vCPU 数量必须大于 0"));
        }
        if memory_mb == 0 {
            return Err(Error::operation(name, "内存必须大于 0 MB"));
        }

        let conn = self.connect()?;
        let domain = Self::resolve(&conn, name)?;

        let active = domain.is_active().unwrap_or(false);
        let flags = if active {
            sys::VIR_DOMAIN_AFFECT_CONFIG
        } else {
            sys::VIR_DOMAIN_AFFECT_CURRENT
        };
        let memory_kib = memory_mb * 1024;

        // 先抬上限再设当前值, 顺序反了会被旧上限挡住
        domain
            .set_memory_flags(memory_kib, flags | sys::VIR_DOMAIN_MEM_MAXIMUM)
            .map_err(|e| Error::operation(name, format!("设置内存上限失败: {}", e)))?;
        domain
            .set_memory_flags(memory_kib, flags)
            .map_err(|e| Error::operation(name, format!("设置内存失败: {}", e)))?;

        domain
            .set_vcpus_flags(vcpus, flags | sys::VIR_DOMAIN_VCPU_MAXIMUM)
            .map_err(|e| Error::operation(name, format!("设置 vCPU 上限失败: {}", e)))?;
        domain
            .set_vcpus_flags(vcpus, flags)
            .map_err(|e| Error::operation(name, format!("设置 vCPU 失败: {}", e)))?;

        if active {
            info!(
                "虚拟机 {} 资源已写入持久化配置 ({} vCPU / {} MB), 重启后生效",
                name, vcpus, memory_mb
            );
        } else {
            info!("虚拟机 {} 资源已调整 ({} vCPU / {} MB)", name, vcpus, memory_mb);
        }

        Ok(ResourceUpdate {
            name: name.to_string(),
            vcpus,
            memory_mb,
            restart_needed: active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_vcpus_rejected_before_connecting() {
        let supervisor = VmSupervisor::from_env();
        let err = supervisor.update_resources("web-01", 0, 1024).await.unwrap_err();
        assert!(matches!(err, Error::Operation { .. }));
    }

    #[tokio::test]
    async fn test_zero_memory_rejected_before_connecting() {
        let supervisor = VmSupervisor::from_env();
        let err = supervisor.update_resources("web-01", 2, 0).await.unwrap_err();
        assert!(matches!(err, Error::Operation { .. }));
    }
}
