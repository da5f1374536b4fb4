//! 快照管理
//!
//! virt crate v0.4 未绑定 libvirt 快照 API，快照操作通过 virsh 子进程
//! 完成 (与监控器共用同一连接 URI)。虚拟机本身仍先经由 libvirt 解析，
//! 保证"虚拟机不存在"和"快照不存在"走各自的错误分类。

use tokio::process::Command;
use tracing::{info, warn};

use super::VmSupervisor;
use crate::error::{Error, Result};
use crate::models::SnapshotInfo;
use crate::xml;

impl VmSupervisor {
    /// 创建快照。同名快照已存在时由 hypervisor 报错
    pub async fn create_snapshot(
        &self,
        vm: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<SnapshotInfo> {
        self.ensure_vm_exists(vm)?;

        let mut args = vec!["snapshot-create-as", vm, name];
        if let Some(desc) = description {
            args.push(desc);
        }
        self.virsh(vm, &args).await?;
        info!("虚拟机 {} 已创建快照 {}", vm, name);

        self.describe_snapshot(vm, name).await
    }

    /// 列出快照，按创建时间从新到旧排序
    pub async fn list_snapshots(&self, vm: &str) -> Result<Vec<SnapshotInfo>> {
        self.ensure_vm_exists(vm)?;

        let listing = self.virsh(vm, &["snapshot-list", vm, "--name"]).await?;
        let current = self.current_snapshot_name(vm).await;

        let mut entries = Vec::new();
        for name in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            entries.push((name.to_string(), self.snapshot_xml(vm, name).await));
        }

        Ok(assemble_snapshots(vm, entries, current.as_deref()))
    }

    /// 回滚到指定快照
    pub async fn revert_snapshot(&self, vm: &str, name: &str) -> Result<()> {
        self.ensure_vm_exists(vm)?;
        self.virsh(vm, &["snapshot-revert", vm, name])
            .await
            .map_err(|e| map_snapshot_error(e, vm, name))?;
        info!("虚拟机 {} 已回滚到快照 {}", vm, name);
        Ok(())
    }

    /// 删除快照 (不可逆, 不级联删除子快照)
    pub async fn delete_snapshot(&self, vm: &str, name: &str) -> Result<()> {
        self.ensure_vm_exists(vm)?;
        self.virsh(vm, &["snapshot-delete", vm, name])
            .await
            .map_err(|e| map_snapshot_error(e, vm, name))?;
        info!("虚拟机 {} 已删除快照 {}", vm, name);
        Ok(())
    }

    /// 查询单个快照的描述
    async fn describe_snapshot(&self, vm: &str, name: &str) -> Result<SnapshotInfo> {
        let current = self.current_snapshot_name(vm).await;
        let parsed = self
            .snapshot_xml(vm, name)
            .await
            .map_err(|e| map_snapshot_error(e, vm, name))?;
        Ok(SnapshotInfo {
            name: parsed.name,
            creation_time: parsed.creation_time,
            state: parsed.state,
            is_current: current.as_deref() == Some(name),
        })
    }

    async fn snapshot_xml(&self, vm: &str, name: &str) -> Result<xml::SnapshotXml> {
        let output = self.virsh(vm, &["snapshot-dumpxml", vm, name]).await?;
        xml::parse_snapshot_xml(&output)
    }

    /// 当前快照名称, 没有当前快照时为 None
    async fn current_snapshot_name(&self, vm: &str) -> Option<String> {
        match self.virsh(vm, &["snapshot-current", vm, "--name"]).await {
            Ok(output) => {
                let name = output.trim().to_string();
                (!name.is_empty()).then_some(name)
            }
            Err(_) => None,
        }
    }

    /// 确认虚拟机存在 (打开连接并按名称解析)
    fn ensure_vm_exists(&self, vm: &str) -> Result<()> {
        let conn = self.connect()?;
        Self::resolve(&conn, vm)?;
        Ok(())
    }

    /// 执行 virsh 子命令, 返回 stdout
    async fn virsh(&self, entity: &str, args: &[&str]) -> Result<String> {
        let output = Command::new("virsh")
            .arg("-c")
            .arg(&self.config().uri)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::operation(entity, format!("执行 virsh 失败: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::operation(entity, stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// 解析结果 → 排序后的快照列表
///
/// 单个快照解析失败只跳过该条，不影响其余快照；
/// 结果按创建时间从新到旧排序。
fn assemble_snapshots(
    vm: &str,
    entries: Vec<(String, Result<xml::SnapshotXml>)>,
    current: Option<&str>,
) -> Vec<SnapshotInfo> {
    let mut snapshots = Vec::new();
    for (name, parsed) in entries {
        match parsed {
            Ok(parsed) => snapshots.push(SnapshotInfo {
                is_current: current == Some(name.as_str()),
                name: parsed.name,
                creation_time: parsed.creation_time,
                state: parsed.state,
            }),
            Err(e) => warn!("解析快照 {}/{} 失败: {}", vm, name, e),
        }
    }

    snapshots.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));
    snapshots
}

/// virsh 的"快照不存在"报错归入 SnapshotNotFound
fn map_snapshot_error(err: Error, vm: &str, snapshot: &str) -> Error {
    if let Error::Operation { ref reason, .. } = err {
        let lowered = reason.to_lowercase();
        if lowered.contains("no domain snapshot") || lowered.contains("snapshot not found") {
            return Error::SnapshotNotFound {
                vm: vm.to_string(),
                snapshot: snapshot.to_string(),
            };
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_not_found_mapping() {
        let err = Error::operation(
            "web-01",
            "error: Domain snapshot not found: no domain snapshot with matching name 'ghost'",
        );
        match map_snapshot_error(err, "web-01", "ghost") {
            Error::SnapshotNotFound { vm, snapshot } => {
                assert_eq!(vm, "web-01");
                assert_eq!(snapshot, "ghost");
            }
            other => panic!("预期 SnapshotNotFound, 实际: {:?}", other),
        }
    }

    #[test]
    fn test_other_errors_pass_through() {
        let err = Error::operation("web-01", "operation failed: disk image locked");
        match map_snapshot_error(err, "web-01", "s1") {
            Error::Operation { entity, .. } => assert_eq!(entity, "web-01"),
            other => panic!("预期 Operation, 实际: {:?}", other),
        }
    }

    fn parsed(name: &str, creation_time: i64, state: &str) -> Result<xml::SnapshotXml> {
        Ok(xml::SnapshotXml {
            name: name.to_string(),
            creation_time,
            state: state.to_string(),
        })
    }

    #[test]
    fn test_assemble_sorts_by_creation_time_descending() {
        // virsh 按名称字典序输出, 组装后必须按时间从新到旧
        let entries = vec![
            ("t1".to_string(), parsed("t1", 100, "running")),
            ("t2".to_string(), parsed("t2", 200, "shutoff")),
            ("t3".to_string(), parsed("t3", 300, "running")),
        ];
        let snapshots = assemble_snapshots("web-01", entries, Some("t3"));

        let names: Vec<_> = snapshots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["t3", "t2", "t1"]);
        assert!(snapshots[0].is_current);
        assert!(!snapshots[1].is_current);
        assert!(!snapshots[2].is_current);
    }

    #[test]
    fn test_assemble_skips_unparseable_snapshot() {
        let entries = vec![
            ("good".to_string(), parsed("good", 100, "running")),
            (
                "broken".to_string(),
                Err(Error::operation("web-01", "XML 解析失败")),
            ),
            ("newer".to_string(), parsed("newer", 200, "shutoff")),
        ];
        let snapshots = assemble_snapshots("web-01", entries, None);

        let names: Vec<_> = snapshots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["newer", "good"]);
        assert!(snapshots.iter().all(|s| !s.is_current));
    }

    #[test]
    fn test_assemble_empty_listing() {
        assert!(assemble_snapshots("web-01", Vec::new(), None).is_empty());
    }
}
