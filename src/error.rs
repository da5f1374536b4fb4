//! 错误定义
//!
//! 三级错误分类，由上层传输层映射为不同的对外状态:
//! - [`Error::Connection`] — libvirt 不可达 (服务不可用)
//! - [`Error::VmNotFound`] / [`Error::SnapshotNotFound`] — 资源不存在
//! - [`Error::Operation`] — 其他 libvirt 操作失败 (携带出错实体名称)

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// 连接 libvirt 失败 (守护进程未运行、socket 拒绝等)
    #[error("连接 libvirt 失败: {0}")]
    Connection(String),

    /// 按名称查找虚拟机失败
    #[error("虚拟机 '{0}' 不存在")]
    VmNotFound(String),

    /// 按名称查找快照失败
    #[error("虚拟机 '{vm}' 的快照 '{snapshot}' 不存在")]
    SnapshotNotFound { vm: String, snapshot: String },

    /// 其他 libvirt 操作错误，携带出错的虚拟机/快照名称和底层原因
    #[error("操作失败 [{entity}]: {reason}")]
    Operation { entity: String, reason: String },
}

impl Error {
    /// 构造携带实体名称的操作错误
    pub fn operation(entity: impl Into<String>, reason: impl ToString) -> Self {
        Error::Operation {
            entity: entity.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_entity() {
        let err = Error::operation("web-01", "timed out");
        assert_eq!(err.to_string(), "操作失败 [web-01]: timed out");

        let err = Error::VmNotFound("ghost".to_string());
        assert!(err.to_string().contains("ghost"));
    }
}
