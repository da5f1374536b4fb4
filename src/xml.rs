//! 域 XML 解析
//!
//! libvirt 的 get_info 计数器在部分场景下不可靠 (如运行中的域改过配置)，
//! 资源配置以域 XML 为准。每次操作都重新解析，不做缓存。

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

/// 从域 XML 提取的配置信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainConfig {
    /// 内存上限 (KiB)，取自 `<memory>` 元素
    pub memory_kib: u64,

    /// vCPU 数量，取自 `<vcpu>` 元素
    pub vcpus: u32,

    /// 操作系统类型 (os/type 文本，通常为 hvm)
    pub os_type: String,

    /// 磁盘设备 (device='disk'，跳过光驱等)
    pub disks: Vec<DiskConfig>,

    /// 网络接口目标设备名 (如 vnet0)
    pub interfaces: Vec<String>,

    /// VNC 端口。autoport 未分配时 libvirt 写 -1，视为未配置
    pub vnc_port: Option<u16>,
}

/// 磁盘设备配置
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskConfig {
    /// 目标设备名 (target@dev，如 vda)
    pub device: String,

    /// 后端路径 (source@file 或 source@dev)
    pub path: Option<String>,
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(a.value.as_ref()).into_owned())
}

/// 最近三级元素路径，不足的位置补空串
fn path_tail(path: &[String]) -> [&str; 3] {
    let n = path.len();
    [
        if n >= 3 { &path[n - 3] } else { "" },
        if n >= 2 { &path[n - 2] } else { "" },
        if n >= 1 { &path[n - 1] } else { "" },
    ]
}

/// 解析域 XML
///
/// 基于事件流 + 元素路径栈，只提取关心的元素，其余一律跳过。
/// 缺失的元素保持零值/空值，不视为错误。
pub fn parse_domain_xml(xml: &str) -> Result<DomainConfig> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut config = DomainConfig::default();
    let mut path: Vec<String> = Vec::new();
    let mut current_disk: Option<DiskConfig> = None;
    let mut current_disk_wanted = false;

    let open = |e: &BytesStart<'_>,
                    path: &[String],
                    config: &mut DomainConfig,
                    current_disk: &mut Option<DiskConfig>,
                    current_disk_wanted: &mut bool| {
        let name = e.name();
        let in_devices = path.last().map(String::as_str) == Some("devices");
        let in_disk = path.last().map(String::as_str) == Some("disk");
        let in_interface = path.last().map(String::as_str) == Some("interface");

        match name.as_ref() {
            b"disk" if in_devices => {
                // device 属性缺省即为 disk
                let kind = attr_value(e, b"device").unwrap_or_else(|| "disk".to_string());
                *current_disk_wanted = kind == "disk";
                *current_disk = Some(DiskConfig::default());
            }
            b"source" if in_disk => {
                if let Some(disk) = current_disk.as_mut() {
                    disk.path = attr_value(e, b"file").or_else(|| attr_value(e, b"dev"));
                }
            }
            b"target" if in_disk => {
                if let Some(disk) = current_disk.as_mut() {
                    if let Some(dev) = attr_value(e, b"dev") {
                        disk.device = dev;
                    }
                }
            }
            b"target" if in_interface => {
                if let Some(dev) = attr_value(e, b"dev") {
                    config.interfaces.push(dev);
                }
            }
            b"graphics" if in_devices => {
                if attr_value(e, b"type").as_deref() == Some("vnc") {
                    if let Some(port) = attr_value(e, b"port") {
                        if port != "-1" {
                            config.vnc_port = port.parse().ok();
                        }
                    }
                }
            }
            _ => {}
        }
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                open(
                    &e,
                    &path,
                    &mut config,
                    &mut current_disk,
                    &mut current_disk_wanted,
                );
                path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            // 自闭合元素没有对应的 End，不入栈
            Ok(Event::Empty(e)) => {
                open(
                    &e,
                    &path,
                    &mut config,
                    &mut current_disk,
                    &mut current_disk_wanted,
                );
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"disk" {
                    if let Some(disk) = current_disk.take() {
                        if current_disk_wanted && !disk.device.is_empty() {
                            config.disks.push(disk);
                        }
                    }
                    current_disk_wanted = false;
                }
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::operation("domain-xml", e))?;
                match path_tail(&path) {
                    ["", "domain", "memory"] => {
                        config.memory_kib = text.trim().parse().unwrap_or(0);
                    }
                    ["", "domain", "vcpu"] => {
                        config.vcpus = text.trim().parse().unwrap_or(0);
                    }
                    ["domain", "os", "type"] => {
                        config.os_type = text.trim().to_string();
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::operation("domain-xml", e)),
        }
    }

    Ok(config)
}

/// 从快照 XML 提取的描述信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotXml {
    pub name: String,
    /// unix 秒
    pub creation_time: i64,
    /// 创建时的域状态 (如 running / shutoff)
    pub state: String,
}

/// 解析 `<domainsnapshot>` XML (snapshot-dumpxml 的输出)
///
/// 快照 XML 内嵌一份完整的域 XML，路径匹配必须锚定到 domainsnapshot
/// 的直接子元素，避免误读内嵌域的同名元素。
pub fn parse_snapshot_xml(xml: &str) -> Result<SnapshotXml> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut snapshot = SnapshotXml::default();
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Empty(_)) => {}
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::operation("snapshot-xml", e))?;
                match path_tail(&path) {
                    ["", "domainsnapshot", "name"] => snapshot.name = text.trim().to_string(),
                    ["", "domainsnapshot", "creationTime"] => {
                        snapshot.creation_time = text.trim().parse().unwrap_or(0);
                    }
                    ["", "domainsnapshot", "state"] => snapshot.state = text.trim().to_string(),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::operation("snapshot-xml", e)),
        }
    }

    Ok(snapshot)
}
