//! SocketCAN 适配器（仅 Linux）
//!
//! 基于内核 SocketCAN 子系统。波特率等接口配置由系统工具
//! （`ip link`）完成，不在应用层设置；打开前会检查接口是否存在且
//! 已启动，给出可操作的错误信息。

use std::fs;
use std::time::Duration;

use socketcan::{CanSocket, EmbeddedFrame, Frame, Socket, StandardId};
use tracing::trace;

use super::{CanAdapter, CanError, CanFrame};

/// SocketCAN 适配器
///
/// # 示例
///
/// ```no_run
/// use x5_sdk::can::{CanAdapter, SocketCanAdapter};
///
/// let adapter = SocketCanAdapter::new("can0").unwrap();
/// ```
pub struct SocketCanAdapter {
    socket: CanSocket,
    interface: String,
}

impl SocketCanAdapter {
    /// 打开 CAN 接口（如 `"can0"`、`"vcan0"`）
    pub fn new(interface: impl Into<String>) -> Result<Self, CanError> {
        let interface = interface.into();
        check_interface_up(&interface)?;

        let socket = CanSocket::open(&interface).map_err(|e| {
            CanError::Device(format!("cannot open CAN interface '{interface}': {e}"))
        })?;
        trace!(interface = %interface, "SocketCAN interface opened");
        Ok(Self { socket, interface })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl CanAdapter for SocketCanAdapter {
    fn send(&self, frame: &CanFrame) -> Result<(), CanError> {
        let id = StandardId::new(frame.id as u16)
            .ok_or_else(|| CanError::Device(format!("invalid standard CAN id {:#x}", frame.id)))?;
        let out = socketcan::CanFrame::new(id, frame.data_slice())
            .ok_or_else(|| CanError::Device("frame payload exceeds 8 bytes".to_string()))?;
        self.socket.write_frame(&out)?;
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<CanFrame, CanError> {
        self.socket.set_read_timeout(timeout)?;
        match self.socket.read_frame() {
            Ok(socketcan::CanFrame::Data(data)) => {
                Ok(CanFrame::new(data.raw_id(), data.data()))
            }
            // 远程帧与错误帧对电机协议无意义，当作超时让上层重试
            Ok(_) => Err(CanError::Timeout),
            Err(e) => {
                let io: std::io::Error = e.into();
                match io.kind() {
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                        Err(CanError::Timeout)
                    }
                    _ => Err(CanError::Io(io)),
                }
            }
        }
    }
}

/// 检查接口存在且已启动（仅检查，不自动配置）
fn check_interface_up(interface: &str) -> Result<(), CanError> {
    let sysfs = format!("/sys/class/net/{interface}");
    if !std::path::Path::new(&sysfs).exists() {
        return Err(CanError::Device(format!(
            "CAN interface '{interface}' does not exist. For a virtual bus:\n  \
             sudo ip link add dev {interface} type vcan && sudo ip link set up {interface}"
        )));
    }
    // vcan 的 operstate 是 "unknown"，同样视为可用
    match fs::read_to_string(format!("{sysfs}/operstate")) {
        Ok(state) if state.trim() == "down" => Err(CanError::Device(format!(
            "CAN interface '{interface}' exists but is not UP. Please start it first:\n  \
             sudo ip link set up {interface}"
        ))),
        _ => Ok(()),
    }
}
