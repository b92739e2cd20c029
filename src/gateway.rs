//! CAN 电机网关
//!
//! 纯 I/O 包装：把设定点/握手帧编码后送上总线，并用一个后台接收线程
//! 把反馈帧解码进无锁遥测快照。[`MotorGateway::get_motor_msg`] 永远
//! 立即返回最近一次解码的值——丢帧时保持旧值，不会阻塞伺服周期。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{trace, warn};

use crate::can::{CanAdapter, CanError, CanFrame};
use crate::protocol::{
    decode_feedback, encode_motor_command, feedback_slot, MotorCommand, MotorMsg, MotorType,
    DM_ENABLE_DATA, MSG_SLOTS, ZERO_READOUT_DATA,
};

/// 接收线程单次等待时长；也限定了 drop 时的最大停机延迟
const RX_POLL_TIMEOUT: Duration = Duration::from_millis(10);

pub struct MotorGateway {
    adapter: Arc<dyn CanAdapter>,
    motor_msg: Arc<ArcSwap<[MotorMsg; MSG_SLOTS]>>,
    rx_stop: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
}

impl MotorGateway {
    /// 接管一个 CAN 适配器并启动接收线程
    pub fn new(adapter: Arc<dyn CanAdapter>) -> Self {
        let motor_msg: Arc<ArcSwap<[MotorMsg; MSG_SLOTS]>> =
            Arc::new(ArcSwap::from_pointee([MotorMsg::default(); MSG_SLOTS]));
        let rx_stop = Arc::new(AtomicBool::new(false));

        let rx_thread = {
            let adapter = Arc::clone(&adapter);
            let motor_msg = Arc::clone(&motor_msg);
            let rx_stop = Arc::clone(&rx_stop);
            std::thread::Builder::new()
                .name("can-rx".to_string())
                .spawn(move || rx_loop(adapter, motor_msg, rx_stop))
                .expect("failed to spawn CAN rx thread")
        };

        Self { adapter, motor_msg, rx_stop, rx_thread: Some(rx_thread) }
    }

    /// DM 电机一次性使能握手
    pub fn enable_dm_motor(&self, motor_id: u16) -> Result<(), CanError> {
        self.adapter.send(&CanFrame::new(motor_id as u32, &DM_ENABLE_DATA))
    }

    /// 把电机当前位置编程为零点（标定用）
    pub fn reset_zero_readout(&self, motor_id: u16) -> Result<(), CanError> {
        self.adapter.send(&CanFrame::new(motor_id as u32, &ZERO_READOUT_DATA))
    }

    /// 发送一帧 EC 系列设定点；`current` 已按力矩常数换算（A）
    pub fn send_ec_motor_cmd(
        &self,
        motor_id: u16,
        kp: f64,
        kd: f64,
        pos: f64,
        vel: f64,
        current: f64,
    ) -> Result<(), CanError> {
        let cmd = MotorCommand { kp, kd, pos, vel, current };
        self.adapter
            .send(&encode_motor_command(motor_id, MotorType::EcA4310, cmd))
    }

    /// 发送一帧 DM 系列设定点；`current` 已按力矩常数换算（A）
    pub fn send_dm_motor_cmd(
        &self,
        motor_id: u16,
        kp: f64,
        kd: f64,
        pos: f64,
        vel: f64,
        current: f64,
    ) -> Result<(), CanError> {
        let cmd = MotorCommand { kp, kd, pos, vel, current };
        self.adapter
            .send(&encode_motor_command(motor_id, MotorType::DmJ4310, cmd))
    }

    /// 遥测快照（按 CAN ID − 1 索引；未刷新的槽保持上次值）
    pub fn get_motor_msg(&self) -> [MotorMsg; MSG_SLOTS] {
        **self.motor_msg.load()
    }
}

fn rx_loop(
    adapter: Arc<dyn CanAdapter>,
    motor_msg: Arc<ArcSwap<[MotorMsg; MSG_SLOTS]>>,
    rx_stop: Arc<AtomicBool>,
) {
    while !rx_stop.load(Ordering::Relaxed) {
        match adapter.receive(RX_POLL_TIMEOUT) {
            Ok(frame) => match decode_feedback(&frame) {
                Ok(msg) => {
                    let slot = feedback_slot(msg.motor_id);
                    if slot < MSG_SLOTS {
                        let mut snapshot = **motor_msg.load();
                        snapshot[slot] = msg;
                        motor_msg.store(Arc::new(snapshot));
                    } else {
                        trace!(motor_id = msg.motor_id, "feedback from unmapped motor id");
                    }
                }
                Err(e) => trace!(id = frame.id, "dropping undecodable frame: {e}"),
            },
            Err(CanError::Timeout) => continue,
            Err(e) => {
                warn!("CAN receive error: {e}");
                // 避免在持续故障时空转
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

impl Drop for MotorGateway {
    fn drop(&mut self) {
        self.rx_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
        }
    }
}
