//! 仿真机械臂总线
//!
//! 面向测试、CI 与演示的确定性 [`CanAdapter`] 后端：解码控制器发出的
//! 设定点帧，用"完美跟踪"电机模型推进仿真状态，并把反馈帧排入接收
//! 队列。[`MockArmHandle`] 允许测试脚本直接改写关节位置/电流读数、
//! 注入发送故障、检查最近一次下发的命令。
//!
//! 电机模型刻意简单：`kp > 0` 时位置立即跟上命令，速度恒为 0，电流
//! 读数来自测试注入。伺服环的裁剪与保护逻辑只关心这些可观测量。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::RobotConfig;
use crate::protocol::{
    decode_motor_command, encode_feedback, MotorCommand, MotorType, DM_ENABLE_DATA,
    ZERO_READOUT_DATA,
};

use super::{CanAdapter, CanError, CanFrame};

#[derive(Debug, Clone, Copy)]
struct SimMotor {
    motor_type: MotorType,
    enabled: bool,
    /// 电机侧角度；夹爪电机为原始读数
    pos: f64,
    vel: f64,
    /// 测试注入的电流读数（A）；None 时报 0
    current_override: Option<f64>,
    last_cmd: MotorCommand,
    cmd_count: u64,
}

impl SimMotor {
    fn new(motor_type: MotorType) -> Self {
        Self {
            motor_type,
            enabled: false,
            pos: 0.0,
            vel: 0.0,
            current_override: None,
            last_cmd: MotorCommand::default(),
            cmd_count: 0,
        }
    }
}

struct SimState {
    motors: HashMap<u16, SimMotor>,
    arm_ids: [u16; 6],
    gripper_id: u16,
    /// 剩余的注入发送故障次数
    send_failures: u32,
}

/// 仿真总线适配器
pub struct MockArmBus {
    state: Arc<Mutex<SimState>>,
    feedback_tx: Sender<CanFrame>,
    feedback_rx: Receiver<CanFrame>,
}

/// 仿真状态的测试句柄（可跨线程克隆）
#[derive(Clone)]
pub struct MockArmHandle {
    state: Arc<Mutex<SimState>>,
}

impl MockArmBus {
    /// 按机型参数搭一条仿真总线
    ///
    /// 默认姿态是一个轻微折叠的"停机位"（关节 2/3 各 0.02 rad），
    /// 保证控制器初始化时能读到非零位置。
    pub fn new(config: &RobotConfig) -> Self {
        let mut motors = HashMap::new();
        for (i, &id) in config.motor_id.iter().enumerate() {
            let mut m = SimMotor::new(config.motor_type[i]);
            if i == 1 || i == 2 {
                m.pos = 0.02;
            }
            motors.insert(id, m);
        }
        motors.insert(
            config.gripper_motor_id,
            SimMotor::new(config.gripper_motor_type),
        );

        let (feedback_tx, feedback_rx) = unbounded();
        Self {
            state: Arc::new(Mutex::new(SimState {
                motors,
                arm_ids: config.motor_id,
                gripper_id: config.gripper_motor_id,
                send_failures: 0,
            })),
            feedback_tx,
            feedback_rx,
        }
    }

    /// 取测试句柄
    pub fn handle(&self) -> MockArmHandle {
        MockArmHandle { state: Arc::clone(&self.state) }
    }

    fn push_feedback(&self, motor: &SimMotor, id: u16) {
        let current = motor.current_override.unwrap_or(0.0);
        let _ = self
            .feedback_tx
            .send(encode_feedback(id, motor.pos, motor.vel, current, 35));
    }
}

impl CanAdapter for MockArmBus {
    fn send(&self, frame: &CanFrame) -> Result<(), CanError> {
        let mut state = self.state.lock();
        if state.send_failures > 0 {
            state.send_failures -= 1;
            return Err(CanError::Device("injected send failure".to_string()));
        }

        let id = frame.id as u16;
        let Some(motor) = state.motors.get_mut(&id) else {
            // 总线上没人认领的帧直接丢弃
            return Ok(());
        };

        if frame.data == DM_ENABLE_DATA {
            motor.enabled = true;
        } else if frame.data == ZERO_READOUT_DATA {
            motor.pos = 0.0;
        } else {
            let cmd = decode_motor_command(frame, motor.motor_type)
                .map_err(|e| CanError::Device(format!("undecodable command frame: {e}")))?;
            if cmd.kp > 0.0 {
                motor.pos = cmd.pos;
            }
            motor.vel = 0.0;
            motor.last_cmd = cmd;
            motor.cmd_count += 1;
        }

        let snapshot = *motor;
        drop(state);
        self.push_feedback(&snapshot, id);
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<CanFrame, CanError> {
        self.feedback_rx
            .recv_timeout(timeout)
            .map_err(|_| CanError::Timeout)
    }
}

impl MockArmHandle {
    /// 改写单个臂关节的仿真位置（rad）
    pub fn set_joint_position(&self, joint: usize, pos: f64) {
        let mut state = self.state.lock();
        let id = state.arm_ids[joint];
        if let Some(m) = state.motors.get_mut(&id) {
            m.pos = pos;
        }
    }

    /// 改写全部臂关节的仿真位置
    pub fn set_joint_positions(&self, pos: &[f64; 6]) {
        for (i, &p) in pos.iter().enumerate() {
            self.set_joint_position(i, p);
        }
    }

    /// 改写夹爪电机的原始读数
    pub fn set_gripper_readout(&self, readout: f64) {
        let mut state = self.state.lock();
        let id = state.gripper_id;
        if let Some(m) = state.motors.get_mut(&id) {
            m.pos = readout;
        }
    }

    /// 注入臂关节的电流读数（A）
    pub fn set_joint_current(&self, joint: usize, current: f64) {
        let mut state = self.state.lock();
        let id = state.arm_ids[joint];
        if let Some(m) = state.motors.get_mut(&id) {
            m.current_override = Some(current);
        }
    }

    /// 清除臂关节的电流注入
    pub fn clear_joint_current(&self, joint: usize) {
        let mut state = self.state.lock();
        let id = state.arm_ids[joint];
        if let Some(m) = state.motors.get_mut(&id) {
            m.current_override = None;
        }
    }

    /// 注入夹爪电机的电流读数（A）
    pub fn set_gripper_current(&self, current: f64) {
        let mut state = self.state.lock();
        let id = state.gripper_id;
        if let Some(m) = state.motors.get_mut(&id) {
            m.current_override = Some(current);
        }
    }

    /// 接下来的 `n` 次发送返回错误
    pub fn inject_send_errors(&self, n: u32) {
        self.state.lock().send_failures = n;
    }

    /// 某个臂关节最近一次收到的设定点
    pub fn last_joint_command(&self, joint: usize) -> MotorCommand {
        let state = self.state.lock();
        let id = state.arm_ids[joint];
        state.motors.get(&id).map(|m| m.last_cmd).unwrap_or_default()
    }

    /// 夹爪最近一次收到的设定点
    pub fn last_gripper_command(&self) -> MotorCommand {
        let state = self.state.lock();
        let id = state.gripper_id;
        state.motors.get(&id).map(|m| m.last_cmd).unwrap_or_default()
    }

    /// 某个臂关节的使能状态
    pub fn joint_enabled(&self, joint: usize) -> bool {
        let state = self.state.lock();
        let id = state.arm_ids[joint];
        state.motors.get(&id).map(|m| m.enabled).unwrap_or(false)
    }

    /// 某个臂关节累计收到的设定点帧数
    pub fn joint_command_count(&self, joint: usize) -> u64 {
        let state = self.state.lock();
        let id = state.arm_ids[joint];
        state.motors.get(&id).map(|m| m.cmd_count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_motor_command, MotorCommand};

    fn bus() -> (MockArmBus, MockArmHandle) {
        let config = crate::config::robot_config("X5").unwrap();
        let bus = MockArmBus::new(&config);
        let handle = bus.handle();
        (bus, handle)
    }

    #[test]
    fn test_position_tracking_requires_kp() {
        let (bus, handle) = bus();
        handle.set_joint_position(0, 0.5);

        // kp = 0：位置保持
        let cmd = MotorCommand { kp: 0.0, kd: 1.0, pos: 1.0, ..Default::default() };
        bus.send(&encode_motor_command(1, MotorType::EcA4310, cmd)).unwrap();
        let fb = bus.receive(Duration::from_millis(10)).unwrap();
        let msg = crate::protocol::decode_feedback(&fb).unwrap();
        assert!((msg.angle_actual_rad - 0.5).abs() < 1e-3);

        // kp > 0：完美跟踪
        let cmd = MotorCommand { kp: 50.0, kd: 1.0, pos: 1.0, ..Default::default() };
        bus.send(&encode_motor_command(1, MotorType::EcA4310, cmd)).unwrap();
        let fb = bus.receive(Duration::from_millis(10)).unwrap();
        let msg = crate::protocol::decode_feedback(&fb).unwrap();
        assert!((msg.angle_actual_rad - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_injected_send_errors() {
        let (bus, handle) = bus();
        handle.inject_send_errors(1);
        let cmd = encode_motor_command(1, MotorType::EcA4310, MotorCommand::default());
        assert!(bus.send(&cmd).is_err());
        assert!(bus.send(&cmd).is_ok());
    }

    #[test]
    fn test_enable_handshake() {
        let (bus, handle) = bus();
        assert!(!handle.joint_enabled(3));
        bus.send(&CanFrame::new(5, &DM_ENABLE_DATA)).unwrap();
        assert!(handle.joint_enabled(3));
    }

    #[test]
    fn test_receive_timeout_when_idle() {
        let (bus, _handle) = bus();
        assert!(matches!(
            bus.receive(Duration::from_millis(5)),
            Err(CanError::Timeout)
        ));
    }
}
