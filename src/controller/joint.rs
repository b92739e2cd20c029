//! 关节空间伺服控制器
//!
//! 伺服核心：独占一个 CAN 网关与一条后台线程，按 `controller_dt`
//! 固定周期执行「过流保护 → 状态体检 → 命令整形 → 发送 → 接收 →
//! 发布状态」。命令槽是"替换"语义而非队列：外部任意线程写入，
//! 下一个周期取最新值，中间值丢弃。
//!
//! # 锁约定
//!
//! 命令块（输入/输出命令 + 增益）与遥测块（关节状态）各有一把互斥锁。
//! 伺服线程只在读写对应块的临界区内持锁，绝不跨 CAN I/O 或睡眠持锁；
//! 需要两者时先取状态快照，再进命令临界区。

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, info_span, warn};

use crate::can::{CanAdapter, CanError};
use crate::config::{controller_config, robot_config, ControllerConfig, RobotConfig};
use crate::gateway::MotorGateway;
use crate::protocol::{MotorType, ARM_FEEDBACK_SLOTS, GRIPPER_FEEDBACK_SLOT};
use crate::solver::Solver;
use crate::types::{Gain, JointState, Pose6d, VecDof, DOF};

use super::ControllerError;

/// kp 从零切到非零时允许的最大位置误差（rad）
const GAIN_TRANSITION_MAX_ERROR: f64 = 0.2;
/// 相邻两帧 CAN 发送之间的最小间隔
const FRAME_PACING: Duration = Duration::from_micros(150);
/// 周期超出预算多少后记一次警告
const OVERRUN_TOLERANCE: Duration = Duration::from_micros(500);
/// 夹爪位置/体检的容差（m）
const GRIPPER_TOLERANCE: f64 = 0.005;
/// 析构时的阻尼排空时长
const EXIT_DRAIN: Duration = Duration::from_secs(2);

pub(crate) struct CmdBlock {
    pub input: JointState,
    pub output: JointState,
    pub gain: Gain,
}

/// 伺服核心共享状态（公开结构 [`JointController`] 与后台线程共持）
pub(crate) struct ServoCore {
    pub robot: Arc<RobotConfig>,
    pub ctrl: Arc<ControllerConfig>,
    pub gateway: MotorGateway,
    pub solver: Solver,
    /// 命令块：输入/输出命令 + 增益
    pub cmd: Mutex<CmdBlock>,
    /// 遥测块：最近一次发布的关节状态
    pub state: Mutex<JointState>,
    pub over_current_cnt: AtomicU32,
    /// 后台环是否执行周期（线程保持存活）
    pub running: AtomicBool,
    /// 析构信号；紧急态下被忽略
    pub destroy: AtomicBool,
    /// 终态：只发阻尼命令，进程重启才能恢复
    pub emergency: AtomicBool,
    /// 整形阶段是否叠加重力补偿力矩
    pub gravity_comp: AtomicBool,
    pub start: Instant,
    /// 日志用：`模型_接口`
    pub name: String,
}

impl ServoCore {
    pub fn timestamp(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn set_joint_cmd(&self, mut cmd: JointState) {
        if cmd.gripper_vel != 0.0 || cmd.gripper_torque != 0.0 {
            warn!(controller = %self.name, "gripper vel and torque control is not supported yet");
            cmd.gripper_vel = 0.0;
            cmd.gripper_torque = 0.0;
        }
        self.cmd.lock().input = cmd;
    }

    pub fn get_joint_cmd(&self) -> (JointState, JointState) {
        let cmd = self.cmd.lock();
        (cmd.input, cmd.output)
    }

    pub fn get_state(&self) -> JointState {
        *self.state.lock()
    }

    pub fn get_gain(&self) -> Gain {
        self.cmd.lock().gain
    }

    /// 替换增益；kp 零→非零的不安全切换会失败并暂停后台环
    pub fn set_gain(&self, new_gain: Gain) -> Result<(), ControllerError> {
        let state = *self.state.lock();
        let mut cmd = self.cmd.lock();
        let kp_was_zero = cmd.gain.kp.iter().all(|&k| k == 0.0);
        let kp_turns_on = new_gain.kp.iter().any(|&k| k != 0.0);
        if kp_was_zero && kp_turns_on {
            let max_pos_error = (state.pos - cmd.output.pos).amax();
            if max_pos_error > GAIN_TRANSITION_MAX_ERROR {
                self.running.store(false, Ordering::Relaxed);
                error!(
                    controller = %self.name,
                    max_pos_error,
                    "cannot set kp to non-zero when the joint pos cmd is far from the current pos; \
                     background loop paused"
                );
                return Err(ControllerError::UnsafeGainTransition {
                    max_pos_error,
                    threshold: GAIN_TRANSITION_MAX_ERROR,
                });
            }
        }
        cmd.gain = new_gain;
        Ok(())
    }

    /// 命令整形：速度裁剪 → 位置裁剪 → 夹爪堵转抑制 → 力矩裁剪
    fn update_output_cmd(&self) {
        let state = *self.state.lock();
        // 重力补偿在锁外计算（纯函数，有界耗时）
        let gravity_torque = if self.gravity_comp.load(Ordering::Relaxed) {
            Some(self.solver.inverse_dynamics(&state.pos, &VecDof::zeros(), &VecDof::zeros()))
        } else {
            None
        };

        let dt = self.ctrl.controller_dt;
        let mut cmd = self.cmd.lock();
        let prev = cmd.output;
        cmd.output = cmd.input;
        if let Some(g) = gravity_torque {
            cmd.output.torque += g;
        }

        // 逐轴速度裁剪；kp = 0 的轴保持在实际位置上，恢复 kp 时不会跳变
        for i in 0..DOF {
            if cmd.gain.kp[i] > 0.0 {
                let delta = cmd.input.pos[i] - prev.pos[i];
                let max_step = self.robot.joint_vel_max[i] * dt;
                if delta.abs() > max_step {
                    cmd.output.pos[i] = prev.pos[i] + max_step * delta.signum();
                    debug!(
                        "joint {} pos cmd clipped by vel limit: {:.3} -> {:.3}",
                        i, cmd.input.pos[i], cmd.output.pos[i]
                    );
                }
            } else {
                cmd.output.pos[i] = state.pos[i];
            }
        }

        // 夹爪速度裁剪
        if cmd.gain.gripper_kp > 0.0 {
            let delta = cmd.input.gripper_pos - prev.gripper_pos;
            let max_step = self.robot.gripper_vel_max * dt;
            if delta.abs() > max_step {
                cmd.output.gripper_pos = prev.gripper_pos + max_step * delta.signum();
                if (cmd.input.gripper_pos - cmd.output.gripper_pos).abs() >= 0.001 {
                    debug!(
                        "gripper pos cmd clipped by vel limit: {:.3} -> {:.3}",
                        cmd.input.gripper_pos, cmd.output.gripper_pos
                    );
                }
            }
        } else {
            cmd.output.gripper_pos = state.gripper_pos;
        }

        // 位置裁剪
        for i in 0..DOF {
            let clamped = cmd.output.pos[i]
                .clamp(self.robot.joint_pos_min[i], self.robot.joint_pos_max[i]);
            if clamped != cmd.output.pos[i] {
                debug!(
                    "joint {} pos cmd clipped to limit: {:.3} -> {:.3}",
                    i, cmd.output.pos[i], clamped
                );
                cmd.output.pos[i] = clamped;
            }
        }

        // 夹爪位置裁剪到 [0, width]
        if cmd.output.gripper_pos < 0.0 {
            if cmd.output.gripper_pos < -GRIPPER_TOLERANCE {
                debug!("gripper pos cmd clipped: {:.3} -> 0.000", cmd.output.gripper_pos);
            }
            cmd.output.gripper_pos = 0.0;
        } else if cmd.output.gripper_pos > self.robot.gripper_width {
            if cmd.output.gripper_pos > self.robot.gripper_width + GRIPPER_TOLERANCE {
                debug!(
                    "gripper pos cmd clipped: {:.3} -> {:.3}",
                    cmd.output.gripper_pos, self.robot.gripper_width
                );
            }
            cmd.output.gripper_pos = self.robot.gripper_width;
        }

        // 夹爪堵转抑制：力矩过半且命令方向与受力方向一致时冻结开度
        if state.gripper_torque.abs() > self.robot.gripper_torque_max / 2.0 {
            let delta = cmd.output.gripper_pos - prev.gripper_pos;
            if delta * state.gripper_torque.signum() > 0.0 {
                debug!("gripper torque too large, gripper pos cmd is held");
                cmd.output.gripper_pos = prev.gripper_pos;
            }
        }

        // 力矩裁剪
        for i in 0..DOF {
            let limit = self.robot.joint_torque_max[i];
            let clamped = cmd.output.torque[i].clamp(-limit, limit);
            if clamped != cmd.output.torque[i] {
                debug!(
                    "joint {} torque cmd clipped: {:.3} -> {:.3}",
                    i, cmd.output.torque[i], clamped
                );
                cmd.output.torque[i] = clamped;
            }
        }
    }

    /// 一次完整收发：整形 → 7 帧设定点（帧间 150 µs 步调）→ 解码遥测
    ///
    /// 发送失败时当前周期提前结束并返回错误，命令状态不前进，
    /// 下个周期自然重试。
    pub fn send_recv(&self) -> Result<(), CanError> {
        self.update_output_cmd();
        let (gain, output) = {
            let cmd = self.cmd.lock();
            (cmd.gain, cmd.output)
        };

        for i in 0..DOF {
            let frame_start = Instant::now();
            let id = self.robot.motor_id[i];
            let result = match self.robot.motor_type[i] {
                MotorType::EcA4310 => self.gateway.send_ec_motor_cmd(
                    id,
                    gain.kp[i],
                    gain.kd[i],
                    output.pos[i],
                    output.vel[i],
                    output.torque[i] / self.robot.motor_type[i].torque_constant(),
                ),
                MotorType::DmJ4310 | MotorType::DmJ4340 => self.gateway.send_dm_motor_cmd(
                    id,
                    gain.kp[i],
                    gain.kd[i],
                    output.pos[i],
                    output.vel[i],
                    output.torque[i] / self.robot.motor_type[i].torque_constant(),
                ),
            };
            if let Err(e) = result {
                error!(controller = %self.name, "CAN send to motor {id} failed: {e}");
                return Err(e);
            }
            pace_frame(frame_start);
        }

        // 夹爪：开度换算到电机原始读数
        let frame_start = Instant::now();
        let gripper_motor_pos =
            output.gripper_pos / self.robot.gripper_width * self.robot.gripper_open_readout;
        if let Err(e) = self.gateway.send_dm_motor_cmd(
            self.robot.gripper_motor_id,
            gain.gripper_kp,
            gain.gripper_kd,
            gripper_motor_pos,
            0.0,
            0.0,
        ) {
            error!(controller = %self.name, "CAN send to gripper motor failed: {e}");
            return Err(e);
        }
        pace_frame(frame_start);

        // 遥测解码：臂关节固定取槽 {0,1,3,4,5,6}，夹爪取槽 7
        let msgs = self.gateway.get_motor_msg();
        let mut next = JointState::default();
        for (i, &slot) in ARM_FEEDBACK_SLOTS.iter().enumerate() {
            next.pos[i] = msgs[slot].angle_actual_rad;
            next.vel[i] = msgs[slot].speed_actual_rad;
            next.torque[i] =
                msgs[slot].current_actual_float * self.robot.motor_type[i].torque_decode_factor();
        }
        let gripper = &msgs[GRIPPER_FEEDBACK_SLOT];
        let readout_scale = self.robot.gripper_width / self.robot.gripper_open_readout;
        next.gripper_pos = gripper.angle_actual_rad * readout_scale;
        next.gripper_vel = gripper.speed_actual_rad * readout_scale;
        next.gripper_torque = gripper.current_actual_float
            * self.robot.gripper_motor_type.torque_decode_factor();
        next.t = self.timestamp();

        *self.state.lock() = next;
        Ok(())
    }

    /// 过流保护：任一关节/夹爪力矩越限则累加计数，连续越限进入紧急态
    pub fn over_current_protection(&self) {
        let state = *self.state.lock();
        let mut over_current = false;
        for i in 0..DOF {
            if state.torque[i].abs() > self.robot.joint_torque_max[i] {
                over_current = true;
                error!(
                    controller = %self.name,
                    "over current detected once on joint {}, torque: {:.3}",
                    i, state.torque[i]
                );
                break;
            }
        }
        if state.gripper_torque.abs() > self.robot.gripper_torque_max {
            over_current = true;
            error!(
                controller = %self.name,
                "over current detected once on gripper, torque: {:.3}",
                state.gripper_torque
            );
        }
        if over_current {
            let cnt = self.over_current_cnt.fetch_add(1, Ordering::Relaxed) + 1;
            if cnt > self.ctrl.over_current_cnt_max {
                error!(controller = %self.name, "over current persisted, entering emergency damping");
                self.enter_emergency();
            }
        } else {
            self.over_current_cnt.store(0, Ordering::Relaxed);
        }
    }

    /// 状态体检：位置/力矩读数或位置命令明显失真 → 紧急态
    pub fn check_joint_state_sanity(&self) {
        let state = *self.state.lock();
        let input_pos = self.cmd.lock().input.pos;
        for i in 0..DOF {
            if state.pos[i].abs() > self.robot.joint_pos_max[i] + PI {
                error!(
                    controller = %self.name,
                    "joint {} pos data error: {:.3}; please restart the program",
                    i, state.pos[i]
                );
                self.enter_emergency();
            }
            if input_pos[i].abs() > self.robot.joint_pos_max[i] + PI {
                error!(
                    controller = %self.name,
                    "joint {} command data error: {:.3}; please restart the program",
                    i, input_pos[i]
                );
                self.enter_emergency();
            }
            if state.torque[i].abs() > 100.0 * self.robot.joint_torque_max[i] {
                error!(
                    controller = %self.name,
                    "joint {} torque data error: {:.3}; please restart the program",
                    i, state.torque[i]
                );
                self.enter_emergency();
            }
        }
        if state.gripper_pos < -GRIPPER_TOLERANCE
            || state.gripper_pos > self.robot.gripper_width + GRIPPER_TOLERANCE
        {
            error!(
                controller = %self.name,
                "gripper position error: got {:.3} but should be in 0~{:.3} (m); close the gripper \
                 before powering the arm or recalibrate the gripper zero and width",
                state.gripper_pos, self.robot.gripper_width
            );
            self.enter_emergency();
        }
    }

    /// 紧急阻尼增益：kd[1], kd[2] ×3，kd[3] ×1.5
    pub fn emergency_damping_gain(&self) -> Gain {
        let mut gain = Gain::default();
        gain.kd = self.ctrl.default_kd;
        gain.kd[1] *= 3.0;
        gain.kd[2] *= 3.0;
        gain.kd[3] *= 1.5;
        gain
    }

    /// 析构阻尼增益：kd[0..=2] ×3，kd[3] ×1.5
    pub fn exit_damping_gain(&self) -> Gain {
        let mut gain = self.emergency_damping_gain();
        gain.kd[0] *= 3.0;
        gain
    }

    /// 进入终态紧急模式（幂等）
    pub fn enter_emergency(&self) {
        if self.emergency.swap(true, Ordering::Relaxed) {
            return;
        }
        error!(
            controller = %self.name,
            "emergency state entered: loop keeps sending pure damping; only a process restart recovers"
        );
        self.apply_emergency_overrides();
    }

    /// 每个紧急周期重申阻尼增益并清零速度/力矩命令
    pub fn apply_emergency_overrides(&self) {
        let gain = self.emergency_damping_gain();
        let mut cmd = self.cmd.lock();
        cmd.gain = gain;
        cmd.input.vel = VecDof::zeros();
        cmd.input.torque = VecDof::zeros();
    }

    /// 一个完整伺服周期（不含睡眠）
    pub fn tick_once(&self) {
        if !self.emergency.load(Ordering::Relaxed) {
            self.over_current_protection();
        }
        if !self.emergency.load(Ordering::Relaxed) {
            self.check_joint_state_sanity();
        }
        if self.emergency.load(Ordering::Relaxed) {
            self.apply_emergency_overrides();
        }
        let _ = self.send_recv();
    }

    /// 初始化：使能 DM 电机 → 阻尼增益 → 10 个热身周期 → 位置非零校验
    pub fn init_robot(&self) -> Result<(), ControllerError> {
        for i in 0..DOF {
            if matches!(self.robot.motor_type[i], MotorType::DmJ4310 | MotorType::DmJ4340) {
                let id = self.robot.motor_id[i];
                self.gateway.enable_dm_motor(id).map_err(|e| {
                    ControllerError::Init(format!("failed to enable DM motor {id}: {e}"))
                })?;
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        if self.robot.gripper_motor_type == MotorType::DmJ4310 {
            self.gateway.enable_dm_motor(self.robot.gripper_motor_id).map_err(|e| {
                ControllerError::Init(format!("failed to enable gripper motor: {e}"))
            })?;
            std::thread::sleep(Duration::from_millis(1));
        }

        {
            let mut cmd = self.cmd.lock();
            cmd.input = JointState::default();
            cmd.output = JointState::default();
            cmd.gain = Gain { kd: self.ctrl.default_kd, ..Default::default() };
        }
        // 热身：确保每个电机的位置都刷新过
        for _ in 0..=10 {
            self.send_recv()
                .map_err(|e| ControllerError::Init(format!("warm-up send_recv failed: {e}")))?;
            std::thread::sleep(Duration::from_millis(5));
        }
        let state = *self.state.lock();
        if state.pos == VecDof::zeros() {
            error!(
                controller = %self.name,
                "none of the motors are initialized; check the connection and power of the arm"
            );
            return Err(ControllerError::Init(
                "none of the motors reported a position".to_string(),
            ));
        }
        Ok(())
    }

    /// 后台伺服环；紧急态下无视 destroy 信号
    pub fn background_loop(&self) {
        let span = info_span!("servo", controller = %self.name);
        let _entered = span.entered();
        info!("background send_recv thread started");
        let dt = Duration::from_secs_f64(self.ctrl.controller_dt);

        while !self.destroy.load(Ordering::Relaxed) || self.emergency.load(Ordering::Relaxed) {
            let tick_start = Instant::now();
            if self.running.load(Ordering::Relaxed) || self.emergency.load(Ordering::Relaxed) {
                self.tick_once();
            }
            let elapsed = tick_start.elapsed();
            if elapsed < dt {
                spin_sleep::sleep(dt - elapsed);
            } else if elapsed > dt + OVERRUN_TOLERANCE {
                warn!(
                    "servo tick overrun: {} us (budget {} us)",
                    elapsed.as_micros(),
                    dt.as_micros()
                );
            }
        }
        info!("background send_recv thread exiting");
    }
}

fn pace_frame(frame_start: Instant) {
    let elapsed = frame_start.elapsed();
    if elapsed < FRAME_PACING {
        spin_sleep::sleep(FRAME_PACING - elapsed);
    }
}

/// 关节空间控制器
///
/// # 生命周期
///
/// 构造即接管一个 CAN 接口与一个 URDF 模型：使能电机、热身、拉起后台
/// 线程（初始不执行周期，调用 [`enable_background_send_recv`] 开启）。
/// 析构切到强阻尼、排空 2 s 后回收线程；紧急态是文档化的例外——线程
/// 持续发阻尼直到进程退出。
///
/// [`enable_background_send_recv`]: JointController::enable_background_send_recv
pub struct JointController {
    core: Arc<ServoCore>,
    thread: Option<JoinHandle<()>>,
}

impl JointController {
    /// 连接真实机械臂（Linux / SocketCAN）
    #[cfg(target_os = "linux")]
    pub fn new(
        model: &str,
        interface: &str,
        urdf_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, ControllerError> {
        let robot = robot_config(model)?;
        let ctrl = controller_config("joint_controller")?;
        let adapter = Arc::new(crate::can::SocketCanAdapter::new(interface)?);
        let solver = Solver::new(
            urdf_path,
            &robot.base_link_name,
            &robot.eef_link_name,
            robot.gravity_vector,
        )?;
        Self::from_parts(robot, ctrl, adapter, solver, interface, true)
    }

    /// 用自定义适配器构造（测试 / 仿真）
    pub fn with_adapter(
        robot: Arc<RobotConfig>,
        ctrl: Arc<ControllerConfig>,
        adapter: Arc<dyn CanAdapter>,
        solver: Solver,
    ) -> Result<Self, ControllerError> {
        Self::from_parts(robot, ctrl, adapter, solver, "sim", true)
    }

    pub(crate) fn from_parts(
        robot: Arc<RobotConfig>,
        ctrl: Arc<ControllerConfig>,
        adapter: Arc<dyn CanAdapter>,
        solver: Solver,
        interface: &str,
        spawn_background: bool,
    ) -> Result<Self, ControllerError> {
        let name = format!("{}_{}", robot.model, interface);
        let core = Arc::new(ServoCore {
            robot,
            ctrl,
            gateway: MotorGateway::new(adapter),
            solver,
            cmd: Mutex::new(CmdBlock {
                input: JointState::default(),
                output: JointState::default(),
                gain: Gain::default(),
            }),
            state: Mutex::new(JointState::default()),
            over_current_cnt: AtomicU32::new(0),
            running: AtomicBool::new(false),
            destroy: AtomicBool::new(false),
            emergency: AtomicBool::new(false),
            gravity_comp: AtomicBool::new(false),
            start: Instant::now(),
            name,
        });
        core.init_robot()?;

        let thread = if spawn_background {
            let core = Arc::clone(&core);
            Some(
                std::thread::Builder::new()
                    .name("servo".to_string())
                    .spawn(move || core.background_loop())
                    .expect("failed to spawn servo thread"),
            )
        } else {
            None
        };
        if thread.is_some() {
            info!(controller = %core.name, "background send_recv task spawned");
        }
        Ok(Self { core, thread })
    }

    pub(crate) fn core(&self) -> &Arc<ServoCore> {
        &self.core
    }

    /// 原子替换输入命令；不支持的夹爪速度/力矩字段会被告警并清零
    pub fn set_joint_cmd(&self, cmd: JointState) {
        self.core.set_joint_cmd(cmd);
    }

    /// （输入命令, 整形后的输出命令）快照
    pub fn get_joint_cmd(&self) -> (JointState, JointState) {
        self.core.get_joint_cmd()
    }

    pub fn get_state(&self) -> JointState {
        self.core.get_state()
    }

    /// 控制器启动以来的秒数
    pub fn get_timestamp(&self) -> f64 {
        self.core.timestamp()
    }

    pub fn get_gain(&self) -> Gain {
        self.core.get_gain()
    }

    /// 替换增益，下个伺服周期生效
    ///
    /// kp 由全零切到非零时要求 `max|状态 − 输出命令| ≤ 0.2 rad`，否则
    /// 返回 [`ControllerError::UnsafeGainTransition`] 并暂停后台环——
    /// 不检查的话机械臂会瞬间弹到陈旧设定点上。
    pub fn set_gain(&self, new_gain: Gain) -> Result<(), ControllerError> {
        self.core.set_gain(new_gain)
    }

    pub fn enable_background_send_recv(&self) {
        info!(controller = %self.core.name, "enable background send_recv");
        self.core.running.store(true, Ordering::Relaxed);
    }

    pub fn disable_background_send_recv(&self) {
        info!(controller = %self.core.name, "disable background send_recv");
        self.core.running.store(false, Ordering::Relaxed);
    }

    /// 后台环当前是否在执行周期
    pub fn background_send_recv_enabled(&self) -> bool {
        self.core.running.load(Ordering::Relaxed)
    }

    pub fn enable_gravity_compensation(&self) {
        info!(controller = %self.core.name, "enable gravity compensation");
        self.core.gravity_comp.store(true, Ordering::Relaxed);
    }

    pub fn disable_gravity_compensation(&self) {
        info!(controller = %self.core.name, "disable gravity compensation");
        self.core.gravity_comp.store(false, Ordering::Relaxed);
    }

    /// 后台环停用时手动执行一个收发周期
    pub fn send_recv_once(&self) -> Result<(), ControllerError> {
        if self.core.running.load(Ordering::Relaxed) {
            warn!(
                controller = %self.core.name,
                "send_recv task is already running in background; send_recv_once ignored"
            );
            return Ok(());
        }
        self.core.send_recv()?;
        self.core.over_current_protection();
        Ok(())
    }

    /// 当前末端位姿（FK）
    pub fn get_tool_pose(&self) -> Pose6d {
        self.core.solver.forward_kinematics(&self.core.get_state().pos)
    }

    pub fn get_robot_config(&self) -> Arc<RobotConfig> {
        Arc::clone(&self.core.robot)
    }

    pub fn get_controller_config(&self) -> Arc<ControllerConfig> {
        Arc::clone(&self.core.ctrl)
    }

    /// 线性回零：位置到 0、夹爪全开，增益同步插值到默认值
    ///
    /// 用时 `max(2·最大位置误差, 0.5)` s，到位后保持 0.5 s。阻塞调用方。
    pub fn reset_to_home(&self) -> Result<(), ControllerError> {
        let core = &self.core;
        let init_state = core.get_state();
        let init_gain = core.get_gain();
        if init_state.pos == VecDof::zeros() {
            core.running.store(false, Ordering::Relaxed);
            return Err(ControllerError::Init(
                "motor positions are not initialized; check the connection".to_string(),
            ));
        }

        let target_gain = if init_gain.kp.iter().all(|&k| k == 0.0) {
            info!(controller = %core.name, "current kp is zero, interpolating to default gains");
            Gain {
                kp: core.ctrl.default_kp,
                kd: core.ctrl.default_kd,
                gripper_kp: core.ctrl.default_gripper_kp,
                gripper_kd: core.ctrl.default_gripper_kd,
            }
        } else {
            init_gain
        };
        let target_state = JointState {
            gripper_pos: core.robot.gripper_width,
            ..Default::default()
        };

        let mut max_pos_error = init_state.pos.amax();
        max_pos_error = max_pos_error.max(
            (core.robot.gripper_width - init_state.gripper_pos) * 2.0 / core.robot.gripper_width,
        );
        let duration = (2.0 * max_pos_error).max(0.5);
        let dt = core.ctrl.controller_dt;
        let step_num = (duration / dt).ceil() as usize;
        info!(
            controller = %core.name,
            "start reset to home in {:.3}s, max_pos_error: {:.3}",
            duration + 0.5,
            max_pos_error
        );

        let prev_running = core.running.swap(true, Ordering::Relaxed);
        for i in 0..=step_num {
            let alpha = i as f64 / step_num as f64;
            core.set_joint_cmd(init_state * (1.0 - alpha) + target_state * alpha);
            core.set_gain(init_gain * (1.0 - alpha) + target_gain * alpha)?;
            spin_sleep::sleep(Duration::from_secs_f64(dt));
        }
        spin_sleep::sleep(Duration::from_millis(500));
        info!(controller = %core.name, "finish reset to home");
        core.running.store(prev_running, Ordering::Relaxed);
        Ok(())
    }

    /// 过渡到阻尼模式：kp → 0、kd → 默认值，位置命令贴住实际位置，
    /// 后台环保持运行
    pub fn set_to_damping(&self) -> Result<(), ControllerError> {
        let core = &self.core;
        let init_gain = core.get_gain();
        let target_gain = Gain { kd: core.ctrl.default_kd, ..Default::default() };
        info!(controller = %core.name, "start set to damping");

        let prev_running = core.running.swap(true, Ordering::Relaxed);
        let step_num = 20;
        let dt = core.ctrl.controller_dt;
        for i in 0..=step_num {
            let state = core.get_state();
            let cmd = JointState {
                pos: state.pos,
                gripper_pos: state.gripper_pos,
                ..Default::default()
            };
            let alpha = i as f64 / step_num as f64;
            core.set_gain(init_gain * (1.0 - alpha) + target_gain * alpha)?;
            core.set_joint_cmd(cmd);
            spin_sleep::sleep(Duration::from_secs_f64(dt));
        }
        spin_sleep::sleep(Duration::from_millis(500));
        info!(controller = %core.name, "finish set to damping");
        core.running.store(prev_running, Ordering::Relaxed);
        Ok(())
    }

    /// 把某个关节的当前位置编程为零点
    ///
    /// 要求后台环已停用；整个序列只发零设定点帧，不会动臂。
    ///
    /// # Panics
    ///
    /// `joint_id >= 6` 时 panic。
    pub fn calibrate_joint(&self, joint_id: usize) -> Result<(), ControllerError> {
        assert!(joint_id < DOF, "joint id out of range");
        let core = &self.core;
        let motor_id = core.robot.motor_id[joint_id];
        let motor_type = core.robot.motor_type[joint_id];

        let prev_running = core.running.swap(false, Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(1));
        self.send_idle_frames(motor_id, motor_type)?;
        core.gateway.reset_zero_readout(motor_id)?;
        std::thread::sleep(Duration::from_micros(400));
        self.send_idle_frames(motor_id, motor_type)?;
        info!(controller = %core.name, "finished setting zero point for joint {joint_id}");
        core.running.store(prev_running, Ordering::Relaxed);
        Ok(())
    }

    /// 把夹爪当前位置编程为零点，并打印全开读数
    ///
    /// 标定流程：全闭时调用本方法设零点，手动全开后读日志里的
    /// 读数，更新机型配置的 `gripper_open_readout`。
    pub fn calibrate_gripper(&self) -> Result<(), ControllerError> {
        let core = &self.core;
        let motor_id = core.robot.gripper_motor_id;
        let motor_type = core.robot.gripper_motor_type;

        let prev_running = core.running.swap(false, Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(1));
        self.send_idle_frames(motor_id, motor_type)?;
        core.gateway.reset_zero_readout(motor_id)?;
        std::thread::sleep(Duration::from_micros(400));
        self.send_idle_frames(motor_id, motor_type)?;

        let readout = core.gateway.get_motor_msg()[GRIPPER_FEEDBACK_SLOT].angle_actual_rad;
        info!(
            controller = %core.name,
            "gripper zero point set; current raw readout {:.3} — open the gripper fully and \
             update gripper_open_readout in the model config with the new readout",
            readout
        );
        core.running.store(prev_running, Ordering::Relaxed);
        Ok(())
    }

    fn send_idle_frames(&self, motor_id: u16, motor_type: MotorType) -> Result<(), ControllerError> {
        for _ in 0..10 {
            match motor_type {
                MotorType::EcA4310 => {
                    self.core.gateway.send_ec_motor_cmd(motor_id, 0.0, 0.0, 0.0, 0.0, 0.0)?
                }
                MotorType::DmJ4310 | MotorType::DmJ4340 => {
                    self.core.gateway.send_dm_motor_cmd(motor_id, 0.0, 0.0, 0.0, 0.0, 0.0)?
                }
            }
            std::thread::sleep(Duration::from_micros(400));
        }
        Ok(())
    }
}

impl Drop for JointController {
    fn drop(&mut self) {
        let Some(handle) = self.thread.take() else {
            // 无后台线程（被笛卡尔控制器组合持有），停机由外层负责
            return;
        };
        let core = &self.core;
        if core.emergency.load(Ordering::Relaxed) {
            error!(
                controller = %core.name,
                "dropping controller in emergency state; damping thread keeps running until process exit"
            );
            drop(handle);
            return;
        }

        info!(controller = %core.name, "set to damping before exit");
        let _ = core.set_gain(core.exit_damping_gain());
        core.set_joint_cmd(JointState::default());
        core.gravity_comp.store(false, Ordering::Relaxed);
        core.running.store(true, Ordering::Relaxed);
        std::thread::sleep(EXIT_DRAIN);
        core.destroy.store(true, Ordering::Relaxed);
        if core.emergency.load(Ordering::Relaxed) {
            error!(controller = %core.name, "emergency during shutdown; leaving damping thread running");
            drop(handle);
            return;
        }
        let _ = handle.join();
        info!(controller = %core.name, "background send_recv thread joined");
    }
}
