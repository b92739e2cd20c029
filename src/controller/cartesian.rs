//! 笛卡尔空间伺服控制器
//!
//! 组合持有一个不带后台线程的关节控制器，自己的伺服线程在关节骨架
//! 之前多跑一步前置流水线：
//!
//! ```text
//! set_eef_cmd → 时间插值 → 零位姿体检 → 末端速度裁剪 → IK →
//! 限位裁剪 → 滑动平均 → 关节命令槽 →（关节骨架：整形/安全/收发）
//! ```
//!
//! 末端命令支持未来时间戳：`t == 0` 立即生效，`t > now` 则从当前输出
//! 位姿线性插值到目标。过期时间戳告警并忽略。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, info_span, warn};

use crate::can::CanAdapter;
use crate::config::{controller_config, robot_config, ControllerConfig, RobotConfig};
use crate::filter::MovingAverage6;
use crate::solver::Solver;
use crate::types::{EEFState, Gain, JointState, Pose6d, VecDof, DOF};

use super::joint::{JointController, ServoCore};
use super::ControllerError;

/// 末端位姿范数低于此值视为未初始化命令（用户应从 `get_home_pose` 起步）
const POSE_NORM_EPSILON: f64 = 0.01;
/// 末端裁剪只在超过该量时打日志
const CLIPPING_OUTPUT_THRESHOLD: f64 = 0.001;
/// IK 输出滤波窗口；1 即不滤波
const MOVING_WINDOW_SIZE: usize = 1;
/// 析构时的阻尼排空时长
const EXIT_DRAIN: Duration = Duration::from_secs(2);
/// 周期超出预算多少后记一次警告
const OVERRUN_TOLERANCE: Duration = Duration::from_micros(500);

const EE_POSE_NAMES: [&str; 6] = ["x", "y", "z", "roll", "pitch", "yaw"];

struct EefBlock {
    input: EEFState,
    output: EEFState,
    /// 当前插值段的起点（每次 `set_eef_cmd` 捕获瞬时输出）
    interp_start: EEFState,
    joint_pos_filter: MovingAverage6,
    joint_torque_filter: MovingAverage6,
}

struct CartCore {
    servo: Arc<ServoCore>,
    eef: Mutex<EefBlock>,
    /// 重力补偿经由 IK 前置流水线注入，与关节骨架的整形级互斥
    gravity_comp: AtomicBool,
    /// 末端逐轴速度裁剪
    ee_vel_clipping: bool,
    destroy: AtomicBool,
}

/// 笛卡尔空间控制器
///
/// 构造即开始伺服（与关节控制器不同，后台环默认运行）。重力补偿
/// 默认开启。
pub struct CartesianController {
    joint: JointController,
    cart: Arc<CartCore>,
    thread: Option<JoinHandle<()>>,
}

impl CartesianController {
    /// 连接真实机械臂（Linux / SocketCAN）
    #[cfg(target_os = "linux")]
    pub fn new(
        model: &str,
        interface: &str,
        urdf_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, ControllerError> {
        let robot = robot_config(model)?;
        let ctrl = controller_config("cartesian_controller")?;
        let adapter = Arc::new(crate::can::SocketCanAdapter::new(interface)?);
        let solver = Solver::new(
            urdf_path,
            &robot.base_link_name,
            &robot.eef_link_name,
            robot.gravity_vector,
        )?;
        Self::from_parts(robot, ctrl, adapter, solver, interface)
    }

    /// 用自定义适配器构造（测试 / 仿真）
    pub fn with_adapter(
        robot: Arc<RobotConfig>,
        ctrl: Arc<ControllerConfig>,
        adapter: Arc<dyn CanAdapter>,
        solver: Solver,
    ) -> Result<Self, ControllerError> {
        Self::from_parts(robot, ctrl, adapter, solver, "sim")
    }

    fn from_parts(
        robot: Arc<RobotConfig>,
        ctrl: Arc<ControllerConfig>,
        adapter: Arc<dyn CanAdapter>,
        solver: Solver,
        interface: &str,
    ) -> Result<Self, ControllerError> {
        let joint = JointController::from_parts(robot, ctrl, adapter, solver, interface, false)?;
        let servo = Arc::clone(joint.core());

        // 以当前实际位姿为所有命令块的种子，避免首个周期跳变
        let state = servo.get_state();
        let seed = EEFState {
            t: state.t,
            pose6d: servo.solver.forward_kinematics(&state.pos),
            gripper_pos: state.gripper_pos,
            gripper_vel: state.gripper_vel,
            gripper_torque: state.gripper_torque,
        };
        let cart = Arc::new(CartCore {
            servo: Arc::clone(&servo),
            eef: Mutex::new(EefBlock {
                input: seed,
                output: seed,
                interp_start: seed,
                joint_pos_filter: MovingAverage6::new(MOVING_WINDOW_SIZE),
                joint_torque_filter: MovingAverage6::new(MOVING_WINDOW_SIZE),
            }),
            gravity_comp: AtomicBool::new(true),
            ee_vel_clipping: true,
            destroy: AtomicBool::new(false),
        });

        servo.running.store(true, Ordering::Relaxed);
        let thread = {
            let cart = Arc::clone(&cart);
            std::thread::Builder::new()
                .name("cartesian-servo".to_string())
                .spawn(move || cart.background_loop())
                .expect("failed to spawn cartesian servo thread")
        };
        info!(controller = %servo.name, "background cartesian servo task spawned");
        Ok(Self { joint, cart, thread: Some(thread) })
    }

    /// 设定末端命令（原子替换）
    ///
    /// - 夹爪速度/力矩控制不支持：告警并清零
    /// - `t != 0` 且已过期：告警并忽略
    /// - 接受时以当前输出位姿为插值段起点
    pub fn set_eef_cmd(&self, cmd: EEFState) {
        self.cart.set_eef_cmd(cmd);
    }

    /// （输入命令, 插值后的输出命令）快照
    pub fn get_eef_cmd(&self) -> (EEFState, EEFState) {
        let eef = self.cart.eef.lock();
        (eef.input, eef.output)
    }

    /// 当前末端状态（由关节状态经 FK 计算）
    pub fn get_eef_state(&self) -> EEFState {
        self.cart.eef_state()
    }

    pub fn get_joint_state(&self) -> JointState {
        self.cart.servo.get_state()
    }

    pub fn get_joint_cmd(&self) -> (JointState, JointState) {
        self.cart.servo.get_joint_cmd()
    }

    pub fn get_timestamp(&self) -> f64 {
        self.cart.servo.timestamp()
    }

    pub fn get_gain(&self) -> Gain {
        self.cart.servo.get_gain()
    }

    /// 同 [`JointController::set_gain`]
    pub fn set_gain(&self, new_gain: Gain) -> Result<(), ControllerError> {
        self.cart.servo.set_gain(new_gain)
    }

    /// 零位（全关节 0°）对应的末端位姿；新会话的命令应从这里出发
    pub fn get_home_pose(&self) -> Pose6d {
        self.cart.servo.solver.forward_kinematics(&VecDof::zeros())
    }

    pub fn enable_gravity_compensation(&self) {
        info!(controller = %self.cart.servo.name, "enable gravity compensation");
        self.cart.gravity_comp.store(true, Ordering::Relaxed);
    }

    pub fn disable_gravity_compensation(&self) {
        info!(controller = %self.cart.servo.name, "disable gravity compensation");
        self.cart.gravity_comp.store(false, Ordering::Relaxed);
    }

    pub fn get_robot_config(&self) -> Arc<RobotConfig> {
        self.joint.get_robot_config()
    }

    pub fn get_controller_config(&self) -> Arc<ControllerConfig> {
        self.joint.get_controller_config()
    }

    /// 线性回零（语义同 [`JointController::reset_to_home`]，命令经由
    /// 末端空间下发）
    pub fn reset_to_home(&self) -> Result<(), ControllerError> {
        let servo = &self.cart.servo;
        let init_state = servo.get_state();
        let init_gain = servo.get_gain();
        if init_state.pos == VecDof::zeros() {
            servo.running.store(false, Ordering::Relaxed);
            return Err(ControllerError::Init(
                "motor positions are not initialized; check the connection".to_string(),
            ));
        }

        let target_gain = if init_gain.kp.iter().all(|&k| k == 0.0) {
            info!(controller = %servo.name, "current kp is zero, interpolating to default gains");
            Gain {
                kp: servo.ctrl.default_kp,
                kd: servo.ctrl.default_kd,
                gripper_kp: servo.ctrl.default_gripper_kp,
                gripper_kd: servo.ctrl.default_gripper_kd,
            }
        } else {
            init_gain
        };
        let target_state = JointState {
            gripper_pos: servo.robot.gripper_width,
            ..Default::default()
        };

        let mut max_pos_error = init_state.pos.amax();
        max_pos_error = max_pos_error.max(
            (servo.robot.gripper_width - init_state.gripper_pos) * 2.0
                / servo.robot.gripper_width,
        );
        let duration = (2.0 * max_pos_error).max(0.5);
        let dt = servo.ctrl.controller_dt;
        let step_num = (duration / dt).ceil() as usize;
        info!(
            controller = %servo.name,
            "start reset to home in {:.3}s, max_pos_error: {:.3}",
            duration + 0.5,
            max_pos_error
        );

        let prev_running = servo.running.swap(true, Ordering::Relaxed);
        for i in 0..=step_num {
            let alpha = i as f64 / step_num as f64;
            servo.set_gain(init_gain * (1.0 - alpha) + target_gain * alpha)?;
            let joint_interp = init_state * (1.0 - alpha) + target_state * alpha;
            let eef_cmd = EEFState {
                pose6d: servo.solver.forward_kinematics(&joint_interp.pos),
                gripper_pos: joint_interp.gripper_pos,
                ..Default::default()
            };
            self.set_eef_cmd(eef_cmd);
            spin_sleep::sleep(Duration::from_secs_f64(dt));
        }
        spin_sleep::sleep(Duration::from_millis(500));
        info!(controller = %servo.name, "finish reset to home");
        servo.running.store(prev_running, Ordering::Relaxed);
        Ok(())
    }

    /// 过渡到阻尼模式：kp → 0、kd → 默认值，末端命令贴住当前位姿
    pub fn set_to_damping(&self) -> Result<(), ControllerError> {
        let servo = &self.cart.servo;
        info!(controller = %servo.name, "start set to damping");

        let state = servo.get_state();
        let eef_cmd = EEFState {
            pose6d: servo.solver.forward_kinematics(&state.pos),
            gripper_pos: state.gripper_pos,
            ..Default::default()
        };
        servo.set_gain(Gain { kd: servo.ctrl.default_kd, ..Default::default() })?;
        self.set_eef_cmd(eef_cmd);
        spin_sleep::sleep(Duration::from_millis(500));
        info!(controller = %servo.name, "finish set to damping");
        Ok(())
    }
}

impl CartCore {
    fn set_eef_cmd(&self, mut cmd: EEFState) {
        if cmd.gripper_vel != 0.0 || cmd.gripper_torque != 0.0 {
            warn!(
                controller = %self.servo.name,
                "gripper vel and torque control is not supported yet"
            );
            cmd.gripper_vel = 0.0;
            cmd.gripper_torque = 0.0;
        }
        let now = self.servo.timestamp();
        if cmd.t != 0.0 && cmd.t < now {
            warn!(
                controller = %self.servo.name,
                "EEF command timestamp {:.3} is in the past (now {:.3}); command ignored",
                cmd.t,
                now
            );
            return;
        }
        let mut eef = self.eef.lock();
        eef.interp_start = eef.output;
        eef.input = cmd;
    }

    fn eef_state(&self) -> EEFState {
        let state = self.servo.get_state();
        EEFState {
            t: state.t,
            pose6d: self.servo.solver.forward_kinematics(&state.pos),
            gripper_pos: state.gripper_pos,
            gripper_vel: state.gripper_vel,
            gripper_torque: state.gripper_torque,
        }
    }

    /// 前置流水线：插值 → 末端速度裁剪 → 零位姿体检 → IK → 写关节命令槽
    fn calc_joint_cmd(&self) {
        let servo = &self.servo;
        let joint_state = servo.get_state();
        let now = servo.timestamp();
        let gain = servo.get_gain();
        // 锁外算 FK：kp = 0 的轴要贴住当前位姿
        let current_pose = servo.solver.forward_kinematics(&joint_state.pos);

        let output_eef = {
            let mut eef = self.eef.lock();
            let prev_pose = eef.output.pose6d;

            // 时间插值
            if eef.input.t == 0.0 {
                eef.output = eef.input;
                eef.output.t = now;
            } else if now > eef.input.t || eef.input.t <= eef.interp_start.t {
                // 已到达目标时刻：保持目标
                eef.output = eef.input;
                eef.output.t = now;
            } else {
                let alpha =
                    (now - eef.interp_start.t) / (eef.input.t - eef.interp_start.t);
                let alpha = alpha.clamp(0.0, 1.0);
                eef.output.pose6d =
                    eef.interp_start.pose6d * (1.0 - alpha) + eef.input.pose6d * alpha;
                eef.output.gripper_pos = eef.interp_start.gripper_pos * (1.0 - alpha)
                    + eef.input.gripper_pos * alpha;
                eef.output.t = now;
            }

            // 近零位姿说明调用方用原点当起点——这是未初始化错误
            if eef.output.pose6d.norm() < POSE_NORM_EPSILON {
                error!(
                    controller = %servo.name,
                    "EEF command must not be set close to zero; start from get_home_pose() instead"
                );
                drop(eef);
                servo.enter_emergency();
                return;
            }

            // 末端逐轴速度裁剪；kp = 0 的轴贴住当前 FK 位姿
            if self.ee_vel_clipping {
                let dt = servo.ctrl.controller_dt;
                for i in 0..DOF {
                    if gain.kp[i] > 0.0 {
                        let max_step = servo.robot.ee_vel_max[i] * dt;
                        let lo = prev_pose[i] - max_step;
                        let hi = prev_pose[i] + max_step;
                        let clamped = eef.output.pose6d[i].clamp(lo, hi);
                        if (clamped - eef.output.pose6d[i]).abs() > CLIPPING_OUTPUT_THRESHOLD {
                            debug!(
                                "clipping {} from {:.3} to {:.3} (current {:.3})",
                                EE_POSE_NAMES[i], eef.output.pose6d[i], clamped, prev_pose[i]
                            );
                        }
                        eef.output.pose6d[i] = clamped;
                    } else {
                        eef.output.pose6d[i] = current_pose[i];
                    }
                }
            }

            eef.output
        };

        // IK 与逆动力学在锁外执行（有界耗时的纯计算）
        let (success, joint_pos) =
            servo.solver.inverse_kinematics(&output_eef.pose6d, &joint_state.pos);
        if !success {
            debug!(
                controller = %servo.name,
                "IK did not converge; keeping previous joint command"
            );
            return;
        }
        let clipped = joint_pos.zip_zip_map(
            &servo.robot.joint_pos_min,
            &servo.robot.joint_pos_max,
            |q, lo, hi| q.clamp(lo, hi),
        );
        let gravity_torque = if self.gravity_comp.load(Ordering::Relaxed) {
            Some(servo.solver.inverse_dynamics(
                &joint_state.pos,
                &VecDof::zeros(),
                &VecDof::zeros(),
            ))
        } else {
            None
        };

        let mut joint_cmd = JointState::default();
        {
            let mut eef = self.eef.lock();
            joint_cmd.pos = eef.joint_pos_filter.filter(clipped);
            if let Some(torque) = gravity_torque {
                joint_cmd.torque = eef.joint_torque_filter.filter(torque);
            }
        }
        joint_cmd.gripper_pos = output_eef.gripper_pos;
        servo.set_joint_cmd(joint_cmd);
    }

    /// 笛卡尔伺服环：关节骨架加一步前置流水线；紧急态无视 destroy
    fn background_loop(&self) {
        let servo = &self.servo;
        let span = info_span!("servo", controller = %servo.name);
        let _entered = span.entered();
        info!("background cartesian servo thread started");
        let dt = Duration::from_secs_f64(servo.ctrl.controller_dt);

        while !self.destroy.load(Ordering::Relaxed) || servo.emergency.load(Ordering::Relaxed) {
            let tick_start = Instant::now();
            if servo.running.load(Ordering::Relaxed) || servo.emergency.load(Ordering::Relaxed) {
                if !servo.emergency.load(Ordering::Relaxed) {
                    servo.over_current_protection();
                }
                if !servo.emergency.load(Ordering::Relaxed) {
                    servo.check_joint_state_sanity();
                }
                if !servo.emergency.load(Ordering::Relaxed) {
                    self.calc_joint_cmd();
                }
                if servo.emergency.load(Ordering::Relaxed) {
                    servo.apply_emergency_overrides();
                }
                let _ = servo.send_recv();
            }
            let elapsed = tick_start.elapsed();
            if elapsed < dt {
                spin_sleep::sleep(dt - elapsed);
            } else if elapsed > dt + OVERRUN_TOLERANCE {
                warn!(
                    "cartesian servo tick overrun: {} us (budget {} us)",
                    elapsed.as_micros(),
                    dt.as_micros()
                );
            }
        }
        info!("background cartesian servo thread exiting");
    }
}

impl Drop for CartesianController {
    fn drop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        let servo = &self.cart.servo;
        if servo.emergency.load(Ordering::Relaxed) {
            error!(
                controller = %servo.name,
                "dropping controller in emergency state; damping thread keeps running until process exit"
            );
            drop(handle);
            return;
        }

        info!(controller = %servo.name, "set to damping before exit");
        let _ = servo.set_gain(servo.exit_damping_gain());
        self.cart.gravity_comp.store(false, Ordering::Relaxed);
        {
            let mut cmd = servo.cmd.lock();
            cmd.input.vel = VecDof::zeros();
            cmd.input.torque = VecDof::zeros();
        }
        servo.running.store(true, Ordering::Relaxed);
        std::thread::sleep(EXIT_DRAIN);
        self.cart.destroy.store(true, Ordering::Relaxed);
        if servo.emergency.load(Ordering::Relaxed) {
            error!(controller = %servo.name, "emergency during shutdown; leaving damping thread running");
            drop(handle);
            return;
        }
        let _ = handle.join();
        info!(controller = %servo.name, "background cartesian servo thread joined");
    }
}
