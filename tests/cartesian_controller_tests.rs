//! 笛卡尔控制器集成测试（仿真总线）

use std::sync::Arc;
use std::time::Duration;

use x5_sdk::can::{MockArmBus, MockArmHandle};
use x5_sdk::{
    controller_config, robot_config, CartesianController, EEFState, Gain, HighLevel, Solver,
};

const URDF_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/models/x5.urdf");

/// 远离腕部奇异的通用测试姿态
const TEST_POSE: [f64; 6] = [0.3, 0.6, 0.4, 0.2, 0.5, 0.1];

fn make_controller(initial_pos: [f64; 6]) -> (CartesianController, MockArmHandle) {
    let robot = robot_config("X5").unwrap();
    let ctrl = controller_config("cartesian_controller").unwrap();
    let bus = MockArmBus::new(&robot);
    let handle = bus.handle();
    handle.set_joint_positions(&initial_pos);
    let solver = Solver::new(
        URDF_PATH,
        &robot.base_link_name,
        &robot.eef_link_name,
        robot.gravity_vector,
    )
    .unwrap();
    let controller =
        CartesianController::with_adapter(robot, ctrl, Arc::new(bus), solver).unwrap();
    (controller, handle)
}

/// 切换到默认工作增益（kp = 0 时末端输出贴住实测位姿，不跟随命令）
fn engage_default_gain(controller: &CartesianController) {
    let ctrl = controller.get_controller_config();
    controller
        .set_gain(Gain {
            kp: ctrl.default_kp,
            kd: ctrl.default_kd,
            gripper_kp: ctrl.default_gripper_kp,
            gripper_kd: ctrl.default_gripper_kd,
        })
        .unwrap();
}

#[test]
fn test_eef_interpolation_reaches_target_linearly() {
    let (controller, _handle) = make_controller(TEST_POSE);
    std::thread::sleep(Duration::from_millis(150));
    engage_default_gain(&controller);
    std::thread::sleep(Duration::from_millis(50));

    let (_, start_output) = controller.get_eef_cmd();
    let p0 = start_output.pose6d;
    let t0 = controller.get_timestamp();

    // 目标：当前位姿附近的小位移，1 秒后到达
    let mut p1 = p0;
    p1[0] += 0.02;
    p1[2] -= 0.015;
    p1[5] += 0.05;
    let target_t = t0 + 1.0;
    controller.set_eef_cmd(EEFState {
        t: target_t,
        pose6d: p1,
        gripper_pos: 0.04,
        ..Default::default()
    });

    // 中途采样：输出应落在线性插值轨迹上
    std::thread::sleep(Duration::from_millis(500));
    let (_, mid) = controller.get_eef_cmd();
    let alpha = ((mid.t - t0) / (target_t - t0)).clamp(0.0, 1.0);
    let expected = p0 * (1.0 - alpha) + p1 * alpha;
    assert!(
        (mid.pose6d - expected).amax() < 5e-3,
        "mid output {:?} vs expected {:?}",
        mid.pose6d,
        expected
    );
    assert!(alpha > 0.3 && alpha < 0.7, "sampled outside the interpolation window");

    // 目标时刻之后：保持目标
    std::thread::sleep(Duration::from_millis(700));
    let (_, held) = controller.get_eef_cmd();
    assert!((held.pose6d - p1).amax() < 1e-9);

    // 末端状态（FK）收敛到目标附近
    std::thread::sleep(Duration::from_millis(200));
    let eef_state = controller.get_eef_state();
    assert!(
        (eef_state.pose6d - p1).amax() < 0.02,
        "eef state {:?} vs target {:?}",
        eef_state.pose6d,
        p1
    );
}

#[test]
fn test_immediate_command_is_velocity_clipped() {
    let (controller, _handle) = make_controller(TEST_POSE);
    std::thread::sleep(Duration::from_millis(150));
    engage_default_gain(&controller);
    std::thread::sleep(Duration::from_millis(50));

    let robot = controller.get_robot_config();
    let ctrl_cfg = controller.get_controller_config();
    let (_, start_output) = controller.get_eef_cmd();
    let mut target = start_output.pose6d;
    target[0] += 0.3;

    // t = 0：立即生效，但逐轴末端速度裁剪限制每周期步进
    controller.set_eef_cmd(EEFState {
        t: 0.0,
        pose6d: target,
        gripper_pos: start_output.gripper_pos,
        ..Default::default()
    });

    let sample_window = Duration::from_millis(200);
    let (_, before) = controller.get_eef_cmd();
    std::thread::sleep(sample_window);
    let (_, after) = controller.get_eef_cmd();

    let rate = (after.pose6d[0] - before.pose6d[0]).abs() / sample_window.as_secs_f64();
    let max_rate = robot.ee_vel_max[0];
    assert!(rate > 0.05, "output did not move (rate {rate})");
    assert!(
        rate <= max_rate * 1.3 + ctrl_cfg.controller_dt,
        "x rate {rate} exceeds ee_vel_max {max_rate}"
    );
}

#[test]
fn test_stale_timestamp_is_ignored() {
    let (controller, _handle) = make_controller(TEST_POSE);
    std::thread::sleep(Duration::from_millis(150));

    let (input_before, _) = controller.get_eef_cmd();
    let mut cmd = input_before;
    cmd.pose6d[0] += 0.05;
    cmd.t = 1e-4; // 远在过去
    controller.set_eef_cmd(cmd);

    let (input_after, _) = controller.get_eef_cmd();
    assert!((input_after.pose6d - input_before.pose6d).amax() < 1e-12);
    assert_eq!(input_after.t, input_before.t);
}

#[test]
fn test_gripper_vel_torque_fields_zeroed() {
    let (controller, _handle) = make_controller(TEST_POSE);
    std::thread::sleep(Duration::from_millis(100));

    let (_, output) = controller.get_eef_cmd();
    let cmd = EEFState {
        pose6d: output.pose6d,
        gripper_vel: 0.2,
        gripper_torque: 0.5,
        ..Default::default()
    };
    controller.set_eef_cmd(cmd);
    let (input, _) = controller.get_eef_cmd();
    assert_eq!(input.gripper_vel, 0.0);
    assert_eq!(input.gripper_torque, 0.0);
}

#[test]
fn test_near_zero_pose_triggers_emergency() {
    let (controller, handle) = make_controller(TEST_POSE);
    std::thread::sleep(Duration::from_millis(150));

    controller.set_eef_cmd(EEFState::default()); // 位姿全零
    std::thread::sleep(Duration::from_millis(100));

    let ctrl_cfg = controller.get_controller_config();
    let gain = controller.get_gain();
    assert!(gain.kp.iter().all(|&k| k == 0.0), "emergency gain must have zero kp");
    assert!((gain.kd[1] - ctrl_cfg.default_kd[1] * 3.0).abs() < 1e-9);

    // 环仍在发阻尼帧
    let before = handle.joint_command_count(0);
    std::thread::sleep(Duration::from_millis(100));
    assert!(handle.joint_command_count(0) > before);
}

#[test]
fn test_home_pose_is_far_from_origin() {
    let (controller, _handle) = make_controller(TEST_POSE);
    let home = controller.get_home_pose();
    assert!(home.norm() > 0.5, "home pose too close to origin: {home:?}");
}

#[test]
fn test_reset_to_home_via_eef_space() {
    let (controller, handle) = make_controller([0.2, 0.3, 0.2, 0.1, 0.3, 0.1]);
    handle.set_gripper_readout(4.3);
    std::thread::sleep(Duration::from_millis(150));

    controller.reset_to_home().unwrap();

    let state = controller.get_joint_state();
    let robot = controller.get_robot_config();
    assert!(state.pos.amax() < 0.02, "joints not home: {:?}", state.pos);
    assert!(
        (state.gripper_pos - robot.gripper_width).abs() < 0.005,
        "gripper not open: {}",
        state.gripper_pos
    );
}

#[test]
fn test_set_to_damping_holds_current_pose() {
    let (controller, _handle) = make_controller(TEST_POSE);
    std::thread::sleep(Duration::from_millis(150));
    engage_default_gain(&controller);
    std::thread::sleep(Duration::from_millis(50));

    controller.set_to_damping().unwrap();

    let ctrl_cfg = controller.get_controller_config();
    let gain = controller.get_gain();
    assert!(gain.kp.iter().all(|&k| k == 0.0));
    assert!((gain.kd - ctrl_cfg.default_kd).amax() < 1e-9);

    // kp = 0：关节输出命令贴住实际位置
    std::thread::sleep(Duration::from_millis(100));
    let state = controller.get_joint_state();
    let (_, output) = controller.get_joint_cmd();
    assert!((state.pos - output.pos).amax() < 1e-6);
}

#[test]
fn test_high_level_rewrites_timestamps() {
    let (controller, _handle) = make_controller(TEST_POSE);
    std::thread::sleep(Duration::from_millis(150));
    let high = HighLevel::with_cartesian(controller);

    let (_, output) = high.get_eef_cmd();

    // t = 0 → now + LOOK_AHEAD_TIME
    let now = high.get_timestamp();
    high.set_eef_cmd(EEFState { pose6d: output.pose6d, ..Default::default() });
    let (input, _) = high.get_eef_cmd();
    assert!(input.t > now + 0.05 && input.t < now + 0.25, "look-ahead not applied: {}", input.t);

    // 非零时间戳同样被改写
    let now = high.get_timestamp();
    high.set_eef_cmd(EEFState { t: now + 42.0, pose6d: output.pose6d, ..Default::default() });
    let (input, _) = high.get_eef_cmd();
    assert!(input.t < now + 0.25, "user timestamp should be rewritten: {}", input.t);
}

#[test]
fn test_joint_outputs_respect_limits_under_eef_commands() {
    let (controller, _handle) = make_controller(TEST_POSE);
    std::thread::sleep(Duration::from_millis(150));
    engage_default_gain(&controller);
    std::thread::sleep(Duration::from_millis(50));

    // 朝工作空间边缘推进，关节输出必须始终在限位内
    let (_, output) = controller.get_eef_cmd();
    let mut target = output.pose6d;
    target[0] += 0.25;
    target[2] += 0.2;
    controller.set_eef_cmd(EEFState {
        pose6d: target,
        gripper_pos: 0.03,
        ..Default::default()
    });

    let robot = controller.get_robot_config();
    for _ in 0..20 {
        std::thread::sleep(Duration::from_millis(25));
        let (_, joint_output) = controller.get_joint_cmd();
        for i in 0..6 {
            assert!(joint_output.pos[i] >= robot.joint_pos_min[i] - 1e-9);
            assert!(joint_output.pos[i] <= robot.joint_pos_max[i] + 1e-9);
            assert!(joint_output.torque[i].abs() <= robot.joint_torque_max[i] + 1e-9);
        }
        assert!(joint_output.gripper_pos >= 0.0);
        assert!(joint_output.gripper_pos <= robot.gripper_width + 1e-9);
    }
}
