//! 关节空间正弦跟随演示（仿真总线，无需硬件）
//!
//! ```bash
//! cargo run --example joint_wave
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use x5_sdk::can::MockArmBus;
use x5_sdk::{
    controller_config, robot_config, Gain, JointController, JointState, Solver, VecDof,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let robot = robot_config("X5")?;
    let ctrl = controller_config("joint_controller")?;
    let bus = MockArmBus::new(&robot);
    bus.handle().set_joint_positions(&[0.0, 0.02, 0.02, 0.0, 0.0, 0.0]);
    let solver = Solver::new(
        concat!(env!("CARGO_MANIFEST_DIR"), "/models/x5.urdf"),
        &robot.base_link_name,
        &robot.eef_link_name,
        robot.gravity_vector,
    )?;

    let controller =
        JointController::with_adapter(robot.clone(), ctrl.clone(), Arc::new(bus), solver)?;
    controller.enable_background_send_recv();
    std::thread::sleep(Duration::from_millis(100));
    controller.set_gain(Gain {
        kp: ctrl.default_kp,
        kd: ctrl.default_kd,
        gripper_kp: ctrl.default_gripper_kp,
        gripper_kd: ctrl.default_gripper_kd,
    })?;

    println!("joint 0 sine follow, 3 s ...");
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(3) {
        let t = start.elapsed().as_secs_f64();
        let cmd = JointState {
            pos: VecDof::new(0.3 * (2.0 * t).sin(), 0.0, 0.0, 0.0, 0.0, 0.0),
            gripper_pos: robot.gripper_width * 0.5 * (1.0 + t.sin()),
            ..Default::default()
        };
        controller.set_joint_cmd(cmd);
        std::thread::sleep(Duration::from_millis(10));
    }

    let state = controller.get_state();
    println!(
        "final: t = {:.3}s, joint0 = {:.3} rad, gripper = {:.1} mm",
        state.t,
        state.pos[0],
        state.gripper_pos * 1000.0
    );
    controller.reset_to_home()?;
    println!("back home, bye");
    Ok(())
}
