//! 末端画方演示：经高层前瞻接口在 YZ 平面走一个小正方形
//! （仿真总线，无需硬件）
//!
//! ```bash
//! cargo run --example cartesian_square
//! ```

use std::sync::Arc;
use std::time::Duration;

use x5_sdk::can::MockArmBus;
use x5_sdk::{
    controller_config, robot_config, CartesianController, EEFState, Gain, HighLevel, Solver,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let robot = robot_config("X5")?;
    let ctrl = controller_config("cartesian_controller")?;
    let bus = MockArmBus::new(&robot);
    bus.handle().set_joint_positions(&[0.3, 0.6, 0.4, 0.2, 0.5, 0.1]);
    let solver = Solver::new(
        concat!(env!("CARGO_MANIFEST_DIR"), "/models/x5.urdf"),
        &robot.base_link_name,
        &robot.eef_link_name,
        robot.gravity_vector,
    )?;

    let cartesian =
        CartesianController::with_adapter(robot.clone(), ctrl.clone(), Arc::new(bus), solver)?;
    std::thread::sleep(Duration::from_millis(100));
    cartesian.set_gain(Gain {
        kp: ctrl.default_kp,
        kd: ctrl.default_kd,
        gripper_kp: ctrl.default_gripper_kp,
        gripper_kd: ctrl.default_gripper_kd,
    })?;
    let high = HighLevel::with_cartesian(cartesian);

    let center = high.get_eef_state().pose6d;
    let half = 0.015;
    let corners: [(f64, f64); 5] =
        [(half, half), (half, -half), (-half, -half), (-half, half), (half, half)];

    println!("tracing a {:.0} mm square around the current pose ...", half * 2000.0);
    for (dy, dz) in corners {
        let mut pose = center;
        pose[1] += dy;
        pose[2] += dz;
        // t = 0：薄层改写为 now + LOOK_AHEAD_TIME，由插值器平滑
        high.set_eef_cmd(EEFState { pose6d: pose, gripper_pos: 0.04, ..Default::default() });
        std::thread::sleep(Duration::from_millis(400));
        let eef = high.get_eef_state();
        println!(
            "corner reached: y = {:+.4}, z = {:+.4} (target {:+.4}, {:+.4})",
            eef.pose6d[1] - center[1],
            eef.pose6d[2] - center[2],
            dy,
            dz
        );
    }
    println!("done");
    Ok(())
}
