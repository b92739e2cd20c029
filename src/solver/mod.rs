//! 运动学 / 动力学求解器
//!
//! 从 URDF 模型抽出 `base_link → eef_link` 的串联链，提供三个纯函数：
//!
//! - [`Solver::forward_kinematics`] — 关节角 → 末端位姿（固定轴 RPY）
//! - [`Solver::inverse_kinematics`] — 阻尼最小二乘迭代，必须用当前关节角
//!   做种子；不收敛时返回 `(false, …)`，调用方丢弃结果
//! - [`Solver::inverse_dynamics`] — 递推牛顿-欧拉；`vel = acc = 0` 时
//!   即为重力补偿力矩
//!
//! 求解器在模型之外无任何状态，可在多线程间共享只读引用。

use std::collections::HashMap;
use std::path::Path;

use nalgebra::{
    Isometry3, Matrix3, Matrix6, Translation3, Unit, UnitQuaternion, Vector3,
};
use thiserror::Error;

use crate::types::{Pose6d, VecDof, DOF};

mod rne;

/// IK 收敛阈值（位姿误差范数）
const IK_EPS: f64 = 1e-5;
/// IK 最大迭代次数
const IK_MAX_ITER: usize = 500;
/// DLS 阻尼系数 λ
const IK_DAMPING: f64 = 0.05;
/// 单次迭代每关节步长上限（rad），防止奇异附近发散
const IK_MAX_STEP: f64 = 0.3;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Failed to load URDF model: {0}")]
    UrdfLoad(String),

    #[error("Link '{0}' not found in URDF model")]
    LinkNotFound(String),

    #[error("Unsupported joint type on joint '{0}' (only revolute/continuous/fixed)")]
    UnsupportedJoint(String),

    #[error("Kinematic chain from '{base}' to '{eef}' has {actual} actuated joints, expected {expected}")]
    WrongDof {
        base: String,
        eef: String,
        actual: usize,
        expected: usize,
    },
}

/// 链上一个驱动关节及其带动的复合刚体
///
/// 相邻的 fixed 关节被折叠：固定变换并入下一个驱动关节的 `origin`
/// （或链尾的 `eef_offset`），固定连接的 link 惯量并入上一个驱动关节
/// 的复合刚体。
#[derive(Debug)]
pub(crate) struct ChainJoint {
    /// 关节坐标系在前一动坐标系中的固定变换
    pub origin: Isometry3<f64>,
    /// 旋转轴（关节坐标系）
    pub axis: Unit<Vector3<f64>>,
    /// 复合质量（kg）
    pub mass: f64,
    /// 复合质心（关节坐标系）
    pub com: Vector3<f64>,
    /// 复合惯量张量（关节坐标系，关于复合质心）
    pub inertia: Matrix3<f64>,
}

#[derive(Debug)]
pub struct Solver {
    joints: Vec<ChainJoint>,
    /// 最后一个驱动关节坐标系 → 末端 link 的固定变换
    eef_offset: Isometry3<f64>,
    gravity: Vector3<f64>,
}

impl Solver {
    /// 从 URDF 文件构造
    pub fn new(
        urdf_path: impl AsRef<Path>,
        base_link: &str,
        eef_link: &str,
        gravity: Vector3<f64>,
    ) -> Result<Self, SolverError> {
        let robot = urdf_rs::read_file(urdf_path.as_ref())
            .map_err(|e| SolverError::UrdfLoad(e.to_string()))?;
        Self::from_robot(&robot, base_link, eef_link, gravity)
    }

    /// 从 URDF 字符串构造（测试用）
    pub fn from_urdf_str(
        urdf: &str,
        base_link: &str,
        eef_link: &str,
        gravity: Vector3<f64>,
    ) -> Result<Self, SolverError> {
        let robot = urdf_rs::read_from_string(urdf)
            .map_err(|e| SolverError::UrdfLoad(e.to_string()))?;
        Self::from_robot(&robot, base_link, eef_link, gravity)
    }

    fn from_robot(
        robot: &urdf_rs::Robot,
        base_link: &str,
        eef_link: &str,
        gravity: Vector3<f64>,
    ) -> Result<Self, SolverError> {
        let joint_by_child: HashMap<&str, &urdf_rs::Joint> = robot
            .joints
            .iter()
            .map(|j| (j.child.link.as_str(), j))
            .collect();
        let link_by_name: HashMap<&str, &urdf_rs::Link> =
            robot.links.iter().map(|l| (l.name.as_str(), l)).collect();

        if !link_by_name.contains_key(base_link) {
            return Err(SolverError::LinkNotFound(base_link.to_string()));
        }

        // 从末端向根回溯，再反转为根→末端顺序
        let mut chain: Vec<&urdf_rs::Joint> = Vec::new();
        let mut cursor = eef_link;
        while cursor != base_link {
            if chain.len() > robot.joints.len() {
                return Err(SolverError::UrdfLoad(format!(
                    "no acyclic chain from '{base_link}' to '{eef_link}'"
                )));
            }
            let joint = joint_by_child
                .get(cursor)
                .ok_or_else(|| SolverError::LinkNotFound(cursor.to_string()))?;
            chain.push(joint);
            cursor = joint.parent.link.as_str();
        }
        chain.reverse();

        // 折叠 fixed 关节，把 link 惯量归并到所属驱动关节
        let mut joints: Vec<ChainJoint> = Vec::new();
        let mut accum: Vec<(f64, Vector3<f64>, Matrix3<f64>)> = Vec::new();
        let mut pending = Isometry3::identity();

        let finalize = |joints: &mut Vec<ChainJoint>, accum: &mut Vec<_>| {
            if let Some(joint) = joints.last_mut() {
                let (mass, com, inertia) = combine_bodies(accum);
                joint.mass = mass;
                joint.com = com;
                joint.inertia = inertia;
            }
            accum.clear();
        };

        for joint in chain {
            let transform = pending * pose_to_isometry(&joint.origin);
            match joint.joint_type {
                urdf_rs::JointType::Revolute | urdf_rs::JointType::Continuous => {
                    // 上一个驱动段到此为止
                    finalize(&mut joints, &mut accum);
                    let axis = Vector3::new(joint.axis.xyz.0[0], joint.axis.xyz.0[1], joint.axis.xyz.0[2]);
                    joints.push(ChainJoint {
                        origin: transform,
                        axis: Unit::new_normalize(axis),
                        mass: 0.0,
                        com: Vector3::zeros(),
                        inertia: Matrix3::zeros(),
                    });
                    pending = Isometry3::identity();
                    if let Some(link) = link_by_name.get(joint.child.link.as_str()) {
                        accum.push(inertial_in_frame(&link.inertial, &Isometry3::identity()));
                    }
                }
                urdf_rs::JointType::Fixed => {
                    pending = transform;
                    // fixed 子 link 的惯量挂到上一个驱动关节的坐标系
                    if !joints.is_empty() {
                        if let Some(link) = link_by_name.get(joint.child.link.as_str()) {
                            accum.push(inertial_in_frame(&link.inertial, &pending));
                        }
                    }
                }
                _ => return Err(SolverError::UnsupportedJoint(joint.name.clone())),
            }
        }
        finalize(&mut joints, &mut accum);

        if joints.len() != DOF {
            return Err(SolverError::WrongDof {
                base: base_link.to_string(),
                eef: eef_link.to_string(),
                actual: joints.len(),
                expected: DOF,
            });
        }

        Ok(Self { joints, eef_offset: pending, gravity })
    }

    /// 六个驱动关节坐标系在基坐标系下的位姿（含关节自身转角）
    fn joint_transforms(&self, joint_pos: &VecDof) -> [Isometry3<f64>; DOF] {
        let mut transforms = [Isometry3::identity(); DOF];
        let mut t = Isometry3::identity();
        for (i, joint) in self.joints.iter().enumerate() {
            let rotation = UnitQuaternion::from_axis_angle(&joint.axis, joint_pos[i]);
            t = t * joint.origin * Isometry3::from_parts(Translation3::identity(), rotation);
            transforms[i] = t;
        }
        transforms
    }

    pub(crate) fn fk_isometry(&self, joint_pos: &VecDof) -> Isometry3<f64> {
        self.joint_transforms(joint_pos)[DOF - 1] * self.eef_offset
    }

    /// 正运动学：关节角 → (x, y, z, roll, pitch, yaw)
    pub fn forward_kinematics(&self, joint_pos: &VecDof) -> Pose6d {
        let iso = self.fk_isometry(joint_pos);
        let (roll, pitch, yaw) = iso.rotation.euler_angles();
        Pose6d::new(
            iso.translation.x,
            iso.translation.y,
            iso.translation.z,
            roll,
            pitch,
            yaw,
        )
    }

    /// 几何雅可比（基坐标系；前三行线速度，后三行角速度）
    fn jacobian(&self, joint_pos: &VecDof) -> Matrix6<f64> {
        let transforms = self.joint_transforms(joint_pos);
        let eef_pos = (transforms[DOF - 1] * self.eef_offset).translation.vector;

        let mut jac = Matrix6::zeros();
        for i in 0..DOF {
            let z = transforms[i].rotation * self.joints[i].axis.into_inner();
            let origin = transforms[i].translation.vector;
            let linear = z.cross(&(eef_pos - origin));
            for row in 0..3 {
                jac[(row, i)] = linear[row];
                jac[(row + 3, i)] = z[row];
            }
        }
        jac
    }

    /// 逆运动学（阻尼最小二乘）
    ///
    /// `seed` 必须取当前关节位置：迭代从种子出发，收敛到与当前构型
    /// 连续的解上。不收敛时返回 `(false, 迭代终值)`，调用方应丢弃。
    pub fn inverse_kinematics(&self, target: &Pose6d, seed: &VecDof) -> (bool, VecDof) {
        let target_iso = Isometry3::from_parts(
            Translation3::new(target[0], target[1], target[2]),
            UnitQuaternion::from_euler_angles(target[3], target[4], target[5]),
        );

        let mut q = *seed;
        let damping_sq = IK_DAMPING * IK_DAMPING;
        for _ in 0..IK_MAX_ITER {
            let current = self.fk_isometry(&q);
            let error = pose_error(&target_iso, &current);
            if error.norm() < IK_EPS {
                return (true, q);
            }

            let jac = self.jacobian(&q);
            let jjt = jac * jac.transpose() + Matrix6::identity() * damping_sq;
            let Some(inv) = jjt.try_inverse() else {
                return (false, q);
            };
            let mut dq = jac.transpose() * (inv * error);
            for v in dq.iter_mut() {
                *v = v.clamp(-IK_MAX_STEP, IK_MAX_STEP);
            }
            q += dq;
        }
        (false, q)
    }

    /// 逆动力学：给定运动所需的关节力矩
    ///
    /// `inverse_dynamics(pos, 0, 0)` 即抵抗重力所需的保持力矩。
    pub fn inverse_dynamics(
        &self,
        joint_pos: &VecDof,
        joint_vel: &VecDof,
        joint_acc: &VecDof,
    ) -> VecDof {
        rne::recursive_newton_euler(
            &self.joints,
            &self.joint_transforms(joint_pos),
            &self.gravity,
            joint_vel,
            joint_acc,
        )
    }
}

/// 位姿误差旋量：平移差 + 旋转差的轴角向量
fn pose_error(target: &Isometry3<f64>, current: &Isometry3<f64>) -> nalgebra::Vector6<f64> {
    let dp = target.translation.vector - current.translation.vector;
    let dr = (target.rotation * current.rotation.inverse()).scaled_axis();
    nalgebra::Vector6::new(dp.x, dp.y, dp.z, dr.x, dr.y, dr.z)
}

fn pose_to_isometry(pose: &urdf_rs::Pose) -> Isometry3<f64> {
    let xyz = pose.xyz.0;
    let rpy = pose.rpy.0;
    Isometry3::from_parts(
        Translation3::new(xyz[0], xyz[1], xyz[2]),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
    )
}

/// 把一个 link 的惯量参数变换到指定坐标系
///
/// 返回 (质量, 质心, 关于质心的惯量张量)。
fn inertial_in_frame(
    inertial: &urdf_rs::Inertial,
    frame: &Isometry3<f64>,
) -> (f64, Vector3<f64>, Matrix3<f64>) {
    let origin = *frame * pose_to_isometry(&inertial.origin);
    let mass = inertial.mass.value;
    let com = origin.translation.vector;
    let i = &inertial.inertia;
    let local = Matrix3::new(
        i.ixx, i.ixy, i.ixz, //
        i.ixy, i.iyy, i.iyz, //
        i.ixz, i.iyz, i.izz,
    );
    let r = origin.rotation.to_rotation_matrix();
    let inertia = r.matrix() * local * r.matrix().transpose();
    (mass, com, inertia)
}

/// 多个刚体合成：总质量、合成质心、关于合成质心的惯量（平行轴定理）
fn combine_bodies(bodies: &[(f64, Vector3<f64>, Matrix3<f64>)]) -> (f64, Vector3<f64>, Matrix3<f64>) {
    let mass: f64 = bodies.iter().map(|b| b.0).sum();
    if mass <= 0.0 {
        return (0.0, Vector3::zeros(), Matrix3::zeros());
    }
    let com = bodies.iter().map(|b| b.1 * b.0).sum::<Vector3<f64>>() / mass;
    let mut inertia = Matrix3::zeros();
    for (m, c, i) in bodies {
        let d = c - com;
        inertia += i + (Matrix3::identity() * d.dot(&d) - d * d.transpose()) * *m;
    }
    (mass, com, inertia)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 一个平面双摆：两个绕 Y 轴的关节
    const PLANAR_URDF: &str = r#"
    <robot name="planar2">
      <link name="base_link"/>
      <link name="link1">
        <inertial>
          <origin xyz="0.25 0 0" rpy="0 0 0"/>
          <mass value="1.0"/>
          <inertia ixx="0.001" ixy="0" ixz="0" iyy="0.02" iyz="0" izz="0.02"/>
        </inertial>
      </link>
      <link name="tip"/>
      <joint name="j1" type="revolute">
        <origin xyz="0 0 0.5" rpy="0 0 0"/>
        <parent link="base_link"/>
        <child link="link1"/>
        <axis xyz="0 1 0"/>
        <limit lower="-3.14" upper="3.14" effort="30" velocity="3"/>
      </joint>
      <joint name="jt" type="fixed">
        <origin xyz="0.5 0 0" rpy="0 0 0"/>
        <parent link="link1"/>
        <child link="tip"/>
      </joint>
    </robot>
    "#;

    #[test]
    fn test_wrong_dof_is_reported() {
        let err = Solver::from_urdf_str(
            PLANAR_URDF,
            "base_link",
            "tip",
            Vector3::new(0.0, 0.0, -9.807),
        )
        .unwrap_err();
        match err {
            SolverError::WrongDof { actual, expected, .. } => {
                assert_eq!(actual, 1);
                assert_eq!(expected, 6);
            }
            other => panic!("expected WrongDof, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_link_is_reported() {
        let err = Solver::from_urdf_str(
            PLANAR_URDF,
            "base_link",
            "nonexistent",
            Vector3::zeros(),
        )
        .unwrap_err();
        assert!(matches!(err, SolverError::LinkNotFound(_)));
    }

    #[test]
    fn test_pose_error_zero_for_identical_poses() {
        let iso = Isometry3::from_parts(
            Translation3::new(0.1, 0.2, 0.3),
            UnitQuaternion::from_euler_angles(0.4, -0.2, 1.0),
        );
        assert_relative_eq!(pose_error(&iso, &iso).norm(), 0.0, epsilon = 1e-12);
    }

    /// 重力保持力矩应等于势能对关节角的梯度（中心差分验证）
    #[test]
    fn test_gravity_torque_matches_potential_gradient() {
        let gravity = Vector3::new(0.0, 0.0, -9.807);
        let solver = Solver::new(
            concat!(env!("CARGO_MANIFEST_DIR"), "/models/x5.urdf"),
            "base_link",
            "eef_link",
            gravity,
        )
        .unwrap();

        // U(q) = Σ mᵢ · (−g · cᵢ)
        let potential = |q: &crate::types::VecDof| -> f64 {
            let transforms = solver.joint_transforms(q);
            solver
                .joints
                .iter()
                .zip(transforms.iter())
                .map(|(joint, t)| {
                    let com = t.transform_point(&joint.com.into()).coords;
                    joint.mass * (-gravity.dot(&com))
                })
                .sum()
        };

        let q = crate::types::VecDof::new(0.4, 0.8, 0.3, 0.2, -0.5, 0.6);
        let torque = solver.inverse_dynamics(
            &q,
            &crate::types::VecDof::zeros(),
            &crate::types::VecDof::zeros(),
        );

        let h = 1e-6;
        for i in 0..6 {
            let mut plus = q;
            let mut minus = q;
            plus[i] += h;
            minus[i] -= h;
            let gradient = (potential(&plus) - potential(&minus)) / (2.0 * h);
            assert_relative_eq!(torque[i], gradient, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_combine_bodies_two_point_masses() {
        // 两个点质量关于中点的合成：I = 2 m r²（绕垂直轴）
        let bodies = [
            (1.0, Vector3::new(0.5, 0.0, 0.0), Matrix3::zeros()),
            (1.0, Vector3::new(-0.5, 0.0, 0.0), Matrix3::zeros()),
        ];
        let (mass, com, inertia) = combine_bodies(&bodies);
        assert_relative_eq!(mass, 2.0);
        assert_relative_eq!(com.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(inertia[(1, 1)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(inertia[(2, 2)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(inertia[(0, 0)], 0.0, epsilon = 1e-12);
    }
}
