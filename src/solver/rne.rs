//! 递推牛顿-欧拉逆动力学
//!
//! 世界坐标系表述：先沿链前向递推各段的角速度/角加速度/质心加速度，
//! 再反向递推段间力与力矩，投影到关节轴得到关节力矩。基座加速度取
//! `-gravity`（等效把重力折算成基座向上的加速度），因此
//! `vel = acc = 0` 时输出即为抵抗重力所需的保持力矩。

use nalgebra::{Isometry3, Matrix3, Vector3};

use crate::types::{VecDof, DOF};

use super::ChainJoint;

pub(crate) fn recursive_newton_euler(
    joints: &[ChainJoint],
    transforms: &[Isometry3<f64>; DOF],
    gravity: &Vector3<f64>,
    joint_vel: &VecDof,
    joint_acc: &VecDof,
) -> VecDof {
    // 世界系下的关节轴、原点、质心、惯量
    let mut axis_w = [Vector3::zeros(); DOF];
    let mut origin_w = [Vector3::zeros(); DOF];
    let mut com_w = [Vector3::zeros(); DOF];
    let mut inertia_w = [Matrix3::zeros(); DOF];
    for i in 0..DOF {
        let rot = transforms[i].rotation.to_rotation_matrix();
        axis_w[i] = transforms[i].rotation * joints[i].axis.into_inner();
        origin_w[i] = transforms[i].translation.vector;
        com_w[i] = transforms[i].transform_point(&joints[i].com.into()).coords;
        inertia_w[i] = rot.matrix() * joints[i].inertia * rot.matrix().transpose();
    }

    // 前向递推：角速度 ω、角加速度 α、关节原点加速度 a_o、质心加速度 a_c
    let mut omega = [Vector3::zeros(); DOF];
    let mut alpha = [Vector3::zeros(); DOF];
    let mut acc_com = [Vector3::zeros(); DOF];

    let mut omega_prev = Vector3::zeros();
    let mut alpha_prev = Vector3::zeros();
    let mut acc_prev = -*gravity;
    let mut origin_prev = Vector3::zeros();

    for i in 0..DOF {
        let r = origin_w[i] - origin_prev;
        let a_o = acc_prev + alpha_prev.cross(&r) + omega_prev.cross(&omega_prev.cross(&r));

        let spin = axis_w[i] * joint_vel[i];
        let w = omega_prev + spin;
        let a = alpha_prev + axis_w[i] * joint_acc[i] + omega_prev.cross(&spin);

        let d = com_w[i] - origin_w[i];
        acc_com[i] = a_o + a.cross(&d) + w.cross(&w.cross(&d));

        omega[i] = w;
        alpha[i] = a;

        omega_prev = w;
        alpha_prev = a;
        acc_prev = a_o;
        origin_prev = origin_w[i];
    }

    // 反向递推：段间力/力矩，投影到关节轴
    let mut torque = VecDof::zeros();
    let mut force_next = Vector3::zeros();
    let mut moment_next = Vector3::zeros();

    for i in (0..DOF).rev() {
        let force_inertial = joints[i].mass * acc_com[i];
        let moment_inertial =
            inertia_w[i] * alpha[i] + omega[i].cross(&(inertia_w[i] * omega[i]));

        let mut moment = moment_inertial
            + moment_next
            + (com_w[i] - origin_w[i]).cross(&force_inertial);
        if i + 1 < DOF {
            moment += (origin_w[i + 1] - origin_w[i]).cross(&force_next);
        }
        let force = force_inertial + force_next;

        torque[i] = axis_w[i].dot(&moment);
        force_next = force;
        moment_next = moment;
    }
    torque
}
