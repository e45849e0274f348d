//! MMD 关节（6DOF 弹簧约束）
//!
//! 用 rapier 的 GenericJoint 表达：线性上下限相同的轴锁定，
//! 角度轴用限制范围约束，弹簧用目标为 0 的电机模拟。

use glam::{DMat4, DQuat, DVec3};
use rapier3d::math::Real;
use rapier3d::prelude::*;

use super::config::PhysicsConfig;
use super::mmd_rigid_body::to_isometry;

/// 上下限视为相等的阈值
const EPSILON: f64 = 1e-4;
/// 上下限相等的角度轴使用的最小范围
const MIN_ANGULAR_RANGE: f64 = 0.1;

/// 关节定义（模型空间）
#[derive(Debug, Clone, PartialEq)]
pub struct JointDef {
    pub name: String,
    pub rigid_body_a: i32,
    pub rigid_body_b: i32,
    pub position: DVec3,
    /// 欧拉角 (弧度)，按 Z·Y·X 合成
    pub rotation: DVec3,
    pub linear_lower: DVec3,
    pub linear_upper: DVec3,
    pub angular_lower: DVec3,
    pub angular_upper: DVec3,
    pub spring_linear: DVec3,
    pub spring_angular: DVec3,
}

impl JointDef {
    /// 两个刚体之间的固定连接（所有轴无活动范围）
    pub fn new(name: impl Into<String>, rigid_body_a: i32, rigid_body_b: i32) -> Self {
        Self {
            name: name.into(),
            rigid_body_a,
            rigid_body_b,
            position: DVec3::ZERO,
            rotation: DVec3::ZERO,
            linear_lower: DVec3::ZERO,
            linear_upper: DVec3::ZERO,
            angular_lower: DVec3::ZERO,
            angular_upper: DVec3::ZERO,
            spring_linear: DVec3::ZERO,
            spring_angular: DVec3::ZERO,
        }
    }

    pub fn with_transform(mut self, position: DVec3, rotation: DVec3) -> Self {
        self.position = position;
        self.rotation = rotation;
        self
    }

    pub fn with_linear_limits(mut self, lower: DVec3, upper: DVec3) -> Self {
        self.linear_lower = lower;
        self.linear_upper = upper;
        self
    }

    pub fn with_angular_limits(mut self, lower: DVec3, upper: DVec3) -> Self {
        self.angular_lower = lower;
        self.angular_upper = upper;
        self
    }

    pub fn with_springs(mut self, linear: DVec3, angular: DVec3) -> Self {
        self.spring_linear = linear;
        self.spring_angular = angular;
        self
    }

    /// 关节的世界矩阵
    pub fn rest_matrix(&self) -> DMat4 {
        let rotation = DQuat::from_rotation_z(self.rotation.z)
            * DQuat::from_rotation_y(self.rotation.y)
            * DQuat::from_rotation_x(self.rotation.x);
        DMat4::from_rotation_translation(rotation, self.position)
    }

    /// 被锁定的线性轴
    pub fn locked_axes(&self) -> JointAxesMask {
        let masks = [JointAxesMask::LIN_X, JointAxesMask::LIN_Y, JointAxesMask::LIN_Z];
        let mut locked = JointAxesMask::empty();
        for (i, mask) in masks.into_iter().enumerate() {
            if (self.linear_upper[i] - self.linear_lower[i]).abs() < EPSILON {
                locked |= mask;
            }
        }
        locked
    }
}

/// 创建 rapier 关节
///
/// `body_a` / `body_b` 为两个刚体的静止世界矩阵。
pub fn build_joint(def: &JointDef, body_a: DMat4, body_b: DMat4, config: &PhysicsConfig) -> GenericJoint {
    let joint_matrix = def.rest_matrix();
    let frame_a = to_isometry(&(body_a.inverse() * joint_matrix));
    let frame_b = to_isometry(&(body_b.inverse() * joint_matrix));

    let locked = def.locked_axes();
    let mut joint = GenericJointBuilder::new(locked)
        .local_frame1(frame_a)
        .local_frame2(frame_b)
        .contacts_enabled(false)
        .build();

    let linear_axes = [
        (JointAxis::LinX, JointAxesMask::LIN_X),
        (JointAxis::LinY, JointAxesMask::LIN_Y),
        (JointAxis::LinZ, JointAxesMask::LIN_Z),
    ];
    let angular_axes = [JointAxis::AngX, JointAxis::AngY, JointAxis::AngZ];

    for (i, (axis, mask)) in linear_axes.into_iter().enumerate() {
        if locked.contains(mask) {
            continue;
        }
        let (lower, upper) = (def.linear_lower[i], def.linear_upper[i]);
        if lower <= upper {
            joint.set_limits(axis, [lower as Real, upper as Real]);
        }
        set_spring(&mut joint, axis, def.spring_linear[i], config);
    }

    // 下限大于上限的角度轴完全自由
    for (i, axis) in angular_axes.into_iter().enumerate() {
        let (lower, upper) = (def.angular_lower[i], def.angular_upper[i]);
        if lower <= upper {
            let (lower, upper) = if upper - lower < EPSILON {
                (lower - MIN_ANGULAR_RANGE, lower + MIN_ANGULAR_RANGE)
            } else {
                (lower, upper)
            };
            joint.set_limits(axis, [lower as Real, upper as Real]);
        }
        set_spring(&mut joint, axis, def.spring_angular[i], config);
    }

    joint
}

fn set_spring(joint: &mut GenericJoint, axis: JointAxis, stiffness: f64, config: &PhysicsConfig) {
    if stiffness == 0.0 {
        return;
    }
    let stiffness = stiffness * config.spring_stiffness_scale;
    let damping = (stiffness.abs() * config.spring_damping_factor).sqrt();
    joint.set_motor(axis, 0.0, 0.0, stiffness as Real, damping as Real);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_axes() {
        let def = JointDef::new("j", 0, 1)
            .with_linear_limits(DVec3::new(0.0, -1.0, 0.0), DVec3::new(0.0, 1.0, 0.0));
        let locked = def.locked_axes();
        assert!(locked.contains(JointAxesMask::LIN_X));
        assert!(!locked.contains(JointAxesMask::LIN_Y));
        assert!(locked.contains(JointAxesMask::LIN_Z));
    }

    #[test]
    fn test_local_frames_meet_at_joint() {
        let def = JointDef::new("j", 0, 1).with_transform(DVec3::new(0.0, 5.0, 0.0), DVec3::ZERO);
        let a = DMat4::from_translation(DVec3::new(0.0, 6.0, 0.0));
        let b = DMat4::from_translation(DVec3::new(0.0, 4.0, 0.0));
        let joint = build_joint(&def, a, b, &PhysicsConfig::default());
        assert!((joint.local_frame1.translation.vector.y + 1.0).abs() < 1e-6);
        assert!((joint.local_frame2.translation.vector.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rest_matrix_euler_order() {
        let def = JointDef::new("j", 0, 1)
            .with_transform(DVec3::ZERO, DVec3::new(0.3, 0.0, 0.5));
        let expected = DQuat::from_rotation_z(0.5) * DQuat::from_rotation_x(0.3);
        let m = def.rest_matrix();
        assert!((m.transform_vector3(DVec3::Y) - expected * DVec3::Y).length() < 1e-12);
    }
}
