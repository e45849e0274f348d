//! MMD 刚体
//!
//! RigidBodyDef 是模型中的静态定义；PhysicsBody 是它在 rapier 世界中的实例，
//! 记录刚体相对骨骼的偏移矩阵，用于在骨骼与刚体之间来回换算。

use glam::{DMat4, DQuat, DVec3};
use rapier3d::math::{Isometry, Real, Vector};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;

use crate::math::rotation_of;

use super::config::PhysicsConfig;

/// 动态刚体的最小质量
const MIN_MASS: f64 = 1e-3;

/// 刚体形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidBodyShape {
    /// 球：size.x 为半径
    Sphere,
    /// 盒：size 为半边长
    Box,
    /// 胶囊：size.x 为半径，size.y 为高度（沿 Y 轴）
    Capsule,
}

/// 物理模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidBodyMode {
    /// 运动学刚体，跟随骨骼
    FollowBone,
    /// 动态刚体，回写骨骼
    Dynamic,
    /// 动态刚体，但位置跟随骨骼（只回写旋转）
    DynamicWithBonePosition,
}

/// 刚体定义（模型空间）
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBodyDef {
    pub name: String,
    /// 关联骨骼 (-1 表示无)
    pub bone_index: i32,
    /// 所属碰撞组 (0..16)
    pub group: u8,
    /// 可碰撞的组（位掩码）
    pub collision_mask: u16,
    pub shape: RigidBodyShape,
    pub size: DVec3,
    /// 静止姿势下的位置
    pub position: DVec3,
    /// 欧拉角 (弧度)，按 Y·X·Z 合成
    pub rotation: DVec3,
    pub mass: f64,
    pub linear_damping: f64,
    pub angular_damping: f64,
    pub restitution: f64,
    pub friction: f64,
    pub mode: RigidBodyMode,
}

impl RigidBodyDef {
    pub fn new(name: impl Into<String>, bone_index: i32, mode: RigidBodyMode) -> Self {
        Self {
            name: name.into(),
            bone_index,
            group: 0,
            collision_mask: u16::MAX,
            shape: RigidBodyShape::Sphere,
            size: DVec3::new(1.0, 0.0, 0.0),
            position: DVec3::ZERO,
            rotation: DVec3::ZERO,
            mass: 1.0,
            linear_damping: 0.5,
            angular_damping: 0.5,
            restitution: 0.0,
            friction: 0.5,
            mode,
        }
    }

    pub fn with_shape(mut self, shape: RigidBodyShape, size: DVec3) -> Self {
        self.shape = shape;
        self.size = size;
        self
    }

    pub fn with_transform(mut self, position: DVec3, rotation: DVec3) -> Self {
        self.position = position;
        self.rotation = rotation;
        self
    }

    pub fn with_group(mut self, group: u8, collision_mask: u16) -> Self {
        self.group = group;
        self.collision_mask = collision_mask;
        self
    }

    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    /// 静止姿势下的世界矩阵
    pub fn rest_matrix(&self) -> DMat4 {
        let rotation = DQuat::from_rotation_y(self.rotation.y)
            * DQuat::from_rotation_x(self.rotation.x)
            * DQuat::from_rotation_z(self.rotation.z);
        DMat4::from_rotation_translation(rotation, self.position)
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.mode != RigidBodyMode::FollowBone
    }

    /// 关联骨骼索引
    #[inline]
    pub fn bone_id(&self) -> Option<usize> {
        usize::try_from(self.bone_index).ok()
    }
}

// ============================================================================
// 世界中的刚体
// ============================================================================

/// rapier 世界中的 MMD 刚体
#[derive(Debug, Clone)]
pub struct PhysicsBody {
    /// 对应 RigidBodyDef 的索引
    pub def_index: usize,
    pub bone_index: Option<usize>,
    pub mode: RigidBodyMode,
    pub handle: RigidBodyHandle,
    pub collider: ColliderHandle,
    /// 骨骼全局矩阵 -> 刚体矩阵
    pub offset_matrix: DMat4,
    pub inv_offset_matrix: DMat4,
    /// 静止姿势（用于重置）
    pub initial_transform: Isometry<Real>,
    /// 关联骨骼静止位置
    pub bone_rest_position: DVec3,
    /// 本帧临时跟随骨骼（动作关闭了该骨骼的物理）
    pub follow_override: bool,
}

impl PhysicsBody {
    /// 是否由物理模拟驱动
    #[inline]
    pub fn is_simulated(&self) -> bool {
        self.mode != RigidBodyMode::FollowBone && !self.follow_override
    }

    /// 根据骨骼全局矩阵计算刚体应有的世界变换
    #[inline]
    pub fn body_transform(&self, bone_global: DMat4) -> Isometry<Real> {
        to_isometry(&(bone_global * self.offset_matrix))
    }

    /// 从刚体世界变换反推骨骼全局矩阵
    #[inline]
    pub fn bone_transform(&self, body: &Isometry<Real>) -> DMat4 {
        from_isometry(body) * self.inv_offset_matrix
    }

    /// 只取旋转，位置保持骨骼当前位置
    pub fn bone_transform_rotation_only(&self, body: &Isometry<Real>, bone_position: DVec3) -> DMat4 {
        let mut result = self.bone_transform(body);
        result.w_axis = bone_position.extend(1.0);
        result
    }
}

/// 创建 rapier 刚体
pub fn build_rigid_body(def: &RigidBodyDef, pose: Isometry<Real>, config: &PhysicsConfig) -> RigidBody {
    let body_type = if def.is_dynamic() {
        RigidBodyType::Dynamic
    } else {
        RigidBodyType::KinematicPositionBased
    };
    RigidBodyBuilder::new(body_type)
        .position(pose)
        .linear_damping((def.linear_damping * config.linear_damping_scale) as Real)
        .angular_damping((def.angular_damping * config.angular_damping_scale) as Real)
        .ccd_enabled(false)
        .can_sleep(false)
        .build()
}

/// 创建 rapier 碰撞体
pub fn build_collider(def: &RigidBodyDef, config: &PhysicsConfig) -> Collider {
    let shape = match def.shape {
        RigidBodyShape::Sphere => SharedShape::ball(def.size.x as Real),
        RigidBodyShape::Box => {
            SharedShape::cuboid(def.size.x as Real, def.size.y as Real, def.size.z as Real)
        }
        RigidBodyShape::Capsule => {
            SharedShape::capsule_y((def.size.y / 2.0) as Real, def.size.x as Real)
        }
    };

    let groups = InteractionGroups::new(
        Group::from_bits_truncate(1 << def.group.min(15)),
        Group::from_bits_truncate(def.collision_mask as u32),
    );

    let builder = ColliderBuilder::new(shape)
        .restitution(def.restitution as Real)
        .friction(def.friction as Real)
        .collision_groups(groups)
        .solver_groups(groups);

    if def.is_dynamic() {
        builder
            .mass((def.mass * config.mass_scale).max(MIN_MASS) as Real)
            .build()
    } else {
        builder.density(0.0).build()
    }
}

// ============================================================================
// glam <-> rapier
// ============================================================================

/// glam 矩阵转换为 rapier Isometry（忽略缩放）
pub fn to_isometry(m: &DMat4) -> Isometry<Real> {
    let t = m.w_axis;
    let q = rotation_of(m);
    Isometry::from_parts(
        Translation3::new(t.x as Real, t.y as Real, t.z as Real),
        UnitQuaternion::from_quaternion(Quaternion::new(
            q.w as Real,
            q.x as Real,
            q.y as Real,
            q.z as Real,
        )),
    )
}

/// rapier Isometry 转换为 glam 矩阵
pub fn from_isometry(iso: &Isometry<Real>) -> DMat4 {
    let t = iso.translation.vector;
    let c = iso.rotation.coords;
    let rotation = DQuat::from_xyzw(c.x as f64, c.y as f64, c.z as f64, c.w as f64).normalize();
    DMat4::from_rotation_translation(rotation, DVec3::new(t.x as f64, t.y as f64, t.z as f64))
}

#[inline]
pub fn to_vector(v: DVec3) -> Vector<Real> {
    Vector::new(v.x as Real, v.y as Real, v.z as Real)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_rest_matrix_euler_order() {
        let def = RigidBodyDef::new("rb", 0, RigidBodyMode::Dynamic)
            .with_transform(DVec3::new(1.0, 2.0, 3.0), DVec3::new(FRAC_PI_2, FRAC_PI_2, 0.0));
        let m = def.rest_matrix();
        // Ry · Rx：先绕 X 再绕 Y
        let expected = DQuat::from_rotation_y(FRAC_PI_2) * DQuat::from_rotation_x(FRAC_PI_2);
        assert!((m.transform_vector3(DVec3::Y) - expected * DVec3::Y).length() < 1e-12);
        assert!((m.w_axis.truncate() - DVec3::new(1.0, 2.0, 3.0)).length() < 1e-12);
    }

    #[test]
    fn test_isometry_conversion() {
        let m = DMat4::from_rotation_translation(
            DQuat::from_rotation_z(0.7),
            DVec3::new(-1.0, 0.5, 4.0),
        );
        let back = from_isometry(&to_isometry(&m));
        assert!(back.abs_diff_eq(m, 1e-5));
    }

    #[test]
    fn test_collider_groups() {
        let config = PhysicsConfig::default();
        let def = RigidBodyDef::new("rb", 0, RigidBodyMode::Dynamic).with_group(3, 0b1111_0111);
        let collider = build_collider(&def, &config);
        let groups = collider.collision_groups();
        assert_eq!(groups.memberships.bits(), 1 << 3);
        assert_eq!(groups.filter.bits(), 0b1111_0111);
    }

    #[test]
    fn test_bone_transform_round_trip() {
        let body = PhysicsBody {
            def_index: 0,
            bone_index: Some(0),
            mode: RigidBodyMode::Dynamic,
            handle: RigidBodyHandle::invalid(),
            collider: ColliderHandle::invalid(),
            offset_matrix: DMat4::from_translation(DVec3::new(0.0, 1.0, 0.0)),
            inv_offset_matrix: DMat4::from_translation(DVec3::new(0.0, -1.0, 0.0)),
            initial_transform: Isometry::identity(),
            bone_rest_position: DVec3::ZERO,
            follow_override: false,
        };
        let bone = DMat4::from_rotation_translation(DQuat::from_rotation_x(0.3), DVec3::X);
        let pose = body.body_transform(bone);
        assert!(body.bone_transform(&pose).abs_diff_eq(bone, 1e-5));

        let pinned = body.bone_transform_rotation_only(&pose, DVec3::new(5.0, 0.0, 0.0));
        assert_eq!(pinned.w_axis.truncate(), DVec3::new(5.0, 0.0, 0.0));
    }
}
