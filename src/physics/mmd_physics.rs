//! MMD 物理世界管理器
//!
//! 以 rapier 作为刚体世界，流程与动画帧对齐：
//! 每帧 [sync_bodies → 固定步长 step × N → 速度钳制 → sync_bones]
//!
//! 物理在模型内部坐标系中运行，不做坐标转换。

use std::num::NonZeroUsize;

use glam::{DMat4, DVec3};
use rapier3d::math::{Real, Vector};
use rapier3d::prelude::*;

use crate::delta::BoneDeltas;
use crate::model::MmdModel;

use super::config::{get_config, PhysicsConfig};
use super::mmd_joint::build_joint;
use super::mmd_rigid_body::{
    build_collider, build_rigid_body, from_isometry, to_isometry, to_vector, PhysicsBody,
    RigidBodyMode,
};

/// 子步数计算时的取整容差
const STEP_TOLERANCE: f64 = 1e-4;

/// 物理桥：持有 rapier 世界，在骨骼与刚体之间同步
pub struct PhysicsBridge {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,

    bodies: Vec<PhysicsBody>,
    joint_count: usize,

    config: PhysicsConfig,
    gravity: Vector<Real>,
    fps: f64,
    max_sub_steps: u32,
    /// 未消耗的模拟时间（秒）
    accumulator: f64,
}

impl PhysicsBridge {
    /// 根据模型的刚体与关节构建物理世界（刚体位于静止姿势）
    pub fn new(model: &MmdModel) -> Self {
        let config = get_config();
        let bones = model.bones();

        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = (1.0 / config.physics_fps) as Real;
        if let Some(iterations) = NonZeroUsize::new(config.solver_iterations) {
            integration_parameters.num_solver_iterations = iterations;
        }

        let mut rigid_body_set = RigidBodySet::new();
        let mut collider_set = ColliderSet::new();
        let mut impulse_joint_set = ImpulseJointSet::new();

        let mut bodies = Vec::with_capacity(model.rigid_bodies().len());
        for (def_index, def) in model.rigid_bodies().iter().enumerate() {
            let bone_index = def.bone_id().filter(|&i| i < bones.len());
            let bone_rest = bone_index
                .and_then(|i| bones.get(i))
                .map_or(DVec3::ZERO, |b| b.position);

            let rest = def.rest_matrix();
            let offset_matrix = match bone_index {
                Some(_) => DMat4::from_translation(-bone_rest) * rest,
                None => rest,
            };
            let initial_transform = to_isometry(&rest);

            let handle = rigid_body_set.insert(build_rigid_body(def, initial_transform, &config));
            let collider = collider_set.insert_with_parent(
                build_collider(def, &config),
                handle,
                &mut rigid_body_set,
            );

            bodies.push(PhysicsBody {
                def_index,
                bone_index,
                mode: def.mode,
                handle,
                collider,
                offset_matrix,
                inv_offset_matrix: offset_matrix.inverse(),
                initial_transform,
                bone_rest_position: bone_rest,
                follow_override: false,
            });
        }

        let mut joint_count = 0;
        if config.joints_enabled {
            for joint in model.joints() {
                let (Ok(a), Ok(b)) = (
                    usize::try_from(joint.rigid_body_a),
                    usize::try_from(joint.rigid_body_b),
                ) else {
                    continue;
                };
                if a == b {
                    log::warn!("Joint '{}' connects a rigid body to itself, skipped", joint.name);
                    continue;
                }
                let (Some(body_a), Some(body_b)) = (bodies.get(a), bodies.get(b)) else {
                    continue;
                };
                let rest_a = model.rigid_bodies()[body_a.def_index].rest_matrix();
                let rest_b = model.rigid_bodies()[body_b.def_index].rest_matrix();
                let generic = build_joint(joint, rest_a, rest_b, &config);
                impulse_joint_set.insert(body_a.handle, body_b.handle, generic, true);
                joint_count += 1;
            }
        }

        let count = |mode: RigidBodyMode| bodies.iter().filter(|b| b.mode == mode).count();
        log::info!(
            "Physics built for '{}': {} rigid bodies ({} follow + {} dynamic + {} dynamic-with-bone), {} joints",
            model.name,
            bodies.len(),
            count(RigidBodyMode::FollowBone),
            count(RigidBodyMode::Dynamic),
            count(RigidBodyMode::DynamicWithBonePosition),
            joint_count
        );

        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set,
            collider_set,
            impulse_joint_set,
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            bodies,
            joint_count,
            gravity: Vector::new(0.0, config.gravity_y as Real, 0.0),
            fps: config.physics_fps,
            max_sub_steps: config.max_substep_count,
            config,
            accumulator: 0.0,
        }
    }

    /// 覆盖重力、物理 FPS 与最大子步数
    pub fn configure(&mut self, gravity: DVec3, fps: f64, max_sub_steps: u32) {
        self.gravity = to_vector(gravity);
        if fps > 0.0 {
            self.fps = fps;
            self.integration_parameters.dt = (1.0 / fps) as Real;
        }
        self.max_sub_steps = max_sub_steps.max(1);
    }

    #[inline]
    pub fn rigid_body_count(&self) -> usize {
        self.bodies.len()
    }

    #[inline]
    pub fn joint_count(&self) -> usize {
        self.joint_count
    }

    #[inline]
    pub fn bodies(&self) -> &[PhysicsBody] {
        &self.bodies
    }

    /// 刚体当前世界变换
    pub fn body_transform(&self, index: usize) -> Option<DMat4> {
        let body = self.bodies.get(index)?;
        let rb = self.rigid_body_set.get(body.handle)?;
        Some(from_isometry(rb.position()))
    }

    /// 本帧让关联到 `bone_index` 的动态刚体跟随骨骼
    pub fn set_bone_follow(&mut self, bone_index: usize, follow: bool) {
        for body in &mut self.bodies {
            if body.bone_index == Some(bone_index) {
                body.follow_override = follow;
            }
        }
    }

    /// 推进一帧
    ///
    /// 启用时按固定步长消耗累计时间，返回实际执行的子步数；
    /// 关闭时只同步刚体到骨骼姿势，不回写骨骼。
    pub fn step(&mut self, dt: f64, enabled: bool, deltas: &mut BoneDeltas) -> u32 {
        self.sync_bodies(deltas, !enabled);
        if !enabled {
            self.accumulator = 0.0;
            return 0;
        }

        let fixed_dt = 1.0 / self.fps;
        self.accumulator += dt.max(0.0);
        let needed = (self.accumulator / fixed_dt + STEP_TOLERANCE).floor() as u32;
        let steps = needed.min(self.max_sub_steps);
        if steps < needed {
            // 超出子步预算的时间直接丢弃
            self.accumulator = 0.0;
        } else {
            self.accumulator = (self.accumulator - steps as f64 * fixed_dt).max(0.0);
        }

        self.integration_parameters.dt = fixed_dt as Real;
        for _ in 0..steps {
            self.step_once();
        }
        self.clamp_velocities();
        self.sync_bones(deltas);

        if self.config.debug_log {
            log::debug!("Physics step: dt={:.4}, sub-steps={}, carry={:.4}", dt, steps, self.accumulator);
        }
        steps
    }

    /// 所有刚体回到当前骨骼姿势并清零速度
    pub fn reset(&mut self, deltas: &BoneDeltas) {
        self.accumulator = 0.0;
        for body in &self.bodies {
            let pose = body
                .bone_index
                .and_then(|i| deltas.global_matrix(i))
                .map_or(body.initial_transform, |global| body.body_transform(global));
            if let Some(rb) = self.rigid_body_set.get_mut(body.handle) {
                rb.set_position(pose, true);
                rb.set_linvel(Vector::zeros(), true);
                rb.set_angvel(Vector::zeros(), true);
                rb.reset_forces(true);
                rb.reset_torques(true);
            }
        }
    }

    // ========================================
    // 内部流程
    // ========================================

    /// 跟随骨骼的刚体移动到骨骼姿势；`teleport_all` 时动态刚体也瞬移并清零速度
    fn sync_bodies(&mut self, deltas: &BoneDeltas, teleport_all: bool) {
        for body in &self.bodies {
            let Some(global) = body.bone_index.and_then(|i| deltas.global_matrix(i)) else {
                continue;
            };
            let Some(rb) = self.rigid_body_set.get_mut(body.handle) else {
                continue;
            };
            let pose = body.body_transform(global);
            match body.mode {
                RigidBodyMode::FollowBone if teleport_all => rb.set_position(pose, true),
                RigidBodyMode::FollowBone => rb.set_next_kinematic_position(pose),
                _ if teleport_all || body.follow_override => {
                    rb.set_position(pose, true);
                    rb.set_linvel(Vector::zeros(), true);
                    rb.set_angvel(Vector::zeros(), true);
                }
                _ => {}
            }
        }
    }

    fn step_once(&mut self) {
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
    }

    /// 限制刚体速度，防止物理爆炸
    fn clamp_velocities(&mut self) {
        let max_linear = self.config.max_linear_velocity as Real;
        let max_angular = self.config.max_angular_velocity as Real;
        for body in self.bodies.iter().filter(|b| b.is_simulated()) {
            let Some(rb) = self.rigid_body_set.get_mut(body.handle) else {
                continue;
            };
            let linvel = *rb.linvel();
            let speed = linvel.norm();
            if speed > max_linear {
                rb.set_linvel(linvel * (max_linear / speed), true);
            }
            let angvel = *rb.angvel();
            let speed = angvel.norm();
            if speed > max_angular {
                rb.set_angvel(angvel * (max_angular / speed), true);
            }
        }
    }

    /// 动态刚体的变换写回骨骼
    fn sync_bones(&self, deltas: &mut BoneDeltas) {
        for body in self.bodies.iter().filter(|b| b.is_simulated()) {
            let Some(bone_index) = body.bone_index else {
                continue;
            };
            let Some(rb) = self.rigid_body_set.get(body.handle) else {
                continue;
            };
            let Some(delta) = deltas.get_mut(bone_index) else {
                continue;
            };
            let pose = rb.position();
            let global = match body.mode {
                RigidBodyMode::DynamicWithBonePosition => {
                    body.bone_transform_rotation_only(pose, delta.global_position)
                }
                _ => body.bone_transform(pose),
            };
            delta.set_global(global, body.bone_rest_position);
            delta.physics_driven = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::BoneDelta;
    use crate::physics::{JointDef, RigidBodyDef, RigidBodyShape};
    use crate::skeleton::{BoneLink, BoneSet};

    /// 0: root（跟随），1: tail（动态，用关节挂在 root 下）
    fn model() -> MmdModel {
        let bones = BoneSet::new(vec![
            BoneLink::new("root", 0, DVec3::new(0.0, 10.0, 0.0)),
            BoneLink::new("tail", 1, DVec3::new(0.0, 8.0, 0.0)).with_parent(0),
        ])
        .unwrap();
        let bodies = vec![
            RigidBodyDef::new("root_rb", 0, RigidBodyMode::FollowBone)
                .with_shape(RigidBodyShape::Sphere, DVec3::new(0.5, 0.0, 0.0))
                .with_transform(DVec3::new(0.0, 10.0, 0.0), DVec3::ZERO)
                .with_group(0, 0),
            RigidBodyDef::new("tail_rb", 1, RigidBodyMode::Dynamic)
                .with_shape(RigidBodyShape::Capsule, DVec3::new(0.3, 1.0, 0.0))
                .with_transform(DVec3::new(0.0, 8.0, 0.0), DVec3::ZERO)
                .with_group(1, 0),
        ];
        let joints = vec![JointDef::new("tail_joint", 0, 1)
            .with_transform(DVec3::new(0.0, 9.0, 0.0), DVec3::ZERO)
            .with_angular_limits(DVec3::splat(-1.0), DVec3::splat(1.0))];
        MmdModel::new("tail", bones).with_physics(bodies, joints).unwrap()
    }

    fn rest_deltas(model: &MmdModel) -> BoneDeltas {
        let mut deltas = BoneDeltas::new(model.bones().len(), 0.0);
        for bone in model.bones().iter() {
            deltas.set(bone.index, BoneDelta::rest(bone.index, 0.0, bone.position));
        }
        deltas
    }

    #[test]
    fn test_build_counts() {
        let model = model();
        let bridge = PhysicsBridge::new(&model);
        assert_eq!(bridge.rigid_body_count(), 2);
        assert_eq!(bridge.joint_count(), 1);
    }

    #[test]
    fn test_fixed_step_accumulator() {
        let model = model();
        let mut bridge = PhysicsBridge::new(&model);
        let mut deltas = rest_deltas(&model);
        // 30 fps 动画驱动 60 Hz 物理：每帧两步
        assert_eq!(bridge.step(1.0 / 30.0, true, &mut deltas), 2);
        // 半个物理步累积到下一帧
        assert_eq!(bridge.step(1.0 / 120.0, true, &mut deltas), 0);
        assert_eq!(bridge.step(1.0 / 120.0, true, &mut deltas), 1);
        // 超过子步预算
        assert_eq!(bridge.step(1.0, true, &mut deltas), 5);
    }

    #[test]
    fn test_dynamic_body_writes_back() {
        let model = model();
        let mut bridge = PhysicsBridge::new(&model);
        let mut deltas = rest_deltas(&model);
        bridge.reset(&deltas);
        for _ in 0..10 {
            bridge.step(1.0 / 30.0, true, &mut deltas);
        }
        let tail = deltas.get(1).unwrap();
        assert!(tail.physics_driven);
        assert!(!deltas.get(0).unwrap().physics_driven);
        assert!(tail.global_position.is_finite());
    }

    #[test]
    fn test_disabled_physics_follows_bones() {
        let model = model();
        let mut bridge = PhysicsBridge::new(&model);
        let mut deltas = rest_deltas(&model);
        assert_eq!(bridge.step(1.0 / 30.0, false, &mut deltas), 0);
        assert!(!deltas.get(1).unwrap().physics_driven);
        let tail = bridge.body_transform(1).unwrap();
        assert!((tail.w_axis.truncate() - DVec3::new(0.0, 8.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_deterministic_steps() {
        let model = model();
        let run = || {
            let mut bridge = PhysicsBridge::new(&model);
            let mut deltas = rest_deltas(&model);
            for _ in 0..20 {
                bridge.step(1.0 / 30.0, true, &mut deltas);
            }
            deltas.get(1).unwrap().global_matrix
        };
        assert_eq!(run(), run());
    }
}
