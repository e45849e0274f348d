//! 单帧求值流水线
//!
//! Morph → 物理前骨骼（含 IK）→ 物理 → 物理后骨骼
//!
//! 不含物理的求值只读取模型与 Motion，多个帧可以并行求值。

use rayon::prelude::*;

use crate::animation::Motion;
use crate::delta::{BoneDeltas, MorphDeltas};
use crate::model::MmdModel;
use crate::morph::MorphResolver;
use crate::physics::PhysicsBridge;
use crate::skeleton::{BoneResolver, Phase};

/// 动画采样率
pub const ANIMATION_FPS: f64 = 30.0;

/// 一帧的求值结果
#[derive(Clone, Debug)]
pub struct EvaluationResult {
    pub frame: f64,
    pub bones: BoneDeltas,
    pub morphs: MorphDeltas,
    /// 本帧执行的物理子步数
    pub physics_steps: u32,
}

/// 求值器：借用模型，按需持有物理世界
pub struct Evaluator<'a> {
    model: &'a MmdModel,
    physics: Option<PhysicsBridge>,
    animation_fps: f64,
    /// 物理世界是否已对齐到骨骼姿势
    physics_ready: bool,
}

impl<'a> Evaluator<'a> {
    /// 创建求值器，模型带刚体时同时构建物理世界
    pub fn new(model: &'a MmdModel) -> Self {
        let physics = model.has_physics().then(|| PhysicsBridge::new(model));
        Self {
            model,
            physics,
            animation_fps: ANIMATION_FPS,
            physics_ready: false,
        }
    }

    /// 不构建物理世界
    pub fn without_physics(model: &'a MmdModel) -> Self {
        Self {
            model,
            physics: None,
            animation_fps: ANIMATION_FPS,
            physics_ready: false,
        }
    }

    /// 设置动画采样率（每次 resolve 推进 1 / fps 秒物理时间）
    pub fn with_animation_fps(mut self, fps: f64) -> Self {
        if fps > 0.0 {
            self.animation_fps = fps;
        }
        self
    }

    #[inline]
    pub fn model(&self) -> &MmdModel {
        self.model
    }

    pub fn physics(&self) -> Option<&PhysicsBridge> {
        self.physics.as_ref()
    }

    pub fn physics_mut(&mut self) -> Option<&mut PhysicsBridge> {
        self.physics.as_mut()
    }

    /// 下一次 resolve 时把刚体重新对齐到骨骼姿势
    pub fn reset_physics(&mut self) {
        self.physics_ready = false;
    }

    /// 求值一帧
    ///
    /// `filter` 为 None 时求值全部骨骼；否则只求值指定骨骼及其依赖。
    pub fn resolve<S: AsRef<str>>(
        &mut self,
        motion: &Motion,
        frame: f64,
        filter: Option<&[S]>,
        enable_physics: bool,
    ) -> EvaluationResult {
        let model = self.model;
        let morphs = MorphResolver::new(model).resolve(motion, frame);
        let resolver = BoneResolver::new(model.bones(), motion);
        let selected = resolver.selection(filter);

        let mut bones = BoneDeltas::new(model.bones().len(), frame);
        resolver.resolve_phase(&mut bones, Phase::BeforePhysics, &selected, &morphs);

        let mut physics_steps = 0;
        if let Some(physics) = self.physics.as_mut() {
            if !self.physics_ready {
                physics.reset(&bones);
                self.physics_ready = true;
            }
            for rb in model.rigid_bodies() {
                let Some(bone) = rb.bone_id().and_then(|i| model.bones().get(i)) else {
                    continue;
                };
                physics.set_bone_follow(bone.index, motion.is_physics_disabled(&bone.name, frame));
            }
            physics_steps = physics.step(1.0 / self.animation_fps, enable_physics, &mut bones);
        }

        resolver.resolve_phase(&mut bones, Phase::AfterPhysics, &selected, &morphs);

        EvaluationResult {
            frame,
            bones,
            morphs,
            physics_steps,
        }
    }

    /// 并行求值多个帧（不含物理）
    pub fn resolve_frames(&self, motion: &Motion, frames: &[f64]) -> Vec<EvaluationResult> {
        let model = self.model;
        frames
            .par_iter()
            .map(|&frame| resolve_kinematic(model, motion, frame))
            .collect()
    }
}

/// 不含物理的单帧求值
pub fn resolve_kinematic(model: &MmdModel, motion: &Motion, frame: f64) -> EvaluationResult {
    let morphs = MorphResolver::new(model).resolve(motion, frame);
    let bones = BoneResolver::new(model.bones(), motion).resolve::<&str>(frame, None, &morphs);
    EvaluationResult {
        frame,
        bones,
        morphs,
        physics_steps: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{BoneKeyframe, MorphKeyframe};
    use crate::morph::{BoneMorphOffset, Morph, MorphOffsets};
    use crate::physics::{RigidBodyDef, RigidBodyMode, RigidBodyShape};
    use crate::skeleton::{BoneFlags, BoneLink, BoneSet};
    use glam::DVec3;

    fn dancer() -> MmdModel {
        let bones = BoneSet::new(vec![
            BoneLink::new("center", 0, DVec3::new(0.0, 8.0, 0.0)).with_flags(BoneFlags::MOVABLE),
            BoneLink::new("head", 1, DVec3::new(0.0, 15.0, 0.0)).with_parent(0),
        ])
        .unwrap();
        let mut lift = BoneMorphOffset::new(1);
        lift.position = DVec3::new(0.0, 2.0, 0.0);
        MmdModel::new("dancer", bones)
            .with_morphs(vec![Morph::new("lift", MorphOffsets::Bone(vec![lift]))])
            .unwrap()
    }

    fn walk() -> Motion {
        let mut motion = Motion::new();
        motion.insert_bone("center", BoneKeyframe::new(0));
        motion.insert_bone("center", BoneKeyframe::new(100).with_position(DVec3::new(10.0, 0.0, 0.0)));
        motion
    }

    #[test]
    fn test_linear_translation() {
        let model = dancer();
        let motion = walk();
        let mut evaluator = Evaluator::new(&model);
        assert!(evaluator.physics().is_none());

        let result = evaluator.resolve::<&str>(&motion, 50.0, None, true);
        assert!((result.bones.global_position(0).unwrap() - DVec3::new(5.0, 8.0, 0.0)).length() < 1e-9);
        let result = evaluator.resolve::<&str>(&motion, 25.0, None, true);
        assert!((result.bones.global_position(0).unwrap() - DVec3::new(2.5, 8.0, 0.0)).length() < 1e-9);
        assert_eq!(result.physics_steps, 0);
    }

    #[test]
    fn test_bone_morph_flows_into_bones() {
        let model = dancer();
        let mut motion = walk();
        motion.insert_morph("lift", MorphKeyframe::new(0, 0.5));

        let result = Evaluator::new(&model).resolve::<&str>(&motion, 0.0, None, false);
        assert!((result.morphs.bones[1].position.y - 1.0).abs() < 1e-12);
        assert!((result.bones.global_position(1).unwrap() - DVec3::new(0.0, 16.0, 0.0)).length() < 1e-9);
    }

    #[test]
    fn test_parallel_frames_match_serial() {
        let model = dancer();
        let motion = walk();
        let evaluator = Evaluator::without_physics(&model);
        let frames: Vec<f64> = (0..20).map(|i| i as f64 * 5.5).collect();

        let parallel = evaluator.resolve_frames(&motion, &frames);
        assert_eq!(parallel.len(), frames.len());
        for (result, &frame) in parallel.iter().zip(&frames) {
            let serial = resolve_kinematic(&model, &motion, frame);
            assert_eq!(result.frame, frame);
            assert_eq!(result.bones.global_matrix(1), serial.bones.global_matrix(1));
        }
    }

    #[test]
    fn test_filter_skips_unrelated_bones() {
        let model = dancer();
        let motion = walk();
        let result = Evaluator::new(&model).resolve(&motion, 10.0, Some(&["center"][..]), false);
        assert!(result.bones.contains(0));
        assert!(!result.bones.contains(1));
    }

    /// 0: root，1: hair（动态刚体），2: hair_tip（物理后变形）
    fn hair_model() -> MmdModel {
        let bones = BoneSet::new(vec![
            BoneLink::new("root", 0, DVec3::new(0.0, 10.0, 0.0)),
            BoneLink::new("hair", 1, DVec3::new(0.0, 9.0, 0.0)).with_parent(0),
            BoneLink::new("hair_tip", 2, DVec3::new(0.0, 7.0, 0.0))
                .with_parent(1)
                .with_flags(BoneFlags::DEFORM_AFTER_PHYSICS),
        ])
        .unwrap();
        let bodies = vec![RigidBodyDef::new("hair_rb", 1, RigidBodyMode::Dynamic)
            .with_shape(RigidBodyShape::Sphere, DVec3::new(0.5, 0.0, 0.0))
            .with_transform(DVec3::new(0.0, 9.0, 0.0), DVec3::ZERO)
            .with_group(2, 0)];
        MmdModel::new("hair", bones).with_physics(bodies, Vec::new()).unwrap()
    }

    #[test]
    fn test_after_physics_bones_follow_physics() {
        let model = hair_model();
        let motion = Motion::new();
        let mut evaluator = Evaluator::new(&model);

        let mut result = evaluator.resolve::<&str>(&motion, 0.0, None, true);
        for frame in 1..10 {
            result = evaluator.resolve::<&str>(&motion, frame as f64, None, true);
        }
        assert_eq!(result.physics_steps, 2);
        let hair = result.bones.get(1).unwrap();
        assert!(hair.physics_driven);
        // 无关节约束的刚体在重力下下落
        assert!(hair.global_position.y < 9.0);
        let tip = result.bones.global_position(2).unwrap();
        let expected = hair.global_matrix.transform_point3(DVec3::new(0.0, -2.0, 0.0));
        assert!((tip - expected).length() < 1e-9);
    }

    #[test]
    fn test_physics_disabled_by_motion() {
        let model = hair_model();
        let mut motion = Motion::new();
        let mut keyframe = BoneKeyframe::new(0);
        keyframe.disable_physics = true;
        motion.insert_bone("hair", keyframe);

        let mut evaluator = Evaluator::new(&model);
        let result = evaluator.resolve::<&str>(&motion, 0.0, None, true);
        assert!(!result.bones.get(1).unwrap().physics_driven);
        assert!((result.bones.global_position(1).unwrap() - DVec3::new(0.0, 9.0, 0.0)).length() < 1e-9);
    }
}
