//! 骨骼求值
//!
//! 按 BoneSet 预先计算的依赖顺序逐骨骼合成变换：
//! 1. 关键帧 + 骨骼 Morph
//! 2. 固定轴投影
//! 3. 附加父骨骼（付与）旋转 / 平移
//! 4. 本地通道（本地轴基底下的可抵消变换）与父骨骼本地通道的抵消
//! 5. 到达 IK 骨骼时调用 IkSolver，修改链接骨骼并刷新子树
//!
//! 求值器只借用骨骼集合与 Motion，结果写入调用方持有的 BoneDeltas。

use glam::{DMat4, DQuat, DVec3};

use crate::animation::Motion;
use crate::delta::{BoneDelta, BoneDeltas, BoneMorphDelta, MorphDeltas};
use crate::math::quaternion;

use super::bone_link::BoneLink;
use super::bone_set::{BoneSet, Phase};
use super::ik_solver::IkSolver;

/// 骨骼求值器
#[derive(Clone, Copy, Debug)]
pub struct BoneResolver<'a> {
    bones: &'a BoneSet,
    motion: &'a Motion,
}

impl<'a> BoneResolver<'a> {
    pub fn new(bones: &'a BoneSet, motion: &'a Motion) -> Self {
        Self { bones, motion }
    }

    /// 需要求值的骨骼（None 表示全部；否则展开依赖与相关 IK 骨骼）
    pub fn selection<S: AsRef<str>>(&self, filter: Option<&[S]>) -> Vec<bool> {
        match filter {
            Some(names) => self.bones.dependency_closure(names, true),
            None => vec![true; self.bones.len()],
        }
    }

    /// 求值一帧（两个阶段都执行，不含物理）
    pub fn resolve<S: AsRef<str>>(
        &self,
        frame: f64,
        filter: Option<&[S]>,
        morphs: &MorphDeltas,
    ) -> BoneDeltas {
        let selected = self.selection(filter);
        let mut deltas = BoneDeltas::new(self.bones.len(), frame);
        self.resolve_phase(&mut deltas, Phase::BeforePhysics, &selected, morphs);
        self.resolve_phase(&mut deltas, Phase::AfterPhysics, &selected, morphs);
        deltas
    }

    /// 求值一帧但不运行 IK
    pub fn resolve_without_ik(&self, frame: f64, morphs: &MorphDeltas) -> BoneDeltas {
        let selected = vec![true; self.bones.len()];
        let mut deltas = BoneDeltas::new(self.bones.len(), frame);
        for phase in [Phase::BeforePhysics, Phase::AfterPhysics] {
            self.run_phase(&mut deltas, phase, &selected, morphs, false);
        }
        deltas
    }

    /// 求值指定阶段的骨骼
    pub fn resolve_phase(
        &self,
        deltas: &mut BoneDeltas,
        phase: Phase,
        selected: &[bool],
        morphs: &MorphDeltas,
    ) {
        self.run_phase(deltas, phase, selected, morphs, true);
    }

    fn run_phase(
        &self,
        deltas: &mut BoneDeltas,
        phase: Phase,
        selected: &[bool],
        morphs: &MorphDeltas,
        solve_ik: bool,
    ) {
        let frame = deltas.frame;
        for index in self.bones.phase_order(phase) {
            if !selected.get(index).copied().unwrap_or(false) {
                continue;
            }
            let Some(bone) = self.bones.get(index) else {
                continue;
            };

            let delta = self.evaluate(bone, frame, deltas, morphs.bone(index));
            deltas.set(index, delta);

            if !solve_ik {
                continue;
            }
            if let Some(ik) = &bone.ik {
                let enabled = self.motion.is_ik_enabled(&bone.name, frame);
                IkSolver::new(index, ik)
                    .with_enabled(enabled)
                    .solve(self.bones, deltas);
            }
        }
    }

    /// 单个骨骼的合成
    fn evaluate(
        &self,
        bone: &BoneLink,
        frame: f64,
        deltas: &BoneDeltas,
        morph: Option<&BoneMorphDelta>,
    ) -> BoneDelta {
        let keyframe = self.motion.get_bone(&bone.name, frame);
        let morph = morph.copied().unwrap_or_default();
        let mut delta = BoneDelta::rest(bone.index, frame, bone.position);

        // 关键帧与 Morph 分量
        delta.frame_position = keyframe.position;
        delta.frame_rotation = keyframe.rotation;
        delta.frame_scale = keyframe.scale;
        delta.frame_local_position = keyframe.local_position;
        delta.frame_local_rotation = keyframe.local_rotation;
        delta.frame_local_scale = keyframe.local_scale;
        delta.morph_position = morph.position;
        delta.morph_rotation = morph.rotation;
        delta.morph_scale = morph.scale;
        delta.morph_local_position = morph.local_position;
        delta.morph_local_rotation = morph.local_rotation;
        delta.morph_local_scale = morph.local_scale;

        let mut base = quaternion::normalize_or_identity(keyframe.rotation * morph.rotation);
        if let Some(axis) = bone.fixed_axis {
            base = quaternion::to_fixed_axis(base, axis);
        }
        delta.base_rotation = base;

        // 附加父骨骼
        if let (Some(source), Some(append)) = (
            bone.append_parent_id().and_then(|i| deltas.get(i)),
            bone.append.as_ref(),
        ) {
            let local = bone.is_append_local();
            if bone.is_append_rotate() {
                let rotation = if local {
                    source.animated_rotation()
                } else {
                    source.effect_rotation
                };
                delta.append_rotation = quaternion::muled_scalar(rotation, append.rate);
            }
            if bone.is_append_translate() {
                let position = if local {
                    source.animated_position()
                } else {
                    source.effect_position
                };
                delta.append_position = position * append.rate;
            }
        }

        // 本地通道，在本地轴基底下表达
        let basis = bone.local_axes_rotation().unwrap_or(DQuat::IDENTITY);
        let local_rotation = keyframe.local_rotation * morph.local_rotation;
        delta.cancel_rotation = (basis * local_rotation * basis.inverse()).normalize();
        delta.cancel_position = basis * (keyframe.local_position + morph.local_position);
        delta.cancel_scale = keyframe.local_scale * morph.local_scale;

        let parent = bone.parent_id().and_then(|p| deltas.get(p));
        if let Some(parent) = parent {
            delta.parent_cancel_rotation = parent.cancel_rotation;
            delta.parent_cancel_position = parent.cancel_position;
            delta.parent_cancel_scale = parent.cancel_scale;
        }
        let parent_global = parent.map_or(DMat4::IDENTITY, |p| p.global_matrix);

        delta.refresh_effect();
        delta.update_matrices(parent_global, rest_offset(self.bones, bone), bone.position);
        delta
    }
}

/// 父骨骼静止位置到自身静止位置的偏移
fn rest_offset(bones: &BoneSet, bone: &BoneLink) -> DVec3 {
    let parent_rest = bone
        .parent_id()
        .and_then(|p| bones.get(p))
        .map_or(DVec3::ZERO, |p| p.position);
    bone.position - parent_rest
}

/// 重新计算 `index` 及其已求值后代的矩阵（IK 修改旋转后调用）
///
/// 由物理驱动的骨骼保持不变。
pub(crate) fn refresh_subtree(bones: &BoneSet, deltas: &mut BoneDeltas, index: usize) {
    refresh_bone(bones, deltas, index);
    for child in bones.descendants(index) {
        if deltas.contains(child) {
            refresh_bone(bones, deltas, child);
        }
    }
}

fn refresh_bone(bones: &BoneSet, deltas: &mut BoneDeltas, index: usize) {
    let Some(bone) = bones.get(index) else {
        return;
    };
    let parent_global = bone
        .parent_id()
        .and_then(|p| deltas.global_matrix(p))
        .unwrap_or(DMat4::IDENTITY);
    let offset = rest_offset(bones, bone);
    if let Some(delta) = deltas.get_mut(index) {
        if delta.physics_driven {
            return;
        }
        delta.refresh_effect();
        delta.update_matrices(parent_global, offset, bone.position);
    }
}
