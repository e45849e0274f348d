//! Morph 求值
//!
//! 流程:
//! 1. 读取每个 Morph 轨道在当前帧的插值权重
//! 2. 按类型分发累加顶点 / UV / 骨骼偏移
//! 3. Group Morph 递归展开子项（权重相乘，防止循环引用）
//! 4. 材质 Morph 先应用全部乘算，再应用全部加算

use glam::DVec3;

use crate::animation::Motion;
use crate::delta::MorphDeltas;
use crate::math::quaternion;
use crate::model::MmdModel;

use super::{
    BoneMorphOffset, MaterialMorphOffset, MaterialOperation, MorphOffsets, UvMorphOffset,
    VertexMorphOffset,
};

/// 权重低于此值的 Morph 不参与计算
const MIN_RATIO: f64 = 1e-12;

/// Morph 求值器（只借用模型）
pub struct MorphResolver<'a> {
    model: &'a MmdModel,
}

/// 待应用的材质偏移
type PendingMaterial<'m> = (&'m MaterialMorphOffset, f64);

impl<'a> MorphResolver<'a> {
    pub fn new(model: &'a MmdModel) -> Self {
        Self { model }
    }

    /// 当前帧各 Morph 的权重（只返回模型中存在且非零的项）
    pub fn resolve_weights(&self, motion: &Motion, frame: f64) -> Vec<(usize, f64)> {
        let mut weights: Vec<(usize, f64)> = motion
            .morph_names()
            .iter()
            .filter_map(|name| {
                let index = self.model.find_morph_by_name(name)?;
                let ratio = motion.get_morph(name, frame);
                (ratio.abs() >= MIN_RATIO).then_some((index, ratio))
            })
            .collect();
        weights.sort_by_key(|(index, _)| *index);
        weights
    }

    /// 读取 Motion 并累加
    pub fn resolve(&self, motion: &Motion, frame: f64) -> MorphDeltas {
        let weights = self.resolve_weights(motion, frame);
        self.resolve_with_weights(&weights, frame)
    }

    /// 用给定权重累加
    pub fn resolve_with_weights(&self, weights: &[(usize, f64)], frame: f64) -> MorphDeltas {
        let model = self.model;
        let mut deltas = MorphDeltas::new(
            model.vertex_count,
            model.bones().len(),
            model.materials.len(),
            frame,
        );
        let mut materials: Vec<PendingMaterial<'a>> = Vec::new();
        let mut visiting = vec![false; model.morphs().len()];

        for &(index, ratio) in weights {
            self.apply_morph(index, ratio, &mut deltas, &mut materials, &mut visiting);
        }

        // 乘算必须先于加算
        for (offset, ratio) in materials.iter().filter(|(o, _)| o.operation == MaterialOperation::Multiply) {
            for_each_material(&mut deltas, offset.material_index, |m| {
                m.apply_multiply(&offset.values, *ratio)
            });
        }
        for (offset, ratio) in materials.iter().filter(|(o, _)| o.operation == MaterialOperation::Add) {
            for_each_material(&mut deltas, offset.material_index, |m| {
                m.apply_add(&offset.values, *ratio)
            });
        }

        deltas
    }

    fn apply_morph(
        &self,
        index: usize,
        ratio: f64,
        deltas: &mut MorphDeltas,
        materials: &mut Vec<PendingMaterial<'a>>,
        visiting: &mut [bool],
    ) {
        if ratio.abs() < MIN_RATIO {
            return;
        }
        let model: &'a MmdModel = self.model;
        let Some(morph) = model.morphs().get(index) else {
            return;
        };

        match &morph.offsets {
            MorphOffsets::Group(children) => {
                if visiting[index] {
                    log::warn!("Group morph '{}' is cyclic, skipped", morph.name);
                    return;
                }
                visiting[index] = true;
                for child in children {
                    if child.morph_index >= 0 {
                        self.apply_morph(
                            child.morph_index as usize,
                            ratio * child.ratio,
                            deltas,
                            materials,
                            visiting,
                        );
                    }
                }
                visiting[index] = false;
            }
            MorphOffsets::Vertex(offsets) => {
                apply_vertex(offsets, ratio, deltas, |d, v| d.position += v)
            }
            MorphOffsets::AfterVertex(offsets) => {
                apply_vertex(offsets, ratio, deltas, |d, v| d.after_position += v)
            }
            MorphOffsets::Uv(offsets) => apply_uv(offsets, ratio, deltas, false),
            MorphOffsets::Uv1(offsets) => apply_uv(offsets, ratio, deltas, true),
            MorphOffsets::Bone(offsets) => apply_bone(offsets, ratio, deltas),
            MorphOffsets::Material(offsets) => {
                materials.extend(offsets.iter().map(|o| (o, ratio)));
            }
        }
    }
}

fn apply_vertex<F>(offsets: &[VertexMorphOffset], ratio: f64, deltas: &mut MorphDeltas, add: F)
where
    F: Fn(&mut crate::delta::VertexMorphDelta, DVec3),
{
    for offset in offsets {
        if offset.vertex_index < 0 {
            continue;
        }
        if let Some(delta) = deltas.vertices.get_mut(offset.vertex_index as usize) {
            add(delta, offset.offset * ratio);
        }
    }
}

fn apply_uv(offsets: &[UvMorphOffset], ratio: f64, deltas: &mut MorphDeltas, uv1: bool) {
    for offset in offsets {
        if offset.vertex_index < 0 {
            continue;
        }
        if let Some(delta) = deltas.vertices.get_mut(offset.vertex_index as usize) {
            if uv1 {
                delta.uv1 += offset.offset * ratio;
            } else {
                delta.uv += offset.offset * ratio;
            }
        }
    }
}

/// 骨骼 Morph：平移与缩放按比例相加，旋转按欧拉角缩放后右乘
fn apply_bone(offsets: &[BoneMorphOffset], ratio: f64, deltas: &mut MorphDeltas) {
    for offset in offsets {
        if offset.bone_index < 0 {
            continue;
        }
        let Some(delta) = deltas.bones.get_mut(offset.bone_index as usize) else {
            continue;
        };
        delta.position += offset.position * ratio;
        delta.local_position += offset.local_position * ratio;

        let rotation = quaternion::from_euler(quaternion::to_euler(offset.rotation) * ratio);
        delta.rotation = (rotation * delta.rotation).normalize();
        let local_rotation =
            quaternion::from_euler(quaternion::to_euler(offset.local_rotation) * ratio);
        delta.local_rotation = (local_rotation * delta.local_rotation).normalize();

        delta.scale += offset.scale * ratio;
        delta.local_scale += offset.local_scale * ratio;
    }
}

fn for_each_material<F>(deltas: &mut MorphDeltas, material_index: i32, mut apply: F)
where
    F: FnMut(&mut crate::delta::MaterialMorphDelta),
{
    if material_index < 0 {
        deltas.materials.iter_mut().for_each(apply);
    } else if let Some(m) = deltas.materials.get_mut(material_index as usize) {
        apply(m);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::MorphKeyframe;
    use crate::model::{Material, MaterialValues};
    use crate::morph::{GroupMorphOffset, Morph};
    use crate::skeleton::{BoneLink, BoneSet};
    use glam::{DQuat, DVec4};

    fn model() -> MmdModel {
        let bones = BoneSet::new(vec![BoneLink::new("head", 0, DVec3::ZERO)]).unwrap();
        let mut bone_offset = BoneMorphOffset::new(0);
        bone_offset.position = DVec3::new(0.0, 2.0, 0.0);
        bone_offset.rotation = DQuat::from_rotation_y(std::f64::consts::FRAC_PI_2);
        bone_offset.scale = DVec3::splat(1.0);

        let tint = |x: f64| MaterialValues {
            diffuse: DVec4::new(x, x, x, x),
            ..MaterialValues::zero()
        };

        MmdModel::new("m", bones)
            .with_vertex_count(3)
            .with_materials(vec![Material::new("face"), Material::new("body")])
            .with_morphs(vec![
                Morph::new(
                    "smile",
                    MorphOffsets::Vertex(vec![
                        VertexMorphOffset { vertex_index: 1, offset: DVec3::new(0.0, 1.0, 0.0) },
                        VertexMorphOffset { vertex_index: 99, offset: DVec3::ONE },
                    ]),
                ),
                Morph::new(
                    "uv",
                    MorphOffsets::Uv1(vec![UvMorphOffset { vertex_index: 0, offset: DVec4::X }]),
                ),
                Morph::new("nod", MorphOffsets::Bone(vec![bone_offset])),
                Morph::new(
                    "dark",
                    MorphOffsets::Material(vec![MaterialMorphOffset {
                        material_index: -1,
                        operation: MaterialOperation::Multiply,
                        values: MaterialValues { diffuse: DVec4::ZERO, ..MaterialValues::one() },
                    }]),
                ),
                Morph::new(
                    "glow",
                    MorphOffsets::Material(vec![MaterialMorphOffset {
                        material_index: 1,
                        operation: MaterialOperation::Add,
                        values: tint(0.2),
                    }]),
                ),
                Morph::new(
                    "combo",
                    MorphOffsets::Group(vec![
                        GroupMorphOffset { morph_index: 0, ratio: 0.5 },
                        GroupMorphOffset { morph_index: 5, ratio: 1.0 },
                    ]),
                ),
            ])
            .unwrap()
    }

    #[test]
    fn test_vertex_morph_ignores_out_of_range() {
        let model = model();
        let deltas = MorphResolver::new(&model).resolve_with_weights(&[(0, 0.5)], 0.0);
        assert!((deltas.vertices[1].position.y - 0.5).abs() < 1e-12);
        assert_eq!(deltas.active_vertex_count(), 1);
    }

    #[test]
    fn test_uv1_morph() {
        let model = model();
        let deltas = MorphResolver::new(&model).resolve_with_weights(&[(1, 0.25)], 0.0);
        assert!((deltas.vertices[0].uv1.x - 0.25).abs() < 1e-12);
        assert_eq!(deltas.vertices[0].uv, DVec4::ZERO);
    }

    #[test]
    fn test_bone_morph_scaled() {
        let model = model();
        let deltas = MorphResolver::new(&model).resolve_with_weights(&[(2, 0.5)], 0.0);
        let bone = deltas.bones[0];
        assert!((bone.position.y - 1.0).abs() < 1e-12);
        let expected = DQuat::from_rotation_y(std::f64::consts::FRAC_PI_4);
        assert!(quaternion::same_rotation(bone.rotation, expected, 1e-9));
        assert!((bone.scale - DVec3::splat(1.5)).length() < 1e-12);
    }

    #[test]
    fn test_stacked_bone_morphs_premultiply() {
        let bones = BoneSet::new(vec![BoneLink::new("neck", 0, DVec3::ZERO)]).unwrap();
        let mut tilt = BoneMorphOffset::new(0);
        tilt.rotation = DQuat::from_rotation_x(0.5);
        let mut turn = BoneMorphOffset::new(0);
        turn.rotation = DQuat::from_rotation_y(0.5);
        let model = MmdModel::new("m", bones)
            .with_morphs(vec![
                Morph::new("tilt", MorphOffsets::Bone(vec![tilt])),
                Morph::new("turn", MorphOffsets::Bone(vec![turn])),
            ])
            .unwrap();

        let deltas = MorphResolver::new(&model).resolve_with_weights(&[(0, 1.0), (1, 1.0)], 0.0);
        let rotation = deltas.bones[0].rotation;
        // 后应用的 Morph 左乘
        let expected = DQuat::from_rotation_y(0.5) * DQuat::from_rotation_x(0.5);
        assert!(quaternion::same_rotation(rotation, expected, 1e-9));
        assert!(rotation.z * rotation.w.signum() < 0.0);
    }

    #[test]
    fn test_material_multiply_before_add() {
        let model = model();
        // 加算项先出现在权重表中
        let deltas = MorphResolver::new(&model).resolve_with_weights(&[(4, 1.0), (3, 1.0)], 0.0);
        let body = deltas.materials[1].apply_to(&model.materials[1].values);
        // 1 * 0 + 0.2
        assert!((body.diffuse.x - 0.2).abs() < 1e-12);
        let face = deltas.materials[0].apply_to(&model.materials[0].values);
        assert!(face.diffuse.x.abs() < 1e-12);
    }

    #[test]
    fn test_group_morph_cycle_guard() {
        let model = model();
        let deltas = MorphResolver::new(&model).resolve_with_weights(&[(5, 1.0)], 0.0);
        // 子项 smile 权重 0.5，自引用被跳过
        assert!((deltas.vertices[1].position.y - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_resolve_from_motion() {
        let model = model();
        let mut motion = Motion::new();
        motion.insert_morph("smile", MorphKeyframe::new(0, 0.0));
        motion.insert_morph("smile", MorphKeyframe::new(10, 1.0));
        motion.insert_morph("unknown", MorphKeyframe::new(0, 1.0));

        let resolver = MorphResolver::new(&model);
        assert!(resolver.resolve_weights(&motion, 0.0).is_empty());
        let deltas = resolver.resolve(&motion, 5.0);
        assert!((deltas.vertices[1].position.y - 0.5).abs() < 1e-12);
    }
}
