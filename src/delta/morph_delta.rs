//! Morph 帧结果
//!
//! 三类累加器：顶点（位置 / UV / 追加 UV1 / 后置位置）、骨骼、材质（乘算 + 加算）。

use glam::{DQuat, DVec3, DVec4};

use crate::model::MaterialValues;

/// 顶点 Morph 累加
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VertexMorphDelta {
    pub position: DVec3,
    pub uv: DVec4,
    pub uv1: DVec4,
    /// 蒙皮后追加的位置偏移
    pub after_position: DVec3,
}

impl VertexMorphDelta {
    pub fn is_zero(&self) -> bool {
        self.position == DVec3::ZERO
            && self.uv == DVec4::ZERO
            && self.uv1 == DVec4::ZERO
            && self.after_position == DVec3::ZERO
    }
}

/// 骨骼 Morph 累加
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneMorphDelta {
    pub position: DVec3,
    pub local_position: DVec3,
    pub rotation: DQuat,
    pub local_rotation: DQuat,
    pub scale: DVec3,
    pub local_scale: DVec3,
}

impl Default for BoneMorphDelta {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            local_position: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
            local_rotation: DQuat::IDENTITY,
            scale: DVec3::ONE,
            local_scale: DVec3::ONE,
        }
    }
}

/// 材质 Morph 累加
///
/// 最终值 = 基础值 × multiply + add。乘算项与加算项分开累加，
/// 因此结果等同于先应用全部乘算、再应用全部加算。
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialMorphDelta {
    pub multiply: MaterialValues,
    pub add: MaterialValues,
}

impl Default for MaterialMorphDelta {
    fn default() -> Self {
        Self {
            multiply: MaterialValues::one(),
            add: MaterialValues::zero(),
        }
    }
}

impl MaterialMorphDelta {
    /// 乘算：每个分量乘以 1 + (v - 1) · r
    pub fn apply_multiply(&mut self, offset: &MaterialValues, ratio: f64) {
        let f4 = |v: DVec4| DVec4::ONE + (v - DVec4::ONE) * ratio;
        let f3 = |v: DVec3| DVec3::ONE + (v - DVec3::ONE) * ratio;
        let m = &mut self.multiply;
        m.diffuse *= f4(offset.diffuse);
        m.specular *= f4(offset.specular);
        m.ambient *= f3(offset.ambient);
        m.edge *= f4(offset.edge);
        m.edge_size *= 1.0 + (offset.edge_size - 1.0) * ratio;
        m.texture_factor *= f4(offset.texture_factor);
        m.sphere_texture_factor *= f4(offset.sphere_texture_factor);
        m.toon_texture_factor *= f4(offset.toon_texture_factor);
    }

    /// 加算：每个分量加上 v · r
    pub fn apply_add(&mut self, offset: &MaterialValues, ratio: f64) {
        let a = &mut self.add;
        a.diffuse += offset.diffuse * ratio;
        a.specular += offset.specular * ratio;
        a.ambient += offset.ambient * ratio;
        a.edge += offset.edge * ratio;
        a.edge_size += offset.edge_size * ratio;
        a.texture_factor += offset.texture_factor * ratio;
        a.sphere_texture_factor += offset.sphere_texture_factor * ratio;
        a.toon_texture_factor += offset.toon_texture_factor * ratio;
    }

    /// 应用到材质基础值
    pub fn apply_to(&self, base: &MaterialValues) -> MaterialValues {
        let (m, a) = (&self.multiply, &self.add);
        MaterialValues {
            diffuse: base.diffuse * m.diffuse + a.diffuse,
            specular: base.specular * m.specular + a.specular,
            ambient: base.ambient * m.ambient + a.ambient,
            edge: base.edge * m.edge + a.edge,
            edge_size: base.edge_size * m.edge_size + a.edge_size,
            texture_factor: base.texture_factor * m.texture_factor + a.texture_factor,
            sphere_texture_factor: base.sphere_texture_factor * m.sphere_texture_factor
                + a.sphere_texture_factor,
            toon_texture_factor: base.toon_texture_factor * m.toon_texture_factor
                + a.toon_texture_factor,
        }
    }
}

/// 一帧的全部 Morph 结果
#[derive(Clone, Debug, Default)]
pub struct MorphDeltas {
    pub frame: f64,
    pub vertices: Vec<VertexMorphDelta>,
    pub bones: Vec<BoneMorphDelta>,
    pub materials: Vec<MaterialMorphDelta>,
}

impl MorphDeltas {
    pub fn new(vertex_count: usize, bone_count: usize, material_count: usize, frame: f64) -> Self {
        Self {
            frame,
            vertices: vec![VertexMorphDelta::default(); vertex_count],
            bones: vec![BoneMorphDelta::default(); bone_count],
            materials: vec![MaterialMorphDelta::default(); material_count],
        }
    }

    #[inline]
    pub fn bone(&self, index: usize) -> Option<&BoneMorphDelta> {
        self.bones.get(index)
    }

    /// 有偏移的顶点数
    pub fn active_vertex_count(&self) -> usize {
        self.vertices.iter().filter(|v| !v.is_zero()).count()
    }
}
