//! 结果汇总
//!
//! 把 BoneDeltas / MorphDeltas 展开为按模型骨骼、顶点、材质顺序排列的连续 f32 数组，
//! 供渲染端直接上传。坐标系转换只在这里发生：内部始终保持 MMD 的左手坐标系。

use glam::{DMat4, DVec3};
use rayon::prelude::*;

use crate::model::Material;

use super::bone_delta::BoneDeltas;
use super::morph_delta::MorphDeltas;

/// 每个材质展开后的 float 数
pub const MATERIAL_FLOATS: usize = 28;

/// 输出坐标系
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CoordinateSystem {
    /// MMD 内部坐标系（左手，Y 轴向上）
    #[default]
    Internal,
    /// X 取反
    NegateX,
    /// Y、Z 取反
    NegateYZ,
    /// Z 取反（右手坐标系）
    NegateZ,
}

impl CoordinateSystem {
    /// 对角符号向量
    #[inline]
    pub fn signs(self) -> DVec3 {
        match self {
            CoordinateSystem::Internal => DVec3::ONE,
            CoordinateSystem::NegateX => DVec3::new(-1.0, 1.0, 1.0),
            CoordinateSystem::NegateYZ => DVec3::new(1.0, -1.0, -1.0),
            CoordinateSystem::NegateZ => DVec3::new(1.0, 1.0, -1.0),
        }
    }

    /// 转换矩阵 S
    #[inline]
    pub fn matrix(self) -> DMat4 {
        DMat4::from_scale(self.signs())
    }

    #[inline]
    pub fn convert_point(self, p: DVec3) -> DVec3 {
        p * self.signs()
    }

    /// S · m · S
    #[inline]
    pub fn convert_matrix(self, m: &DMat4) -> DMat4 {
        if self == CoordinateSystem::Internal {
            return *m;
        }
        let s = self.matrix();
        s * *m * s
    }
}

/// 结果汇总器
#[derive(Clone, Copy, Debug, Default)]
pub struct DeltaAssembly {
    pub system: CoordinateSystem,
}

impl DeltaAssembly {
    pub fn new(system: CoordinateSystem) -> Self {
        Self { system }
    }

    /// 蒙皮矩阵（每骨骼 16 个 float，列主序）；未求值的骨骼输出单位矩阵
    pub fn skinning_matrices(&self, bones: &BoneDeltas) -> Vec<f32> {
        self.flatten_matrices(bones, |d| d.local_matrix)
    }

    /// 全局矩阵（每骨骼 16 个 float，列主序）
    pub fn global_matrices(&self, bones: &BoneDeltas) -> Vec<f32> {
        self.flatten_matrices(bones, |d| d.global_matrix)
    }

    fn flatten_matrices<F>(&self, bones: &BoneDeltas, pick: F) -> Vec<f32>
    where
        F: Fn(&super::BoneDelta) -> DMat4 + Sync,
    {
        let system = self.system;
        let mut out = vec![0.0f32; bones.len() * 16];
        out.par_chunks_mut(16)
            .zip(bones.slots().par_iter())
            .for_each(|(chunk, slot)| {
                let m = slot.as_ref().map(&pick).unwrap_or(DMat4::IDENTITY);
                for (dst, src) in chunk.iter_mut().zip(system.convert_matrix(&m).to_cols_array()) {
                    *dst = src as f32;
                }
            });
        out
    }

    /// 骨骼全局位置（每骨骼 3 个 float）
    pub fn bone_positions(&self, bones: &BoneDeltas) -> Vec<f32> {
        let system = self.system;
        let mut out = vec![0.0f32; bones.len() * 3];
        out.par_chunks_mut(3)
            .zip(bones.slots().par_iter())
            .for_each(|(chunk, slot)| {
                let p = slot.as_ref().map(|d| d.global_position).unwrap_or(DVec3::ZERO);
                write_vec3(chunk, system.convert_point(p));
            });
        out
    }

    /// 顶点位置偏移（每顶点 3 个 float）
    pub fn vertex_offsets(&self, morphs: &MorphDeltas) -> Vec<f32> {
        let system = self.system;
        let mut out = vec![0.0f32; morphs.vertices.len() * 3];
        out.par_chunks_mut(3)
            .zip(morphs.vertices.par_iter())
            .for_each(|(chunk, v)| write_vec3(chunk, system.convert_point(v.position)));
        out
    }

    /// 蒙皮后位置偏移（每顶点 3 个 float）
    pub fn after_vertex_offsets(&self, morphs: &MorphDeltas) -> Vec<f32> {
        let system = self.system;
        let mut out = vec![0.0f32; morphs.vertices.len() * 3];
        out.par_chunks_mut(3)
            .zip(morphs.vertices.par_iter())
            .for_each(|(chunk, v)| write_vec3(chunk, system.convert_point(v.after_position)));
        out
    }

    /// UV 偏移（每顶点 8 个 float：uv.xyzw, uv1.xyzw），UV 不受坐标系影响
    pub fn uv_offsets(&self, morphs: &MorphDeltas) -> Vec<f32> {
        let mut out = vec![0.0f32; morphs.vertices.len() * 8];
        out.par_chunks_mut(8)
            .zip(morphs.vertices.par_iter())
            .for_each(|(chunk, v)| {
                for (dst, src) in chunk.iter_mut().zip(v.uv.to_array().into_iter().chain(v.uv1.to_array())) {
                    *dst = src as f32;
                }
            });
        out
    }

    /// 材质 Morph 应用后的材质值（每材质 28 个 float）
    ///
    /// 顺序：diffuse(4) specular(4) ambient(3) edge(4) edge_size(1)
    /// texture(4) sphere(4) toon(4)
    pub fn material_values(&self, morphs: &MorphDeltas, materials: &[Material]) -> Vec<f32> {
        let mut out = vec![0.0f32; materials.len() * MATERIAL_FLOATS];
        for (i, (chunk, material)) in out.chunks_mut(MATERIAL_FLOATS).zip(materials).enumerate() {
            let values = match morphs.materials.get(i) {
                Some(delta) => delta.apply_to(&material.values),
                None => material.values.clone(),
            };
            for (dst, src) in chunk.iter_mut().zip(values.to_flat()) {
                *dst = src as f32;
            }
        }
        out
    }
}

#[inline]
fn write_vec3(chunk: &mut [f32], v: DVec3) {
    chunk[0] = v.x as f32;
    chunk[1] = v.y as f32;
    chunk[2] = v.z as f32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::BoneDelta;
    use glam::DQuat;

    #[test]
    fn test_negate_z_matrix() {
        let m = DMat4::from_rotation_translation(
            DQuat::from_rotation_y(0.3),
            DVec3::new(1.0, 2.0, 3.0),
        );
        let converted = CoordinateSystem::NegateZ.convert_matrix(&m);
        let p = DVec3::new(0.5, -1.0, 2.0);
        // 先转换再变换 == 先变换再转换
        let a = converted.transform_point3(CoordinateSystem::NegateZ.convert_point(p));
        let b = CoordinateSystem::NegateZ.convert_point(m.transform_point3(p));
        assert!((a - b).length() < 1e-12);
        assert_eq!(converted.w_axis.truncate(), DVec3::new(1.0, 2.0, -3.0));
    }

    #[test]
    fn test_internal_is_identity() {
        let m = DMat4::from_translation(DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(CoordinateSystem::Internal.convert_matrix(&m), m);
    }

    #[test]
    fn test_flatten_bones() {
        let mut deltas = BoneDeltas::new(2, 0.0);
        deltas.set(1, BoneDelta::rest(1, 0.0, DVec3::new(0.0, 1.0, 2.0)));

        let assembly = DeltaAssembly::new(CoordinateSystem::NegateX);
        let globals = assembly.global_matrices(&deltas);
        assert_eq!(globals.len(), 32);
        // 未求值的骨骼为单位矩阵
        assert_eq!(globals[0], 1.0);
        assert_eq!(&globals[28..31], &[0.0, 1.0, 2.0]);

        let positions = DeltaAssembly::new(CoordinateSystem::NegateYZ).bone_positions(&deltas);
        assert_eq!(&positions[3..6], &[0.0, -1.0, -2.0]);
    }

    #[test]
    fn test_vertex_offsets() {
        let mut morphs = MorphDeltas::new(2, 0, 0, 0.0);
        morphs.vertices[1].position = DVec3::new(1.0, 0.0, 1.0);
        let flat = DeltaAssembly::new(CoordinateSystem::NegateZ).vertex_offsets(&morphs);
        assert_eq!(flat, vec![0.0, 0.0, 0.0, 1.0, 0.0, -1.0]);
    }
}
