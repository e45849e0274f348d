//! Morph 变形系统
//!
//! Morph 定义（按偏移种类区分）与按帧累加的 MorphResolver。

mod resolver;

pub use resolver::MorphResolver;

use glam::{DQuat, DVec3, DVec4};

use crate::model::MaterialValues;

/// 顶点 Morph 偏移（位置 / 蒙皮后位置）
#[derive(Clone, Debug, PartialEq)]
pub struct VertexMorphOffset {
    pub vertex_index: i32,
    pub offset: DVec3,
}

/// UV Morph 偏移
#[derive(Clone, Debug, PartialEq)]
pub struct UvMorphOffset {
    pub vertex_index: i32,
    pub offset: DVec4,
}

/// 骨骼 Morph 偏移
#[derive(Clone, Debug, PartialEq)]
pub struct BoneMorphOffset {
    pub bone_index: i32,
    pub position: DVec3,
    pub local_position: DVec3,
    pub rotation: DQuat,
    pub local_rotation: DQuat,
    /// 缩放增量（0 表示不变）
    pub scale: DVec3,
    pub local_scale: DVec3,
}

impl BoneMorphOffset {
    pub fn new(bone_index: i32) -> Self {
        Self {
            bone_index,
            position: DVec3::ZERO,
            local_position: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
            local_rotation: DQuat::IDENTITY,
            scale: DVec3::ZERO,
            local_scale: DVec3::ZERO,
        }
    }
}

/// 材质 Morph 运算
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialOperation {
    Multiply,
    Add,
}

/// 材质 Morph 偏移（material_index == -1 表示全部材质）
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialMorphOffset {
    pub material_index: i32,
    pub operation: MaterialOperation,
    pub values: MaterialValues,
}

/// 组 Morph 子项
#[derive(Clone, Debug, PartialEq)]
pub struct GroupMorphOffset {
    pub morph_index: i32,
    pub ratio: f64,
}

/// 各类 Morph 的偏移表
#[derive(Clone, Debug, PartialEq)]
pub enum MorphOffsets {
    Group(Vec<GroupMorphOffset>),
    Vertex(Vec<VertexMorphOffset>),
    /// 蒙皮后追加的顶点位移
    AfterVertex(Vec<VertexMorphOffset>),
    Uv(Vec<UvMorphOffset>),
    /// 追加 UV1
    Uv1(Vec<UvMorphOffset>),
    Bone(Vec<BoneMorphOffset>),
    Material(Vec<MaterialMorphOffset>),
}

/// Morph 定义
#[derive(Clone, Debug, PartialEq)]
pub struct Morph {
    pub name: String,
    pub offsets: MorphOffsets,
}

impl Morph {
    pub fn new(name: impl Into<String>, offsets: MorphOffsets) -> Self {
        Self {
            name: name.into(),
            offsets,
        }
    }
}
