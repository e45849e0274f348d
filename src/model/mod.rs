//! MMD 模型（求值期间只读）
//!
//! 骨骼、Morph、材质、刚体与关节的静态定义。构建时完成引用检查，
//! 求值器只借用模型，不会修改它。

mod material;

pub use material::{Material, MaterialValues};

use std::collections::HashMap;

use crate::morph::{Morph, MorphOffsets};
use crate::physics::{JointDef, RigidBodyDef};
use crate::skeleton::BoneSet;
use crate::{MmdError, Result};

/// MMD 模型
#[derive(Clone, Debug)]
pub struct MmdModel {
    pub name: String,
    pub vertex_count: usize,
    pub materials: Vec<Material>,
    bones: BoneSet,
    morphs: Vec<Morph>,
    morph_name_to_index: HashMap<String, usize>,
    rigid_bodies: Vec<RigidBodyDef>,
    joints: Vec<JointDef>,
}

impl MmdModel {
    pub fn new(name: impl Into<String>, bones: BoneSet) -> Self {
        Self {
            name: name.into(),
            vertex_count: 0,
            materials: Vec::new(),
            bones,
            morphs: Vec::new(),
            morph_name_to_index: HashMap::new(),
            rigid_bodies: Vec::new(),
            joints: Vec::new(),
        }
    }

    pub fn with_vertex_count(mut self, vertex_count: usize) -> Self {
        self.vertex_count = vertex_count;
        self
    }

    pub fn with_materials(mut self, materials: Vec<Material>) -> Self {
        self.materials = materials;
        self
    }

    /// 设置 Morph 列表
    ///
    /// 组 Morph 的子项必须指向已存在的 Morph；偏移表中越界的顶点 / 骨骼 / 材质索引
    /// 在求值时忽略，不在这里报错。
    pub fn with_morphs(mut self, morphs: Vec<Morph>) -> Result<Self> {
        for morph in &morphs {
            if let MorphOffsets::Group(children) = &morph.offsets {
                for child in children {
                    if child.morph_index < 0 || child.morph_index as usize >= morphs.len() {
                        return Err(MmdError::Validation(format!(
                            "Group morph '{}' references invalid morph {}",
                            morph.name, child.morph_index
                        )));
                    }
                }
            }
        }
        self.morph_name_to_index = morphs
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), i))
            .collect();
        self.morphs = morphs;
        Ok(self)
    }

    /// 设置刚体与关节
    pub fn with_physics(mut self, rigid_bodies: Vec<RigidBodyDef>, joints: Vec<JointDef>) -> Result<Self> {
        for rb in &rigid_bodies {
            if rb.bone_index >= 0 && rb.bone_index as usize >= self.bones.len() {
                return Err(MmdError::Validation(format!(
                    "Rigid body '{}' references invalid bone {}",
                    rb.name, rb.bone_index
                )));
            }
        }
        for joint in &joints {
            let valid = |i: i32| i >= 0 && (i as usize) < rigid_bodies.len();
            if !valid(joint.rigid_body_a) || !valid(joint.rigid_body_b) {
                return Err(MmdError::Validation(format!(
                    "Joint '{}' references invalid rigid bodies {} / {}",
                    joint.name, joint.rigid_body_a, joint.rigid_body_b
                )));
            }
        }
        self.rigid_bodies = rigid_bodies;
        self.joints = joints;
        Ok(self)
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn bones(&self) -> &BoneSet {
        &self.bones
    }

    #[inline]
    pub fn morphs(&self) -> &[Morph] {
        &self.morphs
    }

    pub fn find_morph_by_name(&self, name: &str) -> Option<usize> {
        self.morph_name_to_index.get(name).copied()
    }

    #[inline]
    pub fn rigid_bodies(&self) -> &[RigidBodyDef] {
        &self.rigid_bodies
    }

    #[inline]
    pub fn joints(&self) -> &[JointDef] {
        &self.joints
    }

    pub fn has_physics(&self) -> bool {
        !self.rigid_bodies.is_empty()
    }
}
