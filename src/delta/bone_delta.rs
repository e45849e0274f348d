//! 骨骼帧结果
//!
//! 每帧每骨骼的计算结果：全局矩阵、蒙皮矩阵、全局位置，以及分离保存的各来源分量
//! （关键帧、Morph、附加父骨骼、IK、本地通道）。

use glam::{DMat4, DQuat, DVec3};

use crate::math::compose;

/// 单个骨骼的帧结果
#[derive(Clone, Debug, PartialEq)]
pub struct BoneDelta {
    pub bone_index: usize,
    pub frame: f64,

    /// 全局矩阵（骨骼空间 -> 模型空间，包含静止位置）
    pub global_matrix: DMat4,
    /// 蒙皮矩阵 = 全局矩阵 · 逆绑定矩阵
    pub local_matrix: DMat4,
    /// 相对父骨骼全局矩阵的变换
    pub unit_matrix: DMat4,
    pub global_position: DVec3,

    // 关键帧分量
    pub frame_position: DVec3,
    pub frame_rotation: DQuat,
    pub frame_scale: DVec3,
    pub frame_local_position: DVec3,
    pub frame_local_rotation: DQuat,
    pub frame_local_scale: DVec3,

    // Morph 分量
    pub morph_position: DVec3,
    pub morph_rotation: DQuat,
    pub morph_scale: DVec3,
    pub morph_local_position: DVec3,
    pub morph_local_rotation: DQuat,
    pub morph_local_scale: DVec3,

    /// 关键帧 · Morph 旋转（固定轴投影后）
    pub base_rotation: DQuat,
    /// 附加父骨骼贡献
    pub append_rotation: DQuat,
    pub append_position: DVec3,
    /// IK 求解结果，存在时替代 base_rotation
    pub ik_rotation: Option<DQuat>,

    /// 提供给附加子骨骼的旋转 / 平移
    pub effect_rotation: DQuat,
    pub effect_position: DVec3,

    /// 本地通道合成值（已换到本地轴基底）
    pub cancel_rotation: DQuat,
    pub cancel_position: DVec3,
    pub cancel_scale: DVec3,
    /// 父骨骼的本地通道（需要抵消）
    pub parent_cancel_rotation: DQuat,
    pub parent_cancel_position: DVec3,
    pub parent_cancel_scale: DVec3,

    /// 全局矩阵由物理回写
    pub physics_driven: bool,
}

impl BoneDelta {
    /// 静止姿势
    pub fn rest(bone_index: usize, frame: f64, rest_position: DVec3) -> Self {
        let global = DMat4::from_translation(rest_position);
        Self {
            bone_index,
            frame,
            global_matrix: global,
            local_matrix: DMat4::IDENTITY,
            unit_matrix: global,
            global_position: rest_position,
            frame_position: DVec3::ZERO,
            frame_rotation: DQuat::IDENTITY,
            frame_scale: DVec3::ONE,
            frame_local_position: DVec3::ZERO,
            frame_local_rotation: DQuat::IDENTITY,
            frame_local_scale: DVec3::ONE,
            morph_position: DVec3::ZERO,
            morph_rotation: DQuat::IDENTITY,
            morph_scale: DVec3::ONE,
            morph_local_position: DVec3::ZERO,
            morph_local_rotation: DQuat::IDENTITY,
            morph_local_scale: DVec3::ONE,
            base_rotation: DQuat::IDENTITY,
            append_rotation: DQuat::IDENTITY,
            append_position: DVec3::ZERO,
            ik_rotation: None,
            effect_rotation: DQuat::IDENTITY,
            effect_position: DVec3::ZERO,
            cancel_rotation: DQuat::IDENTITY,
            cancel_position: DVec3::ZERO,
            cancel_scale: DVec3::ONE,
            parent_cancel_rotation: DQuat::IDENTITY,
            parent_cancel_position: DVec3::ZERO,
            parent_cancel_scale: DVec3::ONE,
            physics_driven: false,
        }
    }

    /// 动画旋转（IK 结果优先）
    #[inline]
    pub fn animated_rotation(&self) -> DQuat {
        self.ik_rotation.unwrap_or(self.base_rotation)
    }

    /// 动画平移（不含附加）
    #[inline]
    pub fn animated_position(&self) -> DVec3 {
        self.frame_position + self.morph_position
    }

    /// 由动画旋转与附加旋转重新计算 effect_rotation
    #[inline]
    pub fn refresh_effect(&mut self) {
        self.effect_rotation = self.animated_rotation() * self.append_rotation;
        self.effect_position = self.animated_position() + self.append_position;
    }

    /// 最终局部旋转：抵消父骨骼本地通道，叠加自身本地通道
    #[inline]
    pub fn total_rotation(&self) -> DQuat {
        self.parent_cancel_rotation.inverse() * self.effect_rotation * self.cancel_rotation
    }

    #[inline]
    pub fn total_position(&self) -> DVec3 {
        self.effect_position + self.cancel_position - self.parent_cancel_position
    }

    #[inline]
    pub fn total_scale(&self) -> DVec3 {
        let parent = self.parent_cancel_scale;
        let safe = |v: f64| if v.abs() < 1e-12 { 1.0 } else { v };
        self.frame_scale * self.morph_scale * self.cancel_scale
            / DVec3::new(safe(parent.x), safe(parent.y), safe(parent.z))
    }

    /// 用父骨骼全局矩阵与静止偏移更新各矩阵
    pub fn update_matrices(&mut self, parent_global: DMat4, rest_offset: DVec3, rest_position: DVec3) {
        self.unit_matrix = compose(
            rest_offset + self.total_position(),
            self.total_rotation(),
            self.total_scale(),
        );
        self.set_global(parent_global * self.unit_matrix, rest_position);
    }

    /// 直接设置全局矩阵（物理回写）
    pub fn set_global(&mut self, global: DMat4, rest_position: DVec3) {
        self.global_matrix = global;
        self.local_matrix = global * DMat4::from_translation(-rest_position);
        self.global_position = global.w_axis.truncate();
    }

    /// 全局旋转
    pub fn global_rotation(&self) -> DQuat {
        crate::math::rotation_of(&self.global_matrix)
    }
}

/// 一帧的全部骨骼结果（按骨骼索引）
#[derive(Clone, Debug, Default)]
pub struct BoneDeltas {
    pub frame: f64,
    deltas: Vec<Option<BoneDelta>>,
}

impl BoneDeltas {
    pub fn new(bone_count: usize, frame: f64) -> Self {
        Self {
            frame,
            deltas: vec![None; bone_count],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&BoneDelta> {
        self.deltas.get(index).and_then(|d| d.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut BoneDelta> {
        self.deltas.get_mut(index).and_then(|d| d.as_mut())
    }

    #[inline]
    pub fn set(&mut self, index: usize, delta: BoneDelta) {
        if let Some(slot) = self.deltas.get_mut(index) {
            *slot = Some(delta);
        }
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// 已求值的骨骼结果
    pub fn iter(&self) -> impl Iterator<Item = &BoneDelta> {
        self.deltas.iter().flatten()
    }

    /// 全局矩阵，未求值时为 None
    #[inline]
    pub fn global_matrix(&self, index: usize) -> Option<DMat4> {
        self.get(index).map(|d| d.global_matrix)
    }

    #[inline]
    pub fn global_position(&self, index: usize) -> Option<DVec3> {
        self.get(index).map(|d| d.global_position)
    }

    pub(crate) fn slots(&self) -> &[Option<BoneDelta>] {
        &self.deltas
    }
}
