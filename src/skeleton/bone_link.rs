//! 骨骼节点
//!
//! BoneLink 只保存模型中不变的静态数据（名称、父子关系、标志、静止位置、附加 / 固定轴 / 本地轴 / IK 设置）。
//! 每帧计算结果存放在 `delta::BoneDelta` 中，模型在求值期间保持不可变。

use bitflags::bitflags;
use glam::{DMat3, DMat4, DQuat, DVec3};

// ============================================================================
// 骨骼标志
// ============================================================================

bitflags! {
    /// 骨骼标志位
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BoneFlags: u32 {
        /// 可旋转
        const ROTATABLE = 1 << 0;
        /// 可移动
        const MOVABLE = 1 << 1;
        /// 是 IK 骨骼
        const IK = 1 << 2;
        /// 附加旋转
        const APPEND_ROTATE = 1 << 3;
        /// 附加平移
        const APPEND_TRANSLATE = 1 << 4;
        /// 附加变换使用本地（动画）值
        const APPEND_LOCAL = 1 << 5;
        /// 固定轴
        const FIXED_AXIS = 1 << 6;
        /// 本地轴
        const LOCAL_AXIS = 1 << 7;
        /// 物理后变形
        const DEFORM_AFTER_PHYSICS = 1 << 8;
    }
}

// ============================================================================
// IK 配置
// ============================================================================

/// IK 链接信息
#[derive(Clone, Debug, PartialEq)]
pub struct IkLink {
    /// 链接骨骼索引
    pub bone_index: i32,
    /// 是否有角度限制
    pub has_limits: bool,
    /// 角度下限 (弧度，欧拉角 x, y, z)
    pub limit_min: DVec3,
    /// 角度上限 (弧度)
    pub limit_max: DVec3,
}

impl IkLink {
    pub fn new(bone_index: i32) -> Self {
        Self {
            bone_index,
            has_limits: false,
            limit_min: DVec3::ZERO,
            limit_max: DVec3::ZERO,
        }
    }

    pub fn with_limits(mut self, min: DVec3, max: DVec3) -> Self {
        self.has_limits = true;
        self.limit_min = min;
        self.limit_max = max;
        self
    }

    /// 仅单轴有活动范围时返回该轴（0: X, 1: Y, 2: Z）
    pub fn single_axis(&self) -> Option<usize> {
        if !self.has_limits {
            return None;
        }
        let active = |i: usize| self.limit_min[i] != 0.0 || self.limit_max[i] != 0.0;
        match (active(0), active(1), active(2)) {
            (true, false, false) => Some(0),
            (false, true, false) => Some(1),
            (false, false, true) => Some(2),
            _ => None,
        }
    }
}

/// IK 配置（挂在 IK 骨骼上）
#[derive(Clone, Debug, PartialEq)]
pub struct IkConfig {
    /// 效应骨骼索引（要被拉到 IK 骨骼位置的骨骼，例如足首）
    pub target_bone: i32,
    /// 迭代次数
    pub iterations: u32,
    /// 单次迭代角度限制 (弧度)
    pub limit_angle: f64,
    /// IK 链接列表（靠近效应骨骼的在前）
    pub links: Vec<IkLink>,
}

// ============================================================================
// 附加变换配置
// ============================================================================

/// 附加变换（付与）配置
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppendConfig {
    /// 附加变换父骨骼索引
    pub parent: i32,
    /// 附加变换比率（可为负或大于 1）
    pub rate: f64,
}

// ============================================================================
// 骨骼节点
// ============================================================================

/// 骨骼节点（静态数据）
#[derive(Clone, Debug, PartialEq)]
pub struct BoneLink {
    /// 骨骼名称
    pub name: String,
    /// 骨骼索引（与在 BoneSet 中的位置一致）
    pub index: usize,
    /// 父骨骼索引 (-1 表示根骨骼)
    pub parent_index: i32,
    /// 变换层级（用于排序）
    pub layer: i32,
    /// 骨骼标志
    pub flags: BoneFlags,
    /// 静止位置（模型空间）
    pub position: DVec3,
    /// 附加变换
    pub append: Option<AppendConfig>,
    /// 固定轴方向
    pub fixed_axis: Option<DVec3>,
    /// 本地轴 (X, Z)
    pub local_axes: Option<(DVec3, DVec3)>,
    /// IK 配置
    pub ik: Option<IkConfig>,
}

impl BoneLink {
    /// 创建新骨骼
    pub fn new(name: impl Into<String>, index: usize, position: DVec3) -> Self {
        Self {
            name: name.into(),
            index,
            parent_index: -1,
            layer: 0,
            flags: BoneFlags::ROTATABLE,
            position,
            append: None,
            fixed_axis: None,
            local_axes: None,
            ik: None,
        }
    }

    pub fn with_parent(mut self, parent: i32) -> Self {
        self.parent_index = parent;
        self
    }

    pub fn with_layer(mut self, layer: i32) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_flags(mut self, flags: BoneFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// 设置附加变换
    pub fn with_append(mut self, parent: i32, rate: f64, rotate: bool, translate: bool) -> Self {
        self.append = Some(AppendConfig { parent, rate });
        self.flags.set(BoneFlags::APPEND_ROTATE, rotate);
        self.flags.set(BoneFlags::APPEND_TRANSLATE, translate);
        self
    }

    pub fn with_fixed_axis(mut self, axis: DVec3) -> Self {
        self.fixed_axis = Some(axis);
        self.flags.insert(BoneFlags::FIXED_AXIS);
        self
    }

    pub fn with_local_axes(mut self, x: DVec3, z: DVec3) -> Self {
        self.local_axes = Some((x, z));
        self.flags.insert(BoneFlags::LOCAL_AXIS);
        self
    }

    pub fn with_ik(mut self, ik: IkConfig) -> Self {
        self.ik = Some(ik);
        self.flags.insert(BoneFlags::IK);
        self
    }

    // ========================================
    // 访问器
    // ========================================

    /// 父骨骼索引
    #[inline]
    pub fn parent_id(&self) -> Option<usize> {
        if self.parent_index >= 0 {
            Some(self.parent_index as usize)
        } else {
            None
        }
    }

    /// 附加父骨骼索引
    #[inline]
    pub fn append_parent_id(&self) -> Option<usize> {
        self.append
            .as_ref()
            .filter(|a| a.parent >= 0)
            .map(|a| a.parent as usize)
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_index < 0
    }

    /// 逆绑定矩阵
    #[inline]
    pub fn offset_matrix(&self) -> DMat4 {
        DMat4::from_translation(-self.position)
    }

    /// 本地轴基底对应的旋转（X, Y = Z × X, Z = X × Y）
    pub fn local_axes_rotation(&self) -> Option<DQuat> {
        let (x, z) = self.local_axes?;
        let x = x.normalize_or_zero();
        let y = z.cross(x).normalize_or_zero();
        if x == DVec3::ZERO || y == DVec3::ZERO {
            return None;
        }
        let z = x.cross(y);
        Some(DQuat::from_mat3(&DMat3::from_cols(x, y, z)).normalize())
    }

    // ========================================
    // 标志检查方法
    // ========================================

    #[inline]
    pub fn is_ik(&self) -> bool {
        self.ik.is_some()
    }

    #[inline]
    pub fn is_append_rotate(&self) -> bool {
        self.flags.contains(BoneFlags::APPEND_ROTATE)
    }

    #[inline]
    pub fn is_append_translate(&self) -> bool {
        self.flags.contains(BoneFlags::APPEND_TRANSLATE)
    }

    #[inline]
    pub fn is_append_local(&self) -> bool {
        self.flags.contains(BoneFlags::APPEND_LOCAL)
    }

    #[inline]
    pub fn deform_after_physics(&self) -> bool {
        self.flags.contains(BoneFlags::DEFORM_AFTER_PHYSICS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_axes_basis() {
        let bone = BoneLink::new("arm", 0, DVec3::ZERO)
            .with_local_axes(DVec3::new(1.0, -1.0, 0.0), DVec3::Z);
        let q = bone.local_axes_rotation().unwrap();
        let x = q * DVec3::X;
        let y = q * DVec3::Y;
        assert!((x - DVec3::new(1.0, -1.0, 0.0).normalize()).length() < 1e-12);
        assert!((y - DVec3::Z.cross(x)).length() < 1e-12);
    }

    #[test]
    fn test_single_axis_detection() {
        let knee = IkLink::new(1).with_limits(
            DVec3::new(-std::f64::consts::PI, 0.0, 0.0),
            DVec3::new(-0.008, 0.0, 0.0),
        );
        assert_eq!(knee.single_axis(), Some(0));
        assert_eq!(IkLink::new(2).single_axis(), None);
    }

    #[test]
    fn test_append_builder_flags() {
        let bone = BoneLink::new("twist", 3, DVec3::ZERO).with_append(2, 0.5, true, false);
        assert!(bone.is_append_rotate());
        assert!(!bone.is_append_translate());
        assert_eq!(bone.append_parent_id(), Some(2));
        assert_eq!(bone.offset_matrix(), DMat4::IDENTITY);
    }
}
