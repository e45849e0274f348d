//! 关键帧定义
//!
//! - 骨骼 / Morph 关键帧参与插值与曲线分割
//! - 相机 / 光照 / 阴影 / IK 开关关键帧用于完整读写 VMD

use glam::{DQuat, DVec3};

use crate::math::curve::{evaluate, split_curve, Curve};
use crate::math::{lerp, lerp_per_axis, quaternion};

// ============================================================================
// 关键帧 trait
// ============================================================================

/// 轨道中可存储的关键帧
pub trait Keyframe: Clone {
    /// 帧索引
    fn index(&self) -> u32;

    /// 复制到新的帧索引
    fn with_index(&self, index: u32) -> Self;

    /// 是否为用户登录的关键帧（参与曲线分割）
    fn is_registered(&self) -> bool;

    /// 指定帧索引的默认关键帧
    fn default_at(index: u32) -> Self;

    /// 在 prev 与 next 之间插值，`frame` 可为小数帧
    fn interpolate(prev: &Self, next: &Self, frame: f64) -> Self;

    /// 插入到 prev 与 next 之间时分割曲线：左半留给自身，右半写回 next
    fn split_curves(&mut self, _prev: &Self, _next: &mut Self) {}
}

// ============================================================================
// 骨骼曲线
// ============================================================================

/// 骨骼关键帧的四条插值曲线
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoneCurves {
    pub translate_x: Curve,
    pub translate_y: Curve,
    pub translate_z: Curve,
    pub rotate: Curve,
}

impl BoneCurves {
    pub const LINEAR: BoneCurves = BoneCurves {
        translate_x: Curve::LINEAR,
        translate_y: Curve::LINEAR,
        translate_z: Curve::LINEAR,
        rotate: Curve::LINEAR,
    };

    /// 所有曲线使用同一形状
    pub fn uniform(curve: Curve) -> Self {
        Self {
            translate_x: curve,
            translate_y: curve,
            translate_z: curve,
            rotate: curve,
        }
    }

    #[inline]
    fn channels(&self) -> [&Curve; 4] {
        [&self.translate_x, &self.translate_y, &self.translate_z, &self.rotate]
    }

    #[inline]
    fn channels_mut(&mut self) -> [&mut Curve; 4] {
        [
            &mut self.translate_x,
            &mut self.translate_y,
            &mut self.translate_z,
            &mut self.rotate,
        ]
    }

    /// 解码 VMD 64 字节插值块，返回 (曲线, 是否关闭物理)
    ///
    /// 第一行 16 字节依次为各通道的 x1、y1、x2、y2（X, Y, Z, R 交错）。
    pub fn from_vmd_bytes(bytes: &[u8; 64]) -> (Self, bool) {
        let read = |ch: usize| {
            Curve::new(bytes[ch], bytes[ch + 4], bytes[ch + 8], bytes[ch + 12])
        };
        let physics_disabled = bytes[2] == 99 && bytes[3] == 15;

        let mut curves = Self {
            translate_x: read(0),
            translate_y: read(1),
            translate_z: read(2),
            rotate: read(3),
        };
        // 关闭物理时 Z / R 的 x1 字节被标记占用，原值已丢失，取默认值
        if physics_disabled {
            curves.translate_z.start[0] = Curve::LINEAR.start[0];
            curves.rotate.start[0] = Curve::LINEAR.start[0];
        }
        (curves, physics_disabled)
    }

    /// 编码为 VMD 64 字节插值块
    ///
    /// 4 行，每行是上一行左移一字节后在末尾补位。
    pub fn to_vmd_bytes(&self, physics_disabled: bool) -> [u8; 64] {
        let mut row = [0u8; 16];
        for (ch, c) in self.channels().iter().enumerate() {
            row[ch] = c.start[0];
            row[ch + 4] = c.start[1];
            row[ch + 8] = c.end[0];
            row[ch + 12] = c.end[1];
        }

        let mut out = [0u8; 64];
        out[..16].copy_from_slice(&row);
        if physics_disabled {
            out[2] = 99;
            out[3] = 15;
        }

        // 行 1..3 为行 0 的移位副本，尾部填充固定字节
        let tails: [&[u8]; 3] = [&[1], &[1, 0], &[1, 0, 0]];
        for (r, tail) in tails.iter().enumerate() {
            let shift = r + 1;
            let base = 16 * shift;
            out[base..base + 16 - shift].copy_from_slice(&row[shift..]);
            out[base + 16 - shift..base + 16].copy_from_slice(tail);
        }
        out
    }
}

// ============================================================================
// 骨骼关键帧
// ============================================================================

/// 骨骼关键帧
#[derive(Debug, Clone, PartialEq)]
pub struct BoneKeyframe {
    pub index: u32,
    pub position: DVec3,
    pub rotation: DQuat,
    pub scale: DVec3,
    /// 本地（可抵消）平移
    pub local_position: DVec3,
    /// 本地（可抵消）旋转
    pub local_rotation: DQuat,
    /// 本地（可抵消）缩放
    pub local_scale: DVec3,
    pub curves: BoneCurves,
    /// 用户登录帧
    pub registered: bool,
    /// 从文件读取
    pub read: bool,
    /// 该帧关闭物理
    pub disable_physics: bool,
}

impl BoneKeyframe {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            position: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
            scale: DVec3::ONE,
            local_position: DVec3::ZERO,
            local_rotation: DQuat::IDENTITY,
            local_scale: DVec3::ONE,
            curves: BoneCurves::LINEAR,
            registered: true,
            read: false,
            disable_physics: false,
        }
    }

    pub fn with_position(mut self, position: DVec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: DQuat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_curves(mut self, curves: BoneCurves) -> Self {
        self.curves = curves;
        self
    }
}

impl Keyframe for BoneKeyframe {
    #[inline]
    fn index(&self) -> u32 {
        self.index
    }

    fn with_index(&self, index: u32) -> Self {
        Self {
            index,
            ..self.clone()
        }
    }

    #[inline]
    fn is_registered(&self) -> bool {
        self.registered
    }

    fn default_at(index: u32) -> Self {
        Self {
            registered: false,
            ..Self::new(index)
        }
    }

    fn interpolate(prev: &Self, next: &Self, frame: f64) -> Self {
        let start = prev.index as f64;
        let end = next.index as f64;
        let (_, xy, _) = evaluate(&next.curves.translate_x, start, frame, end);
        let (_, yy, _) = evaluate(&next.curves.translate_y, start, frame, end);
        let (_, zy, _) = evaluate(&next.curves.translate_z, start, frame, end);
        let (_, ry, _) = evaluate(&next.curves.rotate, start, frame, end);
        let t = DVec3::new(xy, yy, zy);

        Self {
            index: frame.floor() as u32,
            position: lerp_per_axis(prev.position, next.position, t),
            rotation: quaternion::slerp(prev.rotation, next.rotation, ry),
            scale: lerp_per_axis(prev.scale, next.scale, t),
            local_position: lerp_per_axis(prev.local_position, next.local_position, t),
            local_rotation: quaternion::slerp(prev.local_rotation, next.local_rotation, ry),
            local_scale: lerp_per_axis(prev.local_scale, next.local_scale, t),
            curves: next.curves,
            registered: false,
            read: false,
            disable_physics: prev.disable_physics,
        }
    }

    fn split_curves(&mut self, prev: &Self, next: &mut Self) {
        let start = prev.index as f64;
        let now = self.index as f64;
        let end = next.index as f64;
        let own = self.curves.channels_mut();
        let theirs = next.curves.channels_mut();
        for (mine, other) in own.into_iter().zip(theirs) {
            let (left, right) = split_curve(other, start, now, end);
            *mine = left;
            *other = right;
        }
    }
}

// ============================================================================
// Morph 关键帧
// ============================================================================

/// Morph 关键帧（线性插值）
#[derive(Debug, Clone, PartialEq)]
pub struct MorphKeyframe {
    pub index: u32,
    pub ratio: f64,
    pub registered: bool,
    pub read: bool,
}

impl MorphKeyframe {
    pub fn new(index: u32, ratio: f64) -> Self {
        Self {
            index,
            ratio,
            registered: true,
            read: false,
        }
    }
}

impl Keyframe for MorphKeyframe {
    #[inline]
    fn index(&self) -> u32 {
        self.index
    }

    fn with_index(&self, index: u32) -> Self {
        Self {
            index,
            ..self.clone()
        }
    }

    #[inline]
    fn is_registered(&self) -> bool {
        self.registered
    }

    fn default_at(index: u32) -> Self {
        Self {
            index,
            ratio: 0.0,
            registered: false,
            read: false,
        }
    }

    fn interpolate(prev: &Self, next: &Self, frame: f64) -> Self {
        let span = next.index as f64 - prev.index as f64;
        let t = if span > 0.0 {
            (frame - prev.index as f64) / span
        } else {
            0.0
        };
        Self {
            index: frame.floor() as u32,
            ratio: lerp(prev.ratio, next.ratio, t),
            registered: false,
            read: false,
        }
    }
}

// ============================================================================
// 相机关键帧
// ============================================================================

/// 相机六通道插值曲线
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CameraCurves {
    pub translate_x: Curve,
    pub translate_y: Curve,
    pub translate_z: Curve,
    pub rotate: Curve,
    pub distance: Curve,
    pub view_angle: Curve,
}

impl CameraCurves {
    pub const LINEAR: CameraCurves = CameraCurves {
        translate_x: Curve::LINEAR,
        translate_y: Curve::LINEAR,
        translate_z: Curve::LINEAR,
        rotate: Curve::LINEAR,
        distance: Curve::LINEAR,
        view_angle: Curve::LINEAR,
    };

    fn channels_mut(&mut self) -> [&mut Curve; 6] {
        [
            &mut self.translate_x,
            &mut self.translate_y,
            &mut self.translate_z,
            &mut self.rotate,
            &mut self.distance,
            &mut self.view_angle,
        ]
    }

    /// 解码 24 字节相机插值块：通道 c 的 x1, y1, x2, y2 位于 c, c+6, c+12, c+18
    pub fn from_vmd_bytes(bytes: &[u8; 24]) -> Self {
        let read = |ch: usize| Curve::new(bytes[ch], bytes[ch + 6], bytes[ch + 12], bytes[ch + 18]);
        Self {
            translate_x: read(0),
            translate_y: read(1),
            translate_z: read(2),
            rotate: read(3),
            distance: read(4),
            view_angle: read(5),
        }
    }

    pub fn to_vmd_bytes(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        let mut copy = *self;
        for (ch, c) in copy.channels_mut().into_iter().enumerate() {
            out[ch] = c.start[0];
            out[ch + 6] = c.start[1];
            out[ch + 12] = c.end[0];
            out[ch + 18] = c.end[1];
        }
        out
    }
}

/// 相机关键帧
#[derive(Debug, Clone, PartialEq)]
pub struct CameraKeyframe {
    pub index: u32,
    /// 注视点
    pub position: DVec3,
    /// 欧拉角（弧度）
    pub rotation: DVec3,
    pub distance: f64,
    /// 视角（度）
    pub view_angle: f64,
    pub orthographic: bool,
    pub curves: CameraCurves,
    pub registered: bool,
}

impl Keyframe for CameraKeyframe {
    #[inline]
    fn index(&self) -> u32 {
        self.index
    }

    fn with_index(&self, index: u32) -> Self {
        Self {
            index,
            ..self.clone()
        }
    }

    #[inline]
    fn is_registered(&self) -> bool {
        self.registered
    }

    fn default_at(index: u32) -> Self {
        Self {
            index,
            position: DVec3::new(0.0, 10.0, 0.0),
            rotation: DVec3::ZERO,
            distance: -45.0,
            view_angle: 30.0,
            orthographic: false,
            curves: CameraCurves::LINEAR,
            registered: false,
        }
    }

    fn interpolate(prev: &Self, next: &Self, frame: f64) -> Self {
        let start = prev.index as f64;
        let end = next.index as f64;
        let y = |c: &Curve| evaluate(c, start, frame, end).1;
        let t = DVec3::new(
            y(&next.curves.translate_x),
            y(&next.curves.translate_y),
            y(&next.curves.translate_z),
        );
        let r = y(&next.curves.rotate);

        Self {
            index: frame.floor() as u32,
            position: lerp_per_axis(prev.position, next.position, t),
            rotation: prev.rotation.lerp(next.rotation, r),
            distance: lerp(prev.distance, next.distance, y(&next.curves.distance)),
            view_angle: lerp(prev.view_angle, next.view_angle, y(&next.curves.view_angle)),
            orthographic: prev.orthographic,
            curves: next.curves,
            registered: false,
        }
    }

    fn split_curves(&mut self, prev: &Self, next: &mut Self) {
        let start = prev.index as f64;
        let now = self.index as f64;
        let end = next.index as f64;
        for (mine, other) in self.curves.channels_mut().into_iter().zip(next.curves.channels_mut()) {
            let (left, right) = split_curve(other, start, now, end);
            *mine = left;
            *other = right;
        }
    }
}

// ============================================================================
// 光照 / 阴影 / IK 开关关键帧
// ============================================================================

/// 光照关键帧（线性插值）
#[derive(Debug, Clone, PartialEq)]
pub struct LightKeyframe {
    pub index: u32,
    pub color: DVec3,
    pub position: DVec3,
    pub registered: bool,
}

impl Keyframe for LightKeyframe {
    #[inline]
    fn index(&self) -> u32 {
        self.index
    }

    fn with_index(&self, index: u32) -> Self {
        Self {
            index,
            ..self.clone()
        }
    }

    #[inline]
    fn is_registered(&self) -> bool {
        self.registered
    }

    fn default_at(index: u32) -> Self {
        Self {
            index,
            color: DVec3::splat(154.0 / 255.0),
            position: DVec3::new(-0.5, -1.0, 0.5),
            registered: false,
        }
    }

    fn interpolate(prev: &Self, next: &Self, frame: f64) -> Self {
        let span = next.index as f64 - prev.index as f64;
        let t = if span > 0.0 {
            (frame - prev.index as f64) / span
        } else {
            0.0
        };
        Self {
            index: frame.floor() as u32,
            color: prev.color.lerp(next.color, t),
            position: prev.position.lerp(next.position, t),
            registered: false,
        }
    }
}

/// 阴影关键帧（保持前一帧）
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowKeyframe {
    pub index: u32,
    /// 0: 关闭, 1: 模式1, 2: 模式2
    pub mode: u8,
    pub distance: f64,
    pub registered: bool,
}

impl Keyframe for ShadowKeyframe {
    #[inline]
    fn index(&self) -> u32 {
        self.index
    }

    fn with_index(&self, index: u32) -> Self {
        Self {
            index,
            ..self.clone()
        }
    }

    #[inline]
    fn is_registered(&self) -> bool {
        self.registered
    }

    fn default_at(index: u32) -> Self {
        Self {
            index,
            mode: 1,
            distance: 8875.0 * 0.00001,
            registered: false,
        }
    }

    fn interpolate(prev: &Self, _next: &Self, frame: f64) -> Self {
        prev.with_index(frame.floor() as u32)
    }
}

/// 单个 IK 骨骼的开关
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkEnable {
    pub bone_name: String,
    pub enabled: bool,
}

/// IK 开关关键帧（保持前一帧）
#[derive(Debug, Clone, PartialEq)]
pub struct IkKeyframe {
    pub index: u32,
    /// 模型显示
    pub visible: bool,
    pub ik_list: Vec<IkEnable>,
    pub registered: bool,
}

impl IkKeyframe {
    /// 查询某个 IK 骨骼是否启用，未记录的骨骼视为启用
    pub fn is_enabled(&self, bone_name: &str) -> bool {
        self.ik_list
            .iter()
            .find(|ik| ik.bone_name == bone_name)
            .map_or(true, |ik| ik.enabled)
    }
}

impl Keyframe for IkKeyframe {
    #[inline]
    fn index(&self) -> u32 {
        self.index
    }

    fn with_index(&self, index: u32) -> Self {
        Self {
            index,
            ..self.clone()
        }
    }

    #[inline]
    fn is_registered(&self) -> bool {
        self.registered
    }

    fn default_at(index: u32) -> Self {
        Self {
            index,
            visible: true,
            ik_list: Vec::new(),
            registered: false,
        }
    }

    fn interpolate(prev: &Self, _next: &Self, frame: f64) -> Self {
        prev.with_index(frame.floor() as u32)
    }
}
