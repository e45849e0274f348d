//! 数学工具
//!
//! - glam 双精度类型（DVec / DQuat / DMat）作为核心运算类型
//! - 三次贝塞尔曲线求值与分割（VMD 插值）
//! - 四元数辅助运算（短弧 slerp、固定轴投影、向量间旋转等）

pub mod curve;
pub mod quaternion;

pub use glam::{DMat3, DMat4, DQuat, DVec2, DVec3, DVec4, EulerRot};

pub use curve::{evaluate, split_curve, BezierSegment, Curve};
pub use quaternion::{
    from_axis_angle, muled_scalar, slerp, to_euler, from_euler, to_fixed_axis,
    vec_rotation_between,
};

/// 通用比较阈值
pub const EPSILON: f64 = 1e-10;

/// 线性插值
#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// 按分量插值（每个分量使用独立系数）
#[inline]
pub fn lerp_per_axis(a: DVec3, b: DVec3, t: DVec3) -> DVec3 {
    DVec3::new(lerp(a.x, b.x, t.x), lerp(a.y, b.y, t.y), lerp(a.z, b.z, t.z))
}

/// 近似相等判断
#[inline]
pub fn near_eq(a: f64, b: f64, eps: f64) -> bool {
    (a - b).abs() <= eps
}

/// 平移 + 旋转 + 缩放组合为仿射矩阵
#[inline]
pub fn compose(translation: DVec3, rotation: DQuat, scale: DVec3) -> DMat4 {
    DMat4::from_scale_rotation_translation(scale, rotation, translation)
}

/// 提取平移分量
#[inline]
pub fn translation_of(m: &DMat4) -> DVec3 {
    m.w_axis.truncate()
}

/// 提取旋转分量（去除缩放后正交化）
pub fn rotation_of(m: &DMat4) -> DQuat {
    let x = m.x_axis.truncate().normalize_or_zero();
    let y = m.y_axis.truncate().normalize_or_zero();
    let z = m.z_axis.truncate().normalize_or_zero();
    if x == DVec3::ZERO || y == DVec3::ZERO || z == DVec3::ZERO {
        return DQuat::IDENTITY;
    }
    DQuat::from_mat3(&DMat3::from_cols(x, y, z)).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lerp_per_axis() {
        let v = lerp_per_axis(DVec3::ZERO, DVec3::new(10.0, 20.0, 30.0), DVec3::new(0.5, 0.25, 1.0));
        assert!((v - DVec3::new(5.0, 5.0, 30.0)).length() < 1e-12);
    }

    #[test]
    fn test_rotation_of_scaled_matrix() {
        let q = DQuat::from_rotation_z(0.7);
        let m = compose(DVec3::new(1.0, 2.0, 3.0), q, DVec3::new(2.0, 3.0, 4.0));
        let r = rotation_of(&m);
        assert!(r.dot(q).abs() > 1.0 - 1e-12);
        assert!((translation_of(&m) - DVec3::new(1.0, 2.0, 3.0)).length() < 1e-12);
    }
}
