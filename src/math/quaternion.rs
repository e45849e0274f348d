//! 四元数辅助运算
//!
//! 全部为纯函数。内部四元数保持原始符号，只在读取文件和 slerp 时做短弧处理。

use glam::{DQuat, DVec3, EulerRot};
use std::f64::consts::PI;

/// 视为相同旋转的阈值
const QUAT_EPSILON: f64 = 1e-8;

/// 轴角构造旋转；零长度轴返回单位四元数
pub fn from_axis_angle(axis: DVec3, angle: f64) -> DQuat {
    let axis = axis.normalize_or_zero();
    if axis == DVec3::ZERO {
        return DQuat::IDENTITY;
    }
    DQuat::from_axis_angle(axis, angle)
}

/// 分解为 (单位轴, 角度)，角度范围 [0, 2π)
pub fn to_axis_angle(q: DQuat) -> (DVec3, f64) {
    let q = q.normalize();
    let w = q.w.clamp(-1.0, 1.0);
    let angle = 2.0 * w.acos();
    let s = (1.0 - w * w).sqrt();
    if s < QUAT_EPSILON {
        return (DVec3::X, 0.0);
    }
    (DVec3::new(q.x, q.y, q.z) / s, angle)
}

/// 规范化到 w >= 0
#[inline]
pub fn canonicalize(q: DQuat) -> DQuat {
    if q.w < 0.0 {
        -q
    } else {
        q
    }
}

/// 归一化；长度接近 0 或含 NaN 时返回单位四元数
#[inline]
pub fn normalize_or_identity(q: DQuat) -> DQuat {
    let len_sq = q.length_squared();
    if len_sq.is_finite() && len_sq > QUAT_EPSILON * QUAT_EPSILON {
        q / len_sq.sqrt()
    } else {
        DQuat::IDENTITY
    }
}

/// 两个四元数是否表示同一旋转（忽略符号）
#[inline]
pub fn same_rotation(a: DQuat, b: DQuat, eps: f64) -> bool {
    (1.0 - a.dot(b).abs()) < eps
}

/// 短弧球面插值
pub fn slerp(q: DQuat, other: DQuat, t: f64) -> DQuat {
    if t <= 0.0 {
        return q;
    }
    if t >= 1.0 {
        return other;
    }
    if same_rotation(q, other, QUAT_EPSILON) && (q - other).length() < QUAT_EPSILON {
        return q;
    }

    let mut cos = q.dot(other);
    let mut target = other;
    if cos < 0.0 {
        cos = -cos;
        target = -other;
    }

    if cos > 0.9999 {
        return (q * (1.0 - t) + target * t).normalize();
    }

    let theta = cos.acos();
    let sin = theta.sin();
    let a = ((1.0 - t) * theta).sin() / sin;
    let b = (t * theta).sin() / sin;
    (q * a + target * b).normalize()
}

/// 四元数的标量幂：identity → q 路径上的 factor 位置，允许负数和大于 1 的系数
pub fn muled_scalar(q: DQuat, factor: f64) -> DQuat {
    if factor == 0.0 {
        return DQuat::IDENTITY;
    }
    if factor == 1.0 {
        return q;
    }
    if factor == -1.0 {
        return q.inverse();
    }
    if (0.0..1.0).contains(&factor) {
        return slerp(DQuat::IDENTITY, q, factor);
    }

    let (axis, angle) = to_axis_angle(canonicalize(q));
    if angle == 0.0 {
        return DQuat::IDENTITY;
    }
    DQuat::from_axis_angle(axis, angle * factor)
}

/// 欧拉角 (x, y, z)，MMD 使用 YXZ 顺序：q = Ry · Rx · Rz
pub fn to_euler(q: DQuat) -> DVec3 {
    let (y, x, z) = q.to_euler(EulerRot::YXZ);
    DVec3::new(x, y, z)
}

/// 由欧拉角 (x, y, z) 构造旋转，YXZ 顺序
pub fn from_euler(euler: DVec3) -> DQuat {
    DQuat::from_euler(EulerRot::YXZ, euler.y, euler.x, euler.z)
}

/// 由角度制欧拉角构造旋转
pub fn from_euler_degrees(x: f64, y: f64, z: f64) -> DQuat {
    from_euler(DVec3::new(x.to_radians(), y.to_radians(), z.to_radians()))
}

/// 固定轴投影
///
/// 旋转轴替换为 `axis`，角度按两轴点积的符号取正负；旋转轴与 `axis` 垂直时结果为单位旋转。
pub fn to_fixed_axis(q: DQuat, axis: DVec3) -> DQuat {
    let fixed = axis.normalize_or_zero();
    if fixed == DVec3::ZERO {
        return q;
    }

    let (rot_axis, angle) = to_axis_angle(q);
    if angle == 0.0 {
        return DQuat::IDENTITY;
    }

    let dot = rot_axis.dot(fixed);
    if dot.abs() < QUAT_EPSILON {
        return DQuat::IDENTITY;
    }
    let signed = if dot < 0.0 { -angle } else { angle };
    DQuat::from_axis_angle(fixed, signed)
}

/// 将 `a` 旋转到 `b` 的最短弧旋转
///
/// 反向时选取与 `a` 垂直的轴（优先 X，退化时用 Y）旋转 180°。
pub fn vec_rotation_between(a: DVec3, b: DVec3) -> DQuat {
    let a = a.normalize_or_zero();
    let b = b.normalize_or_zero();
    if a == DVec3::ZERO || b == DVec3::ZERO {
        return DQuat::IDENTITY;
    }

    let dot = a.dot(b);
    if dot >= 1.0 - 1e-12 {
        return DQuat::IDENTITY;
    }
    if dot <= -1.0 + 1e-12 {
        let mut axis = a.cross(DVec3::X);
        if axis.length_squared() < 1e-12 {
            axis = a.cross(DVec3::Y);
        }
        return DQuat::from_axis_angle(axis.normalize(), PI);
    }

    let s = ((1.0 + dot) * 2.0).sqrt();
    let c = a.cross(b) / s;
    DQuat::from_xyzw(c.x, c.y, c.z, s * 0.5).normalize()
}

/// 分解为绕 `axis` 的扭转与剩余摆动：q = swing · twist
pub fn separate_twist_by_axis(q: DQuat, axis: DVec3) -> (DQuat, DQuat) {
    let axis = axis.normalize_or_zero();
    if axis == DVec3::ZERO {
        return (DQuat::IDENTITY, q);
    }
    let v = DVec3::new(q.x, q.y, q.z);
    let p = axis * v.dot(axis);
    let twist = DQuat::from_xyzw(p.x, p.y, p.z, q.w);
    if twist.length_squared() < QUAT_EPSILON {
        return (DQuat::IDENTITY, q);
    }
    let twist = twist.normalize();
    (twist, q * twist.inverse())
}

/// 两个旋转之间的夹角（弧度，短弧）
pub fn angle_between(a: DQuat, b: DQuat) -> f64 {
    let d = a.normalize().dot(b.normalize()).abs().min(1.0);
    2.0 * d.acos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_same(a: DQuat, b: DQuat, eps: f64) {
        assert!(same_rotation(a, b, eps), "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_normalize_or_identity() {
        assert_eq!(normalize_or_identity(DQuat::from_xyzw(0.0, 0.0, 0.0, 0.0)), DQuat::IDENTITY);
        assert_eq!(normalize_or_identity(DQuat::from_xyzw(f64::NAN, 0.0, 0.0, 1.0)), DQuat::IDENTITY);
        let q = normalize_or_identity(DQuat::from_xyzw(0.0, 0.0, 2.0, 0.0));
        assert!((q.z - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_slerp_endpoints() {
        let a = DQuat::from_rotation_y(0.3);
        let b = DQuat::from_rotation_x(1.2);
        assert_eq!(slerp(a, b, 0.0), a);
        assert_eq!(slerp(a, b, 1.0), b);
        assert_eq!(slerp(a, b, -0.5), a);
    }

    #[test]
    fn test_slerp_short_arc_midpoint() {
        let a = DQuat::IDENTITY;
        let b = -from_euler_degrees(0.0, 0.0, 90.0);
        let mid = slerp(a, b, 0.5);
        assert_same(mid, from_euler_degrees(0.0, 0.0, 45.0), 1e-10);

        // mid · mid⁻¹ · slerp(1) = b（忽略符号）
        let round = mid * mid.inverse() * slerp(a, b, 1.0);
        assert_same(round, b, 1e-12);
        assert!(angle_between(a, mid) <= angle_between(a, b) * 0.5 + 1e-9);
    }

    #[test]
    fn test_slerp_various_pairs_halve_angle() {
        let pairs = [
            (DQuat::from_rotation_x(0.2), DQuat::from_rotation_y(2.9)),
            (from_euler_degrees(10.0, 20.0, 30.0), from_euler_degrees(-170.0, 40.0, 5.0)),
            (DQuat::from_rotation_z(3.0), DQuat::from_rotation_z(-3.0)),
        ];
        for (a, b) in pairs {
            let mid = slerp(a, b, 0.5);
            assert!(angle_between(a, mid) <= angle_between(a, b) * 0.5 + 1e-9);
            assert_same(mid * mid.inverse() * slerp(a, b, 1.0), b, 1e-12);
        }
    }

    #[test]
    fn test_muled_scalar() {
        let q = DQuat::from_rotation_z(std::f64::consts::FRAC_PI_4);
        assert_eq!(muled_scalar(q, 0.0), DQuat::IDENTITY);
        assert_same(muled_scalar(q, 0.5), DQuat::from_rotation_z(std::f64::consts::FRAC_PI_8), 1e-12);
        assert_same(muled_scalar(q, -1.0), DQuat::from_rotation_z(-std::f64::consts::FRAC_PI_4), 1e-12);
        assert_same(muled_scalar(q, 2.0), DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2), 1e-12);
        assert_same(muled_scalar(q, -0.5), DQuat::from_rotation_z(-std::f64::consts::FRAC_PI_8), 1e-12);
    }

    #[test]
    fn test_to_fixed_axis_knee() {
        let axis = DVec3::X;
        let around_y = from_axis_angle(DVec3::Y, 30f64.to_radians());
        assert_same(to_fixed_axis(around_y, axis), DQuat::IDENTITY, 1e-12);

        let around_x = from_axis_angle(DVec3::X, 30f64.to_radians());
        assert_same(to_fixed_axis(around_x, axis), around_x, 1e-12);
    }

    #[test]
    fn test_to_fixed_axis_sign_follows_dot() {
        let axis = DVec3::new(1.0, 1.0, 0.0).normalize();
        let authored = from_axis_angle(DVec3::new(-1.0, 0.2, 0.1), 0.8);
        let projected = to_fixed_axis(authored, axis);

        let (out_axis, out_angle) = to_axis_angle(projected);
        let (in_axis, in_angle) = to_axis_angle(authored);
        assert!(out_axis.cross(axis).length() < 1e-9);
        let sign = in_axis.dot(axis).signum();
        let signed_out = out_angle * out_axis.dot(axis).signum();
        assert!((signed_out - in_angle * sign).abs() < 1e-9);
    }

    #[test]
    fn test_vec_rotation_between() {
        let q = vec_rotation_between(DVec3::Y, DVec3::Z);
        assert!((q * DVec3::Y - DVec3::Z).length() < 1e-12);

        let q = vec_rotation_between(DVec3::X, DVec3::NEG_X);
        assert!((q * DVec3::X - DVec3::NEG_X).length() < 1e-12);

        let q = vec_rotation_between(DVec3::Y, DVec3::NEG_Y);
        assert!((q * DVec3::Y - DVec3::NEG_Y).length() < 1e-12);
        let (axis, _) = to_axis_angle(q);
        assert!(axis.dot(DVec3::Y).abs() < 1e-12);

        assert_eq!(vec_rotation_between(DVec3::ZERO, DVec3::X), DQuat::IDENTITY);
    }

    #[test]
    fn test_euler_round_trip_order() {
        let e = DVec3::new(0.3, -0.5, 1.1);
        let q = from_euler(e);
        let expected = DQuat::from_rotation_y(e.y) * DQuat::from_rotation_x(e.x) * DQuat::from_rotation_z(e.z);
        assert_same(q, expected, 1e-12);
        assert!((to_euler(q) - e).length() < 1e-9);
    }

    #[test]
    fn test_separate_twist() {
        let twist = DQuat::from_rotation_y(0.6);
        let swing = DQuat::from_rotation_x(0.4);
        let (t, s) = separate_twist_by_axis(swing * twist, DVec3::Y);
        assert_same(s * t, swing * twist, 1e-12);
        let (axis, _) = to_axis_angle(t);
        assert!(axis.cross(DVec3::Y).length() < 1e-9);
    }
}
