//! IK 求解器（CCD + 角度限制）
//!
//! 设计原则：
//! - 在 BoneDeltas 上迭代求解，模型保持不可变
//! - 每个链接在自身局部空间中把效应骨骼方向转向目标方向，单次转角不超过 limit_angle
//! - 单轴限制（膝盖等）把旋转轴吸附到该轴
//! - 欧拉角限制按轴优先级分解，前半迭代越界时镜像回范围内
//! - 记录最佳结果，某次迭代没有改善时回退并结束

use std::f64::consts::FRAC_PI_2;

use glam::{DMat3, DQuat, DVec3};

use crate::delta::BoneDeltas;
use crate::math::quaternion;

use super::bone_link::{BoneLink, IkConfig, IkLink};
use super::bone_set::BoneSet;
use super::resolver::refresh_subtree;

/// 收敛距离
pub const IK_EPSILON: f64 = 1e-4;
/// 万向节锁回避角度（88 度）
const GIMBAL_LIMIT: f64 = 88.0 * std::f64::consts::PI / 180.0;

// ============================================================================
// 求解报告
// ============================================================================

/// 单次求解的结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IkReport {
    /// 实际执行的迭代次数；某次迭代没有缩短距离时求解提前结束，可能小于配置值
    pub iterations: u32,
    /// 每次迭代后的效应骨骼到目标距离（单调不增）
    pub distances: Vec<f64>,
    /// 是否达到收敛距离
    pub converged: bool,
}

impl IkReport {
    /// 最终距离
    pub fn final_distance(&self) -> Option<f64> {
        self.distances.last().copied()
    }
}

// ============================================================================
// IK 求解器
// ============================================================================

/// IK 求解器
#[derive(Clone, Debug)]
pub struct IkSolver<'a> {
    /// IK 骨骼索引（其全局位置即目标位置）
    pub bone_index: usize,
    /// IK 配置
    pub config: &'a IkConfig,
    /// 是否启用
    pub enabled: bool,
}

impl<'a> IkSolver<'a> {
    pub fn new(bone_index: usize, config: &'a IkConfig) -> Self {
        Self {
            bone_index,
            config,
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 求解 IK，修改链接骨骼的 ik_rotation 并刷新其子树
    ///
    /// 某次迭代没有缩短距离时回退到最佳姿势并结束。
    pub fn solve(&self, bones: &BoneSet, deltas: &mut BoneDeltas) -> IkReport {
        let mut report = IkReport::default();
        if !self.enabled || self.config.links.is_empty() || self.config.target_bone < 0 {
            return report;
        }
        let effector = self.config.target_bone as usize;
        let Some(goal) = deltas.global_position(self.bone_index) else {
            return report;
        };
        if !deltas.contains(effector) {
            return report;
        }

        let distance = |deltas: &BoneDeltas| {
            deltas
                .global_position(effector)
                .map_or(f64::MAX, |p| (p - goal).length())
        };

        let mut best_distance = distance(deltas);
        if best_distance < IK_EPSILON {
            report.converged = true;
            return report;
        }
        let mut best_rotations = self.snapshot(deltas);

        for iteration in 0..self.config.iterations {
            report.iterations = iteration + 1;
            for link in &self.config.links {
                self.solve_link(bones, deltas, link, effector, goal, iteration);
            }

            let current = distance(deltas);
            if current < best_distance {
                best_distance = current;
                best_rotations = self.snapshot(deltas);
                report.distances.push(current);
            } else {
                // 没有改善：回退到最佳结果并结束
                self.restore(bones, deltas, &best_rotations);
                report.distances.push(best_distance);
                break;
            }

            if current < IK_EPSILON {
                report.converged = true;
                break;
            }
        }

        log::debug!(
            "IK '{}' 迭代 {} 次, 距离 {:?}, 收敛 {}",
            bones.get(self.bone_index).map_or("", |b| b.name.as_str()),
            report.iterations,
            report.final_distance(),
            report.converged
        );
        report
    }

    /// 单个链接的一步 CCD
    fn solve_link(
        &self,
        bones: &BoneSet,
        deltas: &mut BoneDeltas,
        link: &IkLink,
        effector: usize,
        goal: DVec3,
        iteration: u32,
    ) {
        if link.bone_index < 0 {
            return;
        }
        let link_index = link.bone_index as usize;
        if link_index == effector {
            return;
        }
        let Some(bone) = bones.get(link_index) else {
            return;
        };
        // 角度限制全为 0 的链接不参与
        if link.has_limits && link.limit_min == DVec3::ZERO && link.limit_max == DVec3::ZERO {
            return;
        }
        let (Some(link_global), Some(effector_pos)) =
            (deltas.global_matrix(link_index), deltas.global_position(effector))
        else {
            return;
        };

        let inv = link_global.inverse();
        let u = inv.transform_point3(effector_pos).normalize_or_zero();
        let v = inv.transform_point3(goal).normalize_or_zero();
        if u == DVec3::ZERO || v == DVec3::ZERO || (u - v).length() < 1e-5 {
            return;
        }

        let angle = u.dot(v).clamp(-1.0, 1.0).acos().min(self.config.limit_angle);
        let mut axis = u.cross(v);
        if axis.length_squared() < 1e-12 {
            axis = fallback_axis(bone, u);
        }
        let mut axis = axis.normalize();
        if let Some(i) = link.single_axis() {
            let unit = DVec3::AXES[i];
            axis = if axis[i] < 0.0 { -unit } else { unit };
        }

        let fixed_axis = bone.fixed_axis.map(|a| a.normalize_or_zero()).filter(|a| *a != DVec3::ZERO);
        let q = match fixed_axis {
            Some(fixed) if !link.has_limits => {
                quaternion::separate_twist_by_axis(quaternion::from_axis_angle(axis, angle), fixed).0
            }
            Some(fixed) => {
                let signed = if axis.dot(fixed) < 0.0 { -angle } else { angle };
                quaternion::from_axis_angle(fixed, signed)
            }
            None => quaternion::from_axis_angle(axis, angle),
        };

        let Some(delta) = deltas.get_mut(link_index) else {
            return;
        };
        // 链接局部空间中的旋转换回动画旋转所在空间
        let basis = delta.append_rotation * delta.cancel_rotation;
        let mut result = delta.animated_rotation() * (basis * q * basis.inverse());
        if link.has_limits {
            result = limit_rotation(
                result,
                link.limit_min,
                link.limit_max,
                iteration,
                self.config.iterations,
            );
        }
        if let Some(fixed) = fixed_axis {
            result = quaternion::to_fixed_axis(result, fixed);
        }
        delta.ik_rotation = Some(result.normalize());

        refresh_subtree(bones, deltas, link_index);
    }

    fn snapshot(&self, deltas: &BoneDeltas) -> Vec<Option<DQuat>> {
        self.config
            .links
            .iter()
            .map(|l| {
                usize::try_from(l.bone_index)
                    .ok()
                    .and_then(|i| deltas.get(i))
                    .and_then(|d| d.ik_rotation)
            })
            .collect()
    }

    fn restore(&self, bones: &BoneSet, deltas: &mut BoneDeltas, rotations: &[Option<DQuat>]) {
        for (link, rotation) in self.config.links.iter().zip(rotations) {
            let Ok(index) = usize::try_from(link.bone_index) else {
                continue;
            };
            if let Some(delta) = deltas.get_mut(index) {
                delta.ik_rotation = *rotation;
            }
        }
        // 链接靠近效应骨骼的在前，从根侧开始刷新
        for link in self.config.links.iter().rev() {
            if let Ok(index) = usize::try_from(link.bone_index) {
                if deltas.contains(index) {
                    refresh_subtree(bones, deltas, index);
                }
            }
        }
    }
}

/// u、v 反向时的旋转轴：固定轴、本地 Y 轴或世界 Y 轴，与 u 正交化
fn fallback_axis(bone: &BoneLink, u: DVec3) -> DVec3 {
    let candidate = bone
        .fixed_axis
        .or_else(|| bone.local_axes_rotation().map(|q| q * DVec3::Y))
        .unwrap_or(DVec3::Y);
    let orthogonal = candidate - u * candidate.dot(u);
    if orthogonal.length_squared() > 1e-12 {
        orthogonal
    } else {
        u.any_orthonormal_vector()
    }
}

// ============================================================================
// 角度限制
// ============================================================================

/// 按轴优先级分解欧拉角并限制到 [min, max]
///
/// - X 范围在 ±90° 内：按 Y·X·Z 分解
/// - 否则 Y 范围在 ±90° 内：按 Z·Y·X 分解
/// - 否则按 X·Z·Y 分解
///
/// 中间轴限制在 ±88° 以避开万向节锁。
pub fn limit_rotation(q: DQuat, min: DVec3, max: DVec3, iteration: u32, iterations: u32) -> DQuat {
    let m = DMat3::from_quat(q);
    let reflect = (iteration as f64) < iterations as f64 / 2.0;
    let clamp = |v: f64, lo: f64, hi: f64| clamp_axis(v, lo, hi, reflect);
    let rx = |a: f64| DQuat::from_rotation_x(a);
    let ry = |a: f64| DQuat::from_rotation_y(a);
    let rz = |a: f64| DQuat::from_rotation_z(a);

    if min.x > -FRAC_PI_2 && max.x < FRAC_PI_2 {
        let x = (-m.z_axis.y).clamp(-1.0, 1.0).asin().clamp(-GIMBAL_LIMIT, GIMBAL_LIMIT);
        let cx = x.cos();
        let y = (m.z_axis.x / cx).atan2(m.z_axis.z / cx);
        let z = (m.x_axis.y / cx).atan2(m.y_axis.y / cx);
        let (x, y, z) = (clamp(x, min.x, max.x), clamp(y, min.y, max.y), clamp(z, min.z, max.z));
        ry(y) * rx(x) * rz(z)
    } else if min.y > -FRAC_PI_2 && max.y < FRAC_PI_2 {
        let y = (-m.x_axis.z).clamp(-1.0, 1.0).asin().clamp(-GIMBAL_LIMIT, GIMBAL_LIMIT);
        let cy = y.cos();
        let x = (m.y_axis.z / cy).atan2(m.z_axis.z / cy);
        let z = (m.x_axis.y / cy).atan2(m.x_axis.x / cy);
        let (x, y, z) = (clamp(x, min.x, max.x), clamp(y, min.y, max.y), clamp(z, min.z, max.z));
        rz(z) * ry(y) * rx(x)
    } else {
        let z = (-m.y_axis.x).clamp(-1.0, 1.0).asin().clamp(-GIMBAL_LIMIT, GIMBAL_LIMIT);
        let cz = z.cos();
        let x = (m.y_axis.z / cz).atan2(m.y_axis.y / cz);
        let y = (m.z_axis.x / cz).atan2(m.x_axis.x / cz);
        let (x, y, z) = (clamp(x, min.x, max.x), clamp(y, min.y, max.y), clamp(z, min.z, max.z));
        rx(x) * rz(z) * ry(y)
    }
}

/// 单轴限制；reflect 时越界值先尝试以边界为镜面反射回范围内
fn clamp_axis(value: f64, min: f64, max: f64, reflect: bool) -> f64 {
    let mut v = value;
    if v < min {
        let mirrored = 2.0 * min - v;
        v = if reflect && mirrored <= max { mirrored } else { min };
    }
    if v > max {
        let mirrored = 2.0 * max - v;
        v = if reflect && mirrored >= min { mirrored } else { max };
    }
    v
}
