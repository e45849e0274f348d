//! MMD 物理配置
//!
//! 进程级默认值，可在运行时整体替换。
//! PhysicsBridge 在创建时读取一次快照。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 刚体世界参数
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsConfig {
    // ========== 重力 ==========
    /// 重力 Y 分量（MMD 单位，向下为负）
    pub gravity_y: f64,

    // ========== 模拟参数 ==========
    /// 固定步长对应的频率
    pub physics_fps: f64,
    /// 单次 step 允许的最大子步数
    pub max_substep_count: u32,
    /// 约束求解迭代次数
    pub solver_iterations: usize,

    // ========== 刚体 ==========
    /// 以下三项均乘到模型原值上
    pub linear_damping_scale: f64,
    pub angular_damping_scale: f64,
    pub mass_scale: f64,

    // ========== 6DOF 弹簧 ==========
    /// 弹簧刚度倍率
    pub spring_stiffness_scale: f64,
    /// 弹簧阻尼系数，阻尼 = sqrt(刚度 × 系数)
    pub spring_damping_factor: f64,

    // ========== 速度限制 ==========
    /// 线速度上限
    pub max_linear_velocity: f64,
    /// 角速度上限 (rad/s)
    pub max_angular_velocity: f64,

    // ========== 开关 ==========
    /// 关闭时不创建关节
    pub joints_enabled: bool,
    /// 每次 step 输出 debug 日志
    pub debug_log: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity_y: -98.0,

            physics_fps: 60.0,
            max_substep_count: 5,
            solver_iterations: 8,

            linear_damping_scale: 1.0,
            angular_damping_scale: 1.0,
            mass_scale: 1.0,

            spring_stiffness_scale: 1.0,
            spring_damping_factor: 1.0,

            max_linear_velocity: 100.0,
            max_angular_velocity: 50.0,

            joints_enabled: true,
            debug_log: false,
        }
    }
}

/// 进程级配置
static PHYSICS_CONFIG: Lazy<RwLock<PhysicsConfig>> =
    Lazy::new(|| RwLock::new(PhysicsConfig::default()));

/// 当前配置的副本
pub fn get_config() -> PhysicsConfig {
    PHYSICS_CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 替换全局配置（已创建的 PhysicsBridge 不受影响）
pub fn set_config(config: PhysicsConfig) {
    *PHYSICS_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *PHYSICS_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = PhysicsConfig::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = PhysicsConfig::default();
        assert_eq!(config.gravity_y, -98.0);
        assert_eq!(config.physics_fps, 60.0);
        assert_eq!(config.max_substep_count, 5);
        assert!(config.joints_enabled);
    }
}
