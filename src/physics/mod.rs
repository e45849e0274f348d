//! MMD 物理系统模块
//!
//! 使用 rapier3d 作为刚体世界。
//!
//! | MMD | rapier |
//! |-----|--------|
//! | 刚体世界 | PhysicsPipeline + RigidBodySet + ColliderSet + ImpulseJointSet |
//! | 跟随骨骼刚体 | KinematicPositionBased |
//! | 物理刚体 | Dynamic |
//! | 6DOF 弹簧约束 | GenericJoint + limits + motors |
//! | 球 / 盒 / 胶囊 | SharedShape::ball / cuboid / capsule_y |

pub mod config;
mod mmd_joint;
mod mmd_physics;
mod mmd_rigid_body;

pub use config::{get_config, reset_config, set_config, PhysicsConfig};
pub use mmd_joint::JointDef;
pub use mmd_physics::PhysicsBridge;
pub use mmd_rigid_body::{PhysicsBody, RigidBodyDef, RigidBodyMode, RigidBodyShape};
