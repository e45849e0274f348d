//! 骨骼系统
//!
//! 核心设计思想：
//! - BoneLink: 单个骨骼节点的静态数据
//! - BoneSet: 校验后的骨骼层次结构与预计算的求值顺序
//! - BoneResolver: 按顺序合成每帧骨骼变换
//! - IkSolver: IK 求解器

mod bone_link;
mod bone_set;
mod ik_solver;
mod resolver;

pub use bone_link::{AppendConfig, BoneFlags, BoneLink, IkConfig, IkLink};
pub use bone_set::{BoneSet, Phase};
pub use ik_solver::{limit_rotation, IkReport, IkSolver, IK_EPSILON};
pub use resolver::BoneResolver;
