//! MMD 骨骼动画求值器
//!
//! 数据流（单帧）：
//! - MorphResolver：累积顶点 / UV / 骨骼 / 材质变形
//! - BoneResolver：按依赖顺序计算骨骼变换（父子、付与、固定轴、本地轴、IK）
//! - PhysicsBridge：固定步长驱动刚体世界并回写骨骼
//! - DeltaAssembly：整理为渲染可用的连续数组
//!
//! 内部坐标系保持 MMD 约定（左手系，Y 轴向上），坐标转换只发生在 DeltaAssembly。

pub mod animation;
pub mod delta;
pub mod evaluator;
pub mod math;
pub mod model;
pub mod morph;
pub mod physics;
pub mod skeleton;

pub use animation::{Motion, SharedMotion};
pub use delta::{BoneDeltas, CoordinateSystem, DeltaAssembly, MorphDeltas};
pub use evaluator::{EvaluationResult, Evaluator};
pub use model::MmdModel;
pub use physics::PhysicsBridge;

use thiserror::Error;

/// 错误类型
#[derive(Error, Debug)]
pub enum MmdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("VMD parse error: {0}")]
    VmdParse(String),

    #[error("VPD parse error: {0}")]
    VpdParse(String),

    #[error("Model validation error: {0}")]
    Validation(String),

    #[error("Animation error: {0}")]
    Animation(String),
}

pub type Result<T> = std::result::Result<T, MmdError>;
