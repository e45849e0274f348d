//! 帧结果模块
//!
//! - `BoneDelta` / `BoneDeltas`：骨骼求值结果
//! - `MorphDeltas`：顶点、骨骼、材质 Morph 累加结果
//! - `DeltaAssembly`：展开为渲染用数组，并负责坐标系转换

mod assembly;
mod bone_delta;
mod morph_delta;

pub use assembly::{CoordinateSystem, DeltaAssembly, MATERIAL_FLOATS};
pub use bone_delta::{BoneDelta, BoneDeltas};
pub use morph_delta::{BoneMorphDelta, MaterialMorphDelta, MorphDeltas, VertexMorphDelta};
