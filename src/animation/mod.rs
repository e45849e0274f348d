//! 动画模块
//!
//! - 关键帧与插值曲线
//! - 按通道组织的关键帧轨道（登录帧索引、插值读取、插入时分割曲线）
//! - VMD / VPD 读写

pub mod keyframe;
pub mod motion;
pub mod motion_track;
pub mod vmd_loader;
pub mod vpd_file;

pub use keyframe::{
    BoneCurves, BoneKeyframe, CameraCurves, CameraKeyframe, IkEnable, IkKeyframe, Keyframe,
    LightKeyframe, MorphKeyframe, ShadowKeyframe,
};
pub use motion::{Motion, SharedMotion};
pub use motion_track::MotionTrack;
pub use vmd_loader::VmdFile;
pub use vpd_file::{VpdBone, VpdFile, VpdMorph};
