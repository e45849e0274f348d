//! Motion 数据
//!
//! 按通道名组织的关键帧存储，以及读多写少场景下的读写锁包装。

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::keyframe::{
    BoneKeyframe, CameraKeyframe, IkKeyframe, Keyframe, LightKeyframe, MorphKeyframe,
    ShadowKeyframe,
};
use super::motion_track::MotionTrack;

/// Motion 数据
#[derive(Debug, Clone, Default)]
pub struct Motion {
    /// 目标模型名称
    pub model_name: String,
    /// 骨骼轨道（骨骼名 -> 轨道）
    pub bone_tracks: HashMap<String, MotionTrack<BoneKeyframe>>,
    /// Morph 轨道（Morph 名 -> 轨道）
    pub morph_tracks: HashMap<String, MotionTrack<MorphKeyframe>>,
    pub camera_track: MotionTrack<CameraKeyframe>,
    pub light_track: MotionTrack<LightKeyframe>,
    pub shadow_track: MotionTrack<ShadowKeyframe>,
    pub ik_track: MotionTrack<IkKeyframe>,
}

impl Motion {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================
    // 骨骼
    // ========================================

    /// 插入骨骼关键帧（登录帧会分割前后曲线）
    pub fn insert_bone(&mut self, name: &str, keyframe: BoneKeyframe) {
        self.insert_bone_with(name, keyframe, true);
    }

    /// 插入骨骼关键帧，显式指定是否分割曲线
    pub fn insert_bone_with(&mut self, name: &str, keyframe: BoneKeyframe, split: bool) {
        self.bone_tracks
            .entry(name.to_string())
            .or_default()
            .insert(keyframe, split);
    }

    /// 取骨骼关键帧（无轨道时返回默认帧）
    pub fn get_bone(&self, name: &str, frame: f64) -> BoneKeyframe {
        match self.bone_tracks.get(name) {
            Some(track) => track.get_at(frame),
            None => BoneKeyframe::default_at(frame.max(0.0).floor() as u32),
        }
    }

    #[inline]
    pub fn bone_track(&self, name: &str) -> Option<&MotionTrack<BoneKeyframe>> {
        self.bone_tracks.get(name)
    }

    #[inline]
    pub fn contains_bone_track(&self, name: &str) -> bool {
        self.bone_tracks.contains_key(name)
    }

    /// 骨骼名称（排序后）
    pub fn bone_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bone_tracks.keys().cloned().collect();
        names.sort();
        names
    }

    // ========================================
    // Morph
    // ========================================

    pub fn insert_morph(&mut self, name: &str, keyframe: MorphKeyframe) {
        self.morph_tracks
            .entry(name.to_string())
            .or_default()
            .insert(keyframe, true);
    }

    /// 取 Morph 权重（无轨道时为 0）
    pub fn get_morph(&self, name: &str, frame: f64) -> f64 {
        self.morph_tracks
            .get(name)
            .map_or(0.0, |track| track.get_at(frame).ratio)
    }

    #[inline]
    pub fn morph_track(&self, name: &str) -> Option<&MotionTrack<MorphKeyframe>> {
        self.morph_tracks.get(name)
    }

    pub fn morph_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.morph_tracks.keys().cloned().collect();
        names.sort();
        names
    }

    // ========================================
    // IK 开关
    // ========================================

    /// 指定帧某个 IK 骨骼是否启用
    pub fn is_ik_enabled(&self, bone_name: &str, frame: f64) -> bool {
        if self.ik_track.is_empty() {
            return true;
        }
        self.ik_track.get_at(frame).is_enabled(bone_name)
    }

    /// 指定帧该骨骼是否关闭物理
    pub fn is_physics_disabled(&self, bone_name: &str, frame: f64) -> bool {
        self.bone_tracks
            .get(bone_name)
            .map_or(false, |track| track.get_at(frame).disable_physics)
    }

    // ========================================
    // 统计
    // ========================================

    /// 所有轨道中的最大帧索引
    pub fn max_frame(&self) -> u32 {
        let bones = self.bone_tracks.values().map(|t| t.max_index());
        let morphs = self.morph_tracks.values().map(|t| t.max_index());
        bones
            .chain(morphs)
            .chain([
                self.camera_track.max_index(),
                self.light_track.max_index(),
                self.shadow_track.max_index(),
                self.ik_track.max_index(),
            ])
            .max()
            .unwrap_or(0)
    }

    /// 骨骼关键帧总数
    pub fn bone_keyframe_count(&self) -> usize {
        self.bone_tracks.values().map(|t| t.len()).sum()
    }

    /// Morph 关键帧总数
    pub fn morph_keyframe_count(&self) -> usize {
        self.morph_tracks.values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bone_keyframe_count() == 0
            && self.morph_keyframe_count() == 0
            && self.camera_track.is_empty()
            && self.light_track.is_empty()
            && self.shadow_track.is_empty()
            && self.ik_track.is_empty()
    }
}

// ============================================================================
// 共享 Motion
// ============================================================================

/// 读写锁包装的 Motion：求值时并发读取，编辑时独占写入
#[derive(Debug, Clone, Default)]
pub struct SharedMotion {
    inner: Arc<RwLock<Motion>>,
}

impl SharedMotion {
    pub fn new(motion: Motion) -> Self {
        Self {
            inner: Arc::new(RwLock::new(motion)),
        }
    }

    /// 读锁（锁中毒时继续使用内部数据）
    pub fn read(&self) -> RwLockReadGuard<'_, Motion> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// 写锁（锁中毒时继续使用内部数据）
    pub fn write(&self) -> RwLockWriteGuard<'_, Motion> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_bone(&self, name: &str, keyframe: BoneKeyframe) {
        self.write().insert_bone(name, keyframe);
    }

    pub fn get_bone(&self, name: &str, frame: f64) -> BoneKeyframe {
        self.read().get_bone(name, frame)
    }

    pub fn insert_morph(&self, name: &str, keyframe: MorphKeyframe) {
        self.write().insert_morph(name, keyframe);
    }

    pub fn get_morph(&self, name: &str, frame: f64) -> f64 {
        self.read().get_morph(name, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use std::thread;

    #[test]
    fn test_motion_defaults() {
        let motion = Motion::new();
        let kf = motion.get_bone("センター", 12.0);
        assert_eq!(kf.index, 12);
        assert_eq!(kf.position, DVec3::ZERO);
        assert_eq!(motion.get_morph("まばたき", 3.0), 0.0);
        assert!(motion.is_ik_enabled("左足ＩＫ", 0.0));
        assert!(motion.is_empty());
    }

    #[test]
    fn test_max_frame_spans_tracks() {
        let mut motion = Motion::new();
        motion.insert_bone("センター", BoneKeyframe::new(30));
        motion.insert_morph("あ", MorphKeyframe::new(45, 1.0));
        assert_eq!(motion.max_frame(), 45);
        assert_eq!(motion.bone_names(), vec!["センター".to_string()]);
    }

    #[test]
    fn test_shared_motion_concurrent_reads() {
        let shared = SharedMotion::new(Motion::new());
        shared.insert_bone("center", BoneKeyframe::new(0));
        shared.insert_bone(
            "center",
            BoneKeyframe::new(100).with_position(DVec3::new(10.0, 0.0, 0.0)),
        );

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let s = shared.clone();
                thread::spawn(move || s.get_bone("center", (i * 25) as f64).position.x)
            })
            .collect();
        let results: Vec<f64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (i, x) in results.iter().enumerate() {
            assert!((x - i as f64 * 2.5).abs() < 1e-12);
        }
    }
}
