//! 动画轨道
//!
//! 单个通道（骨骼名 / Morph 名）的有序稀疏关键帧容器：
//! - 全部关键帧按帧索引存储
//! - 登录帧另建索引，插值时只在登录帧之间查找前后帧

use std::collections::{BTreeMap, BTreeSet};

use super::keyframe::Keyframe;

/// 关键帧轨道
#[derive(Debug, Clone)]
pub struct MotionTrack<F> {
    /// 关键帧映射（帧索引 -> 关键帧）
    frames: BTreeMap<u32, F>,
    /// 登录帧索引
    registered: BTreeSet<u32>,
}

impl<F> Default for MotionTrack<F> {
    fn default() -> Self {
        Self {
            frames: BTreeMap::new(),
            registered: BTreeSet::new(),
        }
    }
}

impl<F: Keyframe> MotionTrack<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入关键帧
    ///
    /// `split` 为真、关键帧为登录帧且严格位于前后登录帧之间时，分割 next 的曲线：
    /// 左半归新帧，右半写回 next。
    pub fn insert(&mut self, mut keyframe: F, split: bool) {
        let index = keyframe.index();

        if split && keyframe.is_registered() && !self.registered.contains(&index) {
            let prev = self.prev_registered(index);
            let next = self.next_registered(index);
            if let (Some(prev), Some(next)) = (prev, next) {
                if prev < index && index < next {
                    if let (Some(prev_frame), Some(mut next_frame)) =
                        (self.frames.get(&prev).cloned(), self.frames.get(&next).cloned())
                    {
                        keyframe.split_curves(&prev_frame, &mut next_frame);
                        self.frames.insert(next, next_frame);
                    }
                }
            }
        }

        if keyframe.is_registered() {
            self.registered.insert(index);
        } else {
            self.registered.remove(&index);
        }
        self.frames.insert(index, keyframe);
    }

    /// 取指定整数帧
    #[inline]
    pub fn get(&self, index: u32) -> F {
        self.get_at(index as f64)
    }

    /// 取指定帧（允许小数帧）
    ///
    /// 登录帧原样返回；否则在前后登录帧之间插值。
    pub fn get_at(&self, frame: f64) -> F {
        let frame = frame.max(0.0);
        let floor = frame.floor() as u32;
        let is_integral = frame.fract() == 0.0;

        if is_integral && self.registered.contains(&floor) {
            if let Some(kf) = self.frames.get(&floor) {
                return kf.clone();
            }
        }

        let prev = self.prev_registered(floor);
        let next = if is_integral {
            self.next_registered(floor)
        } else {
            self.next_registered(floor + 1)
        };

        match (prev, next) {
            (None, None) => F::default_at(floor),
            (Some(p), None) => self.frame_copy(p, floor),
            (None, Some(n)) => self.frame_copy(n, floor),
            (Some(p), Some(n)) if p == n => self.frame_copy(p, floor),
            (Some(p), Some(n)) => match (self.frames.get(&p), self.frames.get(&n)) {
                (Some(prev), Some(next)) => F::interpolate(prev, next, frame),
                _ => F::default_at(floor),
            },
        }
    }

    fn frame_copy(&self, source: u32, index: u32) -> F {
        self.frames
            .get(&source)
            .map(|kf| kf.with_index(index))
            .unwrap_or_else(|| F::default_at(index))
    }

    /// 不大于 index 的最近登录帧
    #[inline]
    pub fn prev_registered(&self, index: u32) -> Option<u32> {
        self.registered.range(..=index).next_back().copied()
    }

    /// 不小于 index 的最近登录帧
    #[inline]
    pub fn next_registered(&self, index: u32) -> Option<u32> {
        self.registered.range(index..).next().copied()
    }

    #[inline]
    pub fn contains_registered(&self, index: u32) -> bool {
        self.registered.contains(&index)
    }

    /// 存储中的原始关键帧（不插值）
    #[inline]
    pub fn stored(&self, index: u32) -> Option<&F> {
        self.frames.get(&index)
    }

    /// 移除关键帧
    pub fn remove(&mut self, index: u32) -> Option<F> {
        self.registered.remove(&index);
        self.frames.remove(&index)
    }

    /// 最小帧索引，空轨道为 0
    #[inline]
    pub fn min_index(&self) -> u32 {
        self.frames.keys().next().copied().unwrap_or(0)
    }

    /// 最大帧索引，空轨道为 0
    #[inline]
    pub fn max_index(&self) -> u32 {
        self.frames.keys().next_back().copied().unwrap_or(0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// 登录帧索引（升序）
    pub fn registered_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.registered.iter().copied()
    }

    /// 全部关键帧（升序）
    pub fn iter(&self) -> impl Iterator<Item = &F> + '_ {
        self.frames.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::keyframe::{BoneCurves, BoneKeyframe, MorphKeyframe};
    use crate::math::curve::Curve;
    use crate::math::quaternion::{from_euler_degrees, same_rotation};
    use glam::{DQuat, DVec3};

    fn linear_track() -> MotionTrack<BoneKeyframe> {
        let mut track = MotionTrack::new();
        track.insert(BoneKeyframe::new(0), true);
        track.insert(
            BoneKeyframe::new(100).with_position(DVec3::new(10.0, 0.0, 0.0)),
            true,
        );
        track
    }

    #[test]
    fn test_linear_translation() {
        let track = linear_track();
        let at50 = track.get(50);
        assert!((at50.position - DVec3::new(5.0, 0.0, 0.0)).length() < 1e-12);
        let at25 = track.get(25);
        assert!((at25.position - DVec3::new(2.5, 0.0, 0.0)).length() < 1e-12);
        assert_eq!(at25.index, 25);
        assert!(!at25.registered);
    }

    #[test]
    fn test_rotation_midpoint() {
        let mut track = MotionTrack::new();
        track.insert(BoneKeyframe::new(0), true);
        track.insert(
            BoneKeyframe::new(100)
                .with_rotation(from_euler_degrees(0.0, 0.0, 90.0))
                .with_curves(BoneCurves::uniform(Curve::new(20, 20, 107, 107))),
            true,
        );
        let mid = track.get(50);
        assert!(same_rotation(mid.rotation, from_euler_degrees(0.0, 0.0, 45.0), 1e-10));
    }

    #[test]
    fn test_registered_frame_verbatim() {
        let mut track = linear_track();
        let mut kf = BoneKeyframe::new(40)
            .with_position(DVec3::new(0.1, 0.2, 0.3))
            .with_rotation(DQuat::from_xyzw(0.1, 0.2, 0.3, 0.9));
        kf.scale = DVec3::new(1.5, 1.0, 0.5);
        kf.local_position = DVec3::new(-1.0, 2.0, 7.0);
        track.insert(kf.clone(), false);

        let got = track.get(40);
        assert_eq!(got, kf);
        assert!(track.contains_registered(40));
    }

    #[test]
    fn test_empty_and_single_frame() {
        let mut track: MotionTrack<BoneKeyframe> = MotionTrack::new();
        let empty = track.get(7);
        assert_eq!(empty.index, 7);
        assert_eq!(empty.position, DVec3::ZERO);
        assert_eq!(track.min_index(), 0);
        assert_eq!(track.max_index(), 0);

        track.insert(BoneKeyframe::new(10).with_position(DVec3::X), true);
        let after = track.get(20);
        assert_eq!(after.index, 20);
        assert_eq!(after.position, DVec3::X);
        let before = track.get(3);
        assert_eq!(before.position, DVec3::X);
    }

    #[test]
    fn test_insert_splits_curves() {
        let mut track = MotionTrack::new();
        track.insert(BoneKeyframe::new(0), true);
        track.insert(
            BoneKeyframe::new(10)
                .with_position(DVec3::new(10.0, 0.0, 0.0))
                .with_curves(BoneCurves::uniform(Curve::new(89, 2, 52, 106))),
            true,
        );

        let sampled = track.get(2);
        let mut inserted = sampled.clone();
        inserted.registered = true;
        track.insert(inserted, true);

        let left = track.get(2).curves.rotate;
        let right = track.get(10).curves.rotate;
        let close = |a: u8, b: u8| (a as i32 - b as i32).abs() <= 1;
        assert!(close(left.start[0], 50) && close(left.start[1], 7));
        assert!(close(left.end[0], 91) && close(left.end[1], 52));
        assert!(close(right.start[0], 71) && close(right.start[1], 21));
        assert!(close(right.end[0], 44) && close(right.end[1], 108));

        // 分割后中间帧的取样与原曲线接近
        let reread = track.get(6).position.x;
        let original = {
            let mut t = MotionTrack::new();
            t.insert(BoneKeyframe::new(0), true);
            t.insert(
                BoneKeyframe::new(10)
                    .with_position(DVec3::new(10.0, 0.0, 0.0))
                    .with_curves(BoneCurves::uniform(Curve::new(89, 2, 52, 106))),
                true,
            );
            t.get(6).position.x
        };
        assert!((reread - original).abs() < 0.1, "{} vs {}", reread, original);
    }

    #[test]
    fn test_unregistered_insert_does_not_split() {
        let mut track = MotionTrack::new();
        track.insert(BoneKeyframe::new(0), true);
        let curves = BoneCurves::uniform(Curve::new(89, 2, 52, 106));
        track.insert(BoneKeyframe::new(10).with_curves(curves), true);

        let mut synthesized = BoneKeyframe::new(5);
        synthesized.registered = false;
        track.insert(synthesized, true);

        assert_eq!(track.get(10).curves, curves);
        assert!(!track.contains_registered(5));
        assert_eq!(track.len(), 3);
    }

    #[test]
    fn test_fractional_frame() {
        let track = linear_track();
        let f = track.get_at(50.5);
        assert!((f.position.x - 5.05).abs() < 1e-12);
    }

    #[test]
    fn test_morph_track() {
        let mut track = MotionTrack::new();
        track.insert(MorphKeyframe::new(0, 0.0), true);
        track.insert(MorphKeyframe::new(20, 1.0), true);
        assert!((track.get(5).ratio - 0.25).abs() < 1e-12);
        assert_eq!(track.max_index(), 20);
        assert_eq!(track.registered_indices().collect::<Vec<_>>(), vec![0, 20]);
        assert!(track.remove(20).is_some());
        assert_eq!(track.get(5).ratio, 0.0);
    }
}
