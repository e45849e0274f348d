//! VPD (Vocaloid Pose Data) 姿势文件
//!
//! Shift-JIS 文本，逐行解析：
//! - 首行为签名
//! - `<模型名>.osm;` 行给出模型名
//! - `Bone<n>{<骨骼名>` 块包含平移 `x,y,z;` 与四元数 `x,y,z,w;`
//! - `Morph<n>{<表情名>` 块包含权重（扩展格式）
//!
//! 结果为只有第 0 帧的 Motion。

use std::fs;
use std::path::Path;

use glam::{DQuat, DVec3};

use crate::math::quaternion;
use crate::{MmdError, Result};

use super::keyframe::{BoneKeyframe, MorphKeyframe};
use super::motion::Motion;

const VPD_SIGNATURE: &str = "Vocaloid Pose Data file";

/// VPD 骨骼姿势
#[derive(Clone, Debug, PartialEq)]
pub struct VpdBone {
    pub name: String,
    pub position: DVec3,
    pub rotation: DQuat,
}

/// VPD 表情
#[derive(Clone, Debug, PartialEq)]
pub struct VpdMorph {
    pub name: String,
    pub weight: f64,
}

/// VPD 文件数据
#[derive(Clone, Debug, Default)]
pub struct VpdFile {
    pub model_name: String,
    pub bones: Vec<VpdBone>,
    pub morphs: Vec<VpdMorph>,
}

/// 块解析状态
enum Block {
    None,
    Bone(VpdBone, usize),
    Morph(VpdMorph),
}

impl VpdFile {
    /// 从文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::parse(&bytes)
    }

    /// 解析 Shift-JIS 字节
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (content, _, _) = encoding_rs::SHIFT_JIS.decode(bytes);
        Self::parse_str(&content)
    }

    /// 解析已解码的文本
    pub fn parse_str(content: &str) -> Result<Self> {
        let mut lines = content.lines().enumerate();

        let signature = lines
            .by_ref()
            .map(|(_, l)| l.trim())
            .find(|l| !l.is_empty())
            .ok_or_else(|| MmdError::VpdParse("Empty VPD file".to_string()))?;
        if !signature.trim_start_matches('\u{feff}').starts_with(VPD_SIGNATURE) {
            return Err(MmdError::VpdParse("Invalid VPD header".to_string()));
        }

        let mut vpd = VpdFile::default();
        let mut block = Block::None;

        for (line_no, raw) in lines {
            let line = strip_comment(raw);
            if line.is_empty() {
                continue;
            }

            if line.starts_with('}') {
                match std::mem::replace(&mut block, Block::None) {
                    Block::Bone(bone, _) => vpd.bones.push(bone),
                    Block::Morph(morph) => vpd.morphs.push(morph),
                    Block::None => {}
                }
                continue;
            }

            match &mut block {
                Block::None => {
                    if let Some(name) = parse_model_name(line) {
                        vpd.model_name = name;
                    } else if let Some(rest) = block_header(line, "Bone") {
                        block = Block::Bone(
                            VpdBone {
                                name: rest.to_string(),
                                position: DVec3::ZERO,
                                rotation: DQuat::IDENTITY,
                            },
                            0,
                        );
                    } else if let Some(rest) = block_header(line, "Morph") {
                        block = Block::Morph(VpdMorph {
                            name: rest.to_string(),
                            weight: 0.0,
                        });
                    }
                    // 其余行（骨骼数量等）忽略
                }
                Block::Bone(bone, field) => {
                    if bone.name.is_empty() {
                        bone.name = line.to_string();
                        continue;
                    }
                    let values = parse_numbers(line, line_no)?;
                    match (*field, values.as_slice()) {
                        (0, [x, y, z]) => bone.position = DVec3::new(*x, *y, *z),
                        (1, [x, y, z, w]) => {
                            let raw = DQuat::from_xyzw(*x, *y, *z, *w);
                            bone.rotation =
                                quaternion::canonicalize(quaternion::normalize_or_identity(raw));
                        }
                        _ => {
                            return Err(MmdError::VpdParse(format!(
                                "Unexpected bone data at line {}: {}",
                                line_no + 1,
                                line
                            )))
                        }
                    }
                    *field += 1;
                }
                Block::Morph(morph) => {
                    if morph.name.is_empty() {
                        morph.name = line.to_string();
                        continue;
                    }
                    match parse_numbers(line, line_no)?.as_slice() {
                        [w] => morph.weight = *w,
                        _ => {
                            return Err(MmdError::VpdParse(format!(
                                "Unexpected morph data at line {}: {}",
                                line_no + 1,
                                line
                            )))
                        }
                    }
                }
            }
        }

        if !matches!(block, Block::None) {
            return Err(MmdError::VpdParse("Unterminated block at end of file".to_string()));
        }

        log::info!(
            "VPD 解析完成: {} 个骨骼, {} 个表情",
            vpd.bones.len(),
            vpd.morphs.len()
        );
        Ok(vpd)
    }

    /// 转换为单帧 Motion（第 0 帧）
    pub fn to_motion(&self) -> Motion {
        let mut motion = Motion::new();
        motion.model_name = self.model_name.clone();
        for bone in &self.bones {
            let mut kf = BoneKeyframe::new(0)
                .with_position(bone.position)
                .with_rotation(bone.rotation);
            kf.read = true;
            motion.insert_bone(&bone.name, kf);
        }
        for morph in &self.morphs {
            let mut kf = MorphKeyframe::new(0, morph.weight);
            kf.read = true;
            motion.insert_morph(&morph.name, kf);
        }
        motion
    }
}

/// 去掉行注释与首尾空白
fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(pos) => line[..pos].trim(),
        None => line.trim(),
    }
}

/// `<name>.osm;` 形式的模型名行
fn parse_model_name(line: &str) -> Option<String> {
    let body = line.strip_suffix(';')?;
    [".osm", ".pmx", ".pmd"]
        .iter()
        .find_map(|ext| body.strip_suffix(ext))
        .map(|name| name.trim().to_string())
}

/// `Bone12{名前` 形式的块头，返回花括号后的名称（可能为空）
fn block_header<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    let brace = rest.find('{')?;
    if !rest[..brace].chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(rest[brace + 1..].trim())
}

/// `1.0,2.0,3.0;` 形式的数值行
fn parse_numbers(line: &str, line_no: usize) -> Result<Vec<f64>> {
    line.trim_end_matches(';')
        .split(',')
        .map(|s| {
            s.trim().parse::<f64>().map_err(|e| {
                MmdError::VpdParse(format!("Invalid number '{}' at line {}: {}", s.trim(), line_no + 1, e))
            })
        })
        .collect()
}
