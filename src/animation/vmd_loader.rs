//! VMD 文件读写
//!
//! 解析 VMD 动画文件为 Motion，或将 Motion 写回 VMD。
//! 坐标保持 MMD 原始约定，不做轴翻转。

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{DQuat, DVec3};

use crate::math::quaternion;
use crate::{MmdError, Result};

use super::keyframe::{
    BoneCurves, BoneKeyframe, CameraCurves, CameraKeyframe, IkEnable, IkKeyframe, LightKeyframe,
    MorphKeyframe, ShadowKeyframe,
};
use super::motion::Motion;

/// VMD 文件头
const VMD_HEADER_V1: &[u8] = b"Vocaloid Motion Data file";
const VMD_HEADER_V2: &[u8] = b"Vocaloid Motion Data 0002";

const SIGNATURE_LEN: usize = 30;
const MODEL_NAME_LEN_V1: usize = 10;
const MODEL_NAME_LEN_V2: usize = 20;
const FRAME_NAME_LEN: usize = 15;
const IK_NAME_LEN: usize = 20;

/// VMD 文件数据
#[derive(Debug, Clone, Default)]
pub struct VmdFile {
    /// 模型名称
    pub model_name: String,
    /// Motion 数据
    pub motion: Motion,
}

impl VmdFile {
    pub fn new(motion: Motion) -> Self {
        Self {
            model_name: motion.model_name.clone(),
            motion,
        }
    }

    /// 从文件路径加载 VMD
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        Self::load_from_reader(&mut reader)
    }

    /// 从字节切片加载 VMD
    pub fn load_from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = std::io::Cursor::new(bytes);
        Self::load_from_reader(&mut reader)
    }

    /// 从 Reader 加载 VMD
    ///
    /// 骨骼与 Morph 段必须完整；相机、光照、阴影、IK 段缺失或损坏时截断并返回已解析部分。
    pub fn load_from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let header = read_array::<_, SIGNATURE_LEN>(reader, "header")?;

        let name_len = if header[..VMD_HEADER_V2.len()] == VMD_HEADER_V2[..] {
            MODEL_NAME_LEN_V2
        } else if header[..VMD_HEADER_V1.len()] == VMD_HEADER_V1[..] {
            MODEL_NAME_LEN_V1
        } else {
            return Err(MmdError::VmdParse("Invalid VMD header".to_string()));
        };

        let mut name_bytes = vec![0u8; name_len];
        reader
            .read_exact(&mut name_bytes)
            .map_err(|e| MmdError::VmdParse(format!("Failed to read model name: {}", e)))?;
        let model_name = decode_shift_jis(&name_bytes);

        let mut motion = Motion::new();
        motion.model_name = model_name.clone();

        // 骨骼关键帧
        let bone_count = read_u32(reader, "bone keyframe count")?;
        for _ in 0..bone_count {
            let (name, keyframe) = read_bone_keyframe(reader)?;
            motion.insert_bone_with(&name, keyframe, false);
        }

        // Morph 关键帧
        let morph_count = read_u32(reader, "morph keyframe count")?;
        for _ in 0..morph_count {
            let (name, keyframe) = read_morph_keyframe(reader)?;
            motion
                .morph_tracks
                .entry(name)
                .or_default()
                .insert(keyframe, false);
        }

        if let Err(e) = read_optional_sections(reader, &mut motion) {
            log::warn!("VMD 可选段解析中断，已截断: {}", e);
        }

        log::info!(
            "VMD 加载完成: 模型 {}, 骨骼帧 {}, 表情帧 {}, 相机帧 {}",
            model_name,
            motion.bone_keyframe_count(),
            motion.morph_keyframe_count(),
            motion.camera_track.len()
        );

        Ok(Self { model_name, motion })
    }

    /// 获取最大帧数
    pub fn max_frame(&self) -> u32 {
        self.motion.max_frame()
    }

    /// 保存到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// 序列化为字节
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// 写出 VMD（新版文件头）
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let motion = &self.motion;

        writer.write_all(&padded(VMD_HEADER_V2, SIGNATURE_LEN))?;
        writer.write_all(&encode_shift_jis(&self.model_name, MODEL_NAME_LEN_V2))?;

        // 骨骼
        writer.write_u32::<LittleEndian>(motion.bone_keyframe_count() as u32)?;
        for name in motion.bone_names() {
            let encoded = encode_shift_jis(&name, FRAME_NAME_LEN);
            if let Some(track) = motion.bone_track(&name) {
                for kf in track.iter() {
                    writer.write_all(&encoded)?;
                    writer.write_u32::<LittleEndian>(kf.index)?;
                    write_vec3(writer, kf.position)?;
                    let q = kf.rotation;
                    for v in [q.x, q.y, q.z, q.w] {
                        writer.write_f32::<LittleEndian>(v as f32)?;
                    }
                    writer.write_all(&kf.curves.to_vmd_bytes(kf.disable_physics))?;
                }
            }
        }

        // Morph
        writer.write_u32::<LittleEndian>(motion.morph_keyframe_count() as u32)?;
        for name in motion.morph_names() {
            let encoded = encode_shift_jis(&name, FRAME_NAME_LEN);
            if let Some(track) = motion.morph_track(&name) {
                for kf in track.iter() {
                    writer.write_all(&encoded)?;
                    writer.write_u32::<LittleEndian>(kf.index)?;
                    writer.write_f32::<LittleEndian>(kf.ratio as f32)?;
                }
            }
        }

        // 相机
        writer.write_u32::<LittleEndian>(motion.camera_track.len() as u32)?;
        for kf in motion.camera_track.iter() {
            writer.write_u32::<LittleEndian>(kf.index)?;
            writer.write_f32::<LittleEndian>(kf.distance as f32)?;
            write_vec3(writer, kf.position)?;
            write_vec3(writer, kf.rotation)?;
            writer.write_all(&kf.curves.to_vmd_bytes())?;
            writer.write_u32::<LittleEndian>(kf.view_angle.round() as u32)?;
            writer.write_u8(kf.orthographic as u8)?;
        }

        // 光照
        writer.write_u32::<LittleEndian>(motion.light_track.len() as u32)?;
        for kf in motion.light_track.iter() {
            writer.write_u32::<LittleEndian>(kf.index)?;
            write_vec3(writer, kf.color)?;
            write_vec3(writer, kf.position)?;
        }

        // 阴影
        writer.write_u32::<LittleEndian>(motion.shadow_track.len() as u32)?;
        for kf in motion.shadow_track.iter() {
            writer.write_u32::<LittleEndian>(kf.index)?;
            writer.write_u8(kf.mode)?;
            writer.write_f32::<LittleEndian>(kf.distance as f32)?;
        }

        // IK 开关
        writer.write_u32::<LittleEndian>(motion.ik_track.len() as u32)?;
        for kf in motion.ik_track.iter() {
            writer.write_u32::<LittleEndian>(kf.index)?;
            writer.write_u8(kf.visible as u8)?;
            writer.write_u32::<LittleEndian>(kf.ik_list.len() as u32)?;
            for ik in &kf.ik_list {
                writer.write_all(&encode_shift_jis(&ik.bone_name, IK_NAME_LEN))?;
                writer.write_u8(ik.enabled as u8)?;
            }
        }

        Ok(())
    }
}

// ============================================================================
// 读取
// ============================================================================

/// 读取骨骼关键帧
fn read_bone_keyframe<R: Read>(reader: &mut R) -> Result<(String, BoneKeyframe)> {
    let name = decode_shift_jis(&read_array::<_, FRAME_NAME_LEN>(reader, "bone name")?);
    let index = read_u32(reader, "frame index")?;
    let position = read_vec3(reader, "translation")?;

    let mut q = [0.0f64; 4];
    for v in q.iter_mut() {
        *v = read_f32(reader, "rotation")?;
    }
    let raw = DQuat::from_xyzw(q[0], q[1], q[2], q[3]);
    let rotation = quaternion::canonicalize(quaternion::normalize_or_identity(raw));

    let interpolation = read_array::<_, 64>(reader, "interpolation")?;
    let (curves, disable_physics) = BoneCurves::from_vmd_bytes(&interpolation);

    let mut keyframe = BoneKeyframe::new(index)
        .with_position(position)
        .with_rotation(rotation)
        .with_curves(curves);
    keyframe.read = true;
    keyframe.disable_physics = disable_physics;

    Ok((name, keyframe))
}

/// 读取 Morph 关键帧
fn read_morph_keyframe<R: Read>(reader: &mut R) -> Result<(String, MorphKeyframe)> {
    let name = decode_shift_jis(&read_array::<_, FRAME_NAME_LEN>(reader, "morph name")?);
    let index = read_u32(reader, "frame index")?;
    let ratio = read_f32(reader, "weight")?;

    let mut keyframe = MorphKeyframe::new(index, ratio);
    keyframe.read = true;
    Ok((name, keyframe))
}

/// 相机 / 光照 / 阴影 / IK 段
///
/// 旧版文件在 Morph 段后直接结束，此时静默返回。
fn read_optional_sections<R: Read>(reader: &mut R, motion: &mut Motion) -> Result<()> {
    let camera_count = match reader.read_u32::<LittleEndian>() {
        Ok(n) => n,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
        Err(e) => return Err(MmdError::VmdParse(format!("Failed to read camera count: {}", e))),
    };
    for _ in 0..camera_count {
        let index = read_u32(reader, "camera frame index")?;
        let distance = read_f32(reader, "camera distance")?;
        let position = read_vec3(reader, "camera position")?;
        let rotation = read_vec3(reader, "camera rotation")?;
        let curves = CameraCurves::from_vmd_bytes(&read_array::<_, 24>(reader, "camera interpolation")?);
        let view_angle = read_u32(reader, "camera view angle")? as f64;
        let orthographic = read_u8(reader, "camera perspective")? != 0;

        motion.camera_track.insert(
            CameraKeyframe {
                index,
                position,
                rotation,
                distance,
                view_angle,
                orthographic,
                curves,
                registered: true,
            },
            false,
        );
    }

    let light_count = match reader.read_u32::<LittleEndian>() {
        Ok(n) => n,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
        Err(e) => return Err(MmdError::VmdParse(format!("Failed to read light count: {}", e))),
    };
    for _ in 0..light_count {
        let index = read_u32(reader, "light frame index")?;
        let color = read_vec3(reader, "light color")?;
        let position = read_vec3(reader, "light position")?;
        motion.light_track.insert(
            LightKeyframe {
                index,
                color,
                position,
                registered: true,
            },
            false,
        );
    }

    let shadow_count = match reader.read_u32::<LittleEndian>() {
        Ok(n) => n,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
        Err(e) => return Err(MmdError::VmdParse(format!("Failed to read shadow count: {}", e))),
    };
    for _ in 0..shadow_count {
        let index = read_u32(reader, "shadow frame index")?;
        let mode = read_u8(reader, "shadow mode")?;
        let distance = read_f32(reader, "shadow distance")?;
        motion.shadow_track.insert(
            ShadowKeyframe {
                index,
                mode,
                distance,
                registered: true,
            },
            false,
        );
    }

    let ik_count = match reader.read_u32::<LittleEndian>() {
        Ok(n) => n,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
        Err(e) => return Err(MmdError::VmdParse(format!("Failed to read ik count: {}", e))),
    };
    for _ in 0..ik_count {
        let index = read_u32(reader, "ik frame index")?;
        let visible = read_u8(reader, "ik visible")? != 0;
        let link_count = read_u32(reader, "ik link count")?;
        let mut ik_list = Vec::with_capacity(link_count.min(1024) as usize);
        for _ in 0..link_count {
            let bone_name = decode_shift_jis(&read_array::<_, IK_NAME_LEN>(reader, "ik bone name")?);
            let enabled = read_u8(reader, "ik enabled")? != 0;
            ik_list.push(IkEnable { bone_name, enabled });
        }
        motion.ik_track.insert(
            IkKeyframe {
                index,
                visible,
                ik_list,
                registered: true,
            },
            false,
        );
    }

    Ok(())
}

fn read_array<R: Read, const N: usize>(reader: &mut R, what: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .map_err(|e| MmdError::VmdParse(format!("Failed to read {}: {}", what, e)))?;
    Ok(buf)
}

fn read_u8<R: Read>(reader: &mut R, what: &str) -> Result<u8> {
    reader
        .read_u8()
        .map_err(|e| MmdError::VmdParse(format!("Failed to read {}: {}", what, e)))
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    reader
        .read_u32::<LittleEndian>()
        .map_err(|e| MmdError::VmdParse(format!("Failed to read {}: {}", what, e)))
}

fn read_f32<R: Read>(reader: &mut R, what: &str) -> Result<f64> {
    reader
        .read_f32::<LittleEndian>()
        .map(|v| v as f64)
        .map_err(|e| MmdError::VmdParse(format!("Failed to read {}: {}", what, e)))
}

fn read_vec3<R: Read>(reader: &mut R, what: &str) -> Result<DVec3> {
    Ok(DVec3::new(
        read_f32(reader, what)?,
        read_f32(reader, what)?,
        read_f32(reader, what)?,
    ))
}

fn write_vec3<W: Write>(writer: &mut W, v: DVec3) -> std::io::Result<()> {
    writer.write_f32::<LittleEndian>(v.x as f32)?;
    writer.write_f32::<LittleEndian>(v.y as f32)?;
    writer.write_f32::<LittleEndian>(v.z as f32)
}

// ============================================================================
// Shift-JIS
// ============================================================================

/// 解码 Shift-JIS 字符串（截断到首个 NUL，去除尾部 0xFD 填充）
pub(crate) fn decode_shift_jis(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let mut bytes = &bytes[..end];
    while let [rest @ .., 0xFD] = bytes {
        bytes = rest;
    }

    let (decoded, _, _) = encoding_rs::SHIFT_JIS.decode(bytes);
    decoded.into_owned()
}

/// 编码为定长 Shift-JIS 字段，超长时按字符截断，不足补 NUL
pub(crate) fn encode_shift_jis(text: &str, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut buf = [0u8; 4];
    for ch in text.chars() {
        let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode(ch.encode_utf8(&mut buf));
        if out.len() + encoded.len() > len {
            break;
        }
        out.extend_from_slice(&encoded);
    }
    out.resize(len, 0);
    out
}

fn padded(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = bytes[..bytes.len().min(len)].to_vec();
    out.resize(len, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::keyframe::Keyframe;
    use crate::math::curve::Curve;

    fn sample_motion() -> Motion {
        let mut motion = Motion::new();
        motion.model_name = "初音ミク".to_string();

        let mut center = BoneKeyframe::new(0).with_position(DVec3::new(1.0, 2.0, 3.0));
        center.curves.translate_x = Curve::new(10, 30, 100, 80);
        motion.insert_bone("センター", center);
        motion.insert_bone(
            "センター",
            BoneKeyframe::new(30).with_rotation(DQuat::from_rotation_y(0.5)),
        );
        let mut hair = BoneKeyframe::new(5);
        hair.disable_physics = true;
        motion.insert_bone("髪", hair);

        motion.insert_morph("まばたき", MorphKeyframe::new(10, 0.75));

        motion.camera_track.insert(
            CameraKeyframe {
                distance: -30.0,
                registered: true,
                ..CameraKeyframe::default_at(0)
            },
            false,
        );
        motion.ik_track.insert(
            IkKeyframe {
                index: 12,
                visible: true,
                ik_list: vec![IkEnable {
                    bone_name: "左足ＩＫ".to_string(),
                    enabled: false,
                }],
                registered: true,
            },
            false,
        );
        motion
    }

    #[test]
    fn test_write_then_read() {
        let bytes = VmdFile::new(sample_motion()).to_bytes().unwrap();
        let vmd = VmdFile::load_from_bytes(&bytes).unwrap();
        let motion = &vmd.motion;

        assert_eq!(vmd.model_name, "初音ミク");
        assert_eq!(motion.bone_keyframe_count(), 3);

        let center = motion.bone_track("センター").unwrap();
        let first = center.stored(0).unwrap();
        assert!((first.position - DVec3::new(1.0, 2.0, 3.0)).length() < 1e-6);
        assert_eq!(first.curves.translate_x, Curve::new(10, 30, 100, 80));
        assert!(first.read && first.registered);

        let second = center.stored(30).unwrap();
        assert!(quaternion::same_rotation(second.rotation, DQuat::from_rotation_y(0.5), 1e-6));

        assert!(motion.bone_track("髪").unwrap().stored(5).unwrap().disable_physics);
        assert!((motion.get_morph("まばたき", 10.0) - 0.75).abs() < 1e-6);
        assert_eq!(motion.camera_track.len(), 1);
        assert!((motion.camera_track.get(0).distance + 30.0).abs() < 1e-6);
        assert!(!motion.is_ik_enabled("左足ＩＫ", 20.0));
    }

    #[test]
    fn test_zero_rotation_reads_as_identity() {
        let mut motion = Motion::new();
        motion.insert_bone(
            "center",
            BoneKeyframe::new(0).with_rotation(DQuat::from_xyzw(0.0, 0.0, 0.0, 0.0)),
        );
        let bytes = VmdFile::new(motion).to_bytes().unwrap();
        let vmd = VmdFile::load_from_bytes(&bytes).unwrap();

        let rotation = vmd.motion.get_bone("center", 0.0).rotation;
        assert!(!rotation.is_nan());
        assert_eq!(rotation, DQuat::IDENTITY);
    }

    #[test]
    fn test_legacy_file_without_optional_sections() {
        let mut bytes = padded(VMD_HEADER_V2, SIGNATURE_LEN);
        bytes.extend(encode_shift_jis("model", MODEL_NAME_LEN_V2));
        bytes.extend(0u32.to_le_bytes());
        bytes.extend(0u32.to_le_bytes());

        let vmd = VmdFile::load_from_bytes(&bytes).unwrap();
        assert_eq!(vmd.model_name, "model");
        assert!(vmd.motion.is_empty());
    }

    #[test]
    fn test_truncated_optional_section_is_not_fatal() {
        let mut bytes = VmdFile::new(sample_motion()).to_bytes().unwrap();
        // 截断到 IK 段中间
        bytes.truncate(bytes.len() - 5);
        let vmd = VmdFile::load_from_bytes(&bytes).unwrap();
        assert_eq!(vmd.motion.bone_keyframe_count(), 3);
        assert_eq!(vmd.motion.camera_track.len(), 1);
        assert!(vmd.motion.ik_track.is_empty());
    }

    #[test]
    fn test_truncated_bone_section_is_fatal() {
        let bytes = VmdFile::new(sample_motion()).to_bytes().unwrap();
        let cut = SIGNATURE_LEN + MODEL_NAME_LEN_V2 + 4 + 40;
        let result = VmdFile::load_from_bytes(&bytes[..cut]);
        assert!(matches!(result, Err(MmdError::VmdParse(_))));
    }

    #[test]
    fn test_invalid_header() {
        let result = VmdFile::load_from_bytes(&[0u8; 64]);
        assert!(matches!(result, Err(MmdError::VmdParse(_))));
    }

    #[test]
    fn test_shift_jis_trimming() {
        let mut field = encode_shift_jis("右腕", FRAME_NAME_LEN);
        let used = field.iter().position(|&b| b == 0).unwrap();
        field[used] = 0xFD;
        field[used + 1] = 0xFD;
        for b in field.iter_mut().skip(used + 2) {
            *b = 0xFD;
        }
        assert_eq!(decode_shift_jis(&field), "右腕");
    }
}
