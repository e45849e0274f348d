//! MMD 材质定义

use glam::{DVec3, DVec4};

/// 可被材质 Morph 影响的材质数值
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialValues {
    pub diffuse: DVec4,
    /// rgb + 反射强度
    pub specular: DVec4,
    pub ambient: DVec3,
    pub edge: DVec4,
    pub edge_size: f64,
    pub texture_factor: DVec4,
    pub sphere_texture_factor: DVec4,
    pub toon_texture_factor: DVec4,
}

impl MaterialValues {
    /// 全 0（加算项初值）
    pub fn zero() -> Self {
        Self {
            diffuse: DVec4::ZERO,
            specular: DVec4::ZERO,
            ambient: DVec3::ZERO,
            edge: DVec4::ZERO,
            edge_size: 0.0,
            texture_factor: DVec4::ZERO,
            sphere_texture_factor: DVec4::ZERO,
            toon_texture_factor: DVec4::ZERO,
        }
    }

    /// 全 1（乘算项初值）
    pub fn one() -> Self {
        Self {
            diffuse: DVec4::ONE,
            specular: DVec4::ONE,
            ambient: DVec3::ONE,
            edge: DVec4::ONE,
            edge_size: 1.0,
            texture_factor: DVec4::ONE,
            sphere_texture_factor: DVec4::ONE,
            toon_texture_factor: DVec4::ONE,
        }
    }

    /// 平坦化为 28 个值
    pub fn to_flat(&self) -> [f64; 28] {
        let mut out = [0.0; 28];
        let parts: [&[f64]; 8] = [
            &self.diffuse.to_array(),
            &self.specular.to_array(),
            &self.ambient.to_array(),
            &self.edge.to_array(),
            &[self.edge_size],
            &self.texture_factor.to_array(),
            &self.sphere_texture_factor.to_array(),
            &self.toon_texture_factor.to_array(),
        ];
        for (dst, src) in out.iter_mut().zip(parts.iter().flat_map(|p| p.iter())) {
            *dst = *src;
        }
        out
    }
}

impl Default for MaterialValues {
    fn default() -> Self {
        Self {
            diffuse: DVec4::ONE,
            specular: DVec4::ZERO,
            ambient: DVec3::splat(0.5),
            edge: DVec4::new(0.0, 0.0, 0.0, 1.0),
            edge_size: 1.0,
            texture_factor: DVec4::ONE,
            sphere_texture_factor: DVec4::ONE,
            toon_texture_factor: DVec4::ONE,
        }
    }
}

/// MMD 材质
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Material {
    pub name: String,
    pub values: MaterialValues,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: MaterialValues::default(),
        }
    }

    pub fn with_values(mut self, values: MaterialValues) -> Self {
        self.values = values;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_layout() {
        let values = MaterialValues {
            edge_size: 7.0,
            ..MaterialValues::zero()
        };
        let flat = values.to_flat();
        assert_eq!(flat[15], 7.0);
        assert_eq!(flat.iter().filter(|v| **v != 0.0).count(), 1);
        assert_eq!(MaterialValues::one().to_flat(), [1.0; 28]);
    }
}
