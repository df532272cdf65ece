//! Windowing shader programs and their typed uniform table.
//!
//! Every variant shares one uniform struct. Slot offsets are reflected from
//! the WGSL source with naga when a program is linked, so a source that lacks
//! a slot (or declares it with the wrong type) fails at link time instead of
//! at draw time.

use std::fmt;

use naga::{AddressSpace, Scalar, TypeInner, VectorSize};

use crate::error::{RenderError, Result};
use crate::imaging::SampleKind;

const COMMON: &str = include_str!("shaders/common.wgsl");

/// Shader program per image data kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ShaderVariant {
    Rgb,
    Uint8,
    Int8,
    Uint16,
    Int16,
}

impl ShaderVariant {
    pub const ALL: [ShaderVariant; 5] = [
        ShaderVariant::Rgb,
        ShaderVariant::Uint8,
        ShaderVariant::Int8,
        ShaderVariant::Uint16,
        ShaderVariant::Int16,
    ];

    pub fn for_kind(kind: SampleKind) -> Self {
        match kind {
            SampleKind::Rgb => ShaderVariant::Rgb,
            SampleKind::Uint8 => ShaderVariant::Uint8,
            SampleKind::Int8 => ShaderVariant::Int8,
            SampleKind::Uint16 => ShaderVariant::Uint16,
            SampleKind::Int16 => ShaderVariant::Int16,
        }
    }

    /// Complete WGSL module (shared prelude plus the variant's fragment stage).
    pub fn source(self) -> String {
        let fragment = match self {
            ShaderVariant::Rgb => include_str!("shaders/rgb.wgsl"),
            ShaderVariant::Uint8 => include_str!("shaders/uint8.wgsl"),
            ShaderVariant::Uint16 => include_str!("shaders/uint16.wgsl"),
            ShaderVariant::Int8 | ShaderVariant::Int16 => include_str!("shaders/signed.wgsl"),
        };
        format!("{COMMON}{fragment}")
    }
}

impl fmt::Display for ShaderVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderVariant::Rgb => "rgb",
            ShaderVariant::Uint8 => "uint8",
            ShaderVariant::Int8 => "int8",
            ShaderVariant::Uint16 => "uint16",
            ShaderVariant::Int16 => "int16",
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SlotType {
    Mat3F32,
    Vec2F32,
    F32,
    I32,
}

/// Named members of the windowing uniform struct.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UniformSlot {
    Transform,
    Resolution,
    WindowWidth,
    WindowCenter,
    Slope,
    Intercept,
    Invert,
}

impl UniformSlot {
    pub const ALL: [UniformSlot; 7] = [
        UniformSlot::Transform,
        UniformSlot::Resolution,
        UniformSlot::WindowWidth,
        UniformSlot::WindowCenter,
        UniformSlot::Slope,
        UniformSlot::Intercept,
        UniformSlot::Invert,
    ];

    /// Member name in the WGSL struct.
    pub fn name(self) -> &'static str {
        match self {
            UniformSlot::Transform => "transf",
            UniformSlot::Resolution => "resolution",
            UniformSlot::WindowWidth => "ww",
            UniformSlot::WindowCenter => "wc",
            UniformSlot::Slope => "slope",
            UniformSlot::Intercept => "intercept",
            UniformSlot::Invert => "invert",
        }
    }

    fn slot_type(self) -> SlotType {
        match self {
            UniformSlot::Transform => SlotType::Mat3F32,
            UniformSlot::Resolution => SlotType::Vec2F32,
            UniformSlot::Invert => SlotType::I32,
            _ => SlotType::F32,
        }
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Per-draw uniform values.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct WindowingParams {
    /// Column-major 3×3, image space to destination pixels.
    pub transform: [f32; 9],
    pub resolution: [f32; 2],
    pub window_width: f32,
    pub window_center: f32,
    pub slope: f32,
    pub intercept: f32,
    pub invert: bool,
}

/// Uniform byte offsets for one linked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    variant: ShaderVariant,
    span: u32,
    offsets: [u32; 7],
}

impl UniformLayout {
    /// Reflects the `var<uniform>` struct of `source` and resolves every slot.
    pub fn resolve(variant: ShaderVariant, source: &str) -> Result<Self> {
        let module = naga::front::wgsl::parse_str(source).map_err(|error| RenderError::ShaderParse {
            variant,
            message: error.emit_to_string(source),
        })?;

        let block = module
            .global_variables
            .iter()
            .map(|(_, var)| var)
            .find(|var| var.space == AddressSpace::Uniform)
            .ok_or(RenderError::MissingUniform { variant, name: "uniform block" })?;

        let TypeInner::Struct { members, span } = &module.types[block.ty].inner else {
            return Err(RenderError::UniformType { variant, name: "uniform block" });
        };

        let mut offsets = [0u32; 7];
        for slot in UniformSlot::ALL {
            let member = members
                .iter()
                .find(|m| m.name.as_deref() == Some(slot.name()))
                .ok_or(RenderError::MissingUniform { variant, name: slot.name() })?;

            let inner = &module.types[member.ty].inner;
            let matches = match slot.slot_type() {
                SlotType::Mat3F32 => matches!(
                    inner,
                    TypeInner::Matrix { columns: VectorSize::Tri, rows: VectorSize::Tri, scalar } if *scalar == Scalar::F32
                ),
                SlotType::Vec2F32 => matches!(
                    inner,
                    TypeInner::Vector { size: VectorSize::Bi, scalar } if *scalar == Scalar::F32
                ),
                SlotType::F32 => matches!(inner, TypeInner::Scalar(s) if *s == Scalar::F32),
                SlotType::I32 => matches!(inner, TypeInner::Scalar(s) if *s == Scalar::I32),
            };
            if !matches {
                return Err(RenderError::UniformType { variant, name: slot.name() });
            }
            offsets[slot.index()] = member.offset;
        }

        log::debug!("resolved {variant} uniform layout: span {span}, offsets {offsets:?}");
        Ok(Self { variant, span: *span, offsets })
    }

    pub fn variant(&self) -> ShaderVariant {
        self.variant
    }

    /// Uniform buffer size in bytes.
    pub fn span(&self) -> u32 {
        self.span
    }

    pub fn offset(&self, slot: UniformSlot) -> u32 {
        self.offsets[slot.index()]
    }

    /// Serializes `params` at the reflected offsets.
    pub fn encode(&self, params: &WindowingParams) -> Vec<u8> {
        let mut buf = vec![0u8; self.span as usize];
        let mut put = |slot: UniformSlot, extra: usize, bytes: &[u8]| {
            let at = self.offset(slot) as usize + extra;
            buf[at..at + bytes.len()].copy_from_slice(bytes);
        };

        // mat3x3<f32> columns are vec3s padded to 16 bytes.
        for column in 0..3 {
            let values = &params.transform[column * 3..column * 3 + 3];
            put(UniformSlot::Transform, column * 16, bytemuck::cast_slice(values));
        }
        put(UniformSlot::Resolution, 0, bytemuck::cast_slice(&params.resolution));
        put(UniformSlot::WindowWidth, 0, bytemuck::bytes_of(&params.window_width));
        put(UniformSlot::WindowCenter, 0, bytemuck::bytes_of(&params.window_center));
        put(UniformSlot::Slope, 0, bytemuck::bytes_of(&params.slope));
        put(UniformSlot::Intercept, 0, bytemuck::bytes_of(&params.intercept));
        put(UniformSlot::Invert, 0, bytemuck::bytes_of(&i32::from(params.invert)));
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_at(buf: &[u8], at: usize) -> f32 {
        f32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn every_variant_parses_and_resolves() {
        for variant in ShaderVariant::ALL {
            let layout = UniformLayout::resolve(variant, &variant.source())
                .unwrap_or_else(|e| panic!("{variant}: {e}"));
            assert_eq!(layout.span(), 80);
            assert_eq!(layout.offset(UniformSlot::Transform), 0);
            assert_eq!(layout.offset(UniformSlot::Resolution), 48);
            assert_eq!(layout.offset(UniformSlot::WindowWidth), 56);
            assert_eq!(layout.offset(UniformSlot::Invert), 72);
        }
    }

    #[test]
    fn variant_follows_sample_kind() {
        assert_eq!(ShaderVariant::for_kind(SampleKind::Rgb), ShaderVariant::Rgb);
        assert_eq!(ShaderVariant::for_kind(SampleKind::Int16), ShaderVariant::Int16);
        assert_eq!(ShaderVariant::Uint16.to_string(), "uint16");
    }

    #[test]
    fn missing_uniform_fails_to_link() {
        let source = r#"
            struct Windowing {
                transf: mat3x3<f32>,
                resolution: vec2<f32>,
                ww: f32,
                wc: f32,
                slope: f32,
                invert: i32,
            }
            @group(0) @binding(0) var<uniform> u: Windowing;
            @fragment
            fn fs_main() -> @location(0) vec4<f32> {
                return vec4<f32>(u.ww, u.wc, u.slope, 1.0);
            }
        "#;
        let err = UniformLayout::resolve(ShaderVariant::Uint8, source).unwrap_err();
        assert!(
            matches!(err, RenderError::MissingUniform { name: "intercept", variant: ShaderVariant::Uint8 }),
            "{err}"
        );
        assert!(err.to_string().contains("intercept"));
    }

    #[test]
    fn mistyped_uniform_fails_to_link() {
        let source = r#"
            struct Windowing {
                transf: mat3x3<f32>,
                resolution: vec2<f32>,
                ww: f32,
                wc: f32,
                slope: f32,
                intercept: f32,
                invert: f32,
            }
            @group(0) @binding(0) var<uniform> u: Windowing;
        "#;
        let err = UniformLayout::resolve(ShaderVariant::Int16, source).unwrap_err();
        assert!(matches!(err, RenderError::UniformType { name: "invert", .. }), "{err}");
    }

    #[test]
    fn parse_errors_are_reported() {
        let err = UniformLayout::resolve(ShaderVariant::Rgb, "fn broken(").unwrap_err();
        assert!(matches!(err, RenderError::ShaderParse { variant: ShaderVariant::Rgb, .. }));
    }

    #[test]
    fn encode_places_values_at_reflected_offsets() {
        let layout = UniformLayout::resolve(ShaderVariant::Int16, &ShaderVariant::Int16.source()).unwrap();
        let params = WindowingParams {
            transform: [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
            resolution: [640.0, 480.0],
            window_width: 400.0,
            window_center: 40.0,
            slope: 1.0,
            intercept: -1024.0,
            invert: true,
        };
        let buf = layout.encode(&params);

        assert_eq!(buf.len(), 80);
        assert_eq!(f32_at(&buf, 0), 1.0);
        assert_eq!(f32_at(&buf, 16), 4.0);
        assert_eq!(f32_at(&buf, 40), 9.0);
        assert_eq!(f32_at(&buf, 52), 480.0);
        assert_eq!(f32_at(&buf, 56), 400.0);
        assert_eq!(f32_at(&buf, 68), -1024.0);
        assert_eq!(i32::from_le_bytes(buf[72..76].try_into().unwrap()), 1);
    }
}
