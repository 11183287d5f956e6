//! Voxel component types and typed scalar dispatch.

use glam::{DVec3, U64Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Scalar type of a single voxel component.
///
/// The discriminants are the on-disk type tags of the octree header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ComponentType {
    U8 = 0,
    I8 = 1,
    U16 = 2,
    I16 = 3,
    U32 = 4,
    I32 = 5,
    U64 = 6,
    I64 = 7,
    F32 = 8,
    F64 = 9,
}

impl ComponentType {
    /// On-disk type tag.
    #[inline]
    pub const fn tag(self) -> u32 {
        self as u32
    }

    /// Decode an on-disk type tag.
    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(Self::U8),
            1 => Ok(Self::I8),
            2 => Ok(Self::U16),
            3 => Ok(Self::I16),
            4 => Ok(Self::U32),
            5 => Ok(Self::I32),
            6 => Ok(Self::U64),
            7 => Ok(Self::I64),
            8 => Ok(Self::F32),
            9 => Ok(Self::F64),
            other => Err(Error::UnsupportedType(other)),
        }
    }

    /// Size of one component in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// Whether the type is a signed integer or a float.
    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::F32 | Self::F64
        )
    }

    /// Whether the type is a floating-point type.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// A voxel component scalar.
///
/// Downsampling accumulates in `f64` and converts back with the truncating
/// `as` conversion, so integer means are truncated and floats pass through.
pub trait Scalar: Copy + PartialOrd + bytemuck::Pod + Send + Sync + 'static {
    /// The matching [`ComponentType`].
    const TYPE: ComponentType;

    /// Widen to `f64` for accumulation.
    fn to_f64(self) -> f64;

    /// Narrow from `f64` (truncating for integer types).
    fn from_f64(v: f64) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(impl Scalar for $ty {
            const TYPE: ComponentType = ComponentType::$tag;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $ty
            }
        })*
    };
}

impl_scalar! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

/// Dispatch a [`ComponentType`] value to a block monomorphized over the
/// matching scalar type.
///
/// ```
/// # use voluma_core::{with_scalar_type, ComponentType};
/// fn width(ct: ComponentType) -> usize {
///     with_scalar_type!(ct, |T| std::mem::size_of::<T>())
/// }
/// assert_eq!(width(ComponentType::U16), 2);
/// ```
#[macro_export]
macro_rules! with_scalar_type {
    ($ct:expr, |$t:ident| $body:expr) => {
        match $ct {
            $crate::ComponentType::U8 => {
                type $t = u8;
                $body
            }
            $crate::ComponentType::I8 => {
                type $t = i8;
                $body
            }
            $crate::ComponentType::U16 => {
                type $t = u16;
                $body
            }
            $crate::ComponentType::I16 => {
                type $t = i16;
                $body
            }
            $crate::ComponentType::U32 => {
                type $t = u32;
                $body
            }
            $crate::ComponentType::I32 => {
                type $t = i32;
                $body
            }
            $crate::ComponentType::U64 => {
                type $t = u64;
                $body
            }
            $crate::ComponentType::I64 => {
                type $t = i64;
                $body
            }
            $crate::ComponentType::F32 => {
                type $t = f32;
                $body
            }
            $crate::ComponentType::F64 => {
                type $t = f64;
                $body
            }
        }
    };
}

/// Metadata of a source volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeMeta {
    /// Logical size in voxels.
    pub size: U64Vec3,
    /// Physical aspect ratio; metadata only, never affects layout.
    pub aspect: DVec3,
    /// Scalar type of one component.
    pub component_type: ComponentType,
    /// Components per voxel (1 for scalar data, 3 for RGB, ...).
    pub component_count: u32,
}

impl VolumeMeta {
    /// Create volume metadata, validating the basic constraints.
    pub fn new(
        size: U64Vec3,
        aspect: DVec3,
        component_type: ComponentType,
        component_count: u32,
    ) -> Result<Self> {
        if size.x == 0 || size.y == 0 || size.z == 0 {
            return Err(Error::OutOfRange(format!(
                "volume size must be nonzero, got {size}"
            )));
        }
        if component_count == 0 {
            return Err(Error::OutOfRange("component count must be >= 1".into()));
        }
        if aspect.x <= 0.0 || aspect.y <= 0.0 || aspect.z <= 0.0 {
            return Err(Error::OutOfRange(format!(
                "aspect ratio must be positive, got {aspect}"
            )));
        }
        Ok(Self {
            size,
            aspect,
            component_type,
            component_count,
        })
    }

    /// Bytes per voxel (component size times component count).
    #[inline]
    pub fn voxel_bytes(&self) -> usize {
        self.component_type.size_in_bytes() * self.component_count as usize
    }

    /// Total voxel count of the native-resolution volume.
    #[inline]
    pub fn total_voxels(&self) -> u64 {
        self.size.x * self.size.y * self.size.z
    }

    /// Total byte size of the native-resolution volume.
    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_voxels() * self.voxel_bytes() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip() {
        for tag in 0..10 {
            let ct = ComponentType::from_tag(tag).unwrap();
            assert_eq!(ct.tag(), tag);
        }
        assert!(matches!(
            ComponentType::from_tag(10),
            Err(Error::UnsupportedType(10))
        ));
    }

    #[test]
    fn component_sizes() {
        assert_eq!(ComponentType::U8.size_in_bytes(), 1);
        assert_eq!(ComponentType::I16.size_in_bytes(), 2);
        assert_eq!(ComponentType::F32.size_in_bytes(), 4);
        assert_eq!(ComponentType::F64.size_in_bytes(), 8);
    }

    #[test]
    fn truncating_narrow() {
        use approx::assert_relative_eq;

        assert_eq!(u8::from_f64(10.5), 10);
        assert_eq!(i16::from_f64(-3.7), -3);
        assert_eq!(f32::from_f64(1.25), 1.25f32);
        // Floats round-trip within single precision.
        assert_relative_eq!(f64::from(f32::from_f64(0.1)), 0.1, epsilon = 1e-7);
    }

    #[test]
    fn dispatch_picks_matching_type() {
        fn width(ct: ComponentType) -> usize {
            with_scalar_type!(ct, |T| std::mem::size_of::<T>())
        }
        assert_eq!(width(ComponentType::U8), 1);
        assert_eq!(width(ComponentType::F64), 8);
    }

    #[test]
    fn volume_meta_validation() {
        let meta = VolumeMeta::new(
            U64Vec3::new(16, 16, 16),
            DVec3::ONE,
            ComponentType::U16,
            3,
        )
        .unwrap();
        assert_eq!(meta.voxel_bytes(), 6);
        assert_eq!(meta.total_bytes(), 16 * 16 * 16 * 6);

        assert!(VolumeMeta::new(U64Vec3::new(0, 1, 1), DVec3::ONE, ComponentType::U8, 1).is_err());
        assert!(VolumeMeta::new(U64Vec3::ONE, DVec3::ZERO, ComponentType::U8, 1).is_err());
    }
}
