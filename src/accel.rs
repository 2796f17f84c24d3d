use crate::{buffer::BufferRegion, image::Format, DeviceAddress, IndexType};

bitflags::bitflags! {
    /// Hints for the device builder.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct AccelerationStructureBuildFlags: u32 {
        /// Structure may later be rebuilt in place from itself.
        const ALLOW_UPDATE = 0x00000001;
        const PREFER_FAST_TRACE = 0x00000004;
        const PREFER_FAST_BUILD = 0x00000008;
    }
}

/// Placement of a structure inside a buffer with
/// `ACCELERATION_STRUCTURE_STORAGE` usage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccelerationStructureInfo {
    pub level: AccelerationStructureLevel,

    pub region: BufferRegion,
}

/// Sizes reported by the device for a prospective build.
///
/// `acceleration_structure_size` is the storage the structure itself needs.
/// `build_scratch_size` is the temporary memory a build consumes.
/// They are unrelated and must not be used in place of each other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct AccelerationStructureBuildSizesInfo {
    pub acceleration_structure_size: u64,
    pub update_scratch_size: u64,
    pub build_scratch_size: u64,
}

/// Bottom level holds triangles, top level holds instances of bottom levels.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum AccelerationStructureLevel {
    Bottom,
    Top,
}

/// Geometry description used to query build sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum AccelerationStructureGeometryInfo {
    Triangles {
        max_primitive_count: u32,
        index_type: Option<IndexType>,
        max_vertex_count: u32,
        vertex_format: Format,
        allows_transforms: bool,
    },
    Instances {
        max_primitive_count: u32,
    },
}

impl AccelerationStructureGeometryInfo {
    pub fn max_primitive_count(&self) -> u32 {
        match *self {
            Self::Triangles {
                max_primitive_count,
                ..
            }
            | Self::Instances {
                max_primitive_count,
            } => max_primitive_count,
        }
    }
}

bitflags::bitflags! {
    /// Per-geometry build flags.
    /// Geometry without `OPAQUE` invokes any-hit programs.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct GeometryFlags: u32 {
        const OPAQUE = 0x00000001;
    }
}

bitflags::bitflags! {
    /// Flags stored in the top byte of an instance record.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct GeometryInstanceFlags: u8 {
        /// Both triangle faces are hit.
        const TRIANGLE_FACING_CULL_DISABLE = 0x01;
        const TRIANGLE_FRONT_COUNTERCLOCKWISE = 0x02;
        const FORCE_OPAQUE = 0x04;
    }
}

/// Handle to an acceleration structure created by a [`Device`](crate::Device).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccelerationStructure {
    info: AccelerationStructureInfo,
    address: DeviceAddress,
    index: usize,
}

impl AccelerationStructure {
    pub fn new(info: AccelerationStructureInfo, address: DeviceAddress, index: usize) -> Self {
        AccelerationStructure {
            info,
            address,
            index,
        }
    }

    pub fn info(&self) -> &AccelerationStructureInfo {
        &self.info
    }

    /// Address used to reference this structure from instances.
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// One build recorded with [`Command::BuildAccelerationStructure`](crate::Command).
/// Build updates `dst` from `src` when `src` is set.
#[derive(Clone, Debug, PartialEq)]
pub struct AccelerationStructureBuildGeometryInfo {
    pub src: Option<AccelerationStructure>,
    pub dst: AccelerationStructure,
    pub flags: AccelerationStructureBuildFlags,
    pub geometries: Vec<AccelerationStructureGeometry>,
    pub scratch: DeviceAddress,
}

/// Build input with device addresses of vertex, index and instance data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AccelerationStructureGeometry {
    Triangles {
        flags: GeometryFlags,
        vertex_format: Format,
        vertex_data: DeviceAddress,
        vertex_stride: u64,
        vertex_count: u32,
        first_vertex: u32,
        primitive_count: u32,
        index_data: Option<IndexData>,
        transform_data: Option<DeviceAddress>,
    },
    Instances {
        flags: GeometryFlags,
        data: DeviceAddress,
        primitive_count: u32,
    },
}

impl AccelerationStructureGeometry {
    pub fn primitive_count(&self) -> u32 {
        match *self {
            Self::Triangles {
                primitive_count, ..
            }
            | Self::Instances {
                primitive_count, ..
            } => primitive_count,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexData {
    /// 16-bit indices at the address.
    U16(DeviceAddress),
    U32(DeviceAddress),
}

/// Row-major 3x4 affine transform. The last row is implicitly `0 0 0 1`.
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct TransformMatrix {
    pub matrix: [[f32; 4]; 3],
}

impl TransformMatrix {
    pub fn identity() -> Self {
        TransformMatrix {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
        }
    }

    /// Takes upper three rows of column-major affine matrix.
    pub fn from_mat4(mat: glam::Mat4) -> Self {
        let rows = mat.transpose().to_cols_array_2d();
        TransformMatrix {
            matrix: [rows[0], rows[1], rows[2]],
        }
    }
}

impl Default for TransformMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

/// Packs a 24-bit value with an 8-bit tag above it.
fn pack_24_8(low: u32, high: u8) -> u32 {
    assert!(low < 1 << 24, "Value {} does not fit in 24 bits", low);
    low | (u32::from(high) << 24)
}

/// Instance record as consumed by top-level builds.
/// Layout is fixed by the device: 48 bytes of transform followed by
/// two packed words and the bottom-level address.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(C, align(16))]
pub struct AccelerationStructureInstance {
    pub transform: TransformMatrix,

    /// Custom index in low 24 bits, visibility mask in the top byte.
    pub custom_index_and_mask: u32,

    /// Hit group offset in low 24 bits, [`GeometryInstanceFlags`] in the top byte.
    pub hit_group_offset_and_flags: u32,

    pub blas_address: u64,
}

unsafe impl bytemuck::Zeroable for AccelerationStructureInstance {}
unsafe impl bytemuck::Pod for AccelerationStructureInstance {}

impl AccelerationStructureInstance {
    /// Identity instance visible to every ray mask.
    pub fn new(blas_address: DeviceAddress) -> Self {
        AccelerationStructureInstance {
            transform: TransformMatrix::identity(),
            custom_index_and_mask: pack_24_8(0, 0xff),
            hit_group_offset_and_flags: 0,
            blas_address: blas_address.get(),
        }
    }

    pub fn with_transform(mut self, transform: TransformMatrix) -> Self {
        self.transform = transform;
        self
    }

    /// # Panics
    ///
    /// Panics if `custom_index` needs more than 24 bits.
    pub fn with_custom_index_mask(mut self, custom_index: u32, mask: u8) -> Self {
        self.custom_index_and_mask = pack_24_8(custom_index, mask);
        self
    }

    /// # Panics
    ///
    /// Panics if `offset` needs more than 24 bits.
    pub fn with_hit_group_offset_flags(
        mut self,
        offset: u32,
        flags: GeometryInstanceFlags,
    ) -> Self {
        self.hit_group_offset_and_flags = pack_24_8(offset, flags.bits());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_layout_matches_device_record() {
        assert_eq!(std::mem::size_of::<TransformMatrix>(), 48);
        assert_eq!(std::mem::size_of::<AccelerationStructureInstance>(), 64);
    }

    #[test]
    fn instance_packs_mask_and_flags_into_high_byte() {
        let instance = AccelerationStructureInstance::new(DeviceAddress::new(0x100).unwrap())
            .with_custom_index_mask(3, 0xff)
            .with_hit_group_offset_flags(
                0,
                GeometryInstanceFlags::TRIANGLE_FACING_CULL_DISABLE,
            );

        assert_eq!(instance.custom_index_and_mask, 0xff00_0003);
        assert_eq!(instance.hit_group_offset_and_flags, 0x0100_0000);
        assert_eq!(instance.blas_address, 0x100);
    }

    #[test]
    #[should_panic]
    fn custom_index_wider_than_24_bits_is_rejected() {
        let _ = AccelerationStructureInstance::new(DeviceAddress::new(0x100).unwrap())
            .with_custom_index_mask(1 << 24, 0xff);
    }

    #[test]
    fn transform_from_mat4_is_row_major() {
        let mat = glam::Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        let transform = TransformMatrix::from_mat4(mat);
        assert_eq!(transform.matrix[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(transform.matrix[1], [0.0, 1.0, 0.0, 2.0]);
        assert_eq!(transform.matrix[2], [0.0, 0.0, 1.0, 3.0]);
    }
}
