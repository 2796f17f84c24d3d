use crate::{align_up, DeviceAddress};

bitflags::bitflags! {
    /// Ways a buffer is going to be used.
    /// Memory type selection depends on these, see [`MemoryUsage`](crate::MemoryUsage).
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct BufferUsage: u32 {
        /// Staging source for texture uploads.
        const TRANSFER_SRC = 0x00000001;
        const TRANSFER_DST = 0x00000002;
        /// Per-frame camera and light block.
        const UNIFORM = 0x00000010;
        /// Vertex, index and primitive records fetched by hit programs.
        const STORAGE = 0x00000020;
        /// Triangles and instances consumed by structure builds.
        const ACCELERATION_STRUCTURE_BUILD_INPUT = 0x00000400;
        /// Backing memory of a BLAS or TLAS.
        const ACCELERATION_STRUCTURE_STORAGE = 0x00000800;
        const SHADER_BINDING_TABLE = 0x00001000;
        /// Buffer gets a [`DeviceAddress`].
        const DEVICE_ADDRESS = 0x0008000;
    }
}

/// Buffer parameters.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferInfo {
    /// Alignment of the start address, as `alignment - 1`.
    pub align: u64,

    /// Size in bytes.
    pub size: u64,

    pub usage: BufferUsage,
}

impl BufferInfo {
    /// Checks that `align` is a power-of-two mask
    /// and `size` stays representable once rounded up to it.
    pub fn is_valid(&self) -> bool {
        match self.align.checked_add(1) {
            Some(alignment) if alignment.is_power_of_two() => {
                align_up(self.align, self.size).is_some()
            }
            _ => false,
        }
    }
}

/// Handle to a buffer created by a [`Device`](crate::Device).
///
/// Handles are plain values. The device that created the buffer owns the
/// memory and releases it in `destroy_buffer`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Buffer {
    info: BufferInfo,
    address: Option<DeviceAddress>,
    index: usize,
}

impl Buffer {
    pub fn new(info: BufferInfo, address: Option<DeviceAddress>, index: usize) -> Self {
        Buffer {
            info,
            address,
            index,
        }
    }

    pub fn info(&self) -> &BufferInfo {
        &self.info
    }

    /// `None` unless created with `DEVICE_ADDRESS` usage.
    pub fn address(&self) -> Option<DeviceAddress> {
        self.address
    }

    /// Backend-specific slot of this buffer.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Byte range of a buffer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferRegion {
    pub buffer: Buffer,
    pub offset: u64,
    pub size: u64,
}

impl BufferRegion {
    /// Region spanning the entire buffer.
    pub fn whole(buffer: Buffer) -> Self {
        BufferRegion {
            offset: 0,
            size: buffer.info().size,
            buffer,
        }
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        Some(self.buffer.address()?.offset(self.offset))
    }
}

impl From<Buffer> for BufferRegion {
    fn from(buffer: Buffer) -> Self {
        BufferRegion::whole(buffer)
    }
}

/// Region split into fixed-size records, e.g. shader group handles.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StridedBufferRegion {
    pub region: BufferRegion,
    pub stride: u64,
}

impl StridedBufferRegion {
    /// Number of whole records the region holds.
    pub fn count(&self) -> u64 {
        if self.stride == 0 {
            0
        } else {
            self.region.size / self.stride
        }
    }
}
