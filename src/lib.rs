//! Summit is a progressive path tracer built on a Vulkan-lite API.
//!
//! Scene geometry is packed into a two-level acceleration structure,
//! ray-tracing programs are assembled into a pipeline with a strided shader
//! binding table, and every frame the dispatcher republishes the accumulation
//! state (frame counter and random seed) before tracing one ray-generation
//! invocation per pixel.
//!
//! All GPU work goes through the [`Device`] trait.
//! The Vulkan implementation lives in [`backend`] behind the `vulkan` feature.

#![warn(missing_debug_implementations)]

use std::num::NonZeroU64;

/// Builds a list of [`DescriptorSetLayoutBinding`]s.
///
/// ```
/// # use summit::*;
/// let bindings = summit::descriptor_set_layout_bindings! {
///     AccelerationStructure @ 0 for RAYGEN | CLOSEST_HIT;
///     CombinedImageSampler(16) @ 1 for CLOSEST_HIT, flags: PARTIALLY_BOUND;
/// };
/// assert_eq!(bindings[1].count, 16);
/// ```
#[macro_export]
macro_rules! descriptor_set_layout_bindings {
    ($($ty:ident $(($count:expr))? @ $binding:literal for $($stages:ident)|+ $(, flags: $($flags:ident)|+)?);* $(;)?) => {
        vec![
            $($crate::DescriptorSetLayoutBinding {
                binding: $binding,
                ty: $crate::DescriptorType::$ty,
                count: 1 $(- 1 + $count)?,
                stages: $crate::ShaderStageFlags::empty() $(| $crate::ShaderStageFlags::$stages)+,
                flags: $crate::DescriptorBindingFlags::empty() $($(| $crate::DescriptorBindingFlags::$flags)+)?,
            },)*
        ]
    };
}

pub mod backend;

mod accel;
mod binding_table;
mod bindings;
mod buffer;
mod camera;
mod config;
mod descriptor;
mod device;
mod encode;
mod error;
mod frame;
mod geometry;
mod image;
mod lights;
mod memory;
mod pipeline;
mod program;
mod sampler;
mod scene;
mod shader;
mod snapshot;
mod structures;
mod tracer;
mod uniforms;

pub use self::{
    accel::*, binding_table::*, bindings::*, buffer::*, camera::*, config::*, descriptor::*,
    device::*, encode::*, error::*, frame::*, geometry::*, image::*, lights::*, memory::*,
    pipeline::*, program::*, sampler::*, scene::*, shader::*, snapshot::*, structures::*,
    tracer::*, uniforms::*,
};

/// Re-exporting for users constructing scene data.
#[doc(hidden)]
pub use {arrayvec, bytemuck, glam};

/// Device memory ran out.
/// Destroying buffers, images or structures frees memory for a retry.
#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[error("Out of device memory")]
pub struct OutOfMemory;

/// Device stopped executing work. Reported by `submit` and `wait`.
/// Nothing created from the lost device is usable again.
#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[error("Device lost")]
pub struct DeviceLost;

/// Non-null address of buffer or acceleration structure memory
/// as seen by shaders and structure builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DeviceAddress(pub NonZeroU64);

impl DeviceAddress {
    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(DeviceAddress)
    }

    /// Returns address `offset` bytes past this one.
    pub fn offset(self, offset: u64) -> DeviceAddress {
        match self.0.checked_add(offset) {
            Some(value) => DeviceAddress(value),
            None => host_memory_space_overflow(),
        }
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum IndexType {
    U16,
    U32,
}

/// Failure to read or write resource memory from host.
#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq)]
pub enum MapError {
    #[error(transparent)]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },

    /// Resource lives in memory host cannot see,
    /// e.g. optimal-tiling image or `FAST_DEVICE_ACCESS` buffer.
    #[error("Resource memory is not host-visible")]
    NonHostVisible,

    #[error("Resource memory is mapped elsewhere")]
    AlreadyMapped,

    #[error("Mapping resource memory failed")]
    MapFailed,
}

/// Aborts on host allocation failure reported by the driver,
/// same as the global allocator would.
#[track_caller]
pub fn out_of_host_memory() -> ! {
    use std::alloc::{handle_alloc_error, Layout};

    handle_alloc_error(Layout::new::<u8>())
}

/// Device address arithmetic wrapped around.
#[track_caller]
pub fn host_memory_space_overflow() -> ! {
    panic!("Memory address space overflow")
}

/// Rounds `value` up to a multiple of `align_mask + 1`.
/// `None` on overflow.
pub fn align_up(align_mask: u64, value: u64) -> Option<u64> {
    value.checked_add(align_mask).map(|value| value & !align_mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_to_mask() {
        assert_eq!(align_up(63, 0), Some(0));
        assert_eq!(align_up(63, 1), Some(64));
        assert_eq!(align_up(63, 64), Some(64));
        assert_eq!(align_up(31, 33), Some(64));
        assert_eq!(align_up(1, u64::MAX), None);
    }

    #[test]
    fn device_address_offset() {
        let address = DeviceAddress::new(0x1000).unwrap();
        assert_eq!(address.offset(0x40).get(), 0x1040);
        assert!(DeviceAddress::new(0).is_none());
    }
}
