//! Device implementations.
//! Only Vulkan with ray-tracing extensions is available, behind `vulkan` feature.

#[cfg(feature = "vulkan")]
mod vulkan;

#[cfg(feature = "vulkan")]
pub use vulkan::*;
