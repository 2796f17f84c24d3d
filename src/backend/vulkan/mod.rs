mod convert;
mod device;
mod encode;
mod graphics;
mod physical;
mod submissions;

pub use self::{device::VulkanDevice, graphics::*, physical::*};

#[track_caller]
fn unexpected_result(result: ash::vk::Result) -> ! {
    panic!("Unexpected Vulkan result {}", result)
}

#[track_caller]
fn invalid_handle(kind: &'static str, index: usize) -> ! {
    panic!("Invalid {} handle {}. It was destroyed or belongs to another device", kind, index)
}

#[track_caller]
fn null_device_address() -> ! {
    panic!("Device returned null address")
}
