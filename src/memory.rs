bitflags::bitflags! {
    /// How host and device access memory backing a resource.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct MemoryUsage: u8 {
        /// Host reads results back. Staging images for snapshots use this.
        const DOWNLOAD = 0x04;

        /// Host writes content once or every frame.
        /// Uniforms, light blocks and binding tables live here.
        const UPLOAD = 0x08;

        /// Only the device touches the memory.
        const FAST_DEVICE_ACCESS = 0x10;

        /// Resource is short-lived, e.g. build scratch.
        const TRANSIENT = 0x20;
    }
}

impl MemoryUsage {
    /// Host maps memory with either upload or download usage.
    pub fn is_host_visible(&self) -> bool {
        self.intersects(MemoryUsage::UPLOAD | MemoryUsage::DOWNLOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transfer_usages_are_host_visible() {
        assert!(MemoryUsage::UPLOAD.is_host_visible());
        assert!((MemoryUsage::DOWNLOAD | MemoryUsage::FAST_DEVICE_ACCESS).is_host_visible());
        assert!(!MemoryUsage::FAST_DEVICE_ACCESS.is_host_visible());
        assert!(!MemoryUsage::TRANSIENT.is_host_visible());
    }
}
