use arrayvec::ArrayVec;
use bytemuck::Zeroable as _;

use crate::{
    buffer::{Buffer, BufferInfo, BufferUsage},
    device::Device,
    OutOfMemory,
};

/// Capacity of the light block declared by closest-hit programs.
pub const MAX_LIGHTS: usize = 8;

/// Point light.
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Light {
    /// World position. `w` is ignored.
    pub position: [f32; 4],
    pub color: [f32; 3],
    pub intensity: f32,
}

impl Default for Light {
    fn default() -> Self {
        Light {
            position: [2.0, 8.0, 1.0, 1.0],
            color: [1.0; 3],
            intensity: 50.0,
        }
    }
}

/// Fixed-capacity light table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LightTable {
    lights: ArrayVec<Light, MAX_LIGHTS>,
}

impl LightTable {
    /// Returns `None` if there are more than [`MAX_LIGHTS`] lights.
    pub fn new(lights: &[Light]) -> Option<Self> {
        let mut table = ArrayVec::new();
        for light in lights {
            table.try_push(*light).ok()?;
        }
        Some(LightTable { lights: table })
    }

    pub fn len(&self) -> u32 {
        self.lights.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    /// Uniform block content. Unused slots are zeroed.
    pub fn block(&self) -> [Light; MAX_LIGHTS] {
        let mut block = [Light::zeroed(); MAX_LIGHTS];
        block[..self.lights.len()].copy_from_slice(&self.lights);
        block
    }

    /// Uploads light block into new uniform buffer.
    pub fn upload<D>(&self, device: &D) -> Result<Buffer, OutOfMemory>
    where
        D: Device + ?Sized,
    {
        let block = self.block();

        device.create_buffer_static(
            BufferInfo {
                align: 15,
                size: std::mem::size_of_val(&block) as u64,
                usage: BufferUsage::UNIFORM,
            },
            bytemuck::cast_slice(&block),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_layout() {
        assert_eq!(std::mem::size_of::<Light>(), 32);
    }

    #[test]
    fn capacity_is_enforced() {
        assert!(LightTable::new(&[Light::default(); MAX_LIGHTS]).is_some());
        assert!(LightTable::new(&[Light::default(); MAX_LIGHTS + 1]).is_none());
    }

    #[test]
    fn block_pads_with_zeroed_lights() {
        let table = LightTable::new(&[Light::default()]).unwrap();
        let block = table.block();

        assert_eq!(table.len(), 1);
        assert_eq!(block[0], Light::default());
        assert_eq!(block[1].intensity, 0.0);
    }

    #[test]
    fn empty_table_still_has_block() {
        let table = LightTable::new(&[]).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.block().len(), MAX_LIGHTS);
    }
}
