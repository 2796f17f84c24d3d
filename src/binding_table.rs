use crate::{
    align_up,
    buffer::{Buffer, BufferInfo, BufferRegion, BufferUsage, StridedBufferRegion},
    device::{Device, DeviceProperties},
    error::PipelineError,
    pipeline::ShaderBindingTable,
    program::RayTracingProgram,
};

/// Placement of one sub-table within binding table buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TableRegion {
    pub offset: u64,

    /// Bytes covered by records. Equals `stride * count`.
    pub size: u64,

    pub count: u32,
}

/// Byte layout of a binding table with raygen, miss and hit sub-tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingTableLayout {
    pub handle_size: u32,

    /// Distance between consecutive records.
    pub stride: u64,

    pub raygen: TableRegion,
    pub miss: TableRegion,
    pub hit: TableRegion,

    /// Mask the buffer base address must be aligned with.
    pub base_align_mask: u64,

    /// Total size of the buffer.
    pub size: u64,
}

impl BindingTableLayout {
    /// Record stride is handle size rounded up to handle alignment.
    /// Each sub-table starts at multiple of base alignment.
    pub fn new(
        properties: &DeviceProperties,
        raygen_count: u32,
        miss_count: u32,
        hit_count: u32,
    ) -> Result<Self, PipelineError> {
        let invalid = || PipelineError::InvalidLimits {
            handle_size: properties.shader_group_handle_size,
            handle_alignment: properties.shader_group_handle_alignment,
            base_alignment: properties.shader_group_base_alignment,
        };

        let handle_size = properties.shader_group_handle_size;
        let handle_alignment = properties.shader_group_handle_alignment;
        let base_alignment = properties.shader_group_base_alignment;

        if handle_size == 0
            || !handle_alignment.is_power_of_two()
            || !base_alignment.is_power_of_two()
        {
            return Err(invalid());
        }

        let base_align_mask = u64::from(base_alignment) - 1;
        let stride = align_up(u64::from(handle_alignment) - 1, u64::from(handle_size))
            .ok_or_else(invalid)?;

        let mut offset = 0;
        let mut region = |count: u32| -> Result<TableRegion, PipelineError> {
            let size = stride * u64::from(count);
            let region = TableRegion {
                offset,
                size,
                count,
            };
            offset = align_up(base_align_mask, offset + size).ok_or_else(invalid)?;
            Ok(region)
        };

        let raygen = region(raygen_count)?;
        let miss = region(miss_count)?;
        let hit = region(hit_count)?;

        Ok(BindingTableLayout {
            handle_size,
            stride,
            raygen,
            miss,
            hit,
            base_align_mask,
            size: offset,
        })
    }

    /// Copies tightly packed group handles into records.
    /// Handles are expected in raygen, miss, hit order.
    pub fn write_records(&self, handles: &[u8], data: &mut [u8]) {
        let handle_size = self.handle_size as usize;
        let mut next = handles.chunks_exact(handle_size);

        for region in [&self.raygen, &self.miss, &self.hit] {
            for record in 0..region.count as usize {
                let offset = region.offset as usize + record * self.stride as usize;
                if let Some(handle) = next.next() {
                    data[offset..offset + handle_size].copy_from_slice(handle);
                }
            }
        }
    }
}

/// Binding table buffer and regions referencing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingTable {
    pub buffer: Buffer,
    pub layout: BindingTableLayout,
    pub table: ShaderBindingTable,
}

impl BindingTable {
    pub fn destroy<D>(self, device: &D)
    where
        D: Device + ?Sized,
    {
        device.destroy_buffer(self.buffer);
    }
}

/// Retrieves group handles of compiled program and lays them out into binding table.
#[tracing::instrument(skip_all)]
pub fn build_binding_table<D>(
    device: &D,
    program: &RayTracingProgram,
) -> Result<BindingTable, PipelineError>
where
    D: Device + ?Sized,
{
    let properties = device.properties();
    let groups = &program.groups;
    let group_count = groups.len();

    let raygen = groups.raygen();
    let miss = groups.miss();
    let hit = groups.hit();

    let layout = BindingTableLayout::new(
        properties,
        raygen.len() as u32,
        miss.len() as u32,
        hit.len() as u32,
    )?;

    let handles = device
        .get_ray_tracing_shader_group_handles(&program.pipeline, 0, group_count)
        .map_err(|source| PipelineError::HandleQuery {
            group_count,
            source,
        })?;

    let handle_size = layout.handle_size as usize;
    if handles.len() < handle_size * group_count as usize {
        return Err(PipelineError::InsufficientHandles {
            group_count,
            handle_size: layout.handle_size,
            handle_bytes: handles.len(),
        });
    }

    // Reorder handles so that each kind is contiguous.
    let ordered: Vec<u8> = raygen
        .iter()
        .chain(&miss)
        .chain(&hit)
        .flat_map(|&group| {
            let start = group as usize * handle_size;
            handles[start..start + handle_size].iter().copied()
        })
        .collect();

    let mut data = vec![0; layout.size as usize];
    layout.write_records(&ordered, &mut data);

    let buffer = device
        .create_buffer_static(
            BufferInfo {
                align: layout.base_align_mask,
                size: layout.size,
                usage: BufferUsage::SHADER_BINDING_TABLE | BufferUsage::DEVICE_ADDRESS,
            },
            &data,
        )
        .map_err(|source| PipelineError::BindingTable {
            size: layout.size,
            source,
        })?;

    let strided = |region: &TableRegion| {
        if region.count == 0 {
            None
        } else {
            Some(StridedBufferRegion {
                region: BufferRegion {
                    buffer: buffer.clone(),
                    offset: region.offset,
                    size: region.size,
                },
                stride: layout.stride,
            })
        }
    };

    let table = ShaderBindingTable {
        raygen: strided(&layout.raygen),
        miss: strided(&layout.miss),
        hit: strided(&layout.hit),
        callable: None,
    };

    tracing::info!(
        "Shader binding table: {} raygen, {} miss, {} hit records, stride {}",
        layout.raygen.count,
        layout.miss.count,
        layout.hit.count,
        layout.stride
    );

    Ok(BindingTable {
        buffer,
        layout,
        table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(handle_size: u32, handle_alignment: u32, base_alignment: u32) -> DeviceProperties {
        DeviceProperties {
            shader_group_handle_size: handle_size,
            shader_group_handle_alignment: handle_alignment,
            shader_group_base_alignment: base_alignment,
            max_ray_recursion_depth: 31,
            max_variable_descriptor_count: 1024,
        }
    }

    #[test]
    fn typical_nvidia_limits() {
        let layout = BindingTableLayout::new(&properties(32, 32, 64), 1, 2, 2).unwrap();

        assert_eq!(layout.stride, 32);
        assert_eq!(layout.raygen, TableRegion { offset: 0, size: 32, count: 1 });
        assert_eq!(layout.miss, TableRegion { offset: 64, size: 64, count: 2 });
        assert_eq!(layout.hit, TableRegion { offset: 128, size: 64, count: 2 });
        assert_eq!(layout.size, 192);
    }

    #[test]
    fn stride_rounds_handle_to_alignment() {
        let layout = BindingTableLayout::new(&properties(20, 16, 128), 1, 2, 2).unwrap();

        assert_eq!(layout.stride, 32);
        assert_eq!(layout.miss.offset % 128, 0);
        assert_eq!(layout.hit.offset % 128, 0);
        assert_eq!(layout.hit.size, 64);
    }

    #[test]
    fn invalid_alignments_are_rejected() {
        assert!(BindingTableLayout::new(&properties(32, 24, 64), 1, 2, 2).is_err());
        assert!(BindingTableLayout::new(&properties(32, 32, 0), 1, 2, 2).is_err());
        assert!(BindingTableLayout::new(&properties(0, 32, 64), 1, 2, 2).is_err());
    }

    #[test]
    fn records_are_written_at_strided_offsets() {
        let layout = BindingTableLayout::new(&properties(4, 8, 16), 1, 2, 2).unwrap();
        let handles: Vec<u8> = (1..=5).flat_map(|h| [h; 4]).collect();
        let mut data = vec![0; layout.size as usize];

        layout.write_records(&handles, &mut data);

        assert_eq!(&data[0..4], &[1; 4]);
        assert_eq!(&data[4..8], &[0; 4]);
        assert_eq!(&data[16..20], &[2; 4]);
        assert_eq!(&data[24..28], &[3; 4]);
        assert_eq!(&data[32..36], &[4; 4]);
        assert_eq!(&data[40..44], &[5; 4]);
    }
}
