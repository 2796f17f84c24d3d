use crate::{
    accel::{
        AccelerationStructure, AccelerationStructureBuildFlags,
        AccelerationStructureBuildGeometryInfo, AccelerationStructureBuildSizesInfo,
        AccelerationStructureGeometry, AccelerationStructureGeometryInfo,
        AccelerationStructureInfo, AccelerationStructureInstance, AccelerationStructureLevel,
        GeometryFlags, GeometryInstanceFlags, TransformMatrix,
    },
    buffer::{Buffer, BufferInfo, BufferRegion, BufferUsage},
    device::Device,
    encode::Encoder,
    error::{BuildError, BuildStep},
    geometry::PackedGeometry,
    memory::MemoryUsage,
    DeviceAddress,
};

/// Alignment mask for structure storage and scratch memory.
const ACCELERATION_STRUCTURE_ALIGN: u64 = 255;

/// Flips Y axis of the whole scene.
pub const TOP_LEVEL_TRANSFORM: TransformMatrix = TransformMatrix {
    matrix: [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, -1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
    ],
};

/// Built acceleration structure together with its backing storage.
///
/// Default value is an empty handle that owns nothing.
#[derive(Clone, Debug, PartialEq)]
pub struct AccelerationStructureHandle {
    level: AccelerationStructureLevel,
    accel: Option<AccelerationStructure>,
    storage: Option<Buffer>,
    sizes: AccelerationStructureBuildSizesInfo,
}

impl Default for AccelerationStructureHandle {
    fn default() -> Self {
        AccelerationStructureHandle::empty(AccelerationStructureLevel::Bottom)
    }
}

impl AccelerationStructureHandle {
    pub fn empty(level: AccelerationStructureLevel) -> Self {
        AccelerationStructureHandle {
            level,
            accel: None,
            storage: None,
            sizes: AccelerationStructureBuildSizesInfo::default(),
        }
    }

    pub fn level(&self) -> AccelerationStructureLevel {
        self.level
    }

    pub fn accel(&self) -> Option<&AccelerationStructure> {
        self.accel.as_ref()
    }

    pub fn storage(&self) -> Option<&Buffer> {
        self.storage.as_ref()
    }

    /// Sizes reported by the device when this structure was built.
    pub fn sizes(&self) -> &AccelerationStructureBuildSizesInfo {
        &self.sizes
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        self.accel.as_ref().map(AccelerationStructure::address)
    }

    pub fn is_empty(&self) -> bool {
        self.accel.is_none() && self.storage.is_none()
    }

    /// Releases structure and its storage.
    /// Does nothing for empty handle, so repeated calls are harmless.
    pub fn destroy<D>(&mut self, device: &D)
    where
        D: Device + ?Sized,
    {
        if let Some(accel) = self.accel.take() {
            device.destroy_acceleration_structure(accel);
        }
        if let Some(storage) = self.storage.take() {
            device.destroy_buffer(storage);
        }
    }
}

/// Buffer living for a single build.
/// Destroyed when dropped, whatever way the build ends.
struct TransientBuffer<'a, D: Device + ?Sized> {
    device: &'a D,
    buffer: Option<Buffer>,
}

impl<'a, D> TransientBuffer<'a, D>
where
    D: Device + ?Sized,
{
    fn scratch(
        device: &'a D,
        level: AccelerationStructureLevel,
        size: u64,
    ) -> Result<Self, BuildError> {
        let buffer = device
            .create_buffer(
                BufferInfo {
                    align: ACCELERATION_STRUCTURE_ALIGN,
                    size,
                    usage: BufferUsage::STORAGE | BufferUsage::DEVICE_ADDRESS,
                },
                MemoryUsage::FAST_DEVICE_ACCESS | MemoryUsage::TRANSIENT,
            )
            .map_err(|source| BuildError::Allocation {
                level,
                step: BuildStep::Scratch,
                size,
                source,
            })?;

        tracing::debug!("Scratch buffer of {} bytes acquired", size);

        Ok(TransientBuffer {
            device,
            buffer: Some(buffer),
        })
    }

    fn instances(
        device: &'a D,
        instances: &[AccelerationStructureInstance],
    ) -> Result<Self, BuildError> {
        let size = std::mem::size_of_val(instances) as u64;
        let buffer = device
            .create_buffer_static(
                BufferInfo {
                    align: 15,
                    size,
                    usage: BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT
                        | BufferUsage::DEVICE_ADDRESS,
                },
                bytemuck::cast_slice(instances),
            )
            .map_err(|source| BuildError::Allocation {
                level: AccelerationStructureLevel::Top,
                step: BuildStep::Instances,
                size,
                source,
            })?;

        Ok(TransientBuffer {
            device,
            buffer: Some(buffer),
        })
    }

    fn address(
        &self,
        level: AccelerationStructureLevel,
        step: BuildStep,
    ) -> Result<DeviceAddress, BuildError> {
        self.buffer
            .as_ref()
            .and_then(Buffer::address)
            .ok_or(BuildError::MissingAddress { level, step })
    }
}

impl<D> Drop for TransientBuffer<'_, D>
where
    D: Device + ?Sized,
{
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            tracing::debug!("Transient buffer of {} bytes released", buffer.info().size);
            self.device.destroy_buffer(buffer);
        }
    }
}

/// Builds bottom level structure over all packed geometries.
///
/// `transforms` must hold `geometry.transforms` when geometry is not empty.
#[tracing::instrument(skip_all, fields(geometries = geometry.len()))]
pub fn build_bottom_level<D>(
    device: &D,
    geometry: &PackedGeometry,
    transforms: Option<&Buffer>,
) -> Result<AccelerationStructureHandle, BuildError>
where
    D: Device + ?Sized,
{
    let level = AccelerationStructureLevel::Bottom;

    let transforms = match transforms {
        Some(buffer) => Some(buffer.address().ok_or(BuildError::MissingAddress {
            level,
            step: BuildStep::Create,
        })?),
        None => None,
    };

    build(
        device,
        level,
        &geometry.geometry_infos(),
        geometry.geometries(transforms),
    )
}

/// Builds top level structure with single instance of `bottom`.
#[tracing::instrument(skip_all)]
pub fn build_top_level<D>(
    device: &D,
    bottom: &AccelerationStructureHandle,
) -> Result<AccelerationStructureHandle, BuildError>
where
    D: Device + ?Sized,
{
    let level = AccelerationStructureLevel::Top;
    let bottom_address = bottom.address().ok_or(BuildError::BottomLevelNotBuilt)?;

    let instance = AccelerationStructureInstance::new(bottom_address)
        .with_transform(TOP_LEVEL_TRANSFORM)
        .with_custom_index_mask(0, 0xff)
        .with_hit_group_offset_flags(0, GeometryInstanceFlags::TRIANGLE_FACING_CULL_DISABLE);

    let instances = TransientBuffer::instances(device, &[instance])?;

    let infos = [AccelerationStructureGeometryInfo::Instances {
        max_primitive_count: 1,
    }];

    let geometries = vec![AccelerationStructureGeometry::Instances {
        flags: GeometryFlags::OPAQUE,
        data: instances.address(level, BuildStep::Instances)?,
        primitive_count: 1,
    }];

    let handle = build(device, level, &infos, geometries)?;
    drop(instances);
    Ok(handle)
}

fn build<D>(
    device: &D,
    level: AccelerationStructureLevel,
    infos: &[AccelerationStructureGeometryInfo],
    geometries: Vec<AccelerationStructureGeometry>,
) -> Result<AccelerationStructureHandle, BuildError>
where
    D: Device + ?Sized,
{
    let mut handle = AccelerationStructureHandle::empty(level);

    match build_into(device, &mut handle, infos, geometries) {
        Ok(()) => Ok(handle),
        Err(err) => {
            tracing::error!("{:?} level structure build failed: {}", level, err);
            handle.destroy(device);
            Err(err)
        }
    }
}

fn build_into<D>(
    device: &D,
    handle: &mut AccelerationStructureHandle,
    infos: &[AccelerationStructureGeometryInfo],
    geometries: Vec<AccelerationStructureGeometry>,
) -> Result<(), BuildError>
where
    D: Device + ?Sized,
{
    let level = handle.level;
    let geometry_count = infos.len();
    let flags = AccelerationStructureBuildFlags::PREFER_FAST_TRACE;

    let sizes = device
        .get_acceleration_structure_build_sizes(level, flags, infos)
        .map_err(|source| BuildError::Device {
            level,
            step: BuildStep::SizeQuery,
            geometry_count,
            source,
        })?;

    tracing::debug!(
        "{:?} level sizes: structure {} bytes, build scratch {} bytes",
        level,
        sizes.acceleration_structure_size,
        sizes.build_scratch_size,
    );
    handle.sizes = sizes;

    let storage = device
        .create_buffer(
            BufferInfo {
                align: ACCELERATION_STRUCTURE_ALIGN,
                size: sizes.acceleration_structure_size,
                usage: BufferUsage::ACCELERATION_STRUCTURE_STORAGE | BufferUsage::DEVICE_ADDRESS,
            },
            MemoryUsage::FAST_DEVICE_ACCESS,
        )
        .map_err(|source| BuildError::Allocation {
            level,
            step: BuildStep::Storage,
            size: sizes.acceleration_structure_size,
            source,
        })?;
    handle.storage = Some(storage.clone());

    let accel = device
        .create_acceleration_structure(AccelerationStructureInfo {
            level,
            region: BufferRegion::whole(storage),
        })
        .map_err(|source| BuildError::Allocation {
            level,
            step: BuildStep::Create,
            size: sizes.acceleration_structure_size,
            source,
        })?;
    handle.accel = Some(accel.clone());

    let scratch = TransientBuffer::scratch(device, level, sizes.build_scratch_size)?;

    let mut encoder = Encoder::new();
    encoder.build_acceleration_structure(vec![AccelerationStructureBuildGeometryInfo {
        src: None,
        dst: accel,
        flags,
        geometries,
        scratch: scratch.address(level, BuildStep::Scratch)?,
    }]);

    let submission = device
        .submit(encoder.finish())
        .map_err(|source| BuildError::Device {
            level,
            step: BuildStep::Submit,
            geometry_count,
            source,
        })?;

    device
        .wait(submission)
        .map_err(|source| BuildError::Device {
            level,
            step: BuildStep::Wait,
            geometry_count,
            source,
        })?;

    drop(scratch);

    tracing::info!(
        "{:?} level acceleration structure built with {} geometries",
        level,
        geometry_count
    );

    Ok(())
}
