use crate::{
    accel::{
        AccelerationStructureGeometry, AccelerationStructureGeometryInfo, GeometryFlags,
        IndexData, TransformMatrix,
    },
    buffer::{Buffer, BufferInfo, BufferUsage},
    device::Device,
    image::Format,
    scene::Scene,
    DeviceAddress, IndexType, OutOfMemory,
};

/// Per-primitive record read by hit shaders.
///
/// Indexed by geometry index of the hit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct PrimitiveRecord {
    pub vertex_address: u64,

    /// Already includes first index offset.
    pub index_address: u64,

    pub base_color_texture: i32,
    pub normal_texture: i32,
}

/// Triangle geometry of one traced primitive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleGeometry {
    pub vertices: DeviceAddress,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub indices: DeviceAddress,
    pub triangle_count: u32,
}

/// Scene flattened into device-consumable lists.
///
/// `records`, `transforms` and `geometries` share indexing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PackedGeometry {
    pub records: Vec<PrimitiveRecord>,
    pub transforms: Vec<TransformMatrix>,
    pub geometries: Vec<TriangleGeometry>,

    /// Number of primitives excluded from tracing.
    pub skipped: usize,
}

impl PackedGeometry {
    /// Packs traceable primitives of the scene in traversal order.
    pub fn pack(scene: &Scene) -> Self {
        let mut packed = PackedGeometry::default();

        let texture_count = scene.textures.len();

        scene.visit_primitives(|world, primitive| {
            let (base_color, normal) = match primitive.traceable_textures(texture_count) {
                Some(textures) => textures,
                None => {
                    packed.skipped += 1;
                    return;
                }
            };

            let indices = primitive.index_address();

            packed.records.push(PrimitiveRecord {
                vertex_address: primitive.vertices.get(),
                index_address: indices.get(),
                base_color_texture: base_color as i32,
                normal_texture: normal as i32,
            });
            packed.transforms.push(TransformMatrix::from_mat4(*world));
            packed.geometries.push(TriangleGeometry {
                vertices: primitive.vertices,
                vertex_count: primitive.vertex_count,
                vertex_stride: primitive.vertex_stride,
                indices,
                triangle_count: primitive.triangle_count(),
            });
        });

        if packed.skipped > 0 {
            tracing::warn!(
                "{} primitives skipped: no indices or unbound textures",
                packed.skipped
            );
        }

        packed
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    /// Triangle counts of each geometry. Used for build size queries.
    pub fn max_primitive_counts(&self) -> Vec<u32> {
        self.geometries.iter().map(|g| g.triangle_count).collect()
    }

    pub fn triangle_count(&self) -> u64 {
        self.geometries
            .iter()
            .map(|g| u64::from(g.triangle_count))
            .sum()
    }

    pub fn geometry_infos(&self) -> Vec<AccelerationStructureGeometryInfo> {
        self.geometries
            .iter()
            .map(|g| AccelerationStructureGeometryInfo::Triangles {
                max_primitive_count: g.triangle_count,
                index_type: Some(IndexType::U32),
                max_vertex_count: g.vertex_count,
                vertex_format: Format::RGB32Sfloat,
                allows_transforms: true,
            })
            .collect()
    }

    /// Geometries for the build command.
    /// `transforms` is the address of uploaded transform list.
    pub fn geometries(
        &self,
        transforms: Option<DeviceAddress>,
    ) -> Vec<AccelerationStructureGeometry> {
        self.geometries
            .iter()
            .enumerate()
            .map(|(index, g)| AccelerationStructureGeometry::Triangles {
                flags: GeometryFlags::empty(),
                vertex_format: Format::RGB32Sfloat,
                vertex_data: g.vertices,
                vertex_stride: g.vertex_stride,
                vertex_count: g.vertex_count,
                first_vertex: 0,
                primitive_count: g.triangle_count,
                index_data: Some(IndexData::U32(g.indices)),
                transform_data: transforms.map(|base| {
                    base.offset(index as u64 * std::mem::size_of::<TransformMatrix>() as u64)
                }),
            })
            .collect()
    }

    /// Uploads records and transforms into device buffers.
    pub fn upload<D>(&self, device: &D) -> Result<GeometryBuffers, OutOfMemory>
    where
        D: Device + ?Sized,
    {
        // Storage buffer binding can't be empty.
        let records: &[PrimitiveRecord] = if self.records.is_empty() {
            &[PrimitiveRecord {
                vertex_address: 0,
                index_address: 0,
                base_color_texture: -1,
                normal_texture: -1,
            }]
        } else {
            &self.records
        };

        let records = device.create_buffer_static(
            BufferInfo {
                align: 15,
                size: std::mem::size_of_val(records) as u64,
                usage: BufferUsage::STORAGE | BufferUsage::DEVICE_ADDRESS,
            },
            bytemuck::cast_slice(records),
        )?;

        let transforms = if self.transforms.is_empty() {
            None
        } else {
            let result = device.create_buffer_static(
                BufferInfo {
                    align: 15,
                    size: std::mem::size_of_val(&self.transforms[..]) as u64,
                    usage: BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT
                        | BufferUsage::DEVICE_ADDRESS,
                },
                bytemuck::cast_slice(&self.transforms),
            );

            match result {
                Ok(buffer) => Some(buffer),
                Err(err) => {
                    device.destroy_buffer(records);
                    return Err(err);
                }
            }
        };

        Ok(GeometryBuffers {
            records,
            transforms,
        })
    }
}

/// Device copies of packed geometry lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeometryBuffers {
    pub records: Buffer,
    pub transforms: Option<Buffer>,
}

impl GeometryBuffers {
    pub fn destroy<D>(self, device: &D)
    where
        D: Device + ?Sized,
    {
        device.destroy_buffer(self.records);
        if let Some(transforms) = self.transforms {
            device.destroy_buffer(transforms);
        }
    }
}
