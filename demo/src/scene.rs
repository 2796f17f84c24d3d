use summit::{
    glam::{Mat4, Quat, Vec3},
    Buffer, BufferImageCopy, BufferInfo, BufferUsage, Device, Encoder, Extent2d, Format, Image,
    ImageInfo, ImageMemoryBarrier, ImageTiling, ImageUsage, Layout, Material, MemoryUsage, Node,
    Offset3d, Primitive, Sampler, SamplerInfo, Scene, Texture,
};

/// Vertex layout closest-hit programs read.
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Vertex {
    position: [f32; 3],
    normal: [f32; 3],
    uv: [f32; 2],
    color: [f32; 4],
    joint0: [f32; 4],
    weight0: [f32; 4],
    tangent: [f32; 4],
}

const VERTEX_STRIDE: u64 = std::mem::size_of::<Vertex>() as u64;

#[derive(Default)]
struct Mesh {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl Mesh {
    /// Appends quad centered at `center` spanning `u` and `v` half-extents.
    fn quad(&mut self, center: Vec3, u: Vec3, v: Vec3, uv_scale: f32) {
        let normal = u.cross(v).normalize();
        let tangent = u.normalize();
        let base = self.vertices.len() as u32;

        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = center + u * su + v * sv;
            self.vertices.push(Vertex {
                position: position.to_array(),
                normal: normal.to_array(),
                uv: [
                    (su + 1.0) * 0.5 * uv_scale,
                    (sv + 1.0) * 0.5 * uv_scale,
                ],
                color: [1.0; 4],
                tangent: [tangent.x, tangent.y, tangent.z, 1.0],
                ..Vertex::default()
            });
        }

        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    fn ground(size: f32) -> Self {
        let mut mesh = Mesh::default();
        mesh.quad(Vec3::ZERO, Vec3::X * size, Vec3::NEG_Z * size, size);
        mesh
    }

    fn cube() -> Self {
        let mut mesh = Mesh::default();
        for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
            for sign in [1.0, -1.0] {
                let normal = axis * sign;
                let u = normal.any_orthonormal_vector() * 0.5;
                let v = normal.cross(u);
                mesh.quad(normal * 0.5, u, v, 1.0);
            }
        }
        mesh
    }
}

/// Procedural scene with device resources backing it.
#[derive(Debug)]
pub struct DemoScene {
    pub scene: Scene,
    buffers: Vec<Buffer>,
    images: Vec<Image>,
    sampler: Sampler,
}

impl DemoScene {
    /// Ground plane with two cubes on it, checkerboard base color and flat normals.
    #[tracing::instrument(skip(device))]
    pub fn build<D>(device: &D) -> eyre::Result<Self>
    where
        D: Device,
    {
        let meshes = [Mesh::ground(8.0), Mesh::cube()];

        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let mut ranges = Vec::new();
        for mesh in &meshes {
            ranges.push((
                vertices.len() as u64,
                mesh.vertices.len() as u32,
                indices.len() as u32,
                mesh.indices.len() as u32,
            ));
            vertices.extend_from_slice(&mesh.vertices);
            indices.extend_from_slice(&mesh.indices);
        }

        let geometry_usage = BufferUsage::DEVICE_ADDRESS
            | BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT
            | BufferUsage::STORAGE;

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let vertex_buffer = device.create_buffer_static(
            BufferInfo {
                align: 15,
                size: vertex_bytes.len() as u64,
                usage: geometry_usage,
            },
            vertex_bytes,
        )?;

        let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
        let index_buffer = match device.create_buffer_static(
            BufferInfo {
                align: 15,
                size: index_bytes.len() as u64,
                usage: geometry_usage,
            },
            index_bytes,
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                device.destroy_buffer(vertex_buffer);
                return Err(err.into());
            }
        };

        let sampler = match device.create_sampler(SamplerInfo::linear_repeat()) {
            Ok(sampler) => sampler,
            Err(err) => {
                device.destroy_buffer(vertex_buffer);
                device.destroy_buffer(index_buffer);
                return Err(err.into());
            }
        };

        let mut scene = DemoScene {
            scene: Scene::default(),
            buffers: vec![vertex_buffer.clone(), index_buffer.clone()],
            images: Vec::new(),
            sampler,
        };

        if let Err(err) = scene.upload_textures(device) {
            scene.destroy(device);
            return Err(err);
        }
        scene.scene.textures = scene.textures();

        let (vertex_base, index_base) = match (vertex_buffer.address(), index_buffer.address()) {
            (Some(vertices), Some(indices)) => (vertices, indices),
            _ => {
                scene.destroy(device);
                return Err(eyre::eyre!("Geometry buffers have no device address"));
            }
        };

        let material = Material {
            base_color: Some(0),
            normal: Some(1),
        };

        let primitives: Vec<Primitive> = ranges
            .iter()
            .map(
                |&(first_vertex, vertex_count, first_index, index_count)| Primitive {
                    vertices: vertex_base.offset(first_vertex * VERTEX_STRIDE),
                    vertex_count,
                    vertex_stride: VERTEX_STRIDE,
                    indices: index_base,
                    first_index,
                    index_count,
                    material,
                },
            )
            .collect();

        let cube = primitives[1];
        scene.scene.roots.push(
            Node::new(Mat4::IDENTITY)
                .with_primitive(primitives[0])
                .with_child(
                    Node::new(Mat4::from_translation(Vec3::new(0.0, 0.5, 0.0)))
                        .with_primitive(cube),
                )
                .with_child(
                    Node::new(Mat4::from_scale_rotation_translation(
                        Vec3::splat(1.5),
                        Quat::from_rotation_y(0.6),
                        Vec3::new(2.5, 0.75, -1.5),
                    ))
                    .with_primitive(cube),
                ),
        );

        tracing::info!(
            "Demo scene: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );

        Ok(scene)
    }

    fn upload_textures<D>(&mut self, device: &D) -> eyre::Result<()>
    where
        D: Device,
    {
        let mut staging = Vec::new();
        let result = self
            .record_texture_uploads(device, &mut staging)
            .and_then(|commands| {
                let submission = device.submit(commands)?;
                device.wait(submission)?;
                Ok(())
            });

        for buffer in staging {
            device.destroy_buffer(buffer);
        }

        result
    }

    /// Creates texture images and records copies from staging buffers into them.
    /// Staging buffers are pushed into `staging` as soon as they are created.
    fn record_texture_uploads<D>(
        &mut self,
        device: &D,
        staging: &mut Vec<Buffer>,
    ) -> eyre::Result<Vec<summit::Command>>
    where
        D: Device,
    {
        const CHECKER: [[u8; 4]; 4] = [
            [230, 230, 230, 255],
            [60, 60, 70, 255],
            [60, 60, 70, 255],
            [230, 230, 230, 255],
        ];
        const FLAT_NORMAL: [[u8; 4]; 1] = [[128, 128, 255, 255]];

        let textures: [(&[[u8; 4]], u32, Format); 2] = [
            (&CHECKER, 2, Format::RGBA8Srgb),
            (&FLAT_NORMAL, 1, Format::RGBA8Unorm),
        ];

        let mut copies = Vec::new();
        let mut before = Vec::new();
        let mut after = Vec::new();

        for &(texels, side, format) in &textures {
            let extent = Extent2d {
                width: side,
                height: side,
            };

            let image = device.create_image(ImageInfo {
                extent,
                format,
                usage: ImageUsage::TRANSFER_DST | ImageUsage::SAMPLED,
                tiling: ImageTiling::Optimal,
                memory: MemoryUsage::FAST_DEVICE_ACCESS,
            })?;
            self.images.push(image.clone());

            let bytes: &[u8] = bytemuck::cast_slice(texels);
            let buffer = device.create_buffer_static(
                BufferInfo {
                    align: 3,
                    size: bytes.len() as u64,
                    usage: BufferUsage::TRANSFER_SRC,
                },
                bytes,
            )?;
            staging.push(buffer.clone());

            before.push(ImageMemoryBarrier::initialize(
                &image,
                Layout::TransferDstOptimal,
            ));
            after.push(ImageMemoryBarrier::transition(
                &image,
                Layout::TransferDstOptimal,
                Layout::ShaderReadOnlyOptimal,
            ));
            copies.push((buffer, image, extent));
        }

        let mut encoder = Encoder::new();
        encoder.image_barriers(before);
        for (buffer, image, extent) in &copies {
            encoder.copy_buffer_to_image(
                buffer,
                image,
                Layout::TransferDstOptimal,
                &[BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_offset: Offset3d::ZERO,
                    image_extent: extent.into_3d(),
                }],
            );
        }
        encoder.image_barriers(after);

        Ok(encoder.finish())
    }

    /// Textures in the order materials reference them.
    fn textures(&self) -> Vec<Texture> {
        self.images
            .iter()
            .map(|image| Texture {
                image: image.clone(),
                sampler: self.sampler.clone(),
            })
            .collect()
    }

    pub fn destroy<D>(self, device: &D)
    where
        D: Device,
    {
        for buffer in self.buffers {
            device.destroy_buffer(buffer);
        }
        for image in self.images {
            device.destroy_image(image);
        }
        device.destroy_sampler(self.sampler);
    }
}
