use crate::{image::Image, sampler::Sampler, DeviceAddress};

/// Texture references of a primitive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Material {
    /// Index into [`Scene::textures`].
    pub base_color: Option<u32>,

    /// Index into [`Scene::textures`].
    pub normal: Option<u32>,
}

/// Indexed triangle list living in device memory.
///
/// Vertices start with three `f32` position components.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Primitive {
    pub vertices: DeviceAddress,

    /// Number of addressable vertices.
    pub vertex_count: u32,

    /// Bytes between consecutive vertices.
    pub vertex_stride: u64,

    /// Base of the `u32` index buffer.
    pub indices: DeviceAddress,

    pub first_index: u32,
    pub index_count: u32,

    pub material: Material,
}

impl Primitive {
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    /// Address of the first index of this primitive.
    pub fn index_address(&self) -> DeviceAddress {
        self.indices.offset(u64::from(self.first_index) * 4)
    }

    /// Texture indices of a primitive that can be traced with a table
    /// of `texture_count` textures. `None` without triangles, when either
    /// texture is missing or when an index falls past the table.
    pub fn traceable_textures(&self, texture_count: usize) -> Option<(u32, u32)> {
        let bound = |index: Option<u32>| index.filter(|&index| (index as usize) < texture_count);

        if self.index_count == 0 {
            return None;
        }
        Some((bound(self.material.base_color)?, bound(self.material.normal)?))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    /// Transform relative to the parent node.
    pub transform: glam::Mat4,
    pub primitives: Vec<Primitive>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(transform: glam::Mat4) -> Self {
        Node {
            transform,
            primitives: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_primitive(mut self, primitive: Primitive) -> Self {
        self.primitives.push(primitive);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Texture {
    pub image: Image,
    pub sampler: Sampler,
}

/// Node hierarchy and texture table supplied by the scene loader.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    pub roots: Vec<Node>,
    pub textures: Vec<Texture>,
}

impl Scene {
    /// Visits every primitive depth-first, parents before children,
    /// primitives in declaration order. `f` receives world transform.
    pub fn visit_primitives(&self, mut f: impl FnMut(&glam::Mat4, &Primitive)) {
        fn visit(node: &Node, parent: &glam::Mat4, f: &mut dyn FnMut(&glam::Mat4, &Primitive)) {
            let world = *parent * node.transform;
            for primitive in &node.primitives {
                f(&world, primitive);
            }
            for child in &node.children {
                visit(child, &world, f);
            }
        }

        for root in &self.roots {
            visit(root, &glam::Mat4::IDENTITY, &mut f);
        }
    }
}
