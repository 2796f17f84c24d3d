use crate::memory::MemoryUsage;

bitflags::bitflags! {
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct ImageUsage: u32 {
        /// Output image copied into presentable or staging images.
        const TRANSFER_SRC = 0x001;
        const TRANSFER_DST = 0x002;
        /// Material texture.
        const SAMPLED = 0x004;
        /// Written by ray generation.
        const STORAGE = 0x008;
    }
}

/// Layout an image must be in for the next access.
/// Transitions are explicit [`ImageMemoryBarrier`]s recorded by the caller.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum Layout {
    /// Storage writes from ray generation and host reads of linear staging.
    General,

    /// Sampled textures.
    ShaderReadOnlyOptimal,

    TransferSrcOptimal,
    TransferDstOptimal,

    /// Image handed back to the presenter.
    Present,
}

/// Texel formats understood by the tracer.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum Format {
    RGBA8Unorm,
    RGBA8Srgb,
    BGRA8Unorm,
    BGRA8Snorm,
    BGRA8Srgb,

    /// Vertex positions.
    RGB32Sfloat,

    RGBA32Sfloat,
}

impl Format {
    /// Bytes per texel.
    pub fn texel_size(&self) -> u32 {
        match self {
            Format::RGBA32Sfloat => 16,
            Format::RGB32Sfloat => 12,
            _ => 4,
        }
    }

    /// Blue channel comes first in memory.
    /// Snapshots swizzle such texels back to RGB.
    pub fn is_bgr(&self) -> bool {
        matches!(
            self,
            Format::BGRA8Unorm | Format::BGRA8Snorm | Format::BGRA8Srgb
        )
    }
}

/// Width and height in texels.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub fn into_3d(self) -> Extent3d {
        Extent3d {
            width: self.width,
            height: self.height,
            depth: 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Offset3d {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Offset3d {
    pub const ZERO: Self = Offset3d { x: 0, y: 0, z: 0 };
}

/// Arrangement of texels in image memory.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageTiling {
    /// Implementation-defined arrangement. Not readable by host.
    Optimal,

    /// Row-major texels. Host may read them through a mapping.
    Linear,
}

/// Image parameters.
/// Every image is 2D with one mip level and one array layer.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageInfo {
    pub extent: Extent2d,
    pub format: Format,
    pub usage: ImageUsage,
    pub tiling: ImageTiling,

    /// Host-readable staging images need `DOWNLOAD` with `Linear` tiling.
    pub memory: MemoryUsage,
}

/// Handle to an image created by a [`Device`](crate::Device).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Image {
    info: ImageInfo,
    index: usize,
}

impl Image {
    pub fn new(info: ImageInfo, index: usize) -> Self {
        Image { info, index }
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Placement of linear image texels within its memory.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub struct SubresourceLayout {
    /// Offset of the first texel from the start of the mapping.
    pub offset: u64,

    /// Size of the image data in bytes.
    pub size: u64,

    /// Bytes between starts of consecutive rows.
    pub row_pitch: u64,
}

/// Moves an image between layouts.
/// With `old` set to `None` previous contents are discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageMemoryBarrier {
    pub image: Image,
    pub old: Option<Layout>,
    pub new: Layout,
}

impl ImageMemoryBarrier {
    pub fn transition(image: &Image, old: Layout, new: Layout) -> Self {
        ImageMemoryBarrier {
            image: image.clone(),
            old: Some(old),
            new,
        }
    }

    /// Transition from undefined layout.
    pub fn initialize(image: &Image, new: Layout) -> Self {
        ImageMemoryBarrier {
            image: image.clone(),
            old: None,
            new,
        }
    }
}
