use std::path::{Path, PathBuf};

use crate::{
    device::Device,
    error::SnapshotError,
    image::{Extent2d, Format, Image, ImageInfo, ImageTiling, ImageUsage, SubresourceLayout},
    memory::MemoryUsage,
    OutOfMemory,
};

/// Bytes per texel of staging image.
const STAGING_TEXEL_SIZE: u64 = 4;

/// Returns `true` if frame `frame` must be exported.
pub fn should_export(frame: u32, interval: u32) -> bool {
    interval != 0 && frame != 0 && frame % interval == 0
}

/// Snapshot files are named after cumulative samples per pixel.
pub fn snapshot_file_name(frame: u32, sample_count: u32) -> String {
    format!("{}.ppm", u64::from(frame) * u64::from(sample_count))
}

/// Encodes mapped RGBA8 texels as binary PPM.
///
/// Rows start `layout.row_pitch` bytes apart beginning at `layout.offset`.
/// Alpha is dropped. Red and blue are swapped if `bgr` is set.
pub fn encode_ppm(
    data: &[u8],
    layout: &SubresourceLayout,
    extent: Extent2d,
    bgr: bool,
) -> Result<Vec<u8>, SnapshotError> {
    let row_size = u64::from(extent.width) * STAGING_TEXEL_SIZE;
    let required = match extent.height {
        0 => layout.offset,
        height => layout.offset + layout.row_pitch * u64::from(height - 1) + row_size,
    };

    if layout.row_pitch < row_size || (data.len() as u64) < required {
        return Err(SnapshotError::Truncated {
            width: extent.width,
            height: extent.height,
            required,
            available: data.len() as u64,
        });
    }

    let header = format!("P6\n{}\n{}\n255\n", extent.width, extent.height);
    let mut ppm =
        Vec::with_capacity(header.len() + extent.width as usize * extent.height as usize * 3);
    ppm.extend_from_slice(header.as_bytes());

    for y in 0..u64::from(extent.height) {
        let start = (layout.offset + y * layout.row_pitch) as usize;
        let row = &data[start..start + row_size as usize];

        for texel in row.chunks_exact(STAGING_TEXEL_SIZE as usize) {
            if bgr {
                ppm.extend_from_slice(&[texel[2], texel[1], texel[0]]);
            } else {
                ppm.extend_from_slice(&texel[..3]);
            }
        }
    }

    Ok(ppm)
}

/// Host-readable image the output is copied into for export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagingImage {
    image: Image,
}

impl StagingImage {
    pub fn new<D>(device: &D, extent: Extent2d) -> Result<Self, OutOfMemory>
    where
        D: Device + ?Sized,
    {
        let image = device.create_image(ImageInfo {
            extent,
            format: Format::RGBA8Unorm,
            usage: ImageUsage::TRANSFER_DST,
            tiling: ImageTiling::Linear,
            memory: MemoryUsage::DOWNLOAD,
        })?;

        Ok(StagingImage { image })
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn extent(&self) -> Extent2d {
        self.image.info().extent
    }

    pub fn destroy<D>(self, device: &D)
    where
        D: Device + ?Sized,
    {
        device.destroy_image(self.image);
    }
}

/// Writes content of `staging` into `dir`.
///
/// Copy into `staging` must be complete.
/// `bgr` tells that texels were copied from image with BGR format.
#[tracing::instrument(skip(device, staging))]
pub fn export<D>(
    device: &D,
    staging: &StagingImage,
    dir: &Path,
    frame: u32,
    sample_count: u32,
    bgr: bool,
) -> Result<PathBuf, SnapshotError>
where
    D: Device + ?Sized,
{
    let layout = device.image_subresource_layout(staging.image());
    let extent = staging.extent();

    let mut encoded = None;
    device.read_image(staging.image(), &mut |data| {
        encoded = Some(encode_ppm(data, &layout, extent, bgr));
    })?;

    let ppm = encoded.unwrap_or(Err(SnapshotError::Truncated {
        width: extent.width,
        height: extent.height,
        required: layout.size,
        available: 0,
    }))?;

    let path = dir.join(snapshot_file_name(frame, sample_count));

    std::fs::create_dir_all(dir).map_err(|source| SnapshotError::Io {
        path: dir.to_owned(),
        source,
    })?;
    std::fs::write(&path, &ppm).map_err(|source| SnapshotError::Io {
        path: path.clone(),
        source,
    })?;

    tracing::info!("Snapshot written to `{}`", path.display());
    Ok(path)
}
