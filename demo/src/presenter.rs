use summit::{
    Device, DeviceError, Extent2d, Format, Image, ImageInfo, ImageTiling, ImageUsage, Layout,
    MemoryUsage, OutOfMemory, Presenter, Submission,
};

/// Presents into device-local images nobody displays.
/// Snapshots are the only visible output of a headless run.
#[derive(Debug)]
pub struct HeadlessPresenter {
    images: [Image; 2],
    next: usize,
    presented: u64,
}

impl HeadlessPresenter {
    pub fn new<D>(device: &D, extent: Extent2d) -> Result<Self, OutOfMemory>
    where
        D: Device,
    {
        let info = ImageInfo {
            extent,
            format: Format::RGBA8Unorm,
            usage: ImageUsage::TRANSFER_DST,
            tiling: ImageTiling::Optimal,
            memory: MemoryUsage::FAST_DEVICE_ACCESS,
        };

        let first = device.create_image(info)?;
        let second = match device.create_image(info) {
            Ok(image) => image,
            Err(err) => {
                device.destroy_image(first);
                return Err(err);
            }
        };

        Ok(HeadlessPresenter {
            images: [first, second],
            next: 0,
            presented: 0,
        })
    }

    pub fn destroy<D>(self, device: &D)
    where
        D: Device,
    {
        tracing::debug!("{} frames presented", self.presented);
        for image in self.images {
            device.destroy_image(image);
        }
    }
}

impl Presenter for HeadlessPresenter {
    fn format(&self) -> Format {
        Format::RGBA8Unorm
    }

    fn present_layout(&self) -> Layout {
        Layout::General
    }

    fn take_resized(&mut self) -> Option<Extent2d> {
        None
    }

    fn acquire(&mut self) -> Result<Image, DeviceError> {
        let image = self.images[self.next].clone();
        self.next = (self.next + 1) % self.images.len();
        Ok(image)
    }

    fn present(&mut self, _image: Image, submission: Submission) -> Result<(), DeviceError> {
        tracing::trace!("Present after epoch {}", submission.epoch());
        self.presented += 1;
        Ok(())
    }
}
