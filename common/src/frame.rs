use image::{DynamicImage, GrayImage, ImageBuffer, Rgb, RgbImage, Rgba, RgbaImage};

/// Channel layout of a frame's raw pixel bytes. Always 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb8,
    Rgba8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
        }
    }
}

/// One captured bitmap, in raw device pixels.
///
/// `scale_factor` is the device pixel density the frame was captured at;
/// logical (display) size is the raw size divided by it. Frames are immutable
/// once built: the stitcher reads them and produces new frames, it never
/// edits one in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Vec<u8>,
    scale_factor: f64,
}

impl Frame {
    /// Build a frame from row-major pixel bytes.
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: Vec<u8>,
        scale_factor: f64,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimensions { width, height });
        }
        if !scale_factor.is_finite() || scale_factor <= 0.0 {
            return Err(FrameError::InvalidScaleFactor(scale_factor));
        }
        let expected = width as usize * height as usize * layout.channels();
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
            scale_factor,
        })
    }

    /// Wrap a decoded image. Images with an alpha channel become `Rgba8`,
    /// everything else is converted to `Rgb8`.
    pub fn from_dynamic(img: DynamicImage, scale_factor: f64) -> Result<Self, FrameError> {
        let (width, height) = (img.width(), img.height());
        if img.color().has_alpha() {
            Self::new(width, height, PixelLayout::Rgba8, img.into_rgba8().into_raw(), scale_factor)
        } else {
            Self::new(width, height, PixelLayout::Rgb8, img.into_rgb8().into_raw(), scale_factor)
        }
    }

    // -- Accessors ---------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn logical_width(&self) -> f64 {
        self.width as f64 / self.scale_factor
    }

    pub fn logical_height(&self) -> f64 {
        self.height as f64 / self.scale_factor
    }

    // -- Conversions -------------------------------------------------------------

    /// Single-channel luminance copy of this frame, used only for overlap scoring.
    pub fn to_grayscale(&self) -> Result<GrayscaleBuffer, FrameError> {
        self.to_grayscale_rows(0, self.height)
    }

    /// Luminance copy of `rows` rows starting at row `start`. Only those rows
    /// are converted.
    pub fn to_grayscale_rows(&self, start: u32, rows: u32) -> Result<GrayscaleBuffer, FrameError> {
        let end = start.checked_add(rows).filter(|&end| end <= self.height);
        let Some(end) = end else {
            return Err(FrameError::RowRange {
                start,
                rows,
                height: self.height,
            });
        };
        let row_bytes = self.width as usize * self.layout.channels();
        let band = &self.data[start as usize * row_bytes..end as usize * row_bytes];

        let gray: GrayImage = match self.layout {
            PixelLayout::Rgb8 => {
                let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(self.width, rows, band)
                    .ok_or(FrameError::GrayscaleSize)?;
                image::imageops::grayscale(&view)
            }
            PixelLayout::Rgba8 => {
                let view = ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(self.width, rows, band)
                    .ok_or(FrameError::GrayscaleSize)?;
                image::imageops::grayscale(&view)
            }
        };
        GrayscaleBuffer::new(gray.width(), gray.height(), gray.into_raw())
    }

    pub fn to_rgba_image(&self) -> Result<RgbaImage, FrameError> {
        let rgba = match self.layout {
            PixelLayout::Rgba8 => RgbaImage::from_raw(self.width, self.height, self.data.clone()),
            PixelLayout::Rgb8 => RgbImage::from_raw(self.width, self.height, self.data.clone())
                .map(|rgb| DynamicImage::ImageRgb8(rgb).into_rgba8()),
        };
        rgba.ok_or_else(|| self.buffer_error())
    }

    pub fn into_dynamic(self) -> Result<DynamicImage, FrameError> {
        let err = self.buffer_error();
        let img = match self.layout {
            PixelLayout::Rgb8 => {
                RgbImage::from_raw(self.width, self.height, self.data).map(DynamicImage::ImageRgb8)
            }
            PixelLayout::Rgba8 => {
                RgbaImage::from_raw(self.width, self.height, self.data).map(DynamicImage::ImageRgba8)
            }
        };
        img.ok_or(err)
    }

    fn buffer_error(&self) -> FrameError {
        FrameError::BufferSize {
            expected: self.width as usize * self.height as usize * self.layout.channels(),
            got: self.data.len(),
        }
    }
}

/// One byte per pixel, row-major, `width * height` long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayscaleBuffer {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl GrayscaleBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.width as usize;
        &self.data[start..start + self.width as usize]
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame has empty dimensions {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
    #[error("pixel buffer size mismatch: expected {expected} bytes, got {got}")]
    BufferSize { expected: usize, got: usize },
    #[error("invalid scale factor {0}")]
    InvalidScaleFactor(f64),
    #[error("rows {start}..+{rows} out of range for frame height {height}")]
    RowRange { start: u32, rows: u32, height: u32 },
    #[error("grayscale conversion produced an unexpected buffer size")]
    GrayscaleSize,
}
