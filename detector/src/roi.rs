use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;
use scene_capture_common::config::{ConfigError, RoiConfig};
use tracing::debug;

/// Binary region-of-interest mask at the resolution the polygon was drawn on.
///
/// Built once when the ROI is confirmed and shared read-only by every
/// session; replaced wholesale when the ROI changes.
#[derive(Debug, Clone)]
pub struct RoiMask {
    mask: GrayImage,
    pixel_count: u64,
    vertices: Vec<Point<i32>>,
}

impl RoiMask {
    /// Rasterize a polygon into a filled mask of the configured size.
    pub fn from_config(roi: &RoiConfig) -> Result<Self, ConfigError> {
        roi.validate()?;

        let mut vertices: Vec<Point<i32>> = roi
            .vertices
            .iter()
            .map(|&[x, y]| Point::new(x, y))
            .collect();
        // Editors often close the ring by repeating the first vertex.
        vertices.dedup();
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        if vertices.len() < 3 {
            return Err(ConfigError::Roi(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                vertices.len()
            )));
        }

        let mut mask = GrayImage::new(roi.width, roi.height);
        draw_polygon_mut(&mut mask, &vertices, Luma([255u8]));
        let pixel_count = count_nonzero(&mask);
        if pixel_count == 0 {
            return Err(ConfigError::Roi(
                "polygon does not cover any pixel of the frame".into(),
            ));
        }

        debug!(
            width = roi.width,
            height = roi.height,
            vertices = vertices.len(),
            pixel_count,
            "roi mask rasterized"
        );

        Ok(Self {
            mask,
            pixel_count,
            vertices,
        })
    }

    /// Wrap an already rasterized mask; any non-zero pixel is inside the ROI.
    pub fn from_mask(mask: GrayImage) -> Self {
        let pixel_count = count_nonzero(&mask);
        Self {
            mask,
            pixel_count,
            vertices: Vec::new(),
        }
    }

    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    pub fn pixel_count(&self) -> u64 {
        self.pixel_count
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.mask.dimensions()
    }

    /// Nearest-neighbour resize so polygon edges stay hard.
    pub fn resized(&self, width: u32, height: u32) -> GrayImage {
        if self.mask.dimensions() == (width, height) {
            return self.mask.clone();
        }
        imageops::resize(&self.mask, width, height, FilterType::Nearest)
    }

    /// Polygon outline scaled to a `width` x `height` frame.
    pub fn outline(&self, width: u32, height: u32) -> Vec<Point<f32>> {
        let (w, h) = self.mask.dimensions();
        let sx = width as f32 / w as f32;
        let sy = height as f32 / h as f32;
        self.vertices
            .iter()
            .map(|p| Point::new(p.x as f32 * sx, p.y as f32 * sy))
            .collect()
    }
}

pub(crate) fn count_nonzero(image: &GrayImage) -> u64 {
    image.as_raw().iter().filter(|&&p| p != 0).count() as u64
}
