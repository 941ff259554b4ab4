use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use scene_capture_common::config::FusionMode;

/// Radius of the square structuring element (5x5).
const KERNEL_RADIUS: u8 = 2;

/// Combine the background-model and frame-difference masks and denoise the
/// result.
///
/// `And` keeps a pixel only when both signals agree, trading slow changes
/// for far fewer shadows and re-adaptation artifacts. `Or` is the
/// high-recall alternative.
pub fn fuse(gmm_mask: &GrayImage, diff_mask: &GrayImage, mode: FusionMode) -> GrayImage {
    denoise(&combine(gmm_mask, diff_mask, mode))
}

pub fn combine(gmm_mask: &GrayImage, diff_mask: &GrayImage, mode: FusionMode) -> GrayImage {
    let (w, h) = gmm_mask.dimensions();
    let data = gmm_mask
        .as_raw()
        .iter()
        .zip(diff_mask.as_raw())
        .map(|(&g, &d)| {
            let on = match mode {
                FusionMode::And => g != 0 && d != 0,
                FusionMode::Or => g != 0 || d != 0,
            };
            if on {
                255
            } else {
                0
            }
        })
        .collect();
    GrayImage::from_raw(w, h, data).unwrap_or_else(|| GrayImage::new(w, h))
}

/// Open (drop isolated specks) then close (fill small holes in blobs).
/// Opening first keeps nearby specks from being bridged into one blob.
pub fn denoise(mask: &GrayImage) -> GrayImage {
    let opened = open(mask, Norm::LInf, KERNEL_RADIUS);
    close(&opened, Norm::LInf, KERNEL_RADIUS)
}
