use image::{GrayImage, Luma};

/// Pixels strictly above `cut` become 255, the rest 0.
pub fn binarize(image: &GrayImage, cut: u8) -> GrayImage {
    let (w, h) = image.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        if image.get_pixel(x, y)[0] > cut {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Motion mask from the absolute difference of consecutive processed frames.
///
/// Stateless per call; the caller keeps the previous frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameDifference {
    threshold: u8,
}

impl FrameDifference {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    /// Binary mask of pixels whose intensity moved by more than the threshold.
    /// With no previous frame (or one of another size) nothing has changed.
    pub fn diff(&self, previous: Option<&GrayImage>, current: &GrayImage) -> GrayImage {
        let (w, h) = current.dimensions();
        let previous = match previous {
            Some(p) if p.dimensions() == (w, h) => p,
            _ => return GrayImage::new(w, h),
        };
        let data = previous
            .as_raw()
            .iter()
            .zip(current.as_raw())
            .map(|(&a, &b)| if a.abs_diff(b) > self.threshold { 255 } else { 0 })
            .collect();
        // Same length as `current` by construction.
        GrayImage::from_raw(w, h, data).unwrap_or_else(|| GrayImage::new(w, h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_previous_frame_reports_no_change() {
        let fd = FrameDifference::new(30);
        let mask = fd.diff(None, &GrayImage::from_pixel(8, 8, Luma([200])));
        assert!(mask.as_raw().iter().all(|&p| p == 0));
    }

    #[test]
    fn threshold_is_exclusive() {
        let fd = FrameDifference::new(30);
        let prev = GrayImage::from_pixel(2, 1, Luma([100]));
        let mut cur = prev.clone();
        cur.put_pixel(0, 0, Luma([130]));
        cur.put_pixel(1, 0, Luma([69]));
        let mask = fd.diff(Some(&prev), &cur);
        assert_eq!(mask.get_pixel(0, 0)[0], 0, "difference of exactly 30 is not motion");
        assert_eq!(mask.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn binarize_keeps_only_values_above_cut() {
        let mut img = GrayImage::new(3, 1);
        img.put_pixel(0, 0, Luma([254]));
        img.put_pixel(1, 0, Luma([255]));
        img.put_pixel(2, 0, Luma([127]));
        let out = binarize(&img, 254);
        assert_eq!(out.as_raw(), &vec![0, 255, 0]);
    }
}
