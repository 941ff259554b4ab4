use image::GrayImage;
use rayon::prelude::*;

use crate::processor::DetectError;

/// Gaussian components tracked per pixel.
const MAX_MODES: usize = 4;
/// Cumulative weight of the modes that describe the background.
const BACKGROUND_RATIO: f32 = 0.9;
/// Squared Mahalanobis distance under which a sample updates a mode.
const MATCH_THRESHOLD: f32 = 9.0;
const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 75.0;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

#[derive(Debug, Clone, Copy, Default)]
struct Mode {
    weight: f32,
    mean: f32,
    var: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct PixelModel {
    modes: [Mode; MAX_MODES],
    used: u8,
}

impl PixelModel {
    /// Fold one sample into the mixture. Returns `true` if the sample is
    /// explained by the background modes.
    fn update(&mut self, x: f32, alpha: f32, var_threshold: f32) -> bool {
        let used = self.used as usize;
        let mut background = false;
        let mut matched = None;
        let mut total_weight = 0.0;

        // Modes are kept sorted by weight, strongest first.
        for (i, mode) in self.modes[..used].iter().enumerate() {
            let d = x - mode.mean;
            let dist2 = d * d;
            if total_weight < BACKGROUND_RATIO && dist2 < var_threshold * mode.var {
                background = true;
            }
            if dist2 < MATCH_THRESHOLD * mode.var {
                matched = Some(i);
                break;
            }
            total_weight += mode.weight;
        }

        for mode in &mut self.modes[..used] {
            mode.weight *= 1.0 - alpha;
        }

        match matched {
            Some(i) => {
                let mode = &mut self.modes[i];
                mode.weight += alpha;
                let k = alpha / mode.weight;
                let d = x - mode.mean;
                mode.mean += k * d;
                mode.var = (mode.var + k * (d * d - mode.var)).clamp(VAR_MIN, VAR_MAX);
            }
            None => {
                // Replace the weakest mode once the mixture is full.
                let slot = used.min(MAX_MODES - 1);
                let weight = if used == 0 { 1.0 } else { alpha };
                self.modes[slot] = Mode {
                    weight,
                    mean: x,
                    var: VAR_INIT,
                };
                self.used = (slot + 1) as u8;
            }
        }

        self.normalize_and_sort();
        background
    }

    fn normalize_and_sort(&mut self) {
        let used = self.used as usize;
        let total: f32 = self.modes[..used].iter().map(|m| m.weight).sum();
        if total > 0.0 {
            for mode in &mut self.modes[..used] {
                mode.weight /= total;
            }
        }
        // Insertion sort; at most MAX_MODES entries.
        for i in 1..used {
            let mut j = i;
            while j > 0 && self.modes[j].weight > self.modes[j - 1].weight {
                self.modes.swap(j, j - 1);
                j -= 1;
            }
        }
    }
}

/// Online per-pixel adaptive mixture model of the static scene.
///
/// Each pixel carries up to four weighted Gaussians. Samples close to one of
/// the dominant modes are background; anything else is foreground. Shadows
/// are not a separate class. One instance belongs to one video: a fresh model
/// must be built for every video so no scene statistics leak across.
pub struct BackgroundModel {
    history: u32,
    var_threshold: f32,
    dimensions: Option<(u32, u32)>,
    pixels: Vec<PixelModel>,
    frames_seen: u64,
}

impl BackgroundModel {
    pub fn new(history: u32, var_threshold: f32) -> Self {
        Self {
            history: history.max(1),
            var_threshold,
            dimensions: None,
            pixels: Vec::new(),
            frames_seen: 0,
        }
    }

    /// Update the model with `gray` and return the foreground mask
    /// (`FOREGROUND` for outliers, `BACKGROUND` otherwise).
    pub fn apply(&mut self, gray: &GrayImage) -> Result<GrayImage, DetectError> {
        let dims = gray.dimensions();
        match self.dimensions {
            None => {
                self.dimensions = Some(dims);
                self.pixels = vec![PixelModel::default(); (dims.0 * dims.1) as usize];
            }
            Some(expected) if expected != dims => {
                return Err(DetectError::DimensionMismatch { expected, got: dims });
            }
            Some(_) => {}
        }

        self.frames_seen += 1;
        let alpha = self.learning_rate();
        let var_threshold = self.var_threshold;

        let mut mask = GrayImage::new(dims.0, dims.1);
        let out: &mut [u8] = &mut mask;
        self.pixels
            .par_iter_mut()
            .zip(gray.as_raw().par_iter())
            .zip(out.par_iter_mut())
            .for_each(|((model, &x), out)| {
                *out = if model.update(x as f32, alpha, var_threshold) {
                    BACKGROUND
                } else {
                    FOREGROUND
                };
            });

        Ok(mask)
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Fast adaptation while the model is young, settling to `1 / history`.
    fn learning_rate(&self) -> f32 {
        let n = (2 * self.frames_seen).min(self.history as u64).max(1);
        1.0 / n as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn frame(value: u8) -> GrayImage {
        GrayImage::from_pixel(16, 16, Luma([value]))
    }

    fn foreground_count(mask: &GrayImage) -> usize {
        mask.as_raw().iter().filter(|&&p| p == FOREGROUND).count()
    }

    #[test]
    fn first_frame_is_all_foreground() {
        let mut model = BackgroundModel::new(100, 15.0);
        let mask = model.apply(&frame(80)).unwrap();
        assert_eq!(foreground_count(&mask), 256);
    }

    #[test]
    fn static_scene_becomes_background() {
        let mut model = BackgroundModel::new(100, 15.0);
        for _ in 0..10 {
            model.apply(&frame(80)).unwrap();
        }
        let mask = model.apply(&frame(80)).unwrap();
        assert_eq!(foreground_count(&mask), 0);
        assert_eq!(model.frames_seen(), 11);
    }

    #[test]
    fn large_deviation_is_foreground() {
        let mut model = BackgroundModel::new(100, 15.0);
        for _ in 0..10 {
            model.apply(&frame(80)).unwrap();
        }
        let mut changed = frame(80);
        for y in 0..8 {
            for x in 0..8 {
                changed.put_pixel(x, y, Luma([220]));
            }
        }
        let mask = model.apply(&changed).unwrap();
        assert_eq!(foreground_count(&mask), 64);
        assert_eq!(mask.get_pixel(2, 2)[0], FOREGROUND);
        assert_eq!(mask.get_pixel(12, 12)[0], BACKGROUND);
    }

    #[test]
    fn small_noise_stays_background() {
        let mut model = BackgroundModel::new(100, 15.0);
        for i in 0..20 {
            model.apply(&frame(if i % 2 == 0 { 80 } else { 82 })).unwrap();
        }
        let mask = model.apply(&frame(81)).unwrap();
        assert_eq!(foreground_count(&mask), 0);
    }

    #[test]
    fn persistent_change_is_absorbed() {
        let mut model = BackgroundModel::new(20, 15.0);
        for _ in 0..10 {
            model.apply(&frame(80)).unwrap();
        }
        let mut last = 0;
        for _ in 0..60 {
            last = foreground_count(&model.apply(&frame(200)).unwrap());
        }
        assert_eq!(last, 0, "new static scene should be learned as background");
    }

    #[test]
    fn dimension_change_is_rejected() {
        let mut model = BackgroundModel::new(100, 15.0);
        model.apply(&frame(10)).unwrap();
        let err = model.apply(&GrayImage::new(8, 8)).unwrap_err();
        assert!(matches!(err, DetectError::DimensionMismatch { .. }));
    }
}
