//! Per-pixel sub-sample generation: square grid and Poisson-disc variants.
//!
//! Grounded on `sampler.go`. The square sampler is pure and deterministic;
//! the disc sampler needs randomness for its dart-throwing disc cache and
//! per-pixel disc pick, so it takes an explicit seed (derived by the caller
//! from the model's content, per the design note on reproducibility)
//! instead of reaching for thread-local randomness.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geometry::Vector2;

/// One sub-pixel sample point with its blend weight.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Sample {
    pub uv: Vector2,
    pub influence: f64,
}

pub type SampleList = Vec<Sample>;

/// A `width x height` grid of per-pixel sample lists.
#[derive(Debug, Clone)]
pub struct Samples {
    width: usize,
    height: usize,
    data: Vec<SampleList>,
}

impl Samples {
    fn new(width: usize, height: usize) -> Self {
        Samples { width, height, data: vec![SampleList::new(); width * height] }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn at(&self, x: usize, y: usize) -> &SampleList {
        &self.data[y * self.width + x]
    }

    fn at_mut(&mut self, x: usize, y: usize) -> &mut SampleList {
        &mut self.data[y * self.width + x]
    }
}

/// A regular `accuracy x accuracy` sub-grid per pixel, expanded by
/// `1+overlap` so neighbouring pixels share samples, with a quadratic
/// falloff from the pixel centre.
pub fn square(width: usize, height: usize, accuracy: usize, overlap: f64, falloff: f64) -> Samples {
    let f_accuracy = accuracy as f64;
    let centre = Vector2::new(0.5, 0.5);
    let mut result = Samples::new(width, height);

    for i in 0..width {
        for j in 0..height {
            let mut list = SampleList::with_capacity(accuracy * accuracy);
            for k in 0..accuracy {
                let fraction_k = (1.0 + k as f64) / (1.0 + f_accuracy);
                for l in 0..accuracy {
                    let fraction_l = (1.0 + l as f64) / (1.0 + f_accuracy);
                    let fraction = Vector2::new(fraction_k, fraction_l);

                    let uv = Vector2::new(
                        (i as f64 * accuracy as f64 + (fraction_k * (1.0 + overlap)) * f_accuracy)
                            / (width as f64 * f_accuracy),
                        (j as f64 * accuracy as f64 + (fraction_l * (1.0 + overlap)) * f_accuracy)
                            / (height as f64 * f_accuracy),
                    );

                    let influence = (1.0 - centre.distance_squared(fraction).powf(falloff) * 2.0).max(0.0);
                    list.push(Sample { uv, influence });
                }
            }
            *result.at_mut(i, j) = list;
        }
    }

    result
}

const DISCS: usize = 10;

/// Poisson-disc sampler with a small cache of pre-generated dart-thrown
/// discs, one picked uniformly per pixel to amortise generation cost.
pub struct DiscSampler {
    rng: StdRng,
    cache: Vec<Option<Vec<Vector2>>>,
}

impl DiscSampler {
    pub fn new(seed: u64) -> Self {
        DiscSampler { rng: StdRng::seed_from_u64(seed), cache: vec![None; DISCS] }
    }

    pub fn generate(&mut self, width: usize, height: usize, accuracy: usize, overlap: f64, falloff: f64) -> Samples {
        let radius_squared = (0.5 + overlap) * (0.5 + overlap);
        let scale = Vector2::new(width as f64, height as f64);
        let mut result = Samples::new(width, height);

        let influence = (1.0 - radius_squared.powf(falloff)).max(0.0);

        for i in 0..width {
            for j in 0..height {
                let loc = Vector2::new(i as f64 / scale.x, j as f64 / scale.y);
                let disc_index = self.rng.gen_range(0..DISCS);
                if self.cache[disc_index].is_none() {
                    self.cache[disc_index] = Some(self.throw_disc(accuracy, overlap));
                }
                let disc = self.cache[disc_index].as_ref().unwrap();

                let mut list = SampleList::with_capacity(disc.len());
                for &s in disc {
                    let uv = loc.add(Vector2::new(s.x / scale.x, s.y / scale.y));
                    list.push(Sample { uv, influence });
                }
                *result.at_mut(i, j) = list;
            }
        }

        result
    }

    fn throw_disc(&mut self, accuracy: usize, overlap: f64) -> Vec<Vector2> {
        let num_samples = accuracy * accuracy;
        let distance = {
            let d = 1.0 / accuracy as f64;
            d * d
        };
        let radius = 0.5 + overlap;

        let mut disc: Vec<Vector2> = Vec::with_capacity(num_samples);
        for _ in 0..num_samples * 1000 {
            let trial = Vector2::new(
                (self.rng.gen::<f64>() - 0.5) * 2.0 * radius,
                (self.rng.gen::<f64>() - 0.5) * 2.0 * radius,
            );
            let mut valid = trial.length_squared() <= radius * radius;
            if valid {
                for existing in &disc {
                    if trial.distance_squared(*existing) < distance {
                        valid = false;
                        break;
                    }
                }
            }
            if valid {
                disc.push(trial);
                if disc.len() >= num_samples {
                    break;
                }
            }
        }
        disc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_sampler_produces_accuracy_squared_samples_per_pixel() {
        let samples = square(4, 4, 2, 0.0, 1.0);
        assert_eq!(samples.at(0, 0).len(), 4);
        assert_eq!(samples.width(), 4);
        assert_eq!(samples.height(), 4);
    }

    #[test]
    fn square_sampler_uv_stays_within_unit_range_without_overlap() {
        let samples = square(8, 8, 3, 0.0, 1.0);
        for s in samples.at(7, 7) {
            assert!(s.uv.x <= 1.01 && s.uv.y <= 1.01);
        }
    }

    #[test]
    fn disc_sampler_is_deterministic_given_a_seed() {
        let mut a = DiscSampler::new(42);
        let mut b = DiscSampler::new(42);
        let sa = a.generate(4, 4, 2, 0.1, 1.0);
        let sb = b.generate(4, 4, 2, 0.1, 1.0);
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(sa.at(x, y).len(), sb.at(x, y).len());
                for (p, q) in sa.at(x, y).iter().zip(sb.at(x, y).iter()) {
                    assert_eq!(p.uv, q.uv);
                }
            }
        }
    }

    #[test]
    fn disc_sampler_never_exceeds_accuracy_squared_points() {
        let mut sampler = DiscSampler::new(7);
        let samples = sampler.generate(2, 2, 3, 0.0, 1.0);
        for y in 0..2 {
            for x in 0..2 {
                assert!(samples.at(x, y).len() <= 9);
            }
        }
    }
}
