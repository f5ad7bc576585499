//! Particle filter over planar pose hypotheses with height beliefs.
//!
//! Each particle carries a planar pose, a Gaussian belief over the
//! vertical position and a reference to its own map realization.
//! Projection applies odometry with sampled noise, the update step
//! reweights particles through a caller-supplied likelihood and
//! low-variance resampling kicks in when the effective sample size
//! collapses.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::algorithms::mapping::MlsMap;
use crate::core::types::Pose2D;

use super::motion_model::MotionNoise;

/// A single pose hypothesis.
#[derive(Debug, Clone)]
pub struct Particle {
    /// Hypothesized planar pose.
    pub pose: Pose2D,
    /// Mean of the height belief in meters.
    pub z: f32,
    /// Deviation of the height belief.
    pub sigma_z: f32,
    /// Importance weight. Normalized to sum 1 after every update.
    pub weight: f64,
    /// This particle's map realization. `None` when the filter runs
    /// against a single shared map.
    pub map: Option<MlsMap>,
}

/// Weighted population statistics of the particle set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    /// Weighted planar pose (circular mean on the heading).
    pub pose: Pose2D,
    /// Inverse-variance-weighted height.
    pub z: f32,
    /// Deviation of the combined height belief.
    pub sigma_z: f32,
}

/// Particle filter with a seeded, owned random source.
///
/// All stochastic operations draw from the internal generator, so runs
/// with the same seed and input sequence reproduce bitwise.
#[derive(Debug)]
pub struct ParticleFilter {
    particles: Vec<Particle>,
    rng: StdRng,
    min_effective: usize,
}

impl ParticleFilter {
    /// Create an empty filter.
    pub fn new(seed: u64, min_effective: usize) -> Self {
        Self {
            particles: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            min_effective,
        }
    }

    /// Initialize the population around a pose.
    ///
    /// Particles are spread with deviation `spread` on x, y and heading;
    /// every particle starts with the same height belief, uniform weight
    /// and no map.
    pub fn init(&mut self, count: usize, pose: &Pose2D, spread: f32, z: f32, sigma_z: f32) {
        let weight = 1.0 / count as f64;
        self.particles = (0..count)
            .map(|_| {
                let nx: f32 = self.rng.sample(StandardNormal);
                let ny: f32 = self.rng.sample(StandardNormal);
                let nt: f32 = self.rng.sample(StandardNormal);
                Particle {
                    pose: Pose2D::new(
                        pose.x + nx * spread,
                        pose.y + ny * spread,
                        pose.theta + nt * spread,
                    ),
                    z,
                    sigma_z,
                    weight,
                    map: None,
                }
            })
            .collect();
    }

    /// Current particles.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable access to the particles.
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// Whether the filter holds no particles.
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Projection step: apply an odometry delta with sampled noise.
    ///
    /// The height belief widens by the noise's `sigma_z`; weights are
    /// untouched.
    pub fn project(&mut self, delta: &Pose2D, noise: &MotionNoise) {
        for particle in &mut self.particles {
            let noisy = noise.perturb(delta, &mut self.rng);
            particle.pose = particle.pose.compose(&noisy);
            particle.sigma_z =
                (particle.sigma_z * particle.sigma_z + noise.sigma_z * noise.sigma_z).sqrt();
        }
    }

    /// Measurement step: reweight every particle through `likelihood`.
    ///
    /// Weights are multiplied by the returned factor and renormalized.
    /// If the effective sample size falls below the configured minimum
    /// the population is resampled. Returns whether resampling happened.
    pub fn update<F>(&mut self, mut likelihood: F) -> bool
    where
        F: FnMut(&mut Particle) -> f64,
    {
        for particle in &mut self.particles {
            let factor = likelihood(particle);
            particle.weight *= factor;
        }
        self.normalize();

        if self.effective_sample_size() < self.min_effective as f64 {
            log::debug!(
                "effective sample size below {} of {} particles, resampling",
                self.min_effective,
                self.particles.len()
            );
            self.resample();
            true
        } else {
            false
        }
    }

    /// Effective sample size `1 / Σ wᵢ²` of the current weights.
    pub fn effective_sample_size(&self) -> f64 {
        let sum_sq: f64 = self.particles.iter().map(|p| p.weight * p.weight).sum();
        if sum_sq > 0.0 {
            1.0 / sum_sq
        } else {
            0.0
        }
    }

    fn normalize(&mut self) {
        let sum: f64 = self.particles.iter().map(|p| p.weight).sum();
        if sum > 0.0 && sum.is_finite() {
            for particle in &mut self.particles {
                particle.weight /= sum;
            }
        } else {
            log::warn!("all particle weights vanished, resetting to uniform");
            let weight = 1.0 / self.particles.len() as f64;
            for particle in &mut self.particles {
                particle.weight = weight;
            }
        }
    }

    /// Low-variance (systematic) resampling.
    ///
    /// A single uniform draw `u₀ ∈ [0, 1/N)` positions N equally spaced
    /// pointers over the cumulative weights. Survivors keep their state
    /// and share their map reference; all weights become `1/N`.
    pub fn resample(&mut self) {
        let n = self.particles.len();
        if n == 0 {
            return;
        }

        let total: f64 = self.particles.iter().map(|p| p.weight).sum();
        let mut cumulative = Vec::with_capacity(n);
        if total > 0.0 && total.is_finite() {
            let mut sum = 0.0;
            for particle in &self.particles {
                sum += particle.weight / total;
                cumulative.push(sum);
            }
        } else {
            for i in 0..n {
                cumulative.push((i + 1) as f64 / n as f64);
            }
        }

        let step = 1.0 / n as f64;
        let mut position = self.rng.gen::<f64>() * step;
        let mut index = 0;
        let mut survivors = Vec::with_capacity(n);
        for _ in 0..n {
            while position > cumulative[index] && index < n - 1 {
                index += 1;
            }
            let mut particle = self.particles[index].clone();
            particle.weight = step;
            survivors.push(particle);
            position += step;
        }
        self.particles = survivors;
    }

    /// Weighted population mean.
    ///
    /// Heading uses the circular mean; the height combines the particle
    /// beliefs with inverse-variance weighting.
    pub fn centroid(&self) -> Centroid {
        let mut sum_x = 0.0f64;
        let mut sum_y = 0.0f64;
        let mut sum_sin = 0.0f64;
        let mut sum_cos = 0.0f64;
        let mut sum_w = 0.0f64;
        let mut z_info = 0.0f64;
        let mut z_weighted = 0.0f64;

        for particle in &self.particles {
            let w = particle.weight;
            sum_x += w * particle.pose.x as f64;
            sum_y += w * particle.pose.y as f64;
            sum_sin += w * (particle.pose.theta as f64).sin();
            sum_cos += w * (particle.pose.theta as f64).cos();
            sum_w += w;

            let var = (particle.sigma_z as f64 * particle.sigma_z as f64).max(1e-12);
            z_info += w / var;
            z_weighted += w * particle.z as f64 / var;
        }

        if sum_w <= 0.0 {
            return Centroid {
                pose: Pose2D::identity(),
                z: 0.0,
                sigma_z: 0.0,
            };
        }

        Centroid {
            pose: Pose2D::new(
                (sum_x / sum_w) as f32,
                (sum_y / sum_w) as f32,
                sum_sin.atan2(sum_cos) as f32,
            ),
            z: (z_weighted / z_info) as f32,
            sigma_z: ((sum_w / z_info) as f32).sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    fn uniform_filter(n: usize, seed: u64) -> ParticleFilter {
        let mut filter = ParticleFilter::new(seed, 50);
        filter.init(n, &Pose2D::identity(), 0.0, 0.0, 0.1);
        filter
    }

    #[test]
    fn test_init_population() {
        let mut filter = ParticleFilter::new(42, 50);
        filter.init(250, &Pose2D::new(1.0, 2.0, 0.3), 0.1, 0.5, 0.05);

        assert_eq!(filter.len(), 250);
        let sum: f64 = filter.particles().iter().map(|p| p.weight).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        for p in filter.particles() {
            assert_relative_eq!(p.z, 0.5);
            assert_relative_eq!(p.sigma_z, 0.05);
            assert!(p.map.is_none());
        }
    }

    #[test]
    fn test_project_without_noise_is_exact() {
        let mut filter = uniform_filter(10, 1);
        filter.project(&Pose2D::new(0.5, 0.0, 0.1), &MotionNoise::none());

        for p in filter.particles() {
            assert_relative_eq!(p.pose.x, 0.5, epsilon = 1e-6);
            assert_relative_eq!(p.pose.theta, 0.1, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_project_keeps_weights() {
        let mut filter = uniform_filter(10, 1);
        let before: Vec<f64> = filter.particles().iter().map(|p| p.weight).collect();
        filter.project(
            &Pose2D::new(0.1, 0.0, 0.0),
            &MotionNoise {
                sigma_x: 0.01,
                sigma_y: 0.01,
                sigma_theta: 0.01,
                sigma_z: 0.0,
            },
        );
        let after: Vec<f64> = filter.particles().iter().map(|p| p.weight).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_project_widens_height_belief() {
        let mut filter = uniform_filter(5, 1);
        let noise = MotionNoise {
            sigma_x: 0.0,
            sigma_y: 0.0,
            sigma_theta: 0.0,
            sigma_z: 0.1,
        };
        filter.project(&Pose2D::new(0.01, 0.0, 0.0), &noise);
        for p in filter.particles() {
            assert_relative_eq!(p.sigma_z, (0.01f32 + 0.01f32).sqrt(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_update_normalizes_weights() {
        let mut filter = uniform_filter(100, 3);
        filter.update(|p| (1.0 + p.pose.x as f64).max(0.1));

        let sum: f64 = filter.particles().iter().map(|p| p.weight).sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum = {sum}");
    }

    #[test]
    fn test_update_all_zero_resets_uniform() {
        let mut filter = uniform_filter(20, 3);
        filter.update(|_| 0.0);

        for p in filter.particles() {
            assert_relative_eq!(p.weight as f32, 1.0 / 20.0);
        }
    }

    #[test]
    fn test_collapsed_weights_trigger_resample() {
        let mut filter = uniform_filter(100, 9);
        let mut index = 0;
        let resampled = filter.update(|_| {
            index += 1;
            if index == 1 {
                1.0
            } else {
                1e-300
            }
        });

        assert!(resampled);
        assert_eq!(filter.len(), 100);
        let neff = filter.effective_sample_size();
        assert_relative_eq!(neff as f32, 100.0, epsilon = 1e-3);
        for p in filter.particles() {
            assert_relative_eq!(p.weight as f32, 0.01);
        }
    }

    #[test]
    fn test_balanced_weights_do_not_resample() {
        let mut filter = uniform_filter(100, 5);
        let resampled = filter.update(|_| 1.0);
        assert!(!resampled);
        assert_relative_eq!(filter.effective_sample_size() as f32, 100.0, epsilon = 1e-3);
    }

    #[test]
    fn test_resample_copies_existing_states() {
        let mut filter = uniform_filter(50, 11);
        for (i, p) in filter.particles_mut().iter_mut().enumerate() {
            p.pose = Pose2D::new(i as f32, 0.0, 0.0);
        }
        let before: Vec<f32> = filter.particles().iter().map(|p| p.pose.x).collect();
        filter.resample();

        for p in filter.particles() {
            assert!(before.contains(&p.pose.x));
        }
    }

    #[test]
    fn test_resample_follows_weights() {
        let mut filter = uniform_filter(100, 11);
        for (i, p) in filter.particles_mut().iter_mut().enumerate() {
            p.pose = Pose2D::new(i as f32, 0.0, 0.0);
            p.weight = if i == 7 { 1.0 } else { 0.0 };
        }
        filter.resample();

        for p in filter.particles() {
            assert_relative_eq!(p.pose.x, 7.0);
            assert_relative_eq!(p.weight as f32, 0.01);
        }
    }

    #[test]
    fn test_centroid_circular_mean() {
        let mut filter = uniform_filter(2, 1);
        filter.particles_mut()[0].pose = Pose2D::new(0.0, 0.0, PI - 0.1);
        filter.particles_mut()[1].pose = Pose2D::new(0.0, 0.0, -PI + 0.1);

        let centroid = filter.centroid();
        assert!(
            centroid.pose.theta.abs() > PI - 0.2,
            "wrap-around mean should stay near ±π, got {}",
            centroid.pose.theta
        );
    }

    #[test]
    fn test_centroid_inverse_variance_height() {
        let mut filter = uniform_filter(2, 1);
        {
            let particles = filter.particles_mut();
            particles[0].z = 0.0;
            particles[0].sigma_z = 0.01;
            particles[1].z = 1.0;
            particles[1].sigma_z = 1.0;
        }

        let centroid = filter.centroid();
        assert!(centroid.z < 0.01, "confident particle dominates: {}", centroid.z);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let run = || {
            let mut filter = uniform_filter(50, 42);
            let noise = MotionNoise {
                sigma_x: 0.01,
                sigma_y: 0.01,
                sigma_theta: 0.005,
                sigma_z: 0.01,
            };
            for _ in 0..20 {
                filter.project(&Pose2D::new(0.05, 0.0, 0.01), &noise);
                filter.update(|p| (-((p.pose.y as f64).powi(2))).exp());
            }
            filter
                .particles()
                .iter()
                .map(|p| (p.pose.x.to_bits(), p.pose.y.to_bits(), p.weight.to_bits()))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
