//! Pose estimator: particle population plus the proprioceptive
//! measurement pipeline.
//!
//! Glues the motion model, the contact model and the per-particle maps
//! together. Projection applies odometry deltas with motion noise; the
//! measurement step scores every particle's pose hypothesis against its
//! own map (or the shared map) through the contact model and folds the
//! contact residuals into the particle's height belief.

use nalgebra::UnitQuaternion;

use crate::algorithms::localization::{
    Centroid, ContactModel, MotionModel, Particle, ParticleFilter,
};
use crate::algorithms::mapping::MlsMap;
use crate::config::FilterConfig;
use crate::core::frames::Environment;
use crate::core::types::{BodyContactState, Pose2D};

/// Particle-filter pose estimator with contact measurements.
#[derive(Debug)]
pub struct PoseEstimator {
    filter: ParticleFilter,
    contact_model: ContactModel,
    motion_model: MotionModel,
    discount_factor: f64,
    sensor_sigma: f32,
    shared_map: Option<MlsMap>,
}

impl PoseEstimator {
    /// Create an estimator from the filter configuration.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            filter: ParticleFilter::new(config.seed, config.min_effective),
            contact_model: ContactModel::new(config.contact, config.measurement_error),
            motion_model: MotionModel::new(config.weighting_factor, config.z_process_sigma),
            discount_factor: config.discount_factor,
            sensor_sigma: config.measurement_error,
            shared_map: None,
        }
    }

    /// Initialize the particle population around a pose.
    pub fn init(&mut self, count: usize, pose: &Pose2D, spread: f32, z: f32, sigma_z: f32) {
        self.filter.init(count, pose, spread, z, sigma_z);
    }

    /// Attach the map template to the population.
    ///
    /// With `use_shared` every particle scores against the single shared
    /// map; otherwise each particle references its own (initially
    /// structurally shared) copy of the template.
    pub fn set_environment(&mut self, map_template: MlsMap, use_shared: bool) {
        if use_shared {
            for particle in self.filter.particles_mut() {
                particle.map = None;
            }
            self.shared_map = Some(map_template);
        } else {
            self.shared_map = None;
            for particle in self.filter.particles_mut() {
                particle.map = Some(map_template.clone());
            }
        }
    }

    /// Projection step: apply an odometry delta to every particle.
    pub fn project(&mut self, delta: &Pose2D) {
        let noise = self.motion_model.noise_for(delta);
        self.filter.project(delta, &noise);
    }

    /// Measurement step against the contact points of the current body
    /// state. Returns whether the filter resampled.
    ///
    /// Particles whose contact points find too few surface patches keep
    /// their weight; everyone else is reweighted by the contact
    /// likelihood of its pose and height hypothesis, and its height
    /// belief absorbs the measured residual.
    pub fn update(
        &mut self,
        env: &Environment,
        contact: &BodyContactState,
        orientation: &UnitQuaternion<f32>,
    ) -> bool {
        self.contact_model
            .set_contact_points(contact, orientation);

        // exponential forgetting of accumulated evidence
        let discount = self.discount_factor;
        if discount < 1.0 {
            for particle in self.filter.particles_mut() {
                particle.weight = particle.weight.powf(discount);
            }
        }

        let contact_model = &mut self.contact_model;
        let shared = self.shared_map.as_ref();
        let sensor_sigma = self.sensor_sigma;

        self.filter.update(|particle| {
            let body2world = particle.pose.to_isometry(particle.z);
            let pose_variance = particle.sigma_z * particle.sigma_z;
            let probe_sigma = (pose_variance + sensor_sigma * sensor_sigma).sqrt();

            let likelihood = {
                let Some(map) = particle.map.as_ref().or(shared) else {
                    return 1.0;
                };
                let threshold = contact_model.config().lookup_sigma_threshold;
                contact_model.evaluate_pose(&body2world, pose_variance, |point| {
                    map.get_patch(env, point, probe_sigma, threshold)
                })
            };

            match likelihood {
                Some(log_likelihood) => {
                    contact_model.update_z_estimate(&mut particle.z, &mut particle.sigma_z);
                    log_likelihood.exp()
                }
                None => 1.0,
            }
        })
    }

    /// Current particles.
    pub fn particles(&self) -> &[Particle] {
        self.filter.particles()
    }

    /// Mutable access to the particles (mapping engine).
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        self.filter.particles_mut()
    }

    /// Weighted population mean.
    pub fn centroid(&self) -> Centroid {
        self.filter.centroid()
    }

    /// The shared map, if the estimator runs in shared-map mode.
    pub fn shared_map(&self) -> Option<&MlsMap> {
        self.shared_map.as_ref()
    }

    /// Mutable access to the shared map (mapping engine).
    pub fn shared_map_mut(&mut self) -> Option<&mut MlsMap> {
        self.shared_map.as_mut()
    }
}
