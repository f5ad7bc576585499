//! Localization: motion model, contact measurement model and the
//! particle filter tying them together.

mod contact_model;
mod motion_model;
mod particle_filter;

pub use contact_model::{ContactModel, ContactModelConfig};
pub use motion_model::{MotionModel, MotionNoise};
pub use particle_filter::{Centroid, Particle, ParticleFilter};
