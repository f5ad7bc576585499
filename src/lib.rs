//! BhumiSLAM - embodied particle-filter SLAM with multi-level surface maps
//!
//! Estimates the planar pose and height of a legged or wheeled robot
//! from proprioceptive foot contacts and a planar laser scanner, while
//! building a multi-level elevation map of the terrain per particle.
//!
//! # Architecture
//!
//! The crate is organized into 3 logical layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │        (pose estimator, embodied SLAM loop)         │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  algorithms/                        │  ← Core algorithms
//! │            (localization, surface mapping)          │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │             (types, frames, math)                   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Pipeline
//!
//! Each tick runs `project → update → map → resample`:
//!
//! 1. The odometry collaborator supplies a planar pose delta; every
//!    particle is projected through the motion model.
//! 2. Once the pose delta passes the measurement threshold, the contact
//!    model scores each particle against its map and refines its height
//!    belief.
//! 3. Once the pose delta passes the mapping threshold, the projected
//!    scan is merged into the per-particle (or shared) maps.
//! 4. When particle diversity collapses, low-variance resampling
//!    replaces the population; duplicated particles share their maps
//!    until the first write.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Algorithms (depends on core)
// ============================================================================
pub mod algorithms;

// ============================================================================
// Layer 3: Engine (depends on core, algorithms)
// ============================================================================
pub mod engine;

pub mod config;
pub mod error;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use crate::core::frames::{Environment, FrameId};
pub use crate::core::math;
pub use crate::core::types::{
    BodyContactState, ContactPoint, LaserScan, Point2D, Pose2D, TransformWithUncertainty,
};

// Configuration
pub use config::{FilterConfig, UpdateThreshold};

// Algorithms - Mapping
pub use algorithms::mapping::{
    CellIndex, MlsGrid, MlsGridConfig, MlsMap, ScanIntegrator, ScanIntegratorConfig, SurfacePatch,
};

// Algorithms - Localization
pub use algorithms::localization::{
    Centroid, ContactModel, ContactModelConfig, MotionModel, MotionNoise, Particle, ParticleFilter,
};

// Engine
pub use engine::{EmbodiedSlamFilter, OdometryProvider, PoseEstimator, ScanProjector};

// Errors
pub use error::{Result, SlamError};
