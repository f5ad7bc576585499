//! Embodied SLAM filter orchestration.
//!
//! Ties odometry, the pose estimator and the mapping engine into one
//! ticking loop. Every tick advances the accumulated odometry pose and
//! projects the particles; a proprioceptive measurement runs once the
//! pose has moved past the measurement threshold, and scan mapping runs
//! once it has moved past the mapping threshold.

use nalgebra::{Isometry3, Translation3, UnitQuaternion};

use crate::algorithms::localization::{Centroid, Particle};
use crate::algorithms::mapping::{MlsGrid, MlsMap, ScanIntegrator, SurfacePatch};
use crate::config::FilterConfig;
use crate::core::frames::{Environment, FrameId};
use crate::core::math::remove_yaw;
use crate::core::types::{BodyContactState, LaserScan, Pose2D, TransformWithUncertainty};
use crate::error::{Result, SlamError};

use super::pose_estimator::PoseEstimator;

/// Yaw deviation assumed for the laser mounting transform.
const LASER_ANGLE_SIGMA: f32 = 5.0 * std::f32::consts::PI / 180.0;

/// Pitch and roll deviation assumed for the attitude estimate.
const PITCH_ROLL_SIGMA: f32 = 3.0 * std::f32::consts::PI / 180.0;

/// Half extent, in cells around the grid centre, of the flat prior
/// seeded into the map template.
const PRIOR_HALF_EXTENT: i32 = 20;

/// Deviation of the seeded prior patches. Loose enough that the first
/// real contact measurement dominates the merge.
const PRIOR_SIGMA: f32 = 1.0;

/// Reference poses start far away so the first tick always triggers
/// both the measurement and the mapping path.
const FAR_AWAY: f32 = 1000.0;

/// Provider of planar odometry deltas from body state samples.
pub trait OdometryProvider {
    /// Feed the next body state sample.
    fn update(&mut self, contact: &BodyContactState, orientation: &UnitQuaternion<f32>);

    /// Pose delta accumulated since the previous sample.
    fn pose_delta(&self) -> Pose2D;
}

/// Projects a laser scan into an MLS grid in the scanner frame.
///
/// The collaborator receives the mounting transform and the attitude
/// with diagonal uncertainties (see
/// [`TransformWithUncertainty`] for the axis ordering) and fills the
/// provided scan grid with uncertainty-tagged surface patches.
pub trait ScanProjector {
    /// Project `scan` into `scan_grid`.
    fn project_scan(
        &mut self,
        scan: &LaserScan,
        body2world: &TransformWithUncertainty,
        laser2body: &TransformWithUncertainty,
        scan_grid: &mut MlsGrid,
    ) -> Result<()>;
}

/// Particle-filter SLAM with per-particle elevation maps.
#[derive(Debug)]
pub struct EmbodiedSlamFilter<O, P> {
    config: FilterConfig,
    env: Environment,
    odometry: O,
    projector: P,
    laser2body: Isometry3<f32>,
    estimator: PoseEstimator,
    integrator: ScanIntegrator,
    scan_frame: Option<FrameId>,
    scan_grid: Option<MlsGrid>,
    od_pose: Pose2D,
    ud_pose: Pose2D,
    map_pose: Pose2D,
}

impl<O: OdometryProvider, P: ScanProjector> EmbodiedSlamFilter<O, P> {
    /// Create a filter over an environment.
    ///
    /// `laser2body` is the static mounting transform of the scanner.
    pub fn new(
        config: FilterConfig,
        env: Environment,
        odometry: O,
        projector: P,
        laser2body: Isometry3<f32>,
    ) -> Self {
        let estimator = PoseEstimator::new(&config);
        let integrator = ScanIntegrator::new(config.mapping);
        Self {
            config,
            env,
            odometry,
            projector,
            laser2body,
            estimator,
            integrator,
            scan_frame: None,
            scan_grid: None,
            od_pose: Pose2D::identity(),
            ud_pose: Pose2D::identity(),
            map_pose: Pose2D::identity(),
        }
    }

    /// Initialize the filter at a pose and height.
    ///
    /// With `use_shared_map` all particles score and map against one
    /// shared map. Requesting a shared map while the environment
    /// already holds an MLS grid is not supported.
    pub fn init(&mut self, pose: &Pose2D, z: f32, use_shared_map: bool) -> Result<()> {
        if use_shared_map && self.env.mls_grid_count() > 0 {
            return Err(SlamError::UnsupportedConfiguration("feature broken"));
        }

        self.estimator.init(
            self.config.particle_count,
            pose,
            self.config.initial_error,
            z,
            self.config.initial_error,
        );

        let template = self.create_map_template(pose);
        self.estimator.set_environment(template, use_shared_map);

        // scan frame with the scan grid centred under it
        let world = self.env.world();
        let scan_frame = self.env.add_frame(world, pose.to_isometry(0.0));
        let (cx, cy) = self.config.grid.center_offset();
        let grid_frame = self
            .env
            .add_frame(scan_frame, Isometry3::from(Translation3::new(-cx, -cy, 0.0)));
        self.env.register_grid();
        self.scan_grid = Some(MlsGrid::new(self.config.grid, grid_frame));
        self.scan_frame = Some(scan_frame);

        self.od_pose = *pose;
        self.ud_pose = Pose2D::new(FAR_AWAY, 0.0, 0.0);
        self.map_pose = Pose2D::new(FAR_AWAY, 0.0, 0.0);
        log::info!(
            "initialized {} particles at ({:.2}, {:.2}, {:.2})",
            self.config.particle_count,
            pose.x,
            pose.y,
            pose.theta
        );
        Ok(())
    }

    /// Map template centred on the start pose, seeded with a flat prior
    /// surface at height zero so the first contact measurements have
    /// something to score against.
    fn create_map_template(&mut self, pose: &Pose2D) -> MlsMap {
        let world = self.env.world();
        let (cx, cy) = self.config.grid.center_offset();
        let mut map = MlsMap::new(
            &mut self.env,
            world,
            self.config.grid,
            Isometry3::from(Translation3::new(pose.x - cx, pose.y - cy, 0.0)),
        );

        let grid = map.active_grid_mut();
        let center_m = grid.config().width() as i32 / 2;
        let center_n = grid.config().height() as i32 / 2;
        let thickness = grid.config().horizontal_thickness;
        for dm in -PRIOR_HALF_EXTENT..PRIOR_HALF_EXTENT {
            for dn in -PRIOR_HALF_EXTENT..PRIOR_HALF_EXTENT {
                grid.insert(
                    (center_m + dm) as usize,
                    (center_n + dn) as usize,
                    SurfacePatch::horizontal(0.0, PRIOR_SIGMA, thickness),
                );
            }
        }
        map
    }

    /// Proprioceptive tick.
    ///
    /// Advances the odometry pose, projects the particles and, once the
    /// pose delta since the last measurement exceeds the measurement
    /// threshold, runs the contact measurement. Returns whether a
    /// measurement ran.
    pub fn update(
        &mut self,
        contact: &BodyContactState,
        orientation: &UnitQuaternion<f32>,
    ) -> bool {
        let delta = self.odometry.pose_delta();
        self.od_pose = self.od_pose.compose(&delta);
        self.odometry.update(contact, orientation);
        self.estimator.project(&delta);

        let moved = self.od_pose.delta_from(&self.ud_pose);
        if self.config.measurement_threshold.exceeded_by(&moved) {
            self.estimator.update(&self.env, contact, orientation);
            self.ud_pose = self.od_pose;
            true
        } else {
            false
        }
    }

    /// Proprioceptive tick plus scan mapping.
    ///
    /// Runs [`EmbodiedSlamFilter::update`] first; when the pose delta
    /// since the last mapping exceeds the mapping threshold, the scan is
    /// projected and merged into the per-particle (or shared) maps.
    pub fn update_with_scan(
        &mut self,
        contact: &BodyContactState,
        orientation: &UnitQuaternion<f32>,
        scan: &LaserScan,
    ) -> Result<bool> {
        let measured = self.update(contact, orientation);

        let moved = self.od_pose.delta_from(&self.map_pose);
        if self.config.mapping_threshold.exceeded_by(&moved) {
            let scan_frame = self.scan_frame.ok_or(SlamError::NotInitialized)?;
            let scan_grid = self.scan_grid.as_mut().ok_or(SlamError::NotInitialized)?;

            let laser2body = TransformWithUncertainty::exact(self.laser2body)
                .with_rotation_sigma(LASER_ANGLE_SIGMA, 0.0, 0.0);
            let attitude = Isometry3::from_parts(
                Translation3::identity(),
                remove_yaw(orientation),
            );
            let body2world = TransformWithUncertainty::exact(attitude).with_rotation_sigma(
                0.0,
                PITCH_ROLL_SIGMA,
                PITCH_ROLL_SIGMA,
            );

            scan_grid.clear();
            self.projector
                .project_scan(scan, &body2world, &laser2body, scan_grid)?;

            if self.estimator.shared_map().is_some() {
                let centroid = self.estimator.centroid();
                let map = self
                    .estimator
                    .shared_map_mut()
                    .expect("shared map checked above");
                self.integrator
                    .integrate_shared(&mut self.env, map, scan_grid, scan_frame, &centroid);
            } else {
                self.integrator.integrate_particles(
                    &mut self.env,
                    self.estimator.particles_mut(),
                    scan_grid,
                    scan_frame,
                );
            }
            self.map_pose = self.od_pose;
        }
        Ok(measured)
    }

    /// Current particles.
    pub fn particles(&self) -> &[Particle] {
        self.estimator.particles()
    }

    /// Weighted population mean.
    pub fn centroid(&self) -> Centroid {
        self.estimator.centroid()
    }

    /// Accumulated odometry pose.
    pub fn odometry_pose(&self) -> Pose2D {
        self.od_pose
    }

    /// The environment holding the frame tree.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// The shared map when running in shared-map mode.
    pub fn shared_map(&self) -> Option<&MlsMap> {
        self.estimator.shared_map()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ContactPoint;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    /// Odometry mock replaying a fixed per-tick delta.
    struct ScriptedOdometry {
        delta: Pose2D,
    }

    impl OdometryProvider for ScriptedOdometry {
        fn update(&mut self, _contact: &BodyContactState, _orientation: &UnitQuaternion<f32>) {}

        fn pose_delta(&self) -> Pose2D {
            self.delta
        }
    }

    /// Projector mock writing one patch ahead of the scanner.
    struct SinglePatchProjector {
        invocations: usize,
    }

    impl SinglePatchProjector {
        /// Body-frame position of the cell centre the mock writes into.
        fn patch_offset(scan_grid: &MlsGrid) -> (f32, f32) {
            let (cx, cy) = scan_grid.config().center_offset();
            let (m, n) = scan_grid.to_grid(cx + 1.0, cy).unwrap();
            let (x, y) = scan_grid.from_grid(m, n);
            (x - cx, y - cy)
        }
    }

    impl ScanProjector for SinglePatchProjector {
        fn project_scan(
            &mut self,
            _scan: &LaserScan,
            _body2world: &TransformWithUncertainty,
            _laser2body: &TransformWithUncertainty,
            scan_grid: &mut MlsGrid,
        ) -> Result<()> {
            self.invocations += 1;
            let (cx, cy) = scan_grid.config().center_offset();
            if let Some((m, n)) = scan_grid.to_grid(cx + 1.0, cy) {
                scan_grid.update(m, n, SurfacePatch::horizontal(-0.5, 0.02, 0.1));
            }
            Ok(())
        }
    }

    fn contacts() -> BodyContactState {
        BodyContactState::new(vec![
            ContactPoint::new(Point3::new(0.2, 0.15, -0.5), 0),
            ContactPoint::new(Point3::new(0.2, -0.15, -0.5), 1),
            ContactPoint::new(Point3::new(-0.2, 0.15, -0.5), 2),
            ContactPoint::new(Point3::new(-0.2, -0.15, -0.5), 3),
        ])
    }

    fn small_filter(
        delta: Pose2D,
    ) -> EmbodiedSlamFilter<ScriptedOdometry, SinglePatchProjector> {
        let config = FilterConfig {
            particle_count: 20,
            min_effective: 3,
            initial_error: 0.01,
            ..Default::default()
        };
        EmbodiedSlamFilter::new(
            config,
            Environment::new(),
            ScriptedOdometry { delta },
            SinglePatchProjector { invocations: 0 },
            Isometry3::identity(),
        )
    }

    fn scan() -> LaserScan {
        LaserScan::new(-1.0, 0.1, 0.1, 8.0, vec![2.0; 21])
    }

    #[test]
    fn test_first_tick_measures() {
        let mut filter = small_filter(Pose2D::new(0.01, 0.0, 0.0));
        filter.init(&Pose2D::identity(), 0.5, false).unwrap();

        // reference poses start far away: the very first tick measures
        assert!(filter.update(&contacts(), &UnitQuaternion::identity()));
        // after that, a centimeter step stays below the 0.1 m threshold
        assert!(!filter.update(&contacts(), &UnitQuaternion::identity()));
    }

    #[test]
    fn test_measurement_interval_follows_threshold() {
        let mut filter = small_filter(Pose2D::new(0.06, 0.0, 0.0));
        filter.init(&Pose2D::identity(), 0.5, false).unwrap();

        let mut measured = Vec::new();
        for _ in 0..7 {
            measured.push(filter.update(&contacts(), &UnitQuaternion::identity()));
        }
        // 6 cm per tick against a 10 cm threshold: first tick (sentinel),
        // then every second tick once the accumulated delta passes 0.1
        assert_eq!(measured, vec![true, false, true, false, true, false, true]);
    }

    #[test]
    fn test_odometry_pose_accumulates() {
        let mut filter = small_filter(Pose2D::new(0.1, 0.0, 0.0));
        filter.init(&Pose2D::identity(), 0.5, false).unwrap();

        for _ in 0..5 {
            filter.update(&contacts(), &UnitQuaternion::identity());
        }
        assert_relative_eq!(filter.odometry_pose().x, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_shared_map_init_on_used_environment_is_rejected() {
        let mut env = Environment::new();
        let world = env.world();
        // a previous tenant left an MLS grid in the environment
        let _existing = MlsMap::new(
            &mut env,
            world,
            crate::algorithms::mapping::MlsGridConfig::default(),
            Isometry3::identity(),
        );

        let config = FilterConfig {
            particle_count: 10,
            ..Default::default()
        };
        let mut filter = EmbodiedSlamFilter::new(
            config,
            env,
            ScriptedOdometry {
                delta: Pose2D::identity(),
            },
            SinglePatchProjector { invocations: 0 },
            Isometry3::identity(),
        );

        let result = filter.init(&Pose2D::identity(), 0.0, true);
        match result {
            Err(SlamError::UnsupportedConfiguration(message)) => {
                assert_eq!(message, "feature broken")
            }
            other => panic!("expected unsupported configuration, got {other:?}"),
        }
    }

    #[test]
    fn test_shared_map_init_on_fresh_environment() {
        let mut filter = small_filter(Pose2D::identity());
        filter.init(&Pose2D::identity(), 0.5, true).unwrap();
        assert!(filter.shared_map().is_some());
        assert!(filter.particles().iter().all(|p| p.map.is_none()));
    }

    #[test]
    fn test_scan_tick_maps_into_particle_maps() {
        let mut filter = small_filter(Pose2D::new(0.05, 0.0, 0.0));
        filter.init(&Pose2D::identity(), 0.5, false).unwrap();

        filter
            .update_with_scan(&contacts(), &UnitQuaternion::identity(), &scan())
            .unwrap();

        // scan saw the ground 0.5 m below the body, ~1 m ahead: with the
        // particles near z = 0.5 the surface lands near height 0
        let particle = &filter.particles()[0];
        let map = particle.map.as_ref().unwrap();
        let (dx, dy) = SinglePatchProjector::patch_offset(filter.scan_grid.as_ref().unwrap());
        let query = particle.pose.transform_point(&crate::core::types::Point2D::new(dx, dy));
        let hit = map
            .get_patch(
                filter.environment(),
                &Point3::new(query.x, query.y, 0.0),
                0.2,
                3.0,
            )
            .expect("expected a mapped patch ahead of the robot");
        assert!(hit.mean.abs() < 0.1, "surface near height 0, got {}", hit.mean);
    }

    #[test]
    fn test_mapping_respects_threshold() {
        // sub-threshold motion: the first scan maps (sentinel), the
        // following ones do not
        let mut filter = small_filter(Pose2D::new(0.005, 0.0, 0.0));
        filter.init(&Pose2D::identity(), 0.5, false).unwrap();

        for _ in 0..3 {
            filter
                .update_with_scan(&contacts(), &UnitQuaternion::identity(), &scan())
                .unwrap();
        }
        assert_eq!(filter.projector.invocations, 1);
    }

    #[test]
    fn test_shared_map_scan_tick() {
        let mut filter = small_filter(Pose2D::new(0.05, 0.0, 0.0));
        filter.init(&Pose2D::identity(), 0.5, true).unwrap();

        filter
            .update_with_scan(&contacts(), &UnitQuaternion::identity(), &scan())
            .unwrap();

        let (dx, dy) = SinglePatchProjector::patch_offset(filter.scan_grid.as_ref().unwrap());
        let centroid = filter.centroid();
        let query = centroid
            .pose
            .transform_point(&crate::core::types::Point2D::new(dx, dy));
        let shared = filter.shared_map().unwrap();
        let hit = shared.get_patch(
            filter.environment(),
            &Point3::new(query.x, query.y, 0.0),
            0.2,
            3.0,
        );
        assert!(hit.is_some(), "shared map should hold the projected patch");
    }
}
