use std::{
    collections::HashMap,
    fmt::{Display, Write},
    mem,
    time::{Duration, Instant},
};

use log::{debug, info, trace};
use nalgebra::zero;
use num_traits::Float;

use crate::{
    boundary_handler::{Boundary, BoundaryTrait},
    concurrency::WorkerPool,
    error::SimulationError,
    floating_type_mod::FT,
    fluid_forces::{calculate_all_particle_accels, calculate_all_particle_densities, estimate_cell_normals, FluidContext},
    neighborhood_search::CellGrid,
    simulation_parameters::{DomainBounds, SimulationParams},
    V2,
};

/// Fraction of the speed a particle keeps when it hits the outer domain edge.
const EDGE_RESTITUTION: FT = 0.1;

#[derive(Clone)]
struct Counter {
    total: Duration,
    num_samples: usize,
    last: Duration,
    last_start: Instant,
}

impl Counter {
    fn new() -> Self {
        Counter {
            total: Duration::ZERO,
            num_samples: 0,
            last: Duration::ZERO,
            last_start: Instant::now(),
        }
    }

    fn begin(&mut self) {
        self.last_start = Instant::now();
    }

    fn end(&mut self) {
        self.last = Instant::now() - self.last_start;
        self.total += self.last;
        self.num_samples += 1;
    }

    fn avg(&self) -> Duration {
        if self.num_samples == 0 {
            return Duration::ZERO;
        }
        self.total / self.num_samples as u32
    }
}

/// Named wall-clock timers, one sample per `begin`/`end` pair. Disabled counters record nothing.
pub struct PerformanceCounters {
    counters: HashMap<String, Counter>,
    enabled: bool,
}

impl PerformanceCounters {
    pub fn new(enabled: bool) -> PerformanceCounters {
        PerformanceCounters {
            counters: HashMap::default(),
            enabled,
        }
    }

    fn begin(&mut self, id: &str) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::new)
                .begin();
        }
    }

    fn end(&mut self, id: &str) {
        if let Some(counter) = self.counters.get_mut(id) {
            counter.end();
        }
    }

    fn last(&self, id: &str) -> Duration {
        self.counters.get(id).map(|c| c.last).unwrap_or(Duration::ZERO)
    }

    pub fn total(&self, id: &str) -> Duration {
        self.counters.get(id).map(|c| c.total).unwrap_or(Duration::ZERO)
    }

    pub fn num_samples(&self, id: &str) -> usize {
        self.counters.get(id).map(|c| c.num_samples).unwrap_or(0)
    }
}

macro_rules! decl_particle_vec {
    (pub struct $struct_name:ident { $(pub $field_name:ident: Vec<$field_type:ty> | $default_value:expr),*$(,)?  }) => {
        pub struct $struct_name {
            $(
                pub $field_name : Vec<$field_type>,
            )*
        }

        impl $struct_name {
            pub fn default(len: usize) -> Self {
                Self {
                    $(
                        $field_name: (0..len).map(|_| $default_value).collect::<Vec<$field_type>>(),
                    )*
                }
            }
        }
    }
}

decl_particle_vec! {
    pub struct ParticleVec {
        pub position: Vec<V2> | zero(),
        pub velocity: Vec<V2> | zero(),
        pub acceleration: Vec<V2> | zero(),
        pub density: Vec<FT> | 0.,

        // leapfrog scratch
        pub velocity_half: Vec<V2> | zero(),
        pub acceleration_next: Vec<V2> | zero(),
    }
}

impl ParticleVec {
    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }
}

/**
 * Weakly compressible SPH fluid in a rectangular domain.
 *
 * Owns the particle arrays, the cell grid and the worker pool. Every
 * evaluation rebuilds the grid from the positions being evaluated, then runs
 * the density pass, the per-cell surface normals and the acceleration pass.
 * Time integration is leapfrog (kick, drift, kick) with boundary collision
 * handling and a hard clamp to the domain rectangle after the drift.
 */
pub struct FluidSimulation {
    params: SimulationParams,
    particles: ParticleVec,

    grid: CellGrid,
    cell_normals: Vec<V2>,
    boundaries: Vec<Boundary>,
    pool: WorkerPool,

    time: FT,
    step_number: u64,

    pcounters: PerformanceCounters,
}

impl FluidSimulation {
    pub fn new(params: SimulationParams, counters_enabled: bool) -> Result<FluidSimulation, SimulationError> {
        params.validate()?;
        let positions = params.initial_positions()?;
        let pool = WorkerPool::new(params.worker_count())?;
        let grid = CellGrid::new(params.domain, params.h);

        let mut particles = ParticleVec::default(positions.len());
        particles.position = positions;

        info!(
            "fluid simulation with {} particles, grid {}x{} cells, {} workers",
            particles.len(),
            grid.cell_count_x(),
            grid.cell_count_y(),
            pool.num_workers()
        );

        let mut simulation = FluidSimulation {
            params,
            particles,
            cell_normals: vec![V2::zeros(); grid.num_cells()],
            grid,
            boundaries: Vec::new(),
            pool,
            time: 0.,
            step_number: 0,
            pcounters: PerformanceCounters::new(counters_enabled),
        };
        simulation.evaluate_accelerations(false)?;
        Ok(simulation)
    }

    /// Adds a boundary, moves it into the current domain and reevaluates the
    /// accelerations with the new occlusion.
    pub fn attach(&mut self, mut boundary: Boundary) -> Result<(), SimulationError> {
        boundary.update_coordinate_system(self.params.domain);
        self.boundaries.push(boundary);
        self.evaluate_accelerations(false)
    }

    /// Replaces the parameters and reinitializes every particle. Attached
    /// boundaries are kept and follow the new domain. On error the simulation
    /// is left untouched.
    pub fn reset(&mut self, params: SimulationParams) -> Result<(), SimulationError> {
        params.validate()?;
        let positions = params.initial_positions()?;
        if params.worker_count() != self.pool.num_workers() {
            self.pool = WorkerPool::new(params.worker_count())?;
        }

        self.params = params;
        self.particles = ParticleVec::default(positions.len());
        self.particles.position = positions;
        self.grid.reshape(params.domain, params.h);
        self.cell_normals = vec![V2::zeros(); self.grid.num_cells()];
        for boundary in &mut self.boundaries {
            boundary.update_coordinate_system(params.domain);
        }
        self.time = 0.;
        self.step_number = 0;

        info!(
            "simulation reset to {} particles, grid {}x{} cells",
            self.particles.len(),
            self.grid.cell_count_x(),
            self.grid.cell_count_y()
        );
        self.evaluate_accelerations(false)
    }

    /// Rebuilds the grid at the current positions and evaluates the
    /// accelerations, either from the full-step velocities into
    /// `acceleration` or from the half-step velocities into `acceleration_next`.
    fn evaluate_accelerations(&mut self, at_half_step: bool) -> Result<(), SimulationError> {
        let particles = &mut self.particles;

        self.pcounters.begin("indexing");
        self.grid.rebuild(&particles.position);
        self.pcounters.end("indexing");
        if self.grid.num_dropped() > 0 {
            debug!(
                "step {}: {} particles outside of the grid",
                self.step_number,
                self.grid.num_dropped()
            );
        }

        let ctx = FluidContext {
            params: &self.params,
            grid: &self.grid,
            boundaries: &self.boundaries,
        };

        self.pcounters.begin("density");
        calculate_all_particle_densities(&self.pool, &mut particles.density, &particles.position, ctx)?;
        self.pcounters.end("density");

        self.pcounters.begin("surface-normals");
        estimate_cell_normals(&self.pool, &mut self.cell_normals, ctx)?;
        self.pcounters.end("surface-normals");

        let (velocity, accel) = if at_half_step {
            (&particles.velocity_half, &mut particles.acceleration_next)
        } else {
            (&particles.velocity, &mut particles.acceleration)
        };
        self.pcounters.begin("acceleration");
        calculate_all_particle_accels(
            &self.pool,
            accel,
            &particles.position,
            velocity,
            &particles.density,
            &self.cell_normals,
            ctx,
        )?;
        self.pcounters.end("acceleration");

        Ok(())
    }

    pub fn single_step(&mut self) -> Result<(), SimulationError> {
        trace!("begin step {} time {}", self.step_number, self.time);
        self.pcounters.begin("simulation-step");

        let dt = self.params.dt;
        let domain = self.params.domain;
        let edge_margin = self.params.edge_margin;

        self.pcounters.begin("integration");
        {
            let particles = &mut self.particles;
            for i in 0..particles.len() {
                particles.velocity_half[i] = particles.velocity[i] + particles.acceleration[i] * (dt / 2.);
                let next_position = particles.position[i] + particles.velocity_half[i] * dt;

                let mut collided = false;
                for boundary in &self.boundaries {
                    collided |= boundary.resolve_collision(
                        i,
                        next_position,
                        &mut particles.position,
                        &mut particles.velocity_half,
                    );
                }
                if !collided {
                    particles.position[i] = next_position;
                }

                clamp_to_domain(
                    &mut particles.position[i],
                    &mut particles.velocity_half[i],
                    domain,
                    edge_margin,
                );
            }
        }
        self.pcounters.end("integration");

        self.evaluate_accelerations(true)?;

        let particles = &mut self.particles;
        for i in 0..particles.len() {
            particles.velocity[i] = particles.velocity_half[i] + particles.acceleration_next[i] * (dt / 2.);
        }
        mem::swap(&mut particles.acceleration, &mut particles.acceleration_next);

        self.time += dt;
        self.step_number += 1;

        self.pcounters.end("simulation-step");
        trace!(
            "one step duration: {:?}",
            self.pcounters.last("simulation-step")
        );
        Ok(())
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn domain(&self) -> DomainBounds {
        self.params.domain
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn positions(&self) -> &[V2] {
        &self.particles.position
    }

    pub fn velocities(&self) -> &[V2] {
        &self.particles.velocity
    }

    pub fn densities(&self) -> &[FT] {
        &self.particles.density
    }

    pub fn boundaries(&self) -> &[Boundary] {
        &self.boundaries
    }

    pub fn grid(&self) -> &CellGrid {
        &self.grid
    }

    pub fn time(&self) -> FT {
        self.time
    }

    pub fn step_number(&self) -> u64 {
        self.step_number
    }

    pub fn performance_counters(&self) -> &PerformanceCounters {
        &self.pcounters
    }
}

/// Puts a particle on or beyond an edge back inside and turns the offending velocity component inwards.
fn clamp_to_domain(position: &mut V2, velocity: &mut V2, domain: DomainBounds, margin: FT) {
    if position.x <= domain.left {
        position.x = domain.left + margin;
        velocity.x = velocity.x.abs() * EDGE_RESTITUTION;
    } else if position.x >= domain.right {
        position.x = domain.right - margin;
        velocity.x = -velocity.x.abs() * EDGE_RESTITUTION;
    }

    if position.y <= domain.bottom {
        position.y = domain.bottom + margin;
        velocity.y = velocity.y.abs() * EDGE_RESTITUTION;
    } else if position.y >= domain.top {
        position.y = domain.top - margin;
        velocity.y = -velocity.y.abs() * EDGE_RESTITUTION;
    }
}

pub fn is_ft_approx_eq<FT: Float>(a: FT, b: FT, tolerance: FT) -> bool {
    assert!(!a.is_nan());
    assert!(!b.is_nan());
    b <= a + tolerance && b >= a - tolerance
}

pub fn assert_ft_approx_eq<FT: Float + Display>(a: FT, b: FT, tolerance: FT, s: impl FnOnce() -> String) {
    if !is_ft_approx_eq(a, b, tolerance) {
        panic!(
            "{} value not equal with a tolerance of {}:\n\ta={}\n\tb={}\n",
            s(),
            tolerance,
            a,
            b
        );
    }
}

pub fn write_statistics(fluid_simulation: &FluidSimulation) -> String {
    let mut s = String::new();
    let pcounters = &fluid_simulation.pcounters;

    // writing into a String cannot fail
    let _ = writeln!(
        s,
        "steps: {} simulated-time: {}s particles: {}",
        fluid_simulation.step_number,
        fluid_simulation.time,
        fluid_simulation.num_particles()
    );
    let _ = writeln!(
        s,
        "simulation-time: {}ms",
        pcounters.total("simulation-step").as_secs_f64() * 1000.
    );
    let _ = writeln!(s);

    let mut v = pcounters.counters.iter().collect::<Vec<_>>();
    v.sort_by(|x, y| x.0.cmp(y.0));
    for (label, pcounter) in v {
        let _ = writeln!(s, "{}: avg:{}ms", label, pcounter.avg().as_secs_f64() * 1000.);
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        boundary_handler::{LineBoundary, PlaneBoundary},
        simulation_parameters::InitPlacement,
        sph_kernels::KernelType,
        vec2f,
    };

    fn gravity_only_params() -> SimulationParams {
        SimulationParams {
            domain: DomainBounds::new(1., -1., -1., 1.),
            dt: 0.005,
            h: 0.1,
            gravity: vec2f(0., -1.),
            particle_count: 200,
            pressure_stiffness: 0.,
            viscosity: 0.,
            surface_tension: 0.,
            init_placement: InitPlacement::Block {
                min: vec2f(0.1, 0.6),
                max: vec2f(0.9, 0.9),
            },
            num_workers: Some(2),
            ..SimulationParams::default()
        }
    }

    #[test]
    fn free_fall_after_one_step() {
        let params = SimulationParams {
            domain: DomainBounds::new(10., 0., 0., 10.),
            dt: 0.01,
            h: 1.,
            gravity: vec2f(0., -1.),
            particle_count: 100,
            pressure_stiffness: 0.,
            viscosity: 0.,
            surface_tension: 0.,
            init_placement: InitPlacement::Lattice { spacing: 1. },
            num_workers: Some(3),
            ..SimulationParams::default()
        };
        let mut sim = FluidSimulation::new(params, false).unwrap();
        assert_eq!(sim.num_particles(), 100);

        let before = sim.positions().to_vec();
        sim.single_step().unwrap();

        assert_eq!(sim.step_number(), 1);
        assert_ft_approx_eq(sim.time(), params.dt, 1e-7, || "time".to_string());
        for (i, v) in sim.velocities().iter().enumerate() {
            assert_ft_approx_eq(v.x, 0., 1e-7, || format!("velocity.x of {}", i));
            assert_ft_approx_eq(v.y, -params.dt, 1e-6, || format!("velocity.y of {}", i));
            assert!(sim.positions()[i].y < before[i].y);
        }
    }

    #[test]
    fn initial_acceleration_is_evaluated_at_construction() {
        let sim = FluidSimulation::new(gravity_only_params(), false).unwrap();
        assert!(sim.densities().iter().all(|&d| d > 0.));
        assert!(sim.particles.acceleration.iter().all(|a| *a == vec2f(0., -1.)));
    }

    #[test]
    fn gravity_alone_does_not_add_energy() {
        let params = gravity_only_params();
        let mut sim = FluidSimulation::new(params, false).unwrap();
        let steps = 400;
        for _ in 0..steps {
            sim.single_step().unwrap();
        }

        let bound = params.gravity.norm() * params.dt * steps as FT * 1.001;
        for v in sim.velocities() {
            assert!(v.norm() <= bound, "speed {} exceeds free fall bound {}", v.norm(), bound);
        }
        // the fluid has hit the floor by now
        assert!(sim.positions().iter().all(|p| sim.domain().contains(*p)));
    }

    #[test]
    fn boundary_keeps_falling_particles_above_it() {
        let mut sim = FluidSimulation::new(gravity_only_params(), false).unwrap();
        sim.attach(LineBoundary::new(vec2f(0., 0.5), vec2f(1., 0.5), 0.5).into()).unwrap();

        for _ in 0..300 {
            sim.single_step().unwrap();
            for (i, p) in sim.positions().iter().enumerate() {
                assert!(p.y > 0., "particle {} passed the boundary at step {}", i, sim.step_number());
            }
        }
    }

    #[test]
    fn particle_on_a_wall_keeps_falling() {
        let params = SimulationParams {
            domain: DomainBounds::new(1., 0., 0., 1.),
            particle_count: 1,
            ..gravity_only_params()
        };
        let mut sim = FluidSimulation::new(params, false).unwrap();
        sim.attach(LineBoundary::new(vec2f(0.5, 0.), vec2f(0.5, 1.), 0.5).into()).unwrap();
        sim.particles.position = vec![vec2f(0.5, 0.8)];
        sim.evaluate_accelerations(false).unwrap();

        for _ in 0..100 {
            sim.single_step().unwrap();
        }
        // 100 steps of 0.005s fall 0.125 from rest
        let p = sim.positions()[0];
        assert!(p.x < 0.5, "particle was not moved off the wall: {:?}", p);
        assert!(p.y < 0.7, "particle did not fall: {:?}", p);
    }

    #[test]
    fn fluid_stays_inside_the_domain_at_every_step() {
        let params = SimulationParams {
            particle_count: 300,
            num_workers: Some(2),
            ..SimulationParams::default()
        };
        let domain = params.domain;
        let mut sim = FluidSimulation::new(params, false).unwrap();
        sim.attach(LineBoundary::new(vec2f(0.3, 0.4), vec2f(0.9, 0.1), 0.5).into()).unwrap();
        sim.attach(PlaneBoundary::new(vec2f(0.8, 0.), vec2f(-1., 0.), 0.5).into()).unwrap();

        for _ in 0..300 {
            sim.single_step().unwrap();
            for (i, p) in sim.positions().iter().enumerate() {
                assert!(
                    domain.contains(*p),
                    "particle {} left the domain at step {}: {:?}",
                    i,
                    sim.step_number(),
                    p
                );
            }
        }
    }

    #[test]
    fn colocated_particles_stay_finite() {
        let params = SimulationParams {
            particle_count: 2,
            pressure_stiffness: 1.,
            viscosity: 0.1,
            surface_tension: 0.1,
            pressure_kernel: Some(KernelType::Spiky),
            viscosity_kernel: Some(KernelType::Viscosity),
            ..gravity_only_params()
        };
        let mut sim = FluidSimulation::new(params, false).unwrap();
        sim.particles.position = vec![vec2f(0.2, 0.3), vec2f(0.2, 0.3)];
        sim.evaluate_accelerations(false).unwrap();

        for _ in 0..10 {
            sim.single_step().unwrap();
        }
        let (p, v) = (sim.positions(), sim.velocities());
        assert!(p.iter().chain(v.iter()).all(|x| x.x.is_finite() && x.y.is_finite()));
        assert_eq!(p[0], p[1]);
        assert_eq!(v[0], v[1]);
    }

    #[test]
    fn particles_hitting_the_edge_are_clamped_inside() {
        let domain = DomainBounds::new(1., -1., -1., 1.);
        let mut position = vec2f(-1.2, 1.);
        let mut velocity = vec2f(-3., 2.);
        clamp_to_domain(&mut position, &mut velocity, domain, 0.1);

        assert_eq!(position, vec2f(-0.9, 0.9));
        assert_ft_approx_eq(velocity.x, 0.3, 1e-6, || "velocity.x".to_string());
        assert_ft_approx_eq(velocity.y, -0.2, 1e-6, || "velocity.y".to_string());
    }

    #[test]
    fn reset_reinitializes_particles() {
        let mut sim = FluidSimulation::new(gravity_only_params(), false).unwrap();
        sim.attach(LineBoundary::new(vec2f(0., 0.5), vec2f(1., 0.5), 0.5).into()).unwrap();
        for _ in 0..5 {
            sim.single_step().unwrap();
        }

        let params = SimulationParams {
            particle_count: 50,
            domain: DomainBounds::new(4., 0., 0., 2.),
            ..gravity_only_params()
        };
        sim.reset(params).unwrap();

        assert_eq!(sim.step_number(), 0);
        assert_eq!(sim.positions(), params.initial_positions().unwrap().as_slice());
        assert!(sim.velocities().iter().all(|v| *v == V2::zeros()));
        assert_eq!(sim.grid().cell_count_y(), 41);
        match &sim.boundaries()[0] {
            Boundary::LineBoundary(line) => assert_eq!(line.start(), vec2f(0., 2.)),
            other => panic!("unexpected boundary {:?}", other),
        }
    }

    #[test]
    fn failed_reset_keeps_the_old_state() {
        let mut sim = FluidSimulation::new(gravity_only_params(), false).unwrap();
        sim.single_step().unwrap();
        let positions = sim.positions().to_vec();

        let bad = SimulationParams {
            h: -1.,
            ..gravity_only_params()
        };
        assert!(sim.reset(bad).is_err());
        assert_eq!(sim.positions(), positions.as_slice());
        assert_eq!(sim.step_number(), 1);
    }

    #[test]
    fn statistics_list_every_phase() {
        let mut sim = FluidSimulation::new(gravity_only_params(), true).unwrap();
        sim.single_step().unwrap();
        let stats = write_statistics(&sim);
        for phase in [
            "indexing",
            "density",
            "surface-normals",
            "acceleration",
            "integration",
            "simulation-step",
        ] {
            assert!(stats.contains(phase), "missing {} in\n{}", phase, stats);
        }
        assert_eq!(sim.performance_counters().num_samples("simulation-step"), 1);
        assert_eq!(sim.performance_counters().num_samples("density"), 2);
    }

    #[test]
    fn disabled_counters_record_nothing() {
        let mut sim = FluidSimulation::new(gravity_only_params(), false).unwrap();
        for _ in 0..3 {
            sim.single_step().unwrap();
        }
        assert_eq!(sim.performance_counters().num_samples("simulation-step"), 0);
        assert_eq!(sim.performance_counters().total("density"), Duration::ZERO);
        assert!(!write_statistics(&sim).contains("avg:"));
    }
}
