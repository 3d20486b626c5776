use crate::{
    boundary_handler::{is_separated_by_any, Boundary},
    concurrency::WorkerPool,
    error::SimulationError,
    floating_type_mod::FT,
    neighborhood_search::{iterate_grid_neighbors, CellGrid},
    simulation_parameters::SimulationParams,
    sph_kernels::SmoothingKernel,
    vec2f, IT, V2,
};

/// Read-only state shared by every task of an evaluation pass.
#[derive(Clone, Copy)]
pub struct FluidContext<'a> {
    pub params: &'a SimulationParams,
    pub grid: &'a CellGrid,
    pub boundaries: &'a [Boundary],
}

impl<'a> FluidContext<'a> {
    /// Grid neighbors of particle `i` that no boundary hides from it (`i` included).
    fn visible_neighbors(&self, i: usize, position: &'a [V2]) -> impl Iterator<Item = usize> + 'a {
        let boundaries = self.boundaries;
        let cell = self.grid.particle_cell(i).map(|c| self.grid.cell_coords(c));
        let grid = self.grid;
        cell.into_iter()
            .flat_map(move |(cx, cy)| grid.neighbors_of(cx, cy))
            .filter(move |&j| j == i || !is_separated_by_any(boundaries, position[i], position[j]))
    }
}

pub fn calculate_particle_density(i: usize, position: &[V2], ctx: FluidContext) -> FT {
    let params = ctx.params;
    let mut density_acc = 0.;
    for j in ctx.visible_neighbors(i, position) {
        let x_ij = position[i] - position[j];
        density_acc += params.particle_mass * params.density_kernel.value(x_ij, params.h);
    }
    density_acc
}

/// Density pass. Fails if an indexed particle ends up with a density that is not finite and positive.
pub fn calculate_all_particle_densities(
    pool: &WorkerPool,
    density: &mut [FT],
    position: &[V2],
    ctx: FluidContext,
) -> Result<(), SimulationError> {
    pool.sync_group_mut1("density", ctx.params.batch_size(), density, |i, p_density| {
        *p_density = calculate_particle_density(i, position, ctx);
    })?;

    for (i, &d) in density.iter().enumerate() {
        if ctx.grid.particle_cell(i).is_some() && !(d.is_finite() && d > 0.) {
            return Err(SimulationError::InvalidDensity {
                particle: i,
                density: d,
            });
        }
    }
    Ok(())
}

/// Sum of the offsets towards every neighboring cell that is empty or hidden by a boundary, negated.
pub fn estimate_cell_normal(cell_idx: usize, grid: &CellGrid, boundaries: &[Boundary]) -> V2 {
    let (cx, cy) = grid.cell_coords(cell_idx);
    let center = grid.cell_center(cx, cy);

    let mut normal = V2::zeros();
    iterate_grid_neighbors(1, |offset| {
        if offset.x == 0 && offset.y == 0 {
            return;
        }
        let (x, y) = (cx as IT + offset.x, cy as IT + offset.y);
        if !grid.in_grid(x, y) {
            return;
        }
        let (x, y) = (x as usize, y as usize);
        if grid.is_cell_empty(x, y) || is_separated_by_any(boundaries, center, grid.cell_center(x, y)) {
            normal -= vec2f(offset.x as FT, offset.y as FT);
        }
    });
    normal
}

pub fn estimate_cell_normals(
    pool: &WorkerPool,
    cell_normals: &mut [V2],
    ctx: FluidContext,
) -> Result<(), SimulationError> {
    debug_assert_eq!(cell_normals.len(), ctx.grid.num_cells());
    let batch_size = cell_normals.len() / 200;
    pool.sync_group_mut1("surface-normals", batch_size, cell_normals, |cell_idx, p_normal| {
        *p_normal = estimate_cell_normal(cell_idx, ctx.grid, ctx.boundaries);
    })
}

pub fn calculate_particle_accel(
    i: usize,
    position: &[V2],
    velocity: &[V2],
    density: &[FT],
    cell_normals: &[V2],
    ctx: FluidContext,
) -> V2 {
    let params = ctx.params;
    let h = params.h;
    let mut accel = params.gravity;

    let cell = match ctx.grid.particle_cell(i) {
        Some(cell) => cell,
        None => return accel,
    };

    let pressure = |k: usize| params.pressure_stiffness * (density[k] - params.rest_density);
    let pressure_i = pressure(i);

    let viscosity_kernel = params.viscosity_kernel.filter(|_| params.viscosity != 0.);

    let normal = cell_normals[cell];
    let normal_len = normal.norm();
    let with_surface_tension = params.surface_tension != 0. && normal_len > FT::EPSILON;

    for j in ctx.visible_neighbors(i, position) {
        if j == i {
            continue;
        }
        let x_ij = position[i] - position[j];

        if let Some(kernel) = params.pressure_kernel {
            accel += kernel.gradient(x_ij, h) * (-(pressure(j) + pressure_i) / (2. * density[i]));
        }

        if let Some(kernel) = viscosity_kernel {
            accel += (velocity[j] - velocity[i]) * (kernel.laplacian(x_ij, h) * params.viscosity / density[j]);
        }

        if with_surface_tension {
            let curvature = -params.density_kernel.laplacian(x_ij, h) / (density[j] * normal_len);
            accel += normal * (curvature * params.surface_tension);
        }
    }

    accel
}

/// Acceleration pass, expects densities and cell normals of the same positions.
pub fn calculate_all_particle_accels(
    pool: &WorkerPool,
    accel: &mut [V2],
    position: &[V2],
    velocity: &[V2],
    density: &[FT],
    cell_normals: &[V2],
    ctx: FluidContext,
) -> Result<(), SimulationError> {
    pool.sync_group_mut1("acceleration", ctx.params.batch_size(), accel, |i, p_accel| {
        *p_accel = calculate_particle_accel(i, position, velocity, density, cell_normals, ctx);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        boundary_handler::LineBoundary,
        simulation_parameters::{DomainBounds, InitPlacement},
        sph_kernels::KernelType,
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn params(particle_count: usize) -> SimulationParams {
        SimulationParams {
            domain: DomainBounds::new(1., 0., 0., 1.),
            h: 0.1,
            particle_count,
            particle_mass: 0.01,
            rest_density: 1.,
            pressure_stiffness: 1.,
            viscosity: 0.5,
            surface_tension: 0.5,
            density_kernel: KernelType::Poly6,
            pressure_kernel: Some(KernelType::Spiky),
            viscosity_kernel: Some(KernelType::Viscosity),
            init_placement: InitPlacement::Random {
                seed: 1,
                min: vec2f(0.1, 0.1),
                max: vec2f(0.9, 0.9),
            },
            num_workers: Some(2),
            ..SimulationParams::default()
        }
    }

    fn evaluate(params: &SimulationParams, position: &[V2], velocity: &[V2], boundaries: &[Boundary]) -> (Vec<FT>, Vec<V2>) {
        let pool = WorkerPool::new(2).unwrap();
        let mut grid = CellGrid::new(params.domain, params.h);
        grid.rebuild(position);
        let ctx = FluidContext {
            params,
            grid: &grid,
            boundaries,
        };

        let mut density = vec![0.; position.len()];
        calculate_all_particle_densities(&pool, &mut density, position, ctx).unwrap();
        let mut normals = vec![V2::zeros(); grid.num_cells()];
        estimate_cell_normals(&pool, &mut normals, ctx).unwrap();
        let mut accel = vec![V2::zeros(); position.len()];
        calculate_all_particle_accels(&pool, &mut accel, position, velocity, &density, &normals, ctx).unwrap();
        (density, accel)
    }

    #[test]
    fn densities_are_positive_and_include_the_self_term() {
        let params = params(400);
        let position = params.initial_positions().unwrap();
        let velocity = vec![V2::zeros(); position.len()];
        let (density, accel) = evaluate(&params, &position, &velocity, &[]);

        let self_term = params.particle_mass * params.density_kernel.peak_value(params.h);
        for (d, a) in density.iter().zip(accel.iter()) {
            assert!(*d >= self_term * 0.999);
            assert!(a.x.is_finite() && a.y.is_finite());
        }
    }

    #[test]
    fn colocated_particles_feel_gravity_only() {
        let params = params(2);
        let position = vec![vec2f(0.5, 0.5), vec2f(0.5, 0.5)];
        let velocity = vec![vec2f(0.1, 0.), vec2f(0.1, 0.)];
        let (density, accel) = evaluate(&params, &position, &velocity, &[]);

        assert_eq!(density[0], density[1]);
        assert_eq!(density[0], 2. * params.particle_mass * params.density_kernel.peak_value(params.h));
        for a in accel {
            assert_eq!(a, params.gravity);
        }
    }

    #[test]
    fn dropped_particles_get_zero_density_and_gravity() {
        let params = params(2);
        let position = vec![vec2f(0.5, 0.5), vec2f(5., 5.)];
        let velocity = vec![V2::zeros(); 2];
        let (density, accel) = evaluate(&params, &position, &velocity, &[]);
        assert!(density[0] > 0.);
        assert_eq!(density[1], 0.);
        assert_eq!(accel[1], params.gravity);
    }

    #[test]
    fn compressed_pair_is_pushed_apart() {
        let params = SimulationParams {
            rest_density: 0.5,
            viscosity: 0.,
            surface_tension: 0.,
            gravity: V2::zeros(),
            ..params(2)
        };
        let position = vec![vec2f(0.5, 0.5), vec2f(0.53, 0.5)];
        let velocity = vec![V2::zeros(); 2];
        let (density, accel) = evaluate(&params, &position, &velocity, &[]);

        assert!(density[0] > params.rest_density);
        assert!(accel[0].x < 0.);
        assert!(accel[1].x > 0.);
        assert!((accel[0] + accel[1]).norm() <= 1e-5 * accel[0].norm());
    }

    #[test]
    fn boundary_hides_particles_from_each_other() {
        let params = params(2);
        let position = vec![vec2f(0.5, 0.52), vec2f(0.5, 0.48)];
        let velocity = vec![vec2f(0., -1.), vec2f(0., 1.)];
        let wall: Boundary = LineBoundary::new(vec2f(0., 0.5), vec2f(1., 0.5), 0.5).into();

        let (open_density, _) = evaluate(&params, &position, &velocity, &[]);
        let (density, accel) = evaluate(&params, &position, &velocity, &[wall]);

        let self_term = params.particle_mass * params.density_kernel.peak_value(params.h);
        assert!(open_density[0] > self_term);
        assert_eq!(density, vec![self_term, self_term]);
        assert_eq!(accel[0], params.gravity);
    }

    #[test]
    fn cell_normal_points_away_from_empty_cells() {
        let domain = DomainBounds::new(1., 0., 0., 1.);
        let mut grid = CellGrid::new(domain, 0.1);
        // fill the bottom half of the grid, one particle per cell
        let mut position = Vec::new();
        for cy in 0..5 {
            for cx in 0..grid.cell_count_x() {
                position.push(grid.cell_center(cx, cy));
            }
        }
        grid.rebuild(&position);

        let surface = grid.cell_index(5, 4);
        assert_eq!(estimate_cell_normal(surface, &grid, &[]), vec2f(0., -3.));
        let interior = grid.cell_index(5, 2);
        assert_eq!(estimate_cell_normal(interior, &grid, &[]), V2::zeros());
    }

    #[test]
    fn random_density_matches_brute_force() {
        let params = params(300);
        let mut rng = StdRng::seed_from_u64(9);
        let position: Vec<V2> = (0..300)
            .map(|_| vec2f(rng.gen_range(0.2..0.8), rng.gen_range(0.2..0.8)))
            .collect();
        let velocity = vec![V2::zeros(); position.len()];
        let (density, _) = evaluate(&params, &position, &velocity, &[]);

        for i in 0..position.len() {
            let brute: FT = position
                .iter()
                .map(|p| params.particle_mass * params.density_kernel.value(position[i] - p, params.h))
                .sum();
            assert!((brute - density[i]).abs() <= 1e-4 * brute);
        }
    }
}
