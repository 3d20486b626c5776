use crate::{simulation_parameters::DomainBounds, V2};

mod line_boundary;
mod plane_boundary;

use enum_dispatch::enum_dispatch;
pub use line_boundary::LineBoundary;
pub use plane_boundary::PlaneBoundary;

/**
 * Static obstacle inside the fluid domain.
 *
 * Boundaries are defined in unit coordinates of the domain and cache their
 * world-space geometry; `update_coordinate_system` has to be called whenever
 * the domain bounds change.
 */
#[enum_dispatch]
pub trait BoundaryTrait {
    fn update_coordinate_system(&mut self, bounds: DomainBounds);

    /// Checks the move of particle `index` from its current position to
    /// `next_position`. On a collision the particle's position and velocity are
    /// rewritten in place and `true` is returned; otherwise nothing is touched.
    fn resolve_collision(
        &self,
        index: usize,
        next_position: V2,
        positions: &mut [V2],
        velocities: &mut [V2],
    ) -> bool;

    /// Whether the boundary lies between two points. Must be symmetric in its arguments.
    fn is_occlusion_separated(&self, a: V2, b: V2) -> bool;
}

#[enum_dispatch(BoundaryTrait)]
#[derive(Debug, Clone)]
pub enum Boundary {
    LineBoundary(LineBoundary),
    PlaneBoundary(PlaneBoundary),
}

pub fn is_separated_by_any(boundaries: &[Boundary], a: V2, b: V2) -> bool {
    boundaries.iter().any(|boundary| boundary.is_occlusion_separated(a, b))
}
