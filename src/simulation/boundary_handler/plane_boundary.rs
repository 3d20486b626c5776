use super::BoundaryTrait;
use crate::{floating_type_mod::FT, simulation_parameters::DomainBounds, V2};

const SURFACE_NUDGE: FT = 0.01;

/**
 * Infinite straight wall. Everything on the side its normal points away
 * from is solid.
 *
 * The plane is stored as `dir . x + delta`, the signed distance of `x` to
 * the wall (positive on the fluid side).
 */
#[derive(Debug, Clone)]
pub struct PlaneBoundary {
    unit_point: V2,
    unit_normal: V2,
    damp: FT,

    dir: V2,
    delta: FT,
}

impl PlaneBoundary {
    /// `unit_normal` points into the fluid.
    pub fn new(unit_point: V2, unit_normal: V2, damp: FT) -> PlaneBoundary {
        let mut plane = PlaneBoundary {
            unit_point,
            unit_normal,
            damp,
            dir: V2::zeros(),
            delta: 0.,
        };
        plane.update_coordinate_system(DomainBounds::new(1., 0., 0., 1.));
        plane
    }

    pub fn probe(&self, x: V2) -> FT {
        self.dir.dot(&x) + self.delta
    }
}

impl BoundaryTrait for PlaneBoundary {
    fn update_coordinate_system(&mut self, bounds: DomainBounds) {
        let point = bounds.unit_to_world(self.unit_point);
        self.dir = bounds.unit_normal_to_world(self.unit_normal);
        self.delta = -self.dir.dot(&point);
    }

    fn resolve_collision(
        &self,
        index: usize,
        next_position: V2,
        positions: &mut [V2],
        velocities: &mut [V2],
    ) -> bool {
        if self.probe(next_position) >= 0. {
            return false;
        }

        let vel = velocities[index];
        let vel_n = vel.dot(&self.dir);
        if vel_n < 0. {
            velocities[index] = vel - self.dir * ((2. - self.damp) * vel_n);
        }

        // particles already inside the solid are projected back onto the surface
        let prev = positions[index];
        let dist = self.probe(prev);
        if dist < SURFACE_NUDGE {
            positions[index] = prev + self.dir * (SURFACE_NUDGE - dist.min(0.));
        }
        true
    }

    fn is_occlusion_separated(&self, a: V2, b: V2) -> bool {
        self.probe(a) * self.probe(b) < 0.
    }
}
