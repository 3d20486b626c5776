use super::BoundaryTrait;
use crate::{floating_type_mod::FT, simulation_parameters::DomainBounds, vec2f, V2};

/// Particles closer than this to the line count as sliding along it.
const GRAZING_DISTANCE: FT = 1e-4;
const GRAZING_NUDGE: FT = 0.1;
const CROSSING_NUDGE: FT = 0.01;

/**
 * Straight wall segment between two points given in unit coordinates.
 *
 * A particle that would cross the segment within one step is reflected:
 * the normal component of its velocity is scaled by `-(1 - damp)` and it
 * stays at its previous position, pushed slightly back to its own side.
 */
#[derive(Debug, Clone)]
pub struct LineBoundary {
    unit_start: V2,
    unit_end: V2,
    damp: FT,

    // world space
    start: V2,
    end: V2,
    normal: V2,
    direction: V2,
}

impl LineBoundary {
    pub fn new(unit_start: V2, unit_end: V2, damp: FT) -> LineBoundary {
        let mut boundary = LineBoundary {
            unit_start,
            unit_end,
            damp,
            start: unit_start,
            end: unit_end,
            normal: V2::zeros(),
            direction: V2::zeros(),
        };
        boundary.update_coordinate_system(DomainBounds::new(1., 0., 0., 1.));
        boundary
    }

    pub fn start(&self) -> V2 {
        self.start
    }

    pub fn end(&self) -> V2 {
        self.end
    }

    pub fn normal(&self) -> V2 {
        self.normal
    }

    fn reflect(&self, index: usize, next_position: V2, positions: &mut [V2], velocities: &mut [V2], nudge: FT) {
        let vel = velocities[index];
        let dv = self.normal * ((2. - self.damp) * vel.dot(&self.normal));
        velocities[index] = vel - dv;

        let away = match dv.try_normalize(0.) {
            Some(dir) => -dir,
            None => self.escape_direction(positions[index], next_position),
        };
        positions[index] += away * nudge;
    }

    /// Normal pointing to the side `prev` lies on. For a particle exactly on
    /// the line this is the side opposite to the proposed move, or `normal`
    /// if the move is parallel to the line.
    fn escape_direction(&self, prev: V2, next_position: V2) -> V2 {
        let side = self.normal.dot(&(prev - self.start));
        let heading = self.normal.dot(&(next_position - prev));
        if side < 0. || (side == 0. && heading > 0.) {
            -self.normal
        } else {
            self.normal
        }
    }
}

impl BoundaryTrait for LineBoundary {
    fn update_coordinate_system(&mut self, bounds: DomainBounds) {
        self.start = bounds.unit_to_world(self.unit_start);
        self.end = bounds.unit_to_world(self.unit_end);

        let line = self.end - self.start;
        self.normal = vec2f(-line.y, line.x)
            .try_normalize(0.)
            .unwrap_or_else(V2::zeros);
        self.direction = (-line).try_normalize(0.).unwrap_or_else(V2::zeros);
    }

    fn resolve_collision(
        &self,
        index: usize,
        next_position: V2,
        positions: &mut [V2],
        velocities: &mut [V2],
    ) -> bool {
        let prev = positions[index];
        let start_prev = prev - self.start;
        let end_prev = prev - self.end;

        let on_line = self.normal.dot(&start_prev).abs() < GRAZING_DISTANCE;
        let between_ends = self.direction.dot(&start_prev) * self.direction.dot(&end_prev) <= 0.;
        if on_line && between_ends {
            self.reflect(index, next_position, positions, velocities, GRAZING_NUDGE);
            return true;
        }

        let start_next = next_position - self.start;
        if self.normal.dot(&start_prev) * self.normal.dot(&start_next) < 0. {
            let path = prev - next_position;
            let path_normal = vec2f(path.y, -path.x);
            if path_normal.dot(&start_prev) * path_normal.dot(&end_prev) < 0. {
                self.reflect(index, next_position, positions, velocities, CROSSING_NUDGE);
                return true;
            }
        }

        false
    }

    fn is_occlusion_separated(&self, a: V2, b: V2) -> bool {
        let side_a = self.normal.dot(&(a - self.start));
        let side_b = self.normal.dot(&(b - self.start));
        if side_a * side_b >= 0. {
            return false;
        }

        let ab = b - a;
        let ab_normal = vec2f(ab.y, -ab.x);
        ab_normal.dot(&(self.start - a)) * ab_normal.dot(&(self.end - a)) < 0.
    }
}
