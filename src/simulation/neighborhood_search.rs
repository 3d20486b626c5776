use crate::{
    floating_type_mod::FT, simulation_parameters::DomainBounds, vec2f, IT, V2, VI,
};

pub fn iterate_grid_neighbors(dist: IT, mut f: impl FnMut(VI<2>)) {
    for y in -dist..=dist {
        for x in -dist..=dist {
            f([x, y].into());
        }
    }
}

struct Cell {
    particle_ids: Vec<usize>,
}

impl Cell {
    fn new() -> Cell {
        Cell {
            particle_ids: Vec::new(),
        }
    }
}

/**
 * Uniform grid over the simulation domain with a cell edge of exactly `h`.
 *
 * Two particles closer than `h` always lie in the same or in adjacent cells
 * (diagonals included), so the 3x3 block around a particle's cell contains
 * every particle a kernel of support `h` can see.
 *
 * The grid origin is the bottom-left domain corner shifted by half a cell.
 * Particles whose cell falls outside the grid are not indexed.
 */
pub struct CellGrid {
    origin: V2,
    cell_size: FT,
    size: [usize; 2],
    cells: Vec<Cell>,

    // flattened cell index of every particle of the last rebuild
    particle_cells: Vec<Option<usize>>,
    num_dropped: usize,
}

impl CellGrid {
    pub fn new(domain: DomainBounds, h: FT) -> CellGrid {
        let size = Self::grid_size(domain, h);
        CellGrid {
            origin: vec2f(domain.left - h / 2., domain.bottom - h / 2.),
            cell_size: h,
            size,
            cells: (0..size[0] * size[1]).map(|_| Cell::new()).collect(),
            particle_cells: Vec::new(),
            num_dropped: 0,
        }
    }

    fn grid_size(domain: DomainBounds, h: FT) -> [usize; 2] {
        [
            (domain.width() / h).floor() as usize + 1,
            (domain.height() / h).floor() as usize + 1,
        ]
    }

    /// Adapts the grid to new bounds, reusing the cell storage when the dimensions are unchanged.
    pub fn reshape(&mut self, domain: DomainBounds, h: FT) {
        let size = Self::grid_size(domain, h);
        self.origin = vec2f(domain.left - h / 2., domain.bottom - h / 2.);
        self.cell_size = h;
        if size != self.size {
            self.size = size;
            self.cells = (0..size[0] * size[1]).map(|_| Cell::new()).collect();
        }
        self.particle_cells.clear();
        self.num_dropped = 0;
    }

    pub fn cell_count_x(&self) -> usize {
        self.size[0]
    }

    pub fn cell_count_y(&self) -> usize {
        self.size[1]
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell_size(&self) -> FT {
        self.cell_size
    }

    /// Number of particles left out by the last rebuild.
    pub fn num_dropped(&self) -> usize {
        self.num_dropped
    }

    pub fn rebuild(&mut self, positions: &[V2]) {
        for cell in &mut self.cells {
            cell.particle_ids.clear();
        }
        self.particle_cells.clear();
        self.particle_cells.reserve(positions.len());
        self.num_dropped = 0;

        for (particle_id, position) in positions.iter().enumerate() {
            let cell_idx = self
                .cell_pos(*position)
                .map(|(cx, cy)| self.cell_index(cx, cy));
            match cell_idx {
                Some(idx) => self.cells[idx].particle_ids.push(particle_id),
                None => self.num_dropped += 1,
            }
            self.particle_cells.push(cell_idx);
        }
    }

    /// Cell coordinates of a point, `None` outside the grid.
    pub fn cell_pos(&self, p: V2) -> Option<(usize, usize)> {
        if !(p.x.is_finite() && p.y.is_finite()) {
            return None;
        }
        let cell = ((p - self.origin) / self.cell_size).map(|x| x.floor() as IT);
        if self.in_grid(cell.x, cell.y) {
            Some((cell.x as usize, cell.y as usize))
        } else {
            None
        }
    }

    pub fn in_grid(&self, cx: IT, cy: IT) -> bool {
        0 <= cx && (cx as usize) < self.size[0] && 0 <= cy && (cy as usize) < self.size[1]
    }

    pub fn cell_index(&self, cx: usize, cy: usize) -> usize {
        debug_assert!(cx < self.size[0] && cy < self.size[1]);
        cy * self.size[0] + cx
    }

    pub fn cell_coords(&self, cell_idx: usize) -> (usize, usize) {
        (cell_idx % self.size[0], cell_idx / self.size[0])
    }

    /// Flattened cell a particle was indexed into by the last rebuild.
    pub fn particle_cell(&self, particle_id: usize) -> Option<usize> {
        self.particle_cells.get(particle_id).copied().flatten()
    }

    pub fn particles_in(&self, cx: usize, cy: usize) -> &[usize] {
        &self.cells[self.cell_index(cx, cy)].particle_ids
    }

    pub fn is_cell_empty(&self, cx: usize, cy: usize) -> bool {
        self.particles_in(cx, cy).is_empty()
    }

    /// Center of a cell in world coordinates.
    pub fn cell_center(&self, cx: usize, cy: usize) -> V2 {
        self.origin + vec2f(cx as FT + 0.5, cy as FT + 0.5) * self.cell_size
    }

    /// All particles of the 3x3 block centered at (cx, cy).
    pub fn neighbors_of(&self, cx: usize, cy: usize) -> impl Iterator<Item = usize> + '_ {
        let mut block: Vec<(usize, usize)> = Vec::with_capacity(9);
        iterate_grid_neighbors(1, |offset| {
            let (x, y) = (cx as IT + offset.x, cy as IT + offset.y);
            if self.in_grid(x, y) {
                block.push((x as usize, y as usize));
            }
        });
        block
            .into_iter()
            .flat_map(move |(x, y)| self.particles_in(x, y).iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn domain() -> DomainBounds {
        DomainBounds::new(3.1, -1., -2., 2.5)
    }

    #[test]
    fn grid_dimensions_follow_support_radius() {
        let grid = CellGrid::new(DomainBounds::new(10., 0., 0., 10.), 1.);
        assert_eq!(grid.cell_count_x(), 11);
        assert_eq!(grid.cell_count_y(), 11);

        let grid = CellGrid::new(domain(), 0.4);
        assert_eq!(grid.cell_count_x(), (4.5 / 0.4 as FT).floor() as usize + 1);
        assert_eq!(grid.cell_count_y(), (4.1 / 0.4 as FT).floor() as usize + 1);
    }

    #[test]
    fn every_particle_within_support_is_a_grid_neighbor() {
        // the grid reaches past the right and top edges for this domain and h
        let h = 0.4;
        let d = domain();
        let mut rng = StdRng::seed_from_u64(42);
        let positions: Vec<V2> = (0..600)
            .map(|_| vec2f(rng.gen_range(d.left..d.right), rng.gen_range(d.bottom..d.top)))
            .collect();

        let mut grid = CellGrid::new(d, h);
        grid.rebuild(&positions);
        assert_eq!(grid.num_dropped(), 0);

        for i in 0..positions.len() {
            let (cx, cy) = grid.cell_coords(grid.particle_cell(i).unwrap());
            let grid_neighbors: Vec<usize> = grid.neighbors_of(cx, cy).collect();
            assert!(grid_neighbors.contains(&i));

            for j in 0..positions.len() {
                if (positions[i] - positions[j]).norm() <= h {
                    assert!(
                        grid_neighbors.contains(&j),
                        "particle {} at distance {} of {} is not in its 3x3 block",
                        j,
                        (positions[i] - positions[j]).norm(),
                        i
                    );
                }
            }
        }
    }

    #[test]
    fn each_particle_is_indexed_into_exactly_one_cell() {
        let positions = vec![vec2f(0., 0.), vec2f(0.05, 0.05), vec2f(2., 2.9), vec2f(-1.9, -0.9)];
        let mut grid = CellGrid::new(domain(), 0.5);
        grid.rebuild(&positions);

        let mut counts = vec![0; positions.len()];
        for cy in 0..grid.cell_count_y() {
            for cx in 0..grid.cell_count_x() {
                for &p in grid.particles_in(cx, cy) {
                    counts[p] += 1;
                }
            }
        }
        assert!(counts.iter().all(|&c| c == 1));
        assert_eq!(grid.particle_cell(0), grid.particle_cell(1));
    }

    #[test]
    fn rebuild_overwrites_previous_contents() {
        let mut grid = CellGrid::new(domain(), 0.5);
        grid.rebuild(&[vec2f(0., 0.), vec2f(1., 1.)]);
        grid.rebuild(&[vec2f(2., 2.)]);

        let total: usize = (0..grid.num_cells())
            .map(|idx| {
                let (cx, cy) = grid.cell_coords(idx);
                grid.particles_in(cx, cy).len()
            })
            .sum();
        assert_eq!(total, 1);
        assert_eq!(grid.particle_cell(1), None);
    }

    #[test]
    fn particles_outside_the_grid_are_dropped() {
        let mut grid = CellGrid::new(domain(), 0.5);
        let positions = vec![
            vec2f(0., 0.),
            vec2f(-50., 0.),
            vec2f(0., 50.),
            vec2f(FT::NAN, 0.),
        ];
        grid.rebuild(&positions);
        assert_eq!(grid.num_dropped(), 3);
        assert!(grid.particle_cell(0).is_some());
        assert!(grid.particle_cell(1).is_none());
        assert!(grid.particle_cell(2).is_none());
        assert!(grid.particle_cell(3).is_none());
    }

    #[test]
    fn neighbors_of_corner_cell_honors_grid_bounds() {
        let d = DomainBounds::new(2., 0., 0., 2.);
        let mut grid = CellGrid::new(d, 1.);
        // cells are centered on integer coordinates
        let positions = vec![vec2f(0., 0.), vec2f(1., 0.), vec2f(0., 1.), vec2f(1., 1.), vec2f(2., 2.)];
        grid.rebuild(&positions);

        let mut corner: Vec<usize> = grid.neighbors_of(0, 0).collect();
        corner.sort();
        assert_eq!(corner, vec![0, 1, 2, 3]);
        assert_eq!(grid.cell_center(0, 0), vec2f(0., 0.));
        assert_eq!(grid.neighbors_of(2, 2).count(), 2);
    }
}
