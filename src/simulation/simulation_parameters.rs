use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    concurrency::available_parallelism,
    error::ConfigError,
    floating_type_mod::FT,
    sph_kernels::KernelType,
    vec2f, V2,
};

/// Tasks per pass are grouped so that roughly this many batches are submitted.
const TARGET_TASK_BATCHES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainBounds {
    pub top: FT,
    pub bottom: FT,
    pub left: FT,
    pub right: FT,
}

impl DomainBounds {
    pub fn new(top: FT, bottom: FT, left: FT, right: FT) -> DomainBounds {
        DomainBounds {
            top,
            bottom,
            left,
            right,
        }
    }

    pub fn width(&self) -> FT {
        self.right - self.left
    }

    pub fn height(&self) -> FT {
        self.top - self.bottom
    }

    pub fn contains(&self, p: V2) -> bool {
        self.left <= p.x && p.x <= self.right && self.bottom <= p.y && p.y <= self.top
    }

    /// Maps a point of the unit square [0, 1] x [0, 1] into the domain.
    pub fn unit_to_world(&self, u: V2) -> V2 {
        vec2f(self.left + u.x * self.width(), self.bottom + u.y * self.height())
    }

    /// Maps a direction given in unit coordinates into the domain (inverse transposed scale).
    pub fn unit_normal_to_world(&self, n: V2) -> V2 {
        let n = vec2f(n.x / self.width(), n.y / self.height());
        n.try_normalize(0.).unwrap_or_else(V2::zeros)
    }
}

/**
 * Procedure that places the particles at (re)initialization.
 *
 * Rectangles are given in unit coordinates of the domain.
 */
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InitPlacement {
    /// Regular lattice stretched to fill the rectangle.
    Block { min: V2, max: V2 },

    /// Rows of fixed spacing starting at the bottom-left corner of the domain.
    Lattice { spacing: FT },

    /// Uniformly random inside the rectangle.
    Random { seed: u64, min: V2, max: V2 },
}

impl InitPlacement {
    pub fn place(&self, particle_count: usize, bounds: DomainBounds) -> Result<Vec<V2>, ConfigError> {
        match *self {
            InitPlacement::Block { min, max } => {
                let (min, max) = Self::world_rect(min, max, bounds)?;
                let size = max - min;
                let cols = ((particle_count as FT * size.x / size.y).sqrt().ceil() as usize).max(1);
                let rows = (particle_count + cols - 1) / cols;
                let spacing = vec2f(size.x / cols as FT, size.y / rows as FT);

                Ok((0..particle_count)
                    .map(|i| {
                        let (col, row) = (i % cols, i / cols);
                        min + vec2f((col as FT + 0.5) * spacing.x, (row as FT + 0.5) * spacing.y)
                    })
                    .collect())
            }
            InitPlacement::Lattice { spacing } => {
                if !(spacing > 0.) {
                    return Err(ConfigError::InvalidPlacementRegion(format!(
                        "lattice spacing must be positive, got {}",
                        spacing
                    )));
                }
                let cols = (bounds.width() / spacing).floor() as usize;
                let rows = (bounds.height() / spacing).floor() as usize;
                let capacity = cols.saturating_mul(rows);
                if capacity < particle_count {
                    return Err(ConfigError::PlacementOverflow {
                        requested: particle_count,
                        capacity,
                    });
                }

                Ok((0..particle_count)
                    .map(|i| {
                        let (col, row) = (i % cols, i / cols);
                        vec2f(
                            bounds.left + (col as FT + 0.5) * spacing,
                            bounds.bottom + (row as FT + 0.5) * spacing,
                        )
                    })
                    .collect())
            }
            InitPlacement::Random { seed, min, max } => {
                let (min, max) = Self::world_rect(min, max, bounds)?;
                let mut rng = StdRng::seed_from_u64(seed);
                Ok((0..particle_count)
                    .map(|_| vec2f(rng.gen_range(min.x..max.x), rng.gen_range(min.y..max.y)))
                    .collect())
            }
        }
    }

    fn world_rect(min: V2, max: V2, bounds: DomainBounds) -> Result<(V2, V2), ConfigError> {
        let in_unit_square = |v: V2| (0. ..=1.).contains(&v.x) && (0. ..=1.).contains(&v.y);
        if !(min.x < max.x && min.y < max.y) || !in_unit_square(min) || !in_unit_square(max) {
            return Err(ConfigError::InvalidPlacementRegion(format!(
                "[{}, {}] x [{}, {}] is not a non-empty part of the unit square",
                min.x, max.x, min.y, max.y
            )));
        }
        Ok((bounds.unit_to_world(min), bounds.unit_to_world(max)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    pub domain: DomainBounds,
    pub dt: FT,

    // kernel support radius, also the grid cell edge
    pub h: FT,
    pub gravity: V2,

    pub particle_count: usize,
    pub particle_mass: FT,

    pub rest_density: FT,
    // pressure constant K
    pub pressure_stiffness: FT,
    // viscosity coefficient, disabled when 0
    pub viscosity: FT,
    // surface tension coefficient, disabled when 0
    pub surface_tension: FT,

    pub density_kernel: KernelType,
    // `None` disables the pressure term
    pub pressure_kernel: Option<KernelType>,
    // `None` disables the viscosity term
    pub viscosity_kernel: Option<KernelType>,

    pub init_placement: InitPlacement,

    // defaults to the available hardware parallelism
    #[serde(default)]
    pub num_workers: Option<usize>,
    #[serde(default)]
    pub task_batch_size: Option<usize>,

    // distance a particle is put inside the domain when it hits an edge
    #[serde(default = "default_edge_margin")]
    pub edge_margin: FT,
}

fn default_edge_margin() -> FT {
    0.1
}

impl Default for SimulationParams {
    fn default() -> Self {
        SimulationParams {
            domain: DomainBounds::new(1., -1., -1., 1.),
            dt: 0.001,
            h: 0.1,
            gravity: vec2f(0., -1.),
            particle_count: 1000,
            particle_mass: 1.,
            rest_density: 1000.,
            pressure_stiffness: 0.01,
            viscosity: 0.001,
            surface_tension: 0.001,
            density_kernel: KernelType::Poly6,
            pressure_kernel: Some(KernelType::Spiky),
            viscosity_kernel: Some(KernelType::Viscosity),
            init_placement: InitPlacement::Block {
                min: vec2f(0.05, 0.05),
                max: vec2f(0.5, 0.6),
            },
            num_workers: None,
            task_batch_size: None,
            edge_margin: default_edge_margin(),
        }
    }
}

impl SimulationParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.h > 0. && self.h.is_finite()) {
            return Err(ConfigError::InvalidSupportRadius(self.h));
        }
        if !(self.dt > 0. && self.dt.is_finite()) {
            return Err(ConfigError::InvalidTimeStep(self.dt));
        }
        if self.particle_count == 0 {
            return Err(ConfigError::NoParticles);
        }
        if !(self.particle_mass > 0.) {
            return Err(ConfigError::InvalidParticleMass(self.particle_mass));
        }

        let d = self.domain;
        if !(d.right > d.left && d.top > d.bottom) {
            return Err(ConfigError::EmptyDomain {
                left: d.left,
                right: d.right,
                bottom: d.bottom,
                top: d.top,
            });
        }
        if !(self.edge_margin >= 0. && 2. * self.edge_margin < d.width() && 2. * self.edge_margin < d.height()) {
            return Err(ConfigError::InvalidEdgeMargin {
                margin: self.edge_margin,
                width: d.width(),
                height: d.height(),
            });
        }

        if self.num_workers == Some(0) {
            return Err(ConfigError::NoWorkers);
        }
        if !(self.density_kernel.peak_value(self.h) > 0.) {
            return Err(ConfigError::DegenerateDensityKernel(
                self.density_kernel.as_str_lowercase(),
            ));
        }

        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.num_workers.unwrap_or_else(available_parallelism)
    }

    pub fn batch_size(&self) -> usize {
        self.task_batch_size
            .unwrap_or(self.particle_count / TARGET_TASK_BATCHES)
            .max(1)
    }

    pub fn initial_positions(&self) -> Result<Vec<V2>, ConfigError> {
        self.init_placement.place(self.particle_count, self.domain)
    }
}
