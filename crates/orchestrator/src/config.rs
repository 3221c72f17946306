//! Configuration parsing and validation for decomposed MD runs

use serde::{Deserialize, Serialize};
use std::fs;

use kernel::{ForceParams, Geometry, IntBox};

use crate::decomposition::{BoxArray, Decomposition, DistributionMapping};

/// Main simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable run name
    #[serde(default = "default_name")]
    pub name: String,
    /// Physical low corner of the domain
    #[serde(default = "default_prob_lo")]
    pub prob_lo: [f64; 3],
    /// Physical high corner of the domain
    #[serde(default = "default_prob_hi")]
    pub prob_hi: [f64; 3],
    /// Cells per axis
    #[serde(default = "default_num_cells")]
    pub num_cells: [i32; 3],
    /// Largest grid edge in cells when chopping the domain
    #[serde(default = "default_max_grid_size")]
    pub max_grid_size: i32,
    /// Periodicity per axis
    #[serde(default = "default_is_periodic")]
    pub is_periodic: [bool; 3],
    /// Ghost shell depth in cells
    #[serde(default = "default_neighbor_cells")]
    pub neighbor_cells: i32,
    /// Initial particles per cell along each axis
    #[serde(default = "default_particles_per_cell")]
    pub particles_per_cell: [usize; 3],
    /// Mean of each initial velocity component
    #[serde(default)]
    pub thermal_momentum_mean: f64,
    /// Standard deviation of each initial velocity component
    #[serde(default = "default_thermal_momentum_std")]
    pub thermal_momentum_std: f64,
    /// Interaction cutoff radius
    #[serde(default = "default_cutoff")]
    pub cutoff: f64,
    /// Separation below which the force law is clamped
    #[serde(default = "default_min_r")]
    pub min_r: f64,
    /// Particle mass
    #[serde(default = "default_mass")]
    pub mass: f64,
    /// Timestep
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Number of steps to run
    #[serde(default = "default_num_steps")]
    pub num_steps: u64,
    /// Redistribute and rebuild neighbor lists every this many steps
    #[serde(default = "default_list_rebuild_interval")]
    pub list_rebuild_interval: u64,
    /// Ranks to run as in-process threads
    #[serde(default = "default_num_ranks")]
    pub num_ranks: usize,
    /// Seed of the initial velocity streams
    #[serde(default = "default_seed")]
    pub seed: u64,
}

// Default values
fn default_name() -> String {
    "md".to_string()
}

fn default_prob_lo() -> [f64; 3] {
    [0.0; 3]
}

fn default_prob_hi() -> [f64; 3] {
    [1.0; 3]
}

fn default_num_cells() -> [i32; 3] {
    [32; 3]
}

fn default_max_grid_size() -> i32 {
    16
}

fn default_is_periodic() -> [bool; 3] {
    [true; 3]
}

fn default_neighbor_cells() -> i32 {
    1
}

fn default_particles_per_cell() -> [usize; 3] {
    [1; 3]
}

fn default_thermal_momentum_std() -> f64 {
    1.0
}

fn default_cutoff() -> f64 {
    0.03
}

fn default_min_r() -> f64 {
    1.0e-4
}

fn default_mass() -> f64 {
    1.0
}

fn default_dt() -> f64 {
    5.0e-4
}

fn default_num_steps() -> u64 {
    10
}

fn default_list_rebuild_interval() -> u64 {
    5
}

fn default_num_ranks() -> usize {
    1
}

fn default_seed() -> u64 {
    451
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            prob_lo: default_prob_lo(),
            prob_hi: default_prob_hi(),
            num_cells: default_num_cells(),
            max_grid_size: default_max_grid_size(),
            is_periodic: default_is_periodic(),
            neighbor_cells: default_neighbor_cells(),
            particles_per_cell: default_particles_per_cell(),
            thermal_momentum_mean: 0.0,
            thermal_momentum_std: default_thermal_momentum_std(),
            cutoff: default_cutoff(),
            min_r: default_min_r(),
            mass: default_mass(),
            dt: default_dt(),
            num_steps: default_num_steps(),
            list_rebuild_interval: default_list_rebuild_interval(),
            num_ranks: default_num_ranks(),
            seed: default_seed(),
        }
    }
}

impl SimulationConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        let config: SimulationConfig = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse config JSON: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        for d in 0..3 {
            if self.prob_lo[d] >= self.prob_hi[d] {
                return Err(format!("prob_lo[{d}] must be less than prob_hi[{d}]"));
            }
            if self.num_cells[d] <= 0 {
                return Err(format!("num_cells[{d}] must be positive"));
            }
            if self.particles_per_cell[d] == 0 {
                return Err(format!("particles_per_cell[{d}] must be at least 1"));
            }
        }

        if self.max_grid_size <= 0 {
            return Err("max_grid_size must be positive".to_string());
        }
        if self.neighbor_cells <= 0 {
            return Err("neighbor_cells must be at least 1".to_string());
        }

        // Every grid needs an interior once the shell is cut away
        let grids = BoxArray::chop(&self.domain(), self.max_grid_size);
        for (i, bx) in grids.boxes().iter().enumerate() {
            let size = bx.size();
            if size.iter().any(|&n| 2 * self.neighbor_cells > n) {
                return Err(format!(
                    "grid {} has extent {:?}, too small for a shell of {} cells",
                    i, size, self.neighbor_cells
                ));
            }
        }

        if self.cutoff <= 0.0 {
            return Err("cutoff must be positive".to_string());
        }
        let min_dx = self.geometry().cell_size().into_iter().fold(f64::INFINITY, f64::min);
        let reach = self.neighbor_cells as f64 * min_dx;
        if self.cutoff > reach {
            return Err(format!(
                "cutoff {} exceeds the ghost shell reach {} ({} cells of {})",
                self.cutoff, reach, self.neighbor_cells, min_dx
            ));
        }
        if self.min_r <= 0.0 {
            return Err("min_r must be positive".to_string());
        }
        if self.mass <= 0.0 {
            return Err("mass must be positive".to_string());
        }
        if self.thermal_momentum_std <= 0.0 {
            return Err("thermal_momentum_std must be positive".to_string());
        }
        if self.dt <= 0.0 {
            return Err("dt must be positive".to_string());
        }
        if self.list_rebuild_interval == 0 {
            return Err("list_rebuild_interval must be at least 1".to_string());
        }
        if self.num_ranks == 0 {
            return Err("num_ranks must be at least 1".to_string());
        }

        Ok(())
    }

    /// Index domain `[0, num_cells)`.
    pub fn domain(&self) -> IntBox {
        IntBox::new(
            [0; 3],
            [self.num_cells[0] - 1, self.num_cells[1] - 1, self.num_cells[2] - 1],
        )
    }

    /// Problem geometry.
    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.prob_lo, self.prob_hi, self.domain(), self.is_periodic)
    }

    /// Domain chopped into grids, dealt round-robin to `num_ranks` ranks.
    pub fn decomposition(&self, num_ranks: usize) -> Decomposition {
        let grids = BoxArray::chop(&self.domain(), self.max_grid_size);
        let dmap = DistributionMapping::round_robin(grids.len(), num_ranks);
        Decomposition::new(self.geometry(), grids, dmap)
    }

    /// Force-law parameters.
    pub fn force_params(&self) -> ForceParams {
        ForceParams {
            cutoff: self.cutoff,
            min_r: self.min_r,
            mass: self.mass,
        }
    }
}
