//! Particle records and the per-tile store of real and ghost particles.

/// Fixed-size particle record.
///
/// `#[repr(C)]` and `Pod` so a slice of particles can be copied byte-for-byte
/// into an exchange buffer and read back on another rank.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Particle {
    /// Position (domain units).
    pub pos: [f64; 3],
    /// Velocity.
    pub vel: [f64; 3],
    /// Acceleration accumulator, rewritten by every force evaluation.
    pub acc: [f64; 3],
    /// Id, unique among particles created by the same rank.
    pub id: u64,
    /// Rank that created the particle. `(id, cpu)` is globally unique.
    pub cpu: u32,
    /// Explicit tail padding.
    pub _pad: u32,
}

impl Particle {
    /// Create a particle at rest with zero acceleration.
    pub fn new(id: u64, cpu: u32, pos: [f64; 3]) -> Self {
        Self {
            pos,
            vel: [0.0; 3],
            acc: [0.0; 3],
            id,
            cpu,
            _pad: 0,
        }
    }

    /// Same particle with velocity `vel`.
    pub fn with_velocity(mut self, vel: [f64; 3]) -> Self {
        self.vel = vel;
        self
    }

    /// Globally unique identity of the particle.
    pub fn key(&self) -> (u32, u64) {
        (self.cpu, self.id)
    }

    /// Squared distance between two particles.
    #[inline]
    pub fn distance_sq(&self, other: &Particle) -> f64 {
        let dx = self.pos[0] - other.pos[0];
        let dy = self.pos[1] - other.pos[1];
        let dz = self.pos[2] - other.pos[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// Hands out particle ids for one rank.
#[derive(Debug, Clone)]
pub struct ParticleIdAllocator {
    cpu: u32,
    next: u64,
}

impl ParticleIdAllocator {
    /// Allocator for particles created on rank `cpu`; ids start at 1.
    pub fn new(cpu: u32) -> Self {
        Self { cpu, next: 1 }
    }

    /// Create a new particle at `pos` with the next free id.
    pub fn create(&mut self, pos: [f64; 3]) -> Particle {
        let id = self.next;
        self.next += 1;
        Particle::new(id, self.cpu, pos)
    }
}

/// Particles of one (grid, tile): real particles first, then the ghost segment.
///
/// The ghost segment is rebuilt from scratch each exchange cycle;
/// [`ParticleTile::clear_ghosts`] drops it without releasing the storage.
#[derive(Debug, Clone, Default)]
pub struct ParticleTile {
    particles: Vec<Particle>,
    num_real: usize,
}

impl ParticleTile {
    /// Create an empty tile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of owned particles.
    pub fn num_real(&self) -> usize {
        self.num_real
    }

    /// Number of ghost copies currently held.
    pub fn num_ghosts(&self) -> usize {
        self.particles.len() - self.num_real
    }

    /// Real plus ghost count.
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// True if the tile holds neither real nor ghost particles.
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// The owned particles.
    pub fn real(&self) -> &[Particle] {
        &self.particles[..self.num_real]
    }

    /// The owned particles, mutably.
    pub fn real_mut(&mut self) -> &mut [Particle] {
        &mut self.particles[..self.num_real]
    }

    /// The ghost segment.
    pub fn ghosts(&self) -> &[Particle] {
        &self.particles[self.num_real..]
    }

    /// Real followed by ghost particles.
    pub fn all(&self) -> &[Particle] {
        &self.particles
    }

    /// Real followed by ghost particles, mutably.
    pub fn all_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// Add an owned particle. It is placed before any ghosts, so ghost
    /// indices held elsewhere (neighbor lists) are invalidated.
    pub fn push_real(&mut self, p: Particle) {
        self.particles.insert(self.num_real, p);
        self.num_real += 1;
    }

    /// Add owned particles in bulk; any existing ghosts are dropped first.
    pub fn extend_real(&mut self, particles: &[Particle]) {
        self.clear_ghosts();
        self.particles.extend_from_slice(particles);
        self.num_real = self.particles.len();
    }

    /// Append ghost copies to the end of the ghost segment.
    pub fn append_ghosts(&mut self, ghosts: &[Particle]) {
        self.particles.extend_from_slice(ghosts);
    }

    /// Drop every ghost, keeping the allocation.
    pub fn clear_ghosts(&mut self) {
        self.particles.truncate(self.num_real);
    }

    /// Remove and return the real particles matching `leaving`.
    ///
    /// Ghosts are cleared first. The relative order of the remaining real
    /// particles is preserved.
    pub fn drain_real_where<F>(&mut self, mut leaving: F) -> Vec<Particle>
    where
        F: FnMut(&Particle) -> bool,
    {
        self.clear_ghosts();
        let mut gone = Vec::new();
        self.particles.retain(|p| {
            if leaving(p) {
                gone.push(*p);
                false
            } else {
                true
            }
        });
        self.num_real = self.particles.len();
        gone
    }
}
