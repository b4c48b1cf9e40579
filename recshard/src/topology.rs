//! Device topology and process-group coordinates.

use crate::error::{Error, Result};

/// The device fleet a plan targets: `world_size` identical devices, each
/// with the same memory budget.
///
/// The budget is reported against by
/// [`ShardingPlan::device_memory_bytes`](crate::ShardingPlan::device_memory_bytes)
/// rather than enforced; a plan that oversubscribes a device is still a
/// valid plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    world_size: usize,
    per_device_memory: usize,
}

impl Topology {
    /// A fleet of `world_size` devices with `per_device_memory` bytes each.
    ///
    /// # Errors
    /// Returns `Error::Config` if `world_size` is 0.
    pub fn new(world_size: usize, per_device_memory: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(Error::Config("world_size must be at least 1".to_string()));
        }
        Ok(Self {
            world_size,
            per_device_memory,
        })
    }

    #[must_use]
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Memory budget per device, in bytes.
    #[must_use]
    pub fn per_device_memory(&self) -> usize {
        self.per_device_memory
    }
}

/// Process-group coordinates, collected once at startup instead of being
/// re-read from the environment at each use site.
///
/// The variable names follow the common launcher convention:
/// `MASTER_ADDR`, `MASTER_PORT`, `WORLD_SIZE`, `RANK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEnv {
    /// Rendezvous host for the process group.
    pub master_addr: String,
    /// Rendezvous port.
    pub master_port: u16,
    /// Number of participating processes.
    pub world_size: usize,
    /// This process's rank (`0..world_size`).
    pub rank: usize,
}

impl ProcessEnv {
    /// Validate explicitly supplied coordinates.
    ///
    /// # Errors
    /// Returns `Error::Config` if `world_size` is 0 or `rank` is out of
    /// range.
    pub fn new(
        master_addr: String,
        master_port: u16,
        world_size: usize,
        rank: usize,
    ) -> Result<Self> {
        if world_size == 0 {
            return Err(Error::Config("WORLD_SIZE must be at least 1".to_string()));
        }
        if rank >= world_size {
            return Err(Error::Config(format!(
                "rank {rank} out of range for world_size {world_size}"
            )));
        }
        Ok(Self {
            master_addr,
            master_port,
            world_size,
            rank,
        })
    }

    /// Read and validate the four coordination variables from the
    /// environment.
    ///
    /// # Errors
    /// Returns `Error::Config` if any variable is missing, fails to parse,
    /// or describes an invalid group.
    pub fn from_env() -> Result<Self> {
        let master_addr = read_var("MASTER_ADDR")?;
        let master_port = parse_var::<u16>("MASTER_PORT")?;
        let world_size = parse_var::<usize>("WORLD_SIZE")?;
        let rank = parse_var::<usize>("RANK")?;
        Self::new(master_addr, master_port, world_size, rank)
    }

    /// The topology this process group spans, given a per-device budget.
    #[must_use]
    pub fn topology(&self, per_device_memory: usize) -> Topology {
        Topology {
            world_size: self.world_size,
            per_device_memory,
        }
    }
}

fn read_var(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| Error::Config(format!("{name} is not set")))
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<T> {
    let raw = read_var(name)?;
    raw.parse()
        .map_err(|_| Error::Config(format!("{name} has invalid value '{raw}'")))
}
