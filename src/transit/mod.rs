//! Transit port allocation
//!
//! Every tunnel routed through a proxy needs a listener port on that proxy.
//! Ports are unique per proxy and drawn from a fixed range. The set of
//! reserved ports is never stored on its own; it is rebuilt on every pass
//! from the ports already recorded on the tunnels.
//!
//! Allocation is a pure function of the tunnel list: it returns the changes
//! needed to make the list collision-free and leaves persisting them to the
//! caller.
//!
//! # Algorithm
//!
//! 1. Walk tunnels in input order. The first tunnel to hold a port keeps it;
//!    a later tunnel holding the same port becomes pending again.
//! 2. For each pending tunnel, draw random ports from the range until one is
//!    not reserved, giving up after `range.width()` draws.
//!
//! Random probing keeps existing assignments spread over the range instead of
//! packing new tunnels into the lowest free ports, and bounding the draws to
//! the range width gives an exact worst case.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::crd::Tunnel;

/// Lowest transit port handed out (inclusive)
pub const TRANSIT_PORT_MIN: u16 = 10000;

/// Upper bound of the transit port range (exclusive)
pub const TRANSIT_PORT_MAX: u16 = 30000;

/// Half-open port range `[start, end)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// Create a range, rejecting empty ones
    pub fn new(start: u16, end: u16) -> Result<Self, crate::Error> {
        if start >= end {
            return Err(crate::Error::validation(format!(
                "port range {start}..{end} is empty"
            )));
        }
        Ok(Self { start, end })
    }

    /// First port in the range
    pub fn start(&self) -> u16 {
        self.start
    }

    /// One past the last port in the range
    pub fn end(&self) -> u16 {
        self.end
    }

    /// Number of ports in the range, also the probe budget per tunnel
    pub fn width(&self) -> usize {
        usize::from(self.end - self.start)
    }

    /// Whether `port` lies in the range
    pub fn contains(&self, port: u16) -> bool {
        (self.start..self.end).contains(&port)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: TRANSIT_PORT_MIN,
            end: TRANSIT_PORT_MAX,
        }
    }
}

/// Source of candidate ports
///
/// Implementations must return ports inside the given range.
pub trait PortProbe {
    /// Draw the next candidate port
    fn probe(&mut self, range: PortRange) -> u16;
}

/// Uniform random probe
#[derive(Debug)]
pub struct RandomProbe<R> {
    rng: R,
}

impl<R: Rng> RandomProbe<R> {
    /// Wrap an existing random number generator
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RandomProbe<StdRng> {
    /// Probe seeded from the operating system
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Probe with a fixed seed, for reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> PortProbe for RandomProbe<R> {
    fn probe(&mut self, range: PortRange) -> u16 {
        self.rng.gen_range(range.start..range.end)
    }
}

/// A tunnel whose transit port must change
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortChange {
    /// Position of the tunnel in the allocator's input
    pub index: usize,
    /// Tunnel name
    pub tunnel: String,
    /// Port recorded before this pass
    pub from: Option<u16>,
    /// Port to record, `None` clears a colliding port that could not be replaced
    pub to: Option<u16>,
}

/// Result of one allocation pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Tunnels whose port must be written, in input order
    pub changes: Vec<PortChange>,
    /// Tunnels for which no free port was found
    pub exhausted: Vec<String>,
}

impl Allocation {
    /// True when the input was already collision-free and fully assigned
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty() && self.exhausted.is_empty()
    }

    /// Apply the changes to the tunnels they were computed from
    ///
    /// Returns the changed tunnels.
    pub fn apply(&self, tunnels: &mut [Tunnel]) -> Vec<Tunnel> {
        self.changes
            .iter()
            .filter_map(|change| {
                let tunnel = tunnels.get_mut(change.index)?;
                tunnel.set_transit_port(change.to);
                Some(tunnel.clone())
            })
            .collect()
    }
}

/// Allocates transit ports within one proxy's port space
#[derive(Debug)]
pub struct PortAllocator<P = RandomProbe<StdRng>> {
    range: PortRange,
    probe: P,
}

impl PortAllocator {
    /// Random allocator over `range`
    pub fn random(range: PortRange) -> Self {
        Self::with_probe(range, RandomProbe::from_entropy())
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::random(PortRange::default())
    }
}

impl<P: PortProbe> PortAllocator<P> {
    /// Allocator drawing candidates from `probe`
    pub fn with_probe(range: PortRange, probe: P) -> Self {
        Self { range, probe }
    }

    /// Range ports are drawn from
    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Compute the port changes that make `tunnels` collision-free
    ///
    /// Tunnels already holding a unique port are never moved, including ports
    /// outside the range recorded by an earlier configuration. Input order
    /// decides who keeps a contested port.
    pub fn allocate(&mut self, tunnels: &[Tunnel]) -> Allocation {
        let mut reserved: HashSet<u16> = HashSet::with_capacity(tunnels.len());
        let mut pending = Vec::new();
        let mut colliding = Vec::new();

        for (index, tunnel) in tunnels.iter().enumerate() {
            match tunnel.transit_port() {
                Some(port) if reserved.insert(port) => {}
                Some(_) => colliding.push(index),
                None => pending.push(index),
            }
        }
        pending.extend(colliding);

        let mut allocation = Allocation::default();
        for index in pending {
            let tunnel = &tunnels[index];
            let from = tunnel.transit_port();
            let to = self.draw(&mut reserved);

            if to.is_none() {
                allocation.exhausted.push(tunnel_name(tunnel));
                if from.is_none() {
                    continue;
                }
            }
            allocation.changes.push(PortChange {
                index,
                tunnel: tunnel_name(tunnel),
                from,
                to,
            });
        }
        allocation.changes.sort_by_key(|c| c.index);
        allocation
    }

    fn draw(&mut self, reserved: &mut HashSet<u16>) -> Option<u16> {
        for _ in 0..self.range.width() {
            let port = self.probe.probe(self.range);
            if reserved.insert(port) {
                return Some(port);
            }
        }
        None
    }
}

fn tunnel_name(tunnel: &Tunnel) -> String {
    tunnel.metadata.name.clone().unwrap_or_default()
}
