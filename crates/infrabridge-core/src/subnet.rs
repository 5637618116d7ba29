//! Per-backend partitioning of a tenant address space into fixed-size blocks.
//!
//! Every backend owns one [`SubnetAllocator`]. Blocks are handed out in address
//! order and returned blocks are queued behind the untouched range, so the
//! allocator never materialises the whole free list up front.

use crate::{CoreError, Result};
use ipnet::Ipv4Net;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Addresses per block.
pub const SUBNET_SIZE: u32 = 32;
/// Prefix length of one block.
pub const SUBNET_PREFIX: u8 = (32 - SUBNET_SIZE.trailing_zeros()) as u8;
pub const DEFAULT_CIDR: &str = "10.0.0.0/8";

const CIDR2MASK: [u32; 33] = [
    0x00000000, 0x80000000, 0xC0000000, 0xE0000000, 0xF0000000, 0xF8000000, 0xFC000000,
    0xFE000000, 0xFF000000, 0xFF800000, 0xFFC00000, 0xFFE00000, 0xFFF00000, 0xFFF80000,
    0xFFFC0000, 0xFFFE0000, 0xFFFF0000, 0xFFFF8000, 0xFFFFC000, 0xFFFFE000, 0xFFFFF000,
    0xFFFFF800, 0xFFFFFC00, 0xFFFFFE00, 0xFFFFFF00, 0xFFFFFF80, 0xFFFFFFC0, 0xFFFFFFE0,
    0xFFFFFFF0, 0xFFFFFFF8, 0xFFFFFFFC, 0xFFFFFFFE, 0xFFFFFFFF,
];

fn parse_cidr(cidr: &str) -> Result<(u32, u8)> {
    let net: Ipv4Net = cidr
        .trim()
        .parse()
        .map_err(|_| CoreError::InvalidCidr(cidr.to_string()))?;
    Ok((u32::from(net.addr()), net.prefix_len()))
}

fn render_block(start: u32) -> String {
    format!("{}/{}", Ipv4Addr::from(start), SUBNET_PREFIX)
}

/// First host address of `cidr`.
pub fn gateway(cidr: &str) -> Result<String> {
    let (addr, prefix) = parse_cidr(cidr)?;
    let network = addr & CIDR2MASK[prefix as usize];
    Ok(Ipv4Addr::from(network.wrapping_add(1)).to_string())
}

#[derive(Debug, Clone)]
pub struct SubnetAllocator {
    base: String,
    next: u64,
    end: u64,
    returned: VecDeque<u32>,
    reservations: HashMap<String, Vec<u32>>,
    total: usize,
}

impl SubnetAllocator {
    /// Partitions `cidr` (or [`DEFAULT_CIDR`]) into blocks of [`SUBNET_SIZE`] addresses.
    pub fn initialize(cidr: Option<&str>) -> Result<Self> {
        let base = cidr.unwrap_or(DEFAULT_CIDR);
        let (addr, prefix) = parse_cidr(base)?;
        let network = addr & CIDR2MASK[prefix as usize];
        let span = 1u64 << (32 - u32::from(prefix));
        let blocks = span / u64::from(SUBNET_SIZE);

        debug!(cidr = %base, blocks, "Initialized subnet allocator");

        Ok(Self {
            base: base.to_string(),
            next: u64::from(network),
            end: u64::from(network) + blocks * u64::from(SUBNET_SIZE),
            returned: VecDeque::new(),
            reservations: HashMap::new(),
            total: blocks as usize,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn free_count(&self) -> usize {
        ((self.end - self.next) / u64::from(SUBNET_SIZE)) as usize + self.returned.len()
    }

    pub fn reserved_count(&self) -> usize {
        self.reservations.values().map(Vec::len).sum()
    }

    pub fn reservation(&self, instance_id: &str) -> Option<Vec<String>> {
        self.reservations
            .get(instance_id)
            .map(|blocks| blocks.iter().copied().map(render_block).collect())
    }

    /// Reserves `count` blocks for `instance_id`.
    ///
    /// An existing reservation is returned unchanged. Returns `None` without
    /// touching the pool when fewer than `count` blocks are free.
    pub fn reserve(&mut self, instance_id: &str, count: usize) -> Option<Vec<String>> {
        if let Some(existing) = self.reservation(instance_id) {
            return Some(existing);
        }
        if count > self.free_count() {
            return None;
        }

        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let block = if self.next < self.end {
                let start = self.next as u32;
                self.next += u64::from(SUBNET_SIZE);
                start
            } else {
                self.returned.pop_front()?
            };
            blocks.push(block);
        }

        let rendered = blocks.iter().copied().map(render_block).collect();
        self.reservations.insert(instance_id.to_string(), blocks);
        Some(rendered)
    }

    /// Returns the blocks of `instance_id` to the pool.
    pub fn free(&mut self, instance_id: &str) -> Result<()> {
        let blocks = self.reservations.remove(instance_id).ok_or_else(|| {
            CoreError::InconsistentState(format!(
                "Impossible to de-allocate. Instance {instance_id} has no reservation"
            ))
        })?;
        self.returned.extend(blocks);
        Ok(())
    }
}

/// Allocators keyed by backend id, behind a single lock.
#[derive(Debug, Default)]
pub struct SubnetPools {
    pools: Mutex<HashMap<String, SubnetAllocator>>,
}

impl SubnetPools {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_pools<T>(&self, f: impl FnOnce(&mut HashMap<String, SubnetAllocator>) -> Result<T>) -> Result<T> {
        let mut pools = self
            .pools
            .lock()
            .map_err(|_| CoreError::InconsistentState("subnet pool lock poisoned".to_string()))?;
        f(&mut pools)
    }

    /// Reserves on the pool of `backend_id`, creating it from `cidr` on first use.
    pub fn reserve(
        &self,
        backend_id: &str,
        cidr: Option<&str>,
        instance_id: &str,
        count: usize,
    ) -> Result<Option<Vec<String>>> {
        self.with_pools(|pools| {
            if !pools.contains_key(backend_id) {
                pools.insert(backend_id.to_string(), SubnetAllocator::initialize(cidr)?);
            }
            let pool = pools
                .get_mut(backend_id)
                .ok_or_else(|| CoreError::InconsistentState(backend_id.to_string()))?;
            let reserved = pool.reserve(instance_id, count);
            if reserved.is_none() {
                warn!(
                    backend = %backend_id,
                    instance = %instance_id,
                    requested = count,
                    free = pool.free_count(),
                    "Subnet pool exhausted"
                );
            }
            Ok(reserved)
        })
    }

    pub fn free(&self, backend_id: &str, instance_id: &str) -> Result<()> {
        self.with_pools(|pools| match pools.get_mut(backend_id) {
            Some(pool) => pool.free(instance_id),
            None => Err(CoreError::InconsistentState(format!(
                "No subnet pool for backend {backend_id}"
            ))),
        })
    }

    pub fn reservation(&self, backend_id: &str, instance_id: &str) -> Result<Option<Vec<String>>> {
        self.with_pools(|pools| {
            Ok(pools
                .get(backend_id)
                .and_then(|pool| pool.reservation(instance_id)))
        })
    }

    pub fn free_count(&self, backend_id: &str) -> Result<Option<usize>> {
        self.with_pools(|pools| Ok(pools.get(backend_id).map(SubnetAllocator::free_count)))
    }

    /// Drops the pool of a removed backend.
    pub fn remove_pool(&self, backend_id: &str) -> Result<()> {
        self.with_pools(|pools| {
            pools.remove(backend_id);
            Ok(())
        })
    }
}
