use std::ops::Range;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::TenantId;

pub const TENANT_ID_RANGE: Range<u32> = 0..50_000;
pub const API_SERVER_PORT_RANGE: Range<u16> = 7_000..8_000;
pub const CONTROLLER_MANAGER_PORT_RANGE: Range<u16> = 11_000..12_000;

/// The identifier and ports handed to one new tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub id: TenantId,
    pub api_server_port: u16,
    pub controller_manager_port: u16,
}

/// Source of tenant identifiers and ports.
///
/// Implementations do not know which tenants already exist; the provisioning
/// workflow is responsible for rejecting identifiers that are taken.
pub trait Allocator {
    fn allocate(&mut self) -> Allocation;
}

/// Draws from the fixed ranges using a generator seeded once at startup.
#[derive(Debug)]
pub struct RandomAllocator {
    rng: StdRng,
}

impl RandomAllocator {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Allocator for RandomAllocator {
    fn allocate(&mut self) -> Allocation {
        Allocation {
            id: TenantId::from_number(self.rng.gen_range(TENANT_ID_RANGE)),
            api_server_port: self.rng.gen_range(API_SERVER_PORT_RANGE),
            controller_manager_port: self.rng.gen_range(CONTROLLER_MANAGER_PORT_RANGE),
        }
    }
}

/// Hands out a fixed sequence, repeating the last entry once exhausted.
#[cfg(test)]
pub(crate) struct FixedAllocator {
    pub allocations: Vec<Allocation>,
    pub next: usize,
}

#[cfg(test)]
impl FixedAllocator {
    pub fn new(allocations: Vec<Allocation>) -> Self {
        assert!(!allocations.is_empty());
        Self {
            allocations,
            next: 0,
        }
    }
}

#[cfg(test)]
impl Allocator for FixedAllocator {
    fn allocate(&mut self) -> Allocation {
        let i = self.next.min(self.allocations.len() - 1);
        self.next += 1;
        self.allocations[i].clone()
    }
}
