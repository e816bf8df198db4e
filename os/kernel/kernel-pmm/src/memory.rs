use crate::config::NodeConfig;
use crate::error::PmmError;
use crate::node::{Allocation, PhysicalMemoryNode};
use crate::page::{MigrationType, UsageClass};
use crate::policy::AllocPolicy;
use alloc::vec::Vec;
use kernel_info::boot::BootMemoryInfo;
use kernel_info::memory::MAX_NODES;
use kernel_memory_addresses::PhysicalAddress;
use log::{debug, info, warn};

/// Allocator context owning every physical memory node.
///
/// Built once at boot; node geometry is fixed before any free-list is
/// populated. Frees are routed to the node containing the address.
#[derive(Debug)]
pub struct PhysicalMemory {
    nodes: Vec<PhysicalMemoryNode>,
}

impl PhysicalMemory {
    /// Build one node per configuration; node ids follow slice order.
    ///
    /// # Errors
    /// [`PmmError::InvalidLayout`] if there are no nodes, too many nodes,
    /// overlapping nodes, or a node layout is rejected.
    pub fn new(configs: &[NodeConfig]) -> Result<Self, PmmError> {
        if configs.is_empty() || configs.len() > MAX_NODES {
            return Err(PmmError::InvalidLayout("bad node count"));
        }
        let mut nodes: Vec<PhysicalMemoryNode> = Vec::with_capacity(configs.len());
        for (id, config) in configs.iter().enumerate() {
            let node = PhysicalMemoryNode::new(id as u8, config)?;
            let overlaps = nodes.iter().any(|n| {
                node.base() < n.base() + n.size() && n.base() < node.base() + node.size()
            });
            if overlaps {
                return Err(PmmError::InvalidLayout("overlapping nodes"));
            }
            nodes.push(node);
        }
        info!("physical memory: {} nodes", nodes.len());
        Ok(Self { nodes })
    }

    /// Build from the boot hand-off with default per-node tunables.
    ///
    /// # Errors
    /// See [`Self::new`].
    pub fn from_boot_info(boot: &BootMemoryInfo) -> Result<Self, PmmError> {
        let configs: Vec<NodeConfig> = boot.nodes().iter().copied().map(NodeConfig::new).collect();
        Self::new(&configs)
    }

    #[must_use]
    pub fn nodes(&self) -> &[PhysicalMemoryNode] {
        &self.nodes
    }

    #[must_use]
    pub fn node(&self, id: usize) -> Option<&PhysicalMemoryNode> {
        self.nodes.get(id)
    }

    /// Node whose range contains `paddr`.
    #[must_use]
    pub fn node_of(&self, paddr: PhysicalAddress) -> Option<&PhysicalMemoryNode> {
        self.nodes.iter().find(|n| n.contains(paddr))
    }

    /// Allocate `npages` for `usage` and return the head address.
    ///
    /// # Errors
    /// See [`Self::alloc_pages`].
    pub fn alloc(&self, node: usize, npages: u64, usage: UsageClass) -> Result<PhysicalAddress, PmmError> {
        self.alloc_pages(node, npages, usage).map(|a| a.head())
    }

    /// Allocate `npages` for `usage`, preferring `node`.
    ///
    /// A movable request the preferred node cannot serve is retried whole on
    /// the other nodes.
    ///
    /// # Errors
    /// [`PmmError::InvalidArgs`] for a zero count, an unknown node or a count
    /// the usage class rejects; [`PmmError::OutOfMemory`] if no node can
    /// serve the request.
    pub fn alloc_pages(&self, node: usize, npages: u64, usage: UsageClass) -> Result<Allocation, PmmError> {
        if npages == 0 {
            return Err(PmmError::InvalidArgs);
        }
        let home = self.node(node).ok_or(PmmError::InvalidArgs)?;
        match home.alloc(npages, usage) {
            Err(PmmError::OutOfMemory) if AllocPolicy::for_usage(usage, npages)?.class == MigrationType::Movable => {
                self.lend(node, npages, usage)
            }
            res => res,
        }
    }

    fn lend(&self, home: usize, npages: u64, usage: UsageClass) -> Result<Allocation, PmmError> {
        for lender in self.nodes.iter().filter(|n| usize::from(n.id()) != home) {
            match lender.lend(npages, usage) {
                Ok(a) => {
                    debug!("node {home}: borrowed {} pages from node {}", a.pages(), lender.id());
                    return Ok(a);
                }
                Err(PmmError::OutOfMemory) => {}
                Err(e) => return Err(e),
            }
        }
        warn!("node {home}: out of memory for {npages} pages");
        Err(PmmError::OutOfMemory)
    }

    /// Free the allocation headed by `paddr`; returns the pages released.
    ///
    /// # Errors
    /// [`PmmError::InvalidArgs`] if no node contains `paddr` or the node
    /// rejects the free.
    pub fn free(&self, paddr: PhysicalAddress) -> Result<u64, PmmError> {
        self.node_of(paddr)
            .ok_or(PmmError::InvalidArgs)?
            .decompose(paddr)
    }

    #[must_use]
    pub fn page_private(&self, paddr: PhysicalAddress) -> Option<u64> {
        self.node_of(paddr)?.page_private(paddr)
    }

    #[must_use]
    pub fn set_page_private(&self, paddr: PhysicalAddress, value: u64) -> bool {
        self.node_of(paddr)
            .is_some_and(|n| n.set_page_private(paddr, value))
    }

    /// Pages on the movable free-lists of all nodes.
    #[must_use]
    pub fn free_pages(&self) -> u64 {
        self.nodes.iter().map(PhysicalMemoryNode::free_pages).sum()
    }

    pub fn dump(&self) {
        for node in &self.nodes {
            node.dump();
        }
    }
}
