use kernel_info::boot::{BootMemoryInfo, MemoryNodeInfo};
use kernel_info::memory::{MEMBASE, MEMSIZE, RESERVED_MEMBASE};
use kernel_info::tunables::UNMOV_MAX_NR;
use kernel_memory_addresses::{PAGE_SHIFT, PhysicalAddress};
use kernel_pmm::{
    MigrationType, NodeConfig, NodeStatus, PageState, PhysicalMemory, PhysicalMemoryNode, PmmError,
    UsageClass,
};

const TWO_MIB: u64 = 0x20_0000;

fn small_node(cpus: usize, pcp_capacity: usize) -> PhysicalMemoryNode {
    let cfg = NodeConfig::new(MemoryNodeInfo::new(MEMBASE, TWO_MIB))
        .with_cpus(cpus)
        .with_pcp_capacity(pcp_capacity);
    PhysicalMemoryNode::new(0, &cfg).unwrap()
}

fn platform() -> PhysicalMemory {
    PhysicalMemory::from_boot_info(&BootMemoryInfo::default()).unwrap()
}

#[test]
fn platform_node_carves_reserved_window_as_unmovable() {
    let pm = platform();
    let node = pm.node(0).unwrap();
    let reserved = UNMOV_MAX_NR;
    assert_eq!(node.budget(MigrationType::Unmovable), reserved);
    assert_eq!(node.free_pages(), (MEMSIZE >> PAGE_SHIFT) - reserved);
    let stats = node.stats();
    assert!(stats.is_conserved());
    assert!(node.free_lists_consistent());
}

#[test]
fn boot_reserved_takes_the_whole_window() {
    let pm = platform();
    let a = pm
        .alloc_pages(0, UNMOV_MAX_NR, UsageClass::BootReserved)
        .unwrap();
    assert_eq!(a.head(), PhysicalAddress::new(RESERVED_MEMBASE));
    assert_eq!(a.pages(), UNMOV_MAX_NR);

    let node = pm.node(0).unwrap();
    assert_eq!(node.budget(MigrationType::Unmovable), 0);
    let flags = node.page_flags(a.head()).unwrap();
    assert_eq!(flags.state(), PageState::NoMovable);
    assert_eq!(flags.usage(), UsageClass::BootReserved);

    assert_eq!(pm.free(a.head()), Ok(UNMOV_MAX_NR));
    assert_eq!(node.budget(MigrationType::Unmovable), UNMOV_MAX_NR);
    assert!(node.stats().is_conserved());
}

#[test]
fn boot_reserved_rejects_odd_counts() {
    let pm = platform();
    assert_eq!(
        pm.alloc(0, 12, UsageClass::BootReserved),
        Err(PmmError::InvalidArgs)
    );
}

#[test]
fn debug_pages_are_bounded_by_quota() {
    let pm = platform();
    let held = pm.alloc(0, UNMOV_MAX_NR, UsageClass::DebugFixed).unwrap();
    assert_eq!(pm.node(0).unwrap().stats().debug_pages, UNMOV_MAX_NR);
    assert_eq!(pm.alloc(0, 1, UsageClass::DebugFixed), Err(PmmError::InvalidArgs));

    pm.free(held).unwrap();
    assert_eq!(pm.node(0).unwrap().stats().debug_pages, 0);
    let one = pm.alloc(0, 1, UsageClass::DebugFixed).unwrap();
    pm.free(one).unwrap();
    assert_eq!(pm.alloc(0, 3, UsageClass::DebugFixed), Err(PmmError::InvalidArgs));
}

#[test]
fn unmovable_request_migrates_from_movable_pool() {
    let pm = platform();
    let window = pm.alloc(0, UNMOV_MAX_NR, UsageClass::BootReserved).unwrap();
    let a = pm.alloc_pages(0, 2, UsageClass::BootReserved).unwrap();
    let node = pm.node(0).unwrap();

    let flags = node.page_flags(a.head()).unwrap();
    assert_eq!(flags.state(), PageState::NoMovable);
    assert_eq!(flags.home(), MigrationType::Movable);
    assert!(a.head() < PhysicalAddress::new(RESERVED_MEMBASE));

    // goes back to the pool it was taken from
    pm.free(a.head()).unwrap();
    pm.free(window).unwrap();
    assert_eq!(node.free_pages(), (MEMSIZE >> PAGE_SHIFT) - UNMOV_MAX_NR);
    assert!(node.stats().is_conserved());
    assert!(node.free_lists_consistent());
}

#[test]
fn contiguous_preferred_builds_a_chain() {
    let pm = platform();
    let a = pm
        .alloc_pages(0, 5, UsageClass::ContiguousPreferred)
        .unwrap();
    assert!(a.is_compound());
    assert_eq!(a.pages(), 5);
    assert_eq!(a.blocks()[0].order(), 2);
    assert_eq!(a.blocks()[1].order(), 0);

    let node = pm.node(0).unwrap();
    assert_eq!(node.stats().compound_allocations, 1);
    assert_eq!(
        node.page_flags(a.head()).unwrap().state(),
        PageState::MovableComp
    );
    // only the head releases the chain
    assert_eq!(pm.free(a.blocks()[1].addr()), Err(PmmError::InvalidArgs));
    assert_eq!(pm.free(a.head()), Ok(5));
    assert_eq!(node.stats().compound_allocations, 0);
    assert!(node.stats().is_conserved());
}

#[test]
fn required_contiguity_rounds_up() {
    let pm = platform();
    let a = pm.alloc_pages(0, 3, UsageClass::ContiguousRequired).unwrap();
    assert!(!a.is_compound());
    assert_eq!(a.pages(), 4);
    assert_eq!(pm.free(a.head()), Ok(4));
}

#[test]
fn invalid_requests() {
    let pm = platform();
    assert_eq!(pm.alloc(0, 0, UsageClass::GenericObject), Err(PmmError::InvalidArgs));
    assert_eq!(pm.alloc(7, 1, UsageClass::GenericObject), Err(PmmError::InvalidArgs));
    assert_eq!(pm.alloc(0, 4, UsageClass::Undefined), Err(PmmError::InvalidArgs));
    assert_eq!(pm.free(PhysicalAddress::new(0x1000)), Err(PmmError::InvalidArgs));

    let pa = pm.alloc(0, 4, UsageClass::MmuBlock).unwrap();
    assert_eq!(pm.free(pa), Ok(4));
    assert_eq!(pm.free(pa), Err(PmmError::InvalidArgs));
}

#[test]
fn request_over_budget_fails_early() {
    let node = small_node(1, 16);
    assert_eq!(
        node.alloc(1024, UsageClass::ContiguousRequired),
        Err(PmmError::OutOfMemory)
    );
    assert_eq!(node.status(), NodeStatus::Idle);
}

#[test]
fn pcp_cache_serves_hot_pages_and_evicts_cold_ones() {
    let node = small_node(1, 4);
    let pages: Vec<_> = (0..8)
        .map(|_| node.alloc(1, UsageClass::GenericObject).unwrap().head())
        .collect();
    assert_eq!(
        node.page_flags(pages[0]).unwrap().state(),
        PageState::Pcp
    );
    for &pa in &pages {
        assert_eq!(node.decompose(pa), Ok(1));
    }

    let stats = node.stats();
    assert_eq!(stats.pcp_pages, vec![3]);
    assert!(stats.is_conserved());

    // the most recently freed page is handed out first
    let hot = node.alloc(1, UsageClass::GenericObject).unwrap();
    assert_eq!(hot.head(), pages[7]);
    assert_eq!(node.stats().pcp_pages, vec![2]);
}

#[test]
fn backward_search_assembles_fragmented_memory() {
    let node = small_node(1, 16);
    let pages: Vec<_> = (0..512)
        .map(|_| node.compound(1, MigrationType::Movable, false).unwrap().head())
        .collect();
    assert_eq!(node.free_pages(), 0);
    for pa in pages.iter().step_by(2) {
        node.decompose(*pa).unwrap();
    }
    assert_eq!(node.free_pages(), 256);

    // no free block of order 2 is left
    assert_eq!(
        node.compound(4, MigrationType::Movable, false),
        Err(PmmError::OutOfMemory)
    );
    assert_eq!(node.status(), NodeStatus::Backward);

    let a = node.compound(4, MigrationType::Movable, true).unwrap();
    assert_eq!(node.status(), NodeStatus::Idle);
    assert!(a.is_compound());
    assert_eq!(a.pages(), 4);
    assert_eq!(node.free_pages(), 252);

    assert_eq!(node.decompose(a.blocks()[2].addr()), Err(PmmError::InvalidArgs));
    assert_eq!(node.decompose(a.head()), Ok(4));
    for pa in pages.iter().skip(1).step_by(2) {
        node.decompose(*pa).unwrap();
    }
    assert_eq!(node.free_pages(), 512);
    assert_eq!(node.budget_level(MigrationType::Movable, 2), 512);
    assert!(node.free_lists_consistent());
}

#[test]
fn movable_request_borrows_from_another_node() {
    let pm = PhysicalMemory::new(&[
        NodeConfig::new(MemoryNodeInfo::new(MEMBASE, TWO_MIB)),
        NodeConfig::new(MemoryNodeInfo::new(MEMBASE + TWO_MIB, TWO_MIB)),
    ])
    .unwrap();
    let all = pm.alloc(0, 512, UsageClass::ContiguousRequired).unwrap();
    assert_eq!(pm.node(0).unwrap().free_pages(), 0);

    let borrowed = pm.alloc(0, 8, UsageClass::ContiguousRequired).unwrap();
    let lender = pm.node_of(borrowed).unwrap();
    assert_eq!(lender.id(), 1);
    assert_eq!(
        lender.page_flags(borrowed).unwrap().state(),
        PageState::MovableNode
    );

    assert_eq!(pm.free(borrowed), Ok(8));
    assert_eq!(pm.free(all), Ok(512));
    assert_eq!(pm.free_pages(), 1024);
}

#[test]
fn unmovable_requests_do_not_borrow() {
    let pm = PhysicalMemory::new(&[
        NodeConfig::new(MemoryNodeInfo::new(MEMBASE, TWO_MIB)),
        NodeConfig::new(MemoryNodeInfo::new(MEMBASE + TWO_MIB, TWO_MIB)),
    ])
    .unwrap();
    let all = pm.alloc(0, 512, UsageClass::ContiguousRequired).unwrap();
    assert_eq!(pm.alloc(0, 4, UsageClass::BootReserved), Err(PmmError::OutOfMemory));
    pm.free(all).unwrap();
}

#[test]
fn overlapping_nodes_are_rejected() {
    let res = PhysicalMemory::new(&[
        NodeConfig::new(MemoryNodeInfo::new(MEMBASE, 2 * TWO_MIB)),
        NodeConfig::new(MemoryNodeInfo::new(MEMBASE + TWO_MIB, TWO_MIB)),
    ]);
    assert!(matches!(res, Err(PmmError::InvalidLayout(_))));
    assert!(matches!(PhysicalMemory::new(&[]), Err(PmmError::InvalidLayout(_))));
}

#[test]
fn random_traffic_conserves_pages() {
    let node = PhysicalMemoryNode::new(
        0,
        &NodeConfig::new(MemoryNodeInfo::new(MEMBASE, 8 * TWO_MIB)).with_cpus(1),
    )
    .unwrap();
    let total = node.npages();
    let usages = [
        UsageClass::GenericObject,
        UsageClass::ContiguousPreferred,
        UsageClass::ContiguousRequired,
        UsageClass::MmuBlock,
    ];

    let mut seed = 0x2545_f491_4f6c_dd1d_u64;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed
    };

    let mut live = Vec::new();
    for step in 0..2000 {
        let r = next();
        if r % 3 == 0 && !live.is_empty() {
            let pa = live.swap_remove((r as usize / 3) % live.len());
            node.decompose(pa).unwrap();
        } else {
            let npages = 1 + (r >> 8) % 40;
            let usage = usages[(r >> 16) as usize % usages.len()];
            match node.alloc(npages, usage) {
                Ok(a) => live.push(a.head()),
                Err(e) => assert_eq!(e, PmmError::OutOfMemory),
            }
        }
        assert!(node.stats().is_conserved(), "step {step}");
        if step % 100 == 0 {
            assert!(node.free_lists_consistent(), "step {step}");
        }
    }

    for pa in live {
        node.decompose(pa).unwrap();
    }
    let stats = node.stats();
    assert_eq!(stats.allocated_pages, 0);
    assert_eq!(stats.free_pages + stats.pcp_total(), total);
    assert!(node.free_lists_consistent());
}
