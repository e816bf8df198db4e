mod common;

use common::{range, rw, system};
use kernel_memory_addresses::{AddressRange, PhysicalAddress};
use kernel_vma::{AreaAttr, AreaFlags, AreaState, Backing, GrantMode, MmId};
use std::sync::Barrier;
use std::thread;

const ROUNDS: usize = 200;

struct Lane {
    owner: MmId,
    borrower: MmId,
    src: AddressRange,
    dst: AddressRange,
    pa: u64,
}

#[test]
fn opposite_lends_do_not_deadlock() {
    let sys = system(&[1, 2]);
    let lanes = [
        Lane {
            owner: 1,
            borrower: 2,
            src: range(0x10_000, 0x2000),
            dst: range(0x40_000, 0x2000),
            pa: 0x4800_0000,
        },
        Lane {
            owner: 2,
            borrower: 1,
            src: range(0x20_000, 0x2000),
            dst: range(0x50_000, 0x2000),
            pa: 0x4900_0000,
        },
    ];
    for lane in &lanes {
        sys.space(lane.owner)
            .unwrap()
            .create_map(
                lane.src,
                AreaAttr::Normal,
                AreaFlags::new(),
                rw(),
                Backing::Fixed(PhysicalAddress::new(lane.pa)),
                sys.frames(),
            )
            .unwrap();
    }

    let barrier = Barrier::new(lanes.len());
    thread::scope(|s| {
        for lane in &lanes {
            let (sys, barrier) = (&sys, &barrier);
            s.spawn(move || {
                barrier.wait();
                for i in 0..ROUNDS {
                    let mode = if i % 2 == 0 { GrantMode::Lend } else { GrantMode::Share };
                    sys.grant(mode, lane.owner, lane.src, lane.borrower, lane.dst, rw())
                        .unwrap();
                    sys.relinquish(lane.borrower, lane.dst.start).unwrap();
                }
            });
        }
    });

    for lane in &lanes {
        let owner = sys.space(lane.owner).unwrap();
        let area = owner.area_at(lane.src.start).unwrap();
        assert_eq!(area.state(), AreaState::EA);
        assert_eq!(area.users(), 0);
        assert!(owner.grants().is_empty());
        assert!(owner.is_consistent());
        assert_eq!(owner.area_count(), 3);
    }
}
