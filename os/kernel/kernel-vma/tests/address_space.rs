mod common;

use common::{SPACE, range, ro, rw, system, va};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vma::{AreaAttr, AreaFlags, AreaState, Backing, VmaError};

#[test]
fn split_then_destroy_restores_root() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    let r = range(0x10_000, 0x3000);

    let area = mm.split(r, AreaAttr::Normal, AreaFlags::new()).unwrap();
    assert_eq!(area.range(), r);
    assert_eq!(area.state(), AreaState::NA);
    assert_eq!(area.attr(), AreaAttr::Normal);
    assert_eq!(mm.area_count(), 3);
    assert!(mm.is_consistent());

    mm.destroy(r, sys.frames()).unwrap();
    assert_eq!(mm.area_count(), 1);
    assert_eq!(mm.areas()[0].range(), SPACE);
    assert!(mm.areas()[0].is_gaps());
    assert!(mm.is_consistent());
}

#[test]
fn split_rejects_bad_ranges() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    mm.split(range(0x10_000, 0x3000), AreaAttr::Normal, AreaFlags::new())
        .unwrap();

    let straddling = range(0x12_000, 0x2000);
    assert_eq!(
        mm.split(straddling, AreaAttr::Dma, AreaFlags::new()).unwrap_err(),
        VmaError::InvalidArgs
    );
    let misaligned = range(0x20_000, 0x1800);
    assert_eq!(
        mm.split(misaligned, AreaAttr::Dma, AreaFlags::new()).unwrap_err(),
        VmaError::InvalidArgs
    );
    let outside = range(SPACE.end, 0x1000);
    assert_eq!(
        mm.split(outside, AreaAttr::Dma, AreaFlags::new()).unwrap_err(),
        VmaError::OutOfRange
    );
    assert_eq!(mm.area_count(), 3);
    assert!(mm.is_consistent());
}

#[test]
fn gap_pieces_merge_back_and_merge_is_idempotent() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    mm.split(range(0x10_000, 0x1000), AreaAttr::Gaps, AreaFlags::new())
        .unwrap();
    assert_eq!(mm.area_count(), 3);

    let merged = mm.merge(0x10_000).unwrap();
    assert_eq!(merged.range(), SPACE);
    assert_eq!(mm.area_count(), 1);

    let again = mm.merge(0x10_000).unwrap();
    assert_eq!(again.range(), SPACE);
    assert_eq!(mm.area_count(), 1);
    assert!(mm.is_consistent());
}

#[test]
fn merge_leaves_active_areas_alone() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    let r = range(0x10_000, 0x2000);
    mm.create_map(r, AreaAttr::Normal, AreaFlags::new(), rw(), Backing::Unbacked, sys.frames())
        .unwrap();

    let area = mm.merge(0x10_000).unwrap();
    assert_eq!(area.range(), r);
    assert_eq!(area.state(), AreaState::EA);
    assert_eq!(mm.area_count(), 3);
}

#[test]
fn allocated_backing_is_freed_on_destroy() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    let before = sys.frames().free_pages();
    let r = range(0x20_000, 0x4000);

    let area = mm
        .create_map(r, AreaAttr::Normal, AreaFlags::new(), rw(), Backing::Allocate, sys.frames())
        .unwrap();
    assert_eq!(area.state(), AreaState::EA);
    assert!(area.flags().alloc());
    let pa = area.backing().unwrap();
    assert!(pa.is_page_aligned());
    assert_eq!(sys.frames().free_pages(), before - 4);
    assert_eq!(mm.query(va(0x21_000)), Some((pa + 0x1000, rw())));

    mm.destroy(r, sys.frames()).unwrap();
    assert_eq!(sys.frames().free_pages(), before);
    assert_eq!(mm.query(va(0x21_000)), None);
    assert_eq!(mm.area_count(), 1);
}

#[test]
fn failed_mapping_undoes_the_split() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    let r = range(0x20_000, 0x2000);

    let misaligned = Backing::Fixed(PhysicalAddress::new(0x4000_0800));
    assert_eq!(
        mm.create_map(r, AreaAttr::Normal, AreaFlags::new(), rw(), misaligned, sys.frames())
            .unwrap_err(),
        VmaError::InvalidArgs
    );
    let fixed = Backing::Fixed(PhysicalAddress::new(0x4000_0000));
    let no_access = rw().with_read(false).with_write(false);
    assert_eq!(
        mm.create_map(r, AreaAttr::Normal, AreaFlags::new(), no_access, fixed, sys.frames())
            .unwrap_err(),
        VmaError::InvalidArgs
    );
    assert_eq!(
        mm.create_map(r, AreaAttr::Mmio, AreaFlags::new(), rw(), Backing::Allocate, sys.frames())
            .unwrap_err(),
        VmaError::InvalidArgs
    );
    assert_eq!(mm.area_count(), 1);
    assert!(mm.is_consistent());
}

#[test]
fn failed_mapping_restores_a_reserved_area() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    let reserved = range(0x20_000, 0x3000);
    mm.split(reserved, AreaAttr::Normal, AreaFlags::new()).unwrap();
    assert_eq!(mm.area_count(), 3);

    let misaligned = Backing::Fixed(PhysicalAddress::new(0x4000_0800));
    assert_eq!(
        mm.create_map(range(0x21_000, 0x1000), AreaAttr::Normal, AreaFlags::new(), rw(), misaligned, sys.frames())
            .unwrap_err(),
        VmaError::InvalidArgs
    );
    let area = mm.area_at(0x21_000).unwrap();
    assert_eq!(area.attr(), AreaAttr::Normal);
    assert_eq!(area.range(), reserved);
    assert_eq!(area.state(), AreaState::NA);
    assert_eq!(mm.area_count(), 3);
    assert!(mm.is_consistent());
}

#[test]
fn allocated_area_is_not_split() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    let r = range(0x20_000, 0x2000);
    let head = range(0x20_000, 0x1000);
    let area = mm
        .create_map(r, AreaAttr::Normal, AreaFlags::new(), rw(), Backing::Allocate, sys.frames())
        .unwrap();
    let pa = area.backing().unwrap();
    let free = sys.frames().free_pages();

    assert_eq!(
        mm.create_map(head, AreaAttr::Normal, AreaFlags::new(), ro(), Backing::Unbacked, sys.frames())
            .unwrap_err(),
        VmaError::InvalidArgs
    );
    assert_eq!(mm.split(head, AreaAttr::Normal, AreaFlags::new()).unwrap_err(), VmaError::InvalidArgs);
    assert!(mm.destroy(head, sys.frames()).is_err());
    assert_eq!(sys.frames().free_pages(), free);
    assert_eq!(mm.area_at(0x21_000).unwrap().range(), r);
    assert_eq!(mm.query(va(0x21_000)), Some((pa + 0x1000, rw())));

    mm.destroy(r, sys.frames()).unwrap();
    assert_eq!(sys.frames().free_pages(), free + 2);
    assert_eq!(mm.area_count(), 1);
}

#[test]
fn unbacked_area_is_active_without_translation() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    let r = range(0x30_000, 0x1000);
    let area = mm
        .create_map(r, AreaAttr::MmioEmul, AreaFlags::new(), rw(), Backing::Unbacked, sys.frames())
        .unwrap();
    assert_eq!(area.state(), AreaState::EA);
    assert_eq!(area.backing(), None);
    assert!(!area.is_mapped());
    assert_eq!(mm.query(va(0x30_000)), None);
    assert_eq!(area.title(), "Emulation Device");
}

#[test]
fn mapping_a_piece_of_a_mapped_area_reprotects_it() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    let pa = PhysicalAddress::new(0x4800_0000);
    mm.create_map(
        range(0x30_000, 0x4000),
        AreaAttr::Normal,
        AreaFlags::new(),
        rw(),
        Backing::Fixed(pa),
        sys.frames(),
    )
    .unwrap();

    let piece = mm
        .create_map(
            range(0x31_000, 0x1000),
            AreaAttr::Normal,
            AreaFlags::new(),
            ro(),
            Backing::Unbacked,
            sys.frames(),
        )
        .unwrap();
    assert_eq!(piece.backing(), Some(pa + 0x1000));
    assert_eq!(piece.prot(), ro());
    assert_eq!(mm.query(va(0x31_000)), Some((pa + 0x1000, ro())));
    assert_eq!(mm.query(va(0x32_000)), Some((pa + 0x2000, rw())));
    assert!(mm.is_consistent());
}

#[test]
fn protect_requires_an_exclusive_mapping() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    let mapped = range(0x40_000, 0x1000);
    let reserved = range(0x50_000, 0x1000);
    mm.create_map(
        mapped,
        AreaAttr::Normal,
        AreaFlags::new(),
        rw(),
        Backing::Fixed(PhysicalAddress::new(0x4000_0000)),
        sys.frames(),
    )
    .unwrap();
    mm.split(reserved, AreaAttr::Normal, AreaFlags::new()).unwrap();

    mm.protect(mapped, ro()).unwrap();
    assert_eq!(mm.query(va(0x40_000)).map(|(_, f)| f), Some(ro()));
    assert_eq!(mm.area_at(0x40_000).unwrap().prot(), ro());

    assert_eq!(mm.protect(reserved, ro()), Err(VmaError::StateConflict));
    assert_eq!(mm.protect(mapped, ro().with_read(false)), Err(VmaError::InvalidArgs));
    assert_eq!(mm.protect(range(0x40_000, 0x2000), ro()), Err(VmaError::InvalidArgs));
}

#[test]
fn revoke_detaches_the_record() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    let r = range(0x60_000, 0x2000);
    mm.split(r, AreaAttr::Normal, AreaFlags::new()).unwrap();

    let record = mm.revoke(r).unwrap();
    assert_eq!(record.range(), r);
    assert_eq!(mm.area_count(), 2);
    assert!(mm.area_at(0x60_000).is_none());
    assert!(matches!(mm.find(r), Ok(None)));
    assert!(mm.is_consistent());
}

#[test]
fn revoke_leaves_active_areas_alone() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    let mapped = range(0x60_000, 0x1000);
    let reserved = range(0x70_000, 0x1000);
    let pa = PhysicalAddress::new(0x4000_0000);
    mm.create_map(mapped, AreaAttr::Normal, AreaFlags::new(), rw(), Backing::Fixed(pa), sys.frames())
        .unwrap();
    mm.split(reserved, AreaAttr::Normal, AreaFlags::new()).unwrap();
    let count = mm.area_count();

    assert_eq!(mm.revoke(mapped).unwrap_err(), VmaError::StateConflict);
    assert_eq!(mm.revoke_delete(mapped), Err(VmaError::StateConflict));
    assert_eq!(mm.query(va(0x60_000)), Some((pa, rw())));
    assert_eq!(mm.area_count(), count);

    mm.revoke_delete(reserved).unwrap();
    assert_eq!(mm.area_count(), count - 1);
    assert!(mm.area_at(0x70_000).is_none());
    assert!(mm.is_consistent());
}

#[test]
fn lookups_walk_in_address_order() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    let low = range(0, 0x2000);
    mm.create_map(
        low,
        AreaAttr::Normal,
        AreaFlags::new(),
        rw(),
        Backing::Fixed(PhysicalAddress::new(0x4000_0000)),
        sys.frames(),
    )
    .unwrap();

    let gap = mm.get_unmapped_area(0, 0x1000).unwrap();
    assert_eq!(gap.range().start, 0x2000);
    assert!(gap.is_gaps());

    assert_eq!(mm.get_mapped_area(0, 0x1000).unwrap().range(), low);
    assert!(mm.get_mapped_area(0x2000, 0x1000).is_none());
    assert!(mm.get_mapped_area(0, 0x4000).is_none());

    let hit = mm.find_vma_intersection(0x1000, 0x3000, 0x1000).unwrap();
    assert_eq!(hit.range(), low);
    let hit = mm.find_vma_intersection(0x1000, 0x3000, 0x2000).unwrap();
    assert_eq!(hit.range().start, 0x2000);
    assert!(mm.find_vma_intersection(0x3000, 0x1000, 0x1000).is_none());

    assert_eq!(mm.find(range(0x1000, 0x1000)).unwrap().unwrap().range(), low);
    assert_eq!(mm.find(range(0x1000, 0x2000)).unwrap_err(), VmaError::InvalidArgs);
}

#[test]
fn destroy_rejects_gaps() {
    let sys = system(&[1]);
    let mm = sys.space(1).unwrap();
    assert_eq!(mm.destroy(SPACE, sys.frames()), Err(VmaError::InvalidArgs));
    assert_eq!(
        mm.destroy(range(0x1000, 0x1000), sys.frames()),
        Err(VmaError::InvalidArgs)
    );
}
