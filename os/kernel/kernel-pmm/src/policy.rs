//! Mapping of usage classes to migration classes and page-count rules.

use crate::error::PmmError;
use crate::level::{LEVELS, floor_log2};
use crate::page::{MigrationType, UsageClass};
use kernel_info::tunables::UNMOV_MAX_NR;

/// Search parameters derived from a usage class.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AllocPolicy {
    /// Free-list family the request is served from.
    pub class: MigrationType,
    /// Whether the request may be satisfied by a chain of smaller blocks.
    pub fragmented: bool,
}

impl AllocPolicy {
    /// Pick the migration class and fragmentation rule for `usage`.
    ///
    /// Debug-fixed and boot-reserved requests always go to the unmovable
    /// pools; any other single-page request is served by the per-CPU cache.
    ///
    /// # Errors
    /// [`PmmError::InvalidArgs`] for [`UsageClass::Undefined`].
    pub const fn for_usage(usage: UsageClass, npages: u64) -> Result<Self, PmmError> {
        let (class, fragmented) = match usage {
            UsageClass::Undefined => return Err(PmmError::InvalidArgs),
            UsageClass::DebugFixed => (MigrationType::Unmovable, false),
            UsageClass::BootReserved => (MigrationType::Unmovable, true),
            _ if npages == 1 => (MigrationType::Pcp, false),
            UsageClass::ContiguousPreferred => (MigrationType::Movable, true),
            UsageClass::ContiguousRequired | UsageClass::MmuBlock | UsageClass::GenericObject => {
                (MigrationType::Movable, false)
            }
        };
        Ok(Self { class, fragmented })
    }
}

/// Unmovable pool figures a request is validated against.
#[derive(Copy, Clone, Debug, Default)]
pub struct UnmovableBudget {
    /// Free unmovable pages of the node.
    pub total: u64,
    /// Free unmovable pages per level.
    pub per_level: [u64; LEVELS],
    /// Pages currently held by debug-fixed allocations.
    pub debug_held: u64,
}

/// Validate `npages` for `usage` and return the page count to allocate.
///
/// * debug-fixed: a power of two, and the node's debug quota
///   ([`UNMOV_MAX_NR`]) is not exceeded,
/// * boot-reserved: the whole unmovable pool, one level's pool, or a power of
///   two,
/// * contiguous-required, mmu-block, generic-object: rounded up to a power of
///   two.
///
/// # Errors
/// [`PmmError::InvalidArgs`] if `npages` is zero or violates the rule of its
/// usage class.
pub fn preprocess(usage: UsageClass, npages: u64, budget: &UnmovableBudget) -> Result<u64, PmmError> {
    if npages == 0 {
        return Err(PmmError::InvalidArgs);
    }
    match usage {
        UsageClass::Undefined => Err(PmmError::InvalidArgs),
        UsageClass::DebugFixed => {
            if npages > UNMOV_MAX_NR
                || budget.debug_held + npages > UNMOV_MAX_NR
                || !npages.is_power_of_two()
            {
                return Err(PmmError::InvalidArgs);
            }
            Ok(npages)
        }
        UsageClass::BootReserved => {
            let whole = npages == budget.total;
            let one_level = budget.per_level.contains(&npages);
            if whole || one_level || npages.is_power_of_two() {
                Ok(npages)
            } else {
                Err(PmmError::InvalidArgs)
            }
        }
        UsageClass::ContiguousRequired | UsageClass::MmuBlock | UsageClass::GenericObject => npages
            .checked_next_power_of_two()
            .ok_or(PmmError::InvalidArgs),
        UsageClass::ContiguousPreferred => Ok(npages),
    }
}

/// Split off the highest power of two of `npages`, returning its order.
#[inline]
pub(crate) const fn take_highest_order(npages: &mut u64) -> u32 {
    let order = floor_log2(*npages);
    *npages &= !(1 << order);
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_pages_go_to_the_pcp_cache() {
        let p = AllocPolicy::for_usage(UsageClass::GenericObject, 1).unwrap();
        assert_eq!(p.class, MigrationType::Pcp);
        assert!(!p.fragmented);

        // debug and reserved keep their pools even for one page
        let p = AllocPolicy::for_usage(UsageClass::DebugFixed, 1).unwrap();
        assert_eq!(p.class, MigrationType::Unmovable);
        let p = AllocPolicy::for_usage(UsageClass::BootReserved, 1).unwrap();
        assert_eq!(p.class, MigrationType::Unmovable);
        assert!(p.fragmented);
    }

    #[test]
    fn contiguity_by_usage() {
        let p = AllocPolicy::for_usage(UsageClass::ContiguousPreferred, 5).unwrap();
        assert_eq!((p.class, p.fragmented), (MigrationType::Movable, true));
        let p = AllocPolicy::for_usage(UsageClass::MmuBlock, 5).unwrap();
        assert_eq!((p.class, p.fragmented), (MigrationType::Movable, false));
        assert_eq!(
            AllocPolicy::for_usage(UsageClass::Undefined, 5),
            Err(PmmError::InvalidArgs)
        );
    }

    #[test]
    fn page_count_rules() {
        let b = UnmovableBudget {
            total: 1536,
            per_level: [0, 0, 1024, 512],
            debug_held: 0,
        };
        assert_eq!(preprocess(UsageClass::ContiguousRequired, 5, &b), Ok(8));
        assert_eq!(preprocess(UsageClass::ContiguousPreferred, 5, &b), Ok(5));
        assert_eq!(preprocess(UsageClass::DebugFixed, 3, &b), Err(PmmError::InvalidArgs));
        assert_eq!(preprocess(UsageClass::DebugFixed, 2048, &b), Err(PmmError::InvalidArgs));
        assert_eq!(preprocess(UsageClass::BootReserved, 1536, &b), Ok(1536));
        assert_eq!(preprocess(UsageClass::BootReserved, 1024, &b), Ok(1024));
        assert_eq!(preprocess(UsageClass::BootReserved, 12, &b), Err(PmmError::InvalidArgs));
        assert_eq!(preprocess(UsageClass::GenericObject, 0, &b), Err(PmmError::InvalidArgs));
    }

    #[test]
    fn debug_quota_is_enforced() {
        let b = UnmovableBudget {
            debug_held: UNMOV_MAX_NR - 2,
            ..UnmovableBudget::default()
        };
        assert_eq!(preprocess(UsageClass::DebugFixed, 2, &b), Ok(2));
        assert_eq!(preprocess(UsageClass::DebugFixed, 4, &b), Err(PmmError::InvalidArgs));
    }

    #[test]
    fn highest_order_strips_bits() {
        let mut n = 0b1011;
        assert_eq!(take_highest_order(&mut n), 3);
        assert_eq!(n, 0b011);
        assert_eq!(take_highest_order(&mut n), 1);
        assert_eq!(take_highest_order(&mut n), 0);
        assert_eq!(n, 0);
    }
}
