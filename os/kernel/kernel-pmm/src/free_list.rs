use crate::page::{NIL, Page};

/// Doubly linked list of page descriptors, threaded through the `prev`/`next`
/// indices of the [`Page`] table it is used with.
///
/// ```text
///  head                                   tail
///   │                                      │
///   ▼                                      ▼
/// ┌─────┐ next ┌─────┐ next ┌─────┐ next ┌─────┐
/// │ p17 │─────►│ p04 │─────►│ p96 │─────►│ p32 │──► NIL
/// └─────┘◄─────└─────┘◄─────└─────┘◄─────└─────┘
///          prev         prev         prev
/// ```
///
/// The head is the hot end: freshly freed blocks are pushed there and
/// allocations pop from there. The tail is the cold end.
///
/// # Invariants
/// - A page index is linked into at most one list at a time.
/// - `count` equals the number of reachable entries.
///
/// Breaking linkage (removing an entry that is not on the list) is a fatal
/// error and panics.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: u32,
    tail: u32,
    count: usize,
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            count: 0,
        }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub(crate) const fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub(crate) const fn head(&self) -> Option<u32> {
        if self.head == NIL { None } else { Some(self.head) }
    }

    #[inline]
    pub(crate) const fn tail(&self) -> Option<u32> {
        if self.tail == NIL { None } else { Some(self.tail) }
    }

    pub(crate) fn push_head(&mut self, pages: &mut [Page], idx: u32) {
        let page = &mut pages[idx as usize];
        page.prev = NIL;
        page.next = self.head;
        if self.head == NIL {
            self.tail = idx;
        } else {
            pages[self.head as usize].prev = idx;
        }
        self.head = idx;
        self.count += 1;
    }

    pub(crate) fn push_tail(&mut self, pages: &mut [Page], idx: u32) {
        let page = &mut pages[idx as usize];
        page.next = NIL;
        page.prev = self.tail;
        if self.tail == NIL {
            self.head = idx;
        } else {
            pages[self.tail as usize].next = idx;
        }
        self.tail = idx;
        self.count += 1;
    }

    pub(crate) fn pop_head(&mut self, pages: &mut [Page]) -> Option<u32> {
        let idx = self.head()?;
        self.remove(pages, idx);
        Some(idx)
    }

    pub(crate) fn pop_tail(&mut self, pages: &mut [Page]) -> Option<u32> {
        let idx = self.tail()?;
        self.remove(pages, idx);
        Some(idx)
    }

    /// Unlink `idx`, which must be on this list.
    pub(crate) fn remove(&mut self, pages: &mut [Page], idx: u32) {
        assert!(self.count > 0, "free-list corrupted: remove {idx} from empty list");
        let (prev, next) = {
            let page = &pages[idx as usize];
            (page.prev, page.next)
        };

        if prev == NIL {
            assert_eq!(self.head, idx, "free-list corrupted: {idx} is not the head");
            self.head = next;
        } else {
            pages[prev as usize].next = next;
        }

        if next == NIL {
            assert_eq!(self.tail, idx, "free-list corrupted: {idx} is not the tail");
            self.tail = prev;
        } else {
            pages[next as usize].prev = prev;
        }

        let page = &mut pages[idx as usize];
        page.prev = NIL;
        page.next = NIL;
        self.count -= 1;
    }

    /// Walk the entries from head (hot) to tail (cold).
    pub(crate) fn iter<'a>(&self, pages: &'a [Page]) -> impl Iterator<Item = u32> + 'a {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            if cursor == NIL {
                return None;
            }
            let idx = cursor;
            cursor = pages[idx as usize].next;
            Some(idx)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn table(n: usize) -> Vec<Page> {
        (0..n).map(|_| Page::new(0)).collect()
    }

    #[test]
    fn push_and_pop_ends() {
        let mut pages = table(8);
        let mut list = FreeList::new();
        list.push_head(&mut pages, 1);
        list.push_head(&mut pages, 2);
        list.push_tail(&mut pages, 3);
        assert_eq!(list.iter(&pages).collect::<Vec<_>>(), [2, 1, 3]);
        assert_eq!(list.pop_head(&mut pages), Some(2));
        assert_eq!(list.pop_tail(&mut pages), Some(3));
        assert_eq!(list.pop_tail(&mut pages), Some(1));
        assert!(list.is_empty());
        assert_eq!(list.pop_head(&mut pages), None);
    }

    #[test]
    fn remove_from_middle_keeps_links() {
        let mut pages = table(8);
        let mut list = FreeList::new();
        for i in [4, 5, 6, 7] {
            list.push_tail(&mut pages, i);
        }
        list.remove(&mut pages, 5);
        list.remove(&mut pages, 7);
        assert_eq!(list.len(), 2);
        assert_eq!(list.iter(&pages).collect::<Vec<_>>(), [4, 6]);
        assert_eq!(list.tail(), Some(6));
    }

    #[test]
    #[should_panic(expected = "free-list corrupted")]
    fn removing_from_empty_list_panics() {
        let mut pages = table(2);
        let mut list = FreeList::new();
        list.remove(&mut pages, 0);
    }
}
