/// One page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page<'a, T> {
    pub items: &'a [T],
    pub start: usize,
    pub end: usize,
    pub total: usize,
}

impl<T> Page<'_, T> {
    pub fn is_last(&self) -> bool {
        self.end >= self.total
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.end)
    }
}

/// Slice `items` into the page at `page_index`.
///
/// `start = page_index * page_size` and `end = min(start + page_size, total)`.
/// A `page_size` of zero is treated as one. Pages past the end are empty and
/// keep their nominal `start`, with `end == total`.
pub fn page<T>(items: &[T], page_index: usize, page_size: usize) -> Page<'_, T> {
    let page_size = page_size.max(1);
    let total = items.len();
    let start = page_index.saturating_mul(page_size);
    let end = start.saturating_add(page_size).min(total);

    Page {
        items: &items[start.min(end)..end],
        start,
        end,
        total,
    }
}

/// Whether a listing of `total` items needs more than one page.
pub fn needs_paging(total: usize, page_size: usize) -> bool {
    total > page_size.max(1)
}
