//! Page-number pagination.
//!
//! Requested page numbers arrive as raw query text and are clamped rather
//! than rejected: anything missing, non-numeric or below one selects the
//! first page, and anything past the end selects the last page. An empty
//! listing still has exactly one (empty) page.

use std::num::NonZeroU32;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Slices ordered listings into fixed-size pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    page_size: NonZeroU32,
}

impl Default for Paginator {
    fn default() -> Self {
        Self {
            page_size: NonZeroU32::new(DEFAULT_PAGE_SIZE).unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl Paginator {
    pub fn new(page_size: NonZeroU32) -> Self {
        Self { page_size }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    /// Resolve the requested page against a listing of `total` items.
    pub fn window(&self, total: u64, requested: Option<&str>) -> PageWindow {
        let size = u64::from(self.page_size.get());
        let num_pages = total.div_ceil(size).max(1);
        let number = match parse_page_number(requested) {
            RequestedPage::First => 1,
            RequestedPage::Number(number) => number.min(num_pages),
        };

        PageWindow {
            number,
            num_pages,
            total,
            limit: size,
            offset: (number - 1) * size,
        }
    }

    /// Paginate an in-memory sequence.
    pub fn paginate<T>(&self, items: Vec<T>, requested: Option<&str>) -> Page<T> {
        let window = self.window(items.len() as u64, requested);
        let offset = usize::try_from(window.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(window.limit).unwrap_or(usize::MAX);
        let items = items.into_iter().skip(offset).take(limit).collect();
        Page { items, window }
    }
}

/// A resolved page position. `offset` and `limit` are ready for SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub number: u64,
    pub num_pages: u64,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

impl PageWindow {
    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn next_number(&self) -> Option<u64> {
        self.has_next().then_some(self.number + 1)
    }

    pub fn previous_number(&self) -> Option<u64> {
        self.has_previous().then_some(self.number - 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub window: PageWindow,
}

impl<T> Page<T> {
    pub fn number(&self) -> u64 {
        self.window.number
    }

    pub fn has_next(&self) -> bool {
        self.window.has_next()
    }

    pub fn has_previous(&self) -> bool {
        self.window.has_previous()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            window: self.window,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestedPage {
    First,
    Number(u64),
}

fn parse_page_number(raw: Option<&str>) -> RequestedPage {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return RequestedPage::First;
    };

    match raw.parse::<u64>() {
        Ok(0) => RequestedPage::First,
        Ok(number) => RequestedPage::Number(number),
        // All digits but too large for u64: past any real last page.
        Err(_) if raw.bytes().all(|byte| byte.is_ascii_digit()) => {
            RequestedPage::Number(u64::MAX)
        }
        Err(_) => RequestedPage::First,
    }
}
