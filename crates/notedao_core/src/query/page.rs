//! Result windows for paginated queries.

/// `(start, end)` offset pair.
///
/// A window whose `end - start` is not positive is unbounded: no limit or
/// offset is applied at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageWindow {
    pub start: u32,
    pub end: u32,
}

impl PageWindow {
    pub const UNBOUNDED: Self = Self { start: 0, end: 0 };

    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Flat limit from offset zero. A zero limit is unbounded.
    pub const fn first(limit: u32) -> Self {
        Self::new(0, limit)
    }

    pub const fn is_bounded(&self) -> bool {
        self.end > self.start
    }

    pub const fn limit(&self) -> Option<u32> {
        if self.is_bounded() {
            Some(self.end - self.start)
        } else {
            None
        }
    }

    /// `LIMIT/OFFSET` suffix, empty for unbounded windows.
    pub(crate) fn sql_suffix(&self) -> String {
        match self.limit() {
            Some(limit) => format!(" LIMIT {limit} OFFSET {}", self.start),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PageWindow;

    #[test]
    fn positive_span_bounds_the_window() {
        let window = PageWindow::new(10, 25);
        assert_eq!(window.limit(), Some(15));
        assert_eq!(window.sql_suffix(), " LIMIT 15 OFFSET 10");
    }

    #[test]
    fn empty_or_inverted_span_is_unbounded() {
        for window in [
            PageWindow::new(5, 5),
            PageWindow::new(9, 3),
            PageWindow::first(0),
        ] {
            assert!(!window.is_bounded());
            assert_eq!(window.limit(), None);
            assert!(window.sql_suffix().is_empty());
        }
    }
}
