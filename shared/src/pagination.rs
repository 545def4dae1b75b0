use serde::{Deserialize, Serialize};

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;
/// Highest page whose offset still fits an `i64` at any page size.
pub const MAX_PAGE: i64 = i64::MAX / MAX_PER_PAGE;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageRequest {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageRequest {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).clamp(1, MAX_PAGE)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    pub fn limit(&self) -> i64 {
        self.per_page()
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.per_page()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: i64) -> Self {
        let per_page = request.per_page();
        Self {
            items,
            page: request.page(),
            per_page,
            total,
            total_pages: (total + per_page - 1) / per_page,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_clamping() {
        let request = PageRequest::default();
        assert_eq!((request.page(), request.per_page(), request.offset()), (1, 20, 0));

        let request = PageRequest { page: Some(0), per_page: Some(500) };
        assert_eq!((request.page(), request.per_page()), (1, MAX_PER_PAGE));

        let request = PageRequest { page: Some(3), per_page: Some(0) };
        assert_eq!((request.limit(), request.offset()), (1, 2));
    }

    #[test]
    fn huge_page_numbers_do_not_overflow_the_offset() {
        let request = PageRequest { page: Some(i64::MAX), per_page: Some(20) };
        assert_eq!(request.page(), MAX_PAGE);
        assert_eq!(request.offset(), (MAX_PAGE - 1) * 20);

        let request = PageRequest { page: Some(i64::MAX), per_page: Some(i64::MAX) };
        assert!(request.offset() > 0);
    }

    #[test]
    fn counts_partial_last_page() {
        let request = PageRequest { page: Some(2), per_page: Some(10) };
        let page = Page::new(vec![1, 2, 3], request, 23);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.page, 2);

        let empty: Page<i32> = Page::new(vec![], request, 0);
        assert_eq!(empty.total_pages, 0);
    }
}
