use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn is_ascending(self) -> bool {
        self == Direction::Asc
    }
}

/// One sort directive: attribute name + direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

impl Order {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Desc,
        }
    }
}

/// Sort specification, applied after any static `OrderBy` of a query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sort {
    pub orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    /// Sort by several properties in the same direction.
    pub fn by(direction: Direction, properties: &[&str]) -> Self {
        Self {
            orders: properties
                .iter()
                .map(|p| Order {
                    property: p.to_string(),
                    direction,
                })
                .collect(),
        }
    }

    pub fn and(mut self, order: Order) -> Self {
        self.orders.push(order);
        self
    }

    pub fn is_unsorted(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Pagination parameters: zero-based page index, page size, sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pageable {
    #[serde(default)]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub size: u64,
    #[serde(default)]
    pub sort: Sort,
}

fn default_page_size() -> u64 {
    20
}

impl Default for Pageable {
    fn default() -> Self {
        Self {
            page: 0,
            size: default_page_size(),
            sort: Sort::unsorted(),
        }
    }
}

impl Pageable {
    pub fn of(page: u64, size: u64) -> Self {
        Self {
            page,
            size,
            sort: Sort::unsorted(),
        }
    }

    pub fn sorted(page: u64, size: u64, sort: Sort) -> Self {
        Self { page, size, sort }
    }

    /// Row offset of the page; saturates instead of overflowing.
    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.size)
    }
}

/// A page of results with pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u64,
    pub size: u64,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, pageable: &Pageable, total_elements: u64) -> Self {
        let total_pages = if pageable.size == 0 {
            0
        } else {
            total_elements.div_ceil(pageable.size)
        };
        Self {
            content,
            page: pageable.page,
            size: pageable.size,
            total_elements,
            total_pages,
        }
    }

    /// The zero-based page index.
    pub fn number(&self) -> u64 {
        self.page
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn is_first(&self) -> bool {
        self.page == 0
    }

    pub fn has_next(&self) -> bool {
        self.page.saturating_add(1) < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.page > 0
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total_elements: self.total_elements,
            total_pages: self.total_pages,
        }
    }
}

/// A window of results that only knows whether a next window exists.
#[derive(Debug, Clone, Serialize)]
pub struct Slice<T> {
    pub content: Vec<T>,
    pub page: u64,
    pub size: u64,
    pub has_next: bool,
}

impl<T> Slice<T> {
    /// Build from a probe read of `size + 1` rows, trimming the probe row.
    pub fn from_probe(mut content: Vec<T>, pageable: &Pageable) -> Self {
        let size = usize::try_from(pageable.size).unwrap_or(usize::MAX);
        let has_next = content.len() > size;
        content.truncate(size);
        Self {
            content,
            page: pageable.page,
            size: pageable.size,
            has_next,
        }
    }

    pub fn number(&self) -> u64 {
        self.page
    }

    pub fn is_first(&self) -> bool {
        self.page == 0
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn has_previous(&self) -> bool {
        self.page > 0
    }

    pub fn is_last(&self) -> bool {
        !self.has_next
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Slice<U> {
        Slice {
            content: self.content.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            has_next: self.has_next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        let page = Page::new(vec![1, 2, 3], &Pageable::of(0, 3), 5);
        assert_eq!(page.total_pages, 2);
        assert!(page.is_first());
        assert!(page.has_next());
        assert!(!page.is_last());
    }

    #[test]
    fn last_page_has_no_next() {
        let page = Page::new(vec![4, 5], &Pageable::of(1, 3), 5);
        assert!(!page.has_next());
        assert!(page.has_previous());
        assert!(page.is_last());
    }

    #[test]
    fn empty_result_has_zero_pages() {
        let page: Page<i32> = Page::new(vec![], &Pageable::of(0, 10), 0);
        assert_eq!(page.total_pages, 0);
        assert!(page.is_first());
        assert!(page.is_last());
    }

    #[test]
    fn slice_probe_boundaries() {
        let exact = Slice::from_probe(vec![1, 2, 3], &Pageable::of(0, 3));
        assert!(!exact.has_next());
        assert_eq!(exact.content.len(), 3);

        let probe = Slice::from_probe(vec![1, 2, 3, 4], &Pageable::of(0, 3));
        assert!(probe.has_next());
        assert_eq!(probe.content, vec![1, 2, 3]);
    }

    #[test]
    fn page_map_keeps_metadata() {
        let page = Page::new(vec![1, 2], &Pageable::of(2, 2), 9).map(|n| n * 10);
        assert_eq!(page.content, vec![10, 20]);
        assert_eq!(page.total_pages, 5);
        assert_eq!(page.number(), 2);
    }

    #[test]
    fn huge_page_index_saturates() {
        let pageable = Pageable::of(u64::MAX, 3);
        assert_eq!(pageable.offset(), u64::MAX);
        let page: Page<i32> = Page::new(vec![], &pageable, 5);
        assert!(!page.has_next());
        assert!(page.has_previous());
    }

    #[test]
    fn pageable_deserializes_with_defaults() {
        let p: Pageable = serde_json::from_str(r#"{"page": 2}"#).unwrap();
        assert_eq!(p.size, 20);
        assert_eq!(p.offset(), 40);
    }

    #[test]
    fn page_serializes() {
        let page = Page::new(vec!["a"], &Pageable::of(0, 1), 1);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["total_elements"], 1);
        assert_eq!(json["content"][0], "a");
    }
}
