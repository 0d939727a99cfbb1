use serde::{Deserialize, Serialize};

use crate::config::PaginationConfig;

/// `?limit=&offset=` query parameters accepted by every list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub count: usize,
    pub results: Vec<T>,
}

impl<T> Paginated<T> {
    /// Slice an already ordered result set. `count` is the total before slicing.
    pub fn from_items(items: Vec<T>, params: &PageParams, config: &PaginationConfig) -> Self {
        let count = items.len();
        let limit = params
            .limit
            .unwrap_or(config.page_size)
            .clamp(1, config.max_page_size);
        let offset = params.offset.unwrap_or(0);
        let results = items.into_iter().skip(offset).take(limit).collect();
        Self { count, results }
    }
}
