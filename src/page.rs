//! Paging descriptors.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Zero-based page request, extractable from `?index=&size=`.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct PageRequest {
    #[serde(default)]
    pub index: u32,
    #[serde(default = "default_size")]
    pub size: u32,
}

fn default_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest {
            index: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(index: u32, size: u32) -> Self {
        PageRequest { index, size }
    }

    /// Size clamped to `1..=MAX_PAGE_SIZE`; zero falls back to the default.
    pub fn limit(&self) -> u32 {
        match self.size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        self.index as u64 * self.limit() as u64
    }

    /// Read `index` and `size` from decoded query parameters. Absent keys take defaults.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, AppError> {
        let read = |key: &str, default: u32| -> Result<u32, AppError> {
            match query.get(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| AppError::BadRequest(format!("'{}' must be a non-negative integer, got '{}'", key, raw))),
                None => Ok(default),
            }
        };
        Ok(PageRequest {
            index: read("index", 0)?,
            size: read("size", DEFAULT_PAGE_SIZE)?,
        })
    }
}

/// One page of results. `total` counts every match of the filter, not just this page.
#[derive(Clone, Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub index: u32,
    pub size: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: &PageRequest, total: u64) -> Self {
        let size = request.limit();
        Page {
            items,
            index: request.index,
            size,
            total,
            total_pages: total.div_ceil(size as u64),
        }
    }
}
