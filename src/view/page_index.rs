use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Window `[first_row, first_row + page_length)` over an ordered sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawPageIndex")]
pub struct PageIndex {
    first_row: usize,
    page_length: usize,
}

/// Unchecked wire form of [`PageIndex`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPageIndex {
    first_row: usize,
    page_length: usize,
}

impl TryFrom<RawPageIndex> for PageIndex {
    type Error = Error;

    fn try_from(raw: RawPageIndex) -> Result<Self> {
        Self::of_first_row_and_page_length(raw.first_row, raw.page_length)
    }
}

impl PageIndex {
    pub fn of_first_row_and_page_length(first_row: usize, page_length: usize) -> Result<Self> {
        if page_length == 0 {
            return Err(Error::InvalidArgument(
                "page length must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            first_row,
            page_length,
        })
    }

    /// The page of length `page_length` that contains `row_index`.
    pub fn page_containing_row(row_index: usize, page_length: usize) -> Result<Self> {
        if page_length == 0 {
            return Err(Error::InvalidArgument(
                "page length must be greater than zero".to_string(),
            ));
        }
        Self::of_first_row_and_page_length((row_index / page_length) * page_length, page_length)
    }

    pub fn first_page(page_length: usize) -> Result<Self> {
        Self::of_first_row_and_page_length(0, page_length)
    }

    /// Everything, from the first row on.
    pub fn all() -> Self {
        Self {
            first_row: 0,
            page_length: usize::MAX,
        }
    }

    pub fn first_row(&self) -> usize {
        self.first_row
    }

    pub fn page_length(&self) -> usize {
        self.page_length
    }

    pub fn last_row_index(&self) -> usize {
        self.first_row.saturating_add(self.page_length.saturating_sub(1))
    }

    /// Consecutive pages of this page's length, starting with this one, none
    /// of them reaching `ceiling` or beyond. The last page is cut short at
    /// the ceiling.
    pub fn iter(&self, ceiling: usize) -> PageIndexIter {
        PageIndexIter {
            next: clamp(self.first_row, self.page_length, ceiling),
            page_length: self.page_length,
            ceiling,
        }
    }

    /// Lazily fetches every page of [`iter`](Self::iter) and chains the
    /// results.
    pub fn stream_pages<T, I, F>(&self, ceiling: usize, fetcher: F) -> impl Iterator<Item = T>
    where
        F: FnMut(PageIndex) -> I,
        I: IntoIterator<Item = T>,
    {
        self.iter(ceiling).flat_map(fetcher)
    }
}

impl fmt::Display for PageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, +{})", self.first_row, self.page_length)
    }
}

fn clamp(first_row: usize, page_length: usize, ceiling: usize) -> Option<PageIndex> {
    if first_row >= ceiling {
        return None;
    }
    Some(PageIndex {
        first_row,
        page_length: page_length.min(ceiling - first_row),
    })
}

/// Iterator returned by [`PageIndex::iter`]. Cloning restarts from the
/// current position.
#[derive(Clone, Debug)]
pub struct PageIndexIter {
    next: Option<PageIndex>,
    page_length: usize,
    ceiling: usize,
}

impl Iterator for PageIndexIter {
    type Item = PageIndex;

    fn next(&mut self) -> Option<PageIndex> {
        let current = self.next.take()?;
        self.next = current
            .first_row
            .checked_add(current.page_length)
            .and_then(|first_row| clamp(first_row, self.page_length, self.ceiling));
        Some(current)
    }
}

impl std::iter::FusedIterator for PageIndexIter {}
