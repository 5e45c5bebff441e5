//! View/query engine — filter, sort, paginate, select, and export
//!
//! All functions here are pure over borrowed entries; `ViewState` and
//! `Selection` hold the user-controlled state between calls.

use crate::error::Result;
use crate::state::write_atomic;
use crate::types::{now_millis, EventEntry, Filter, SortDirection, SortField, TypeFilter};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Whether an entry passes the type filter and text query
///
/// The query is trimmed and case-folded; it matches when the type or the
/// payload text contains it. Payloads without a textual form never match a
/// non-empty query.
pub fn matches(entry: &EventEntry, filter: &Filter) -> bool {
    if let TypeFilter::Exact(kind) = &filter.type_filter {
        if &entry.kind != kind {
            return false;
        }
    }

    let query = filter.query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    if entry.kind.to_lowercase().contains(&query) {
        return true;
    }
    entry
        .payload
        .search_text()
        .is_some_and(|text| text.to_lowercase().contains(&query))
}

/// Keep the entries matching `filter`, preserving order
pub fn filter<'a, I>(entries: I, filter: &Filter) -> Vec<&'a EventEntry>
where
    I: IntoIterator<Item = &'a EventEntry>,
{
    entries.into_iter().filter(|e| matches(e, filter)).collect()
}

/// Compare two entries on `field` in ascending order
pub fn compare(a: &EventEntry, b: &EventEntry, field: SortField) -> Ordering {
    match field {
        SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
        SortField::Type => a.kind.cmp(&b.kind),
        SortField::Id => a.id.cmp(&b.id),
    }
}

/// Stable sort by `field`; descending reverses the comparator
pub fn sort<'a>(
    mut subset: Vec<&'a EventEntry>,
    field: SortField,
    direction: SortDirection,
) -> Vec<&'a EventEntry> {
    subset.sort_by(|a, b| {
        let ord = compare(a, b, field);
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
    subset
}

/// One page of an ordered sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<'a, T> {
    /// Items on this page
    pub items: &'a [T],
    /// 1-indexed page number after clamping
    pub page: usize,
    pub page_size: usize,
    /// Always at least 1
    pub total_pages: usize,
    /// Length of the whole sequence
    pub total: usize,
}

/// Number of pages for `count` items: `max(1, ceil(count / page_size))`
pub fn total_pages(count: usize, page_size: usize) -> usize {
    count.div_ceil(page_size.max(1)).max(1)
}

/// Slice out a 1-indexed page, clamping the page into range
pub fn paginate<T>(ordered: &[T], page: usize, page_size: usize) -> Page<'_, T> {
    let page_size = page_size.max(1);
    let total_pages = total_pages(ordered.len(), page_size);
    let page = page.clamp(1, total_pages);
    let start = ((page - 1) * page_size).min(ordered.len());
    let end = (start + page_size).min(ordered.len());

    Page {
        items: &ordered[start..end],
        page,
        page_size,
        total_pages,
        total: ordered.len(),
    }
}

/// User-controlled view parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub filter: Filter,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
    page: usize,
    page_size: usize,
}

impl ViewState {
    pub fn new(page_size: usize) -> Self {
        Self {
            filter: Filter::default(),
            sort_field: SortField::default(),
            sort_direction: SortDirection::default(),
            page: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page.max(1);
    }

    /// Change the page size and return to the first page
    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
        self.page = 1;
    }

    /// Header click: sort by `field` and flip the direction
    pub fn sort_by(&mut self, field: SortField) {
        self.sort_field = field;
        self.sort_direction = self.sort_direction.toggled();
    }

    /// Clamp the current page against a (new) filtered count
    pub fn clamp_page(&mut self, filtered_count: usize) -> usize {
        self.page = self.page.clamp(1, total_pages(filtered_count, self.page_size));
        self.page
    }

    /// Filter then sort `entries` according to this state
    pub fn apply<'a, I>(&self, entries: I) -> Vec<&'a EventEntry>
    where
        I: IntoIterator<Item = &'a EventEntry>,
    {
        sort(
            filter(entries, &self.filter),
            self.sort_field,
            self.sort_direction,
        )
    }
}

impl Default for ViewState {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Ids marked for bulk actions
///
/// Independent of filter, sort, and page: ids scrolled out of view stay
/// selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: HashSet<String>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip one id; returns whether it is now selected
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    /// Select or deselect every id on the current page
    pub fn select_all<'a, I>(&mut self, ids_on_page: I, checked: bool)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for id in ids_on_page {
            if checked {
                self.ids.insert(id.to_string());
            } else {
                self.ids.remove(id);
            }
        }
    }

    /// Whether every id on the page is selected (false for an empty page)
    pub fn all_selected<'a, I>(&self, ids_on_page: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut any = false;
        for id in ids_on_page {
            if !self.ids.contains(id) {
                return false;
            }
            any = true;
        }
        any
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &HashSet<String> {
        &self.ids
    }
}

/// A serialized export ready to be saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDocument {
    /// `audit-export-<epoch-ms>.json`
    pub file_name: String,
    /// Pretty-printed JSON array of entries
    pub contents: String,
    /// Number of exported entries
    pub count: usize,
}

impl ExportDocument {
    /// Write the document into `dir`, returning the file path
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = dir.as_ref().join(&self.file_name);
        write_atomic(&path, self.contents.as_bytes())?;
        tracing::info!(path = %path.display(), count = self.count, "Export written");
        Ok(path)
    }
}

/// Export the selected entries, or everything when no selected entry is
/// in `sorted`
///
/// Output keeps the order of `sorted`.
pub fn export(sorted: &[&EventEntry], selection: &Selection) -> Result<ExportDocument> {
    export_at(sorted, selection, now_millis())
}

/// `export` with an explicit timestamp for the file name
pub fn export_at(
    sorted: &[&EventEntry],
    selection: &Selection,
    timestamp: u64,
) -> Result<ExportDocument> {
    let selected: Vec<&EventEntry> = sorted
        .iter()
        .copied()
        .filter(|e| selection.contains(&e.id))
        .collect();
    let chosen = if selected.is_empty() {
        sorted.to_vec()
    } else {
        selected
    };

    Ok(ExportDocument {
        file_name: format!("audit-export-{}.json", timestamp),
        contents: serde_json::to_string_pretty(&chosen)?,
        count: chosen.len(),
    })
}
