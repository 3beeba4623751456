//! Quilt layouts and the runtime layout catalog
//!
//! A layout describes how views tile into a quilt: the grid (columns × rows)
//! and the pixel size of the quilt and of each view. The catalog maps small
//! integer ids to known layouts and can be extended at runtime when new
//! hardware needs a layout that is not built in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Pixel slack tolerated when matching a quilt image to a catalog layout
pub const DIMENSION_TOLERANCE: u32 = 1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("Quilt layout {0} is not in the catalog")]
    UnknownLayout(LayoutId),
    #[error("Invalid quilt layout: {0}")]
    Invalid(String),
}

/// Identifier of a layout in the [`LayoutCatalog`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayoutId(pub u32);

impl fmt::Display for LayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Grid and pixel dimensions of a quilt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuiltLayout {
    /// Human readable label (e.g. "4k Quilt, 45 Views")
    #[serde(default)]
    pub description: String,
    pub quilt_width: u32,
    pub quilt_height: u32,
    pub view_width: u32,
    pub view_height: u32,
    pub columns: u32,
    pub rows: u32,
}

impl QuiltLayout {
    /// Layout built from explicit view dimensions; the quilt is exactly
    /// `columns × view_width` by `rows × view_height`
    pub fn new(columns: u32, rows: u32, view_width: u32, view_height: u32) -> Result<Self, LayoutError> {
        let (quilt_width, quilt_height) = columns
            .checked_mul(view_width)
            .zip(rows.checked_mul(view_height))
            .ok_or_else(|| {
                LayoutError::Invalid(format!(
                    "{}x{} views of {}x{} pixels overflow the quilt size",
                    columns, rows, view_width, view_height
                ))
            })?;
        let layout = Self {
            description: format!("{}x{} Views", columns, rows),
            quilt_width,
            quilt_height,
            view_width,
            view_height,
            columns,
            rows,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Layout built from a quilt size; views get the floor of the cell size
    pub fn from_quilt(
        description: impl Into<String>,
        quilt_width: u32,
        quilt_height: u32,
        columns: u32,
        rows: u32,
    ) -> Result<Self, LayoutError> {
        if columns == 0 || rows == 0 {
            return Err(LayoutError::Invalid("grid must have at least one cell".to_string()));
        }
        let layout = Self {
            description: description.into(),
            quilt_width,
            quilt_height,
            view_width: quilt_width / columns,
            view_height: quilt_height / rows,
            columns,
            rows,
        };
        layout.validate()?;
        Ok(layout)
    }

    fn validate(&self) -> Result<(), LayoutError> {
        if self.columns == 0 || self.rows == 0 {
            return Err(LayoutError::Invalid("grid must have at least one cell".to_string()));
        }
        if self.view_width == 0 || self.view_height == 0 {
            return Err(LayoutError::Invalid(format!(
                "views of {}x{} pixels are empty",
                self.view_width, self.view_height
            )));
        }
        if self.columns.checked_mul(self.rows).is_none() {
            return Err(LayoutError::Invalid(format!(
                "a {}x{} grid has too many views",
                self.columns, self.rows
            )));
        }
        Ok(())
    }

    /// Number of views in the quilt
    pub fn view_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    /// Aspect ratio of a single view
    pub fn view_aspect(&self) -> f64 {
        self.view_width as f64 / self.view_height as f64
    }

    /// Whether an image of the given size is this layout's quilt, allowing
    /// for the rounding slack of earlier quilt generation
    pub fn matches_dimensions(&self, width: u32, height: u32) -> bool {
        self.quilt_width.abs_diff(width) <= DIMENSION_TOLERANCE
            && self.quilt_height.abs_diff(height) <= DIMENSION_TOLERANCE
    }

    /// Whether two layouts describe the same grid on the same quilt size
    pub fn same_format(&self, other: &QuiltLayout) -> bool {
        self.columns == other.columns
            && self.rows == other.rows
            && self.matches_dimensions(other.quilt_width, other.quilt_height)
    }
}

impl fmt::Display for QuiltLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}x{} px, {}x{} views of {}x{} px)",
            self.description,
            self.quilt_width,
            self.quilt_height,
            self.columns,
            self.rows,
            self.view_width,
            self.view_height
        )
    }
}

/// Runtime registry of known quilt layouts
#[derive(Debug, Clone)]
pub struct LayoutCatalog {
    layouts: BTreeMap<LayoutId, QuiltLayout>,
    next_id: u32,
}

impl Default for LayoutCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LayoutCatalog {
    /// Catalog without any layouts
    pub fn empty() -> Self {
        Self {
            layouts: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Catalog holding the layouts of all supported hardware
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for (description, width, height, columns, rows) in [
            ("2k Quilt, 32 Views", 2048, 2048, 4, 8),
            ("4k Quilt, 45 Views", 4095, 4095, 5, 9),
            ("8k Quilt, 45 Views", 8192, 8192, 5, 9),
            ("Portrait, 48 Views", 3360, 3360, 8, 6),
        ] {
            // Built-in entries are all non-empty grids
            if let Ok(layout) = QuiltLayout::from_quilt(description, width, height, columns, rows) {
                catalog.append(layout);
            }
        }
        catalog
    }

    pub fn get(&self, id: LayoutId) -> Option<&QuiltLayout> {
        self.layouts.get(&id)
    }

    /// Register a new layout; ids are never reused
    pub fn append(&mut self, layout: QuiltLayout) -> LayoutId {
        let id = LayoutId(self.next_id);
        self.next_id += 1;
        debug!(id = %id, layout = %layout, "Registered quilt layout");
        self.layouts.insert(id, layout);
        id
    }

    /// Swap the layout stored under an existing id
    pub fn replace(&mut self, id: LayoutId, layout: QuiltLayout) -> Result<QuiltLayout, LayoutError> {
        match self.layouts.get_mut(&id) {
            Some(slot) => {
                debug!(id = %id, layout = %layout, "Replaced quilt layout");
                Ok(std::mem::replace(slot, layout))
            }
            None => Err(LayoutError::UnknownLayout(id)),
        }
    }

    pub fn remove(&mut self, id: LayoutId) -> Result<QuiltLayout, LayoutError> {
        let removed = self.layouts.remove(&id).ok_or(LayoutError::UnknownLayout(id))?;
        debug!(id = %id, "Removed quilt layout");
        Ok(removed)
    }

    /// First layout, in id order, whose quilt size matches within the tolerance
    pub fn match_dimensions(&self, width: u32, height: u32) -> Option<(LayoutId, &QuiltLayout)> {
        self.layouts
            .iter()
            .find(|(_, layout)| layout.matches_dimensions(width, height))
            .map(|(id, layout)| (*id, layout))
    }

    pub fn iter(&self) -> impl Iterator<Item = (LayoutId, &QuiltLayout)> {
        self.layouts.iter().map(|(id, layout)| (*id, layout))
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}
