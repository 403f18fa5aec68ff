use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{error::LayoutError, layout::ArrayLayout};

/// Lightweight description of the arrays inside one remote object.
///
/// Arrays keep the order in which they were found in the object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub arrays: IndexMap<String, ArrayLayout>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_array(mut self, name: impl Into<String>, layout: ArrayLayout) -> Self {
        self.insert(name, layout);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, layout: ArrayLayout) {
        self.arrays.insert(name.into(), layout);
    }

    pub fn array(&self, name: &str) -> Option<&ArrayLayout> {
        self.arrays.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn validate(&self, object_size: u64) -> Result<(), LayoutError> {
        self.arrays
            .iter()
            .try_for_each(|(name, layout)| layout.validate(name, object_size))
    }
}
