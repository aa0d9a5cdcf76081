use crate::classifier::Category;
use std::collections::TryReserveError;
use std::ffi::NulError;
use thiserror::Error;

/// Failures that belong to the harness itself rather than to the plugin.
///
/// Every variant abandons the current iteration before any plugin call is made.
/// None of them is fatal to the fuzzing loop: the next iteration starts from a
/// clean baseline regardless.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Growing the backing buffer of a string array failed.
    #[error("Failed to grow string array to {requested} slots: {source}")]
    Grow {
        requested: usize,
        #[source]
        source: TryReserveError,
    },

    /// Duplicating an entry onto the heap failed.
    #[error("Failed to duplicate entry of {len} bytes: {source}")]
    Duplicate {
        len: usize,
        #[source]
        source: TryReserveError,
    },

    /// A collection would exceed the configured entry ceiling.
    #[error("The {category} collection is full at {limit} entries")]
    EntryLimit { category: Category, limit: usize },

    /// An entry could not be turned into a C string.
    #[error("Entry is not a valid C string: {0}")]
    InteriorNul(#[from] NulError),

    /// The fuzz buffer could not be opened as a readable stream.
    #[error("Failed to open input as a readable stream: {0}")]
    OpenInput(#[from] std::io::Error),
}
