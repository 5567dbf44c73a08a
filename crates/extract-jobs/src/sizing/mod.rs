//! Document sizing policy and section targeting helpers
//!
//! Pure functions only: no network access and no shared state.

mod locator;
mod sizer;

pub use locator::ContentLocator;
pub use sizer::{DocumentSizer, DocumentSizingResult, SizingMethod, SizingPolicy, OMISSION_MARKER};
