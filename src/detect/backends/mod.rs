pub mod marker;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use marker::{MarkerBackend, MARKER_COLOR};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
