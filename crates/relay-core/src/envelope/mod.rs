//! Envelope recovery and normalization.
//!
//! [`recovery`] turns arbitrary worker text into a lazy sequence of JSON
//! candidates; [`normalizer`] reduces that sequence to one
//! [`CanonicalDispatchEnvelope`](crate::models::CanonicalDispatchEnvelope).

pub mod normalizer;
pub mod recovery;

pub use normalizer::{normalize, DEFAULT_INLINE_THRESHOLD_BYTES, MERGED_AGENT};
pub use recovery::{extract_candidates, recover_json, sanitize_json_text, Candidates, ShapeMarkers};
