//! cf-file: Feature file I/O for CallForge
//!
//! Master-call MFCC matrices live in `.mfc` files, a fixed little-endian
//! binary layout:
//!
//! ```text
//! offset 0: u32 num_frames   (> 0)
//! offset 4: u32 num_coeffs   (> 0)
//! offset 8: f32 x num_frames x num_coeffs
//! EOF at 8 + num_frames * num_coeffs * 4
//! ```
//!
//! `FeatureStore` maps call ids to files under a root directory and
//! validates the header and exact file length on load.

mod error;
mod store;

pub use error::{FileError, FileResult};
pub use store::{FeatureStore, MFC_EXTENSION};
