//! rollcall-store — SQLite persistence for enrolled identities.
//!
//! The matcher reads this store through [`rollcall_core::GallerySource`];
//! enrollment writes vectors with the same codec the gallery loader decodes.

pub mod enroll;
pub mod store;

pub use enroll::{EnrolledEmbedding, EnrollmentRequest};
pub use store::{IdentityStore, IdentitySummary, StoreError};
