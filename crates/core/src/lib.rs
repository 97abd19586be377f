//! `authors-core` — domain foundation for the authors service.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! the author aggregate, the foreign post shape, change operations and the
//! read-side filters.

pub mod author;
pub mod error;
pub mod filter;
pub mod id;
pub mod operation;
pub mod post;

pub use author::{Author, AuthorPatch, NewAuthor};
pub use error::{DomainError, DomainResult};
pub use filter::{AuthorFilter, Relations};
pub use id::{AuthorId, PostId};
pub use operation::Operation;
pub use post::Post;
