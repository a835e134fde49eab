//! Shared Trait Seams
//!
//! Defines the contracts that decouple the photo-frame subsystems:
//! - [`provider::CloudProvider`] - capability contract over a cloud folder store
//! - [`http::HttpClient`] - async HTTP abstraction so providers are mockable
//! - [`error::FrameError`] - the error taxonomy shared across crates

pub mod error;
pub mod http;
pub mod provider;

pub use error::{FrameError, Result};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use provider::{ChangeEvent, ChangePage, CloudProvider, FolderSpec, PhotoRecord, UNBOUNDED_DEPTH};
