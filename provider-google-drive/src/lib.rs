//! # Google Drive Provider
//!
//! Implements the `CloudProvider` trait for Google Drive API v3.
//!
//! ## Overview
//!
//! This module provides:
//! - Recursive folder scans with image filtering and cycle defense
//! - Content downloads with byte ceilings
//! - Incremental sync using change tokens (pageToken)
//! - Exponential backoff for rate limiting and server errors
//! - Token refresh on 401 via the shared token cache

pub mod connector;
pub mod error;
pub mod types;

pub use connector::GoogleDriveProvider;
pub use error::{GoogleDriveError, Result};
