//! Persistence layer for the ride dispatch backend.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - Repository implementations for users, driver profiles, ride requests,
//!   and ride offers

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
