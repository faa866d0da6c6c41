//! Domain layer for the ride dispatch backend.
//!
//! This crate contains:
//! - Core entities: users, driver profiles, ride requests, ride offers
//! - The push event taxonomy shared by the WebSocket layer
//! - The typed dispatch error with its stable wire codes

pub mod error;
pub mod events;
pub mod models;
