//! Request extractors.

pub mod party;

pub use party::AuthenticatedParty;
