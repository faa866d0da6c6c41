//! Repository implementations.

pub mod driver_profile;
pub mod ride_offer;
pub mod ride_request;
pub mod user;

pub use driver_profile::{DriverIdentity, DriverProfileRepository};
pub use ride_offer::RideOfferRepository;
pub use ride_request::{RideRequestInput, RideRequestRepository};
pub use user::{UserInput, UserRepository};
