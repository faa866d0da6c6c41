//! User domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Role of an authenticated party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Passenger,
    Driver,
}

impl Role {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Passenger => "passenger",
            Role::Driver => "driver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passenger" => Ok(Role::Passenger),
            "driver" => Ok(Role::Driver),
            _ => Err(format!(
                "Invalid role: {}. Must be one of: passenger, driver",
                s
            )),
        }
    }
}

/// A registered user (passenger or driver).
///
/// Users are created by an external registration flow; the dispatch core
/// only ever increments `completed_rides` when a ride completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub phone_number: String,
    pub completed_rides: i32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::faker::name::en::Name;
    use fake::Fake;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Passenger, Role::Driver] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_role_rejects_unknown() {
        assert!("admin".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde_uses_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Passenger).unwrap(), "\"passenger\"");
        assert_eq!(serde_json::to_string(&Role::Driver).unwrap(), "\"driver\"");
    }

    #[test]
    fn test_user_serialization_keeps_counter() {
        let user = User {
            id: Uuid::new_v4(),
            username: Name().fake(),
            role: Role::Driver,
            phone_number: "+911234567890".to_string(),
            completed_rides: 7,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("\"completed_rides\":7"));
        assert!(json.contains("\"driver\""));
    }
}
