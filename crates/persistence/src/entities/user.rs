//! User entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{Role, User};

/// Database row mapping for the users table.
#[derive(Debug, Clone, FromRow)]
pub struct UserEntity {
    pub id: Uuid,
    pub username: String,
    pub role: String,
    pub phone_number: String,
    pub completed_rides: i32,
    pub created_at: DateTime<Utc>,
}

impl UserEntity {
    /// Convert to domain model.
    pub fn into_domain(self) -> User {
        let role = self.role.parse::<Role>().unwrap_or(Role::Passenger);

        User {
            id: self.id,
            username: self.username,
            role,
            phone_number: self.phone_number,
            completed_rides: self.completed_rides,
            created_at: self.created_at,
        }
    }
}

impl From<UserEntity> for User {
    fn from(entity: UserEntity) -> Self {
        entity.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_domain_parses_role() {
        let entity = UserEntity {
            id: Uuid::new_v4(),
            username: "ramesh".to_string(),
            role: "driver".to_string(),
            phone_number: "+911234567890".to_string(),
            completed_rides: 3,
            created_at: Utc::now(),
        };

        let user = entity.into_domain();
        assert_eq!(user.role, Role::Driver);
        assert_eq!(user.completed_rides, 3);
    }

    #[test]
    fn test_into_domain_defaults_unknown_role() {
        let entity = UserEntity {
            id: Uuid::new_v4(),
            username: "x".to_string(),
            role: "robot".to_string(),
            phone_number: String::new(),
            completed_rides: 0,
            created_at: Utc::now(),
        };

        assert_eq!(entity.into_domain().role, Role::Passenger);
    }
}
