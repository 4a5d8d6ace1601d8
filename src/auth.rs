use crate::{
    error::AppError,
    models::{
        trip::Trip,
        user::{Role, User},
    },
};

/// The user on whose behalf an action runs.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

impl Actor {
    /// Trip and vehicle management.
    pub fn require_admin(&self) -> Result<&Self, AppError> {
        match self.role {
            Role::PrincipalAdmin | Role::Administrative => Ok(self),
            Role::Driver => Err(AppError::Forbidden),
        }
    }

    /// User management is reserved to the principal admin.
    pub fn require_principal_admin(&self) -> Result<&Self, AppError> {
        match self.role {
            Role::PrincipalAdmin => Ok(self),
            Role::Administrative | Role::Driver => Err(AppError::Forbidden),
        }
    }

    /// Confirm and finish are only open to the driver the trip is assigned to,
    /// whatever their role.
    pub fn require_driver_of(&self, trip: &Trip) -> Result<&Self, AppError> {
        if trip.driver_id == self.id {
            Ok(self)
        } else {
            Err(AppError::Forbidden)
        }
    }

    pub fn can_view(&self, trip: &Trip) -> bool {
        match self.role {
            Role::PrincipalAdmin | Role::Administrative => true,
            Role::Driver => trip.driver_id == self.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::trip::NewTrip;
    use chrono::{NaiveDate, Utc};

    fn actor(id: &str, role: Role) -> Actor {
        Actor {
            id: id.into(),
            name: id.into(),
            role,
        }
    }

    fn trip_for(driver: &str) -> Trip {
        Trip::from_new(
            NewTrip {
                driver_id: driver.into(),
                vehicle_id: "v".into(),
                departure_date: NaiveDate::from_ymd_opt(2025, 10, 6).unwrap(),
                departure_time: "08:00".into(),
                return_date: None,
                destination: "Durazno".into(),
                purpose: "Delivery".into(),
                departure_location: None,
                observations: None,
                estimated_distance: None,
            },
            "admin",
            Utc::now(),
        )
    }

    #[test]
    fn drivers_are_not_admins() {
        assert!(actor("a", Role::PrincipalAdmin).require_admin().is_ok());
        assert!(actor("b", Role::Administrative).require_admin().is_ok());
        assert!(matches!(
            actor("c", Role::Driver).require_admin(),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn only_principal_admin_manages_users() {
        assert!(actor("a", Role::PrincipalAdmin)
            .require_principal_admin()
            .is_ok());
        assert!(actor("b", Role::Administrative)
            .require_principal_admin()
            .is_err());
    }

    #[test]
    fn drivers_only_see_and_act_on_their_trips() {
        let trip = trip_for("driver-1");
        let owner = actor("driver-1", Role::Driver);
        let other = actor("driver-2", Role::Driver);
        assert!(owner.can_view(&trip));
        assert!(owner.require_driver_of(&trip).is_ok());
        assert!(!other.can_view(&trip));
        assert!(other.require_driver_of(&trip).is_err());
        assert!(actor("admin", Role::Administrative).can_view(&trip));
    }
}
