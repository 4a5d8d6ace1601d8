use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum VehicleStatus {
    #[default]
    Available,
    InUse,
    Maintenance,
    OutOfService,
}

impl VehicleStatus {
    /// Vehicles in the workshop or retired cannot be assigned to new trips.
    pub fn is_assignable(&self) -> bool {
        matches!(self, VehicleStatus::Available | VehicleStatus::InUse)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    pub license_plate: String,
    pub brand: String,
    pub model: String,
    pub status: VehicleStatus,
    pub created_at: DateTime<Utc>,
}

impl Vehicle {
    pub fn new(
        license_plate: impl Into<String>,
        brand: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let license_plate: String = license_plate.into();
        Self {
            id: Uuid::new_v4().to_string(),
            license_plate: normalize_plate(&license_plate),
            brand: brand.into(),
            model: model.into(),
            status: VehicleStatus::Available,
            created_at: Utc::now(),
        }
    }

    pub fn label(&self) -> String {
        format!("{} {} ({})", self.brand, self.model, self.license_plate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVehicle {
    pub license_plate: String,
    pub brand: String,
    pub model: String,
}

/// Partial vehicle edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleUpdate {
    pub license_plate: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub status: Option<VehicleStatus>,
}

impl Vehicle {
    pub fn apply_update(&mut self, update: VehicleUpdate) {
        if let Some(plate) = update.license_plate {
            self.license_plate = normalize_plate(&plate);
        }
        if let Some(brand) = update.brand {
            self.brand = brand.trim().to_string();
        }
        if let Some(model) = update.model {
            self.model = model.trim().to_string();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
    }
}

pub fn normalize_plate(plate: &str) -> String {
    plate.trim().to_uppercase()
}
