//! Vehicle management. Writes are reserved to administrators.

use chrono::NaiveDate;
use tracing::info;

use crate::{
    auth::Actor,
    db::DbPool,
    error::AppError,
    models::vehicle::{normalize_plate, NewVehicle, Vehicle, VehicleStatus, VehicleUpdate},
    services::{trips::TripStore, vehicles::VehicleStore},
};

const PLATE_LEN: std::ops::RangeInclusive<usize> = 6..=10;

#[derive(Clone)]
pub struct VehicleService {
    vehicles: VehicleStore,
    trips: TripStore,
}

impl VehicleService {
    pub fn new(db: DbPool) -> Self {
        Self {
            vehicles: VehicleStore::new(db.clone()),
            trips: TripStore::new(db),
        }
    }

    pub async fn create_vehicle(&self, actor: &Actor, new: NewVehicle) -> Result<Vehicle, AppError> {
        actor.require_admin()?;
        let vehicle = Vehicle::new(new.license_plate, new.brand.trim(), new.model.trim());
        validate(&vehicle)?;
        self.ensure_plate_free(&vehicle.license_plate, None).await?;

        self.vehicles.insert(&vehicle).await?;
        info!(vehicle_id = %vehicle.id, plate = %vehicle.license_plate, actor = %actor.name, "vehicle created");
        Ok(vehicle)
    }

    /// Workshop and retirement are refused while the vehicle still has active trips.
    pub async fn update_vehicle(
        &self,
        actor: &Actor,
        vehicle_id: &str,
        update: VehicleUpdate,
    ) -> Result<Vehicle, AppError> {
        actor.require_admin()?;
        let mut vehicle = self.require(vehicle_id).await?;

        if let Some(plate) = update.license_plate.as_deref() {
            self.ensure_plate_free(&normalize_plate(plate), Some(vehicle_id))
                .await?;
        }
        match update.status {
            Some(VehicleStatus::Maintenance | VehicleStatus::OutOfService) => {
                if self.trips.active_count_for_vehicle(vehicle_id, None).await? > 0 {
                    return Err(AppError::BadRequest(format!(
                        "vehicle {} has active trips, its status cannot change",
                        vehicle.license_plate
                    )));
                }
            }
            Some(VehicleStatus::Available | VehicleStatus::InUse) | None => {}
        }

        vehicle.apply_update(update);
        validate(&vehicle)?;
        self.vehicles.update(&vehicle).await?;
        info!(vehicle_id, status = ?vehicle.status, actor = %actor.name, "vehicle updated");
        Ok(vehicle)
    }

    /// Only vehicles that never carried a trip can be removed; the rest are
    /// retired through `out_of_service` so trip history keeps its vehicle.
    pub async fn delete_vehicle(&self, actor: &Actor, vehicle_id: &str) -> Result<(), AppError> {
        actor.require_admin()?;
        let vehicle = self.require(vehicle_id).await?;
        if self.trips.active_count_for_vehicle(vehicle_id, None).await? > 0 {
            return Err(AppError::BadRequest(format!(
                "vehicle {} has active trips and cannot be deleted",
                vehicle.license_plate
            )));
        }
        if self.trips.count_for_vehicle(vehicle_id).await? > 0 {
            return Err(AppError::BadRequest(format!(
                "vehicle {} has trip history, mark it out of service instead",
                vehicle.license_plate
            )));
        }
        if !self.vehicles.delete(vehicle_id).await? {
            return Err(AppError::NotFound);
        }
        info!(vehicle_id, plate = %vehicle.license_plate, actor = %actor.name, "vehicle deleted");
        Ok(())
    }

    pub async fn get_vehicle(&self, vehicle_id: &str) -> Result<Vehicle, AppError> {
        self.require(vehicle_id).await
    }

    pub async fn list_vehicles(&self) -> Result<Vec<Vehicle>, AppError> {
        self.vehicles.list().await
    }

    /// Available vehicles, minus those already booked on the given dates.
    pub async fn available_vehicles(
        &self,
        departure: Option<NaiveDate>,
        return_date: Option<NaiveDate>,
    ) -> Result<Vec<Vehicle>, AppError> {
        let vehicles = self.vehicles.list_available().await?;
        let Some(departure) = departure else {
            return Ok(vehicles);
        };
        let mut free = Vec::with_capacity(vehicles.len());
        for vehicle in vehicles {
            if !self
                .trips
                .vehicle_has_conflict(&vehicle.id, departure, return_date, None)
                .await?
            {
                free.push(vehicle);
            }
        }
        Ok(free)
    }

    async fn require(&self, vehicle_id: &str) -> Result<Vehicle, AppError> {
        self.vehicles
            .get(vehicle_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    async fn ensure_plate_free(&self, plate: &str, except: Option<&str>) -> Result<(), AppError> {
        match self.vehicles.find_by_plate(plate).await? {
            Some(existing) if Some(existing.id.as_str()) != except => Err(AppError::BadRequest(
                format!("a vehicle with plate {plate} already exists"),
            )),
            _ => Ok(()),
        }
    }
}

fn validate(vehicle: &Vehicle) -> Result<(), AppError> {
    if !PLATE_LEN.contains(&vehicle.license_plate.chars().count()) {
        return Err(AppError::BadRequest(
            "license plate must be between 6 and 10 characters".into(),
        ));
    }
    if vehicle.brand.chars().count() < 2 {
        return Err(AppError::BadRequest("brand must be at least 2 characters".into()));
    }
    if vehicle.model.is_empty() {
        return Err(AppError::BadRequest("model is required".into()));
    }
    Ok(())
}
