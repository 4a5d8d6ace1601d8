use crate::{
    db::DbPool,
    error::AppError,
    models::vehicle::{Vehicle, VehicleStatus},
};

#[derive(Clone)]
pub struct VehicleStore {
    db: DbPool,
}

impl VehicleStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn insert(&self, vehicle: &Vehicle) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO vehicles (id, license_plate, brand, model, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        )
        .bind(&vehicle.id)
        .bind(&vehicle.license_plate)
        .bind(&vehicle.brand)
        .bind(&vehicle.model)
        .bind(vehicle.status)
        .bind(vehicle.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Vehicle>, AppError> {
        let vehicle = sqlx::query_as::<_, Vehicle>("SELECT * FROM vehicles WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(vehicle)
    }

    pub async fn find_by_plate(&self, plate: &str) -> Result<Option<Vehicle>, AppError> {
        let vehicle =
            sqlx::query_as::<_, Vehicle>("SELECT * FROM vehicles WHERE license_plate = ?1")
                .bind(plate)
                .fetch_optional(&self.db)
                .await?;
        Ok(vehicle)
    }

    pub async fn update(&self, vehicle: &Vehicle) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE vehicles SET license_plate = ?2, brand = ?3, model = ?4, status = ?5 WHERE id = ?1",
        )
        .bind(&vehicle.id)
        .bind(&vehicle.license_plate)
        .bind(&vehicle.brand)
        .bind(&vehicle.model)
        .bind(vehicle.status)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM vehicles WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(&self) -> Result<Vec<Vehicle>, AppError> {
        let vehicles =
            sqlx::query_as::<_, Vehicle>("SELECT * FROM vehicles ORDER BY license_plate")
                .fetch_all(&self.db)
                .await?;
        Ok(vehicles)
    }

    pub async fn list_available(&self) -> Result<Vec<Vehicle>, AppError> {
        let vehicles = sqlx::query_as::<_, Vehicle>(
            "SELECT * FROM vehicles WHERE status = 'available' ORDER BY license_plate",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(vehicles)
    }

    pub async fn set_status(&self, id: &str, status: VehicleStatus) -> Result<(), AppError> {
        sqlx::query("UPDATE vehicles SET status = ?2 WHERE id = ?1")
            .bind(id)
            .bind(status)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn count_in_service(&self) -> Result<i64, AppError> {
        let count =
            sqlx::query_scalar("SELECT COUNT(*) FROM vehicles WHERE status != 'out_of_service'")
                .fetch_one(&self.db)
                .await?;
        Ok(count)
    }

    pub async fn count_with_status(&self, status: VehicleStatus) -> Result<i64, AppError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM vehicles WHERE status = ?1")
            .bind(status)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}
