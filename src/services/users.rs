use crate::{
    db::DbPool,
    error::AppError,
    models::user::{Role, User},
};

#[derive(Clone)]
pub struct UserStore {
    db: DbPool,
}

impl UserStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn insert(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO users (id, name, email, role, contact_address, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(user.email.trim().to_lowercase())
        .bind(user.role)
        .bind(&user.contact_address)
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    pub async fn require(&self, id: &str) -> Result<User, AppError> {
        self.get(id).await?.ok_or(AppError::NotFound)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?1")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    pub async fn update(&self, user: &User) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"UPDATE users SET name = ?2, email = ?3, role = ?4, contact_address = ?5, is_active = ?6
            WHERE id = ?1"#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(user.email.trim().to_lowercase())
        .bind(user.role)
        .bind(&user.contact_address)
        .bind(user.is_active)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    /// Active users, minus `excluded` when given.
    pub async fn list_active_except(&self, excluded: Option<&str>) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(
            r#"SELECT * FROM users
            WHERE is_active = 1 AND (?1 IS NULL OR id != ?1)
            ORDER BY name"#,
        )
        .bind(excluded)
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    pub async fn list_drivers(&self) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE role = ?1 AND is_active = 1 ORDER BY name",
        )
        .bind(Role::Driver)
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    pub async fn count_active_drivers(&self) -> Result<i64, AppError> {
        let count =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = ?1 AND is_active = 1")
                .bind(Role::Driver)
                .fetch_one(&self.db)
                .await?;
        Ok(count)
    }

    /// Active principal admins plus active administrative staff.
    pub async fn count_active_admins(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE role IN (?1, ?2) AND is_active = 1",
        )
        .bind(Role::PrincipalAdmin)
        .bind(Role::Administrative)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE users SET is_active = ?2 WHERE id = ?1")
            .bind(id)
            .bind(active)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}
