//! Account management, reserved to the principal admin.

use tracing::{info, warn};

use crate::{
    auth::Actor,
    db::DbPool,
    error::AppError,
    models::{
        notification::{NotificationKind, NotificationMeta},
        user::{NewUser, Role, User, UserUpdate},
    },
    services::{notifications::NotificationDispatcher, users::UserStore},
};

#[derive(Clone)]
pub struct UserService {
    users: UserStore,
    dispatcher: NotificationDispatcher,
}

impl UserService {
    pub fn new(db: DbPool, dispatcher: NotificationDispatcher) -> Self {
        Self {
            users: UserStore::new(db),
            dispatcher,
        }
    }

    pub async fn create_user(&self, actor: &Actor, new: NewUser) -> Result<User, AppError> {
        actor.require_principal_admin()?;
        let mut user = User::new(new.name.trim(), new.email.trim().to_lowercase(), new.role);
        if let Some(address) = new.contact_address {
            user.apply_update(UserUpdate {
                contact_address: Some(address),
                ..UserUpdate::default()
            });
        }
        validate(&user)?;
        self.ensure_email_free(&user.email, None).await?;

        self.users.insert(&user).await?;
        info!(user_id = %user.id, role = %user.role, actor = %actor.name, "user created");
        Ok(user)
    }

    pub async fn update_user(
        &self,
        actor: &Actor,
        user_id: &str,
        update: UserUpdate,
    ) -> Result<User, AppError> {
        actor.require_principal_admin()?;
        let mut user = self.users.require(user_id).await?;
        let was_admin = user.is_active_admin();
        let previous_role = user.role;

        if let Some(email) = update.email.as_deref() {
            self.ensure_email_free(email, Some(user_id)).await?;
        }
        user.apply_update(update);
        validate(&user)?;
        if was_admin && !user.is_active_admin() {
            self.ensure_not_last_admin(&user).await?;
        }

        self.users.update(&user).await?;
        info!(user_id, role = %user.role, active = user.is_active, actor = %actor.name, "user updated");

        if user.is_active && user.role != previous_role {
            let body = format!("Your role is now {}", role_label(user.role));
            let meta = NotificationMeta::new(NotificationKind::System).with("role", user.role.as_str());
            if let Err(err) = self
                .dispatcher
                .send_to_user(&user.id, "Account updated", &body, &meta)
                .await
            {
                warn!(user_id, error = %err, "could not store notification");
            }
        }
        Ok(user)
    }

    /// Accounts are deactivated, never removed, so trips and notifications
    /// keep pointing at them.
    pub async fn deactivate_user(&self, actor: &Actor, user_id: &str) -> Result<(), AppError> {
        actor.require_principal_admin()?;
        let user = self.users.require(user_id).await?;
        if user.is_active_admin() {
            self.ensure_not_last_admin(&user).await?;
        }
        self.users.set_active(user_id, false).await?;
        info!(user_id, actor = %actor.name, "user deactivated");
        Ok(())
    }

    /// Drivers may only look themselves up.
    pub async fn get_user(&self, actor: &Actor, user_id: &str) -> Result<User, AppError> {
        match actor.role {
            Role::PrincipalAdmin | Role::Administrative => {}
            Role::Driver if actor.id == user_id => {}
            Role::Driver => return Err(AppError::Forbidden),
        }
        self.users.require(user_id).await
    }

    /// Active drivers, for assigning trips.
    pub async fn list_drivers(&self, actor: &Actor) -> Result<Vec<User>, AppError> {
        actor.require_admin()?;
        self.users.list_drivers().await
    }

    async fn ensure_email_free(&self, email: &str, except: Option<&str>) -> Result<(), AppError> {
        match self.users.find_by_email(email).await? {
            Some(existing) if Some(existing.id.as_str()) != except => {
                Err(AppError::BadRequest("email is already in use".into()))
            }
            _ => Ok(()),
        }
    }

    async fn ensure_not_last_admin(&self, user: &User) -> Result<(), AppError> {
        if self.users.count_active_admins().await? <= 1 {
            warn!(user_id = %user.id, "refusing to remove the last administrator");
            return Err(AppError::BadRequest(
                "the last active administrator cannot be removed".into(),
            ));
        }
        Ok(())
    }
}

fn validate(user: &User) -> Result<(), AppError> {
    if user.name.chars().count() < 2 {
        return Err(AppError::BadRequest("name must be at least 2 characters".into()));
    }
    match user.email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(AppError::BadRequest(format!("{:?} is not a valid email", user.email))),
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::PrincipalAdmin => "principal administrator",
        Role::Administrative => "administrative staff",
        Role::Driver => "driver",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_need_a_domain() {
        assert!(validate(&User::new("Ana", "ana@fleet.test", Role::Driver)).is_ok());
        assert!(validate(&User::new("Ana", "ana@fleet", Role::Driver)).is_err());
        assert!(validate(&User::new("Ana", "@fleet.test", Role::Driver)).is_err());
        assert!(validate(&User::new("A", "a@fleet.test", Role::Driver)).is_err());
    }
}
