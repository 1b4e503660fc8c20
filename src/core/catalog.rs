use std::collections::HashMap;

use super::error::DatabaseError;
use super::privilege::{Privilege, PrivilegeSet};
use super::user::User;

/// Права, выданные сессии при аутентификации
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub username: String,
    pub database: String,
    pub is_superuser: bool,
    pub privileges: PrivilegeSet,
    pub read_only: bool,
}

impl SessionGrant {
    /// Full access, used for bootstrap sessions and tests
    #[must_use]
    pub fn superuser(username: &str, database: &str) -> Self {
        Self {
            username: username.to_string(),
            database: database.to_string(),
            is_superuser: true,
            privileges: PrivilegeSet::all(),
            read_only: false,
        }
    }
}

/// Пользователи и их права по базам данных.
///
/// The engine only reads privilege records; they change through the
/// administrative statements handled by the server.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// username -> User
    pub users: HashMap<String, User>,
    /// database -> (username -> privileges)
    pub grants: HashMap<String, HashMap<String, PrivilegeSet>>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Создает начальную конфигурацию (суперпользователь + БД)
    #[must_use]
    pub fn initialize(superuser: &str, password: &str, database: &str) -> Self {
        let mut catalog = Self::new();
        catalog
            .users
            .insert(superuser.to_string(), User::new(superuser.to_string(), password, true));
        catalog
            .grants
            .entry(database.to_string())
            .or_default()
            .insert(superuser.to_string(), PrivilegeSet::all());
        catalog
    }

    pub fn create_user(&mut self, username: &str, password: &str, is_superuser: bool) -> Result<(), DatabaseError> {
        if self.users.contains_key(username) {
            return Err(DatabaseError::UserAlreadyExists(username.to_string()));
        }
        self.users
            .insert(username.to_string(), User::new(username.to_string(), password, is_superuser));
        Ok(())
    }

    pub fn grant(&mut self, database: &str, username: &str, privileges: &[Privilege]) -> Result<(), DatabaseError> {
        if !self.users.contains_key(username) {
            return Err(DatabaseError::UserNotFound(username.to_string()));
        }
        let set = self
            .grants
            .entry(database.to_string())
            .or_default()
            .entry(username.to_string())
            .or_default();
        for p in privileges {
            set.grant(*p);
        }
        Ok(())
    }

    pub fn revoke(&mut self, database: &str, username: &str, privileges: &[Privilege]) -> Result<(), DatabaseError> {
        if !self.users.contains_key(username) {
            return Err(DatabaseError::UserNotFound(username.to_string()));
        }
        if let Some(set) = self.grants.get_mut(database).and_then(|g| g.get_mut(username)) {
            for p in privileges {
                set.revoke(*p);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn privileges(&self, database: &str, username: &str) -> PrivilegeSet {
        self.grants
            .get(database)
            .and_then(|g| g.get(username))
            .copied()
            .unwrap_or_default()
    }

    /// Проверяет пароль и возвращает права сессии
    pub fn authenticate(&self, username: &str, password: &str, database: &str) -> Result<SessionGrant, DatabaseError> {
        let user = self.users.get(username).ok_or(DatabaseError::AuthenticationFailed)?;
        if !user.verify_password(password) {
            return Err(DatabaseError::AuthenticationFailed);
        }
        let privileges = if user.is_superuser {
            PrivilegeSet::all()
        } else {
            self.privileges(database, username)
        };
        Ok(SessionGrant {
            username: username.to_string(),
            database: database.to_string(),
            is_superuser: user.is_superuser,
            privileges,
            read_only: user.read_only,
        })
    }
}
