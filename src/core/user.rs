use sha2::{Digest, Sha256};

/// Пользователь сервера
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    /// SHA-256 хэш пароля (hex string)
    pub password_hash: String,
    /// Суперпользователь обходит проверку прав и может выполнять KILL чужих сессий
    pub is_superuser: bool,
    /// Сессии пользователя по умолчанию открываются только для чтения
    pub read_only: bool,
}

impl User {
    #[must_use]
    pub fn new(username: String, password: &str, is_superuser: bool) -> Self {
        Self {
            username,
            password_hash: Self::hash_password(password),
            is_superuser,
            read_only: false,
        }
    }

    #[must_use]
    pub fn hash_password(password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }

    #[must_use]
    pub fn verify_password(&self, password: &str) -> bool {
        self.password_hash == Self::hash_password(password)
    }
}
