//! Login accounts.
//!
//! A login account ties a username and password to a role and, for
//! customers and personnel, to the customer or employee record it acts as.
//! Passwords are stored as bcrypt hashes, which carry their own salt.

use atm_db::{text, Binds, DbError, Gateway, Row, StatementRequest, Value};
use atm_types::Role;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),
    /// Unknown username or wrong password. The two are not distinguished.
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("username already exists: {0}")]
    DuplicateUsername(String),
    #[error("password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),
    #[error("database error: {0}")]
    Database(#[from] DbError),
}

/// A login account as listed to callers. Credential material is never
/// included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginAccount {
    pub username: String,
    pub role: String,
    pub customer_id: Option<String>,
    pub employee_id: Option<String>,
    pub created_at: String,
}

impl LoginAccount {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            username: row.get("username")?,
            role: row.get("role")?,
            customer_id: row.get("customer_id")?,
            employee_id: row.get("employee_id")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Parameters for creating a login account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub role: String,
    pub customer_id: Option<String>,
    pub employee_id: Option<String>,
}

/// What a successful login returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSession {
    pub username: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    /// Name of the customer or employee the account acts as.
    pub full_name: Option<String>,
}

/// A stored hash that fails to parse counts as a mismatch.
fn verify_password(password: &str, stored_hash: &str) -> bool {
    bcrypt::verify(password, stored_hash).unwrap_or(false)
}

fn is_duplicate_key(err: &DbError) -> bool {
    matches!(
        err,
        DbError::Statement(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

#[derive(Clone)]
pub struct AccountService {
    gateway: Gateway,
    hash_cost: u32,
}

impl AccountService {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Overrides the bcrypt cost used for new passwords.
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    /// Lists every login account, ordered by username.
    pub fn list_accounts(&self) -> Result<Vec<LoginAccount>, AccountError> {
        let result = self.gateway.execute(&StatementRequest::query(
            "SELECT username, role, customer_id, employee_id, created_at
             FROM login_accounts
             ORDER BY username",
            Binds::None,
        ))?;
        Ok(result.map_rows(LoginAccount::from_row)?)
    }

    /// Creates a login account.
    ///
    /// Customer accounts must name a customer and personnel accounts an
    /// employee. Other roles are stored as given.
    pub fn create_account(&self, account: &NewAccount) -> Result<(), AccountError> {
        if account.username.trim().is_empty() {
            return Err(AccountError::Validation("username is required".to_string()));
        }
        if account.password.is_empty() {
            return Err(AccountError::Validation("password is required".to_string()));
        }
        if account.role.is_empty() {
            return Err(AccountError::Validation("role is required".to_string()));
        }
        match account.role.parse::<Role>() {
            Ok(Role::Customer) if account.customer_id.is_none() => {
                return Err(AccountError::Validation(
                    "customerId is required for role customer".to_string(),
                ));
            }
            Ok(Role::Personnel) if account.employee_id.is_none() => {
                return Err(AccountError::Validation(
                    "employeeId is required for role personnel".to_string(),
                ));
            }
            _ => {}
        }

        let password_hash = bcrypt::hash(&account.password, self.hash_cost)?;

        self.gateway
            .execute(&StatementRequest::mutation(
                "INSERT INTO login_accounts
                    (username, password_hash, role, customer_id, employee_id)
                 VALUES (:username, :password_hash, :role, :customer_id, :employee_id)",
                Binds::named([
                    ("username", text(&account.username)),
                    ("password_hash", Value::Text(password_hash)),
                    ("role", text(&account.role)),
                    ("customer_id", Value::from(account.customer_id.clone())),
                    ("employee_id", Value::from(account.employee_id.clone())),
                ]),
            ))
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    AccountError::DuplicateUsername(account.username.clone())
                } else {
                    AccountError::Database(e)
                }
            })?;

        tracing::info!(username = %account.username, role = %account.role, "login account created");
        Ok(())
    }

    /// Checks a username and password.
    ///
    /// # Errors
    ///
    /// `AccountError::InvalidCredentials` when the username is unknown or the
    /// password does not match.
    pub fn login(&self, username: &str, password: &str) -> Result<LoginSession, AccountError> {
        let result = self.gateway.execute(&StatementRequest::query(
            "SELECT l.username, l.password_hash, l.role,
                    l.customer_id, l.employee_id,
                    c.full_name AS customer_name, e.full_name AS employee_name
             FROM login_accounts l
             LEFT JOIN customers c ON l.customer_id = c.customer_id
             LEFT JOIN employees e ON l.employee_id = e.employee_id
             WHERE l.username = :username",
            Binds::named([("username", text(username))]),
        ))?;

        let Some(row) = result.rows().first() else {
            tracing::debug!(username, "login for unknown username");
            return Err(AccountError::InvalidCredentials);
        };

        let decode = |e| AccountError::Database(DbError::RowDecode(e));
        let stored_hash: String = row.get("password_hash").map_err(decode)?;
        if !verify_password(password, &stored_hash) {
            tracing::debug!(username, "login with wrong password");
            return Err(AccountError::InvalidCredentials);
        }

        let role: String = row.get("role").map_err(decode)?;
        let full_name = match role.parse::<Role>() {
            Ok(Role::Customer) => row.get("customer_name").map_err(decode)?,
            Ok(Role::Personnel) => row.get("employee_name").map_err(decode)?,
            Err(_) => None,
        };

        Ok(LoginSession {
            username: row.get("username").map_err(decode)?,
            role,
            customer_id: row.get("customer_id").map_err(decode)?,
            employee_id: row.get("employee_id").map_err(decode)?,
            full_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcrypt_hashes_are_salted_and_verifiable() {
        let a = bcrypt::hash("secret", 4).unwrap();
        let b = bcrypt::hash("secret", 4).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$2"));
        assert!(verify_password("secret", &a));
        assert!(verify_password("secret", &b));
        assert!(!verify_password("Secret", &a));
    }

    #[test]
    fn malformed_stored_hash_never_matches() {
        assert!(!verify_password("secret", ""));
        assert!(!verify_password("secret", "secret"));
        assert!(!verify_password("secret", "5e884898da28047151d0e56f8dc6292773603d0d"));
    }

    #[test]
    fn out_of_range_cost_is_a_hashing_error() {
        let err: AccountError = bcrypt::hash("secret", 3).unwrap_err().into();
        assert!(matches!(err, AccountError::Hashing(_)));
    }
}
