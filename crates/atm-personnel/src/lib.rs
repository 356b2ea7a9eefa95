//! Bank staff records.

use atm_db::{text, Binds, DbError, Gateway, Row, StatementRequest, Value};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersonnelError {
    #[error("{0}")]
    Validation(String),
    #[error("employee not found: {0}")]
    NotFound(String),
    /// The employee is still referenced, typically by card-processing records.
    #[error("employee {employee_id} could not be deleted: {source}")]
    DeleteConflict {
        employee_id: String,
        #[source]
        source: DbError,
    },
    #[error("database error: {0}")]
    Database(#[from] DbError),
}

/// A staff member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    /// Taken from the path on update, so it may be omitted there.
    #[serde(default)]
    pub employee_id: String,
    pub full_name: String,
    /// `YYYY-MM-DD`.
    pub birth_date: Option<String>,
    pub national_id: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub position: Option<String>,
    pub email: Option<String>,
}

impl Employee {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            employee_id: row.get("employee_id")?,
            full_name: row.get("full_name")?,
            birth_date: row.get("birth_date")?,
            national_id: row.get("national_id")?,
            phone: row.get("phone")?,
            address: row.get("address")?,
            position: row.get("position")?,
            email: row.get("email")?,
        })
    }

    /// Checks the fields shared by create and update.
    fn validate(&self) -> Result<(), PersonnelError> {
        if self.full_name.trim().is_empty() {
            return Err(PersonnelError::Validation("fullName is required".to_string()));
        }
        if let Some(birth_date) = &self.birth_date {
            NaiveDate::parse_from_str(birth_date, "%Y-%m-%d").map_err(|_| {
                PersonnelError::Validation("birthDate must be a YYYY-MM-DD date".to_string())
            })?;
        }
        Ok(())
    }

    fn column_binds(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("employee_id", text(&self.employee_id)),
            ("full_name", text(&self.full_name)),
            ("birth_date", Value::from(self.birth_date.clone())),
            ("national_id", Value::from(self.national_id.clone())),
            ("phone", Value::from(self.phone.clone())),
            ("address", Value::from(self.address.clone())),
            ("position", Value::from(self.position.clone())),
            ("email", Value::from(self.email.clone())),
        ]
    }
}

const SELECT_COLUMNS: &str =
    "SELECT employee_id, full_name, birth_date, national_id, phone, address, position, email
     FROM employees";

#[derive(Clone)]
pub struct EmployeeService {
    gateway: Gateway,
}

impl EmployeeService {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub fn list_employees(&self) -> Result<Vec<Employee>, PersonnelError> {
        let result = self.gateway.execute(&StatementRequest::query(
            format!("{SELECT_COLUMNS} ORDER BY employee_id"),
            Binds::None,
        ))?;
        Ok(result.map_rows(Employee::from_row)?)
    }

    pub fn get_employee(&self, employee_id: &str) -> Result<Employee, PersonnelError> {
        let result = self.gateway.execute(&StatementRequest::query(
            format!("{SELECT_COLUMNS} WHERE employee_id = :employee_id"),
            Binds::named([("employee_id", text(employee_id))]),
        ))?;
        result
            .map_rows(Employee::from_row)?
            .into_iter()
            .next()
            .ok_or_else(|| PersonnelError::NotFound(employee_id.to_string()))
    }

    pub fn create_employee(&self, employee: &Employee) -> Result<(), PersonnelError> {
        if employee.employee_id.trim().is_empty() {
            return Err(PersonnelError::Validation("employeeId is required".to_string()));
        }
        employee.validate()?;

        self.gateway.execute(&StatementRequest::mutation(
            "INSERT INTO employees
                (employee_id, full_name, birth_date, national_id, phone, address, position, email)
             VALUES
                (:employee_id, :full_name, :birth_date, :national_id, :phone, :address, :position, :email)",
            Binds::named(employee.column_binds()),
        ))?;
        tracing::info!(employee_id = %employee.employee_id, "employee created");
        Ok(())
    }

    /// Replaces every column of the employee named by `employee_id`. The id
    /// inside `employee` is ignored.
    pub fn update_employee(
        &self,
        employee_id: &str,
        employee: &Employee,
    ) -> Result<(), PersonnelError> {
        employee.validate()?;
        let mut binds = employee.column_binds();
        if let Some(slot) = binds.iter_mut().find(|(name, _)| *name == "employee_id") {
            slot.1 = text(employee_id);
        }

        let result = self.gateway.execute(&StatementRequest::mutation(
            "UPDATE employees SET
                full_name = :full_name,
                birth_date = :birth_date,
                national_id = :national_id,
                phone = :phone,
                address = :address,
                position = :position,
                email = :email
             WHERE employee_id = :employee_id",
            Binds::named(binds),
        ))?;

        if result.rows_affected() == 0 {
            return Err(PersonnelError::NotFound(employee_id.to_string()));
        }
        Ok(())
    }

    /// Deletes an employee. Deleting an unknown id is not an error.
    ///
    /// # Errors
    ///
    /// `PersonnelError::DeleteConflict` when other rows still reference the
    /// employee.
    pub fn delete_employee(&self, employee_id: &str) -> Result<(), PersonnelError> {
        let result = self.gateway.execute(&StatementRequest::mutation(
            "DELETE FROM employees WHERE employee_id = :employee_id",
            Binds::named([("employee_id", text(employee_id))]),
        ));
        match result {
            Ok(_) => {
                tracing::info!(employee_id, "employee deleted");
                Ok(())
            }
            Err(source) if source.is_constraint_violation() => {
                tracing::warn!(employee_id, error = %source, "employee still referenced");
                Err(PersonnelError::DeleteConflict {
                    employee_id: employee_id.to_string(),
                    source,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
