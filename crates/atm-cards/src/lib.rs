//! ATM card management.
//!
//! Implements card CRUD, role-based card lookup and the ordered deletion of
//! a card together with the records that reference it.
//!
//! Two things here are not plain CRUD:
//!
//! - **Role routing.** A customer reaches cards through the bank accounts
//!   they own; a staff member reaches cards through the card-processing
//!   records that name them. [`route_caller`] picks the join for the caller's
//!   role and the identifier that join needs.
//! - **Cascading delete.** The schema enforces foreign keys but has no
//!   cascade rules, so [`CardService::delete_card`] removes processing
//!   records, then transactions, then the card. Each step commits on its
//!   own: a failure part way leaves the earlier steps in place and the
//!   delete can simply be run again.

use atm_db::{text, Binds, DbError, Gateway, Row, StatementRequest};
use atm_types::Role;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during card operations.
#[derive(Debug, Error)]
pub enum CardError {
    /// The caller supplied input that cannot be served.
    #[error("{0}")]
    Validation(String),
    #[error("card not found: {0}")]
    NotFound(String),
    /// The card row could not be removed after its dependents were.
    #[error("card {card_id} could not be deleted: {source}")]
    DeleteConflict {
        card_id: String,
        #[source]
        source: DbError,
    },
    #[error("database error: {0}")]
    Database(#[from] DbError),
}

/// An ATM card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    pub card_id: String,
    /// Bank account the card draws on.
    pub account_id: String,
    pub pin: String,
    /// Issue date, `YYYY-MM-DD`.
    pub issued_on: String,
    /// Expiry date, `YYYY-MM-DD`.
    pub expires_on: String,
    pub status: String,
    pub card_number: String,
    pub cvv: String,
}

impl CardRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            card_id: row.get("card_id")?,
            account_id: row.get("account_id")?,
            pin: row.get("pin")?,
            issued_on: row.get("issued_on")?,
            expires_on: row.get("expires_on")?,
            status: row.get("status")?,
            card_number: row.get("card_number")?,
            cvv: row.get("cvv")?,
        })
    }
}

/// Replacement values for every mutable card column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardUpdate {
    pub account_id: String,
    pub pin: String,
    pub issued_on: String,
    pub expires_on: String,
    pub status: String,
    pub card_number: String,
    pub cvv: String,
}

impl CardUpdate {
    fn validate(&self) -> Result<(), CardError> {
        validate_dates(&self.issued_on, &self.expires_on)
    }
}

fn validate_dates(issued_on: &str, expires_on: &str) -> Result<(), CardError> {
    let issued = parse_date("issuedOn", issued_on)?;
    let expires = parse_date("expiresOn", expires_on)?;
    if expires < issued {
        return Err(CardError::Validation(
            "expiresOn must not be before issuedOn".to_string(),
        ));
    }
    Ok(())
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, CardError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| CardError::Validation(format!("{field} must be a YYYY-MM-DD date")))
}

const SELECT_ALL_CARDS: &str = "SELECT card_id, account_id, pin, issued_on, expires_on, status, card_number, cvv
    FROM cards
    ORDER BY card_id";

const SELECT_CARD: &str = "SELECT card_id, account_id, pin, issued_on, expires_on, status, card_number, cvv
    FROM cards
    WHERE card_id = :card_id";

const SELECT_CUSTOMER_CARDS: &str = "SELECT c.card_id, c.account_id, c.pin, c.issued_on, c.expires_on, c.status, c.card_number, c.cvv
    FROM cards c
    JOIN bank_accounts a ON c.account_id = a.account_id
    WHERE a.customer_id = :customer_id
    ORDER BY c.card_id";

// An employee may have processed the same card several times.
const SELECT_PERSONNEL_CARDS: &str = "SELECT DISTINCT c.card_id, c.account_id, c.pin, c.issued_on, c.expires_on, c.status, c.card_number, c.cvv
    FROM card_processing p
    JOIN cards c ON p.card_id = c.card_id
    WHERE p.employee_id = :employee_id
    ORDER BY c.card_id";

struct DeleteStep {
    table: &'static str,
    sql: &'static str,
}

/// Dependents first, the card last. The order satisfies the foreign keys.
const DELETE_STEPS: [DeleteStep; 3] = [
    DeleteStep {
        table: "card_processing",
        sql: "DELETE FROM card_processing WHERE card_id = :card_id",
    },
    DeleteStep {
        table: "transactions",
        sql: "DELETE FROM transactions WHERE card_id = :card_id",
    },
    DeleteStep {
        table: "cards",
        sql: "DELETE FROM cards WHERE card_id = :card_id",
    },
];

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Chooses the card query for a caller.
///
/// Pure: nothing touches the database until the returned request is run.
///
/// # Errors
///
/// `CardError::Validation` when the role is missing or unknown, or when the
/// identifier the role needs is missing.
pub fn route_caller(
    role: Option<&str>,
    customer_id: Option<&str>,
    employee_id: Option<&str>,
) -> Result<StatementRequest, CardError> {
    let role = present(role).ok_or_else(|| CardError::Validation("missing role".to_string()))?;
    let role: Role = role
        .parse()
        .map_err(|_| CardError::Validation("invalid role".to_string()))?;

    match role {
        Role::Customer => {
            let customer_id = present(customer_id).ok_or_else(|| {
                CardError::Validation("customerId is required for role customer".to_string())
            })?;
            Ok(StatementRequest::query(
                SELECT_CUSTOMER_CARDS,
                Binds::named([("customer_id", text(customer_id))]),
            ))
        }
        Role::Personnel => {
            let employee_id = present(employee_id).ok_or_else(|| {
                CardError::Validation("employeeId is required for role personnel".to_string())
            })?;
            Ok(StatementRequest::query(
                SELECT_PERSONNEL_CARDS,
                Binds::named([("employee_id", text(employee_id))]),
            ))
        }
    }
}

/// Card operations, all routed through the execute gateway.
#[derive(Clone)]
pub struct CardService {
    gateway: Gateway,
}

impl CardService {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    fn fetch(&self, request: &StatementRequest) -> Result<Vec<CardRecord>, CardError> {
        let result = self.gateway.execute(request)?;
        Ok(result.map_rows(CardRecord::from_row)?)
    }

    /// Lists every card.
    pub fn list_all_cards(&self) -> Result<Vec<CardRecord>, CardError> {
        self.fetch(&StatementRequest::query(SELECT_ALL_CARDS, Binds::None))
    }

    /// Retrieves a card by id.
    pub fn get_card(&self, card_id: &str) -> Result<CardRecord, CardError> {
        self.fetch(&StatementRequest::query(
            SELECT_CARD,
            Binds::named([("card_id", text(card_id))]),
        ))?
        .into_iter()
        .next()
        .ok_or_else(|| CardError::NotFound(card_id.to_string()))
    }

    /// Lists the cards visible to a caller; see [`route_caller`].
    pub fn list_cards_for_caller(
        &self,
        role: Option<&str>,
        customer_id: Option<&str>,
        employee_id: Option<&str>,
    ) -> Result<Vec<CardRecord>, CardError> {
        let request = route_caller(role, customer_id, employee_id)?;
        self.fetch(&request)
    }

    /// Issues a new card.
    pub fn create_card(&self, card: &CardRecord) -> Result<(), CardError> {
        if card.card_id.is_empty() {
            return Err(CardError::Validation("cardId is required".to_string()));
        }
        validate_dates(&card.issued_on, &card.expires_on)?;

        self.gateway.execute(&StatementRequest::mutation(
            "INSERT INTO cards (card_id, account_id, pin, issued_on, expires_on, status, card_number, cvv)
             VALUES (:card_id, :account_id, :pin, :issued_on, :expires_on, :status, :card_number, :cvv)",
            Binds::named([
                ("card_id", text(&card.card_id)),
                ("account_id", text(&card.account_id)),
                ("pin", text(&card.pin)),
                ("issued_on", text(&card.issued_on)),
                ("expires_on", text(&card.expires_on)),
                ("status", text(&card.status)),
                ("card_number", text(&card.card_number)),
                ("cvv", text(&card.cvv)),
            ]),
        ))?;
        tracing::info!(card_id = %card.card_id, account_id = %card.account_id, "card issued");
        Ok(())
    }

    /// Replaces every mutable column of an existing card.
    pub fn update_card(&self, card_id: &str, update: &CardUpdate) -> Result<(), CardError> {
        update.validate()?;

        let result = self.gateway.execute(&StatementRequest::mutation(
            "UPDATE cards SET
                account_id = :account_id,
                pin = :pin,
                issued_on = :issued_on,
                expires_on = :expires_on,
                status = :status,
                card_number = :card_number,
                cvv = :cvv
             WHERE card_id = :card_id",
            Binds::named([
                ("account_id", text(&update.account_id)),
                ("pin", text(&update.pin)),
                ("issued_on", text(&update.issued_on)),
                ("expires_on", text(&update.expires_on)),
                ("status", text(&update.status)),
                ("card_number", text(&update.card_number)),
                ("cvv", text(&update.cvv)),
                ("card_id", text(card_id)),
            ]),
        ))?;

        if result.rows_affected() == 0 {
            return Err(CardError::NotFound(card_id.to_string()));
        }
        Ok(())
    }

    /// Records that an employee processed a card. These records are what the
    /// personnel lookup joins through.
    pub fn record_processing(
        &self,
        card_id: &str,
        employee_id: &str,
        action: &str,
    ) -> Result<(), CardError> {
        self.gateway.execute(&StatementRequest::mutation(
            "INSERT INTO card_processing (card_id, employee_id, action)
             VALUES (:card_id, :employee_id, :action)",
            Binds::named([
                ("card_id", text(card_id)),
                ("employee_id", text(employee_id)),
                ("action", text(action)),
            ]),
        ))?;
        Ok(())
    }

    /// Deletes a card and everything that references it, in order.
    ///
    /// Each step is committed before the next starts. If the final delete
    /// fails the dependents are already gone and stay gone.
    ///
    /// # Errors
    ///
    /// `CardError::DeleteConflict` if the card row itself cannot be removed;
    /// `CardError::Database` if an earlier step or a connection fails.
    pub fn delete_card(&self, card_id: &str) -> Result<(), CardError> {
        let last = DELETE_STEPS.len() - 1;
        for (idx, step) in DELETE_STEPS.iter().enumerate() {
            let request =
                StatementRequest::mutation(step.sql, Binds::named([("card_id", text(card_id))]));
            match self.gateway.execute(&request) {
                Ok(result) => {
                    tracing::debug!(
                        card_id,
                        table = step.table,
                        deleted = result.rows_affected(),
                        "cascade step committed"
                    );
                }
                Err(source @ DbError::Statement(_)) if idx == last => {
                    tracing::warn!(card_id, error = %source, "card row still referenced after removing dependents");
                    return Err(CardError::DeleteConflict {
                        card_id: card_id.to_string(),
                        source,
                    });
                }
                Err(e) => {
                    tracing::warn!(card_id, table = step.table, error = %e, "cascade step failed");
                    return Err(e.into());
                }
            }
        }

        tracing::info!(card_id, "card deleted");
        Ok(())
    }
}
