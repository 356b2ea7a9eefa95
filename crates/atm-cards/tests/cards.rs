use atm_cards::{CardError, CardRecord, CardService, CardUpdate};
use atm_db::{run_migrations, text, Binds, DbRuntimeSettings, Gateway, PoolManager, StatementRequest};
use std::sync::Arc;
use tempfile::TempDir;

fn setup() -> (TempDir, Gateway, CardService) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cards.db");
    let manager = Arc::new(PoolManager::new(
        path.to_str().unwrap(),
        DbRuntimeSettings {
            pool_max_size: 2,
            ..DbRuntimeSettings::default()
        },
    ));
    {
        let conn = manager.acquire().unwrap();
        run_migrations(&conn).unwrap();
    }
    let gateway = Gateway::new(manager);

    for sql in [
        "INSERT INTO customers (customer_id, full_name) VALUES ('KH001', 'Nguyen Van A')",
        "INSERT INTO customers (customer_id, full_name) VALUES ('KH002', 'Le Thi B')",
        "INSERT INTO bank_accounts (account_id, customer_id) VALUES ('TK001', 'KH001')",
        "INSERT INTO bank_accounts (account_id, customer_id) VALUES ('TK002', 'KH001')",
        "INSERT INTO bank_accounts (account_id, customer_id) VALUES ('TK003', 'KH002')",
        "INSERT INTO employees (employee_id, full_name) VALUES ('NV001', 'Pham Van C')",
        "INSERT INTO employees (employee_id, full_name) VALUES ('NV002', 'Hoang Thi D')",
    ] {
        gateway
            .execute(&StatementRequest::mutation(sql, Binds::None))
            .unwrap();
    }

    let service = CardService::new(gateway.clone());
    (dir, gateway, service)
}

fn card(card_id: &str, account_id: &str, serial: u32) -> CardRecord {
    CardRecord {
        card_id: card_id.to_string(),
        account_id: account_id.to_string(),
        pin: "1234".to_string(),
        issued_on: "2023-01-01".to_string(),
        expires_on: "2028-01-01".to_string(),
        status: "active".to_string(),
        card_number: format!("970400000000{serial:04}"),
        cvv: "123".to_string(),
    }
}

fn ids(cards: &[CardRecord]) -> Vec<&str> {
    cards.iter().map(|c| c.card_id.as_str()).collect()
}

fn count_for_card(gateway: &Gateway, table: &str, card_id: &str) -> i64 {
    let result = gateway
        .execute(&StatementRequest::query(
            format!("SELECT COUNT(*) AS n FROM {table} WHERE card_id = :card_id"),
            Binds::named([("card_id", text(card_id))]),
        ))
        .unwrap();
    result.rows()[0].get("n").unwrap()
}

fn add_transaction(gateway: &Gateway, transaction_id: &str, card_id: &str) {
    gateway
        .execute(&StatementRequest::mutation(
            "INSERT INTO transactions (transaction_id, card_id, amount, kind)
             VALUES (:transaction_id, :card_id, 100, 'withdrawal')",
            Binds::named([
                ("transaction_id", text(transaction_id)),
                ("card_id", text(card_id)),
            ]),
        ))
        .unwrap();
}

#[test]
fn customer_sees_cards_of_every_owned_account() {
    let (_dir, _gateway, service) = setup();
    service.create_card(&card("TH002", "TK002", 2)).unwrap();
    service.create_card(&card("TH001", "TK001", 1)).unwrap();
    service.create_card(&card("TH003", "TK003", 3)).unwrap();

    let cards = service
        .list_cards_for_caller(Some("customer"), Some("KH001"), None)
        .unwrap();
    assert_eq!(ids(&cards), vec!["TH001", "TH002"]);

    let cards = service
        .list_cards_for_caller(Some("customer"), Some("KH002"), None)
        .unwrap();
    assert_eq!(ids(&cards), vec!["TH003"]);

    let cards = service
        .list_cards_for_caller(Some("customer"), Some("KH999"), None)
        .unwrap();
    assert!(cards.is_empty());
}

#[test]
fn personnel_sees_each_processed_card_once() {
    let (_dir, _gateway, service) = setup();
    service.create_card(&card("TH001", "TK001", 1)).unwrap();
    service.create_card(&card("TH002", "TK002", 2)).unwrap();
    service.create_card(&card("TH003", "TK003", 3)).unwrap();

    service.record_processing("TH001", "NV001", "issue").unwrap();
    service.record_processing("TH001", "NV001", "unlock").unwrap();
    service.record_processing("TH003", "NV001", "issue").unwrap();
    service.record_processing("TH002", "NV002", "issue").unwrap();

    let first = service
        .list_cards_for_caller(Some("personnel"), None, Some("NV001"))
        .unwrap();
    assert_eq!(ids(&first), vec!["TH001", "TH003"]);

    let again = service
        .list_cards_for_caller(Some("personnel"), None, Some("NV001"))
        .unwrap();
    assert_eq!(first, again, "repeated lookups are identical");

    let other = service
        .list_cards_for_caller(Some("personnel"), None, Some("NV002"))
        .unwrap();
    assert_eq!(ids(&other), vec!["TH002"]);
}

#[test]
fn validation_failures_do_not_touch_the_database() {
    let (_dir, gateway, service) = setup();
    // Once the pool is closed any database access would fail with PoolClosed.
    gateway.pool().shutdown(std::time::Duration::from_millis(50));

    for (role, customer_id, employee_id) in [
        (None, Some("KH001"), None),
        (Some("auditor"), Some("KH001"), Some("NV001")),
        (Some("customer"), None, None),
        (Some("personnel"), Some("KH001"), None),
    ] {
        let err = service
            .list_cards_for_caller(role, customer_id, employee_id)
            .unwrap_err();
        assert!(matches!(err, CardError::Validation(_)), "got {err:?}");
    }
}

#[test]
fn delete_without_dependents_leaves_no_rows() {
    let (_dir, gateway, service) = setup();
    service.create_card(&card("TH010", "TK001", 10)).unwrap();

    service.delete_card("TH010").unwrap();

    for table in ["card_processing", "transactions", "cards"] {
        assert_eq!(count_for_card(&gateway, table, "TH010"), 0, "{table}");
    }
    assert!(matches!(
        service.get_card("TH010"),
        Err(CardError::NotFound(_))
    ));
}

#[test]
fn delete_removes_dependents_before_the_card() {
    let (_dir, gateway, service) = setup();
    service.create_card(&card("TH001", "TK001", 1)).unwrap();
    service.create_card(&card("TH002", "TK001", 2)).unwrap();
    service.record_processing("TH001", "NV001", "issue").unwrap();
    add_transaction(&gateway, "GD001", "TH001");
    add_transaction(&gateway, "GD002", "TH001");
    add_transaction(&gateway, "GD003", "TH002");

    service.delete_card("TH001").unwrap();

    for table in ["card_processing", "transactions", "cards"] {
        assert_eq!(count_for_card(&gateway, table, "TH001"), 0, "{table}");
    }
    assert_eq!(count_for_card(&gateway, "transactions", "TH002"), 1);
    assert_eq!(ids(&service.list_all_cards().unwrap()), vec!["TH002"]);
}

#[test]
fn failed_card_delete_keeps_committed_dependent_deletes() {
    let (_dir, gateway, service) = setup();
    service.create_card(&card("TH001", "TK001", 1)).unwrap();
    service.record_processing("TH001", "NV001", "issue").unwrap();
    add_transaction(&gateway, "GD001", "TH001");

    // A reference the workflow does not know about blocks the final step.
    gateway
        .execute(&StatementRequest::mutation(
            "CREATE TABLE card_holds (card_id TEXT NOT NULL REFERENCES cards(card_id))",
            Binds::None,
        ))
        .unwrap();
    gateway
        .execute(&StatementRequest::mutation(
            "INSERT INTO card_holds (card_id) VALUES ('TH001')",
            Binds::None,
        ))
        .unwrap();

    let err = service.delete_card("TH001").unwrap_err();
    match &err {
        CardError::DeleteConflict { card_id, source } => {
            assert_eq!(card_id, "TH001");
            assert!(source.is_constraint_violation());
        }
        other => panic!("expected delete conflict, got {other:?}"),
    }

    assert_eq!(count_for_card(&gateway, "card_processing", "TH001"), 0);
    assert_eq!(count_for_card(&gateway, "transactions", "TH001"), 0);
    assert_eq!(count_for_card(&gateway, "cards", "TH001"), 1);

    // Clearing the blocker and running the delete again finishes the job.
    gateway
        .execute(&StatementRequest::mutation(
            "DELETE FROM card_holds WHERE card_id = 'TH001'",
            Binds::None,
        ))
        .unwrap();
    service.delete_card("TH001").unwrap();
    assert_eq!(count_for_card(&gateway, "cards", "TH001"), 0);
}

#[test]
fn issue_list_delete_end_to_end() {
    let (_dir, gateway, service) = setup();
    service.create_card(&card("TH001", "TK001", 1)).unwrap();
    service.record_processing("TH001", "NV001", "issue").unwrap();
    add_transaction(&gateway, "GD001", "TH001");

    let owner: String = gateway
        .execute(&StatementRequest::query(
            "SELECT customer_id FROM bank_accounts WHERE account_id = :account_id",
            Binds::named([("account_id", text("TK001"))]),
        ))
        .unwrap()
        .rows()[0]
        .get("customer_id")
        .unwrap();

    let before = service
        .list_cards_for_caller(Some("customer"), Some(owner.as_str()), None)
        .unwrap();
    assert!(ids(&before).contains(&"TH001"));

    service.delete_card("TH001").unwrap();

    let after = service
        .list_cards_for_caller(Some("customer"), Some(owner.as_str()), None)
        .unwrap();
    assert!(!ids(&after).contains(&"TH001"));
    assert_eq!(count_for_card(&gateway, "card_processing", "TH001"), 0);
    assert_eq!(count_for_card(&gateway, "transactions", "TH001"), 0);
}

#[test]
fn deleting_an_unknown_card_succeeds() {
    let (_dir, _gateway, service) = setup();
    service.delete_card("TH404").unwrap();
}

#[test]
fn create_and_update_validate_input() {
    let (_dir, _gateway, service) = setup();

    let mut bad = card("TH001", "TK001", 1);
    bad.issued_on = "2023/01/01".to_string();
    assert!(matches!(
        service.create_card(&bad),
        Err(CardError::Validation(_))
    ));

    let orphan = card("TH002", "TK404", 2);
    let err = service.create_card(&orphan).unwrap_err();
    assert!(
        matches!(&err, CardError::Database(db) if db.is_constraint_violation()),
        "got {err:?}"
    );

    service.create_card(&card("TH001", "TK001", 1)).unwrap();
    let update = CardUpdate {
        account_id: "TK002".to_string(),
        pin: "9999".to_string(),
        issued_on: "2024-02-01".to_string(),
        expires_on: "2029-02-01".to_string(),
        status: "locked".to_string(),
        card_number: "9704000000000001".to_string(),
        cvv: "321".to_string(),
    };
    service.update_card("TH001", &update).unwrap();

    let stored = service.get_card("TH001").unwrap();
    assert_eq!(stored.account_id, "TK002");
    assert_eq!(stored.status, "locked");

    assert!(matches!(
        service.update_card("TH404", &update),
        Err(CardError::NotFound(id)) if id == "TH404"
    ));
}

#[test]
fn card_records_serialize_in_camel_case() {
    let json = serde_json::to_value(card("TH001", "TK001", 1)).unwrap();
    assert_eq!(json["cardId"], "TH001");
    assert_eq!(json["accountId"], "TK001");
    assert_eq!(json["expiresOn"], "2028-01-01");
}
