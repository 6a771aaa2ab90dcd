use drover::DroverError;
use drover::core::dialect::postgres::PostgresDialect;
use drover::core::dialect::mysql::MysqlDialect;
use drover::core::dialect::{DatabaseDialect, IsolationLevel, classify};
use drover::core::driver::WireError;

#[tokio::test]
async fn test_postgres_read_only_sniffers() {
    let dialect = PostgresDialect;
    assert_eq!(
        dialect.statement_sets_read_only("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY"),
        Some(true)
    );
    assert_eq!(
        dialect.statement_sets_read_only("set session characteristics as transaction read write"),
        Some(false)
    );
    assert_eq!(
        dialect.statement_sets_read_only("SET default_transaction_read_only = on"),
        Some(true)
    );
    assert_eq!(dialect.statement_sets_read_only("SELECT 1"), None);
}

#[tokio::test]
async fn test_postgres_schema_and_isolation_sniffers() {
    let dialect = PostgresDialect;
    assert_eq!(
        dialect.statement_sets_schema("SET search_path TO app"),
        Some("app".to_string())
    );
    assert_eq!(
        dialect.statement_sets_transaction_isolation(
            "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        ),
        Some(IsolationLevel::Serializable)
    );
}

#[tokio::test]
async fn test_postgres_transaction_boundaries() {
    let dialect = PostgresDialect;
    assert!(dialect.statement_starts_transaction("BEGIN"));
    assert!(dialect.statement_starts_transaction("  start transaction isolation level serializable"));
    assert!(dialect.statement_closes_transaction("COMMIT"));
    assert!(dialect.statement_closes_transaction("rollback"));
    assert!(!dialect.statement_starts_transaction("SELECT 'BEGIN'"));
}

#[tokio::test]
async fn test_mysql_sniffers() {
    let dialect = MysqlDialect;
    assert_eq!(dialect.statement_sets_auto_commit("SET autocommit=0"), Some(false));
    assert_eq!(dialect.statement_sets_auto_commit("SET @@autocommit = 'on'"), Some(true));
    assert_eq!(
        dialect.statement_sets_catalog("USE orders"),
        Some("orders".to_string())
    );
    assert_eq!(
        dialect.statement_sets_read_only("SET SESSION TRANSACTION READ ONLY"),
        Some(true)
    );
}

#[tokio::test]
async fn test_postgres_grammar_limits() {
    let dialect = PostgresDialect;
    assert!(dialect.set_auto_commit_query(true).is_none());
    assert!(dialect.set_catalog_query("other").is_none());
    assert!(dialect.set_schema_query("app").is_some());
}

#[tokio::test]
async fn test_error_classification_by_sqlstate_and_message() {
    let dialect = PostgresDialect;
    let handler = dialect.error_handler();

    let login = classify(
        handler,
        &WireError::with_sqlstate("password authentication failed", "28P01"),
    );
    assert!(matches!(login, DroverError::Login(_)));

    // A two-character entry matches the whole SQLSTATE class.
    let network = classify(
        handler,
        &WireError::with_sqlstate("connection failure", "08006"),
    );
    assert!(matches!(network, DroverError::Network(_)));

    let by_message = classify(handler, &WireError::new("Connection terminated unexpectedly"));
    assert!(matches!(by_message, DroverError::Network(_)));

    let unknown = classify(handler, &WireError::new("duplicate key value"));
    assert!(matches!(unknown, DroverError::Internal(_)));

    let syntax = classify(handler, &WireError::with_sqlstate("syntax error", "42601"));
    assert!(matches!(syntax, DroverError::Syntax(_)));
}
