use relmap::{
    ConnectionString, Credentials, ErrorCode, OutputSpec, QueryDescriptor, QueryKind, Record,
    Session, SessionConfig, Value,
};
use tempfile::tempdir;

#[test]
fn unsupported_driver_is_rejected_at_connect() {
    let err = Session::connect(
        "mysql://db.internal/app",
        Credentials::new("app", "secret"),
        SessionConfig::default(),
    )
    .err()
    .expect("mysql is not available");
    assert_eq!(err.code(), ErrorCode::UnsupportedDriver);
}

#[test]
fn malformed_connection_strings_are_rejected() {
    for dsn in ["", "no-scheme", "sqlite://localhost", "sqlite:dbname=x", "sqlite://h:99999/x"] {
        let err = Session::connect(dsn, Credentials::anonymous(), SessionConfig::default())
            .err()
            .unwrap_or_else(|| panic!("{dsn:?} should fail"));
        assert_eq!(err.code(), ErrorCode::InvalidConnectionString, "{dsn:?}");
    }
}

#[test]
fn connection_string_defaults_port_and_charset() {
    let parsed = ConnectionString::parse("mysql:host=db;dbname=shop", "utf8mb4", 3306).expect("parse");
    assert_eq!(parsed.port, 3306);
    assert_eq!(parsed.dsn, "mysql:host=db;dbname=shop;charset=utf8mb4");

    let explicit =
        ConnectionString::parse("pgsql://db:5433/shop;charset=latin1", "utf8mb4", 3306).expect("parse");
    assert_eq!(explicit.port, 5433);
    assert_eq!(explicit.charset, "latin1");
    assert_eq!(explicit.dsn, "pgsql://db:5433/shop;charset=latin1");
}

#[test]
fn credentials_never_print_the_password() {
    let credentials = Credentials::new("app", "hunter2");
    let shown = format!("{credentials:?}");
    assert!(shown.contains("app"));
    assert!(!shown.contains("hunter2"));
}

#[test]
fn file_database_survives_reconnect() {
    let dir = tempdir().expect("tempdir");
    let dsn = format!("sqlite://localhost/{}", dir.path().join("data.db").display());
    let mut session =
        Session::connect(&dsn, Credentials::anonymous(), SessionConfig::default()).expect("open");
    session
        .execute(
            QueryDescriptor::raw(
                QueryKind::Create,
                "CREATE TABLE kv (id INTEGER PRIMARY KEY, v TEXT)",
            )
            .with_table("kv"),
            OutputSpec::Default,
        )
        .expect("create");
    let handle = session
        .insert_row("kv", Record::from_pairs([("v", "kept")]))
        .expect("insert");

    session.disconnect().expect("disconnect");
    assert_eq!(session.disconnect().expect_err("twice").code(), ErrorCode::NotReady);
    assert!(session.history().is_empty());
    assert!(session.cache("kv").is_none());

    session.reconnect(Credentials::anonymous()).expect("reconnect");
    let row = session.get("kv", handle.key()).expect("get").expect("persisted");
    assert_eq!(row.get("v"), Some(Value::from("kept")));
    assert!(!row.ptr_eq(&handle));
}

#[test]
fn transactions_pass_through_to_the_backend() {
    let mut session = Session::connect(
        "sqlite://localhost/:memory:",
        Credentials::anonymous(),
        SessionConfig::default(),
    )
    .expect("open");
    session
        .execute(
            QueryDescriptor::raw(QueryKind::Create, "CREATE TABLE kv (id INTEGER PRIMARY KEY, v TEXT)")
                .with_table("kv"),
            OutputSpec::Default,
        )
        .expect("create");

    session.begin_transaction().expect("begin");
    assert!(session.in_transaction());
    session
        .insert_row("kv", Record::from_pairs([("v", "temp")]))
        .expect("insert");
    session.rollback_transaction().expect("rollback");
    assert!(!session.in_transaction());

    let count = session
        .execute(
            QueryDescriptor::select("SELECT COUNT(*) FROM kv").with_table("kv"),
            relmap::Strategy::Column,
        )
        .expect("count");
    assert_eq!(count.scalar(), Some(&Value::Integer(0)));
}

#[test]
fn statement_failures_carry_the_emulated_query() {
    let mut session = Session::connect(
        "sqlite://localhost/:memory:",
        Credentials::anonymous(),
        SessionConfig::default(),
    )
    .expect("open");
    let err = session
        .execute(
            QueryDescriptor::select("SELECT * FROM missing WHERE id = ?")
                .with_params(vec![Value::from(3)]),
            OutputSpec::Default,
        )
        .expect_err("no such table");
    assert_eq!(err.code(), ErrorCode::Statement);
    assert!(err.code().is_retryable());
    assert!(err.to_string().contains("SELECT * FROM missing WHERE id = 3"), "{err}");
}
