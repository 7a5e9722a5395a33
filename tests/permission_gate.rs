use relmap::{
    Credentials, ErrorCode, OutputSpec, PermissionSet, QueryDescriptor, QueryKind, Record,
    RelmapError, Session, SessionConfig, Value,
};

fn session(config: SessionConfig) -> Session {
    let mut session = Session::connect("sqlite://localhost/:memory:", Credentials::anonymous(), config)
        .expect("connect");
    session.set_permission_checks(Some(false));
    for table in ["notes", "audit"] {
        session
            .execute(
                QueryDescriptor::raw(
                    QueryKind::Create,
                    format!("CREATE TABLE {table} (id INTEGER PRIMARY KEY, body TEXT)"),
                )
                .with_table(table),
                OutputSpec::Default,
            )
            .expect("create");
        session
            .execute(
                QueryDescriptor::insert(table, Record::from_pairs([("body", "seed")])),
                OutputSpec::Default,
            )
            .expect("seed");
    }
    session.set_permission_checks(Some(true));
    session
}

fn body(text: &str) -> Record {
    Record::from_pairs([("body", Value::from(text))])
}

#[test]
fn read_only_profile_denies_writes_with_kind_and_table() {
    let mut session = session(SessionConfig::read_only());
    let err = session
        .execute(QueryDescriptor::insert("notes", body("x")), OutputSpec::Default)
        .expect_err("insert denied");
    match err {
        RelmapError::PermissionDenied { kind, table } => {
            assert_eq!(kind, QueryKind::Insert);
            assert_eq!(table.as_deref(), Some("notes"));
        }
        other => panic!("expected permission denied, got {other:?}"),
    }
    assert!(session.get("notes", 1).expect("reads allowed").is_some());
}

#[test]
fn table_override_narrows_root_permission() {
    let permissions = PermissionSet::allow_all().with_table("audit", QueryKind::Delete, false);
    let mut session = session(SessionConfig::default().with_permissions(permissions));

    assert!(session.delete_row("notes", 1).is_ok());
    let err = session.delete_row("audit", 1).expect_err("audit protected");
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
    assert!(session.get("audit", 1).expect("still there").is_some());
}

#[test]
fn table_override_cannot_widen_a_denied_root() {
    let permissions = PermissionSet::allow_all()
        .with_root(QueryKind::Update, false)
        .with_table("notes", QueryKind::Update, true);
    let mut session = session(SessionConfig::default().with_permissions(permissions));
    let err = session
        .update_row("notes", 1, body("changed"))
        .expect_err("root denies update");
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
}

#[test]
fn check_permission_is_chainable() {
    let session = session(SessionConfig::default());
    let chained = session
        .check_permission(QueryKind::Select, Some("notes"))
        .and_then(|s| s.check_permission(QueryKind::Insert, None));
    assert!(chained.is_ok());
}

#[test]
fn disabled_checks_let_everything_through() {
    let mut session = session(SessionConfig::default().with_permissions(PermissionSet::deny_all()));
    let err = session.get("notes", 1).expect_err("select denied");
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    session.set_permission_checks(Some(false));
    assert!(session.get("notes", 1).expect("unchecked").is_some());
}

#[test]
fn permissions_can_change_on_a_live_session() {
    let mut session = session(SessionConfig::default());
    session.permissions_mut().set_table("notes", QueryKind::Insert, false);
    assert!(!session.has_permission(QueryKind::Insert, Some("notes")));
    assert!(
        session
            .execute(QueryDescriptor::insert("notes", body("x")), OutputSpec::Default)
            .is_err()
    );

    session.permissions_mut().clear_table("notes");
    assert!(
        session
            .execute(QueryDescriptor::insert("notes", body("x")), OutputSpec::Default)
            .is_ok()
    );
}
