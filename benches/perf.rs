use criterion::{Criterion, black_box, criterion_group, criterion_main};
use relmap::cache::RowCache;
use relmap::query::output::resolve;
use relmap::{
    Credentials, OutputSpec, QueryDescriptor, QueryKind, Record, Retrieval, Session, SessionConfig,
    Strategy, Value,
};

const TABLE_NAME: &str = "users";
const SEEDED_ROWS: i64 = 1_000;

fn setup_session(seed_rows: i64) -> Session {
    let mut session = Session::connect(
        "sqlite://localhost/:memory:",
        Credentials::anonymous(),
        SessionConfig::unrecorded(),
    )
    .expect("connect");
    session
        .execute(
            QueryDescriptor::raw(
                QueryKind::Create,
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)",
            )
            .with_table(TABLE_NAME),
            OutputSpec::Default,
        )
        .expect("create");
    session.begin_transaction().expect("begin");
    for i in 0..seed_rows {
        session
            .execute(
                QueryDescriptor::insert(
                    TABLE_NAME,
                    Record::from_pairs([
                        ("name", Value::from(format!("user-{i}"))),
                        ("age", Value::from(i % 90)),
                    ]),
                ),
                Strategy::InsertId,
            )
            .expect("seed");
    }
    session.commit_transaction().expect("commit");
    session
}

fn bench_resolution(c: &mut Criterion) {
    let specs: Vec<OutputSpec> = Strategy::all().into_iter().map(OutputSpec::from).collect();
    c.bench_function("resolve_every_strategy_for_select", |b| {
        b.iter(|| {
            for spec in &specs {
                let _ = black_box(resolve(QueryKind::Select, spec));
            }
        })
    });

    let mut cache = RowCache::new(TABLE_NAME);
    for key in 0..SEEDED_ROWS {
        cache.link(key, Record::from_pairs([("id", Value::from(key))]));
    }
    let keys: Vec<i64> = (0..SEEDED_ROWS * 2).step_by(3).collect();
    c.bench_function("row_cache_plan_mixed_keys", |b| {
        b.iter(|| black_box(cache.plan(Retrieval::Plain, &keys)))
    });
}

fn bench_session_paths(c: &mut Criterion) {
    let mut session = setup_session(SEEDED_ROWS);

    c.bench_function("point_get_cached", |b| {
        session.get(TABLE_NAME, 42).expect("warm");
        b.iter(|| black_box(session.get(TABLE_NAME, 42).expect("get")))
    });

    c.bench_function("point_get_refresh", |b| {
        b.iter(|| black_box(session.get_refresh(TABLE_NAME, 42).expect("refresh")))
    });

    let keys: Vec<i64> = (1..=100).collect();
    c.bench_function("rows_refresh_100", |b| {
        b.iter(|| black_box(session.rows_refresh(TABLE_NAME, &keys).expect("rows")))
    });

    c.bench_function("assocs_limit_100", |b| {
        b.iter(|| {
            let d = QueryDescriptor::select("SELECT * FROM users ORDER BY age")
                .with_table(TABLE_NAME)
                .with_limit(100);
            black_box(session.execute(d, Strategy::Assocs).expect("assocs"))
        })
    });

    c.bench_function("update_with_rollback_snapshot", |b| {
        session.set_rollback(Some(true));
        b.iter(|| {
            let d = QueryDescriptor::update_by_key(
                TABLE_NAME,
                "id",
                Record::from_pairs([("age", 33)]),
                7,
            );
            black_box(session.execute(d, OutputSpec::Default).expect("update"))
        })
    });
}

criterion_group!(benches, bench_resolution, bench_session_paths);
criterion_main!(benches);
