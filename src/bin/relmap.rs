use relmap::query::output::{Strategy, resolve};
use relmap::{
    Credentials, OutputSpec, QueryDescriptor, QueryKind, Session, SessionConfig, Value, emulate,
};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "info" => cmd_info(&args[2..]),
        "query" => cmd_query(&args[2..]),
        "emulate" => cmd_emulate(&args[2..]),
        "outputs" => cmd_outputs(&args[2..]),
        other => {
            print_usage();
            Err(format!("unknown top-level command: {other}"))
        }
    }
}

fn cmd_info(args: &[String]) -> Result<(), String> {
    let session = open_session(args)?;
    let info = session.info().map_err(|e| format!("info: {e}"))?;
    let json = serde_json::to_string_pretty(&info).map_err(|e| format!("encode info: {e}"))?;
    println!("{json}");
    Ok(())
}

fn cmd_query(args: &[String]) -> Result<(), String> {
    let sql = parse_flag_value(args, "--sql").ok_or("--sql is required")?;
    let kind = match parse_flag_value(args, "--kind") {
        Some(kind) => kind.parse::<QueryKind>()?,
        None => QueryKind::Select,
    };
    let spec = match parse_flag_value(args, "--output") {
        Some(token) => token
            .parse::<OutputSpec>()
            .map_err(|e| format!("invalid --output: {e}"))?,
        None => OutputSpec::Default,
    };
    let mut descriptor = QueryDescriptor::raw(kind, sql).with_params(parse_params(args)?);
    if let Some(table) = parse_flag_value(args, "--table") {
        descriptor = descriptor.with_table(table);
    }

    let mut session = open_session(args)?;
    let output = session
        .execute(descriptor, spec)
        .map_err(|e| format!("[{}] {e}", e.code_str()))?;
    let json = serde_json::to_string_pretty(&output).map_err(|e| format!("encode output: {e}"))?;
    println!("{json}");
    Ok(())
}

fn cmd_emulate(args: &[String]) -> Result<(), String> {
    let sql = parse_flag_value(args, "--sql").ok_or("--sql is required")?;
    println!("{}", emulate(&sql, &parse_params(args)?.into()));
    Ok(())
}

/// Lists every output token with the query kinds it accepts.
fn cmd_outputs(args: &[String]) -> Result<(), String> {
    let only = match parse_flag_value(args, "--kind") {
        Some(kind) => Some(kind.parse::<QueryKind>()?),
        None => None,
    };
    for strategy in Strategy::all() {
        let kinds: Vec<&str> = QueryKind::ALL
            .into_iter()
            .filter(|kind| only.is_none_or(|k| k == *kind))
            .filter(|kind| resolve(*kind, &strategy.into()).is_ok())
            .map(QueryKind::as_str)
            .collect();
        if kinds.is_empty() {
            continue;
        }
        println!("{}\t{}", strategy.token(), kinds.join(","));
    }
    Ok(())
}

fn open_session(args: &[String]) -> Result<Session, String> {
    let dsn = parse_flag_value(args, "--dsn").ok_or("--dsn is required")?;
    let credentials = match parse_flag_value(args, "--user") {
        Some(user) => Credentials::new(user, parse_flag_value(args, "--password").unwrap_or_default()),
        None => Credentials::anonymous(),
    };
    let mut config = SessionConfig::default();
    if args.iter().any(|a| a == "--read-only") {
        config = SessionConfig::read_only();
    }
    if let Some(primary) = parse_flag_value(args, "--primary") {
        config = config.with_primary(primary);
    }
    config = config.with_debug(args.iter().any(|a| a == "--debug"));
    Session::connect(&dsn, credentials, config).map_err(|e| format!("connect: {e}"))
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    for idx in 0..args.len() {
        if args[idx] == flag {
            return args.get(idx + 1).cloned();
        }
    }
    None
}

/// Collects `--param` and `--param-hex` values in command-line order.
fn parse_params(args: &[String]) -> Result<Vec<Value>, String> {
    let mut params = Vec::new();
    for idx in 0..args.len() {
        let Some(raw) = args.get(idx + 1) else {
            break;
        };
        match args[idx].as_str() {
            "--param" => params.push(parse_value(raw)),
            "--param-hex" => params.push(Value::Blob(
                hex::decode(raw).map_err(|e| format!("invalid --param-hex: {e}"))?,
            )),
            _ => {}
        }
    }
    Ok(params)
}

fn parse_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Integer(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Value::Float(v);
    }
    Value::from(raw)
}

fn print_usage() {
    eprintln!("relmap commands:");
    eprintln!("  info --dsn <dsn> [--user <u> --password <p>]");
    eprintln!(
        "  query --dsn <dsn> --sql <sql> [--kind <kind>] [--table <t>] [--output <token>] [--param <v>]... [--param-hex <hex>]... [--read-only] [--debug]"
    );
    eprintln!("  emulate --sql <sql> [--param <v>]...");
    eprintln!("  outputs [--kind <kind>]");
}
