use clap::{Parser, Subcommand};
use std::path::PathBuf;
use time::{Date, Duration};

const DEFAULT_AUTH_COOKIE_NAME: &str = "daydrop_auth";

const DAY_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day]");

pub(crate) enum RunOutcome {
    Serve(daydrop::config::AppConfig),
    Exit(i32),
}

pub(crate) fn run() -> RunOutcome {
    let cli = Cli::parse();
    if let Some(Command::AuthKey) = cli.command {
        let code = run_auth_key();
        return RunOutcome::Exit(code);
    }
    if let Some(Command::HashPassword(args)) = cli.command {
        let code = run_hash_password(args);
        return RunOutcome::Exit(code);
    }

    let root = match cli.root.as_ref() {
        Some(root) => root.clone(),
        None => {
            eprintln!("error: --root is required unless using a subcommand");
            return RunOutcome::Exit(2);
        }
    };
    let root = std::fs::canonicalize(&root)
        .unwrap_or_else(|err| panic!("failed to resolve root directory: {err}"));
    if !root.is_dir() {
        panic!("root path is not a directory: {}", root.display());
    }

    let trip = match resolve_trip_window(&cli) {
        Ok(trip) => trip,
        Err(err) => {
            eprintln!("error: {err}");
            return RunOutcome::Exit(2);
        }
    };
    let Some(reference_zone) = time_tz::timezones::get_by_name(&cli.reference_zone) else {
        eprintln!("error: unknown reference zone '{}'", cli.reference_zone);
        return RunOutcome::Exit(2);
    };
    if cli.cutoff_hour >= 24 {
        eprintln!("error: cutoff hour must be between 0 and 23");
        return RunOutcome::Exit(2);
    }
    let auth = match resolve_auth_config(&cli) {
        Ok(auth) => auth,
        Err(err) => {
            eprintln!("error: {err}");
            return RunOutcome::Exit(2);
        }
    };

    RunOutcome::Serve(daydrop::config::AppConfig {
        root,
        app_name: cli.app_name,
        trip,
        reference_zone,
        cutoff_hour: cli.cutoff_hour,
        admin_emails: cli.admin_emails,
        auth,
    })
}

#[derive(Parser, Debug)]
#[command(
    name = "daydrop",
    version,
    about = "Date-gated private content sharing server"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[arg(long)]
    root: Option<PathBuf>,
    #[arg(long, default_value = "Daydrop")]
    app_name: String,
    #[arg(long, env = "DAYDROP_TRIP_START")]
    trip_start: Option<String>,
    #[arg(long, env = "DAYDROP_TRIP_END")]
    trip_end: Option<String>,
    #[arg(long, env = "DAYDROP_REFERENCE_ZONE", default_value = "Asia/Tokyo")]
    reference_zone: String,
    #[arg(long, env = "DAYDROP_CUTOFF_HOUR", default_value_t = 7)]
    cutoff_hour: u8,
    #[arg(
        long = "admin",
        env = "DAYDROP_ADMIN_EMAILS",
        value_delimiter = ','
    )]
    admin_emails: Vec<String>,
    #[arg(long, env = "DAYDROP_AUTH_KEY")]
    auth_key: Option<String>,
    #[arg(long, env = "DAYDROP_AUTH_TOKEN_TTL")]
    auth_token_ttl: Option<String>,
    #[arg(long, env = "DAYDROP_AUTH_COOKIE_NAME")]
    auth_cookie_name: Option<String>,
    #[arg(long, env = "DAYDROP_AUTH_COOKIE_SECURE")]
    auth_cookie_secure: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    AuthKey,
    HashPassword(HashPasswordArgs),
}

#[derive(clap::Args, Debug)]
struct HashPasswordArgs {
    password: String,
}

fn run_auth_key() -> i32 {
    let secret = match daydrop::generate_auth_key() {
        Ok(secret) => secret,
        Err(err) => {
            eprintln!("failed to generate auth key: {err}");
            return 1;
        }
    };
    println!("{secret}");
    0
}

fn run_hash_password(args: HashPasswordArgs) -> i32 {
    let hash = match daydrop::hash_password(&args.password) {
        Ok(hash) => hash,
        Err(err) => {
            eprintln!("failed to hash password: {err}");
            return 1;
        }
    };
    println!("{hash}");
    0
}

fn resolve_trip_window(cli: &Cli) -> Result<daydrop::config::TripWindow, String> {
    let start = cli
        .trip_start
        .as_deref()
        .ok_or("--trip-start is required")?;
    let end = cli.trip_end.as_deref().ok_or("--trip-end is required")?;
    let start = parse_trip_date(start)?;
    let end = parse_trip_date(end)?;
    if end < start {
        return Err("trip end cannot be before trip start".to_string());
    }
    Ok(daydrop::config::TripWindow { start, end })
}

fn parse_trip_date(raw: &str) -> Result<Date, String> {
    Date::parse(raw.trim(), DAY_FORMAT)
        .map_err(|_| format!("invalid date '{raw}'; expected YYYY-MM-DD"))
}

fn resolve_auth_config(cli: &Cli) -> Result<Option<daydrop::config::AuthConfig>, String> {
    let has_any = cli.auth_key.is_some()
        || cli.auth_token_ttl.is_some()
        || cli.auth_cookie_name.is_some()
        || cli.auth_cookie_secure;

    if !has_any {
        return Ok(None);
    }

    let auth_key = cli
        .auth_key
        .as_ref()
        .ok_or("auth is configured but --auth-key is missing")?
        .trim();
    if auth_key.is_empty() {
        return Err("auth key cannot be empty".to_string());
    }

    if let Some(name) = cli.auth_cookie_name.as_deref()
        && name.trim().is_empty()
    {
        return Err("auth cookie name cannot be empty".to_string());
    }

    let token_ttl = match cli.auth_token_ttl.as_deref() {
        Some(raw) => parse_auth_token_ttl(raw)?,
        None => default_auth_token_ttl(),
    };
    let cookie_name = cli
        .auth_cookie_name
        .as_deref()
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|| DEFAULT_AUTH_COOKIE_NAME.to_string());

    Ok(Some(daydrop::config::AuthConfig {
        key: auth_key.to_string(),
        token_ttl,
        cookie_name,
        cookie_secure: cli.auth_cookie_secure,
    }))
}

fn default_auth_token_ttl() -> Duration {
    Duration::days(14)
}

fn parse_auth_token_ttl(raw: &str) -> Result<Duration, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("auth token ttl cannot be empty".to_string());
    }

    let (amount, unit) = match value.chars().last() {
        Some(ch) if ch.is_ascii_alphabetic() => {
            (&value[..value.len() - 1], ch.to_ascii_lowercase())
        }
        _ => (value, 's'),
    };

    let amount: i64 = amount
        .parse()
        .map_err(|_| format!("invalid auth token ttl '{value}'; expected <number>[s|m|h|d]"))?;

    if amount <= 0 {
        return Err("auth token ttl must be greater than 0".to_string());
    }

    match unit {
        's' => Ok(Duration::seconds(amount)),
        'm' => Ok(Duration::minutes(amount)),
        'h' => Ok(Duration::hours(amount)),
        'd' => Ok(Duration::days(amount)),
        _ => Err(format!(
            "invalid auth token ttl '{value}'; expected <number>[s|m|h|d]"
        )),
    }
}
