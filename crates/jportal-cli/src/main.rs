//! jportal - command-line access to the JIIT student web portal.
//!
//! Logs in with the two-step portal handshake and prints session details or
//! the JSON returned by a few read-only endpoints.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Result};
use jportal_core::{Config, CredentialStore, PassthroughCodec, PortalClient, Session};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: jportal <command> [--remember]

Commands:
  login             Log in and print the session summary
  personal-info     Print personal information
  hostel            Print hostel allocation details
  attendance-meta   Print attendance registration metadata
  logout            Forget the stored password and last username

Options:
  --remember        Store the password in the OS keychain after login

Environment:
  JPORTAL_USERNAME, JPORTAL_PASSWORD   Credentials (also read from .env)
  JPORTAL_API_BASE                     Portal API base URL (overrides config)
  RUST_LOG                             Log filter (default: warn)

Payloads are sent as plain JSON. The live JIIT portal only accepts its own
obfuscated payloads, so point JPORTAL_API_BASE (or api_base in
~/.config/jportal/config.json) at a portal that accepts plain JSON.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Login,
    PersonalInfo,
    Hostel,
    AttendanceMeta,
    Logout,
}

impl Command {
    fn parse(arg: &str) -> Option<Self> {
        match arg {
            "login" => Some(Command::Login),
            "personal-info" => Some(Command::PersonalInfo),
            "hostel" => Some(Command::Hostel),
            "attendance-meta" => Some(Command::AttendanceMeta),
            "logout" => Some(Command::Logout),
            _ => None,
        }
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let remember = args.iter().any(|a| a == "--remember");
    let command = match args.iter().find(|a| !a.starts_with("--")) {
        Some(arg) => match Command::parse(arg) {
            Some(command) => command,
            None => bail!("Unknown command '{}'\n\n{}", arg, USAGE),
        },
        None => {
            eprintln!("{}", USAGE);
            return Ok(());
        }
    };

    let mut config = Config::load()?;
    apply_api_base_override(&mut config, std::env::var("JPORTAL_API_BASE").ok());

    if command == Command::Logout {
        return logout(&mut config);
    }

    let client = PortalClient::new(&config, Arc::new(PassthroughCodec))?;

    let username = resolve_username(&config)?;
    let password = resolve_password(&username)?;

    let session = client.login(&username, &password).await?;
    info!(username = %username, "Logged in");

    if remember {
        if let Err(e) = CredentialStore::store(&username, &password) {
            warn!(error = %e, "Failed to store password");
        }
    }
    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    match command {
        Command::Login => print_session(&session),
        Command::PersonalInfo => print_json(&client.get_personal_info().await?)?,
        Command::Hostel => print_json(&client.get_hostel_details().await?)?,
        Command::AttendanceMeta => print_json(&client.get_attendance_meta().await?)?,
        Command::Logout => {}
    }

    Ok(())
}

fn apply_api_base_override(config: &mut Config, api_base: Option<String>) {
    if let Some(api_base) = api_base.filter(|s| !s.trim().is_empty()) {
        config.api_base = api_base.trim().to_string();
    }
}

fn logout(config: &mut Config) -> Result<()> {
    let Some(username) = config.last_username.take() else {
        println!("Not logged in");
        return Ok(());
    };

    if CredentialStore::has_credentials(&username) {
        CredentialStore::delete(&username)?;
        println!("Removed stored password for {}", username);
    }
    config.save()?;
    info!(username = %username, "Logged out");
    Ok(())
}

fn resolve_username(config: &Config) -> Result<String> {
    if let Ok(username) = std::env::var("JPORTAL_USERNAME") {
        if !username.is_empty() {
            return Ok(username);
        }
    }

    match config.last_username {
        Some(ref last_user) => {
            let input = prompt(&format!("Username [{}]: ", last_user))?;
            Ok(if input.is_empty() { last_user.clone() } else { input })
        }
        None => {
            let input = prompt("Username: ")?;
            if input.is_empty() {
                bail!("Username required");
            }
            Ok(input)
        }
    }
}

fn resolve_password(username: &str) -> Result<String> {
    if let Ok(password) = std::env::var("JPORTAL_PASSWORD") {
        if !password.is_empty() {
            return Ok(password);
        }
    }
    if CredentialStore::has_credentials(username) {
        return CredentialStore::get_password(username);
    }
    Ok(rpassword::prompt_password("Password: ")?)
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn print_session(session: &Session) {
    println!("Name:        {}", session.name());
    if let Some(enrollment) = session.enrollment_no() {
        println!("Enrollment:  {}", enrollment);
    }
    println!("Institute:   {} ({})", session.institute(), session.institute_id());
    println!("Member id:   {}", session.member_id());
    println!("Member type: {}", session.member_type());
    println!(
        "Expires:     {} ({} min left)",
        session.expiry().with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
        session.minutes_until_expiry()
    );
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("login"), Some(Command::Login));
        assert_eq!(Command::parse("personal-info"), Some(Command::PersonalInfo));
        assert_eq!(Command::parse("hostel"), Some(Command::Hostel));
        assert_eq!(Command::parse("attendance-meta"), Some(Command::AttendanceMeta));
        assert_eq!(Command::parse("logout"), Some(Command::Logout));
        assert_eq!(Command::parse("grades"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_api_base_override() {
        let mut config = Config::default();
        apply_api_base_override(&mut config, None);
        assert_eq!(config.api_base, Config::default().api_base);

        apply_api_base_override(&mut config, Some("  ".to_string()));
        assert_eq!(config.api_base, Config::default().api_base);

        apply_api_base_override(&mut config, Some("http://localhost:8080/api ".to_string()));
        assert_eq!(config.api_base, "http://localhost:8080/api");
    }

    #[test]
    fn test_usage_documents_payload_encoding() {
        assert!(USAGE.contains("logout"));
        assert!(USAGE.contains("JPORTAL_API_BASE"));
        assert!(USAGE.contains("plain JSON"));
    }
}
