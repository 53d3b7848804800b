//! tokenward -- obtain provider access tokens through an auth backend.
//!
//! This is the binary entry point. It wires together:
//!   - Configuration loading
//!   - Tracing/logging
//!   - The GitHub facade with a console authorization requester

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use tokenward::config::Config;
use tokenward::connector::{AuthorizationPrompt, AuthorizationRequester};
use tokenward::error::AuthError;
use tokenward::providers::{GithubAuth, GithubAuthOptions};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

enum Command {
    Token { scopes: Vec<String> },
}

struct CliArgs {
    config_path: PathBuf,
    command: Command,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("tokenward.toml");
    let mut command = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = PathBuf::from(path);
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("tokenward {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "token" => {
                command = Some(Command::Token {
                    scopes: args.by_ref().collect(),
                });
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    let Some(command) = command else {
        print_usage();
        std::process::exit(1);
    };

    CliArgs {
        config_path,
        command,
    }
}

fn print_usage() {
    println!(
        "\
tokenward {version} -- OAuth session manager

USAGE:
    tokenward [OPTIONS] token [SCOPE...]

COMMANDS:
    token [SCOPE...]       Print a GitHub access token carrying SCOPE (plus defaults)

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: tokenward.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    TOKENWARD_CONFIG       Alternative to --config flag
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Console authorization
// ---------------------------------------------------------------------------

/// Asks the user to open the authorization page and paste back its response.
struct ConsoleAuthorizationRequester;

#[async_trait]
impl AuthorizationRequester for ConsoleAuthorizationRequester {
    async fn authorize(
        &self,
        prompt: AuthorizationPrompt<'_>,
    ) -> tokenward::Result<serde_json::Value> {
        eprintln!(
            "Sign in to {} ({}) by opening:\n\n    {}\n\nthen paste the response JSON and press Enter:",
            prompt.provider.title, prompt.scopes, prompt.url
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let line = lines
            .next_line()
            .await
            .map_err(|e| AuthError::Other(format!("Failed to read stdin: {e}")))?
            .unwrap_or_default();

        let line = line.trim();
        if line.is_empty() {
            return Err(AuthError::AuthenticationFailed(
                "Authorization cancelled".to_string(),
            ));
        }
        serde_json::from_str(line).map_err(|e| {
            AuthError::AuthenticationFailed(format!("Response is not valid JSON: {e}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = parse_args();

    // Allow TOKENWARD_CONFIG env var as alternative to --config flag
    let config_path = std::env::var("TOKENWARD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    let config = Config::load(&config_path)?;
    init_tracing(&config);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting tokenward"
    );

    let options = GithubAuthOptions::from_config(&config, Arc::new(ConsoleAuthorizationRequester))?;
    let github = GithubAuth::create(options)?;

    match cli.command {
        Command::Token { scopes } => {
            let token = github.get_access_token(scopes).await?;
            println!("{token}");
        }
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("tokenward={level},warn"))
    });

    // stdout carries the token; logs go to stderr
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
