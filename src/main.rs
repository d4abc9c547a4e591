use std::env;
use std::path::PathBuf;

use anyhow::Context;
use auth_sessions::app::build_sweeper;
use auth_sessions::auth::jwt::{KeyRing, generate_key_pair};
use auth_sessions::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
usage: auth-sessions <command>

commands:
  keygen [DIR]   generate a new signing key pair (DIR/private.pem, DIR/public/<kid>.pem)
  jwks           print the public verification keys as a JWK set
  purge          delete refresh tokens expired past the grace period, then exit
  sweep          purge periodically until interrupted (default)";

pub fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Si RUST_LOG n'est pas défini, utiliser ces règles par défaut
        tracing_subscriber::EnvFilter::new("info,auth_sessions=debug")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// ----------------- Main -----------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().map_or("sweep", String::as_str);

    match command {
        "keygen" => keygen(args.get(1).map(PathBuf::from)),
        "jwks" => print_jwks(),
        "purge" => purge().await,
        "sweep" => sweep().await,
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        other => {
            eprintln!("unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }
}

fn keygen(dir: Option<PathBuf>) -> anyhow::Result<()> {
    let (private_key_path, public_keys_dir) = match dir {
        Some(dir) => (dir.join("private.pem"), dir.join("public")),
        None => {
            let config = Config::from_env()?;
            (config.jwt_private_key_path, config.jwt_public_keys_dir)
        }
    };

    let kid = generate_key_pair(&private_key_path, &public_keys_dir)
        .with_context(|| format!("writing keys to {}", private_key_path.display()))?;

    println!("{kid}");
    tracing::info!(
        %kid,
        "New signing key active; keep retired public keys until their tokens expire"
    );
    Ok(())
}

fn print_jwks() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let keys = KeyRing::load(&config.jwt_private_key_path, &config.jwt_public_keys_dir)?;
    println!("{}", serde_json::to_string_pretty(&keys.jwks())?);
    Ok(())
}

async fn purge() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let purged = build_sweeper(&config).run_once().await?;
    tracing::info!(purged, "Purge complete");
    Ok(())
}

async fn sweep() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let sweeper = build_sweeper(&config);

    tracing::info!("Starting auth-sessions maintenance loop...");
    sweeper
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
            }
        })
        .await;
    Ok(())
}
