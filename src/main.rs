use clap::Parser;
use std::path::PathBuf;
use xantium_lib::config::{self, AppConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Session database file (overrides XANTIUM_DB)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Store KEY in the OS keyring and exit; use with XANTIUM_API_KEY_REF=keyring
    #[arg(long, value_name = "KEY")]
    set_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.debug { "debug" } else { "info" }),
    )
    .init();

    log::info!("Xantium starting...");
    log::debug!("Database override: {:?}", cli.db);

    if let Some(api_key) = cli.set_api_key.as_deref() {
        config::set_api_key_in_keyring(api_key)?;
        println!("API key stored in the keyring. Set XANTIUM_API_KEY_REF=keyring to use it.");
        return Ok(());
    }

    let mut config = AppConfig::from_env();
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    xantium_lib::run(config).await?;
    log::info!("Application finished.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_api_key_flag_takes_the_key() {
        let cli = Cli::try_parse_from(["xantium", "--set-api-key", "AIza-test"]).unwrap();
        assert_eq!(cli.set_api_key.as_deref(), Some("AIza-test"));
        assert!(!cli.debug);
    }

    #[test]
    fn set_api_key_flag_requires_a_value() {
        assert!(Cli::try_parse_from(["xantium", "--set-api-key"]).is_err());
    }

    #[test]
    fn plain_start_leaves_keyring_alone() {
        let cli = Cli::try_parse_from(["xantium", "--db", "/tmp/x.sqlite"]).unwrap();
        assert_eq!(cli.set_api_key, None);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.sqlite")));
    }
}
