use anyhow::Result;
use candle_relay_core::ConfigLoader;
use clap::Args;

/// Arguments for the init-config command.
#[derive(Args, Debug, Clone)]
pub struct InitConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = "config.toml", env = "RELAY_CONFIG")]
    pub config: String,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

/// Writes the documented configuration template.
///
/// # Errors
/// Returns an error if the file exists (without `--force`) or cannot be written.
pub fn run_init_config(args: InitConfigArgs) -> Result<()> {
    ConfigLoader::write_template(&args.config, args.force)?;
    tracing::info!(path = %args.config, "Wrote configuration template");
    println!(
        "Wrote {}. Set server.url and server.api_key before running.",
        args.config
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_refuses_to_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# existing\n").unwrap();

        let args = InitConfigArgs {
            config: path.display().to_string(),
            force: false,
        };
        assert!(run_init_config(args.clone()).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# existing\n");

        run_init_config(InitConfigArgs { force: true, ..args }).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("[server]"));
    }
}
