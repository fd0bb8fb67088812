use anyhow::{bail, Context, Result};
use resident_config::{ConfigLoader, ResidentConfig};

use crate::cli::ConfigCommands;

pub fn handle(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Generate { output, force } => {
            let sample = ResidentConfig::generate_sample();
            match output {
                Some(path) => {
                    if path.exists() && !force {
                        bail!(
                            "{} already exists, use --force to overwrite",
                            path.display()
                        );
                    }
                    std::fs::write(&path, sample)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Wrote sample configuration to {}", path.display());
                }
                None => print!("{}", sample),
            }
            Ok(())
        }
        ConfigCommands::Validate { config_file } => {
            let config = ConfigLoader::new()
                .from_file(&config_file)
                .with_context(|| format!("Invalid configuration in {}", config_file.display()))?;

            println!("✓ {} is valid", config_file.display());
            println!("  workers: {}", config.pool.workers);
            if let Some(http) = &config.http {
                println!("  http:    {}", http.bind_address);
            }
            if let Some(socket) = &config.socket {
                println!("  socket:  {}", socket.bind_address);
            }
            Ok(())
        }
    }
}
