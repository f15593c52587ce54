//! Config Command
//!
//! Usage:
//!   guanxin config show [-f json]
//!   guanxin config path
//!   guanxin config init [--force]

use crate::cli::Output;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Print the merged effective configuration. The API key is never shown.
pub fn show(format: &str) -> Result<()> {
    let config = ConfigLoader::load()?;
    println!("{}", ConfigLoader::render(&config, format == "json")?);
    Ok(())
}

pub fn path() -> Result<()> {
    ConfigLoader::show_path();
    Ok(())
}

/// Write `./guanxin.toml` with every default spelled out
pub fn init(force: bool) -> Result<()> {
    let target = ConfigLoader::project_config_path();
    let existed = target.exists();
    let path = ConfigLoader::init_project(&target, force)?;

    let out = Output::new();
    if existed && !force {
        out.warning(&format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    } else {
        out.success(&format!("Created {}", path.display()));
    }
    Ok(())
}
