//! Serve Command
//!
//! Usage:
//!   guanxin serve [--addr 127.0.0.1:3000]

use crate::cli::Output;
use crate::config::ConfigLoader;
use crate::server;
use crate::types::Result;

pub async fn run(addr: Option<String>) -> Result<()> {
    let mut config = ConfigLoader::load()?;
    if let Some(addr) = addr {
        config.server.bind_addr = addr;
        config.validate()?;
    }

    let out = Output::new();
    out.section("guanxin server");
    out.field("Address", &config.server.bind_addr);
    out.field("Model", format!("{}/{}", config.genai.provider, config.genai.model));
    out.field("Uploads", config.upload.root_dir.display());
    out.field("Database", config.journal.database_path.display());
    println!();

    server::serve(config).await
}
