use deskbridge_core::{Config, Paths};

pub async fn run(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    if paths.config_file().exists() && !force {
        println!(
            "Config already exists at {} (use --force to overwrite)",
            paths.config_file().display()
        );
        return Ok(());
    }
    let config = Config::default();
    config.save(&paths)?;
    println!("Wrote default config to {}", paths.config_file().display());
    println!("Workspace directory: {}", paths.workspace().display());
    Ok(())
}
