//! `draftloom config`: print the effective configuration.

use super::load_config;

pub fn show(config_path: Option<&str>) -> Result<(), String> {
    let config = load_config(config_path)?;
    let yaml = config.to_yaml().map_err(|e| e.to_string())?;
    print!("{}", yaml);
    Ok(())
}
