use super::commands::ConfigAction;
use super::utils::{FAIL, OK};
use stackup_daemon::StackConfig;
use stackup_types::StackResult;
use std::path::Path;

pub fn handle_config(config_path: &Path, action: Option<ConfigAction>) -> StackResult<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            if !config_path.exists() {
                println!(
                    "\x1b[38;5;245mNo stack file at {:?}, showing the built-in stack\x1b[0m",
                    config_path
                );
            }
            let config = StackConfig::load(config_path)?;
            println!("{}", config.summary());
            println!("{}", config.to_toml()?);
        }
        Some(ConfigAction::Validate) => match StackConfig::load(config_path) {
            Ok(config) => {
                println!("{} Configuration is valid", OK);
                print!("{}", config.summary());
            }
            Err(e) => {
                println!("{} Configuration error: {}", FAIL, e);
                return Err(e);
            }
        },
        Some(ConfigAction::Default { output }) => {
            let config = StackConfig::default();
            match output {
                Some(path) => {
                    config.save(&path)?;
                    println!("{} Wrote the built-in stack to {:?}", OK, path);
                }
                None => print!("{}", config.to_toml()?),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_written_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackup.toml");

        handle_config(&path, Some(ConfigAction::Default { output: Some(path.clone()) })).unwrap();
        assert!(path.exists());
        handle_config(&path, Some(ConfigAction::Validate)).unwrap();
    }

    #[test]
    fn test_validate_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackup.toml");
        std::fs::write(
            &path,
            r#"
[[process]]
name = "a"
command = "true"
depends_on = [{ name = "a" }]
"#,
        )
        .unwrap();

        let err = handle_config(&path, Some(ConfigAction::Validate)).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
