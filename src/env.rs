use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Loads `.env` files before clap reads the environment, so file values can
/// feed `env = ...` argument fallbacks.
pub fn bootstrap_from_args(args: &[OsString]) -> Result<()> {
    let explicit_env_file = extract_env_file_arg(args);
    load_env(explicit_env_file.as_ref())
}

pub fn load_env(explicit_env_file: Option<&PathBuf>) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let env_files = resolve_env_files(&cwd, explicit_env_file);

    for (key, value) in collect_env_values(&env_files, explicit_env_file.is_some())? {
        std::env::set_var(key, value);
    }
    Ok(())
}

/// Values from `files` that are not already set in the process environment,
/// sorted by key. Later files override earlier ones.
fn collect_env_values(files: &[PathBuf], required: bool) -> Result<Vec<(String, String)>> {
    let mut loaded = HashMap::new();
    for env_file in files {
        if !env_file.exists() && !required {
            continue;
        }

        let parsed = dotenvy::from_path_iter(env_file)
            .with_context(|| format!("failed to read env file {}", env_file.display()))?;
        for item in parsed {
            let (key, value) =
                item.with_context(|| format!("failed to parse env file {}", env_file.display()))?;
            if std::env::var_os(&key).is_some() {
                continue;
            }
            loaded.insert(key, value);
        }
    }

    let mut envs: Vec<(String, String)> = loaded.into_iter().collect();
    envs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(envs)
}

fn extract_env_file_arg(args: &[OsString]) -> Option<PathBuf> {
    let mut explicit = None;
    let mut idx = 1usize;
    while idx < args.len() {
        let Some(arg) = args[idx].to_str() else {
            idx += 1;
            continue;
        };

        if arg == "--" {
            break;
        }

        if arg == "--env-file" {
            if let Some(next) = args.get(idx + 1) {
                explicit = Some(PathBuf::from(next));
            }
            idx += 2;
            continue;
        }

        if let Some(value) = arg.strip_prefix("--env-file=") {
            explicit = Some(PathBuf::from(value));
        }

        idx += 1;
    }
    explicit
}

fn resolve_env_files(cwd: &Path, explicit_env_file: Option<&PathBuf>) -> Vec<PathBuf> {
    if let Some(path) = explicit_env_file {
        let full_path = if path.is_absolute() {
            path.clone()
        } else {
            cwd.join(path)
        };
        return vec![full_path];
    }

    let stage = std::env::var("INSIGHTS_ENV").unwrap_or_else(|_| "development".to_string());
    vec![
        cwd.join(".env"),
        cwd.join(format!(".env.{stage}")),
        cwd.join(".env.local"),
        cwd.join(format!(".env.{stage}.local")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn os_args(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn extracts_env_file_in_both_spellings() {
        assert_eq!(
            extract_env_file_arg(&os_args(&["insights-etl", "--env-file", "a.env", "fetch"])),
            Some(PathBuf::from("a.env"))
        );
        assert_eq!(
            extract_env_file_arg(&os_args(&["insights-etl", "fetch", "--env-file=b.env"])),
            Some(PathBuf::from("b.env"))
        );
        assert_eq!(
            extract_env_file_arg(&os_args(&["insights-etl", "--", "--env-file=c.env"])),
            None
        );
    }

    #[test]
    #[serial]
    fn default_files_follow_stage() {
        std::env::set_var("INSIGHTS_ENV", "prod");
        let files = resolve_env_files(Path::new("/work"), None);
        std::env::remove_var("INSIGHTS_ENV");
        assert_eq!(
            files,
            vec![
                PathBuf::from("/work/.env"),
                PathBuf::from("/work/.env.prod"),
                PathBuf::from("/work/.env.local"),
                PathBuf::from("/work/.env.prod.local"),
            ]
        );
    }

    #[test]
    #[serial]
    fn later_files_win_but_process_env_wins_over_all() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join(".env");
        let second = tmp.path().join(".env.local");
        fs::write(&first, "INSIGHTS_TEST_A=one\nINSIGHTS_TEST_B=one\n").unwrap();
        fs::write(&second, "INSIGHTS_TEST_A=two\n").unwrap();
        std::env::set_var("INSIGHTS_TEST_B", "process");

        let values = collect_env_values(&[first, second], false).unwrap();
        std::env::remove_var("INSIGHTS_TEST_B");
        assert_eq!(
            values,
            vec![("INSIGHTS_TEST_A".to_string(), "two".to_string())]
        );
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.env");
        assert!(collect_env_values(&[missing.clone()], true).is_err());
        assert!(collect_env_values(&[missing], false).unwrap().is_empty());
    }
}
