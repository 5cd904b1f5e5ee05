//! JIT configuration loading for `--config`

use anyhow::Context;
use kestrel_engine::JitConfig;
use std::path::Path;

/// Environment variable naming a config file when `--config` is absent
pub const CONFIG_ENV: &str = "KESTREL_CONFIG";

/// Load the JIT configuration
///
/// `--config` wins over `KESTREL_CONFIG`; with neither, defaults apply.
pub fn load(path: Option<&Path>) -> anyhow::Result<JitConfig> {
    let from_env = std::env::var_os(CONFIG_ENV);
    let path = path.or_else(|| from_env.as_deref().map(Path::new));
    match path {
        Some(path) => from_file(path),
        None => Ok(JitConfig::default()),
    }
}

pub fn from_file(path: &Path) -> anyhow::Result<JitConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    parse(&text).with_context(|| format!("Invalid config {}", path.display()))
}

/// Parse a TOML table, either bare or under `[jit]`
pub fn parse(text: &str) -> anyhow::Result<JitConfig> {
    let table: toml::Table = toml::from_str(text)?;
    let config: JitConfig = match table.get("jit") {
        Some(jit) if table.len() == 1 => jit.clone().try_into()?,
        _ => toml::Value::Table(table).try_into()?,
    };
    tracing::debug!(?config, "loaded JIT configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bare_table() {
        let config = parse("compile_threshold = 4\ntrack_escapes = false\n").unwrap();
        assert_eq!(config.compile_threshold, 4);
        assert!(!config.track_escapes);
        assert_eq!(config.stable_executions, JitConfig::default().stable_executions);
    }

    #[test]
    fn test_jit_section() {
        let config = parse("[jit]\nmax_compile_failures = 7\n").unwrap();
        assert_eq!(config.max_compile_failures, 7);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(parse("compile_treshold = 4\n").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "code_cache_size = 4096").unwrap();
        writeln!(file, "max_iterations = 50").unwrap();

        let config = from_file(file.path()).unwrap();
        assert_eq!(config.code_cache_size, 4096);
        assert_eq!(config.max_iterations, 50);
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = from_file(&path).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
