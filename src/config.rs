use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use gopher_client_core::GopherConfig;

/// Settings given on the command line; each one wins over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub no_cache: bool,
    pub timeout: Option<u64>,
    pub ssl: bool,
    pub use_ipv6: Option<bool>,
}

/// A loaded config plus what happened on the way. Logging isn't set up
/// until the config says at which level, so the caller reports these.
#[derive(Debug)]
pub struct Loaded {
    pub config: GopherConfig,
    pub path: Option<PathBuf>,
    /// Default locations that exist but failed to parse.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Read `explicit` if given, otherwise the first default location that parses.
///
/// A missing or broken default file falls back to built-in defaults. An
/// explicit file has to exist and parse.
pub fn load(explicit: Option<&Path>) -> Result<Loaded> {
    load_from(explicit, &candidate_paths())
}

fn load_from(explicit: Option<&Path>, candidates: &[PathBuf]) -> Result<Loaded> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        return Ok(Loaded {
            config,
            path: Some(path.to_path_buf()),
            skipped: Vec::new(),
        });
    }

    let mut skipped = Vec::new();
    for path in candidates {
        if let Ok(content) = std::fs::read_to_string(path) {
            match toml::from_str::<GopherConfig>(&content) {
                Ok(config) => {
                    return Ok(Loaded {
                        config,
                        path: Some(path.clone()),
                        skipped,
                    })
                }
                Err(e) => skipped.push((path.clone(), e.to_string())),
            }
        }
    }
    Ok(Loaded {
        config: GopherConfig::default(),
        path: None,
        skipped,
    })
}

pub fn apply(config: &mut GopherConfig, overrides: &Overrides) {
    if overrides.no_cache {
        config.cache.enabled = false;
    }
    if let Some(timeout) = overrides.timeout {
        config.gopher.timeout = timeout;
    }
    if overrides.ssl {
        config.gopher.use_ssl = true;
    }
    if overrides.use_ipv6.is_some() {
        config.gopher.use_ipv6 = overrides.use_ipv6;
    }
}

fn candidate_paths() -> Vec<PathBuf> {
    let home = match std::env::var("HOME") {
        Ok(h) => PathBuf::from(h),
        Err(_) => return Vec::new(),
    };

    vec![home.join(".gopher-client.toml")]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gopher]\ntimeout = 7\n\n[cache]\nmax_size_mb = 5").unwrap();

        let loaded = load(Some(file.path())).unwrap();
        assert_eq!(loaded.path.as_deref(), Some(file.path()));
        let config = loaded.config;
        assert_eq!(config.gopher.timeout, 7);
        assert_eq!(config.cache.max_size_mb, 5);
        assert!(config.cache.enabled);
    }

    #[test]
    fn explicit_file_must_exist_and_parse() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("missing.toml"))).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gopher\ntimeout = ").unwrap();
        assert!(load(Some(file.path())).is_err());
    }

    #[test]
    fn broken_default_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.toml");
        let good = dir.path().join("good.toml");
        let missing = dir.path().join("missing.toml");
        std::fs::write(&broken, "[gopher\ntimeout = ").unwrap();
        std::fs::write(&good, "[gopher]\ntimeout = 9\n").unwrap();

        let loaded = load_from(None, &[missing.clone(), broken.clone()]).unwrap();
        assert_eq!(loaded.config, GopherConfig::default());
        assert_eq!(loaded.path, None);
        assert_eq!(loaded.skipped.len(), 1);
        assert_eq!(loaded.skipped[0].0, broken);

        let loaded = load_from(None, &[broken.clone(), good.clone()]).unwrap();
        assert_eq!(loaded.config.gopher.timeout, 9);
        assert_eq!(loaded.path, Some(good));
        assert_eq!(loaded.skipped.len(), 1);
    }

    #[test]
    fn flags_override_file() {
        let mut config = GopherConfig::default();
        config.gopher.use_ipv6 = Some(true);
        apply(
            &mut config,
            &Overrides {
                no_cache: true,
                timeout: Some(3),
                ssl: true,
                use_ipv6: Some(false),
            },
        );
        assert!(!config.cache.enabled);
        assert_eq!(config.gopher.timeout, 3);
        assert!(config.gopher.use_ssl);
        assert_eq!(config.gopher.use_ipv6, Some(false));

        let mut config = GopherConfig::default();
        config.gopher.use_ipv6 = Some(true);
        apply(&mut config, &Overrides::default());
        assert_eq!(config.gopher.use_ipv6, Some(true));
        assert!(config.cache.enabled);
    }
}
