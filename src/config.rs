//! Loads `key = value` settings from every file in a directory, in
//! deterministic first-seen order — the directory-config helper external
//! collaborators use to parameterize the development binary (ring size,
//! bind address, log level) without a dependency on a full config-file
//! format.

use std::fs;
use std::io;
use std::path::Path;

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Settings collected from a directory of config files, keyed by name
/// with insertion order preserved so later files can be listed first for
/// override precedence without losing earlier-file keys that weren't
/// repeated.
#[derive(Debug, Default, Clone)]
pub struct Config {
    values: IndexMap<String, String>,
}

impl Config {
    /// Reads every regular file directly inside `dir` (not recursively),
    /// in directory-listing order, parsing `key = value` lines and
    /// ignoring blank lines and lines starting with `#`. A key repeated
    /// in a later file overwrites the earlier value but keeps its
    /// original position.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let mut entries: Vec<_> = fs::read_dir(dir).map_err(Error::Io)?.collect::<io::Result<_>>().map_err(Error::Io)?;
        entries.sort_by_key(|e| e.file_name());

        let mut values = IndexMap::new();
        for entry in entries {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let text = fs::read_to_string(&path).map_err(Error::Io)?;
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    values.insert(key.trim().to_string(), value.trim().to_string());
                }
            }
        }

        Ok(Config { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or(&self, key: &str, default: &'static str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn later_file_overrides_earlier_key_in_place() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("streamloop-config-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir(&dir).unwrap();

        write_file(&dir, "01-base.conf", "ring_size = 4\nbind = 127.0.0.1:9000\n");
        write_file(&dir, "02-override.conf", "# comment\nring_size = 8\n");

        let config = Config::from_dir(&dir).unwrap();
        assert_eq!(config.get("ring_size"), Some("8"));
        assert_eq!(config.get("bind"), Some("127.0.0.1:9000"));
        assert_eq!(config.parse::<usize>("ring_size"), Some(8));
        assert_eq!(config.keys().collect::<Vec<_>>(), vec!["ring_size", "bind"]);

        let _ = fs::remove_dir_all(&dir);
    }

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }
}
