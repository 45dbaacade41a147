//! INI file configuration adapter.

use crate::domain::error::ThalesError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

#[derive(Debug)]
pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ThalesError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config.load(path).map_err(|reason| ThalesError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, ThalesError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| ThalesError::ConfigParse {
                file: "<string>".into(),
                reason,
            })?;
        Ok(Self { config })
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config
            .get(section, key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[data]
source = csv
path = /srv/prices
instrument = EUR_USD

[positions]
root = /srv/positions

[backtest]
strategy = mr_eurusd
start = 2019-01-01
n_days = 20

[policy]
entry_signal = 0.2
exit_signal = 0.3
allow_short = no
"#;

    #[test]
    fn from_string_parses_sections() {
        let adapter = FileConfigAdapter::from_string(SAMPLE).unwrap();
        assert_eq!(adapter.get_string("data", "source"), Some("csv".to_string()));
        assert_eq!(
            adapter.get_string("positions", "root"),
            Some("/srv/positions".to_string())
        );
        assert_eq!(adapter.get_int("backtest", "n_days", 0), 20);
        assert_eq!(adapter.get_string("policy", "allow_short"), Some("no".to_string()));
    }

    #[test]
    fn missing_keys_fall_back() {
        let adapter = FileConfigAdapter::from_string(SAMPLE).unwrap();
        assert_eq!(adapter.get_string("backtest", "run_name"), None);
        assert_eq!(adapter.get_string("nope", "key"), None);
        assert_eq!(adapter.get_int("data", "max_lookahead", 42), 42);
        assert_eq!(adapter.get_string("backtest", "end"), None);
    }

    #[test]
    fn empty_value_is_absent() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nrun_name =\n").unwrap();
        assert_eq!(adapter.get_string("backtest", "run_name"), None);
    }

    #[test]
    fn non_numeric_uses_default() {
        let adapter = FileConfigAdapter::from_string("[data]\nmax_lookahead = lots\n").unwrap();
        assert_eq!(adapter.get_int("data", "max_lookahead", 7), 7);
    }

    #[test]
    fn from_file_reads_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", SAMPLE).unwrap();
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("data", "instrument"),
            Some("EUR_USD".to_string())
        );
    }

    #[test]
    fn from_file_missing_is_parse_error() {
        let err = FileConfigAdapter::from_file("/nonexistent/thales.ini").unwrap_err();
        assert!(matches!(err, ThalesError::ConfigParse { .. }));
    }
}
