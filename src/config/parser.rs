use super::*;
use toml::{Table, Value};

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

pub fn parse_file<P: AsRef<Path>>(conf: P) -> Result<Config, Error> {
    let mut toml = String::new();
    {
        let mut f = File::open(conf)?;
        f.read_to_string(&mut toml)?;
    }

    let table: Table = toml.parse()?;
    config_from_table(table)
}

fn config_from_table(table: Table) -> Result<Config, Error> {
    let table = Value::Table(table);
    let mut config: Config = Default::default();

    match lookup(&table, &["listen", "port"]) {
        Some(&Value::Integer(p)) if p <= u16::MAX as i64 && p > 0 => config.port = p as u16,
        Some(&Value::Integer(p)) => {
            return Err(Error::Validation(format!(
                "The given port {} is out of range",
                p
            )))
        }
        Some(val) => {
            return Err(Error::Validation(format!(
                "Expected the port to be an integer, got a {}",
                val.type_str()
            )))
        }
        None => (),
    }

    match lookup(&table, &["static", "webroot"]) {
        Some(Value::String(path)) => config.stat.webroot = PathBuf::from(path),
        Some(val) => {
            return Err(Error::Validation(format!(
                "Expected the webroot to be a string, got a {}",
                val.type_str()
            )))
        }
        None => (),
    }

    match lookup(&table, &["static", "public_prefix"]) {
        Some(Value::String(path)) => config.stat.public_prefix = PathBuf::from(path),
        Some(val) => {
            return Err(Error::Validation(format!(
                "Expected the public prefix to be a string, got a {}",
                val.type_str()
            )))
        }
        None => (),
    }

    match lookup(&table, &["fastcgi", "enabled"]) {
        Some(&Value::Boolean(on)) => config.fcgi.enabled = on,
        Some(val) => {
            return Err(Error::Validation(format!(
                "Expected the FastCGI switch to be a boolean, got a {}",
                val.type_str()
            )))
        }
        None => (),
    }

    match lookup(&table, &["fastcgi", "port"]) {
        Some(&Value::Integer(p)) if p <= u16::MAX as i64 && p > 0 => config.fcgi.port = p as u16,
        Some(&Value::Integer(p)) => {
            return Err(Error::Validation(format!(
                "The FastCGI port {} is out of range",
                p
            )))
        }
        Some(val) => {
            return Err(Error::Validation(format!(
                "Expected the FastCGI port to be an integer, got a {}",
                val.type_str()
            )))
        }
        None => (),
    }

    Ok(config)
}

/// Walks nested tables down a key path
fn lookup<'v>(table: &'v Value, path: &[&str]) -> Option<&'v Value> {
    let mut current = table;
    for key in path {
        current = current.get(key)?;
    }
    Some(current)
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Parse(toml::de::Error),
    Validation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "could not read the configuration file: {}", e),
            Error::Parse(e) => write!(f, "{}", e),
            Error::Validation(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Error {
        Error::Parse(e)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(text: &str) -> Result<Config, Error> {
        let table: Table = text.parse()?;
        config_from_table(table)
    }

    #[test]
    fn empty_input_yields_the_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.fcgi.port, 9000);
        assert!(!config.fcgi.enabled);
    }

    #[test]
    fn a_full_configuration_parses() {
        let config = parse(
            r#"
            [listen]
            port = 8080

            [static]
            webroot = "/srv/site"
            public_prefix = "/public"

            [fastcgi]
            enabled = true
            port = 9900
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.stat.webroot, PathBuf::from("/srv/site"));
        assert_eq!(config.stat.public_prefix, PathBuf::from("/public"));
        assert!(config.fcgi.enabled);
        assert_eq!(config.fcgi.port, 9900);
    }

    #[test]
    fn out_of_range_ports_are_rejected() {
        assert!(matches!(
            parse("[listen]\nport = 0"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            parse("[listen]\nport = 70000"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            parse("[fastcgi]\nport = -1"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn wrongly_typed_values_are_rejected() {
        assert!(matches!(
            parse("[static]\nwebroot = 12"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            parse("[fastcgi]\nenabled = \"yes\""),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(parse("[listen\nport = 1"), Err(Error::Parse(_))));
    }
}
