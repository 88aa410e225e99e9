pub mod parser;

use std::path::PathBuf;

/// A holder for app configuration
#[derive(Debug)]
pub struct Config {
    /// Port number the HTTP transport listens on
    pub port: u16,
    pub stat: StaticFilesConfig,
    pub fcgi: FastCgiConfig,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 8000,
            stat: Default::default(),
            fcgi: Default::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaticFilesConfig {
    /// Where the files are located on disk
    pub webroot: PathBuf,
    /// Public URI prefix that gets mapped onto `webroot`
    pub public_prefix: PathBuf,
}

impl Default for StaticFilesConfig {
    fn default() -> StaticFilesConfig {
        StaticFilesConfig {
            webroot: PathBuf::from("/etc/portico/site"),
            public_prefix: PathBuf::from("/html"),
        }
    }
}

#[derive(Debug)]
pub struct FastCgiConfig {
    /// Whether to accept FastCGI connections at all
    pub enabled: bool,
    /// Port number the FastCGI transport listens on
    pub port: u16,
}

impl Default for FastCgiConfig {
    fn default() -> FastCgiConfig {
        FastCgiConfig {
            enabled: false,
            port: 9000,
        }
    }
}
