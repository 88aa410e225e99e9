//! A basic static-files web server speaking HTTP and FastCGI.
//!
//! Call it like this:
//!
//!     portico -f config.toml
//!
//! The config file is in the [TOML format][toml] because it’s commonly used
//! in the Rust ecosystem. Here is an example:
//!
//! ```toml
//! [listen]
//! port = 8000
//!
//! [static]
//! webroot = "/etc/portico/site"
//! public_prefix = "/html"
//!
//! [fastcgi]
//! enabled = false
//! port = 9000
//! ```
//!
//! This example also serves as the defaults if no config file is provided,
//! or any given key is not present. If a key is of the wrong type, the
//! server will bail, so don’t do that.
//!
//! `portico` will listen for connections from any IP address. With
//! `fastcgi.enabled` it also accepts requests forwarded by a front-end web
//! server over FastCGI on `fastcgi.port`, serving the same routes.
//!
//! [toml]: https://github.com/toml-lang/toml

use portico::config::parser::{self, parse_file};
use portico::fastcgi::driver;
use portico::server::{serve, Handler, Router, Statics};

use clap::{Arg, Command};
use log::{error, info, warn, LevelFilter};

use std::env;
use std::io::{stderr, Write};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::thread;

fn main() {
    let mut log_builder = env_logger::Builder::new();
    log_builder.filter(None, LevelFilter::Info);

    if let Ok(var) = env::var("SERVER_LOG") {
        log_builder.parse_filters(&var);
    }

    match log_builder.try_init() {
        Ok(()) => (),
        Err(e) => {
            let _ = writeln!(stderr(), "portico: Error when initializing logging: {}", e);
            exit(1);
        }
    };

    let matches = Command::new("portico")
        .version("0.1")
        .arg(
            Arg::new("config_file")
                .short('f')
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("The TOML file with server configuration"),
        )
        .get_matches();

    let default_config = PathBuf::from("/etc/portico/config.toml");
    let config_file = matches
        .get_one::<PathBuf>("config_file")
        .unwrap_or(&default_config);

    let mut config = match parse_file(config_file) {
        Ok(c) => c,
        Err(parser::Error::Io(e)) => {
            error!("Error opening config file {:?}: {}", config_file, e);
            exit(1);
        }
        Err(parser::Error::Parse(e)) => {
            error!("Error parsing config file {:?}: {}", config_file, e);
            exit(1);
        }
        Err(parser::Error::Validation(message)) => {
            error!("Error in config file: {}", message);
            exit(1);
        }
    };

    // the webroot has to be canonical for the escape check on each
    // requested path to hold
    config.stat.webroot = match config.stat.webroot.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            error!("Unusable webroot {:?}: {}", config.stat.webroot, e);
            exit(1);
        }
    };

    let mut router = Router::new();
    router.route_any(config.stat.public_prefix.clone(), Statics::new(config.stat.clone()));
    let handler: Arc<dyn Handler> = Arc::new(router);

    if config.fcgi.enabled {
        let fcgi_handler = Arc::clone(&handler);
        let fcgi_port = config.fcgi.port;
        thread::spawn(move || {
            if let Err(e) = driver::serve(fcgi_port, fcgi_handler) {
                warn!("The FastCGI transport died: {:?}", e);
            }
        });
    }

    info!("Starting server on port {}", config.port);
    if serve(&config, handler).is_err() {
        exit(1);
    }
}
