//! Handlers for static file service

use crate::config::StaticFilesConfig;
use crate::errors::{Error, Result};
use crate::server::error_messages::{error_403, error_404, error_500};
use crate::server::{Handler, Request, Response};

use log::warn;
use mime::Mime;

use std::fs::{canonicalize, File};
use std::io::ErrorKind;
use std::path::Path;

/// A handler serving files from under a webroot
pub struct Statics {
    conf: StaticFilesConfig,
}

impl Statics {
    pub fn new(conf: StaticFilesConfig) -> Statics {
        Statics { conf }
    }

    fn serve_file(&self, req: Request, mut res: Response) -> Result<()> {
        let requested_file = match canonicalize(self.conf.webroot.join(req.request_uri())) {
            Ok(f) => f,
            Err(e) => {
                match e.kind() {
                    ErrorKind::NotFound => error_404(res)?,
                    _ => error_500(res)?,
                }
                return Err(Error::from(e));
            }
        };

        // a canonicalized path outside the webroot means the request
        // escaped via symlinks or dot segments
        if !requested_file.starts_with(&self.conf.webroot) {
            let _ = error_403(res);
            return Err(Error::PermissionDenied);
        }

        let file = match File::open(&requested_file) {
            Ok(f) => f,
            Err(e) => {
                match e.kind() {
                    ErrorKind::NotFound => error_404(res)?,
                    _ => error_500(res)?,
                }
                return Err(Error::from(e));
            }
        };

        let meta = match file.metadata() {
            Ok(m) => m,
            Err(e) => {
                error_500(res)?;
                return Err(Error::from(e));
            }
        };

        if meta.is_dir() {
            error_403(res)?;
            return Err(Error::PermissionDenied);
        }

        let mime = content_type_for(&requested_file);
        res.headers_mut().set("Content-Type", mime.essence_str());
        res.headers_mut()
            .set("Content-Length", &meta.len().to_string());

        Ok(res.of_stream(file)?)
    }
}

/// Guesses a Content-Type from the file extension
fn content_type_for(path: &Path) -> Mime {
    mime_guess::from_path(path).first_or_octet_stream()
}

impl Handler for Statics {
    fn serve(&self, req: Request, res: Response) {
        if let Err(e) = self.serve_file(req, res) {
            warn!("Error serving a file: {:?}", e);
        }
    }
}
