//! A dead-simple router implementation
//!
//! A `Router` matches a request path against installed routes in the order
//! they were added, dispatching to the first prefix that matches.

use crate::server::error_messages::{error_404, error_405};
use crate::server::{Handler, Request, Response};

use log::warn;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct Router {
    routes: Vec<Route>,
}

struct Route {
    prefix: PathBuf,
    handlers: MethodDispatch,
}

enum MethodDispatch {
    Any(Box<dyn Handler>),
    Specific(HashMap<String, Box<dyn Handler>>),
}

impl Router {
    /// Initialize a new, empty router
    pub fn new() -> Router {
        Router { routes: Vec::new() }
    }

    /// Create a route that will invoke the given `handler` for all methods
    pub fn route_any<H: Handler + 'static>(&mut self, prefix: PathBuf, handler: H) {
        self.routes.push(Route {
            prefix,
            handlers: MethodDispatch::Any(Box::new(handler)),
        });
    }

    /// Create a route that will invoke the given `handler`, but only for
    /// the particular `method`
    pub fn route<H: Handler + 'static>(&mut self, prefix: PathBuf, method: String, handler: H) {
        for route in self.routes.iter_mut() {
            if route.prefix == prefix {
                match route.handlers {
                    MethodDispatch::Specific(ref mut map) => {
                        map.insert(method, Box::new(handler));
                    }
                    MethodDispatch::Any(_) => {
                        panic!("Tried to add a universal and method-specific route for the same prefix");
                    }
                }
                return;
            }
        }

        let mut handlers: HashMap<_, Box<dyn Handler>> = HashMap::new();
        handlers.insert(method, Box::new(handler));

        self.routes.push(Route {
            prefix,
            handlers: MethodDispatch::Specific(handlers),
        });
    }

    fn dispatch(&self, req: Request, res: Response) {
        let request_path = Path::new(req.request_uri());

        for route in &self.routes {
            // routes are written with a leading '/'; request paths are
            // normalized without one
            let prefix = route.prefix.strip_prefix("/").unwrap_or(&route.prefix);
            if request_path.starts_with(prefix) {
                route.handlers.serve(req, res);
                return;
            }
        }

        if let Err(e) = error_404(res) {
            warn!("Error sending a 404: {:?}", e);
        }
    }
}

impl Default for Router {
    fn default() -> Router {
        Router::new()
    }
}

impl Handler for Router {
    fn serve(&self, req: Request, res: Response) {
        self.dispatch(req, res)
    }
}

impl Handler for MethodDispatch {
    fn serve(&self, req: Request, res: Response) {
        match *self {
            MethodDispatch::Any(ref handler) => handler.serve(req, res),
            MethodDispatch::Specific(ref map) => {
                if let Some(handler) = map.get(req.method()) {
                    handler.serve(req, res);
                } else if let Err(e) = error_405(res) {
                    warn!("Error sending a 405: {:?}", e);
                }
            }
        }
    }
}
