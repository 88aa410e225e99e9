//! Server functionality shared by both transports
//!
//! `Handler`, `Request` and `Response` are transport-neutral: the HTTP
//! accept loop in this module and the FastCGI driver both produce a
//! `Request`, hand it to a `Handler`, and stream the `Response` back out
//! through whatever framing their wire needs.

pub mod router;
pub mod static_files;

pub use self::router::Router;
pub use self::static_files::Statics;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::filesystem::normalize_path;
use crate::headers::Headers;
use crate::log_util::ascii_escape;

use log::{info, warn};

use std::ffi::OsStr;
use std::io::{self, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Requests larger than this are refused outright
const MAX_REQUEST_HEAD: usize = 64 * 1024;

/// How long a read or write on a client socket may stall
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Staging buffer size for responses; short responses leave in one write
const RESPONSE_BUFFER_SIZE: usize = 2000;

/// Values which can handle requests.
///
/// Handlers are shared across per-connection threads, hence the bounds.
pub trait Handler: Send + Sync {
    fn serve(&self, req: Request, res: Response);
}

impl<F> Handler for F
where
    F: Fn(Request, Response) + Send + Sync,
{
    fn serve(&self, req: Request, res: Response) {
        self(req, res)
    }
}

/// Binds the configured port and serves HTTP until the listener dies.
///
/// Each accepted connection gets its own thread and carries one request;
/// responses close the connection.
pub fn serve(config: &Config, handler: Arc<dyn Handler>) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    info!("HTTP transport listening on port {}", config.port);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let handler = Arc::clone(&handler);
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, handler.as_ref()) {
                        warn!("Error serving an HTTP connection: {:?}", e);
                    }
                });
            }
            Err(e) => {
                warn!("Failed connection: {}", e);
            }
        }
    }

    Ok(())
}

fn handle_client(stream: TcpStream, handler: &dyn Handler) -> Result<()> {
    stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;

    let remote_addr = stream.peer_addr().ok();
    let mut read_half = stream.try_clone()?;

    match read_request(&mut read_half, remote_addr) {
        Ok(request) => {
            let response = Response::http(Box::new(BufWriter::new(stream)));
            handler.serve(request, response);
            Ok(())
        }
        Err(e @ Error::Parse(_))
        | Err(e @ Error::PathNotInOriginForm)
        | Err(e @ Error::IllegalPercentEncoding)
        | Err(e @ Error::RequestLineTooLong) => {
            error_messages::error_400(Response::http(Box::new(BufWriter::new(stream))))?;
            Err(e)
        }
        Err(e) => Err(e),
    }
}

/// An incoming request from a client, whichever transport it arrived on
#[derive(Debug)]
pub struct Request {
    method: String,
    /// Normalized path, relative to the server root (no leading slash)
    path: Vec<u8>,
    /// Raw query string, possibly empty
    query: String,
    headers: Headers,
    body: Vec<u8>,
    pub remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new(
        method: String,
        path: Vec<u8>,
        query: String,
        headers: Headers,
        body: Vec<u8>,
        remote_addr: Option<SocketAddr>,
    ) -> Request {
        Request {
            method,
            path,
            query,
            headers,
            body,
            remote_addr,
        }
    }

    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The normalized request path as an `OsStr` ready for joining onto a
    /// filesystem root
    pub fn request_uri(&self) -> &OsStr {
        OsStr::from_bytes(&self.path)
    }

    #[inline]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Reads one HTTP request off the stream: request line and headers via
/// httparse over a growing buffer, then a Content-Length body.
fn read_request(stream: &mut TcpStream, remote_addr: Option<SocketAddr>) -> Result<Request> {
    let mut buffer = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            return Err(Error::RequestIncomplete);
        }
        buffer.extend_from_slice(&chunk[..read]);

        if buffer.len() > MAX_REQUEST_HEAD {
            return Err(Error::RequestLineTooLong);
        }

        let mut header_storage = [httparse::EMPTY_HEADER; 100];
        let mut parsed = httparse::Request::new(&mut header_storage);

        if let httparse::Status::Complete(head_length) = parsed.parse(&buffer)? {
            let mut headers = Headers::new();
            for header in parsed.headers.iter() {
                headers.append(header.name, &String::from_utf8_lossy(header.value));
            }

            // `method` and `path` are always present once parse says
            // Complete
            let method = String::from(parsed.method.unwrap());
            let target = String::from(parsed.path.unwrap());
            let (path, query) = split_target(&target);
            let path = normalize_path(path.as_bytes())?;

            let body = read_body(stream, &headers, &buffer[head_length..])?;

            return Ok(Request::new(
                method,
                path,
                String::from(query),
                headers,
                body,
                remote_addr,
            ));
        }

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Partial request head after {} bytes: \"{}\"",
                buffer.len(),
                ascii_escape(&buffer[..buffer.len().min(80)])
            );
        }
    }
}

/// Splits a request target into path and query at the first `'?'`
pub(crate) fn split_target(target: &str) -> (&str, &str) {
    match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    }
}

/// Drains the request body: whatever spilled past the head in `prefix`,
/// then the rest of the declared Content-Length from the stream.
fn read_body(stream: &mut TcpStream, headers: &Headers, prefix: &[u8]) -> Result<Vec<u8>> {
    let content_length = headers
        .get_first("Content-Length")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = Vec::from(&prefix[..prefix.len().min(content_length)]);
    let mut chunk = [0u8; 4096];

    while body.len() < content_length {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            return Err(Error::RequestIncomplete);
        }
        let wanted = (content_length - body.len()).min(read);
        body.extend_from_slice(&chunk[..wanted]);
    }

    Ok(body)
}

/// How the status line is spelled on the wire.
///
/// The HTTP transport talks `HTTP/1.1 200 OK`; a FastCGI responder hands
/// the web server a CGI document whose status travels in a `Status:`
/// header line instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusLineStyle {
    Http,
    Cgi,
}

/// The response being constructed by a `Handler`.
///
/// Writes are staged in a small buffer; the status line and headers are
/// flushed lazily on the first write (or at drop), and the status can no
/// longer change once that has happened. Dropping the response flushes
/// whatever is pending, so a handler that just sets headers and returns
/// still produces a well-formed reply.
pub struct Response {
    writer: Box<dyn Write + Send>,
    buffer: Vec<u8>,
    status_code: u16,
    reason: String,
    headers: Headers,
    style: StatusLineStyle,
    start_flushed: bool,
}

impl Response {
    /// A response whose status line is an HTTP/1.1 one
    pub fn http(writer: Box<dyn Write + Send>) -> Response {
        Response::with_style(writer, StatusLineStyle::Http)
    }

    /// A response in CGI document form, for the FastCGI transport
    pub fn cgi(writer: Box<dyn Write + Send>) -> Response {
        Response::with_style(writer, StatusLineStyle::Cgi)
    }

    fn with_style(writer: Box<dyn Write + Send>, style: StatusLineStyle) -> Response {
        Response {
            writer,
            buffer: Vec::with_capacity(RESPONSE_BUFFER_SIZE),
            status_code: 200,
            reason: String::from("OK"),
            headers: Headers::new(),
            style,
            start_flushed: false,
        }
    }

    /// Sets the status. Ignored once the status line has been flushed.
    pub fn set_status(&mut self, code: u16, reason: &str) {
        if self.start_flushed {
            return;
        }
        self.status_code = code;
        self.reason = String::from(reason);
    }

    pub fn status(&self) -> u16 {
        self.status_code
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Writes body bytes, flushing the status line and headers first if
    /// they haven't gone out yet
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.flush_start()?;
        self.buffered_write(data)
    }

    /// Sends everything written so far and ends the response
    pub fn end(mut self) -> io::Result<()> {
        self.finish()
    }

    /// Streams a reader out as the whole response body
    pub fn of_stream<R: Read>(mut self, mut stream: R) -> io::Result<()> {
        self.flush_start()?;
        self.flush_buffer()?;
        io::copy(&mut stream, &mut self.writer)?;
        self.writer.flush()
    }

    fn finish(&mut self) -> io::Result<()> {
        self.flush_start()?;
        self.flush_buffer()?;
        self.writer.flush()
    }

    /// Writes the status line and headers, once
    fn flush_start(&mut self) -> io::Result<()> {
        if self.start_flushed {
            return Ok(());
        }
        // mark first: a failed half-written head must not be retried
        self.start_flushed = true;

        let mut head = String::new();
        match self.style {
            StatusLineStyle::Http => {
                head.push_str(&format!(
                    "HTTP/1.1 {} {}\r\n",
                    self.status_code, self.reason
                ));
            }
            StatusLineStyle::Cgi => {
                head.push_str(&format!("Status: {} {}\r\n", self.status_code, self.reason));
            }
        }

        for (name, values) in &self.headers {
            for value in values {
                head.push_str(name);
                head.push_str(": ");
                head.push_str(value);
                head.push_str("\r\n");
            }
        }

        if self.style == StatusLineStyle::Http && !self.headers.contains("Connection") {
            head.push_str("Connection: close\r\n");
        }

        head.push_str("\r\n");
        self.buffered_write(head.as_bytes())
    }

    /// Stages `data`, spilling to the writer when the buffer would
    /// overflow; oversized writes bypass the buffer entirely
    fn buffered_write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.buffer.len() + data.len() > RESPONSE_BUFFER_SIZE && !self.buffer.is_empty() {
            self.flush_buffer()?;
        }

        if data.len() > RESPONSE_BUFFER_SIZE {
            self.writer.write_all(data)
        } else {
            self.buffer.extend_from_slice(data);
            Ok(())
        }
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            self.writer.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

impl Write for Response {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Response::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_start()?;
        self.flush_buffer()?;
        self.writer.flush()
    }
}

pub mod error_messages {
    use super::Response;

    use std::io;

    fn canned(mut res: Response, code: u16, reason: &str, body: &[u8]) -> io::Result<()> {
        res.set_status(code, reason);
        {
            let headers = res.headers_mut();
            headers.set("Content-Type", "text/html");
            headers.set("Content-Length", &body.len().to_string());
        }
        res.write(body)?;
        res.end()
    }

    pub fn error_400(res: Response) -> io::Result<()> {
        canned(res, 400, "Bad Request", ERROR_400)
    }

    pub fn error_403(res: Response) -> io::Result<()> {
        canned(res, 403, "Forbidden", ERROR_403)
    }

    pub fn error_404(res: Response) -> io::Result<()> {
        canned(res, 404, "Not Found", ERROR_404)
    }

    pub fn error_405(res: Response) -> io::Result<()> {
        canned(res, 405, "Method Not Allowed", ERROR_405)
    }

    pub fn error_500(res: Response) -> io::Result<()> {
        canned(res, 500, "Internal Error", ERROR_500)
    }

    const ERROR_400: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Bad Request</h1><p>Your request had some kind of bad syntax.</p></body></html>";

    const ERROR_403: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Forbidden</h1><p>You don't have permission to view that file. Sorry.</p></body></html>";

    const ERROR_404: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Not Found</h1><p>I couldn't find that file. Sorry.</p></body></html>";

    const ERROR_405: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Method Not Allowed</h1><p>That method doesn't work on this resource.</p></body></html>";

    const ERROR_500: &[u8] = b"<!doctype html><html><head><title>Error</title></head><body><h1>Internal Error</h1><p>Something went wrong on my side. There's nothing you can do; maybe come back later.</p></body></html>";
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Mutex;

    /// A writer the test can look inside after the Response is gone
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn split_target_divides_at_first_question_mark() {
        assert_eq!(split_target("/a/b?x=1"), ("/a/b", "x=1"));
        assert_eq!(split_target("/a/b?x=1?y=2"), ("/a/b", "x=1?y=2"));
        assert_eq!(split_target("/plain"), ("/plain", ""));
    }

    #[test]
    fn http_response_head_and_body() {
        let sink = SharedBuffer::default();
        let mut res = Response::http(Box::new(sink.clone()));
        res.set_status(404, "Not Found");
        res.headers_mut().set("Content-Type", "text/plain");
        res.write(b"nope").unwrap();
        res.end().unwrap();

        let output = String::from_utf8(sink.contents()).unwrap();
        assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(output.contains("Content-Type: text/plain\r\n"));
        assert!(output.contains("Connection: close\r\n"));
        assert!(output.ends_with("\r\n\r\nnope"));
    }

    #[test]
    fn cgi_response_uses_status_header_line() {
        let sink = SharedBuffer::default();
        let mut res = Response::cgi(Box::new(sink.clone()));
        res.write(b"hi").unwrap();
        res.end().unwrap();

        let output = String::from_utf8(sink.contents()).unwrap();
        assert!(output.starts_with("Status: 200 OK\r\n"));
        assert!(!output.contains("Connection:"));
        assert!(output.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn status_is_frozen_after_first_write() {
        let sink = SharedBuffer::default();
        let mut res = Response::http(Box::new(sink.clone()));
        res.write(b"body").unwrap();
        res.set_status(500, "Too Late");
        res.end().unwrap();

        let output = String::from_utf8(sink.contents()).unwrap();
        assert!(output.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn dropping_a_response_still_flushes_the_head() {
        let sink = SharedBuffer::default();
        {
            let mut res = Response::http(Box::new(sink.clone()));
            res.headers_mut().set("Content-Length", "0");
            // dropped without an explicit end()
        }

        let output = String::from_utf8(sink.contents()).unwrap();
        assert!(output.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(output.ends_with("\r\n\r\n"));
    }

    #[test]
    fn large_bodies_bypass_the_staging_buffer() {
        let sink = SharedBuffer::default();
        let big = vec![b'x'; RESPONSE_BUFFER_SIZE * 3];
        let mut res = Response::http(Box::new(sink.clone()));
        res.write(&big).unwrap();
        res.end().unwrap();

        let output = sink.contents();
        assert!(output.len() > RESPONSE_BUFFER_SIZE * 3);
        assert!(output.ends_with(&big[..]));
    }
}
