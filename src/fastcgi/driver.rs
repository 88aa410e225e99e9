//! The FastCGI transport
//!
//! Listens for connections from a web server (nginx and friends), feeds
//! inbound bytes through the record decoder, assembles complete requests
//! from BeginRequest/Params/Stdin streams, and frames handler output back
//! out as Stdout records capped with an EndRequest.

use crate::errors::{Error, Result};
use crate::fastcgi::parser::{record, ParseError};
use crate::fastcgi::{protocol_status, serializer, BeginRequest, Content, Param, Record};
use crate::filesystem::normalize_path;
use crate::headers::Headers;
use crate::server::{error_messages, split_target, Handler, Request, Response};

use log::{debug, info, warn};

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

/// Binds the given port and serves FastCGI until the listener dies.
///
/// One thread per accepted connection; the decoder is a pure computation
/// over that connection's bytes, so connections never share state.
pub fn serve(port: u16, handler: Arc<dyn Handler>) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!("FastCGI transport listening on port {}", port);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let handler = Arc::clone(&handler);
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, handler.as_ref()) {
                        warn!("FastCGI connection ended with an error: {:?}", e);
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

/// The write half of a connection.
///
/// `split` hands out an independent writer over the same stream, so a
/// `Response` can own its writer while control records keep going out
/// through the original.
trait ConnectionWriter: Write {
    fn split(&self) -> io::Result<Box<dyn Write + Send>>;
}

impl ConnectionWriter for TcpStream {
    fn split(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.try_clone()?))
    }
}

/// What a processed record means for the connection's control flow
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    RequestDone { keepalive: bool },
}

/// A request part-way through arriving: records seen so far for the
/// active request id
struct RequestAssembly {
    id: u16,
    keepalive: bool,
    params: Vec<Param>,
    params_done: bool,
    stdin: Vec<u8>,
}

impl RequestAssembly {
    fn new(id: u16, begin: &BeginRequest) -> RequestAssembly {
        RequestAssembly {
            id,
            keepalive: begin.keepalive(),
            params: Vec::new(),
            params_done: false,
            stdin: Vec::new(),
        }
    }
}

/// Reads records off one connection until it closes or a request without
/// keepalive completes.
///
/// Bytes accumulate in `pending`; the decoder hands back whatever it did
/// not consume, and `BufferExhausted` just means the next read has to
/// arrive before the record at the front is whole.
fn handle_connection(stream: TcpStream, handler: &dyn Handler) -> Result<()> {
    let mut reader = stream.try_clone()?;
    let remote_addr = stream.peer_addr().ok();
    let mut out = stream;

    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut active: Option<RequestAssembly> = None;

    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            // EOF between records and requests is a normal hangup;
            // anywhere else the web server quit on us mid-stream
            if pending.is_empty() && active.is_none() {
                return Ok(());
            }
            return Err(Error::RequestIncomplete);
        }
        pending.extend_from_slice(&chunk[..read]);

        while !pending.is_empty() {
            let (decoded, leftover) = match record(&pending) {
                Ok(done) => done,
                Err(ParseError::BufferExhausted) => break,
                Err(e) => {
                    warn!("Undecodable record from the web server: {:?}", e);
                    return Err(Error::from(e));
                }
            };
            pending = leftover;

            match process_record(&mut out, remote_addr, &mut active, decoded, handler)? {
                Flow::Continue => (),
                Flow::RequestDone { keepalive: true } => (),
                Flow::RequestDone { keepalive: false } => return Ok(()),
            }
        }
    }
}

fn process_record<W: ConnectionWriter>(
    out: &mut W,
    remote_addr: Option<SocketAddr>,
    active: &mut Option<RequestAssembly>,
    decoded: Record,
    handler: &dyn Handler,
) -> Result<Flow> {
    let Record {
        request_id,
        content,
        ..
    } = decoded;

    match content {
        Content::BeginRequest(begin) => begin_request(out, active, request_id, &begin),

        Content::Params(params) => {
            let assembly = matching_assembly(active, request_id)?;
            if params.is_empty() {
                // zero-length Params record terminates the stream
                assembly.params_done = true;
            } else {
                assembly.params.extend(params);
            }
            Ok(Flow::Continue)
        }

        Content::Stdin(data) => {
            if !data.is_empty() {
                let assembly = matching_assembly(active, request_id)?;
                assembly.stdin.extend_from_slice(&data);
                return Ok(Flow::Continue);
            }

            // zero-length Stdin record: the request is fully assembled
            let assembly = take_assembly(active, request_id)?;
            if !assembly.params_done {
                warn!(
                    "Stdin stream closed before the Params stream for request {}",
                    assembly.id
                );
                return Err(Error::FastCgiProtocolViolation);
            }

            let keepalive = assembly.keepalive;
            dispatch(out, remote_addr, assembly, handler)?;
            Ok(Flow::RequestDone { keepalive })
        }

        // response-direction records have no business arriving here
        Content::Stdout(_) | Content::EndRequest(_) => {
            warn!(
                "Response-direction record for request {} on a responder connection",
                request_id
            );
            Err(Error::FastCgiProtocolViolation)
        }
    }
}

fn begin_request<W: ConnectionWriter>(
    out: &mut W,
    active: &mut Option<RequestAssembly>,
    request_id: u16,
    begin: &BeginRequest,
) -> Result<Flow> {
    if let Some(current) = active.as_ref() {
        if current.id == request_id {
            warn!("Duplicate BeginRequest for request {}", request_id);
            return Err(Error::FastCgiProtocolViolation);
        }

        // one request stream per connection: decline the attempt to
        // multiplex rather than tearing the connection down
        info!(
            "Declining request {}: request {} is still in flight",
            request_id, current.id
        );
        serializer::end_request(&mut *out, request_id, 0, protocol_status::CANT_MPX_CONN)?;
        return Ok(Flow::Continue);
    }

    *active = Some(RequestAssembly::new(request_id, begin));
    Ok(Flow::Continue)
}

fn matching_assembly<'a>(
    active: &'a mut Option<RequestAssembly>,
    request_id: u16,
) -> Result<&'a mut RequestAssembly> {
    match active.as_mut() {
        Some(assembly) if assembly.id == request_id => Ok(assembly),
        Some(assembly) => {
            warn!(
                "Record for request {} while request {} is active",
                request_id, assembly.id
            );
            Err(Error::FastCgiProtocolViolation)
        }
        None => {
            warn!("Record for request {} with no request begun", request_id);
            Err(Error::FastCgiProtocolViolation)
        }
    }
}

fn take_assembly(
    active: &mut Option<RequestAssembly>,
    request_id: u16,
) -> Result<RequestAssembly> {
    matching_assembly(active, request_id)?;
    active.take().ok_or(Error::FastCgiProtocolViolation)
}

/// Runs the handler for a fully-assembled request and closes the request
/// out on the wire
fn dispatch<W: ConnectionWriter>(
    out: &mut W,
    remote_addr: Option<SocketAddr>,
    assembly: RequestAssembly,
    handler: &dyn Handler,
) -> Result<()> {
    let id = assembly.id;

    let writer = StdoutWriter {
        sink: out.split()?,
        request_id: id,
    };
    let response = Response::cgi(Box::new(writer));

    match build_request(assembly.params, assembly.stdin, remote_addr) {
        Ok(request) => handler.serve(request, response),
        Err(e) => {
            debug!("Unusable parameter set for request {}: {:?}", id, e);
            error_messages::error_400(response)?;
        }
    }

    // the handler's Response has flushed by now; close the stdout
    // stream, then the request
    serializer::stdout(&mut *out, id, &[])?;
    serializer::end_request(&mut *out, id, 0, protocol_status::REQUEST_COMPLETE)?;

    Ok(())
}

/// Frames everything written through it into Stdout records for one
/// request
struct StdoutWriter {
    sink: Box<dyn Write + Send>,
    request_id: u16,
}

impl Write for StdoutWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // an empty write must not emit the zero-length record that would
        // close the stream
        if buf.is_empty() {
            return Ok(0);
        }

        match serializer::stdout(&mut self.sink, self.request_id, buf) {
            Ok(()) => Ok(buf.len()),
            Err(Error::Io(e)) => Err(e),
            Err(other) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{:?}", other),
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// Builds a transport-neutral `Request` from the parameter block and body
/// the web server sent.
///
/// Request metadata travels as CGI metavariables: the method, target and
/// query arrive in `REQUEST_METHOD`/`REQUEST_URI`/`QUERY_STRING`, and
/// client headers arrive mangled into `HTTP_*` parameters.
fn build_request(
    params: Vec<Param>,
    body: Vec<u8>,
    remote_addr: Option<SocketAddr>,
) -> Result<Request> {
    let mut method = None;
    let mut request_uri = None;
    let mut path_info = None;
    let mut query = None;
    let mut headers = Headers::new();

    for param in &params {
        match param.name.as_str() {
            "REQUEST_METHOD" => method = Some(param.value.clone()),
            "REQUEST_URI" => request_uri = Some(param.value.clone()),
            "PATH_INFO" => path_info = Some(param.value.clone()),
            "QUERY_STRING" if !param.value.is_empty() => query = Some(param.value.clone()),
            "CONTENT_TYPE" if !param.value.is_empty() => {
                headers.set("Content-Type", &param.value)
            }
            "CONTENT_LENGTH" if !param.value.is_empty() => {
                headers.set("Content-Length", &param.value)
            }
            name if name.starts_with("HTTP_") => {
                headers.append(&header_name_from_param(name), &param.value)
            }
            _ => (),
        }
    }

    // a request without a method is not a request
    let method = method.ok_or(Error::FastCgiProtocolViolation)?;

    let target = request_uri
        .or(path_info)
        .unwrap_or_else(|| String::from("/"));
    let (path, embedded_query) = split_target(&target);
    let query = query.unwrap_or_else(|| String::from(embedded_query));
    let path = normalize_path(path.as_bytes())?;

    Ok(Request::new(method, path, query, headers, body, remote_addr))
}

/// Undoes the CGI header-name mangling: `HTTP_ACCEPT_ENCODING` becomes
/// `Accept-Encoding`
fn header_name_from_param(name: &str) -> String {
    let mut unmangle = String::with_capacity(name.len());
    let mut start_of_word = true;

    for ch in name["HTTP_".len()..].chars() {
        if ch == '_' {
            unmangle.push('-');
            start_of_word = true;
        } else if start_of_word {
            unmangle.push(ch.to_ascii_uppercase());
            start_of_word = false;
        } else {
            unmangle.push(ch.to_ascii_lowercase());
        }
    }

    unmangle
}
