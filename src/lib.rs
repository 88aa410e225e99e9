//! A small web server library speaking HTTP and FastCGI.
//!
//! The library side of things is organized around one trait: a
//! [`Handler`][server::Handler] takes a transport-neutral
//! [`Request`][server::Request] and writes a [`Response`][server::Response].
//! The same handler can sit behind the built-in HTTP listener or behind a
//! front-end web server speaking FastCGI, and never knows the difference.
//!
//! The FastCGI side is built on [`fastcgi::parser`], a standalone decoder
//! for the protocol's record stream, and [`fastcgi::serializer`], its
//! encoding counterpart. Both work on plain byte slices and writers, so
//! they are usable without the server machinery.

pub mod config;
pub mod errors;
pub mod fastcgi;
pub mod filesystem;
pub mod headers;
pub mod log_util;
pub mod server;
