//! Framing of outbound FastCGI records
//!
//! The responder direction: response bytes leave as Stdout records and the
//! request is closed out with an EndRequest. BeginRequest and Params writers
//! are also here for the client-side and for exercising the parser against
//! real frames.

use crate::errors::{Result, SerializationError};
use crate::fastcgi::{record_kind, Role};

use byteorder::{BigEndian, WriteBytesExt};

use std::io::Write;

/// The most content bytes a single record carries. A multiple of 8 so full
/// records need no padding.
const MAX_CONTENT: usize = 0xfff8;

/// Writes a header from its bits
///
/// If successful, returns the number of bytes of padding the other end of
/// the connection was promised after the content.
fn write_header<W: Write>(output: &mut W, kind: u8, id: u16, content_length: usize) -> Result<u8> {
    if content_length > u16::MAX as usize {
        return Err(SerializationError::TooLong.into());
    }

    // pad content out to an 8-byte boundary
    let padding_length = (8 - content_length % 8) % 8;

    output.write_all(&[1, kind])?;
    output.write_u16::<BigEndian>(id)?;
    output.write_u16::<BigEndian>(content_length as u16)?;
    output.write_u8(padding_length as u8)?;
    output.write_u8(0)?; // reserved byte

    Ok(padding_length as u8)
}

fn write_padding<W: Write>(output: &mut W, padding_length: u8) -> Result<()> {
    const ZEROS: [u8; 8] = [0; 8];
    output.write_all(&ZEROS[..padding_length as usize])?;
    Ok(())
}

/// Writes `content` as one or more `FCGI_STDOUT` records.
///
/// Content larger than a record's 16-bit length field is split across
/// records. Empty content writes the single zero-length record that
/// terminates the stdout stream, so callers must not pass an empty slice
/// until they mean to close the stream.
pub fn stdout<W: Write>(mut output: W, id: u16, content: &[u8]) -> Result<()> {
    if content.is_empty() {
        write_header(&mut output, record_kind::STDOUT, id, 0)?;
        return Ok(());
    }

    for chunk in content.chunks(MAX_CONTENT) {
        let padding = write_header(&mut output, record_kind::STDOUT, id, chunk.len())?;
        output.write_all(chunk)?;
        write_padding(&mut output, padding)?;
    }

    Ok(())
}

/// Writes an `EndRequest` record closing out request `id`
pub fn end_request<W: Write>(mut output: W, id: u16, app_status: u32, protocol_status: u8) -> Result<()> {
    let padding = write_header(&mut output, record_kind::END_REQUEST, id, 8)?;
    output.write_u32::<BigEndian>(app_status)?;
    output.write_u8(protocol_status)?;
    output.write_all(&[0; 3])?; // reserved
    write_padding(&mut output, padding)?;

    Ok(())
}

/// Writes a `BeginRequest` record opening request `id`
pub fn begin_request<W: Write>(mut output: W, id: u16, role: Role, flags: u8) -> Result<()> {
    let padding = write_header(&mut output, record_kind::BEGIN_REQUEST, id, 8)?;
    output.write_u16::<BigEndian>(role.to_protocol_number())?;
    output.write_u8(flags)?;
    output.write_all(&[0; 5])?; // reserved
    write_padding(&mut output, padding)?;

    Ok(())
}

/// Writes a stream of parameters
///
/// This will automatically emit the stream-terminating empty record as well.
pub fn params<W: Write>(mut output: W, id: u16, params: &[(&[u8], &[u8])]) -> Result<()> {
    let content_length = params
        .iter()
        .map(|&(name, value)| encoded_length(name) + encoded_length(value))
        .sum();

    let padding = write_header(&mut output, record_kind::PARAMS, id, content_length)?;
    for &(name, value) in params {
        write_name_value_pair(&mut output, name, value)?;
    }
    write_padding(&mut output, padding)?;

    write_header(&mut output, record_kind::PARAMS, id, 0)?;

    Ok(())
}

/// Computes the number of bytes a name or value will take up on the wire
/// once its length prefix is included
fn encoded_length(field: &[u8]) -> usize {
    let prefix = if field.len() > 127 { 4 } else { 1 };
    field.len() + prefix
}

/// Writes one name/value pair.
///
/// Lengths above 127 use the 4-byte form, whose first byte carries the high
/// bit that tells the decoder which width it is looking at.
fn write_name_value_pair<W: Write>(output: &mut W, name: &[u8], value: &[u8]) -> Result<()> {
    write_field_length(output, name.len())?;
    write_field_length(output, value.len())?;
    output.write_all(name)?;
    output.write_all(value)?;

    Ok(())
}

fn write_field_length<W: Write>(output: &mut W, length: usize) -> Result<()> {
    if length > 127 {
        if length > 0x7fff_ffff {
            return Err(SerializationError::TooLong.into());
        }
        output.write_u32::<BigEndian>(length as u32 | 0x8000_0000)?;
    } else {
        output.write_u8(length as u8)?;
    }

    Ok(())
}
