//! SNI (Server Name Indication) extraction from a TLS ClientHello

use crate::error::{RelayError, Result};
use bytes::Buf;

const CONTENT_TYPE_HANDSHAKE: u8 = 22;
const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const EXTENSION_SERVER_NAME: u16 = 0;
const NAME_TYPE_HOST: u8 = 0;

/// Largest ClientHello record we are willing to buffer
pub const MAX_CLIENT_HELLO: usize = 16 * 1024 + 5;

/// Extract the SNI hostname from the start of a TLS stream.
///
/// Returns `Ok(None)` while `data` holds only a prefix of the ClientHello
/// record, and an error once the bytes cannot be a ClientHello with SNI.
pub fn extract_sni(data: &[u8]) -> Result<Option<String>> {
    if data.len() < 5 {
        return Ok(None);
    }

    let mut header = &data[..5];
    let content_type = header.get_u8();
    let version_major = header.get_u8();
    let _version_minor = header.get_u8();
    let record_length = header.get_u16() as usize;

    if content_type != CONTENT_TYPE_HANDSHAKE {
        return Err(invalid(format!(
            "Not a handshake record: content_type = {content_type}"
        )));
    }
    if version_major != 3 {
        return Err(invalid(format!("Invalid TLS major version {version_major}")));
    }
    if data.len() < 5 + record_length {
        if 5 + record_length > MAX_CLIENT_HELLO {
            return Err(invalid("ClientHello record too large".into()));
        }
        return Ok(None);
    }

    parse_client_hello(&data[5..5 + record_length]).map(Some)
}

fn parse_client_hello(mut record: &[u8]) -> Result<String> {
    need(record, 4, "handshake header")?;
    let handshake_type = record.get_u8();
    let handshake_length = record.get_uint(3) as usize;

    if handshake_type != HANDSHAKE_CLIENT_HELLO {
        return Err(invalid(format!(
            "Not a ClientHello: handshake_type = {handshake_type}"
        )));
    }
    // ClientHellos split across records are not supported
    need(record, handshake_length, "handshake body")?;
    let mut hello = &record[..handshake_length];

    // Client version and random
    skip(&mut hello, 2 + 32, "client random")?;

    need(hello, 1, "session id length")?;
    let session_id_len = hello.get_u8() as usize;
    skip(&mut hello, session_id_len, "session id")?;

    need(hello, 2, "cipher suites length")?;
    let cipher_suites_len = hello.get_u16() as usize;
    skip(&mut hello, cipher_suites_len, "cipher suites")?;

    need(hello, 1, "compression methods length")?;
    let compression_len = hello.get_u8() as usize;
    skip(&mut hello, compression_len, "compression methods")?;

    if hello.remaining() < 2 {
        return Err(invalid("No extensions present".into()));
    }
    let extensions_len = hello.get_u16() as usize;
    need(hello, extensions_len, "extensions")?;
    let mut extensions = &hello[..extensions_len];

    while extensions.remaining() >= 4 {
        let extension_type = extensions.get_u16();
        let extension_len = extensions.get_u16() as usize;
        need(extensions, extension_len, "extension")?;

        if extension_type == EXTENSION_SERVER_NAME {
            return parse_server_name(&extensions[..extension_len]);
        }
        extensions.advance(extension_len);
    }

    Err(invalid("No SNI extension found".into()))
}

fn parse_server_name(mut extension: &[u8]) -> Result<String> {
    need(extension, 2, "server name list length")?;
    let list_len = extension.get_u16() as usize;
    need(extension, list_len, "server name list")?;
    let mut list = &extension[..list_len];

    while list.remaining() >= 3 {
        let name_type = list.get_u8();
        let name_len = list.get_u16() as usize;
        need(list, name_len, "server name")?;

        if name_type == NAME_TYPE_HOST {
            let hostname = std::str::from_utf8(&list[..name_len])
                .map_err(|_| invalid("Invalid UTF-8 in hostname".into()))?;
            if hostname.is_empty() {
                return Err(invalid("Empty hostname".into()));
            }
            return Ok(hostname.to_string());
        }
        list.advance(name_len);
    }

    Err(invalid("No host name in SNI extension".into()))
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(invalid(format!("Truncated {what}")));
    }
    Ok(())
}

fn skip(buf: &mut &[u8], len: usize, what: &str) -> Result<()> {
    need(buf, len, what)?;
    buf.advance(len);
    Ok(())
}

fn invalid(reason: String) -> RelayError {
    RelayError::InvalidSni(reason)
}
