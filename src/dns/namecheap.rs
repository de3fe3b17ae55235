//! Namecheap dynamic DNS client.
//!
//! The update endpoint answers with an `interface-response` XML document whose declaration
//! claims `utf-16` while the body is usually plain UTF-8. [`normalize_encoding`] works out what
//! the bytes really are before anything is parsed.

use crate::error::Error;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "Namecheap";

/// Decode a response body to UTF-8 text and drop its XML declaration.
///
/// A byte order mark wins. Otherwise NUL bytes mean UTF-16 (the side they fall on picks the
/// byte order), and anything else has to be valid UTF-8. The declaration is removed because
/// its `encoding` attribute can't be trusted.
///
/// # Errors
///
/// Returns [`Error::ExternalService`] if the body is not decodable text.
pub fn normalize_encoding(body: &[u8]) -> Result<String, Error> {
    let text = if let Some((encoding, bom_len)) = Encoding::for_bom(body) {
        decode(encoding, &body[bom_len..])?
    } else if let Some(encoding) = sniff_utf16(body) {
        decode(encoding, body)?
    } else {
        std::str::from_utf8(body)
            .map_err(|e| Error::external(SERVICE, format!("response is not valid UTF-8: {e}")))?
            .to_string()
    };
    Ok(strip_declaration(&text).to_string())
}

fn decode(encoding: &'static Encoding, bytes: &[u8]) -> Result<String, Error> {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        return Err(Error::external(
            SERVICE,
            format!("response is not valid {}", encoding.name()),
        ));
    }
    Ok(text.into_owned())
}

fn sniff_utf16(body: &[u8]) -> Option<&'static Encoding> {
    if body.len() < 2 || body.len() % 2 != 0 {
        return None;
    }
    let (even_nuls, odd_nuls) = body
        .chunks_exact(2)
        .fold((0usize, 0usize), |(even, odd), pair| {
            (even + usize::from(pair[0] == 0), odd + usize::from(pair[1] == 0))
        });
    match (even_nuls, odd_nuls) {
        (0, 0) => None,
        (even, odd) if odd >= even => Some(UTF_16LE),
        _ => Some(UTF_16BE),
    }
}

fn strip_declaration(text: &str) -> &str {
    let trimmed = text.trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return &trimmed[end + 2..];
        }
    }
    trimmed
}

/// One `<Error>` (or `<ErrN>`) entry from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseError {
    pub number: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub err_count: u32,
    pub errors: Vec<ResponseError>,
}

impl Response {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.err_count == 0 && self.errors.is_empty()
    }

    /// All errors folded into a single line.
    #[must_use]
    pub fn error_message(&self) -> String {
        if self.errors.is_empty() {
            return format!("Namecheap API errors: {} reported", self.err_count);
        }
        let mut message = "Namecheap API errors:".to_string();
        for err in &self.errors {
            message.push_str(&format!(" [{}] {}", err.number, err.text));
        }
        message
    }
}

fn name_of(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

/// `Error` carries its number as an attribute, `Err1`, `Err2`, ... in the tag.
fn error_number(e: &BytesStart<'_>, name: &str) -> Option<String> {
    if name == "Error" {
        let number = e
            .attributes()
            .filter_map(Result::ok)
            .find(|a| a.key.as_ref() == b"Number")
            .map(|a| String::from_utf8_lossy(&a.value).to_string())
            .unwrap_or_default();
        return Some(number);
    }
    name.strip_prefix("Err")
        .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
}

/// Parse a normalized `interface-response` document.
///
/// # Errors
///
/// Returns [`Error::ExternalService`] for malformed XML or a different root element.
pub fn parse_response(xml: &str) -> Result<Response, Error> {
    let malformed = |e: quick_xml::Error| {
        Error::external(SERVICE, format!("failed to parse XML response: {e}"))
    };

    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut response = Response::default();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<ResponseError> = None;
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(malformed)? {
            Event::Start(e) => {
                let name = name_of(&e);
                if path.is_empty() {
                    saw_root = name == "interface-response";
                }
                if path.last().is_some_and(|parent| parent == "errors") {
                    current = error_number(&e, &name).map(|number| ResponseError {
                        number,
                        text: String::new(),
                    });
                }
                path.push(name);
            }
            Event::Empty(e) => {
                let name = name_of(&e);
                if path.last().is_some_and(|parent| parent == "errors") {
                    if let Some(number) = error_number(&e, &name) {
                        response.errors.push(ResponseError {
                            number,
                            text: String::new(),
                        });
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(malformed)?;
                match path.last().map(String::as_str) {
                    Some("ErrCount") => {
                        response.err_count = text.trim().parse().map_err(|_| {
                            Error::external(SERVICE, format!("invalid ErrCount {text:?}"))
                        })?;
                    }
                    _ => {
                        if let Some(err) = current.as_mut() {
                            err.text.push_str(text.trim());
                        }
                    }
                }
            }
            Event::End(_) => {
                path.pop();
                if path.last().is_some_and(|parent| parent == "errors") {
                    response.errors.extend(current.take());
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(Error::external(
            SERVICE,
            "response is not an interface-response document",
        ));
    }
    Ok(response)
}

/// Pushes host addresses to the Namecheap dynamic DNS endpoint.
#[derive(Debug, Clone)]
pub struct NamecheapClient {
    client: Client,
    endpoint: String,
}

impl NamecheapClient {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the HTTP client can't be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(NamecheapClient {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Point `host` in `domain` at `ip`. `password` is the dynamic DNS password for the domain
    /// and never leaves this function other than in the request itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for missing parameters and [`Error::ExternalService`]
    /// for transport failures, non-200 statuses, undecodable bodies and reported errors.
    pub async fn update(
        &self,
        host: &str,
        domain: &str,
        password: &str,
        ip: IpAddr,
    ) -> Result<(), Error> {
        for (value, field) in [(domain, "Domain"), (host, "Host"), (password, "Password")] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "{field} is required for Namecheap DNS update"
                )));
            }
        }

        info!("updating {host} in {domain} to {ip}");
        let ip = ip.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("host", host),
                ("domain", domain),
                ("password", password),
                ("ip", ip.as_str()),
            ])
            .send()
            .await
            // The URL carries the password.
            .map_err(|e| Error::external(SERVICE, format!("request failed: {}", e.without_url())))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::external(SERVICE, format!("failed to read response: {}", e.without_url())))?;
        if !status.is_success() {
            return Err(Error::external(
                SERVICE,
                format!(
                    "Namecheap API returned status {status}: {}",
                    String::from_utf8_lossy(&body)
                ),
            ));
        }
        if body.is_empty() {
            return Err(Error::external(SERVICE, "empty response from Namecheap API"));
        }

        let xml = normalize_encoding(&body)?;
        debug!("Namecheap response: {xml}");
        let parsed = parse_response(&xml)?;
        if !parsed.is_success() {
            return Err(Error::external(SERVICE, parsed.error_message()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUCCESS: &str = r#"<?xml version="1.0" encoding="utf-16"?>
<interface-response>
  <Command>SETDNSHOST</Command>
  <Language>eng</Language>
  <IP>203.0.113.7</IP>
  <ErrCount>0</ErrCount>
  <errors />
  <ResponseCount>0</ResponseCount>
  <Done>true</Done>
  <debug><![CDATA[]]></debug>
</interface-response>"#;

    fn utf16le_with_bom(text: &str) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
        bytes
    }

    #[test]
    fn utf8_body_declaring_utf16_parses() {
        let xml = normalize_encoding(SUCCESS.as_bytes()).unwrap();
        assert!(!xml.contains("<?xml"));
        let response = parse_response(&xml).unwrap();
        assert!(response.is_success());
    }

    #[test]
    fn utf8_bom_is_dropped() {
        let mut body = vec![0xEF, 0xBB, 0xBF];
        body.extend_from_slice(SUCCESS.as_bytes());
        let response = parse_response(&normalize_encoding(&body).unwrap()).unwrap();
        assert!(response.is_success());
    }

    #[test]
    fn real_utf16_is_transcoded() {
        let xml = normalize_encoding(&utf16le_with_bom(SUCCESS)).unwrap();
        assert!(xml.contains("<ErrCount>0</ErrCount>"));
        assert!(parse_response(&xml).unwrap().is_success());

        // Without a byte order mark.
        let bytes: Vec<u8> = SUCCESS.encode_utf16().flat_map(u16::to_be_bytes).collect();
        let xml = normalize_encoding(&bytes).unwrap();
        assert!(parse_response(&xml).unwrap().is_success());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            normalize_encoding(&[0xC3, 0x28, 0x41]),
            Err(Error::ExternalService { .. })
        ));
        assert!(parse_response("<html>nope</html>").is_err());
    }

    #[test]
    fn errors_are_concatenated() {
        let xml = r#"<interface-response>
  <ErrCount>2</ErrCount>
  <errors>
    <Error Number="316153">Passwords do not match</Error>
    <Error Number="304156">Validation error; invalid ; password</Error>
  </errors>
</interface-response>"#;
        let response = parse_response(xml).unwrap();
        assert!(!response.is_success());
        assert_eq!(
            response.error_message(),
            "Namecheap API errors: [316153] Passwords do not match [304156] Validation error; invalid ; password"
        );
    }

    #[test]
    fn numbered_error_tags() {
        let xml = "<interface-response><ErrCount>1</ErrCount><errors><Err1>Domain name not found</Err1></errors></interface-response>";
        let response = parse_response(xml).unwrap();
        assert_eq!(
            response.errors,
            vec![ResponseError {
                number: "1".to_string(),
                text: "Domain name not found".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn missing_parameters_are_rejected_before_any_request() {
        let client = NamecheapClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let ip = "203.0.113.7".parse().unwrap();
        assert!(matches!(
            client.update("app", "example.com", "", ip).await,
            Err(Error::Validation(msg)) if msg.starts_with("Password")
        ));
        assert!(matches!(
            client.update(" ", "example.com", "pw", ip).await,
            Err(Error::Validation(msg)) if msg.starts_with("Host")
        ));
    }
}
