//! XML bodies and multistatus parsing for WebDAV PROPFIND.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event};

use crate::error::{ProviderError, ProviderResult};

/// DAV namespace
pub const DAV_NS: &str = "DAV:";

/// Properties of one `<d:response>` in a multistatus document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropEntry {
    pub href: String,
    pub last_modified: Option<DateTime<Utc>>,
    /// True if the resource is a collection rather than a file.
    pub is_collection: bool,
}

/// Builds a PROPFIND body asking for the last-modified date and type.
pub fn propfind_file_body() -> ProviderResult<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut propfind = BytesStart::new("d:propfind");
    propfind.push_attribute(("xmlns:d", DAV_NS));
    write(&mut writer, Event::Start(propfind))?;
    write(&mut writer, Event::Start(BytesStart::new("d:prop")))?;
    write(&mut writer, Event::Empty(BytesStart::new("d:getlastmodified")))?;
    write(&mut writer, Event::Empty(BytesStart::new("d:resourcetype")))?;
    write(&mut writer, Event::End(BytesEnd::new("d:prop")))?;
    write(&mut writer, Event::End(BytesEnd::new("d:propfind")))?;

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| ProviderError::internal(format!("PROPFIND body is not UTF-8: {}", e)))
}

/// Parses a multistatus PROPFIND response.
///
/// Unknown elements are ignored; a malformed document yields the entries
/// parsed before the error.
pub fn parse_multistatus(xml: &str) -> Vec<PropEntry> {
    let mut entries = Vec::new();

    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut href: Option<String> = None;
    let mut last_modified: Option<DateTime<Utc>> = None;
    let mut is_collection = false;
    let mut current_element: Option<&'static str> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match local_name(&name) {
                    "response" => {
                        href = None;
                        last_modified = None;
                        is_collection = false;
                    }
                    "href" => current_element = Some("href"),
                    "getlastmodified" => current_element = Some("getlastmodified"),
                    "collection" => is_collection = true,
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if local_name(&name) == "response"
                    && let Some(href) = href.take()
                {
                    entries.push(PropEntry {
                        href,
                        last_modified: last_modified.take(),
                        is_collection,
                    });
                }
                current_element = None;
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current_element {
                    Some("href") => href = Some(text),
                    Some("getlastmodified") => last_modified = parse_http_date(&text),
                    _ => {}
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    entries
}

/// Parses an RFC 1123 HTTP date such as `Sat, 01 Mar 2025 08:30:00 GMT`.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn write(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> ProviderResult<()> {
    writer
        .write_event(event)
        .map_err(|e| ProviderError::internal(format!("failed to write PROPFIND body: {}", e)))
}

/// Strips a namespace prefix (`d:href` -> `href`).
fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn propfind_body_requests_last_modified() {
        let body = propfind_file_body().unwrap();
        assert!(body.starts_with("<d:propfind xmlns:d=\"DAV:\">"));
        assert!(body.contains("<d:getlastmodified/>"));
        assert!(body.contains("<d:resourcetype/>"));
    }

    #[test]
    fn parse_single_file_response() {
        let xml = r#"<?xml version="1.0"?>
            <d:multistatus xmlns:d="DAV:">
              <d:response>
                <d:href>/remote.php/dav/files/me/Journal/wellness-journal-backup.json</d:href>
                <d:propstat>
                  <d:prop>
                    <d:getlastmodified>Sat, 01 Mar 2025 08:30:00 GMT</d:getlastmodified>
                    <d:resourcetype/>
                  </d:prop>
                  <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
              </d:response>
            </d:multistatus>"#;

        let entries = parse_multistatus(xml);
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].href,
            "/remote.php/dav/files/me/Journal/wellness-journal-backup.json"
        );
        assert_eq!(
            entries[0].last_modified,
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap())
        );
        assert!(!entries[0].is_collection);
    }

    #[test]
    fn parse_collection_with_other_prefix() {
        let xml = r#"<D:multistatus xmlns:D="DAV:">
              <D:response>
                <D:href>/dav/journal/</D:href>
                <D:propstat><D:prop>
                  <D:resourcetype><D:collection/></D:resourcetype>
                </D:prop></D:propstat>
              </D:response>
            </D:multistatus>"#;

        let entries = parse_multistatus(xml);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_collection);
        assert_eq!(entries[0].last_modified, None);
    }

    #[test]
    fn http_date_parsing() {
        assert!(parse_http_date("Sat, 01 Mar 2025 08:30:00 GMT").is_some());
        assert!(parse_http_date("yesterday").is_none());
    }
}
