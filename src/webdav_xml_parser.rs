use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::reader::Reader;
use std::str;
use tracing::warn;

use crate::errors::{Result, SyncError};
use crate::models::RemoteFileInfo;
use crate::webdav::paths;

#[derive(Debug, Default)]
struct PropfindAccumulator {
    href: String,
    displayname: String,
    content_length: Option<i64>,
    last_modified: Option<String>,
    content_type: Option<String>,
    is_collection: bool,
}

/// Parses a multistatus document into resource records.
///
/// Folder entries are retained (the shell enumerates remote directories
/// with them); the snapshot collector drops them. A response missing its
/// href or last-modified property is logged and skipped, and a
/// syntactically broken fragment costs only the response it sits in:
/// parsing resumes at the next event. The error return is reserved for a
/// reader that can make no progress at all.
pub fn parse_propfind_response(xml_text: &str) -> Result<Vec<RemoteFileInfo>> {
    let mut reader = Reader::from_str(xml_text);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<PropfindAccumulator> = None;
    let mut current_element = String::new();
    let mut in_response = false;
    let mut in_propstat = false;
    let mut in_resourcetype = false;
    let mut status_ok = false;

    let mut buf = Vec::new();

    loop {
        let position = reader.buffer_position();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = match local_name(&e) {
                    Ok(name) => name,
                    Err(err) => {
                        warn!("skipping element with unreadable name: {}", err);
                        buf.clear();
                        continue;
                    }
                };
                match name.as_str() {
                    "response" => {
                        in_response = true;
                        current = Some(PropfindAccumulator::default());
                    }
                    "propstat" => in_propstat = true,
                    "resourcetype" => in_resourcetype = true,
                    "collection" if in_resourcetype => {
                        if let Some(ref mut acc) = current {
                            acc.is_collection = true;
                        }
                    }
                    _ => current_element = name,
                }
            }
            Ok(Event::Text(e)) => {
                let text = match e.unescape() {
                    Ok(text) => text.to_string(),
                    Err(err) => {
                        warn!("skipping unreadable text node: {}", err);
                        buf.clear();
                        continue;
                    }
                };
                if !in_response || text.trim().is_empty() {
                    buf.clear();
                    continue;
                }
                if let Some(ref mut acc) = current {
                    match current_element.as_str() {
                        "href" => acc.href = text.trim().to_string(),
                        "displayname" => acc.displayname = text.trim().to_string(),
                        "getcontentlength" => acc.content_length = text.trim().parse().ok(),
                        "getlastmodified" => acc.last_modified = Some(text.trim().to_string()),
                        "getcontenttype" => acc.content_type = Some(text.trim().to_string()),
                        "status" if in_propstat => {
                            if text.contains("200") {
                                status_ok = true;
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = match local_name_of_end(&e) {
                    Ok(name) => name,
                    Err(err) => {
                        warn!("skipping element with unreadable name: {}", err);
                        current_element.clear();
                        buf.clear();
                        continue;
                    }
                };
                match name.as_str() {
                    "response" => {
                        if let Some(acc) = current.take() {
                            if status_ok {
                                if let Some(record) = finish_record(acc) {
                                    records.push(record);
                                }
                            }
                        }
                        in_response = false;
                        status_ok = false;
                    }
                    "propstat" => in_propstat = false,
                    "resourcetype" => in_resourcetype = false,
                    _ => {}
                }
                current_element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                // A broken fragment costs only the response in flight;
                // the rest of the document still yields records.
                warn!("skipping malformed multistatus fragment: {}", e);
                current = None;
                in_response = false;
                in_propstat = false;
                in_resourcetype = false;
                status_ok = false;
                current_element.clear();
                if reader.buffer_position() == position {
                    return Err(SyncError::DavXmlMalformed(e.to_string()));
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

fn finish_record(acc: PropfindAccumulator) -> Option<RemoteFileInfo> {
    if acc.href.is_empty() {
        warn!("skipping multistatus response without an href");
        return None;
    }
    let last_modified = match acc.last_modified.as_deref().and_then(parse_http_date) {
        Some(dt) => dt,
        None => {
            warn!(
                "skipping '{}': missing or unparseable getlastmodified ({:?})",
                acc.href, acc.last_modified
            );
            return None;
        }
    };

    Some(RemoteFileInfo {
        relative_path: paths::href_to_relative(&acc.href),
        remote_url: acc.href,
        display_name: acc.displayname,
        is_folder: acc.is_collection,
        content_length: acc.content_length.unwrap_or(0),
        content_type: acc.content_type.unwrap_or_default(),
        remote_mtime_ms: last_modified.timestamp_millis(),
    })
}

fn local_name(e: &BytesStart) -> Result<String> {
    let qname = e.name();
    let local = qname.local_name();
    let name = str::from_utf8(local.as_ref())
        .map_err(|e| SyncError::DavXmlMalformed(format!("invalid UTF-8 in element name: {}", e)))?;
    Ok(name.to_string())
}

fn local_name_of_end(e: &BytesEnd) -> Result<String> {
    let qname = e.name();
    let local = qname.local_name();
    let name = str::from_utf8(local.as_ref())
        .map_err(|e| SyncError::DavXmlMalformed(format!("invalid UTF-8 in element name: {}", e)))?;
    Ok(name.to_string())
}

/// WebDAV servers answer RFC 1123 HTTP-dates; a few put RFC 3339 in the
/// same slot.
fn parse_http_date(date_str: &str) -> Option<DateTime<Utc>> {
    if date_str.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(date_str)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            DateTime::parse_from_rfc3339(date_str)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(date_str, "%a, %d %b %Y %H:%M:%S GMT")
                .ok()
                .map(|ndt| DateTime::from_naive_utc_and_offset(ndt, Utc))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_multistatus() {
        let xml = r#"<?xml version="1.0"?>
        <d:multistatus xmlns:d="DAV:">
            <d:response>
                <d:href>/remote.php/dav/files/alice/Docs/a.txt</d:href>
                <d:propstat>
                    <d:prop>
                        <d:displayname>a.txt</d:displayname>
                        <d:getcontentlength>1024</d:getcontentlength>
                        <d:getlastmodified>Tue, 14 Nov 2023 22:13:20 GMT</d:getlastmodified>
                        <d:getcontenttype>text/plain</d:getcontenttype>
                        <d:resourcetype/>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
        </d:multistatus>"#;

        let records = parse_propfind_response(xml).unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.relative_path, "Docs/a.txt");
        assert_eq!(record.display_name, "a.txt");
        assert_eq!(record.content_length, 1024);
        assert_eq!(record.content_type, "text/plain");
        assert_eq!(record.remote_mtime_ms, 1_700_000_000_000);
        assert!(!record.is_folder);
    }

    #[test]
    fn test_folders_are_retained_and_flagged() {
        let xml = r#"<?xml version="1.0"?>
        <d:multistatus xmlns:d="DAV:">
            <d:response>
                <d:href>/remote.php/dav/files/alice/Docs/</d:href>
                <d:propstat>
                    <d:prop>
                        <d:displayname>Docs</d:displayname>
                        <d:getlastmodified>Tue, 14 Nov 2023 22:13:20 GMT</d:getlastmodified>
                        <d:resourcetype><d:collection/></d:resourcetype>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
            <d:response>
                <d:href>/remote.php/dav/files/alice/Docs/b.txt</d:href>
                <d:propstat>
                    <d:prop>
                        <d:getcontentlength>5</d:getcontentlength>
                        <d:getlastmodified>Tue, 14 Nov 2023 22:15:00 GMT</d:getlastmodified>
                        <d:resourcetype/>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
        </d:multistatus>"#;

        let records = parse_propfind_response(xml).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_folder);
        assert_eq!(records[0].relative_path, "Docs");
        assert!(!records[1].is_folder);
    }

    #[test]
    fn test_response_without_lastmodified_is_skipped() {
        let xml = r#"<?xml version="1.0"?>
        <d:multistatus xmlns:d="DAV:">
            <d:response>
                <d:href>/remote.php/dav/files/alice/broken.txt</d:href>
                <d:propstat>
                    <d:prop><d:resourcetype/></d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
            <d:response>
                <d:href>/remote.php/dav/files/alice/ok.txt</d:href>
                <d:propstat>
                    <d:prop>
                        <d:getlastmodified>Tue, 14 Nov 2023 22:13:20 GMT</d:getlastmodified>
                        <d:resourcetype/>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
        </d:multistatus>"#;

        let records = parse_propfind_response(xml).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].relative_path, "ok.txt");
    }

    #[test]
    fn test_percent_encoded_href_is_decoded() {
        let xml = r#"<?xml version="1.0"?>
        <d:multistatus xmlns:d="DAV:">
            <d:response>
                <d:href>/remote.php/dav/files/alice/Docs/hello%20world.txt</d:href>
                <d:propstat>
                    <d:prop>
                        <d:getlastmodified>Tue, 14 Nov 2023 22:13:20 GMT</d:getlastmodified>
                        <d:resourcetype/>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
        </d:multistatus>"#;

        let records = parse_propfind_response(xml).unwrap();
        assert_eq!(records[0].relative_path, "Docs/hello world.txt");
        assert_eq!(
            records[0].remote_url,
            "/remote.php/dav/files/alice/Docs/hello%20world.txt"
        );
    }

    #[test]
    fn test_empty_multistatus() {
        let xml = r#"<?xml version="1.0"?>
        <d:multistatus xmlns:d="DAV:">
        </d:multistatus>"#;
        assert!(parse_propfind_response(xml).unwrap().is_empty());
    }

    #[test]
    fn test_broken_response_is_skipped_but_the_rest_proceeds() {
        // The first response carries a stray end tag; only that response
        // may be lost.
        let xml = r#"<?xml version="1.0"?>
        <d:multistatus xmlns:d="DAV:">
            <d:response>
                <d:href>/remote.php/dav/files/alice/bad.txt</d:href>
                </d:bogus>
            </d:response>
            <d:response>
                <d:href>/remote.php/dav/files/alice/ok.txt</d:href>
                <d:propstat>
                    <d:prop>
                        <d:getlastmodified>Tue, 14 Nov 2023 22:13:20 GMT</d:getlastmodified>
                        <d:resourcetype/>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
        </d:multistatus>"#;

        let records = parse_propfind_response(xml).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].relative_path, "ok.txt");
    }
}
