use chrono::{DateTime, Utc};
use urlencoding::encode;

use crate::service::FileView;

pub const MULTISTATUS_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// One `<D:response>` of a PROPFIND multistatus.
#[derive(Debug, Clone)]
pub struct PropEntry {
    pub href: String,
    pub name: String,
    pub is_collection: bool,
    pub content_length: i64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl PropEntry {
    /// Describes `view` located at the decoded DAV path `path`.
    pub fn from_view(path: &str, view: &FileView) -> Self {
        let is_collection = view.file.is_folder();
        Self {
            href: href(path, is_collection),
            name: view.file.name.clone(),
            is_collection,
            content_length: view.size(),
            created: view.file.create_time,
            modified: view.file.update_time.unwrap_or(view.file.create_time),
        }
    }
}

/// Percent-encodes every segment of `path`. Collections end with `/`.
pub fn href(path: &str, is_collection: bool) -> String {
    let mut out = String::from("/");
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| encode(s).into_owned())
        .collect();
    out.push_str(&segments.join("/"));
    if is_collection && !segments.is_empty() {
        out.push('/');
    }
    out
}

/// RFC 1123 date as used by `getlastmodified` and `Last-Modified`.
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

pub fn multistatus(entries: &[PropEntry]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<D:multistatus xmlns:D=\"DAV:\">");
    for entry in entries {
        out.push_str("<D:response>");
        out.push_str(&format!("<D:href>{}</D:href>", escape(&entry.href)));
        out.push_str("<D:propstat><D:prop>");
        out.push_str(&format!(
            "<D:displayname>{}</D:displayname>",
            escape(&entry.name)
        ));
        if entry.is_collection {
            out.push_str("<D:resourcetype><D:collection/></D:resourcetype>");
        } else {
            out.push_str("<D:resourcetype/>");
            out.push_str(&format!(
                "<D:getcontentlength>{}</D:getcontentlength>",
                entry.content_length
            ));
        }
        out.push_str(&format!(
            "<D:creationdate>{}</D:creationdate>",
            entry.created.to_rfc3339()
        ));
        out.push_str(&format!(
            "<D:getlastmodified>{}</D:getlastmodified>",
            http_date(entry.modified)
        ));
        out.push_str("</D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>");
        out.push_str("</D:response>");
    }
    out.push_str("</D:multistatus>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(href: &str, is_collection: bool) -> PropEntry {
        let time = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        PropEntry {
            href: href.to_string(),
            name: "a & b".to_string(),
            is_collection,
            content_length: 42,
            created: time,
            modified: time,
        }
    }

    #[test]
    fn test_href_encodes_segments() {
        assert_eq!(href("/Team/Q1 report.pdf", false), "/Team/Q1%20report.pdf");
        assert_eq!(href("/Team/Docs", true), "/Team/Docs/");
        assert_eq!(href("/", true), "/");
    }

    #[test]
    fn test_http_date() {
        let time = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(http_date(time), "Tue, 05 Mar 2024 14:07:09 GMT");
    }

    #[test]
    fn test_multistatus_collection() {
        let xml = multistatus(&[entry("/Team/", true)]);
        assert!(xml.contains("<D:multistatus xmlns:D=\"DAV:\">"));
        assert!(xml.contains("<D:href>/Team/</D:href>"));
        assert!(xml.contains("<D:collection/>"));
        assert!(!xml.contains("getcontentlength"));
        assert!(xml.contains("<D:displayname>a &amp; b</D:displayname>"));
    }

    #[test]
    fn test_multistatus_file() {
        let xml = multistatus(&[entry("/Team/a.txt", false)]);
        assert!(xml.contains("<D:resourcetype/>"));
        assert!(xml.contains("<D:getcontentlength>42</D:getcontentlength>"));
        assert!(xml.contains("<D:getlastmodified>Tue, 05 Mar 2024 14:07:09 GMT</D:getlastmodified>"));
        assert!(xml.contains("HTTP/1.1 200 OK"));
    }
}
