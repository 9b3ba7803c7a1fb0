// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Layout-capture preprocessing and page directive prescanning.
//!
//! Before scanning, a page may have its `<head>`, `<title>`, `<body>`,
//! `<meta>` and `<content tag="..">` elements rewritten into
//! `sitemesh:capture*` tags, so a decorator can later pick the captured
//! pieces out of the [`OutputContext`](crate::output::OutputContext).

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashMap;

/// Namespace of the rewritten capture tags.
pub const CAPTURE_NAMESPACE: &str = "sitemesh";

/// Attribute recording how a rewritten `<meta>` element was closed.
pub const META_CLOSING_ATTRIBUTE: &str = "gsp_sm_xmlClosingForEmptyTag";

lazy_static! {
    static ref COMMENT: Regex = Regex::new(r"(?s)<%--.*?--%>").expect("comment pattern");
    static ref PAGE_DIRECTIVE: Regex = Regex::new(r"(?s)<%@\s*(.*?)\s*%>").expect("directive pattern");
    static ref DIRECTIVE_ATTRIBUTE: Regex = Regex::new(r#"(\w+)\s*=\s*"([^"]*)""#).expect("attribute pattern");
    static ref HEAD_OPEN: Regex = Regex::new(r"(?i)<head(\s[^>]*)?>").expect("head pattern");
    static ref HEAD_CLOSE: Regex = Regex::new(r"(?i)</head\s*>").expect("head pattern");
    static ref TITLE_OPEN: Regex = Regex::new(r"(?i)<title(\s[^>]*)?>").expect("title pattern");
    static ref TITLE_CLOSE: Regex = Regex::new(r"(?i)</title\s*>").expect("title pattern");
    static ref BODY_OPEN: Regex = Regex::new(r"(?i)<body(\s[^>]*)?>").expect("body pattern");
    static ref BODY_CLOSE: Regex = Regex::new(r"(?i)</body\s*>").expect("body pattern");
    static ref META: Regex = Regex::new(r"(?i)<meta(\s[^>]*?)?\s*(/?)>").expect("meta pattern");
    static ref CONTENT_OPEN: Regex = Regex::new(r#"(?i)<content(\s+tag\s*=\s*"[^"]*"[^>]*)>"#).expect("content pattern");
    static ref CONTENT_CLOSE: Regex = Regex::new(r"(?i)</content\s*>").expect("content pattern");
}

/// Collects `name="value"` pairs of all non-taglib `<%@ %>` directives.
///
/// Used before scanning, for directives that change how the page is scanned.
pub fn prescan_page_directives(source: &str) -> HashMap<String, String> {
    let stripped = COMMENT.replace_all(source, "");
    let mut result = HashMap::new();
    for directive in PAGE_DIRECTIVE.captures_iter(&stripped) {
        let body = directive.get(1).map(|m| m.as_str()).unwrap_or_default();
        if body.starts_with("taglib") {
            continue;
        }
        result.extend(directive_attributes(body));
    }
    result
}

/// The `name="value"` pairs of a directive body, in order.
pub fn directive_attributes(text: &str) -> Vec<(String, String)> {
    DIRECTIVE_ATTRIBUTE
        .captures_iter(text)
        .map(|attr| (attr[1].to_string(), attr[2].to_string()))
        .collect()
}

/// Rewrites layout elements into capture tags.
pub fn add_capture_tags(source: &str) -> String {
    let attrs = |caps: &Captures| caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();

    let text = HEAD_OPEN.replace_all(source, |c: &Captures| format!("<sitemesh:captureHead{}>", attrs(c)));
    let text = HEAD_CLOSE.replace_all(&text, "</sitemesh:captureHead>");
    let text = TITLE_OPEN.replace_all(&text, |c: &Captures| format!("<sitemesh:captureTitle{}>", attrs(c)));
    let text = TITLE_CLOSE.replace_all(&text, "</sitemesh:captureTitle>");
    let text = BODY_OPEN.replace_all(&text, |c: &Captures| format!("<sitemesh:captureBody{}>", attrs(c)));
    let text = BODY_CLOSE.replace_all(&text, "</sitemesh:captureBody>");
    let text = META.replace_all(&text, |c: &Captures| {
        let closing = c.get(2).map(|m| m.as_str()).unwrap_or_default();
        format!(
            "<sitemesh:captureMeta {}=\"{}\"{}/>",
            META_CLOSING_ATTRIBUTE,
            closing,
            attrs(c).trim_end()
        )
    });
    let text = CONTENT_OPEN.replace_all(&text, |c: &Captures| format!("<sitemesh:captureContent{}>", attrs(c)));
    let text = CONTENT_CLOSE.replace_all(&text, "</sitemesh:captureContent>");
    text.into_owned()
}

/// True if `name` is one of the internal capture tags, whose failures are
/// never wrapped.
pub fn is_capture_tag(name: &str) -> bool {
    matches!(
        name.strip_prefix("capture"),
        Some("Body" | "Head" | "Meta" | "Title" | "Component" | "Content")
    )
}
