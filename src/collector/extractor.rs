//! Config extraction from page content
//!
//! This module provides functionality for:
//! - Reducing a fetched page to its text content
//! - Finding protocol-tagged config strings in that text, one per line

use crate::collector::models::{ConfigString, RawConfigSet};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Lines starting with a recognized scheme
static PROTOCOL_PREFIX_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(vmess|vless|ss|trojan|hysteria|hy2)://").expect("Invalid protocol regex")
});

/// Message code blocks, where channels usually post configs
static CODE_BLOCK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(?:code|pre)\b[^>]*>(.*?)</(?:code|pre)>").expect("Invalid code block regex")
});

static LINE_BREAK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("Invalid line break regex"));

static TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("Invalid tag regex"));

static ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("Invalid entity regex")
});

/// Extracts config strings from free-form text
pub struct ConfigExtractor;

impl ConfigExtractor {
    /// Extract the distinct configs found in raw page content
    ///
    /// If the page has code blocks only those are scanned, otherwise the
    /// whole text content is.
    pub fn extract_from_page(content: &str) -> RawConfigSet {
        Self::extract(&Self::page_text(content))
    }

    /// Extract the distinct configs found in plain text
    ///
    /// Each line is trimmed and kept when it starts with a recognized
    /// scheme. Nothing past the scheme is validated here.
    pub fn extract(text: &str) -> RawConfigSet {
        text.lines()
            .map(str::trim)
            .filter(|line| PROTOCOL_PREFIX_REGEX.is_match(line))
            .filter_map(ConfigString::parse)
            .collect()
    }

    /// Text content of a page
    pub fn page_text(content: &str) -> String {
        let blocks: Vec<String> = CODE_BLOCK_REGEX
            .captures_iter(content)
            .filter_map(|cap| cap.get(1).map(|m| Self::strip_markup(m.as_str())))
            .collect();

        if blocks.is_empty() {
            Self::strip_markup(content)
        } else {
            blocks.join("\n")
        }
    }

    fn strip_markup(html: &str) -> String {
        let with_breaks = LINE_BREAK_REGEX.replace_all(html, "\n");
        let without_tags = TAG_REGEX.replace_all(&with_breaks, "");
        unescape_entities(&without_tags)
    }
}

fn unescape_entities(text: &str) -> String {
    ENTITY_REGEX
        .replace_all(text, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}
