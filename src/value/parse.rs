//! Reference and export grammar
//!
//! A parameter string is a sequence of literal text, `${…}` references
//! (which nest), and `$[…]` inventory queries (which do not). A single
//! escape character protects the next sentinel; a doubled escape directly
//! before a sentinel collapses to one literal escape character, so
//! `\\${foo}` renders as a backslash followed by the resolved reference.
//! Anywhere else, backslashes pass through verbatim.
//!
//! Strings holding exactly one reference and no escapes take a fast path
//! around the full scanner.

use serde_json::Value as Json;

use crate::core::error::{Error, Result};
use crate::core::settings::Settings;
use crate::value::item::Item;
use crate::value::query::InvQuery;

/// Parse a parameter string into an item tree.
pub fn parse_str(input: &str, settings: &Settings) -> Result<Item> {
    match settings.count_sentinels(input) {
        0 => Ok(Item::Scalar(Json::String(input.to_string()))),
        1 => match parse_simple(input, settings) {
            Some(items) => Ok(assemble(items)),
            None => parse_full(input, settings),
        },
        _ => parse_full(input, settings),
    }
}

fn assemble(mut items: Vec<Item>) -> Item {
    if items.len() == 1 {
        items.pop().expect("one item")
    } else {
        Item::Composite(items)
    }
}

/// Fast path: `text? ${ plain } text?` with no escapes and no other
/// sentinel characters anywhere.
fn parse_simple(input: &str, settings: &Settings) -> Option<Vec<Item>> {
    let (ref_open, ref_close) = (
        settings.reference_sentinels.0.as_str(),
        settings.reference_sentinels.1.as_str(),
    );
    let excluded: Vec<char> = {
        let mut chars: Vec<char> = ref_open.chars().collect();
        chars.extend(ref_close.chars());
        chars.extend(settings.export_sentinels.0.chars());
        chars.extend(settings.export_sentinels.1.chars());
        chars.push(settings.escape_character);
        chars
    };
    let clean = |s: &str| !s.contains(&excluded[..]);

    let open_at = input.find(ref_open)?;
    let rest = &input[open_at + ref_open.len()..];
    let close_at = rest.find(ref_close)?;
    let (pre, content, post) = (
        &input[..open_at],
        &rest[..close_at],
        &rest[close_at + ref_close.len()..],
    );
    if content.is_empty() || !clean(pre) || !clean(content) || !clean(post) {
        return None;
    }
    let mut items = Vec::new();
    if !pre.is_empty() {
        items.push(Item::Scalar(Json::String(pre.to_string())));
    }
    items.push(Item::Reference(vec![Item::Scalar(Json::String(
        content.to_string(),
    ))]));
    if !post.is_empty() {
        items.push(Item::Scalar(Json::String(post.to_string())));
    }
    Some(items)
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
    ref_open: &'a str,
    ref_close: &'a str,
    inv_open: &'a str,
    inv_close: &'a str,
    escape: String,
    double_escape: String,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str, settings: &'a Settings) -> Self {
        let escape = settings.escape_character.to_string();
        let double_escape = format!("{0}{0}", settings.escape_character);
        Self {
            input,
            pos: 0,
            ref_open: &settings.reference_sentinels.0,
            ref_close: &settings.reference_sentinels.1,
            inv_open: &settings.export_sentinels.0,
            inv_close: &settings.export_sentinels.1,
            escape,
            double_escape,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    /// `\\` directly before any sentinel collapses to one escape char.
    fn eat_double_escape(&mut self, buf: &mut String) -> bool {
        let rest = self.rest();
        if let Some(after) = rest.strip_prefix(self.double_escape.as_str()) {
            if after.starts_with(self.ref_open)
                || after.starts_with(self.ref_close)
                || after.starts_with(self.inv_open)
                || after.starts_with(self.inv_close)
            {
                buf.push_str(&self.escape);
                self.pos += self.double_escape.len();
                return true;
            }
        }
        false
    }

    /// An escape followed by `token` emits `token` literally.
    fn eat_escaped(&mut self, token: &str, buf: &mut String) -> bool {
        let rest = self.rest();
        if let Some(after) = rest.strip_prefix(self.escape.as_str()) {
            if after.starts_with(token) {
                buf.push_str(token);
                self.pos += self.escape.len() + token.len();
                return true;
            }
        }
        false
    }

    fn bump(&mut self, buf: &mut String) {
        if let Some(c) = self.rest().chars().next() {
            buf.push(c);
            self.pos += c.len_utf8();
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            message: message.into(),
            text: self.input.to_string(),
            col: self.input[..self.pos].chars().count() + 1,
            uri: String::new(),
        }
    }

    fn flush(buf: &mut String, items: &mut Vec<Item>) {
        if !buf.is_empty() {
            items.push(Item::Scalar(Json::String(std::mem::take(buf))));
        }
    }

    fn scan_top(&mut self, settings: &Settings) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut buf = String::new();
        while !self.rest().is_empty() {
            if self.eat_double_escape(&mut buf) {
                continue;
            }
            let ref_open = self.ref_open.to_string();
            let inv_open = self.inv_open.to_string();
            if self.eat_escaped(&ref_open, &mut buf) || self.eat_escaped(&inv_open, &mut buf) {
                continue;
            }
            if self.rest().starts_with(self.ref_open) {
                Self::flush(&mut buf, &mut items);
                self.pos += self.ref_open.len();
                items.push(self.scan_reference()?);
            } else if self.rest().starts_with(self.inv_open) {
                Self::flush(&mut buf, &mut items);
                self.pos += self.inv_open.len();
                items.push(self.scan_query(settings)?);
            } else {
                self.bump(&mut buf);
            }
        }
        Self::flush(&mut buf, &mut items);
        if items.is_empty() {
            items.push(Item::Scalar(Json::String(String::new())));
        }
        Ok(items)
    }

    /// Body of a `${…}`; references nest, query sentinels are plain text.
    fn scan_reference(&mut self) -> Result<Item> {
        let mut items = Vec::new();
        let mut buf = String::new();
        loop {
            if self.rest().is_empty() {
                return Err(self.error(format!("missing closing '{}'", self.ref_close)));
            }
            if self.eat_double_escape(&mut buf) {
                continue;
            }
            let ref_open = self.ref_open.to_string();
            let ref_close = self.ref_close.to_string();
            if self.eat_escaped(&ref_open, &mut buf) || self.eat_escaped(&ref_close, &mut buf) {
                continue;
            }
            if self.rest().starts_with(self.ref_open) {
                Self::flush(&mut buf, &mut items);
                self.pos += self.ref_open.len();
                items.push(self.scan_reference()?);
                continue;
            }
            if self.eat(&ref_close) {
                Self::flush(&mut buf, &mut items);
                if items.is_empty() {
                    return Err(self.error("empty reference"));
                }
                return Ok(Item::Reference(items));
            }
            self.bump(&mut buf);
        }
    }

    /// Body of a `$[…]`; queries do not nest and reference sentinels are
    /// plain text here.
    fn scan_query(&mut self, settings: &Settings) -> Result<Item> {
        let mut buf = String::new();
        loop {
            if self.rest().is_empty() {
                return Err(self.error(format!("missing closing '{}'", self.inv_close)));
            }
            if self.eat_double_escape(&mut buf) {
                continue;
            }
            let inv_open = self.inv_open.to_string();
            let inv_close = self.inv_close.to_string();
            if self.eat_escaped(&inv_open, &mut buf) || self.eat_escaped(&inv_close, &mut buf) {
                continue;
            }
            if self.eat(&inv_close) {
                if buf.is_empty() {
                    return Err(self.error("empty inventory query"));
                }
                let query = InvQuery::parse(&buf, settings)?;
                return Ok(Item::InvQuery(Box::new(query)));
            }
            self.bump(&mut buf);
        }
    }
}

fn parse_full(input: &str, settings: &Settings) -> Result<Item> {
    let mut scanner = Scanner::new(input, settings);
    let items = scanner.scan_top(settings)?;
    Ok(assemble(items))
}
