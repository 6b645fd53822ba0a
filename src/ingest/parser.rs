// src/ingest/parser.rs
//! Feed markup → raw items. Strict RSS deserialization first, then a
//! tolerant tag scan for markup the strict pass rejects or finds empty.

use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;

use crate::ingest::types::RawItem;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/// Which pass produced the items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Strict,
    Lenient,
    Empty,
}

/// Parse feed markup into items in document order. Never fails; markup
/// with no recognizable items yields an empty list.
pub fn parse_feed(markup: &str) -> Vec<RawItem> {
    parse_feed_with_mode(markup).0
}

pub fn parse_feed_with_mode(markup: &str) -> (Vec<RawItem>, ParseMode) {
    let t0 = std::time::Instant::now();

    let strict = match parse_strict(markup) {
        Ok(items) => items,
        Err(e) => {
            tracing::debug!(target: "ingest", error = %e, "strict rss parse failed");
            Vec::new()
        }
    };

    let (items, mode) = if !strict.is_empty() {
        (strict, ParseMode::Strict)
    } else {
        tracing::warn!(target: "ingest", "no <item> found by strict parser; trying lenient scan");
        let lenient = parse_lenient(markup);
        if lenient.is_empty() {
            tracing::warn!(target: "ingest", "no <item> found by lenient scan either");
            counter!("tracker_parse_empty_total").increment(1);
            (lenient, ParseMode::Empty)
        } else {
            (lenient, ParseMode::Lenient)
        }
    };

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("tracker_parse_ms").record(ms);
    counter!("tracker_items_parsed_total").increment(items.len() as u64);
    (items, mode)
}

fn parse_strict(markup: &str) -> anyhow::Result<Vec<RawItem>> {
    let xml_clean = scrub_html_entities_for_xml(markup);
    let rss: Rss = from_str(&xml_clean)?;
    Ok(rss
        .channel
        .item
        .into_iter()
        .map(|it| RawItem {
            title: it.title.as_deref().and_then(normalize_text),
            description: it.description.as_deref().and_then(normalize_text),
            link: it.link.as_deref().and_then(normalize_text),
            pub_date: it.pub_date.as_deref().and_then(normalize_text),
        })
        .collect())
}

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static feed regex"))
}

fn parse_lenient(markup: &str) -> Vec<RawItem> {
    static RE_ITEM: OnceCell<Regex> = OnceCell::new();
    static RE_TITLE: OnceCell<Regex> = OnceCell::new();
    static RE_DESC: OnceCell<Regex> = OnceCell::new();
    static RE_LINK: OnceCell<Regex> = OnceCell::new();
    static RE_DATE: OnceCell<Regex> = OnceCell::new();

    let re_item = re(&RE_ITEM, r"(?is)<item\b[^>]*>(.*?)</item\s*>");
    let re_title = re(&RE_TITLE, r"(?is)<title\b[^>]*>(.*?)</title\s*>");
    let re_desc = re(&RE_DESC, r"(?is)<description\b[^>]*>(.*?)</description\s*>");
    let re_link = re(&RE_LINK, r"(?is)<link\b[^>]*>(.*?)</link\s*>");
    let re_date = re(&RE_DATE, r"(?is)<pubDate\b[^>]*>(.*?)</pubDate\s*>");

    re_item
        .captures_iter(markup)
        .filter_map(|caps| caps.get(1))
        .map(|body| {
            let body = body.as_str();
            let child = |r: &Regex| r.captures(body).and_then(|c| c.get(1)).map(|m| m.as_str());
            RawItem {
                title: child(re_title).and_then(lenient_text),
                description: child(re_desc).and_then(lenient_text),
                link: child(re_link).and_then(lenient_text),
                pub_date: child(re_date).and_then(lenient_text),
            }
        })
        .collect()
}

/// Raw element body from the tag scan, brought to what an XML reader would
/// hand back: entities outside CDATA decoded once, CDATA bodies verbatim.
fn lenient_text(raw: &str) -> Option<String> {
    let re_cdata = cdata_re();
    let mut text = String::with_capacity(raw.len());
    let mut last = 0;
    for caps in re_cdata.captures_iter(raw) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        text.push_str(&html_escape::decode_html_entities(&raw[last..whole.start()]));
        text.push_str(body.as_str());
        last = whole.end();
    }
    text.push_str(&html_escape::decode_html_entities(&raw[last..]));
    normalize_text(&text)
}

/// Shared by both passes so one item always yields the same text (and so
/// the same content-hash identifier) whichever pass read it: unwrap CDATA,
/// drop tags, decode entities, non-breaking spaces to spaces, collapse
/// whitespace.
pub(crate) fn normalize_text(raw: &str) -> Option<String> {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = re(&RE_TAGS, r"(?is)</?[^>]+>");

    let unwrapped = cdata_re().replace_all(raw, "$1");
    let stripped = re_tags.replace_all(&unwrapped, "");
    let decoded = html_escape::decode_html_entities(&stripped);
    let spaced = decoded.replace('\u{a0}', " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

fn cdata_re() -> &'static Regex {
    static RE_CDATA: OnceCell<Regex> = OnceCell::new();
    re(&RE_CDATA, r"(?s)<!\[CDATA\[(.*?)\]\]>")
}

/// Named HTML entities that are not valid XML, mapped to the characters
/// `html_escape` decodes them to.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", "\u{a0}")
        .replace("&ndash;", "\u{2013}")
        .replace("&mdash;", "\u{2014}")
        .replace("&ldquo;", "\u{201c}")
        .replace("&rdquo;", "\u{201d}")
        .replace("&lsquo;", "\u{2018}")
        .replace("&rsquo;", "\u{2019}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
  <title>Announcements</title>
  <item>
    <title>ABC Ltd</title>
    <link>https://example.test/a.pdf</link>
    <description>Board meeting&nbsp;outcome</description>
    <pubDate>04-May-2025 07:00:00</pubDate>
  </item>
  <item>
    <title>XYZ Ltd</title>
    <description><![CDATA[Dividend <b>declared</b>]]></description>
  </item>
</channel></rss>"#;

    #[test]
    fn strict_parses_rss_items_in_order() {
        let (items, mode) = parse_feed_with_mode(RSS);
        assert_eq!(mode, ParseMode::Strict);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("ABC Ltd"));
        assert_eq!(items[0].link.as_deref(), Some("https://example.test/a.pdf"));
        assert_eq!(items[0].description.as_deref(), Some("Board meeting outcome"));
        assert_eq!(items[0].pub_date.as_deref(), Some("04-May-2025 07:00:00"));
        assert_eq!(items[1].link, None);
        assert_eq!(items[1].pub_date, None);
    }

    #[test]
    fn lenient_handles_broken_markup() {
        let html = r#"<html><body>
            <item><title>First &amp; only</title><link> https://example.test/1 </link>
            <pubDate>Mon, 05 May 2025 10:00:00 +0530</pubDate>
            <description><![CDATA[<p>Hello</p>]]></description></item>
            <item><title>Second<br></title></item>
            <unclosed>
        </body>"#;
        let (items, mode) = parse_feed_with_mode(html);
        assert_eq!(mode, ParseMode::Lenient);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("First & only"));
        assert_eq!(items[0].link.as_deref(), Some("https://example.test/1"));
        assert_eq!(items[0].description.as_deref(), Some("Hello"));
        assert_eq!(items[1].title.as_deref(), Some("Second"));
        assert_eq!(items[1].description, None);
    }

    #[test]
    fn empty_channel_and_garbage_yield_nothing() {
        let empty = r#"<rss><channel><title>t</title></channel></rss>"#;
        assert_eq!(parse_feed_with_mode(empty).1, ParseMode::Empty);
        assert!(parse_feed("").is_empty());
        assert!(parse_feed("Just a moment...").is_empty());
    }

    const LINKLESS: &str = r#"<item>
    <title>ABC&nbsp;Ltd &ndash; update</title>
    <description><![CDATA[Dividend <b>declared</b>&nbsp;today]]></description>
    <pubDate>04-May-2025 07:00:00</pubDate>
  </item>"#;

    #[test]
    fn both_passes_yield_same_text_and_identifier() {
        let clean = format!("<rss><channel>{LINKLESS}</channel></rss>");
        // bare `&` breaks the strict pass for the whole document
        let broken = format!("<rss><channel>{LINKLESS}<item><title>A & B</title></item></channel></rss>");

        let (strict, m1) = parse_feed_with_mode(&clean);
        let (lenient, m2) = parse_feed_with_mode(&broken);
        assert_eq!(m1, ParseMode::Strict);
        assert_eq!(m2, ParseMode::Lenient);
        assert_eq!(strict[0], lenient[0]);
        assert_eq!(strict[0].title.as_deref(), Some("ABC Ltd \u{2013} update"));
        assert_eq!(strict[0].description.as_deref(), Some("Dividend declared today"));

        let id = |it: &RawItem| {
            crate::entry::Entry::from_parts(
                it.pub_date.as_deref(),
                it.title.as_deref(),
                it.description.as_deref(),
                it.link.as_deref(),
            )
            .identifier
        };
        assert_eq!(id(&strict[0]), id(&lenient[0]));
    }

    #[test]
    fn normalize_collapses_whitespace_and_nbsp() {
        assert_eq!(
            normalize_text("  a\u{a0}&nbsp;\n <i>b</i>  ").as_deref(),
            Some("a b")
        );
        assert_eq!(normalize_text(" <br/> "), None);
    }
}
