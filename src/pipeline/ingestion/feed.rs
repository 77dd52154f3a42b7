use crate::error::{HarvestError, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

/// One entry of a syndication feed. `id` falls back to the link when the
/// feed carries no guid, since the seen-items store needs a stable key.
#[derive(Debug, Clone, Default)]
pub struct SyndicationItem {
    pub id: String,
    pub link: String,
    pub title: String,
    pub pub_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct SyndicationFeed {
    pub title: String,
    pub last_build_date: Option<DateTime<Utc>>,
    pub items: Vec<SyndicationItem>,
}

/// Parses RSS 2.0 (`<rss><channel>`) and Atom (`<feed>`) documents into a
/// uniform feed structure, in document order.
pub fn parse_feed(xml: &str) -> Result<SyndicationFeed> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = SyndicationFeed::default();
    let mut path: Vec<String> = Vec::new();
    let mut current_item: Option<SyndicationItem> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                if path.is_empty() {
                    if name != "rss" && name != "feed" {
                        return Err(HarvestError::Feed(format!(
                            "unsupported document root <{name}>"
                        )));
                    }
                    saw_root = true;
                }
                if name == "item" || name == "entry" {
                    current_item = Some(SyndicationItem::default());
                }
                if let Some(item) = current_item.as_mut() {
                    // Atom carries the link in the href attribute.
                    if name == "link" {
                        if let Some(href) = attribute(&e, "href") {
                            item.link = href;
                        }
                    }
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(e.name().as_ref());
                if name == "link" {
                    if let Some(item) = current_item.as_mut() {
                        if let Some(href) = attribute(&e, "href") {
                            item.link = href;
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(e.name().as_ref());
                if name == "item" || name == "entry" {
                    if let Some(mut item) = current_item.take() {
                        if item.id.is_empty() {
                            item.id = item.link.clone();
                        }
                        if !item.link.is_empty() {
                            feed.items.push(item);
                        }
                    }
                }
                path.pop();
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| HarvestError::Feed(e.to_string()))?
                    .trim()
                    .to_string();
                apply_text(&mut feed, &mut current_item, &path, text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).trim().to_string();
                apply_text(&mut feed, &mut current_item, &path, text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(HarvestError::Feed(e.to_string())),
        }
    }

    if !saw_root {
        return Err(HarvestError::Feed("document contains no feed element".into()));
    }
    Ok(feed)
}

fn apply_text(
    feed: &mut SyndicationFeed,
    current_item: &mut Option<SyndicationItem>,
    path: &[String],
    text: String,
) {
    if text.is_empty() {
        return;
    }
    let Some(element) = path.last().map(String::as_str) else {
        return;
    };

    if let Some(item) = current_item.as_mut() {
        match element {
            "guid" | "id" => item.id = text,
            "link" if item.link.is_empty() => item.link = text,
            "title" => item.title = text,
            "pubDate" | "date" | "published" | "updated" => {
                if item.pub_date.is_none() {
                    item.pub_date = parse_feed_date(&text);
                }
            }
            _ => {}
        }
        return;
    }

    let in_channel = path.len() == 3 && path[1] == "channel";
    let in_atom_root = path.len() == 2 && path[0] == "feed";
    if in_channel || in_atom_root {
        match element {
            "title" => feed.title = text,
            "lastBuildDate" | "updated" => feed.last_build_date = parse_feed_date(&text),
            _ => {}
        }
    }
}

/// Feeds disagree wildly on date formats; RFC 2822 (RSS) and RFC 3339
/// (Atom, Dublin Core) cover the field.
fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn local_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.to_string(),
    }
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| local_name(a.key.as_ref()) == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Journal of Examples</title>
    <lastBuildDate>Mon, 06 Jan 2020 10:00:00 GMT</lastBuildDate>
    <item>
      <title>First article</title>
      <link>https://example.org/articles/1</link>
      <guid>urn:example:1</guid>
      <pubDate>Sun, 05 Jan 2020 09:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second article</title>
      <link>https://example.org/articles/2</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Feed</title>
  <updated>2020-01-06T10:00:00Z</updated>
  <entry>
    <id>urn:example:9</id>
    <title>An entry</title>
    <link href="https://example.org/entries/9"/>
    <updated>2020-01-05T09:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_channel_and_items_in_order() {
        let feed = parse_feed(RSS).unwrap();
        assert_eq!(feed.title, "Journal of Examples");
        assert!(feed.last_build_date.is_some());
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[0].id, "urn:example:1");
        assert_eq!(feed.items[0].link, "https://example.org/articles/1");
        assert!(feed.items[0].pub_date.is_some());
        // guid-less item falls back to its link as id
        assert_eq!(feed.items[1].id, "https://example.org/articles/2");
    }

    #[test]
    fn parses_atom_entries() {
        let feed = parse_feed(ATOM).unwrap();
        assert_eq!(feed.title, "Example Feed");
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].id, "urn:example:9");
        assert_eq!(feed.items[0].link, "https://example.org/entries/9");
    }

    #[test]
    fn rejects_non_feed_documents() {
        assert!(parse_feed("<html><body/></html>").is_err());
    }
}
