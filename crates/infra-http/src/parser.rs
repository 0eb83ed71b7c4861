// RSS 2.0 / Atom parsing
//
// Only the fields a post needs are read. Roots and items are matched by local
// name (RDF); item fields by qualified name, so extension elements such as
// `media:title` never shadow the plain ones.

use chrono::{DateTime, Utc};
use feedrefresh_core::domain::NewFeedPost;
use feedrefresh_core::port::FetchError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Guid,
    Title,
    Link,
    Summary,
    Content,
    Published,
    Updated,
    Ignored,
}

impl Field {
    fn from_name(name: &[u8]) -> Self {
        match name {
            b"guid" | b"id" => Field::Guid,
            b"title" => Field::Title,
            b"link" | b"atom:link" => Field::Link,
            b"description" | b"summary" => Field::Summary,
            b"content" | b"content:encoded" => Field::Content,
            b"pubDate" | b"published" | b"dc:date" => Field::Published,
            b"updated" => Field::Updated,
            _ => Field::Ignored,
        }
    }
}

/// Raw values of one `<item>` / `<entry>`
#[derive(Debug, Default)]
struct EntryFields {
    guid: Option<String>,
    title: Option<String>,
    link: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    published: Option<String>,
    updated: Option<String>,
}

impl EntryFields {
    /// First non-empty value wins
    fn set(&mut self, field: Field, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let slot = match field {
            Field::Guid => &mut self.guid,
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Summary => &mut self.summary,
            Field::Content => &mut self.content,
            Field::Published => &mut self.published,
            Field::Updated => &mut self.updated,
            Field::Ignored => return,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }

    /// Atom `<link href=".."/>`; only the alternate (or untyped) link counts
    fn set_link_from(&mut self, element: &BytesStart<'_>) -> Result<(), FetchError> {
        let rel = attribute(element, "rel")?;
        if matches!(rel.as_deref(), None | Some("alternate")) {
            if let Some(href) = attribute(element, "href")? {
                self.set(Field::Link, &href);
            }
        }
        Ok(())
    }

    /// Identity falls back to link, then title; entries with none are dropped
    fn into_post(self) -> Option<NewFeedPost> {
        let guid = self
            .guid
            .clone()
            .or_else(|| self.link.clone())
            .or_else(|| self.title.clone())?;

        let published_at = self
            .published
            .as_deref()
            .or(self.updated.as_deref())
            .and_then(parse_date);

        Some(NewFeedPost {
            guid,
            title: self.title.unwrap_or_default(),
            url: self.link,
            summary: self.summary.or(self.content),
            published_at,
        })
    }
}

/// Parse an RSS or Atom document into posts (document order)
pub fn parse_feed(xml: &str) -> Result<Vec<NewFeedPost>, FetchError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut posts = Vec::new();
    let mut saw_root = false;
    let mut entry: Option<EntryFields> = None;
    let mut field: Option<Field> = None;
    let mut nested = 0usize;
    let mut text = String::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            FetchError::Parse(format!(
                "XML error at position {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Start(element) => {
                let local = element.local_name();
                let name = local.as_ref();

                if !saw_root {
                    check_root(name)?;
                    saw_root = true;
                } else if field.is_some() {
                    // Markup inside a field (e.g. xhtml content)
                    nested += 1;
                } else if let Some(fields) = entry.as_mut() {
                    let current = Field::from_name(element.name().as_ref());
                    if current == Field::Link {
                        fields.set_link_from(&element)?;
                    }
                    field = Some(current);
                    nested = 0;
                    text.clear();
                } else if name == b"item" || name == b"entry" {
                    entry = Some(EntryFields::default());
                }
            }
            Event::Empty(element) => {
                let local = element.local_name();
                let name = local.as_ref();

                if !saw_root {
                    check_root(name)?;
                    saw_root = true;
                } else if field.is_none() {
                    if let Some(fields) = entry.as_mut() {
                        if Field::from_name(element.name().as_ref()) == Field::Link {
                            fields.set_link_from(&element)?;
                        }
                    }
                }
            }
            Event::Text(content) => {
                if field.is_some() {
                    let unescaped = content
                        .unescape()
                        .map_err(|e| FetchError::Parse(e.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(content) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&content.into_inner()));
                }
            }
            Event::End(element) => {
                if let Some(current) = field {
                    if nested > 0 {
                        nested -= 1;
                    } else {
                        if let Some(fields) = entry.as_mut() {
                            fields.set(current, &text);
                        }
                        field = None;
                        text.clear();
                    }
                } else if entry.is_some()
                    && matches!(element.local_name().as_ref(), b"item" | b"entry")
                {
                    if let Some(post) = entry.take().and_then(EntryFields::into_post) {
                        posts.push(post);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(FetchError::Parse("Document has no root element".to_string()));
    }
    Ok(posts)
}

fn check_root(name: &[u8]) -> Result<(), FetchError> {
    match name {
        b"rss" | b"feed" | b"RDF" => Ok(()),
        other => Err(FetchError::Parse(format!(
            "Unsupported document root <{}>",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>, FetchError> {
    let attr = element
        .try_get_attribute(name)
        .map_err(|e| FetchError::Parse(e.to_string()))?;
    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|e| FetchError::Parse(e.to_string()))?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

/// RSS uses RFC 2822 dates, Atom uses RFC 3339
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|date| date.with_timezone(&Utc))
        .ok()
}
