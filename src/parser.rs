//! XML document parsing.
//!
//! Each document kind is deserialized with `quick-xml`'s serde support into a
//! private wire struct mirroring the XML, then validated and converted into
//! the public [`model`](crate::model) types. Alert levels are parsed strictly:
//! an unrecognised `status_id` is a parse error, never a guess.
//!
//! Documents must be UTF-8, as the API serves them. An `encoding=` in the
//! XML declaration is ignored, and bytes that are not valid UTF-8 are a
//! parse error.
//!
//! Document shapes (API version 0.2):
//!
//! ```text
//! <current_status>
//!   <updated><datetime>2024-03-24T12:00:00+0000</datetime></updated>
//!   <site_status status_id="green"/>
//!   <message id=".." priority="high">..</message>*
//! </current_status>
//!
//! <site_activity>
//!   <lower_threshold status_id="yellow">50</lower_threshold>*
//!   <updated><datetime>..</datetime></updated>
//!   <activity status_id="green"><datetime>..</datetime><value>3.6</value></activity>*
//!   <message ..>*
//! </site_activity>
//!
//! <status_list>
//!   <status id="green">
//!     <color>#33ff33</color>
//!     <description lang="en">..</description>
//!     <meaning lang="en">..</meaning>
//!   </status>*
//! </status_list>
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{
    Activity, ActivityValue, AlertLevel, Descriptions, LevelDescription, Message,
    MessagePriority, ResourceKind, Status, Thresholds,
};

/// Timestamp layout used throughout the API.
const API_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct DateTimeElement {
    datetime: String,
}

#[derive(Debug, Deserialize)]
struct LangText {
    #[serde(rename = "@lang", default)]
    lang: String,

    #[serde(rename = "$text", default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessageElement {
    #[serde(rename = "@id")]
    id: String,

    #[serde(rename = "@priority")]
    priority: String,

    #[serde(rename = "description", default)]
    descriptions: Vec<LangText>,

    #[serde(default)]
    url: Option<String>,

    expires: DateTimeElement,
}

#[derive(Debug, Deserialize)]
struct SiteStatusElement {
    #[serde(rename = "@status_id")]
    status_id: String,
}

#[derive(Debug, Deserialize)]
struct CurrentStatusDocument {
    updated: DateTimeElement,

    site_status: SiteStatusElement,

    #[serde(rename = "message", default)]
    messages: Vec<MessageElement>,
}

#[derive(Debug, Deserialize)]
struct ThresholdElement {
    #[serde(rename = "@status_id")]
    status_id: String,

    #[serde(rename = "$text")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ActivityElement {
    #[serde(rename = "@status_id", default)]
    status_id: Option<String>,

    datetime: String,

    value: String,
}

#[derive(Debug, Deserialize)]
struct SiteActivityDocument {
    #[serde(rename = "lower_threshold", default)]
    thresholds: Vec<ThresholdElement>,

    updated: DateTimeElement,

    #[serde(rename = "activity", default)]
    values: Vec<ActivityElement>,

    #[serde(rename = "message", default)]
    messages: Vec<MessageElement>,
}

#[derive(Debug, Deserialize)]
struct StatusDescriptionElement {
    #[serde(rename = "@id")]
    id: String,

    color: String,

    #[serde(rename = "description", default)]
    descriptions: Vec<LangText>,

    #[serde(rename = "meaning", default)]
    meanings: Vec<LangText>,
}

#[derive(Debug, Deserialize)]
struct StatusListDocument {
    #[serde(rename = "status", default)]
    statuses: Vec<StatusDescriptionElement>,
}

// ============================================================================
// Public entry points
// ============================================================================

/// Parse a `current_status` document.
///
/// `expires` comes from the HTTP cache directive, not the document.
pub fn parse_status(body: &[u8], lang: &str, expires: DateTime<Utc>) -> Result<Status> {
    let kind = ResourceKind::Status;
    let doc: CurrentStatusDocument = deserialize(kind, body, "current_status")?;

    Ok(Status {
        level: parse_level(kind, &doc.site_status.status_id)?,
        updated: parse_datetime(kind, &doc.updated.datetime)?,
        expires,
        messages: convert_messages(kind, doc.messages, lang)?,
    })
}

/// Parse a `site_activity` document.
///
/// Values keep the server's chronological order. An `activity` element
/// without a `status_id` takes the level its unrounded value falls into.
pub fn parse_activity(body: &[u8], lang: &str, expires: DateTime<Utc>) -> Result<Activity> {
    let kind = ResourceKind::Activity;
    let doc: SiteActivityDocument = deserialize(kind, body, "site_activity")?;

    let mut thresholds = BTreeMap::new();
    for element in &doc.thresholds {
        let level = parse_level(kind, &element.status_id)?;
        let value = parse_number(kind, &element.value)?;
        if thresholds.insert(level, value).is_some() {
            return Err(Error::parse(kind, format!("duplicate threshold for {level}")));
        }
    }
    let thresholds = Thresholds::new(thresholds).map_err(|e| Error::parse(kind, e))?;

    let values = doc
        .values
        .iter()
        .map(|element| -> Result<ActivityValue> {
            let value = parse_number(kind, &element.value)?;
            let level = match &element.status_id {
                Some(id) => parse_level(kind, id)?,
                None => thresholds.level_for(value),
            };
            Ok(ActivityValue {
                level,
                value,
                datetime: parse_datetime(kind, &element.datetime)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let updated = parse_datetime(kind, &doc.updated.datetime)?;
    let messages = convert_messages(kind, doc.messages, lang)?;

    Activity::new(updated, expires, thresholds, values, messages).map_err(|e| Error::parse(kind, e))
}

/// Parse a `status_list` document, keeping the text for `lang`.
pub fn parse_descriptions(body: &[u8], lang: &str) -> Result<Descriptions> {
    let kind = ResourceKind::Descriptions;
    let doc: StatusListDocument = deserialize(kind, body, "status_list")?;

    let mut entries = BTreeMap::new();
    for element in doc.statuses {
        let level = parse_level(kind, &element.id)?;
        let description = select_lang(&element.descriptions, lang).ok_or_else(|| {
            Error::parse(kind, format!("no '{lang}' description for level {level}"))
        })?;
        let meaning = select_lang(&element.meanings, lang).ok_or_else(|| {
            Error::parse(kind, format!("no '{lang}' meaning for level {level}"))
        })?;

        let entry = LevelDescription {
            color: element.color.trim().to_string(),
            meaning,
            description,
        };
        if entries.insert(level, entry).is_some() {
            return Err(Error::parse(kind, format!("duplicate description for {level}")));
        }
    }

    Descriptions::new(entries).map_err(|e| Error::parse(kind, e))
}

// ============================================================================
// Helpers
// ============================================================================

fn deserialize<T>(kind: ResourceKind, body: &[u8], root: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let text = std::str::from_utf8(body).map_err(|e| Error::parse(kind, e))?;

    match root_element(text) {
        Some(name) if name == root => {}
        Some(name) => {
            return Err(Error::parse(
                kind,
                format!("incorrect root element '{name}', expected '{root}'"),
            ));
        }
        None => return Err(Error::parse(kind, "document has no root element")),
    }

    quick_xml::de::from_str(text).map_err(|e| Error::parse(kind, e))
}

/// Name of the first element in the document.
fn root_element(text: &str) -> Option<String> {
    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

fn parse_level(kind: ResourceKind, id: &str) -> Result<AlertLevel> {
    id.trim().parse().map_err(|e| Error::parse(kind, e))
}

fn parse_number(kind: ResourceKind, text: &str) -> Result<f64> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| Error::parse(kind, format!("invalid number '{}'", text.trim())))?;
    if !value.is_finite() {
        return Err(Error::parse(kind, format!("invalid number '{}'", text.trim())));
    }
    Ok(value)
}

pub(crate) fn parse_datetime(kind: ResourceKind, text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(text.trim(), API_DATETIME_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::parse(kind, format!("invalid datetime '{}': {e}", text.trim())))
}

fn select_lang(texts: &[LangText], lang: &str) -> Option<String> {
    texts
        .iter()
        .find(|t| t.lang == lang)
        .map(|t| t.text.trim().to_string())
}

/// Messages without text in `lang` are skipped.
fn convert_messages(
    kind: ResourceKind,
    elements: Vec<MessageElement>,
    lang: &str,
) -> Result<Vec<Message>> {
    let mut messages = Vec::with_capacity(elements.len());
    for element in elements {
        let Some(description) = select_lang(&element.descriptions, lang) else {
            debug!(id = %element.id, lang, "Skipping message without text in language");
            continue;
        };
        messages.push(Message {
            expires: parse_datetime(kind, &element.expires.datetime)?,
            priority: MessagePriority::from_attr(element.priority.trim()),
            url: element
                .url
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            id: element.id,
            description,
        });
    }
    Ok(messages)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Sample documents shared by the crate's tests.

    pub const STATUS_GREEN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<current_status api_version="0.2.5">
  <updated><datetime>2024-03-24T12:00:00+0000</datetime></updated>
  <site_status project_id="project:AWN" site_id="site:AWN:SUM" status_id="green"/>
  <message id="msg-1" priority="high">
    <description lang="en">Solar wind speed is elevated</description>
    <url>https://aurorawatch.lancs.ac.uk/</url>
    <expires><datetime>2024-03-25T00:00:00+0000</datetime></expires>
  </message>
  <message id="msg-2" priority="test">
    <description lang="en">Test message</description>
    <expires><datetime>2024-03-25T00:00:00+0000</datetime></expires>
  </message>
  <message id="msg-3" priority="low">
    <description lang="cy">Neges Gymraeg yn unig</description>
    <expires><datetime>2024-03-25T00:00:00+0000</datetime></expires>
  </message>
</current_status>
"#;

    pub fn status_with_level(level: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<current_status api_version="0.2.5">
  <updated><datetime>2024-03-24T12:00:00+0000</datetime></updated>
  <site_status status_id="{level}"/>
</current_status>
"#
        )
    }

    /// 24 hourly values ending 2024-03-24T11:00, the last one amber.
    pub fn activity_document() -> String {
        let mut values = String::new();
        for hour in 0..24 {
            let (level, value) = if hour == 23 {
                ("amber", 123.45)
            } else {
                ("green", 10.0 + hour as f64)
            };
            let day = if hour < 12 { 23 } else { 24 };
            let h = (hour + 12) % 24;
            values.push_str(&format!(
                "  <activity status_id=\"{level}\"><datetime>2024-03-{day:02}T{h:02}:00:00+0000</datetime><value>{value}</value></activity>\n"
            ));
        }
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<site_activity api_version="0.2" project_id="project:AWN" site_id="site:AWN:SUM">
  <lower_threshold status_id="green">0</lower_threshold>
  <lower_threshold status_id="yellow">50</lower_threshold>
  <lower_threshold status_id="amber">100</lower_threshold>
  <lower_threshold status_id="red">200</lower_threshold>
  <updated><datetime>2024-03-24T12:00:00+0000</datetime></updated>
{values}</site_activity>
"#
        )
    }

    pub const DESCRIPTIONS: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<status_list api_version="0.2">
  <status id="green">
    <color>#33ff33</color>
    <description lang="en">No significant activity</description>
    <meaning lang="en">Aurora is unlikely to be visible by eye or camera from anywhere in the UK.</meaning>
  </status>
  <status id="yellow">
    <color>#ffff00</color>
    <description lang="en">Minor geomagnetic activity</description>
    <meaning lang="en">Aurora may be visible by eye from Scotland and may be visible by camera from Scotland, northern England and Northern Ireland.</meaning>
  </status>
  <status id="amber">
    <color>#ff9900</color>
    <description lang="en">Amber alert: possible aurora</description>
    <meaning lang="en">Aurora is likely to be visible by eye from Scotland, northern England and Northern Ireland; possibly visible from elsewhere in the UK.</meaning>
  </status>
  <status id="red">
    <color>#ff0000</color>
    <description lang="en">Red alert: aurora likely</description>
    <meaning lang="en">It is likely that aurora will be visible by eye and camera from anywhere in the UK.</meaning>
  </status>
</status_list>
"##;
}
