//! Coupon history entries read from `user/{uid}/coupon`.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{de::IgnoredAny, Deserialize};

/// `created` as written by the redemption process: epoch millis or a date string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CreatedValue {
    Millis(f64),
    Text(String),
}

/// Raw coupon document. Every field is optional; the writer is external.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CouponDoc {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default, deserialize_with = "lenient_created")]
    pub created: Option<CreatedValue>,
    #[serde(default, rename = "createdAt", deserialize_with = "lenient_created")]
    pub created_at: Option<CreatedValue>,
}

/// Accept numbers and strings; anything else (maps, bools) is treated as absent.
fn lenient_created<'de, D>(deserializer: D) -> Result<Option<CreatedValue>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Value(CreatedValue),
        Other(IgnoredAny),
    }

    Ok(match Option::<Lenient>::deserialize(deserializer)? {
        Some(Lenient::Value(v)) => Some(v),
        _ => None,
    })
}

/// One redeemed coupon as shown in the history panel.
#[derive(Debug, Clone, PartialEq)]
pub struct CouponHistoryEntry {
    pub id: String,
    pub code: String,
    pub msg: Option<String>,
    pub created: Option<CreatedValue>,
}

impl CouponHistoryEntry {
    /// Map a stored document to an entry. `created` falls back to `createdAt`.
    pub fn from_doc(id: impl Into<String>, doc: CouponDoc) -> Self {
        Self {
            id: id.into(),
            code: doc.code.unwrap_or_default(),
            msg: doc.msg.filter(|m| !m.is_empty()),
            created: doc.created.or(doc.created_at),
        }
    }

    /// Millisecond value used for ordering. Unknown values order as epoch 0.
    /// Date strings without an offset are read in `local`.
    pub fn sort_key(&self, local: &FixedOffset) -> f64 {
        let ms = match &self.created {
            Some(CreatedValue::Millis(ms)) => *ms,
            Some(CreatedValue::Text(text)) => parse_date_millis(text, local).unwrap_or(0.0),
            None => 0.0,
        };
        if ms.is_nan() {
            0.0
        } else {
            ms
        }
    }

    /// Human-readable timestamp. Absent renders empty; unparseable text verbatim.
    pub fn display_created(&self, offset: &FixedOffset) -> String {
        match &self.created {
            None => String::new(),
            Some(CreatedValue::Millis(ms)) => {
                format_millis(*ms, offset).unwrap_or_else(|| ms.to_string())
            }
            Some(CreatedValue::Text(text)) => parse_date_millis(text, offset)
                .and_then(|ms| format_millis(ms, offset))
                .unwrap_or_else(|| text.clone()),
        }
    }
}

/// Sort entries newest first. Stable, so ties keep snapshot order.
pub fn sort_newest_first(entries: &mut [CouponHistoryEntry], local: &FixedOffset) {
    entries.sort_by(|a, b| b.sort_key(local).total_cmp(&a.sort_key(local)));
}

/// Parse the date formats the redemption writer is known to produce.
///
/// Date-times without an offset are wall-clock time in `local`; a bare
/// date is midnight UTC.
pub fn parse_date_millis(text: &str, local: &FixedOffset) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let parsed: Option<DateTime<Utc>> = DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .and_then(|naive| local.from_local_datetime(&naive).single())
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        });

    parsed.map(|dt| dt.timestamp_millis() as f64)
}

fn format_millis(ms: f64, offset: &FixedOffset) -> Option<String> {
    if !ms.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .map(|dt| dt.with_timezone(offset).format("%Y-%m-%d %H:%M:%S").to_string())
}
