use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Theme {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
}

/// One row of the session table, as read from the store.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: i64,
    #[serde(deserialize_with = "utc_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "optional_utc_timestamp")]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub theme_id: Option<i64>,
    pub state: i32,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub user_answer: Option<String>,
}

// ===== Row decoding =====
//
// The REST backend hands columns over as JSON text, so rows are decoded with
// the same leniency the Postgres backend gets from its SQL casts.

/// RFC 3339 timestamps, or zone-less ones (`timestamp` columns) read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn utc_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}")))
}

fn optional_utc_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}"))),
        None => Ok(None),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub full_name: String,
    pub theme_name: String,
    pub result: String,
    pub user_answer: String,
}

#[derive(Debug, Serialize)]
pub struct DataPage {
    pub data: Vec<ResultItem>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// A result item as posted back by the caller. Every field is optional since
/// the caller may send partial objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectedAnswer {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub theme_name: Option<String>,
    #[serde(default)]
    pub user_answer: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    pub selected_answers: Vec<SelectedAnswer>,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub provider_configured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn session_accepts_zone_less_timestamps() {
        let session: Session = serde_json::from_str(
            r#"{"id":50,"created_at":"2025-03-01T09:00:00.123456","state":1,"theme_id":7}"#,
        )
        .unwrap();
        assert_eq!(
            session.created_at,
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
                + chrono::Duration::microseconds(123456)
        );
        assert!(session.answered_at.is_none());
        assert!(session.first_name.is_none());
    }

    #[test]
    fn session_accepts_offset_timestamps() {
        let session: Session = serde_json::from_str(
            r#"{"id":51,"created_at":"2025-03-01T12:00:00+03:00","answered_at":"2025-03-01 09:30:00","state":1}"#,
        )
        .unwrap();
        assert_eq!(session.created_at, Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
        assert_eq!(
            session.answered_at,
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap())
        );
    }

    #[test]
    fn session_rejects_garbage_timestamp() {
        let err = serde_json::from_str::<Session>(r#"{"id":52,"created_at":"soon","state":1}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid timestamp"));
    }

    #[test]
    fn short_offsets_parse() {
        assert_eq!(
            parse_timestamp("2025-03-01T09:00:00+00"),
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn theme_null_name_becomes_empty() {
        let theme: Theme = serde_json::from_str(r#"{"id":7,"name":null}"#).unwrap();
        assert_eq!(theme.name, "");
        let theme: Theme = serde_json::from_str(r#"{"id":8}"#).unwrap();
        assert_eq!(theme.name, "");
    }
}
