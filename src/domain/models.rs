use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
}

impl TimerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Externally visible cursor of the post-completion dialog flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DialogState {
    #[default]
    None,
    Completion,
    ContinuousRoast,
    AfterPurge,
}

impl DialogState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Completion => "completion",
            Self::ContinuousRoast => "continuousRoast",
            Self::AfterPurge => "afterPurge",
        }
    }

    /// Accepts the stored spelling and `null`/missing as `None`.
    pub fn parse(value: Option<&Value>) -> Option<Self> {
        match value {
            None | Some(Value::Null) => Some(Self::None),
            Some(Value::String(raw)) => match raw.trim() {
                "" | "none" => Some(Self::None),
                "completion" => Some(Self::Completion),
                "continuousRoast" => Some(Self::ContinuousRoast),
                "afterPurge" => Some(Self::AfterPurge),
                _ => None,
            },
            Some(_) => None,
        }
    }

    /// Position in the flow; used to ignore stale echoes that would move a
    /// visible dialog backwards.
    pub fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Completion => 1,
            Self::ContinuousRoast => 2,
            Self::AfterPurge => 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoastMetadata {
    pub bean_name: Option<String>,
    pub weight: Option<u32>,
    pub roast_level: Option<String>,
}

impl RoastMetadata {
    pub fn new(
        bean_name: impl Into<String>,
        weight: u32,
        roast_level: impl Into<String>,
    ) -> Self {
        Self {
            bean_name: Some(bean_name.into()),
            weight: Some(weight),
            roast_level: Some(roast_level.into()),
        }
    }

    /// True when every field is present and non-empty.
    pub fn is_complete(&self) -> bool {
        let bean = self
            .bean_name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let level = self
            .roast_level
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        bean.is_some() && level.is_some() && self.weight.is_some_and(|weight| weight > 0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimerRecord {
    pub status: TimerStatus,
    pub start_reference: Option<DateTime<Utc>>,
    pub accumulated_elapsed: f64,
    pub duration: f64,
    pub dialog_state: DialogState,
    #[serde(flatten)]
    pub metadata: RoastMetadata,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub triggered_by_device_id: Option<String>,
    pub completed_by_device_id: Option<String>,
}

impl TimerRecord {
    /// Lenient decode of a remote document. Missing or malformed fields fall
    /// back to their defaults and the status/dialog invariants are re-applied.
    pub fn from_document(document: &Value) -> Self {
        let Some(object) = document.as_object() else {
            if !document.is_null() {
                log::warn!("timer document is not an object; using idle defaults");
            }
            return Self::default();
        };

        let status = match object.get("status").and_then(Value::as_str) {
            Some(raw) => TimerStatus::parse(raw).unwrap_or_else(|| {
                log::warn!("unknown timer status '{raw}'; defaulting to idle");
                TimerStatus::Idle
            }),
            None => TimerStatus::Idle,
        };
        let dialog_state = DialogState::parse(object.get("dialogState")).unwrap_or_else(|| {
            log::warn!("unknown dialog state in timer document; defaulting to none");
            DialogState::None
        });

        let record = Self {
            status,
            start_reference: read_datetime(object.get("startReference")),
            accumulated_elapsed: read_seconds(object.get("accumulatedElapsed")),
            duration: read_seconds(object.get("duration")),
            dialog_state,
            metadata: RoastMetadata {
                bean_name: read_string(object.get("beanName")),
                weight: object
                    .get("weight")
                    .and_then(Value::as_u64)
                    .and_then(|value| u32::try_from(value).ok()),
                roast_level: read_string(object.get("roastLevel")),
            },
            last_updated_at: read_datetime(object.get("lastUpdatedAt")),
            triggered_by_device_id: read_string(object.get("triggeredByDeviceId")),
            completed_by_device_id: read_string(object.get("completedByDeviceId")),
        };
        record.normalized()
    }

    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Re-establishes `startReference <=> running` and `dialog => completed`.
    pub fn normalized(mut self) -> Self {
        match (self.status, self.start_reference) {
            (TimerStatus::Running, None) => {
                log::warn!("running timer without start reference; treating as paused");
                self.status = TimerStatus::Paused;
            }
            (TimerStatus::Running, Some(_)) => {}
            (_, Some(_)) => self.start_reference = None,
            (_, None) => {}
        }
        if self.dialog_state != DialogState::None && self.status != TimerStatus::Completed {
            self.dialog_state = DialogState::None;
        }
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if (self.status == TimerStatus::Running) != self.start_reference.is_some() {
            return Err("timer.start_reference must be set exactly while running".to_string());
        }
        if self.dialog_state != DialogState::None && self.status != TimerStatus::Completed {
            return Err("timer.dialog_state requires status completed".to_string());
        }
        if !self.accumulated_elapsed.is_finite() || self.accumulated_elapsed < 0.0 {
            return Err("timer.accumulated_elapsed must be >= 0".to_string());
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err("timer.duration must be >= 0".to_string());
        }
        Ok(())
    }

    pub fn started(
        &self,
        duration: f64,
        metadata: RoastMetadata,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if !matches!(self.status, TimerStatus::Idle | TimerStatus::Completed) {
            return None;
        }
        Some(Self {
            status: TimerStatus::Running,
            start_reference: Some(now),
            accumulated_elapsed: 0.0,
            duration: duration.max(0.0),
            dialog_state: DialogState::None,
            metadata,
            last_updated_at: Some(now),
            triggered_by_device_id: Some(device_id.to_string()),
            completed_by_device_id: None,
        })
    }

    pub fn paused(&self, device_id: &str, now: DateTime<Utc>) -> Option<Self> {
        if self.status != TimerStatus::Running {
            return None;
        }
        let elapsed = crate::domain::clock::sample(self, now).elapsed;
        Some(Self {
            status: TimerStatus::Paused,
            start_reference: None,
            accumulated_elapsed: elapsed,
            last_updated_at: Some(now),
            triggered_by_device_id: Some(device_id.to_string()),
            ..self.clone()
        })
    }

    pub fn resumed(&self, device_id: &str, now: DateTime<Utc>) -> Option<Self> {
        if self.status != TimerStatus::Paused {
            return None;
        }
        Some(Self {
            status: TimerStatus::Running,
            start_reference: Some(now),
            last_updated_at: Some(now),
            triggered_by_device_id: Some(device_id.to_string()),
            ..self.clone()
        })
    }

    /// Completion banks the full target duration so every client that detects
    /// it writes the same record.
    pub fn completed(&self, device_id: &str, now: DateTime<Utc>) -> Option<Self> {
        if !matches!(self.status, TimerStatus::Running | TimerStatus::Paused) {
            return None;
        }
        Some(Self {
            status: TimerStatus::Completed,
            start_reference: None,
            accumulated_elapsed: self.duration,
            dialog_state: DialogState::Completion,
            last_updated_at: Some(now),
            completed_by_device_id: Some(device_id.to_string()),
            ..self.clone()
        })
    }

    pub fn with_dialog_state(&self, dialog_state: DialogState, now: DateTime<Utc>) -> Option<Self> {
        if self.status != TimerStatus::Completed {
            return None;
        }
        Some(Self {
            dialog_state,
            last_updated_at: Some(now),
            ..self.clone()
        })
    }

    pub fn reset_at(now: DateTime<Utc>) -> Self {
        Self {
            last_updated_at: Some(now),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: String,
    pub time: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
}

impl ScheduleEntry {
    /// Builds an empty entry from raw hour/minute input fields.
    pub fn at(hour_input: &str, minute_input: &str, order: u32) -> Result<Self, String> {
        let hour_input = hour_input.trim();
        if hour_input.is_empty() {
            return Err("entry.hour is required".to_string());
        }
        let hour = hour_input
            .parse::<u8>()
            .ok()
            .filter(|hour| *hour <= 23)
            .ok_or_else(|| "entry.hour must be 0-23".to_string())?;

        let minute_input = minute_input.trim();
        let minute = if minute_input.is_empty() {
            0
        } else {
            minute_input
                .parse::<u8>()
                .ok()
                .filter(|minute| *minute <= 59)
                .ok_or_else(|| "entry.minute must be 0-59".to_string())?
        };

        Ok(Self {
            id: next_id("time"),
            time: format!("{hour:02}:{minute:02}"),
            content: String::new(),
            memo: None,
            order: Some(order),
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "entry.id")?;
        validate_hhmm(&self.time, "entry.time")
    }

    pub fn apply(&self, changes: &EntryChanges) -> Result<Self, String> {
        let updated = Self {
            time: changes
                .time
                .as_deref()
                .map(str::trim)
                .map_or_else(|| self.time.clone(), ToOwned::to_owned),
            content: changes.content.clone().unwrap_or_else(|| self.content.clone()),
            memo: changes.memo.clone().unwrap_or_else(|| self.memo.clone()),
            ..self.clone()
        };
        updated.validate()?;
        Ok(updated)
    }
}

/// Partial edit of a schedule entry; `None` leaves a field as it is.
/// `memo: Some(None)` clears the memo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryChanges {
    pub time: Option<String>,
    pub content: Option<String>,
    pub memo: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TodaySchedule {
    pub id: String,
    pub date: String,
    pub time_labels: Vec<ScheduleEntry>,
}

impl TodaySchedule {
    pub fn empty(date: &str) -> Self {
        Self {
            id: format!("schedule-{date}"),
            date: date.to_string(),
            time_labels: Vec::new(),
        }
    }

    /// Lenient decode; entries that fail to parse are dropped.
    pub fn from_document(date: &str, document: Option<&Value>) -> Self {
        let Some(object) = document.and_then(Value::as_object) else {
            return Self::empty(date);
        };
        let id = read_string(object.get("id")).unwrap_or_else(|| format!("schedule-{date}"));
        let time_labels = object
            .get("timeLabels")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        serde_json::from_value::<ScheduleEntry>(entry.clone())
                            .map_err(|error| log::warn!("dropping malformed schedule entry: {error}"))
                            .ok()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id,
            date: date.to_string(),
            time_labels,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "schedule.id")?;
        validate_date(&self.date, "schedule.date")?;
        for entry in &self.time_labels {
            entry.validate()?;
        }
        Ok(())
    }
}

fn read_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn read_seconds(value: Option<&Value>) -> f64 {
    value
        .and_then(Value::as_f64)
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .unwrap_or(0.0)
}

fn read_datetime(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_hhmm(value: &str, field_name: &str) -> Result<(), String> {
    let mut split = value.split(':');
    let Some(hour_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    let Some(minute_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    if split.next().is_some() {
        return Err(format!("{field_name} must be HH:MM"));
    }

    let hour = hour_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    let minute = minute_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    if hour > 23 || minute > 59 {
        return Err(format!("{field_name} must be HH:MM"));
    }
    Ok(())
}

fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}
