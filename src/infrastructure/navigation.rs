use crate::domain::clock;
use crate::domain::models::TimerRecord;
use crate::infrastructure::error::SyncError;
use chrono::{DateTime, Utc};
use url::form_urlencoded;

const ROAST_TIMER_PATH: &str = "/roast-timer";
const ROAST_RECORD_PATH: &str = "/roast-record";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationTarget {
    RoastTimer,
    /// Record creation, pre-filled from the finished session when possible.
    RoastRecord { query: Vec<(String, String)> },
}

impl NavigationTarget {
    /// Pre-fills bean, weight, level and rounded elapsed seconds only when all
    /// metadata is present and the session actually ran.
    pub fn record_from(record: &TimerRecord, now: DateTime<Utc>) -> Self {
        let elapsed = clock::sample(record, now).elapsed;
        let metadata = &record.metadata;
        let query = match (
            metadata.is_complete(),
            metadata.bean_name.as_deref(),
            metadata.weight,
            metadata.roast_level.as_deref(),
        ) {
            (true, Some(bean_name), Some(weight), Some(roast_level)) if elapsed > 0.0 => vec![
                ("beanName".to_string(), bean_name.to_string()),
                ("weight".to_string(), weight.to_string()),
                ("roastLevel".to_string(), roast_level.to_string()),
                ("duration".to_string(), format!("{}", elapsed.round() as u64)),
            ],
            _ => Vec::new(),
        };
        Self::RoastRecord { query }
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        match self {
            Self::RoastTimer => None,
            Self::RoastRecord { query } => query
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
        }
    }

    pub fn to_url_path(&self) -> String {
        match self {
            Self::RoastTimer => ROAST_TIMER_PATH.to_string(),
            Self::RoastRecord { query } if query.is_empty() => ROAST_RECORD_PATH.to_string(),
            Self::RoastRecord { query } => {
                let encoded = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(query.iter())
                    .finish();
                format!("{ROAST_RECORD_PATH}?{encoded}")
            }
        }
    }
}

pub trait NavigationPort: Send + Sync {
    fn navigate(&self, target: &NavigationTarget) -> Result<(), SyncError>;
}

/// Discards navigation; for headless clients.
#[derive(Debug, Default)]
pub struct NoopNavigation;

impl NavigationPort for NoopNavigation {
    fn navigate(&self, target: &NavigationTarget) -> Result<(), SyncError> {
        log::debug!("navigation disabled; dropping {}", target.to_url_path());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub(crate) struct RecordingNavigation {
        pub(crate) targets: Mutex<Vec<NavigationTarget>>,
    }

    impl RecordingNavigation {
        pub(crate) fn targets(&self) -> Vec<NavigationTarget> {
            self.targets.lock().expect("navigation lock").clone()
        }
    }

    impl NavigationPort for RecordingNavigation {
        fn navigate(&self, target: &NavigationTarget) -> Result<(), SyncError> {
            self.targets.lock().expect("navigation lock").push(target.clone());
            Ok(())
        }
    }

    /// Router that rejects every target, counting attempts.
    #[derive(Debug, Default)]
    pub(crate) struct FailingNavigation {
        pub(crate) attempts: Mutex<usize>,
    }

    impl FailingNavigation {
        pub(crate) fn attempts(&self) -> usize {
            *self.attempts.lock().expect("navigation lock")
        }
    }

    impl NavigationPort for FailingNavigation {
        fn navigate(&self, target: &NavigationTarget) -> Result<(), SyncError> {
            *self.attempts.lock().expect("navigation lock") += 1;
            Err(SyncError::Navigation(format!(
                "router unavailable for {}",
                target.to_url_path()
            )))
        }
    }
}
