use serde::{Deserialize, Serialize};

const MIN_RECOMMENDED_SECONDS: u32 = 60;
const MIN_MATCHING_RECORDS: usize = 2;

/// A finished roast as kept in the roast log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoastRecord {
    pub id: String,
    pub bean_name: String,
    pub weight: u32,
    pub roast_level: String,
    pub duration: u32,
    pub roast_date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationRecommendation {
    pub average_duration: u32,
    pub recommended_duration: u32,
}

/// Suggests a timer duration from past roasts of the same bean, weight and
/// level: the rounded average minus the walk to the roast room, never below a
/// minute. Needs at least two matching roasts.
pub fn recommend_duration(
    records: &[RoastRecord],
    bean_name: &str,
    weight: u32,
    roast_level: &str,
    go_to_roast_room_seconds: u32,
) -> Option<DurationRecommendation> {
    let durations = records
        .iter()
        .filter(|record| {
            record.bean_name == bean_name
                && record.weight == weight
                && record.roast_level == roast_level
        })
        .map(|record| u64::from(record.duration))
        .collect::<Vec<_>>();

    if durations.len() < MIN_MATCHING_RECORDS {
        return None;
    }

    let total: u64 = durations.iter().sum();
    let average = (total as f64 / durations.len() as f64).round() as u32;
    let recommended = average
        .saturating_sub(go_to_roast_room_seconds)
        .max(MIN_RECOMMENDED_SECONDS);

    Some(DurationRecommendation {
        average_duration: average,
        recommended_duration: recommended,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(bean: &str, weight: u32, level: &str, duration: u32) -> RoastRecord {
        RoastRecord {
            id: format!("rec-{bean}-{duration}"),
            bean_name: bean.to_string(),
            weight,
            roast_level: level.to_string(),
            duration,
            roast_date: "2026-10-17".to_string(),
        }
    }

    #[test]
    fn requires_two_matching_records() {
        let records = vec![
            record("Guji", 300, "medium", 600),
            record("Guji", 500, "medium", 700),
        ];
        assert_eq!(recommend_duration(&records, "Guji", 300, "medium", 60), None);
    }

    #[test]
    fn averages_and_subtracts_walk_time() {
        let records = vec![
            record("Guji", 300, "medium", 600),
            record("Guji", 300, "medium", 661),
            record("Santos", 300, "medium", 900),
        ];
        let recommendation =
            recommend_duration(&records, "Guji", 300, "medium", 60).expect("two matches");

        assert_eq!(recommendation.average_duration, 631);
        assert_eq!(recommendation.recommended_duration, 571);
    }

    #[test]
    fn recommendation_is_floored_at_one_minute() {
        let records = vec![
            record("Guji", 200, "light", 90),
            record("Guji", 200, "light", 100),
        ];
        let recommendation =
            recommend_duration(&records, "Guji", 200, "light", 120).expect("two matches");
        assert_eq!(recommendation.recommended_duration, 60);
    }
}
