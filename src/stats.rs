use super::*;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Request for the `stats_json` endpoint polled by the dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsQuery {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub granularity: Option<i64>,
}

impl StatsQuery {
    /// Current values only.
    pub fn snapshot() -> Self {
        Self::default()
    }

    pub fn time_series(start_time: i64, end_time: i64, granularity: i64) -> Self {
        Self {
            start_time: Some(start_time),
            end_time: Some(end_time),
            granularity: Some(granularity),
        }
    }

    /// Path relative to the admin handler, e.g.
    /// `stats_json?start_time=0&end_time=60000&granularity=5000`.
    pub fn path(&self) -> String {
        let params = [
            ("start_time", self.start_time),
            ("end_time", self.end_time),
            ("granularity", self.granularity),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| format!("{name}={value}")))
        .collect::<Vec<_>>();
        if params.is_empty() {
            "stats_json".to_string()
        } else {
            format!("stats_json?{}", params.join("&"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StatsPayload {
    TimeSeries {
        timestamps: Vec<i64>,
        variables: BTreeMap<String, Vec<f64>>,
    },
    Snapshot {
        variables: BTreeMap<String, f64>,
    },
}

impl StatsPayload {
    pub fn variable_names(&self) -> Vec<&str> {
        match self {
            Self::TimeSeries { variables, .. } => variables.keys().map(String::as_str).collect(),
            Self::Snapshot { variables } => variables.keys().map(String::as_str).collect(),
        }
    }

    /// Latest value of `name`.
    pub fn latest(&self, name: &str) -> Option<f64> {
        match self {
            Self::TimeSeries { variables, .. } => variables.get(name)?.last().copied(),
            Self::Snapshot { variables } => variables.get(name).copied(),
        }
    }
}

pub fn parse_stats_json(src: &str) -> Result<StatsPayload> {
    let payload: StatsPayload =
        serde_json::from_str(src).map_err(|err| Error::StatsPayload(err.to_string()))?;
    if let StatsPayload::TimeSeries {
        timestamps,
        variables,
    } = &payload
    {
        if let Some((name, values)) = variables
            .iter()
            .find(|(_, values)| values.len() != timestamps.len())
        {
            return Err(Error::StatsPayload(format!(
                "variable {name} has {} samples for {} timestamps",
                values.len(),
                timestamps.len()
            )));
        }
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_query_paths() {
        assert_eq!(StatsQuery::snapshot().path(), "stats_json");
        assert_eq!(
            StatsQuery::time_series(0, 60_000, 5_000).path(),
            "stats_json?start_time=0&end_time=60000&granularity=5000"
        );
    }

    #[test]
    fn decodes_time_series_and_snapshots() -> Result<()> {
        let series = parse_stats_json(
            r#"{"timestamps":[1,2],"variables":{"cache_hits":[3,4],"cache_misses":[0,1]}}"#,
        )?;
        assert_eq!(series.variable_names(), vec!["cache_hits", "cache_misses"]);
        assert_eq!(series.latest("cache_hits"), Some(4.0));

        let snapshot = parse_stats_json(r#"{"variables":{"cache_hits":7}}"#)?;
        assert!(matches!(snapshot, StatsPayload::Snapshot { .. }));
        assert_eq!(snapshot.latest("cache_hits"), Some(7.0));
        assert_eq!(snapshot.latest("missing"), None);
        Ok(())
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            parse_stats_json(r#"{"timestamps":[1],"variables":{"x":[1,2]}}"#),
            Err(Error::StatsPayload(_))
        ));
        assert!(matches!(
            parse_stats_json(r#"{"vars":{}}"#),
            Err(Error::StatsPayload(_))
        ));
        assert!(matches!(parse_stats_json("not json"), Err(Error::StatsPayload(_))));
    }
}
