use chrono::DateTime;
use chrono::Utc;
use std::path::PathBuf;

pub const INSIGHTS_DB_FILENAME: &str = "insights.sqlite";

/// Resolve the database location: `$INSIGHTS_HOME/insights.sqlite`, then
/// `~/.insights/insights.sqlite`, then `.insights/insights.sqlite`.
pub fn default_db_path() -> PathBuf {
    let home = std::env::var_os("INSIGHTS_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".insights")))
        .unwrap_or_else(|| PathBuf::from(".insights"));
    home.join(INSIGHTS_DB_FILENAME)
}

pub(crate) fn datetime_to_epoch_millis(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

pub(crate) fn epoch_millis_to_datetime(millis: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| anyhow::anyhow!("invalid unix timestamp (ms): {millis}"))
}
