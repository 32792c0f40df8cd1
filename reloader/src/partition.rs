use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// One `(region, year, month, day)` partition of the CloudTrail table.
///
/// Values are checked on construction, so they can be dropped into SQL
/// literals and S3 keys as they are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PartitionCoordinate {
    region: String,
    year: String,
    month: String,
    day: String,
}

impl PartitionCoordinate {
    pub fn new(region: &str, year: &str, month: &str, day: &str) -> Option<PartitionCoordinate> {
        if is_region(region) && is_digits(year, 4) && is_digits(month, 2) && is_digits(day, 2) {
            Some(PartitionCoordinate {
                region: region.to_string(),
                year: year.to_string(),
                month: month.to_string(),
                day: day.to_string(),
            })
        } else {
            None
        }
    }

    /// Parses one `SHOW PARTITIONS` row, e.g. `region=us-east-1/year=2020/month=03/day=30`.
    pub fn from_partition_spec(spec: &str) -> Option<PartitionCoordinate> {
        let mut keys = HashMap::new();
        for part in spec.trim().split('/') {
            let (k, v) = part.split_once('=')?;
            keys.insert(k, v);
        }
        PartitionCoordinate::new(
            keys.get("region")?,
            keys.get("year")?,
            keys.get("month")?,
            keys.get("day")?,
        )
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn year(&self) -> &str {
        &self.year
    }

    pub fn month(&self) -> &str {
        &self.month
    }

    pub fn day(&self) -> &str {
        &self.day
    }

    /// `None` when the segments don't form a real calendar date.
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(
            self.year.parse().ok()?,
            self.month.parse().ok()?,
            self.day.parse().ok()?,
        )
    }

    /// Partition key values as they appear inside `PARTITION (...)`.
    pub fn key_values(&self) -> String {
        format!(
            "region='{}', year='{}', month='{}', day='{}'",
            self.region, self.year, self.month, self.day
        )
    }
}

impl Display for PartitionCoordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}/{}", self.region, self.year, self.month, self.day)
    }
}

/// Key layout CloudTrail writes into the log bucket:
/// `<log_location>/<account_id>/CloudTrail/<region>/<year>/<month>/<day>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLayout {
    pub bucket: String,
    pub log_location: String,
    pub account_id: String,
}

impl LogLayout {
    pub fn root_prefix(&self) -> String {
        format!("{}/{}/CloudTrail/", self.log_location, self.account_id)
    }

    pub fn prefix(&self, coordinate: &PartitionCoordinate) -> String {
        format!("{}{}/", self.root_prefix(), coordinate)
    }

    pub fn location(&self, coordinate: &PartitionCoordinate) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix(coordinate))
    }
}

pub(crate) fn is_region(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub(crate) fn is_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> LogLayout {
        LogLayout {
            bucket: "trail-bucket".to_string(),
            log_location: "AWSLogs".to_string(),
            account_id: "123456789012".to_string(),
        }
    }

    #[test]
    fn test_rejects_malformed_segments() {
        assert!(PartitionCoordinate::new("us-west-2", "2023", "05", "01").is_some());
        assert!(PartitionCoordinate::new("us-west-2", "23", "05", "01").is_none());
        assert!(PartitionCoordinate::new("us-west-2", "2023", "5", "01").is_none());
        assert!(PartitionCoordinate::new("US-WEST-2", "2023", "05", "01").is_none());
        assert!(PartitionCoordinate::new("us-west-2'", "2023", "05", "01").is_none());
        assert!(PartitionCoordinate::new("", "2023", "05", "01").is_none());
    }

    #[test]
    fn test_parse_partition_spec() {
        let c = PartitionCoordinate::from_partition_spec("region=us-east-1/year=2020/month=03/day=30")
            .unwrap();
        assert_eq!(c, PartitionCoordinate::new("us-east-1", "2020", "03", "30").unwrap());

        // key order doesn't matter, all four keys do
        assert!(PartitionCoordinate::from_partition_spec("year=2020/region=us-east-1/day=30/month=03").is_some());
        assert!(PartitionCoordinate::from_partition_spec("region=us-east-1/year=2020/month=03").is_none());
        assert!(PartitionCoordinate::from_partition_spec("partition").is_none());
    }

    #[test]
    fn test_date() {
        let c = PartitionCoordinate::new("us-east-1", "2024", "02", "29").unwrap();
        assert_eq!(c.date(), NaiveDate::from_ymd_opt(2024, 2, 29));
        let bogus = PartitionCoordinate::new("us-east-1", "2023", "02", "30").unwrap();
        assert_eq!(bogus.date(), None);
    }

    #[test]
    fn test_layout_location() {
        let c = PartitionCoordinate::new("us-west-2", "2023", "05", "01").unwrap();
        assert_eq!(layout().root_prefix(), "AWSLogs/123456789012/CloudTrail/");
        assert_eq!(
            layout().location(&c),
            "s3://trail-bucket/AWSLogs/123456789012/CloudTrail/us-west-2/2023/05/01/"
        );
    }
}
