use crate::partition::{LogLayout, PartitionCoordinate};
use chrono::{Days, NaiveDate};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// Partitions per statement; keeps statements well under Athena's query size limit.
pub const BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Drop,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Add => f.write_str("add"),
            Operation::Drop => f.write_str("drop"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionQuery {
    pub operation: Operation,
    pub sql: String,
    pub coordinates: Vec<PartitionCoordinate>,
}

pub fn show_partitions(table: &str) -> String {
    format!("SHOW PARTITIONS `{}`", table)
}

pub fn add_partitions<'a, I>(table: &str, layout: &LogLayout, coordinates: I) -> Vec<PartitionQuery>
where
    I: IntoIterator<Item = &'a PartitionCoordinate>,
{
    batches(coordinates)
        .into_iter()
        .map(|batch| {
            let specs: Vec<String> = batch
                .iter()
                .map(|c| format!("PARTITION ({}) LOCATION '{}'", c.key_values(), layout.location(c)))
                .collect();
            PartitionQuery {
                operation: Operation::Add,
                sql: format!("ALTER TABLE `{}` ADD IF NOT EXISTS {}", table, specs.join(" ")),
                coordinates: batch,
            }
        })
        .collect()
}

pub fn drop_partitions<'a, I>(table: &str, coordinates: I) -> Vec<PartitionQuery>
where
    I: IntoIterator<Item = &'a PartitionCoordinate>,
{
    batches(coordinates)
        .into_iter()
        .map(|batch| {
            let specs: Vec<String> = batch
                .iter()
                .map(|c| format!("PARTITION ({})", c.key_values()))
                .collect();
            PartitionQuery {
                operation: Operation::Drop,
                sql: format!("ALTER TABLE `{}` DROP IF EXISTS {}", table, specs.join(", ")),
                coordinates: batch,
            }
        })
        .collect()
}

/// First date that is still retained; anything dated before it is expired.
pub fn retention_cutoff(today: NaiveDate, expiration_days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(expiration_days as u64))
        .unwrap_or(NaiveDate::MIN)
}

pub fn expired(partitions: &BTreeSet<PartitionCoordinate>, cutoff: NaiveDate) -> BTreeSet<PartitionCoordinate> {
    partitions
        .iter()
        .filter(|c| matches!(c.date(), Some(date) if date < cutoff))
        .cloned()
        .collect()
}

fn batches<'a, I>(coordinates: I) -> Vec<Vec<PartitionCoordinate>>
where
    I: IntoIterator<Item = &'a PartitionCoordinate>,
{
    let all: Vec<PartitionCoordinate> = coordinates.into_iter().cloned().collect();
    all.chunks(BATCH_SIZE).map(|chunk| chunk.to_vec()).collect()
}
