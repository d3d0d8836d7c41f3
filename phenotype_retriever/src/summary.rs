// src/summary.rs

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use statrs::statistics::Statistics;

use crate::dataset_merger::MergedDataset;
use crate::models::{SampleGroup, Sex};

/// Descriptive statistics of `data_point` for one (group, sex) cell.
/// Statistics are `None` when there is nothing to describe, never NaN or zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroupStats {
    pub count: usize,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl GroupStats {
    pub const ABSENT: GroupStats = GroupStats {
        count: 0,
        mean: None,
        std_dev: None,
        min: None,
        max: None,
    };

    fn from_values(values: &[f64]) -> GroupStats {
        if values.is_empty() {
            return GroupStats::ABSENT;
        }
        let finite = |v: f64| Some(v).filter(|v| v.is_finite());

        GroupStats {
            count: values.len(),
            mean: finite(Statistics::mean(values.iter())),
            // sample standard deviation; undefined for a single value
            std_dev: if values.len() > 1 {
                finite(Statistics::std_dev(values.iter()))
            } else {
                None
            },
            min: finite(Statistics::min(values.iter())),
            max: finite(Statistics::max(values.iter())),
        }
    }
}

/// Statistics keyed by (biological sample group, sex). Only combinations
/// present in the data are stored.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupSummary {
    groups: BTreeMap<(SampleGroup, Sex), GroupStats>,
}

impl GroupSummary {
    pub fn get(&self, group: SampleGroup, sex: Sex) -> Option<&GroupStats> {
        self.groups.get(&(group, sex))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The combinations present in the data.
    pub fn present(&self) -> impl Iterator<Item = (SampleGroup, Sex, &GroupStats)> {
        self.groups.iter().map(|(&(group, sex), stats)| (group, sex, stats))
    }

    /// All four combinations in a fixed order; absent ones have a zero count
    /// and no statistics.
    pub fn groups(&self) -> Vec<(SampleGroup, Sex, GroupStats)> {
        SampleGroup::ALL
            .iter()
            .flat_map(|&group| Sex::ALL.iter().map(move |&sex| (group, sex)))
            .map(|(group, sex)| {
                let stats = self.get(group, sex).copied().unwrap_or(GroupStats::ABSENT);
                (group, sex, stats)
            })
            .collect()
    }

    /// Experimental mean minus control mean for one sex, when both exist.
    pub fn mean_difference(&self, sex: Sex) -> Option<f64> {
        let experimental = self.get(SampleGroup::Experimental, sex)?.mean?;
        let control = self.get(SampleGroup::Control, sex)?.mean?;
        Some(experimental - control)
    }
}

impl fmt::Display for GroupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.3}", v));

        writeln!(
            f,
            "{:<14}{:<8}{:>7}{:>12}{:>12}{:>12}{:>12}",
            "group", "sex", "count", "mean", "std_dev", "min", "max"
        )?;
        for (group, sex, stats) in self.groups() {
            writeln!(
                f,
                "{:<14}{:<8}{:>7}{:>12}{:>12}{:>12}{:>12}",
                group.as_str(),
                sex.as_str(),
                stats.count,
                cell(stats.mean),
                cell(stats.std_dev),
                cell(stats.min),
                cell(stats.max)
            )?;
        }
        Ok(())
    }
}

/// Groups the merged dataset by (sample group, sex) and describes each group.
pub fn summarize(dataset: &MergedDataset) -> GroupSummary {
    let mut values: BTreeMap<(SampleGroup, Sex), Vec<f64>> = BTreeMap::new();
    for merged in dataset.records() {
        let record = &merged.record;
        values
            .entry((record.biological_sample_group, record.sex))
            .or_default()
            .push(record.data_point);
    }

    GroupSummary {
        groups: values
            .into_iter()
            .map(|(key, values)| (key, GroupStats::from_values(&values)))
            .collect(),
    }
}
