use std::error::Error;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use plotters::prelude::*;
use tracing::{info, warn};

use crate::dataset_merger::MergedDataset;
use crate::models::{SampleGroup, Sex};
use crate::summary::GroupSummary;

const SERIES_COLORS: [RGBColor; 4] = [RED, MAGENTA, BLUE, CYAN];

/// Points of one (group, sex) series, x in days since `origin`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScatterSeries {
    pub group: SampleGroup,
    pub sex: Sex,
    pub points: Vec<(f64, f64)>,
}

/// Splits the dataset into the four (group, sex) series; empty series are
/// kept so colours stay stable between runs.
pub fn scatter_series(dataset: &MergedDataset) -> Option<(NaiveDate, Vec<ScatterSeries>)> {
    let origin = dataset
        .records()
        .iter()
        .map(|r| r.record.date_of_experiment)
        .min()?;

    let series = SampleGroup::ALL
        .iter()
        .flat_map(|&group| Sex::ALL.iter().map(move |&sex| (group, sex)))
        .map(|(group, sex)| ScatterSeries {
            group,
            sex,
            points: dataset
                .records()
                .iter()
                .map(|r| &r.record)
                .filter(|r| r.biological_sample_group == group && r.sex == sex)
                .map(|r| {
                    let days = (r.date_of_experiment - origin).num_days() as f64;
                    (days, r.data_point)
                })
                .collect(),
        })
        .collect();

    Some((origin, series))
}

fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let pad = ((hi - lo) * 0.1).max(1.0);
    (lo - pad, hi + pad)
}

/// Data points against date of experiment, one colour per group and sex.
pub fn scatter_by_date(dataset: &MergedDataset, output_path: &Path, title: &str) -> Result<(), Box<dyn Error>> {
    let Some((origin, series)) = scatter_series(dataset) else {
        warn!("No data points to plot for {}", title);
        return Ok(());
    };

    let all_points = || series.iter().flat_map(|s| s.points.iter().copied());
    let (x_min, x_max) = padded_range(all_points().map(|(x, _)| x));
    let (y_min, y_max) = padded_range(all_points().map(|(_, y)| y));

    let root_area = BitMapBackend::new(output_path, (1000, 600)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root_area)
        .margin(25)
        .caption(title, ("sans-serif", 20))
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    let date_label = |x: &f64| {
        (origin + Duration::days(x.round() as i64))
            .format("%Y-%m-%d")
            .to_string()
    };
    chart
        .configure_mesh()
        .x_desc("Date of experiment")
        .y_desc("Data point")
        .x_label_formatter(&date_label)
        .draw()?;

    for (s, color) in series.iter().zip(SERIES_COLORS) {
        if s.points.is_empty() {
            continue;
        }
        chart
            .draw_series(s.points.iter().map(|&(x, y)| Circle::new((x, y), 4, color.filled())))?
            .label(format!("{} {}", s.group, s.sex))
            .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root_area.present()?;
    info!("Scatter plot saved to {}", output_path.display());
    Ok(())
}

/// Bar chart of group means, split by sex within each sample group.
pub fn mean_bars(summary: &GroupSummary, output_path: &Path, title: &str) -> Result<(), Box<dyn Error>> {
    let groups = summary.groups();
    let labels: Vec<String> = groups
        .iter()
        .map(|(group, sex, _)| format!("{} {}", group, sex))
        .collect();
    let means: Vec<(u32, f64)> = groups
        .iter()
        .enumerate()
        .filter_map(|(i, (_, _, stats))| stats.mean.map(|m| (i as u32, m)))
        .collect();
    if means.is_empty() {
        warn!("No group means to plot for {}", title);
        return Ok(());
    }

    let y_max = means.iter().map(|&(_, m)| m).fold(0.0, f64::max) * 1.1;
    let y_min = means.iter().map(|&(_, m)| m).fold(0.0, f64::min) * 1.1;

    let root_area = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root_area)
        .margin(25)
        .caption(title, ("sans-serif", 20))
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d((0u32..groups.len() as u32).into_segmented(), y_min..y_max)?;

    let group_label = |v: &SegmentValue<u32>| match v {
        SegmentValue::CenterOf(i) => labels.get(*i as usize).cloned().unwrap_or_default(),
        _ => String::new(),
    };
    chart
        .configure_mesh()
        .disable_x_mesh()
        .y_desc("Mean data point")
        .x_label_formatter(&group_label)
        .draw()?;

    chart.draw_series(
        Histogram::vertical(&chart)
            .style(BLUE.mix(0.5).filled())
            .margin(20)
            .data(means.iter().copied()),
    )?;

    root_area.present()?;
    info!("Bar chart saved to {}", output_path.display());
    Ok(())
}

/// Writes both charts into `dir` and returns their paths.
pub fn render_all(
    dataset: &MergedDataset,
    summary: &GroupSummary,
    dir: &Path,
    prefix: &str,
    title: &str,
) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    std::fs::create_dir_all(dir)?;

    let scatter = dir.join(format!("{}_scatter.png", prefix));
    scatter_by_date(dataset, &scatter, title)?;

    let bars = dir.join(format!("{}_means.png", prefix));
    mean_bars(summary, &bars, title)?;

    Ok(vec![scatter, bars])
}
