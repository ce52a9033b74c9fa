use std::collections::VecDeque;
use std::path::Path;

use tracing::info;

use common::Sample;

/// Fixed telemetry channels kept for every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Sense,
    Command,
    Midori,
    Encoder,
    Enable,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Sense,
        Channel::Command,
        Channel::Midori,
        Channel::Encoder,
        Channel::Enable,
    ];

    pub fn header(self) -> &'static str {
        match self {
            Channel::Sense => "Sense [V]",
            Channel::Command => "Command [V]",
            Channel::Midori => "Midori [V]",
            Channel::Encoder => "Encoder [counts]",
            Channel::Enable => "Enable",
        }
    }
}

#[derive(Debug, Clone)]
struct PlotSeries {
    label: String,
    values: VecDeque<f64>,
}

/// Rolling per-channel history of received telemetry, aligned by index.
///
/// Every series holds the same number of entries: a user plot label that is
/// missing from a sample repeats its last value, and a label seen for the
/// first time is back-filled with its first value.
#[derive(Debug, Clone)]
pub struct RollingBuffers {
    capacity: usize,
    time: VecDeque<f64>,
    channels: [VecDeque<f64>; 5],
    plots: Vec<PlotSeries>,
    paused: bool,
}

fn push_bounded(buffer: &mut VecDeque<f64>, value: f64, capacity: usize) {
    if buffer.len() == capacity {
        buffer.pop_front();
    }
    buffer.push_back(value);
}

impl RollingBuffers {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            time: VecDeque::with_capacity(capacity),
            channels: std::array::from_fn(|_| VecDeque::with_capacity(capacity)),
            plots: Vec::new(),
            paused: false,
        }
    }

    /// Appends one sample. Returns `false` without recording while paused.
    pub fn push(&mut self, sample: &Sample) -> bool {
        if self.paused {
            return false;
        }
        let cap = self.capacity;
        let previous_len = self.time.len();
        push_bounded(&mut self.time, sample.time, cap);
        let values = [
            sample.sense,
            sample.command,
            sample.midori,
            f64::from(sample.encoder),
            if sample.enable { 1.0 } else { 0.0 },
        ];
        for (buffer, value) in self.channels.iter_mut().zip(values) {
            push_bounded(buffer, value, cap);
        }

        for point in &sample.plots {
            if !self.plots.iter().any(|series| series.label == point.label) {
                self.plots.push(PlotSeries {
                    label: point.label.clone(),
                    values: std::iter::repeat(point.value).take(previous_len).collect(),
                });
            }
        }
        for series in &mut self.plots {
            let value = sample
                .plots
                .iter()
                .find(|point| point.label == series.label)
                .map(|point| point.value)
                .or_else(|| series.values.back().copied())
                .unwrap_or(0.0);
            push_bounded(&mut series.values, value, cap);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn time(&self) -> &VecDeque<f64> {
        &self.time
    }

    pub fn channel(&self, channel: Channel) -> &VecDeque<f64> {
        &self.channels[channel as usize]
    }

    pub fn plot(&self, label: &str) -> Option<&VecDeque<f64>> {
        self.plots
            .iter()
            .find(|series| series.label == label)
            .map(|series| &series.values)
    }

    pub fn plot_labels(&self) -> impl Iterator<Item = &str> {
        self.plots.iter().map(|series| series.label.as_str())
    }

    /// `[time, value]` pairs, oldest first, ready for plotting.
    pub fn points(&self, values: &VecDeque<f64>) -> Vec<[f64; 2]> {
        self.time.iter().zip(values).map(|(t, v)| [*t, *v]).collect()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn clear(&mut self) {
        self.time.clear();
        for buffer in &mut self.channels {
            buffer.clear();
        }
        self.plots.clear();
    }

    /// Writes the whole history, oldest row first. Returns the number of
    /// data rows written.
    pub fn export_csv(&self, path: impl AsRef<Path>) -> Result<usize, csv::Error> {
        let path = path.as_ref();
        let mut wtr = csv::Writer::from_path(path)?;

        let mut header = vec!["Time [s]".to_string()];
        header.extend(Channel::ALL.iter().map(|c| c.header().to_string()));
        header.extend(self.plots.iter().map(|series| series.label.clone()));
        wtr.write_record(&header)?;

        for row in 0..self.len() {
            let mut record = Vec::with_capacity(header.len());
            record.push(self.time[row].to_string());
            record.extend(self.channels.iter().map(|buffer| buffer[row].to_string()));
            record.extend(self.plots.iter().map(|series| series.values[row].to_string()));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        info!("Saved {} records to {}", self.len(), path.display());
        Ok(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::PlotPoint;

    fn sample(tick: i32, plots: &[(&str, f64)]) -> Sample {
        Sample {
            tick,
            time: f64::from(tick) * 0.001,
            sense: 0.5,
            command: -1.25,
            midori: 2.5,
            encoder: tick * 2,
            enable: tick % 2 == 0,
            plots: plots
                .iter()
                .map(|(label, value)| PlotPoint {
                    label: label.to_string(),
                    value: *value,
                })
                .collect(),
        }
    }

    #[test]
    fn oldest_entries_roll_off() {
        let mut history = RollingBuffers::new(3);
        for tick in 0..5 {
            history.push(&sample(tick, &[]));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.channel(Channel::Encoder), &VecDeque::from(vec![4.0, 6.0, 8.0]));
        assert_eq!(history.channel(Channel::Enable), &VecDeque::from(vec![1.0, 0.0, 1.0]));
    }

    #[test]
    fn plot_series_stay_aligned() {
        let mut history = RollingBuffers::new(10);
        history.push(&sample(0, &[("a", 1.0)]));
        history.push(&sample(1, &[("b", 5.0)]));
        history.push(&sample(2, &[("a", 3.0)]));

        assert_eq!(history.plot("a").unwrap(), &VecDeque::from(vec![1.0, 1.0, 3.0]));
        assert_eq!(history.plot("b").unwrap(), &VecDeque::from(vec![5.0, 5.0, 5.0]));
        assert_eq!(history.plot_labels().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(history.plot("c").is_none());
    }

    #[test]
    fn paused_history_ignores_samples() {
        let mut history = RollingBuffers::new(10);
        history.set_paused(true);
        assert!(!history.push(&sample(0, &[])));
        assert!(history.is_empty());
        history.set_paused(false);
        assert!(history.push(&sample(1, &[])));
        assert_eq!(history.len(), 1);
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn csv_export_has_header_and_rows() {
        let mut history = RollingBuffers::new(10);
        history.push(&sample(1, &[("error", 0.25)]));
        history.push(&sample(2, &[("error", -0.5)]));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        assert_eq!(history.export_csv(&path).unwrap(), 2);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(
            header,
            vec![
                "Time [s]",
                "Sense [V]",
                "Command [V]",
                "Midori [V]",
                "Encoder [counts]",
                "Enable",
                "error"
            ]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][4], "4");
        assert_eq!(&rows[1][5], "1");
        assert_eq!(&rows[1][6], "-0.5");
    }
}
