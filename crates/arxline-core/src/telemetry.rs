//! Run telemetry: counters, stage timings and per-paper size samples.
//!
//! Every method is infallible. A poisoned lock is recovered rather than
//! propagated, since telemetry must never change what the pipeline does.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use serde::Serialize;

use crate::progress::{fmt_mib, fmt_num};

/// Named counters reported in `performance_report.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Counter {
    TotalPapers,
    SuccessfulPapers,
    SkippedPapers,
    FailedPapers,
    DownloadFailures,
    ExtractionFailures,
    BibFilesSkipped,
    TexFilesWritten,
    VersionsCollected,
    FiguresRemoved,
    MetadataFilesWritten,
    ReferencesFilesWritten,
    TotalReferences,
    SuccessfulReferences,
    FailedReferences,
    HttpRequests,
}

impl Counter {
    pub const ALL: [Counter; 16] = [
        Counter::TotalPapers,
        Counter::SuccessfulPapers,
        Counter::SkippedPapers,
        Counter::FailedPapers,
        Counter::DownloadFailures,
        Counter::ExtractionFailures,
        Counter::BibFilesSkipped,
        Counter::TexFilesWritten,
        Counter::VersionsCollected,
        Counter::FiguresRemoved,
        Counter::MetadataFilesWritten,
        Counter::ReferencesFilesWritten,
        Counter::TotalReferences,
        Counter::SuccessfulReferences,
        Counter::FailedReferences,
        Counter::HttpRequests,
    ];

    /// Snake-case key used in the JSON report
    pub fn key(self) -> &'static str {
        match self {
            Counter::TotalPapers => "total_papers",
            Counter::SuccessfulPapers => "successful_papers",
            Counter::SkippedPapers => "skipped_papers",
            Counter::FailedPapers => "failed_papers",
            Counter::DownloadFailures => "download_failures",
            Counter::ExtractionFailures => "extraction_failures",
            Counter::BibFilesSkipped => "bib_files_skipped",
            Counter::TexFilesWritten => "tex_files_written",
            Counter::VersionsCollected => "versions_collected",
            Counter::FiguresRemoved => "figures_removed",
            Counter::MetadataFilesWritten => "metadata_files_written",
            Counter::ReferencesFilesWritten => "references_files_written",
            Counter::TotalReferences => "total_references",
            Counter::SuccessfulReferences => "successful_references",
            Counter::FailedReferences => "failed_references",
            Counter::HttpRequests => "http_requests",
        }
    }
}

/// Bytes of one paper's extracted source before and after figure stripping
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SizeSample {
    pub bytes_before_strip: u64,
    pub bytes_after_strip: u64,
}

#[derive(Debug, Default)]
struct Inner {
    counters: BTreeMap<Counter, u64>,
    stage_times: BTreeMap<String, Duration>,
    sizes: Vec<SizeSample>,
    figure_bytes_freed: u64,
    network_time: Duration,
}

/// Mutex-guarded telemetry sink shared across workers and stages.
#[derive(Debug)]
pub struct Telemetry {
    started: Instant,
    inner: Mutex<Inner>,
}

/// Shared handle passed to every stage
pub type SharedTelemetry = Arc<Telemetry>;

impl Telemetry {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn shared() -> SharedTelemetry {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        if n == 0 {
            return;
        }
        *self.lock().counters.entry(counter).or_default() += n;
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.lock().counters.get(&counter).copied().unwrap_or(0)
    }

    /// Overwrite a counter with a value recomputed from disk.
    pub fn set(&self, counter: Counter, value: u64) {
        self.lock().counters.insert(counter, value);
    }

    pub fn record_stage(&self, stage: &str, elapsed: Duration) {
        log::info!("Stage '{stage}' completed in {:.2}s", elapsed.as_secs_f64());
        self.lock().stage_times.insert(stage.to_string(), elapsed);
    }

    pub fn record_sizes(&self, sample: SizeSample) {
        let mut inner = self.lock();
        inner.figure_bytes_freed += sample
            .bytes_before_strip
            .saturating_sub(sample.bytes_after_strip);
        inner.sizes.push(sample);
    }

    pub fn record_network(&self, elapsed: Duration) {
        let mut inner = self.lock();
        inner.network_time += elapsed;
        *inner.counters.entry(Counter::HttpRequests).or_default() += 1;
    }

    /// Snapshot the current state as a serializable report.
    pub fn report(&self) -> Report {
        let inner = self.lock();
        let total_time = self.started.elapsed().as_secs_f64();
        let counters = Counter::ALL
            .iter()
            .map(|c| (c.key().to_string(), inner.counters.get(c).copied().unwrap_or(0)))
            .collect();
        let stage_times = inner
            .stage_times
            .iter()
            .map(|(k, v)| (k.clone(), v.as_secs_f64()))
            .collect();

        let n = inner.sizes.len() as u64;
        let before: u64 = inner.sizes.iter().map(|s| s.bytes_before_strip).sum();
        let after: u64 = inner.sizes.iter().map(|s| s.bytes_after_strip).sum();

        Report {
            total_time_seconds: total_time,
            total_time_minutes: total_time / 60.0,
            counters,
            stage_times,
            network_time_seconds: inner.network_time.as_secs_f64(),
            size_samples: n,
            avg_bytes_before_strip: before.checked_div(n).unwrap_or(0),
            avg_bytes_after_strip: after.checked_div(n).unwrap_or(0),
            figure_bytes_freed: inner.figure_bytes_freed,
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable run summary written to `performance_report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub total_time_seconds: f64,
    pub total_time_minutes: f64,
    #[serde(flatten)]
    pub counters: BTreeMap<String, u64>,
    pub stage_times: BTreeMap<String, f64>,
    pub network_time_seconds: f64,
    pub size_samples: u64,
    pub avg_bytes_before_strip: u64,
    pub avg_bytes_after_strip: u64,
    pub figure_bytes_freed: u64,
}

impl Report {
    fn counter(&self, c: Counter) -> u64 {
        self.counters.get(c.key()).copied().unwrap_or(0)
    }

    /// Write the report atomically.
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        crate::atomic::write_json_atomic(path, self)
    }

    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Run Summary")
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
            ]);

        let total = self.counter(Counter::TotalPapers);
        let ok = self.counter(Counter::SuccessfulPapers);
        table.add_row(vec![
            Cell::new("Papers"),
            Cell::new(format!(
                "{} ok / {} skipped / {} failed of {}",
                fmt_num(ok as usize),
                fmt_num(self.counter(Counter::SkippedPapers) as usize),
                fmt_num(self.counter(Counter::FailedPapers) as usize),
                fmt_num(total as usize),
            )),
        ]);
        table.add_row(vec![
            Cell::new("Success rate"),
            Cell::new(format!("{:.1}%", pct(ok, total))),
        ]);
        for c in [
            Counter::VersionsCollected,
            Counter::TexFilesWritten,
            Counter::BibFilesSkipped,
            Counter::FiguresRemoved,
            Counter::DownloadFailures,
            Counter::ExtractionFailures,
            Counter::MetadataFilesWritten,
            Counter::ReferencesFilesWritten,
            Counter::TotalReferences,
            Counter::HttpRequests,
        ] {
            table.add_row(vec![
                Cell::new(c.key().replace('_', " ")),
                Cell::new(fmt_num(self.counter(c) as usize)),
            ]);
        }
        table.add_row(vec![
            Cell::new("Figure bytes freed"),
            Cell::new(fmt_mib(self.figure_bytes_freed)),
        ]);
        for (stage, secs) in &self.stage_times {
            table.add_row(vec![
                Cell::new(format!("Stage {stage}")),
                Cell::new(format!("{secs:.1}s")),
            ]);
        }
        table.add_row(vec![
            Cell::new("Network time"),
            Cell::new(format!("{:.1}s", self.network_time_seconds)),
        ]);
        table.add_row(vec![
            Cell::new("Total time").add_attribute(comfy_table::Attribute::Bold),
            Cell::new(format!("{:.1}s", self.total_time_seconds))
                .add_attribute(comfy_table::Attribute::Bold),
        ]);
        table.to_string()
    }

    /// Print summary table to stderr (TTY mode).
    pub fn print(&self) {
        eprintln!("\n{}", self.format_table());
    }

    /// Log summary as single line (non-TTY mode).
    pub fn log(&self) {
        log::info!(
            "Summary: {}/{} papers ok, {} skipped, {} failed, {} versions, {} tex files, {} refs [{:.1}s]",
            self.counter(Counter::SuccessfulPapers),
            self.counter(Counter::TotalPapers),
            self.counter(Counter::SkippedPapers),
            self.counter(Counter::FailedPapers),
            self.counter(Counter::VersionsCollected),
            self.counter(Counter::TexFilesWritten),
            self.counter(Counter::TotalReferences),
            self.total_time_seconds,
        );
    }
}

fn pct(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let t = Telemetry::new();
        t.incr(Counter::TexFilesWritten);
        t.add(Counter::TexFilesWritten, 4);
        assert_eq!(t.get(Counter::TexFilesWritten), 5);
        assert_eq!(t.get(Counter::FailedPapers), 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let t = Telemetry::shared();
        std::thread::scope(|s| {
            for _ in 0..8 {
                let t = &t;
                s.spawn(move || {
                    for _ in 0..500 {
                        t.incr(Counter::TotalPapers);
                    }
                });
            }
        });
        assert_eq!(t.get(Counter::TotalPapers), 4000);
    }

    #[test]
    fn report_flattens_counters_and_averages_sizes() {
        let t = Telemetry::new();
        t.incr(Counter::SuccessfulPapers);
        t.record_sizes(SizeSample {
            bytes_before_strip: 1000,
            bytes_after_strip: 400,
        });
        t.record_sizes(SizeSample {
            bytes_before_strip: 3000,
            bytes_after_strip: 600,
        });
        t.record_network(Duration::from_millis(250));
        t.record_stage("source", Duration::from_secs(2));

        let r = t.report();
        assert_eq!(r.size_samples, 2);
        assert_eq!(r.avg_bytes_before_strip, 2000);
        assert_eq!(r.avg_bytes_after_strip, 500);
        assert_eq!(r.figure_bytes_freed, 3000);
        assert_eq!(r.counter(Counter::HttpRequests), 1);

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["successful_papers"], 1);
        assert_eq!(json["failed_papers"], 0);
        assert_eq!(json["stage_times"]["source"], 2.0);
    }

    #[test]
    fn table_mentions_papers() {
        let t = Telemetry::new();
        t.add(Counter::TotalPapers, 10);
        t.add(Counter::SuccessfulPapers, 7);
        let table = t.report().format_table();
        assert!(table.contains("Papers"));
        assert!(table.contains("70.0%"));
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let t = Arc::new(Telemetry::new());
        let t2 = t.clone();
        let _ = std::thread::spawn(move || {
            let _guard = t2.inner.lock().unwrap();
            panic!("poison");
        })
        .join();
        t.incr(Counter::FailedPapers);
        assert_eq!(t.get(Counter::FailedPapers), 1);
    }
}
