use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters for world I/O. Shared behind an `Arc`; every method takes `&self`.
#[derive(Debug, Default)]
pub struct BenchmarkMetrics {
    // Loader stats
    pub total_worlds_loaded: AtomicUsize,
    pub total_load_time_us: AtomicU64,
    pub max_load_time_us: AtomicU64,
    pub total_worlds_saved: AtomicUsize,
    pub total_save_time_us: AtomicU64,
    pub total_lock_conflicts: AtomicUsize,

    // Codec
    pub total_serializations: AtomicUsize,
    pub total_serialization_us: AtomicU64,
    pub total_deserializations: AtomicUsize,
    pub total_deserialization_us: AtomicU64,
    pub total_bytes_written: AtomicUsize,
    pub total_bytes_read: AtomicUsize,
    pub total_chunks_written: AtomicUsize,

    // Conversions
    pub total_upgrades: AtomicUsize,
    pub total_upgrade_time_us: AtomicU64,
    pub total_imports: AtomicUsize,
    pub total_import_time_us: AtomicU64,
    pub total_chunks_imported: AtomicUsize,

    // Session
    pub start_time: Option<Instant>,
    pub config_summary: String,
}

fn micros(duration: Duration) -> u64 {
    duration.as_micros() as u64
}

fn millis(us: &AtomicU64) -> f64 {
    us.load(Ordering::Relaxed) as f64 / 1000.0
}

fn average(total_ms: f64, count: usize) -> f64 {
    if count > 0 { total_ms / count as f64 } else { 0.0 }
}

impl BenchmarkMetrics {
    pub fn new(config_summary: String) -> Self {
        Self {
            start_time: Some(Instant::now()),
            config_summary,
            ..Default::default()
        }
    }

    pub fn record_load(&self, duration: Duration) {
        self.total_worlds_loaded.fetch_add(1, Ordering::Relaxed);
        let us = micros(duration);
        self.total_load_time_us.fetch_add(us, Ordering::Relaxed);
        self.max_load_time_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn record_save(&self, duration: Duration) {
        self.total_worlds_saved.fetch_add(1, Ordering::Relaxed);
        self.total_save_time_us.fetch_add(micros(duration), Ordering::Relaxed);
    }

    pub fn record_lock_conflict(&self) {
        self.total_lock_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_serialization(&self, duration: Duration, bytes: usize, chunks: usize) {
        self.total_serializations.fetch_add(1, Ordering::Relaxed);
        self.total_serialization_us.fetch_add(micros(duration), Ordering::Relaxed);
        self.total_bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.total_chunks_written.fetch_add(chunks, Ordering::Relaxed);
    }

    pub fn record_deserialization(&self, duration: Duration, bytes: usize) {
        self.total_deserializations.fetch_add(1, Ordering::Relaxed);
        self.total_deserialization_us.fetch_add(micros(duration), Ordering::Relaxed);
        self.total_bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_upgrade(&self, duration: Duration) {
        self.total_upgrades.fetch_add(1, Ordering::Relaxed);
        self.total_upgrade_time_us.fetch_add(micros(duration), Ordering::Relaxed);
    }

    pub fn record_import(&self, duration: Duration, chunks: usize) {
        self.total_imports.fetch_add(1, Ordering::Relaxed);
        self.total_import_time_us.fetch_add(micros(duration), Ordering::Relaxed);
        self.total_chunks_imported.fetch_add(chunks, Ordering::Relaxed);
    }

    pub fn generate_report(&self) -> String {
        let uptime = self.start_time.unwrap_or_else(Instant::now).elapsed();

        let loaded = self.total_worlds_loaded.load(Ordering::Relaxed);
        let load_avg = average(millis(&self.total_load_time_us), loaded);
        let load_max = millis(&self.max_load_time_us);
        let saved = self.total_worlds_saved.load(Ordering::Relaxed);
        let save_avg = average(millis(&self.total_save_time_us), saved);
        let conflicts = self.total_lock_conflicts.load(Ordering::Relaxed);

        let serialized = self.total_serializations.load(Ordering::Relaxed);
        let ser_avg = average(millis(&self.total_serialization_us), serialized);
        let deserialized = self.total_deserializations.load(Ordering::Relaxed);
        let de_avg = average(millis(&self.total_deserialization_us), deserialized);

        let written = self.total_bytes_written.load(Ordering::Relaxed);
        let read = self.total_bytes_read.load(Ordering::Relaxed);
        let chunks_written = self.total_chunks_written.load(Ordering::Relaxed);
        // Average world size
        let avg_world_kb = if serialized > 0 { written as f64 / serialized as f64 / 1024.0 } else { 0.0 };
        let avg_chunk_bytes = if chunks_written > 0 { written as f64 / chunks_written as f64 } else { 0.0 };

        let upgrades = self.total_upgrades.load(Ordering::Relaxed);
        let upgrade_avg = average(millis(&self.total_upgrade_time_us), upgrades);
        let imports = self.total_imports.load(Ordering::Relaxed);
        let import_avg = average(millis(&self.total_import_time_us), imports);
        let chunks_imported = self.total_chunks_imported.load(Ordering::Relaxed);

        format!(
            "SlimeWorld Report\n\
             =================\n\
             Configuration: {}\n\
             Session Duration: {:.2?}\n\n\
             [Loader Read]\n\
             Worlds Loaded: {}\n\
             Avg Time: {:.2} ms/world\n\
             Max Time: {:.2} ms\n\
             Lock Conflicts: {}\n\n\
             [Loader Write]\n\
             Worlds Saved: {}\n\
             Avg Time: {:.2} ms/world\n\n\
             [Codec]\n\
             Serialized: {} ({:.2} ms avg)\n\
             Deserialized: {} ({:.2} ms avg)\n\
             Bytes Written: {} ({:.1} KB/world, {:.0} B/chunk)\n\
             Bytes Read: {}\n\n\
             [Conversions]\n\
             Upgrades: {} ({:.2} ms avg)\n\
             Imports: {} ({:.2} ms avg, {} chunks)\n",
            self.config_summary,
            uptime,
            loaded, load_avg, load_max, conflicts,
            saved, save_avg,
            serialized, ser_avg,
            deserialized, de_avg,
            written, avg_world_kb, avg_chunk_bytes,
            read,
            upgrades, upgrade_avg,
            imports, import_avg, chunks_imported
        )
    }
}
