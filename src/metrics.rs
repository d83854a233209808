//! Minimal metrics scaffolding: process-wide counters for cycle and
//! persistence outcomes. Logged after cycles and reported by `probe`.
use std::sync::atomic::{AtomicU64, Ordering};

static CYCLES_RUN: AtomicU64 = AtomicU64::new(0);
static CYCLES_OK: AtomicU64 = AtomicU64::new(0);
static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);
static SINK_WRITE_ATTEMPTS: AtomicU64 = AtomicU64::new(0);
static SINK_WRITE_RETRIES: AtomicU64 = AtomicU64::new(0);
static SINK_WRITE_EXHAUSTED: AtomicU64 = AtomicU64::new(0);
static FILE_WRITE_FAILURES: AtomicU64 = AtomicU64::new(0);

pub fn inc_cycles_run() {
    CYCLES_RUN.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_cycles_ok() {
    CYCLES_OK.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_parse_failures() {
    PARSE_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sink_write_attempts() {
    SINK_WRITE_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sink_write_retries() {
    SINK_WRITE_RETRIES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sink_write_exhausted() {
    SINK_WRITE_EXHAUSTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_file_write_failures() {
    FILE_WRITE_FAILURES.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub cycles_run: u64,
    pub cycles_ok: u64,
    pub parse_failures: u64,
    pub sink_write_attempts: u64,
    pub sink_write_retries: u64,
    pub sink_write_exhausted: u64,
    pub file_write_failures: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        cycles_run: CYCLES_RUN.load(Ordering::Relaxed),
        cycles_ok: CYCLES_OK.load(Ordering::Relaxed),
        parse_failures: PARSE_FAILURES.load(Ordering::Relaxed),
        sink_write_attempts: SINK_WRITE_ATTEMPTS.load(Ordering::Relaxed),
        sink_write_retries: SINK_WRITE_RETRIES.load(Ordering::Relaxed),
        sink_write_exhausted: SINK_WRITE_EXHAUSTED.load(Ordering::Relaxed),
        file_write_failures: FILE_WRITE_FAILURES.load(Ordering::Relaxed),
    }
}
