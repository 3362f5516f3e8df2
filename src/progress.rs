// src/progress.rs
/// Progress reporting for the per-student fetch loop.
/// Frontends implement this to surface status; the library only calls it.
pub trait Progress {
    /// Called at the start with the number of students.
    fn begin(&mut self, _total: usize) {}

    /// Free-form status line for human eyes.
    fn log(&mut self, _msg: &str) {}

    /// One student fetched and logged.
    fn item_done(&mut self, _student: &str, _records: usize) {}

    /// One student skipped; the run carries on.
    fn item_failed(&mut self, _student: &str, _reason: &str) {}

    /// Called at the end, successful or not.
    fn finish(&mut self) {}
}

/// A no-op progress sink.
pub struct NullProgress;
impl Progress for NullProgress {}
