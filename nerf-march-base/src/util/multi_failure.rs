use std::panic;
use std::string::String;
use std::vec::Vec;

/// Guard object which collects multiple panics from labeled test cases,
/// then panics when it is dropped if any occurred.
///
/// This allows [`#[test]`](macro@test) tests which check an invariant over many cases
/// (every cascade, every image, every pyramid level) to report all the failing cases
/// instead of only the first.
#[derive(Debug, Default)]
pub struct MultiFailure {
    failed_labels: Vec<String>,
}

impl MultiFailure {
    /// Constructs an empty [`MultiFailure`].
    ///
    /// If nothing else is done to it, it will have no effect.
    #[inline(never)]
    #[must_use = "this is useless if never invoked to collect failures"]
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `f`, and if it unwinds, record `label` as a failure and defer it
    /// until this [`MultiFailure`] is dropped.
    #[inline(never)]
    pub fn catch<O, F>(&mut self, label: impl Into<String>, f: F) -> Option<O>
    where
        F: FnOnce() -> O,
        F: panic::UnwindSafe,
    {
        match panic::catch_unwind(f) {
            Ok(output) => Some(output),
            Err(_) => {
                // The panic hook has already printed a report.
                self.failed_labels.push(label.into());
                None
            }
        }
    }
}

impl Drop for MultiFailure {
    #[inline(never)]
    fn drop(&mut self) {
        if std::thread::panicking() || self.failed_labels.is_empty() {
            return;
        }

        let count = self.failed_labels.len();
        let summary_message = format!(
            "{count} case{s} failed: {labels}",
            s = if count == 1 { "" } else { "s" },
            labels = self.failed_labels.join(", "),
        );
        std::eprintln!("\n{summary_message}");
        // `resume_unwind()` skips the panic hook, avoiding another full report.
        panic::resume_unwind(Box::new(summary_message));
    }
}
