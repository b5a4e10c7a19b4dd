//! Action timing.

use std::time::Instant;

/// Measures how long one action takes and prints it when finished.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    /// Start a new timer for the named action.
    pub fn start(name: &str) -> Self {
        println!("==> {}", name);
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    /// Finish the timer and print the elapsed time.
    pub fn finish(self) {
        println!("  {}", format_elapsed(self.start.elapsed().as_secs_f64(), &self.name));
    }
}

fn format_elapsed(secs: f64, name: &str) -> String {
    if secs >= 60.0 {
        format!("[{:.1}m] {}", secs / 60.0, name)
    } else {
        format!("[{:.1}s] {}", secs, name)
    }
}
