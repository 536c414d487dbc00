use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use phylolik::engine::progress::{Progress, ProgressCallback};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const SPINNER_TICK_MS: u64 = 80;

/// Renders workflow [`Progress`] events on stderr: a spinner per phase, a
/// bar for counted tasks such as the pairs of a distance matrix, and result
/// messages printed above the bar.
#[derive(Clone)]
pub struct CliProgressHandler {
    pb: Arc<Mutex<ProgressBar>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// A handler drawing nowhere, used when logs are silenced.
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let pb = ProgressBar::with_draw_target(Some(0), target).with_style(Self::spinner_style());
        pb.finish_and_clear();
        Self {
            pb: Arc::new(Mutex::new(pb)),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let pb = self.pb.clone();

        Box::new(move |progress: Progress| {
            let Ok(pb) = pb.lock() else {
                warn!("Progress bar mutex was poisoned. Cannot update progress.");
                return;
            };

            match progress {
                Progress::PhaseStart { name } => {
                    pb.reset();
                    pb.set_length(0);
                    pb.set_style(Self::spinner_style());
                    pb.set_prefix(name);
                    pb.set_message("");
                    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
                }
                Progress::PhaseFinish => {
                    pb.disable_steady_tick();
                    pb.set_style(Self::spinner_style());
                    pb.finish_with_message("done");
                }
                Progress::TaskStart { total_steps } => {
                    pb.disable_steady_tick();
                    pb.set_length(total_steps);
                    pb.set_position(0);
                    pb.set_style(Self::bar_style());
                }
                Progress::TaskIncrement => pb.inc(1),
                Progress::TaskFinish => {
                    let total = pb.length().unwrap_or(0);
                    if pb.position() < total {
                        pb.set_position(total);
                    }
                    pb.set_style(Self::spinner_style());
                    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
                }
                Progress::Message(msg) => pb.println(format!("  {}", msg)),
            }
        })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:<28} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-")
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn handler_initializes_in_a_clean_state() {
        let handler = CliProgressHandler::hidden();
        let pb = handler.pb.lock().unwrap();
        assert_eq!(pb.length(), Some(0));
        assert!(pb.is_finished());
    }

    #[test]
    fn distance_matrix_task_drives_the_bar() {
        let handler = CliProgressHandler::hidden();
        let callback = handler.get_callback();

        callback(Progress::PhaseStart {
            name: "Estimating distance matrix",
        });
        {
            let pb = handler.pb.lock().unwrap();
            assert_eq!(pb.prefix(), "Estimating distance matrix");
            assert!(!pb.is_finished());
        }

        callback(Progress::TaskStart { total_steps: 10 });
        callback(Progress::TaskIncrement);
        callback(Progress::TaskIncrement);
        {
            let pb = handler.pb.lock().unwrap();
            assert_eq!(pb.length(), Some(10));
            assert_eq!(pb.position(), 2);
        }

        callback(Progress::TaskFinish);
        assert_eq!(handler.pb.lock().unwrap().position(), 10);

        callback(Progress::Message("Log likelihood: -1234.5".to_string()));
        callback(Progress::PhaseFinish);
        let pb = handler.pb.lock().unwrap();
        assert!(pb.is_finished());
        assert_eq!(pb.message(), "done");
    }

    #[test]
    fn callback_is_thread_safe() {
        let handler = CliProgressHandler::hidden();
        let callback = handler.get_callback();

        thread::spawn(move || {
            callback(Progress::PhaseStart { name: "Scaling tree" });
            callback(Progress::PhaseFinish);
        })
        .join()
        .unwrap();

        let pb = handler.pb.lock().unwrap();
        assert!(pb.is_finished());
        assert_eq!(pb.prefix(), "Scaling tree");
    }
}
