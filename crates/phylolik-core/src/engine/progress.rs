/// Events emitted by long-running workflows.
///
/// Phases bracket the major steps (tree scaling, numerical optimization,
/// topology search, distance estimation); tasks count the steps of a phase
/// whose length is known in advance, such as the pairs of a distance matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    TaskStart { total_steps: u64 },
    TaskIncrement,
    TaskFinish,

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    /// Runs `step` between a `PhaseStart` and a `PhaseFinish` event.
    ///
    /// The finish event is sent even when `step` fails.
    pub fn phase<T>(&self, name: &'static str, step: impl FnOnce() -> T) -> T {
        self.report(Progress::PhaseStart { name });
        let result = step();
        self.report(Progress::PhaseFinish);
        result
    }

    /// Reports a named numerical result, such as a log-likelihood.
    pub fn result(&self, label: &str, value: f64) {
        self.report(Progress::Message(format!("{label}: {value}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn phases_are_bracketed_even_on_failure() {
        let events = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|e| events.lock().unwrap().push(e)));
        let outcome: Result<(), &str> = reporter.phase("Scaling tree", || Err("boom"));
        assert!(outcome.is_err());
        reporter.result("Log likelihood", -12.5);
        drop(reporter);
        assert_eq!(
            events.into_inner().unwrap(),
            vec![
                Progress::PhaseStart { name: "Scaling tree" },
                Progress::PhaseFinish,
                Progress::Message("Log likelihood: -12.5".into()),
            ]
        );
    }

    #[test]
    fn silent_reporter_ignores_events() {
        let reporter = ProgressReporter::new();
        reporter.report(Progress::TaskIncrement);
        assert_eq!(reporter.phase("noop", || 3), 3);
    }
}
