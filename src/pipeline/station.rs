//! Core station abstraction and runner for the pipeline.
//!
//! Every stage runs one [`Station`] on a dedicated thread. The runner polls its
//! input with a short timeout so cancellation is noticed between items, and
//! enqueues output with a bounded wait: if the downstream channel stays full the
//! output is dropped and reported, so a stalled consumer never blocks upstream.

use crate::pipeline::error::{ErrorReporter, StationError};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A processing station in the pipeline.
///
/// Each station receives input, processes it, and produces output.
/// Stations run in their own threads and are connected by channels.
pub trait Station: Send + 'static {
    /// The input type this station receives.
    type Input: Send + 'static;
    /// The output type this station produces.
    type Output: Send + 'static;

    /// Processes a single input item.
    ///
    /// Returns:
    /// - `Ok(Some(output))` - Successfully processed and produced output
    /// - `Ok(None)` - Successfully processed but no output (e.g., filtered)
    /// - `Err(StationError)` - Processing failed
    fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StationError>;

    /// Returns the name of this station for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Called once when the station loop exits.
    fn shutdown(&mut self) {}
}

/// Shared run state: the cooperative cancellation flag plus the first fatal error.
#[derive(Debug, Clone)]
pub struct RunControl {
    running: Arc<AtomicBool>,
    fatal: Arc<Mutex<Option<String>>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            fatal: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Asks every worker to stop after its current item.
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Records a fatal error (the first one wins) and cancels the run.
    pub fn fail(&self, source: &str, message: &str) {
        if let Ok(mut fatal) = self.fatal.lock()
            && fatal.is_none()
        {
            *fatal = Some(format!("{source}: {message}"));
        }
        self.cancel();
    }

    /// The fatal error that ended the run, if any.
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().ok().and_then(|fatal| fatal.clone())
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive and send timing for a station loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerTiming {
    /// How long a receive blocks before the cancellation flag is re-checked.
    pub poll_interval: Duration,
    /// How long a send may wait for downstream capacity before dropping.
    pub enqueue_timeout: Duration,
}

impl Default for RunnerTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(crate::defaults::POLL_INTERVAL_MS),
            enqueue_timeout: Duration::from_millis(crate::defaults::ENQUEUE_TIMEOUT_MS),
        }
    }
}

/// How a worker thread ended when joined with a timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Finished,
    Panicked(String),
    /// Still running at the deadline; the thread was detached.
    Abandoned,
}

/// Joins `handle` if it finishes before `timeout`, otherwise detaches it.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> JoinOutcome {
    let deadline = Instant::now() + timeout;
    let poll_interval = Duration::from_millis(10);

    while !handle.is_finished() {
        if Instant::now() >= deadline {
            // Dropping the JoinHandle detaches the thread.
            return JoinOutcome::Abandoned;
        }
        thread::sleep(poll_interval);
    }

    match handle.join() {
        Ok(()) => JoinOutcome::Finished,
        Err(panic_info) => {
            let msg = panic_info
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic_info.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            JoinOutcome::Panicked(msg)
        }
    }
}

/// Runs a station in a dedicated thread.
pub struct StationRunner {
    handle: Option<JoinHandle<()>>,
    station_name: &'static str,
}

impl StationRunner {
    /// Spawns `station` on its own thread.
    ///
    /// The loop ends when `control` is cancelled, the input channel disconnects,
    /// the output channel disconnects, or the station returns a fatal error.
    pub fn spawn<S: Station>(
        mut station: S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        control: RunControl,
        timing: RunnerTiming,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let station_name = station.name();

        let handle = thread::Builder::new()
            .name(format!("voxrelay-{station_name}"))
            .spawn(move || {
                run_station(
                    &mut station,
                    input_rx,
                    output_tx,
                    &control,
                    timing,
                    error_reporter.as_ref(),
                );
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(station = station_name, "failed to spawn thread: {e}");
                None
            }
        };

        Self {
            handle,
            station_name,
        }
    }

    /// Returns the name of the station.
    pub fn name(&self) -> &'static str {
        self.station_name
    }

    /// True once the station thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Waits up to `timeout` for the station thread to exit.
    pub fn join_timeout(mut self, timeout: Duration) -> JoinOutcome {
        match self.handle.take() {
            Some(handle) => join_with_timeout(handle, timeout),
            None => JoinOutcome::Finished,
        }
    }
}

fn run_station<S: Station>(
    station: &mut S,
    input_rx: Receiver<S::Input>,
    output_tx: Sender<S::Output>,
    control: &RunControl,
    timing: RunnerTiming,
    error_reporter: &dyn ErrorReporter,
) {
    let station_name = station.name();

    while control.is_running() {
        let input = match input_rx.recv_timeout(timing.poll_interval) {
            Ok(input) => input,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // The item is always finished once taken; cancellation is checked between items.
        match station.process(input) {
            Ok(Some(output)) => match output_tx.send_timeout(output, timing.enqueue_timeout) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    error_reporter.report(
                        station_name,
                        &StationError::Saturated(format!(
                            "downstream full for {}ms, output dropped",
                            timing.enqueue_timeout.as_millis()
                        )),
                    );
                }
                Err(SendTimeoutError::Disconnected(_)) => break,
            },
            Ok(None) => {}
            Err(StationError::Fatal(msg)) => {
                error_reporter.report(station_name, &StationError::Fatal(msg.clone()));
                control.fail(station_name, &msg);
                break;
            }
            Err(e) => error_reporter.report(station_name, &e),
        }
    }

    station.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    struct DoublerStation {
        shutdown_called: Arc<AtomicBool>,
    }

    impl Station for DoublerStation {
        type Input = i32;
        type Output = i32;

        fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StationError> {
            Ok(Some(input * 2))
        }

        fn name(&self) -> &'static str {
            "doubler"
        }

        fn shutdown(&mut self) {
            self.shutdown_called.store(true, Ordering::SeqCst);
        }
    }

    struct FailingStation {
        fail_on: i32,
        fatal: bool,
    }

    impl Station for FailingStation {
        type Input = i32;
        type Output = i32;

        fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StationError> {
            if input != self.fail_on {
                Ok(Some(input))
            } else if self.fatal {
                Err(StationError::Fatal(format!("Broke on {}", input)))
            } else {
                Err(StationError::Recoverable(format!("Failed on {}", input)))
            }
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct SlowStation {
        delay: Duration,
        processed: Arc<Mutex<Vec<i32>>>,
    }

    impl Station for SlowStation {
        type Input = i32;
        type Output = i32;

        fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StationError> {
            thread::sleep(self.delay);
            if let Ok(mut processed) = self.processed.lock() {
                processed.push(input);
            }
            Ok(Some(input))
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[derive(Default)]
    struct MockReporter {
        errors: Arc<Mutex<Vec<(String, StationError)>>>,
    }

    impl ErrorReporter for MockReporter {
        fn report(&self, station: &str, error: &StationError) {
            self.errors
                .lock()
                .unwrap()
                .push((station.to_string(), error.clone()));
        }
    }

    fn fast_timing() -> RunnerTiming {
        RunnerTiming {
            poll_interval: Duration::from_millis(10),
            enqueue_timeout: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_station_runner_basic_processing() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let station = DoublerStation {
            shutdown_called: shutdown_flag.clone(),
        };
        let runner = StationRunner::spawn(
            station,
            input_rx,
            output_tx,
            RunControl::new(),
            fast_timing(),
            Arc::new(MockReporter::default()),
        );
        assert_eq!(runner.name(), "doubler");

        input_tx.send(1).unwrap();
        input_tx.send(2).unwrap();
        input_tx.send(3).unwrap();
        drop(input_tx);

        let outputs: Vec<i32> = output_rx.iter().collect();
        assert_eq!(outputs, vec![2, 4, 6]);

        assert_eq!(
            runner.join_timeout(Duration::from_secs(1)),
            JoinOutcome::Finished
        );
        assert!(shutdown_flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_recoverable_error_drops_item_and_continues() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let reporter = Arc::new(MockReporter::default());
        let errors = reporter.errors.clone();

        let runner = StationRunner::spawn(
            FailingStation {
                fail_on: 2,
                fatal: false,
            },
            input_rx,
            output_tx,
            RunControl::new(),
            fast_timing(),
            reporter,
        );

        for i in 1..=3 {
            input_tx.send(i).unwrap();
        }
        drop(input_tx);

        let outputs: Vec<i32> = output_rx.iter().collect();
        assert_eq!(outputs, vec![1, 3]);

        let reported = errors.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].0, "failing");
        assert!(reported[0].1.to_string().contains("Failed on 2"));
        drop(reported);

        assert_eq!(
            runner.join_timeout(Duration::from_secs(1)),
            JoinOutcome::Finished
        );
    }

    #[test]
    fn test_fatal_error_stops_station_and_cancels_run() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let control = RunControl::new();

        let runner = StationRunner::spawn(
            FailingStation {
                fail_on: 2,
                fatal: true,
            },
            input_rx,
            output_tx,
            control.clone(),
            fast_timing(),
            Arc::new(MockReporter::default()),
        );

        input_tx.send(1).unwrap();
        input_tx.send(2).unwrap();
        input_tx.send(3).unwrap();

        assert_eq!(
            runner.join_timeout(Duration::from_secs(1)),
            JoinOutcome::Finished
        );
        let outputs: Vec<i32> = output_rx.try_iter().collect();
        assert_eq!(outputs, vec![1], "nothing after the fatal item");
        assert!(!control.is_running());
        let fatal = control.fatal_error().unwrap();
        assert!(fatal.contains("failing"), "got: {fatal}");
        assert!(fatal.contains("Broke on 2"), "got: {fatal}");
    }

    #[test]
    fn test_full_downstream_drops_within_timeout() {
        let (input_tx, input_rx) = bounded(10);
        // Capacity 1 and nobody reading: the second output cannot be enqueued.
        let (output_tx, output_rx) = bounded(1);
        let reporter = Arc::new(MockReporter::default());
        let errors = reporter.errors.clone();
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let runner = StationRunner::spawn(
            DoublerStation {
                shutdown_called: shutdown_flag.clone(),
            },
            input_rx,
            output_tx,
            RunControl::new(),
            fast_timing(),
            reporter,
        );

        let started = Instant::now();
        for i in 1..=4 {
            input_tx.send(i).unwrap();
        }
        drop(input_tx);

        assert_eq!(
            runner.join_timeout(Duration::from_secs(2)),
            JoinOutcome::Finished,
            "station must not block on a full downstream"
        );
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "three drops at 20ms each should finish quickly, took {:?}",
            started.elapsed()
        );

        let saturations = errors
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| matches!(e, StationError::Saturated(_)))
            .count();
        assert_eq!(saturations, 3);
        assert_eq!(output_rx.try_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_cancellation_finishes_in_flight_item() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let control = RunControl::new();
        let processed = Arc::new(Mutex::new(Vec::new()));

        let runner = StationRunner::spawn(
            SlowStation {
                delay: Duration::from_millis(100),
                processed: processed.clone(),
            },
            input_rx,
            output_tx,
            control.clone(),
            fast_timing(),
            Arc::new(MockReporter::default()),
        );

        input_tx.send(1).unwrap();
        input_tx.send(2).unwrap();
        thread::sleep(Duration::from_millis(30));
        control.cancel();

        assert_eq!(
            runner.join_timeout(Duration::from_secs(1)),
            JoinOutcome::Finished
        );
        assert_eq!(*processed.lock().unwrap(), vec![1], "no new item after cancel");
        assert_eq!(output_rx.try_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_idle_station_observes_cancellation() {
        let (_input_tx, input_rx) = bounded::<i32>(10);
        let (output_tx, _output_rx) = bounded(10);
        let control = RunControl::new();

        let runner = StationRunner::spawn(
            DoublerStation {
                shutdown_called: Arc::new(AtomicBool::new(false)),
            },
            input_rx,
            output_tx,
            control.clone(),
            fast_timing(),
            Arc::new(MockReporter::default()),
        );

        control.cancel();
        assert_eq!(
            runner.join_timeout(Duration::from_millis(500)),
            JoinOutcome::Finished
        );
    }

    #[test]
    fn test_join_timeout_abandons_stuck_thread() {
        let handle = thread::spawn(|| thread::sleep(Duration::from_secs(2)));
        let started = Instant::now();

        let outcome = join_with_timeout(handle, Duration::from_millis(50));

        assert_eq!(outcome, JoinOutcome::Abandoned);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_join_timeout_reports_panic() {
        let handle = thread::spawn(|| panic!("station exploded"));
        let outcome = join_with_timeout(handle, Duration::from_secs(1));
        assert_eq!(outcome, JoinOutcome::Panicked("station exploded".to_string()));
    }

    #[test]
    fn test_run_control_keeps_first_fatal_error() {
        let control = RunControl::new();
        assert!(control.is_running());
        assert_eq!(control.fatal_error(), None);

        control.fail("capture", "device unplugged");
        control.fail("transcriber", "later failure");

        assert!(!control.is_running());
        assert_eq!(
            control.fatal_error().as_deref(),
            Some("capture: device unplugged")
        );
    }
}
