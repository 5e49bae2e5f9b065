// ============================================================
// Layer 5 — Training Loop
// ============================================================
// The run state machine:
//
//   Initializing ─► { TrainingEpoch ─► [Checkpointing] ─► [Evaluating] }* ─► Finished
//
//   TrainingEpoch  lr = schedule(epoch), then one session step per batch;
//                  a progress line every 100 iterations of the epoch
//   Checkpointing  epoch % save_freq == 0 → <run dir>/NNN.ckpt
//   Evaluating     epoch % test_freq == 0 → mean 10-fold accuracy for
//                  LFW, AgeDB-30, CFP-FP; best-so-far records updated
//   Finished       final best-so-far summary
//
// Initializing happens in the train use case. Everything here is
// written against the BatchSource / TrainingSession / Evaluator
// traits, so the loop runs the same with Burn or with test stubs.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Result};

use crate::domain::accuracy::{mean_accuracy, Benchmark, BestAccuracies};
use crate::domain::traits::{BatchSource, Evaluator, TrainingSession};
use crate::infra::checkpoint::{Checkpoint, CheckpointStore};
use crate::ml::optimizer::LrSchedule;

pub const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// First epoch to run (1 for a fresh run, checkpoint epoch + 1 on resume).
    pub start_epoch:    usize,
    pub total_epoch:    usize,
    pub save_freq:      usize,
    pub test_freq:      usize,
    pub progress_every: usize,
}

/// One benchmark result of one evaluation cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
    pub epoch:     usize,
    pub benchmark: Benchmark,
    /// Mean fold accuracy in percent.
    pub accuracy:  f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub best:        BestAccuracies,
    pub evaluations: Vec<EvaluationRecord>,
    pub checkpoints: Vec<PathBuf>,
}

/// Running loss and wall time since the last progress line.
struct Progress {
    every:    usize,
    iters:    usize,
    loss_sum: f64,
    window:   usize,
    started:  Instant,
}

impl Progress {
    fn new(every: usize) -> Self {
        Self { every: every.max(1), iters: 0, loss_sum: 0.0, window: 0, started: Instant::now() }
    }

    fn record(&mut self, loss: f64, lr: f64) {
        self.iters += 1;
        self.window += 1;
        self.loss_sum += loss;
        if self.iters % self.every == 0 {
            let per_iter = self.started.elapsed().as_secs_f64() / self.window as f64;
            tracing::info!(
                "Iters: {:4}, loss: {:.4}, time: {:.4} s/iter, learning rate: {}",
                self.iters,
                self.loss_sum / self.window as f64,
                per_iter,
                lr,
            );
            self.loss_sum = 0.0;
            self.window = 0;
            self.started = Instant::now();
        }
    }
}

pub fn run_training<L, S, E>(
    cfg:       &LoopConfig,
    schedule:  &LrSchedule,
    source:    &L,
    session:   &mut S,
    evaluator: &mut E,
    store:     &CheckpointStore,
) -> Result<TrainingReport>
where
    L: BatchSource,
    S: TrainingSession<Batch = L::Batch>,
    E: Evaluator<S>,
{
    let mut report = TrainingReport::default();

    for epoch in cfg.start_epoch..=cfg.total_epoch {

        // ── TrainingEpoch ─────────────────────────────────────────────────────
        let lr = schedule.lr_at(epoch);
        tracing::info!("Train Epoch: {}/{} ...", epoch, cfg.total_epoch);

        let mut progress = Progress::new(cfg.progress_every);
        let mut seen = 0usize;
        for batch in source.iter() {
            source.check()?;
            seen += L::batch_len(&batch);
            let loss = session.step(batch, lr)?;
            progress.record(loss, lr);
        }
        if seen < source.epoch_len() {
            bail!(
                "epoch {epoch} yielded {seen} of {} training images; an image failed to load",
                source.epoch_len()
            );
        }

        // ── Checkpointing ─────────────────────────────────────────────────────
        if epoch % cfg.save_freq == 0 {
            tracing::info!("Saving checkpoint: {}", epoch);
            let path = store.save(&Checkpoint { epoch, net_state_dict: session.state_dict() })?;
            report.checkpoints.push(path);
        }

        // ── Evaluating ────────────────────────────────────────────────────────
        if epoch % cfg.test_freq == 0 {
            for benchmark in Benchmark::ALL {
                let folds = evaluator.evaluate(session, benchmark)?;
                let accuracy = mean_accuracy(&folds) * 100.0;
                tracing::info!("{} Ave Accuracy: {:.4}", benchmark, accuracy);
                report.best = report.best.observe(benchmark, epoch, accuracy);
                report.evaluations.push(EvaluationRecord { epoch, benchmark, accuracy });
            }
            tracing::info!("Current Best Accuracy: {}", report.best.summary());
        }
    }

    // ── Finished ──────────────────────────────────────────────────────────────
    tracing::info!("Finally Best Accuracy: {}", report.best.summary());
    Ok(report)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state_dict::{ParamTensor, StateDict};
    use std::cell::Cell;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Yields batch sizes only: `images` split into chunks of `batch_size`.
    #[derive(Default)]
    struct StubSource {
        images:       usize,
        batch_size:   usize,
        /// Drop this many images from every pass.
        lost:         usize,
        /// `check` fails once this many batches have been drawn.
        broken_after: Option<usize>,
        drawn:        Cell<usize>,
    }

    impl BatchSource for StubSource {
        type Batch = usize;

        fn iter(&self) -> Box<dyn Iterator<Item = usize> + '_> {
            let yielded = self.images - self.lost;
            let batch_size = self.batch_size;
            Box::new((0..yielded).step_by(batch_size).map(move |start| {
                self.drawn.set(self.drawn.get() + 1);
                batch_size.min(yielded - start)
            }))
        }

        fn batch_len(batch: &usize) -> usize {
            *batch
        }

        fn epoch_len(&self) -> usize {
            self.images
        }

        fn check(&self) -> Result<()> {
            match self.broken_after {
                Some(n) if self.drawn.get() >= n => bail!("an image failed to decode"),
                _ => Ok(()),
            }
        }
    }

    #[derive(Default)]
    struct StubSession {
        lrs: Vec<f64>,
    }

    impl TrainingSession for StubSession {
        type Batch = usize;

        fn step(&mut self, _batch: usize, lr: f64) -> Result<f64> {
            self.lrs.push(lr);
            Ok(1.5)
        }

        fn state_dict(&self) -> StateDict {
            let mut dict = StateDict::new();
            dict.insert("head.fc.weight", ParamTensor::new(vec![2], vec![self.lrs.len() as f32, 0.0]));
            dict
        }
    }

    struct StubEvaluator {
        calls: Vec<Benchmark>,
        folds: Vec<f64>,
    }

    impl Evaluator<StubSession> for StubEvaluator {
        fn evaluate(&mut self, _session: &StubSession, benchmark: Benchmark) -> Result<Vec<f64>> {
            self.calls.push(benchmark);
            Ok(self.folds.clone())
        }
    }

    fn capture_logs<T>(run: impl FnOnce() -> T) -> (T, String) {
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let out = tracing::subscriber::with_default(subscriber, run);
        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        (out, text)
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn loop_config(start_epoch: usize, total_epoch: usize, save_freq: usize, test_freq: usize) -> LoopConfig {
        LoopConfig { start_epoch, total_epoch, save_freq, test_freq, progress_every: PROGRESS_EVERY }
    }

    #[test]
    fn test_one_epoch_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        // 2 identities × 3 images, batch size 4
        let source = StubSource { images: 6, batch_size: 4, ..Default::default() };
        let mut session = StubSession::default();
        let mut evaluator = StubEvaluator { calls: Vec::new(), folds: vec![0.9; 10] };

        let (report, text) = capture_logs(|| {
            run_training(
                &loop_config(1, 1, 1, 1),
                &LrSchedule::default(),
                &source,
                &mut session,
                &mut evaluator,
                &store,
            )
        });
        let report = report.unwrap();

        assert_eq!(session.lrs, vec![0.1, 0.1]);
        assert_eq!(report.checkpoints, vec![tmp.path().join("001.ckpt")]);
        let files: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(files, vec![std::ffi::OsString::from("001.ckpt")]);
        assert_eq!(CheckpointStore::load(&report.checkpoints[0]).unwrap().epoch, 1);

        assert_eq!(evaluator.calls, Benchmark::ALL.to_vec());
        assert_eq!(report.evaluations.len(), 3);
        assert!((report.best.lfw.best_accuracy - 90.0).abs() < 1e-9);
        assert_eq!(report.best.cfp_fp.best_epoch, 1);

        for benchmark in Benchmark::ALL {
            let line = format!("{} Ave Accuracy:", benchmark);
            assert_eq!(text.matches(&line).count(), 1, "{line}");
        }
        assert_eq!(text.matches("Saving checkpoint: 1").count(), 1);
        assert!(text.contains("Finally Best Accuracy: LFW: 90.0000 in Epoch: 1"));
    }

    #[test]
    fn test_resumed_run_starts_at_next_epoch() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let source = StubSource { images: 4, batch_size: 4, ..Default::default() };
        let mut session = StubSession::default();
        let mut evaluator = StubEvaluator { calls: Vec::new(), folds: vec![0.5; 10] };
        let schedule = LrSchedule::default();

        let report = run_training(&loop_config(20, 21, 2, 50), &schedule, &source, &mut session, &mut evaluator, &store)
            .unwrap();

        assert_eq!(session.lrs, vec![schedule.lr_at(20), schedule.lr_at(21)]);
        assert_eq!(report.checkpoints, vec![tmp.path().join("020.ckpt")]);
        assert!(evaluator.calls.is_empty());
        assert_eq!(report.best, BestAccuracies::default());
    }

    #[test]
    fn test_best_accuracy_keeps_earliest_maximum() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let source = StubSource { images: 2, batch_size: 4, ..Default::default() };
        let mut session = StubSession::default();
        let mut evaluator = StubEvaluator { calls: Vec::new(), folds: vec![0.8; 10] };

        let report = run_training(&loop_config(1, 3, 10, 1), &LrSchedule::default(), &source, &mut session, &mut evaluator, &store)
            .unwrap();

        assert_eq!(report.evaluations.len(), 9);
        assert_eq!(report.best.agedb30.best_epoch, 1);
        assert!(report.checkpoints.is_empty());
    }

    #[test]
    fn test_short_epoch_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let source = StubSource { images: 6, batch_size: 4, lost: 1, ..Default::default() };
        let mut session = StubSession::default();
        let mut evaluator = StubEvaluator { calls: Vec::new(), folds: vec![1.0; 10] };

        let result = run_training(&loop_config(1, 1, 1, 1), &LrSchedule::default(), &source, &mut session, &mut evaluator, &store);

        assert!(result.is_err());
        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_progress_restarts_every_epoch() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let source = StubSource { images: 150, batch_size: 1, ..Default::default() };
        let mut session = StubSession::default();
        let mut evaluator = StubEvaluator { calls: Vec::new(), folds: vec![0.5; 10] };

        let (result, text) = capture_logs(|| {
            run_training(&loop_config(1, 2, 50, 50), &LrSchedule::default(), &source, &mut session, &mut evaluator, &store)
        });

        result.unwrap();
        assert_eq!(session.lrs.len(), 300);
        assert_eq!(text.matches("Iters:  100, loss: 1.5000").count(), 2);
        assert!(!text.contains("Iters:  200"));
    }

    #[test]
    fn test_resume_past_second_milestone_uses_third_rate() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let source = StubSource { images: 4, batch_size: 4, ..Default::default() };
        let mut session = StubSession::default();
        let mut evaluator = StubEvaluator { calls: Vec::new(), folds: vec![0.5; 10] };

        run_training(&loop_config(36, 36, 50, 50), &LrSchedule::default(), &source, &mut session, &mut evaluator, &store)
            .unwrap();

        assert_eq!(session.lrs.len(), 1);
        assert!((session.lrs[0] - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_decode_failure_stops_mid_epoch() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let source = StubSource { images: 10, batch_size: 1, broken_after: Some(3), ..Default::default() };
        let mut session = StubSession::default();
        let mut evaluator = StubEvaluator { calls: Vec::new(), folds: vec![0.5; 10] };

        let result = run_training(&loop_config(1, 1, 1, 1), &LrSchedule::default(), &source, &mut session, &mut evaluator, &store);

        assert!(result.is_err());
        assert_eq!(session.lrs.len(), 2);
        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
    }
}
