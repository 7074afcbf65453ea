use super::{BlockingPolicy, Compiler, TapId};
use crate::bus::{Event, EventBus};
use crate::logger::Logger;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A compiler whose hooks forward onto an event bus.
///
/// Created by [`attach`]; [`detach`](CompilerBinding::detach) removes the taps
/// and makes any tap call already in flight a no-op.
pub struct CompilerBinding {
    compiler: Arc<dyn Compiler>,
    taps: Mutex<Vec<TapId>>,
    closed: Arc<AtomicBool>,
}

impl fmt::Debug for CompilerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerBinding")
            .field("compiler", &self.compiler.name())
            .field("taps", &self.taps.lock().len())
            .field("closed", &self.is_detached())
            .finish()
    }
}

/// Tap `compiler`'s hooks so that every cycle is reported on `bus`.
///
/// - before-run emits `build-started`
/// - a blocking summary (per `policy`) emits `compiler-error` only
/// - warnings emit `compiler-warning`, then `build-finished`
/// - a clean cycle emits `build-finished`
///
/// The taps hold the compiler weakly, so dropping every other handle to it
/// ends forwarding.
pub fn attach(
    compiler: Arc<dyn Compiler>,
    bus: EventBus,
    logger: Logger,
    policy: BlockingPolicy,
) -> CompilerBinding {
    compiler.state().set_blocking_policy(policy);

    let closed = Arc::new(AtomicBool::new(false));
    let weak = Arc::downgrade(&compiler);

    let before_run = {
        let bus = bus.clone();
        let closed = Arc::clone(&closed);
        let weak = weak.clone();
        let logger = logger.clone();
        compiler.hooks().on_before_run(move || {
            if closed.load(Ordering::Acquire) {
                return Ok(());
            }
            let Some(compiler) = weak.upgrade() else {
                return Ok(());
            };

            logger.info("Compiling...");
            bus.emit(&Event::BuildStarted { compiler })
        })
    };

    let after_compile = {
        let closed = Arc::clone(&closed);
        compiler.hooks().on_after_compile(move |stats| {
            if closed.load(Ordering::Acquire) {
                return Ok(());
            }
            let Some(compiler) = weak.upgrade() else {
                return Ok(());
            };

            let summary = stats.summary();

            if policy.is_blocking(&summary) {
                logger.error(format!(
                    "Failed to compile with {} error(s) and {} warning(s)",
                    summary.errors.len(),
                    summary.warnings.len()
                ));
                for error in summary.errors.iter().chain(summary.warnings.iter()) {
                    logger.error(error);
                }
                return bus.emit(&Event::CompilerError {
                    json: summary,
                    compiler,
                });
            }

            if summary.warnings.is_empty() {
                logger.info(format!("Compiled successfully in {}ms", stats.duration_ms));
            } else {
                logger.warn(format!(
                    "Compiled with {} warning(s) in {}ms",
                    summary.warnings.len(),
                    stats.duration_ms
                ));
                for warning in &summary.warnings {
                    logger.warn(warning);
                }
                bus.emit(&Event::CompilerWarning {
                    json: summary,
                    compiler: Arc::clone(&compiler),
                })?;
            }

            bus.emit(&Event::BuildFinished {
                stats: Arc::clone(stats),
                compiler,
            })
        })
    };

    CompilerBinding {
        compiler,
        taps: Mutex::new(vec![before_run, after_compile]),
        closed,
    }
}

impl CompilerBinding {
    pub fn compiler(&self) -> &Arc<dyn Compiler> {
        &self.compiler
    }

    /// Stop forwarding. Safe to call more than once.
    pub fn detach(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for id in self.taps.lock().drain(..) {
            self.compiler.hooks().untap(id);
        }
    }

    pub fn is_detached(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for CompilerBinding {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventKind;
    use crate::compiler::testing::ScriptedCompiler;
    use crate::compiler::Stats;
    use crate::logger::LogLevel;

    fn stats_with(errors: &[&str], warnings: &[&str]) -> Stats {
        Stats {
            name: "scripted".to_string(),
            errors: errors.iter().map(|s| s.to_string()).collect(),
            warnings: warnings.iter().map(|s| s.to_string()).collect(),
            ..Stats::default()
        }
    }

    fn recording_bus() -> (EventBus, Arc<Mutex<Vec<EventKind>>>) {
        let bus = EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let seen = Arc::clone(&seen);
            bus.on(kind, move |event| {
                seen.lock().push(event.kind());
                Ok(())
            });
        }
        (bus, seen)
    }

    fn attach_scripted(
        script: Vec<Stats>,
        policy: BlockingPolicy,
    ) -> (Arc<dyn Compiler>, CompilerBinding, Arc<Mutex<Vec<EventKind>>>) {
        let (bus, seen) = recording_bus();
        let compiler: Arc<dyn Compiler> = Arc::new(ScriptedCompiler::new(script));
        let (logger, _) = Logger::captured(LogLevel::Silent, false);
        let binding = attach(Arc::clone(&compiler), bus, logger, policy);
        (compiler, binding, seen)
    }

    #[tokio::test]
    async fn test_clean_build_emits_finished_only() {
        let (compiler, _binding, seen) =
            attach_scripted(vec![stats_with(&[], &[])], BlockingPolicy::Errors);
        compiler.run().await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![EventKind::BuildStarted, EventKind::BuildFinished]
        );
    }

    #[tokio::test]
    async fn test_warnings_emit_warning_then_finished() {
        let (compiler, _binding, seen) =
            attach_scripted(vec![stats_with(&[], &["unused"])], BlockingPolicy::Errors);
        compiler.run().await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                EventKind::BuildStarted,
                EventKind::CompilerWarning,
                EventKind::BuildFinished
            ]
        );
    }

    #[tokio::test]
    async fn test_errors_block_finished() {
        let (compiler, _binding, seen) = attach_scripted(
            vec![stats_with(&["broken"], &["unused"])],
            BlockingPolicy::Errors,
        );
        compiler.run().await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![EventKind::BuildStarted, EventKind::CompilerError]
        );
    }

    #[tokio::test]
    async fn test_warnings_block_under_strict_policy() {
        let (compiler, _binding, seen) = attach_scripted(
            vec![stats_with(&[], &["unused"])],
            BlockingPolicy::ErrorsAndWarnings,
        );
        compiler.run().await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![EventKind::BuildStarted, EventKind::CompilerError]
        );
    }

    #[tokio::test]
    async fn test_error_payload_is_summary() {
        let bus = EventBus::default();
        let payload = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&payload);
        bus.on(EventKind::CompilerError, move |event| {
            if let Event::CompilerError { json, compiler } = event {
                assert_eq!(compiler.name(), "scripted");
                *slot.lock() = Some(json.clone());
            }
            Ok(())
        });

        let compiler: Arc<dyn Compiler> =
            Arc::new(ScriptedCompiler::new(vec![stats_with(&["e1"], &["w1"])]));
        let (logger, _) = Logger::captured(LogLevel::Silent, false);
        let _binding = attach(Arc::clone(&compiler), bus, logger, BlockingPolicy::Errors);
        compiler.run().await.unwrap();

        let json = payload.lock().clone().unwrap();
        assert_eq!(json.errors, vec!["e1"]);
        assert_eq!(json.warnings, vec!["w1"]);
    }

    #[tokio::test]
    async fn test_detach_stops_forwarding() {
        let (compiler, binding, seen) =
            attach_scripted(vec![stats_with(&[], &[]); 2], BlockingPolicy::Errors);
        compiler.run().await.unwrap();

        binding.detach();
        binding.detach();
        assert!(binding.is_detached());
        assert_eq!(compiler.hooks().tap_count(), 0);

        compiler.run().await.unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_build_logs_are_written() {
        let compiler: Arc<dyn Compiler> =
            Arc::new(ScriptedCompiler::new(vec![stats_with(&[], &["careful"])]));
        let (logger, capture) = Logger::captured(LogLevel::Info, false);
        let _binding = attach(
            Arc::clone(&compiler),
            EventBus::default(),
            logger,
            BlockingPolicy::Errors,
        );
        compiler.run().await.unwrap();

        let lines = capture.lines();
        assert!(lines.iter().any(|l| l.contains("Compiled with 1 warning(s)")));
        assert!(lines.iter().any(|l| l.contains("careful")));
    }
}
