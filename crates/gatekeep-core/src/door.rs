// ── Door controller ──
//
// Two-state machine (Closed / Open) with an auto-close timer per opening
// and an independent watchdog bounding time spent open. Each opening gets
// a new generation number; a timer only closes the opening that armed it.
//
// Door commands are published under the state mutex so the bus sees them
// in the order the state changed. Publishing never awaits; the mutex is
// never held across an await.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use strum::{Display, EnumString};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::DoorTiming;
use crate::outbound::Outbound;
use crate::telemetry::TelemetrySink;

/// Door command payload on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum DoorCommand {
    #[strum(serialize = "OPEN")]
    Open,
    #[strum(serialize = "CLOSE")]
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DoorState {
    Closed,
    Open,
}

/// Why a close happened. Logged only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CloseReason {
    AutoClose,
    Watchdog,
    External,
    Manual,
}

#[derive(Debug)]
struct DoorSlot {
    state: DoorState,
    /// Set iff `state == Open`.
    opened_at: Option<Instant>,
    generation: u64,
    timer: Option<CancellationToken>,
    /// A CLOSE could not be handed to the bus.
    pending_close: bool,
}

struct DoorInner {
    slot: Mutex<DoorSlot>,
    timing: DoorTiming,
    outbound: Outbound,
    telemetry: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

/// Shared handle to the door state machine. Cheap to clone.
#[derive(Clone)]
pub struct DoorController {
    inner: Arc<DoorInner>,
}

impl DoorController {
    /// Timers are children of `cancel` and die with it.
    pub fn new(
        timing: DoorTiming,
        outbound: Outbound,
        telemetry: Arc<dyn TelemetrySink>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(DoorInner {
                slot: Mutex::new(DoorSlot {
                    state: DoorState::Closed,
                    opened_at: None,
                    generation: 0,
                    timer: None,
                    pending_close: false,
                }),
                timing,
                outbound,
                telemetry,
                clock,
                cancel,
            }),
        }
    }

    pub fn state(&self) -> DoorState {
        self.inner.lock().state
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.inner.lock().opened_at
    }

    pub fn has_pending_close(&self) -> bool {
        self.inner.lock().pending_close
    }

    /// Open the door and arm the auto-close timer.
    ///
    /// No-op returning `false` while already open; the running timer is
    /// left untouched.
    pub fn admit(&self) -> bool {
        let (generation, timer) = {
            let mut slot = self.inner.lock();
            if slot.state == DoorState::Open {
                debug!("door already open, admit ignored");
                return false;
            }
            slot.state = DoorState::Open;
            slot.opened_at = Some(Instant::now());
            slot.generation += 1;
            slot.pending_close = false;
            let timer = self.inner.cancel.child_token();
            slot.timer = Some(timer.clone());

            info!(generation = slot.generation, "door opening");
            if let Err(e) = self.inner.outbound.door(DoorCommand::Open) {
                warn!(error = %e, "OPEN command not published");
            }
            (slot.generation, timer)
        };

        self.inner
            .telemetry
            .publish_door_status(DoorCommand::Open, self.inner.clock.now());

        let inner = Arc::clone(&self.inner);
        let delay = self.inner.timing.auto_close;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = timer.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    inner.close_where(CloseReason::AutoClose, |slot| slot.generation == generation);
                }
            }
        });
        true
    }

    /// Close now. Returns `false` if the door was already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.inner.close_where(reason, |_| true)
    }

    /// Force a close if the door has been open longer than the safety bound.
    pub fn enforce_deadline(&self) -> bool {
        let bound = self.inner.timing.safety_bound;
        self.inner.close_where(CloseReason::Watchdog, |slot| {
            slot.opened_at.is_some_and(|t| t.elapsed() > bound)
        })
    }

    /// Re-emit a CLOSE that previously failed to publish.
    pub fn resend_pending(&self) -> bool {
        let mut slot = self.inner.lock();
        if !slot.pending_close || slot.state == DoorState::Open {
            return false;
        }
        info!("re-emitting pending CLOSE");
        self.inner.emit_close(&mut slot)
    }

    /// Periodic deadline check until `cancel` fires.
    pub fn spawn_watchdog(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let door = self.clone();
        let period = self.inner.timing.watchdog_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        door.enforce_deadline();
                    }
                }
            }
            debug!("door watchdog exiting");
        })
    }
}

impl DoorInner {
    fn lock(&self) -> MutexGuard<'_, DoorSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_where(&self, reason: CloseReason, pred: impl FnOnce(&DoorSlot) -> bool) -> bool {
        {
            let mut slot = self.lock();
            if slot.state == DoorState::Closed || !pred(&slot) {
                return false;
            }
            let open_for = slot.opened_at.map_or(Duration::ZERO, |t| t.elapsed());
            slot.state = DoorState::Closed;
            slot.opened_at = None;
            if let Some(timer) = slot.timer.take() {
                timer.cancel();
            }

            let open_ms = u64::try_from(open_for.as_millis()).unwrap_or(u64::MAX);
            if reason == CloseReason::Watchdog {
                warn!(open_ms, "door open past safety bound, forcing close");
            } else {
                info!(%reason, open_ms, "door closing");
            }
            self.emit_close(&mut slot);
        }

        self.telemetry
            .publish_door_status(DoorCommand::Close, self.clock.now());
        true
    }

    /// Publish CLOSE for a door already marked closed in `slot`.
    fn emit_close(&self, slot: &mut DoorSlot) -> bool {
        match self.outbound.door(DoorCommand::Close) {
            Ok(()) => {
                slot.pending_close = false;
                true
            }
            Err(e) => {
                warn!(error = %e, "CLOSE command not published, will retry on reconnect");
                slot.pending_close = true;
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, Local};

    use super::*;
    use crate::clock::SystemClock;
    use crate::config::TopicMap;
    use crate::outbound::MemoryPublisher;

    #[derive(Default)]
    struct CountingTelemetry {
        door: AtomicUsize,
    }

    impl TelemetrySink for CountingTelemetry {
        fn publish_admission(&self, _: &str, _: &str, _: DateTime<Local>) {}

        fn publish_door_status(&self, _: DoorCommand, _: DateTime<Local>) {
            self.door.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Rig {
        door: DoorController,
        publisher: Arc<MemoryPublisher>,
        telemetry: Arc<CountingTelemetry>,
    }

    impl Rig {
        fn door_payloads(&self) -> Vec<String> {
            self.publisher.payloads("lintas_alam/door")
        }
    }

    fn rig(timing: DoorTiming) -> Rig {
        let publisher = Arc::new(MemoryPublisher::new());
        let telemetry = Arc::new(CountingTelemetry::default());
        let outbound = Outbound::new(publisher.clone(), TopicMap::default());
        let door = DoorController::new(
            timing,
            outbound,
            telemetry.clone(),
            Arc::new(SystemClock),
            CancellationToken::new(),
        );
        Rig {
            door,
            publisher,
            telemetry,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn admit_opens_and_auto_closes() {
        let rig = rig(DoorTiming::default());

        assert!(rig.door.admit());
        assert_eq!(rig.door.state(), DoorState::Open);
        assert!(rig.door.opened_at().is_some());
        assert_eq!(rig.door_payloads(), vec!["OPEN"]);

        tokio::time::sleep(Duration::from_millis(6_900)).await;
        assert_eq!(rig.door.state(), DoorState::Open);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rig.door.state(), DoorState::Closed);
        assert!(rig.door.opened_at().is_none());
        assert_eq!(rig.door_payloads(), vec!["OPEN", "CLOSE"]);
        assert_eq!(rig.telemetry.door.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn admit_while_open_is_noop() {
        let rig = rig(DoorTiming::default());

        assert!(rig.door.admit());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!rig.door.admit());

        // The original timer still closes at 7s, not 10s.
        tokio::time::sleep(Duration::from_millis(4_100)).await;
        assert_eq!(rig.door.state(), DoorState::Closed);
        assert_eq!(rig.door_payloads(), vec!["OPEN", "CLOSE"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_close_a_later_opening() {
        let rig = rig(DoorTiming::default());

        assert!(rig.door.admit());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rig.door.close(CloseReason::External));
        assert!(rig.door.admit());

        // First opening's deadline (7s) passes; second (9s) has not.
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(rig.door.state(), DoorState::Open);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rig.door.state(), DoorState::Closed);
        assert_eq!(rig.door_payloads(), vec!["OPEN", "CLOSE", "OPEN", "CLOSE"]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_when_closed_is_noop() {
        let rig = rig(DoorTiming::default());
        assert!(!rig.door.close(CloseReason::Manual));
        assert!(rig.door_payloads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_forces_close_past_safety_bound() {
        let rig = rig(DoorTiming {
            auto_close: Duration::from_secs(60),
            safety_bound: Duration::from_secs(10),
            watchdog_period: Duration::from_secs(1),
        });
        let cancel = CancellationToken::new();
        let watchdog = rig.door.spawn_watchdog(cancel.clone());

        assert!(rig.door.admit());
        tokio::time::sleep(Duration::from_millis(9_500)).await;
        assert_eq!(rig.door.state(), DoorState::Open);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rig.door.state(), DoorState::Closed);
        assert_eq!(rig.door_payloads(), vec!["OPEN", "CLOSE"]);

        cancel.cancel();
        watchdog.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_close_is_resent() {
        let rig = rig(DoorTiming::default());
        assert!(rig.door.admit());

        rig.publisher.set_failing(true);
        assert!(rig.door.close(CloseReason::Manual));
        assert!(rig.door.has_pending_close());
        assert!(!rig.door.resend_pending());

        rig.publisher.set_failing(false);
        assert!(rig.door.resend_pending());
        assert!(!rig.door.has_pending_close());
        assert_eq!(rig.door_payloads(), vec!["OPEN", "CLOSE"]);
    }

    /// Records door commands, taking a while to hand off a CLOSE.
    #[derive(Default)]
    struct SlowClosePublisher {
        sent: std::sync::Mutex<Vec<String>>,
    }

    impl crate::outbound::Publisher for SlowClosePublisher {
        fn publish(&self, _topic: &str, payload: &str) -> Result<(), crate::CoreError> {
            if payload == "CLOSE" {
                std::thread::sleep(Duration::from_millis(150));
            }
            self.sent.lock().unwrap().push(payload.to_owned());
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_racing_admit_keeps_bus_in_state_order() {
        let publisher = Arc::new(SlowClosePublisher::default());
        let door = DoorController::new(
            DoorTiming::default(),
            Outbound::new(publisher.clone(), TopicMap::default()),
            Arc::new(CountingTelemetry::default()),
            Arc::new(SystemClock),
            CancellationToken::new(),
        );
        assert!(door.admit());

        let closer = {
            let door = door.clone();
            std::thread::spawn(move || door.close(CloseReason::External))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(door.admit());
        assert!(closer.join().unwrap());

        assert_eq!(door.state(), DoorState::Open);
        assert_eq!(*publisher.sent.lock().unwrap(), vec!["OPEN", "CLOSE", "OPEN"]);
    }

    #[test]
    fn command_strings() {
        assert_eq!(DoorCommand::Open.to_string(), "OPEN");
        assert_eq!("CLOSE".parse::<DoorCommand>().unwrap(), DoorCommand::Close);
        assert!("close".parse::<DoorCommand>().is_err());
        assert_eq!(CloseReason::AutoClose.to_string(), "auto_close");
    }
}
