//! Horloge temps réel de la boucle d'émulation

use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use log::{info, warn};
use parking_lot::Mutex;

/// Marge d'attente active avant l'échéance
const SPIN_THRESHOLD: Duration = Duration::from_micros(500);

/// Source de temps et attente à échéance absolue
pub trait Clock: Send + Sync {
    /// Temps courant en secondes
    fn now(&self) -> f64;

    /// Bloque jusqu'à l'instant absolu `deadline` (secondes, même base que `now`)
    fn wait_until(&self, deadline: f64);

    /// Période de la boucle, transmise depuis le thread qui sera cadencé
    fn set_period_hint(&self, _period: f64) {}
}

/// Horloge monotone du système
///
/// L'attente dort jusqu'à peu avant l'échéance puis termine en attente
/// active, sans jamais accumuler de dérive. La première indication de période
/// reçue sur un thread le passe en ordonnancement temps réel.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
    period: Mutex<Option<Duration>>,

    /// Dernier thread dont la promotion temps réel a été tentée
    scheduled_thread: Mutex<Option<ThreadId>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            period: Mutex::new(None),
            scheduled_thread: Mutex::new(None),
        }
    }

    pub fn period_hint(&self) -> Option<Duration> {
        *self.period.lock()
    }

    pub fn scheduled_thread(&self) -> Option<ThreadId> {
        *self.scheduled_thread.lock()
    }

    /// Promeut le thread courant une seule fois, même si la période change
    fn schedule_current_thread(&self, period: Duration) {
        let current = thread::current().id();
        {
            let mut scheduled = self.scheduled_thread.lock();
            if *scheduled == Some(current) {
                return;
            }
            *scheduled = Some(current);
        }

        match promote_current_thread() {
            Ok(()) => info!(
                "Thread d'émulation en temps réel (période {:.3} ms)",
                period.as_secs_f64() * 1000.0
            ),
            Err(err) => warn!(
                "Impossible de passer le thread d'émulation en temps réel: {:?}",
                err
            ),
        }
    }

    fn instant_at(&self, seconds: f64) -> Instant {
        if seconds <= 0.0 || !seconds.is_finite() {
            return self.origin;
        }
        self.origin + Duration::from_secs_f64(seconds)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn wait_until(&self, deadline: f64) {
        let target = self.instant_at(deadline);

        loop {
            let now = Instant::now();
            if now >= target {
                return;
            }

            let remaining = target - now;
            if remaining > SPIN_THRESHOLD {
                thread::sleep(remaining - SPIN_THRESHOLD);
            } else {
                std::hint::spin_loop();
            }
        }
    }

    fn set_period_hint(&self, period: f64) {
        if !period.is_finite() || period <= 0.0 {
            return;
        }

        let period = Duration::from_secs_f64(period);
        *self.period.lock() = Some(period);
        self.schedule_current_thread(period);
    }
}

#[cfg(unix)]
fn promote_current_thread() -> Result<(), thread_priority::Error> {
    use thread_priority::{
        set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
        ThreadPriority, ThreadSchedulePolicy,
    };

    set_thread_priority_and_policy(
        thread_native_id(),
        ThreadPriority::Max,
        ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
    )
}

#[cfg(not(unix))]
fn promote_current_thread() -> Result<(), thread_priority::Error> {
    thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max)
}
