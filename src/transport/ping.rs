use super::PING_TIMEOUT;
use rand::Rng;
use std::time::Duration;
use tokio::time::{Instant, Sleep, sleep_until};

/// Paired liveness deadlines for one session.
///
/// The send deadline is jittered within `[PING_TIMEOUT / 2, PING_TIMEOUT)`
/// so a fleet of sessions does not ping in lockstep. The receive deadline
/// fires a full `PING_TIMEOUT` after the last received frame.
#[derive(Debug)]
pub(crate) struct PingTimers {
    send_deadline: Instant,
    recv_deadline: Instant,
}

impl PingTimers {
    pub(crate) fn new() -> Self {
        Self {
            send_deadline: Instant::now() + send_interval(),
            recv_deadline: Instant::now() + PING_TIMEOUT,
        }
    }

    pub(crate) fn send_deadline(&self) -> Sleep {
        sleep_until(self.send_deadline)
    }

    pub(crate) fn reset_send_deadline(&mut self) {
        self.send_deadline = Instant::now() + send_interval();
    }

    pub(crate) fn recv_deadline(&self) -> Sleep {
        sleep_until(self.recv_deadline)
    }

    pub(crate) fn reset_recv_deadline(&mut self) {
        self.recv_deadline = Instant::now() + PING_TIMEOUT;
    }
}

fn send_interval() -> Duration {
    let base = PING_TIMEOUT / 2;
    base + Duration::from_millis(rand::thread_rng().gen_range(0..base.as_millis() as u64))
}
