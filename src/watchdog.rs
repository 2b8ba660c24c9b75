//! Idle-connection watchdog.
//!
//! A single background thread owns one optional deadline. Arming replaces
//! the deadline, disarming clears it, so a check is never scheduled twice.
//! When the deadline passes the thread runs the check callback; the callback
//! is expected to re-arm.

use crate::error::{ClientError, Result};
use crossbeam_channel::{at, never, select, unbounded, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

enum Command {
    Arm(Duration),
    Disarm,
    Shutdown,
}

/// Handle to the watchdog thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct IdleWatchdog {
    commands: Sender<Command>,
}

impl IdleWatchdog {
    /// Start the thread. `on_fire` runs each time an armed deadline passes;
    /// returning false stops the watchdog.
    pub fn spawn<F>(on_fire: F) -> Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (commands, receiver) = unbounded();
        thread::Builder::new()
            .name("pubsync-watchdog".to_string())
            .spawn(move || run(receiver, on_fire))
            .map_err(|e| ClientError::Transport(format!("failed to start watchdog: {e}")))?;
        Ok(Self { commands })
    }

    /// Fire once after `delay`, replacing any pending deadline.
    pub fn arm(&self, delay: Duration) {
        let _ = self.commands.send(Command::Arm(delay));
    }

    /// Cancel the pending deadline, if any.
    pub fn disarm(&self) {
        let _ = self.commands.send(Command::Disarm);
    }
}

impl Drop for IdleWatchdog {
    fn drop(&mut self) {
        // Not joined: the last client handle may be released on this thread.
        let _ = self.commands.send(Command::Shutdown);
    }
}

fn run<F>(commands: Receiver<Command>, mut on_fire: F)
where
    F: FnMut() -> bool,
{
    let mut deadline: Option<Instant> = None;

    loop {
        let timer = match deadline {
            Some(deadline) => at(deadline),
            None => never(),
        };

        select! {
            recv(commands) -> command => match command {
                // Past the end of the clock means never.
                Ok(Command::Arm(delay)) => deadline = Instant::now().checked_add(delay),
                Ok(Command::Disarm) => deadline = None,
                Ok(Command::Shutdown) | Err(_) => break,
            },
            recv(timer) -> _ => {
                deadline = None;
                tracing::trace!("idle watchdog fired");
                if !on_fire() {
                    break;
                }
            }
        }
    }

    tracing::trace!("idle watchdog stopped");
}
