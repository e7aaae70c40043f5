use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};

use super::ServoChannel;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChannelEvent {
    Started(f64),
    Duty(f64),
    Stopped,
}

/// Shared view of a recording channel's history.
#[derive(Clone, Debug, Default)]
pub struct ChannelLog {
    events: Arc<Mutex<Vec<ChannelEvent>>>,
}

impl ChannelLog {
    pub fn events(&self) -> Vec<ChannelEvent> {
        self.lock().clone()
    }

    /// Most recent duty written (start or set), if any.
    pub fn last_duty(&self) -> Option<f64> {
        self.lock().iter().rev().find_map(|event| match event {
            ChannelEvent::Started(duty) | ChannelEvent::Duty(duty) => Some(*duty),
            ChannelEvent::Stopped => None,
        })
    }

    fn push(&self, event: ChannelEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ChannelEvent>> {
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Servo channel without hardware. Records every command it accepts.
pub struct RecordingChannel {
    name: String,
    log: ChannelLog,
    failures: Arc<Mutex<u32>>,
}

impl RecordingChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log: ChannelLog::default(),
            failures: Arc::new(Mutex::new(0)),
        }
    }

    pub fn log(&self) -> ChannelLog {
        self.log.clone()
    }

    /// Makes the next `count` `set_duty` calls fail without recording.
    pub fn fail_next_commands(&self, count: u32) {
        *self.failures.lock().unwrap_or_else(|p| p.into_inner()) = count;
    }

    fn take_failure(&self) -> bool {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        if *failures > 0 {
            *failures -= 1;
            true
        } else {
            false
        }
    }
}

impl ServoChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, duty: f64) -> Result<()> {
        log::debug!("{}: start at {:.3}%", self.name, duty);
        self.log.push(ChannelEvent::Started(duty));
        Ok(())
    }

    fn set_duty(&mut self, duty: f64) -> Result<()> {
        if self.take_failure() {
            return Err(anyhow!("{}: injected duty write failure", self.name));
        }
        log::trace!("{}: duty {:.3}%", self.name, duty);
        self.log.push(ChannelEvent::Duty(duty));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        log::debug!("{}: stop", self.name);
        self.log.push(ChannelEvent::Stopped);
        Ok(())
    }
}
