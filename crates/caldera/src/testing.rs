use alloc::vec::Vec;

use crate::machine::{Actions, Request};
use crate::timestamp::Clock;

// A clock moved forward by hand.
#[derive(Debug, Default)]
pub(crate) struct ManualClock {
    pub(crate) secs: u32,
    pub(crate) waits: usize,
}

impl ManualClock {
    pub(crate) const fn new(secs: u32) -> Self {
        Self { secs, waits: 0 }
    }

    pub(crate) fn advance(&mut self, secs: u32) {
        self.secs += secs;
    }
}

impl Clock for ManualClock {
    fn elapsed_secs(&self) -> u32 {
        self.secs
    }

    fn wait_for_next_second(&mut self, current: u32) {
        self.waits += 1;
        self.secs = current + 1;
    }
}

// Records every physical effect requested by the state machine.
#[derive(Debug, Default)]
pub(crate) struct RecordingActions {
    pub(crate) heater: Vec<bool>,
    pub(crate) requests: Vec<Request>,
}

impl Actions for RecordingActions {
    fn set_heater(&mut self, on: bool) {
        self.heater.push(on);
    }

    fn request(&mut self, request: Request) {
        self.requests.push(request);
    }
}
