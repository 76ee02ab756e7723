use serde::{Deserialize, Serialize};

use crate::domain::ReservationStatus;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCounts {
    pub queued: usize,
    pub ready: usize,
    pub cancelled: usize,
}

impl ReservationCounts {
    pub fn record(&mut self, status: ReservationStatus) {
        match status {
            ReservationStatus::Queued => self.queued += 1,
            ReservationStatus::Ready => self.ready += 1,
            ReservationStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn live(&self) -> usize {
        self.queued + self.ready
    }
}
