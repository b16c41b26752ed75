//! Sensing buffer and reservation projection.
//!
//! The buffer is owned by whoever ingests sensing data. The exclusion
//! engine only ever reads a trimmed copy ([`SensingBuffer::snapshot`]).

use std::collections::VecDeque;

use crate::errors::SchedError;
use crate::types::{SensedReservation, SlotIndex};

/// Rolling buffer of sensed reservations, ordered by reception slot.
///
/// Entries age out once older than the sensing window; when the buffer is
/// full the oldest entry is evicted.
#[derive(Debug, Clone)]
pub struct SensingBuffer {
    window_slots: u64,
    capacity: usize,
    entries: VecDeque<SensedReservation>,
}

impl SensingBuffer {
    pub fn new(window_slots: u64, capacity: usize) -> Self {
        Self {
            window_slots,
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Record one sensed reservation at time `now`.
    ///
    /// # Errors
    /// Returns `SchedError::Sensing` when the reservation claims to have
    /// been received after `now`.
    pub fn record(&mut self, now: SlotIndex, reservation: SensedReservation) -> Result<(), SchedError> {
        if reservation.slot > now {
            return Err(SchedError::Sensing(format!(
                "reservation sensed at slot {} is after now ({now})",
                reservation.slot
            )));
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        // Late deliveries keep reception order.
        let at = self.entries.partition_point(|e| e.slot <= reservation.slot);
        self.entries.insert(at, reservation);
        Ok(())
    }

    /// Drop entries older than the sensing window. Returns how many went.
    pub fn expire(&mut self, now: SlotIndex) -> usize {
        let before = self.entries.len();
        while let Some(front) = self.entries.front() {
            if now.saturating_sub(front.slot) > self.window_slots {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        before - self.entries.len()
    }

    /// Copy of the entries usable at `now`: anything sensed within the last
    /// `tproc0` slots is still being processed and is left out.
    pub fn snapshot(&self, now: SlotIndex, tproc0: u16) -> Vec<SensedReservation> {
        self.entries
            .iter()
            .filter(|e| e.slot <= now && now - e.slot > u64::from(tproc0))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensedReservation> {
        self.entries.iter()
    }

    pub fn window_slots(&self) -> u64 {
        self.window_slots
    }
}

/// A future transmission predicted from a sensed reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedTx {
    pub slot: SlotIndex,
    pub src_id: u16,
    pub retx_counter: u8,
    pub sub_band_start: u8,
    pub sub_band_len: u8,
    pub rsrp_dbm: f64,
    pub corrupt: bool,
}

/// Project a reservation's next `count` repeats using its own period.
///
/// A one-shot reservation (period 0) projects nothing.
pub fn project_future(reservation: &SensedReservation, count: u16) -> Vec<ProjectedTx> {
    if reservation.reservation_period_slots == 0 {
        return Vec::new();
    }
    let period = u64::from(reservation.reservation_period_slots);
    (1..=u64::from(count))
        .map(|k| ProjectedTx {
            slot: reservation.slot + k * period,
            src_id: reservation.src_id,
            retx_counter: reservation.retx_counter,
            sub_band_start: reservation.sub_band_start,
            sub_band_len: reservation.sub_band_len,
            rsrp_dbm: reservation.rsrp_dbm,
            corrupt: reservation.corrupt,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(slot: SlotIndex) -> SensedReservation {
        SensedReservation {
            src_id: 7,
            retx_counter: 1,
            slot,
            sub_band_start: 2,
            sub_band_len: 1,
            rsrp_dbm: -90.0,
            corrupt: false,
            reservation_period_slots: 400,
        }
    }

    #[test]
    fn record_rejects_future_entries() {
        let mut buf = SensingBuffer::new(1000, 16);
        assert!(buf.record(10, reservation(11)).is_err());
        assert!(buf.is_empty());
        assert!(buf.record(10, reservation(10)).is_ok());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn record_evicts_oldest_when_full() {
        let mut buf = SensingBuffer::new(1000, 2);
        buf.record(5, reservation(1)).unwrap();
        buf.record(5, reservation(2)).unwrap();
        buf.record(5, reservation(3)).unwrap();
        let slots: Vec<_> = buf.iter().map(|e| e.slot).collect();
        assert_eq!(slots, vec![2, 3]);
    }

    #[test]
    fn late_entry_keeps_reception_order() {
        let mut buf = SensingBuffer::new(1000, 8);
        buf.record(9, reservation(4)).unwrap();
        buf.record(9, reservation(8)).unwrap();
        buf.record(9, reservation(6)).unwrap();
        let slots: Vec<_> = buf.iter().map(|e| e.slot).collect();
        assert_eq!(slots, vec![4, 6, 8]);
    }

    #[test]
    fn expire_drops_entries_outside_window() {
        let mut buf = SensingBuffer::new(100, 8);
        buf.record(50, reservation(10)).unwrap();
        buf.record(150, reservation(120)).unwrap();
        assert_eq!(buf.expire(150), 1);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.iter().next().unwrap().slot, 120);
    }

    #[test]
    fn snapshot_skips_entries_within_tproc0() {
        let mut buf = SensingBuffer::new(1000, 8);
        buf.record(100, reservation(90)).unwrap();
        buf.record(100, reservation(99)).unwrap();
        buf.record(100, reservation(100)).unwrap();
        let snap = buf.snapshot(100, 1);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].slot, 90);
        // input untouched
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn projection_uses_own_period() {
        let future = project_future(&reservation(10), 3);
        let slots: Vec<_> = future.iter().map(|f| f.slot).collect();
        assert_eq!(slots, vec![410, 810, 1210]);
    }

    #[test]
    fn one_shot_reservation_projects_nothing() {
        let mut r = reservation(10);
        r.reservation_period_slots = 0;
        assert!(project_future(&r, 3).is_empty());
    }
}
