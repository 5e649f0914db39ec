//! CSMA/CA medium access for wireless devices.
//!
//! Contains helpers for:
//! - Per-device transmit queue with a fixed capacity
//! - Carrier-sense gate with a random backoff drawn from the contention window
//! - Binary exponential backoff driven by collisions of the device's own frames
//! - Post-backoff after every transmission
//!
//! The MAC only decides; it never touches the channel or the scheduler. The
//! network layer senses the medium, passes the result to [`CsmaMac::access`]
//! and acts on the returned [`MacAction`]. It also reports the fate of every
//! frame the device sent through [`CsmaMac::on_frame_collided`] and
//! [`CsmaMac::on_frame_delivered`].

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};
use serde::Deserialize;
use std::collections::VecDeque;

use super::clock::SimTime;
use super::types::Packet;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MacParameters {
    pub slot_us: i64,
    pub difs_us: i64,
    /// Initial contention window, in slots.
    pub cw_min: u32,
    pub cw_max: u32,
    /// Consecutive busy senses tolerated before the head frame is dropped.
    pub max_attempts: u32,
    pub queue_capacity: usize,
}

impl Default for MacParameters {
    fn default() -> Self {
        Self {
            slot_us: 9,
            difs_us: 34,
            cw_min: 15,
            cw_max: 1023,
            max_attempts: 7,
            queue_capacity: 100,
        }
    }
}

impl MacParameters {
    pub fn slot(&self) -> SimTime {
        SimTime::from_micros(self.slot_us)
    }

    pub fn difs(&self) -> SimTime {
        SimTime::from_micros(self.difs_us)
    }

    /// Next window in the binary exponential sequence: `2·cw + 1`, capped at `cw_max`.
    fn widen(&self, cw: u32) -> u32 {
        cw.saturating_mul(2).saturating_add(1).min(self.cw_max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacState {
    /// Nothing queued and no access attempt scheduled.
    Idle,
    /// An access attempt (or the post-backoff after a frame) is scheduled.
    Contending,
    Transmitting,
}

#[derive(Debug, PartialEq)]
pub enum MacAction {
    /// Medium idle: put this frame on the air now.
    Transmit(Packet),
    /// Try again after this delay.
    Backoff(SimTime),
    /// Retry limit reached for the head frame.
    Drop(Packet),
    /// Nothing to send.
    Idle,
}

pub struct CsmaMac {
    params: MacParameters,
    queue: VecDeque<Packet>,
    state: MacState,
    /// Collision-driven contention window.
    cw: u32,
    /// Busy senses for the head frame.
    attempts: u32,
    /// Set when an own frame collided; the next frame must draw a backoff first.
    backoff_due: bool,
    rng: ChaCha8Rng,
}

impl CsmaMac {
    pub fn new(params: MacParameters, seed: u64) -> Self {
        let cw = params.cw_min;
        Self {
            params,
            queue: VecDeque::new(),
            state: MacState::Idle,
            cw,
            attempts: 0,
            backoff_due: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn state(&self) -> MacState {
        self.state
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn contention_window(&self) -> u32 {
        self.cw
    }

    pub fn params(&self) -> &MacParameters {
        &self.params
    }

    /// Queue a frame. Returns `Ok(true)` when the caller must start an access
    /// attempt, `Err(packet)` when the queue is full.
    pub fn enqueue(&mut self, packet: Packet) -> Result<bool, Packet> {
        if self.queue.len() >= self.params.queue_capacity {
            return Err(packet);
        }
        self.queue.push_back(packet);
        if self.state == MacState::Idle {
            self.state = MacState::Contending;
            return Ok(true);
        }
        Ok(false)
    }

    /// Run one access attempt given the carrier-sense result.
    pub fn access(&mut self, busy: bool) -> MacAction {
        if self.state == MacState::Transmitting {
            return MacAction::Idle;
        }
        if self.queue.is_empty() {
            self.state = MacState::Idle;
            return MacAction::Idle;
        }
        if !busy && !self.backoff_due {
            let Some(packet) = self.queue.pop_front() else {
                self.state = MacState::Idle;
                return MacAction::Idle;
            };
            self.state = MacState::Transmitting;
            self.attempts = 0;
            return MacAction::Transmit(packet);
        }
        if !busy {
            self.backoff_due = false;
            self.state = MacState::Contending;
            return MacAction::Backoff(self.draw_backoff(self.cw));
        }

        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.params.max_attempts {
            self.attempts = 0;
            let Some(packet) = self.queue.pop_front() else {
                self.state = MacState::Idle;
                return MacAction::Idle;
            };
            self.state = if self.queue.is_empty() { MacState::Idle } else { MacState::Contending };
            return MacAction::Drop(packet);
        }

        self.backoff_due = false;
        self.state = MacState::Contending;
        MacAction::Backoff(self.draw_backoff(self.retry_window()))
    }

    /// Transmission finished. Returns the post-backoff `DIFS + U{0..cw}·slot`
    /// after which the next access attempt runs.
    pub fn on_tx_end(&mut self) -> SimTime {
        self.state = MacState::Contending;
        self.draw_backoff(self.cw)
    }

    /// An own frame collided at its receiver: widen the window and back off before the next frame.
    pub fn on_frame_collided(&mut self) {
        self.cw = self.params.widen(self.cw);
        self.backoff_due = true;
    }

    /// An own frame was received cleanly.
    pub fn on_frame_delivered(&mut self) {
        self.cw = self.params.cw_min;
    }

    /// Empty the queue, e.g. when the device goes down.
    pub fn drain(&mut self) -> Vec<Packet> {
        self.cw = self.params.cw_min;
        self.attempts = 0;
        self.backoff_due = false;
        if self.state != MacState::Transmitting {
            self.state = MacState::Idle;
        }
        self.queue.drain(..).collect()
    }

    /// Window for the next retry after consecutive busy senses: the contention
    /// window widened once per busy sense beyond the first.
    pub fn retry_window(&self) -> u32 {
        let mut window = self.cw;
        for _ in 1..self.attempts {
            if window >= self.params.cw_max {
                break;
            }
            window = self.params.widen(window);
        }
        window
    }

    fn draw_backoff(&mut self, window: u32) -> SimTime {
        let slots = Uniform::new_inclusive(0, window).sample(&mut self.rng);
        self.params.difs() + self.params.slot() * i64::from(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn packet(id: u64) -> Packet {
        Packet {
            id,
            source: SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 49153),
            destination: SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 2), 10),
            size: 512,
            created: SimTime::ZERO,
        }
    }

    fn assert_backoff_within(delay: SimTime, params: &MacParameters, window: u32) {
        assert!(delay >= params.difs(), "{delay} shorter than DIFS");
        assert!(delay <= params.difs() + params.slot() * i64::from(window), "{delay} beyond window {window}");
    }

    #[test]
    fn idle_medium_transmits_head_of_line() {
        let params = MacParameters::default();
        let mut mac = CsmaMac::new(params.clone(), 1);
        assert_eq!(mac.enqueue(packet(0)), Ok(true));
        assert_eq!(mac.enqueue(packet(1)), Ok(false));
        assert_eq!(mac.access(false), MacAction::Transmit(packet(0)));
        assert_eq!(mac.state(), MacState::Transmitting);
        assert_backoff_within(mac.on_tx_end(), &params, params.cw_min);
        assert_eq!(mac.access(false), MacAction::Transmit(packet(1)));
        // Post-backoff runs even with nothing queued.
        assert_backoff_within(mac.on_tx_end(), &params, params.cw_min);
        assert_eq!(mac.state(), MacState::Contending);
        assert_eq!(mac.access(false), MacAction::Idle);
        assert_eq!(mac.state(), MacState::Idle);
    }

    #[test]
    fn frame_queued_during_post_backoff_waits_for_it() {
        let mut mac = CsmaMac::new(MacParameters::default(), 4);
        mac.enqueue(packet(0)).unwrap();
        assert!(matches!(mac.access(false), MacAction::Transmit(_)));
        mac.on_tx_end();
        // The pending post-backoff attempt serves the new frame.
        assert_eq!(mac.enqueue(packet(1)), Ok(false));
        assert_eq!(mac.access(false), MacAction::Transmit(packet(1)));
    }

    #[test]
    fn collisions_double_the_window_and_delivery_resets_it() {
        let params = MacParameters {
            cw_min: 3,
            cw_max: 20,
            ..MacParameters::default()
        };
        let mut mac = CsmaMac::new(params.clone(), 9);
        let mut windows = vec![mac.contention_window()];
        for _ in 0..4 {
            mac.on_frame_collided();
            windows.push(mac.contention_window());
        }
        assert_eq!(windows, vec![3, 7, 15, 20, 20]);
        mac.on_frame_delivered();
        assert_eq!(mac.contention_window(), 3);
    }

    #[test]
    fn collision_forces_backoff_before_next_frame() {
        let params = MacParameters::default();
        let mut mac = CsmaMac::new(params.clone(), 5);
        mac.enqueue(packet(0)).unwrap();
        assert!(matches!(mac.access(false), MacAction::Transmit(_)));
        mac.on_tx_end();
        assert_eq!(mac.access(false), MacAction::Idle);
        mac.on_frame_collided();

        assert_eq!(mac.enqueue(packet(1)), Ok(true));
        match mac.access(false) {
            MacAction::Backoff(delay) => assert_backoff_within(delay, &params, 31),
            other => panic!("expected backoff, got {other:?}"),
        }
        assert_eq!(mac.access(false), MacAction::Transmit(packet(1)));
    }

    #[test]
    fn busy_retries_widen_the_window() {
        let params = MacParameters {
            cw_min: 3,
            cw_max: 20,
            max_attempts: 10,
            ..MacParameters::default()
        };
        let mut mac = CsmaMac::new(params.clone(), 9);
        mac.enqueue(packet(0)).unwrap();
        let mut windows = Vec::new();
        for _ in 0..4 {
            let MacAction::Backoff(delay) = mac.access(true) else {
                panic!("expected backoff");
            };
            windows.push(mac.retry_window());
            assert_backoff_within(delay, &params, mac.retry_window());
        }
        assert_eq!(windows, vec![3, 7, 15, 20]);
        // Busy senses leave the collision window alone.
        assert_eq!(mac.contention_window(), 3);
        assert!(matches!(mac.access(false), MacAction::Transmit(_)));
        assert_eq!(mac.retry_window(), 3);
    }

    #[test]
    fn huge_windows_do_not_overflow() {
        let params = MacParameters {
            cw_min: 3_000_000_000,
            cw_max: u32::MAX,
            max_attempts: u32::MAX,
            ..MacParameters::default()
        };
        let mut mac = CsmaMac::new(params, 2);
        mac.enqueue(packet(0)).unwrap();
        assert!(matches!(mac.access(true), MacAction::Backoff(_)));
        assert!(matches!(mac.access(true), MacAction::Backoff(_)));
        mac.on_frame_collided();
        assert_eq!(mac.contention_window(), u32::MAX);
    }

    #[test]
    fn retry_limit_drops_frame() {
        let params = MacParameters {
            max_attempts: 2,
            ..MacParameters::default()
        };
        let mut mac = CsmaMac::new(params, 3);
        mac.enqueue(packet(0)).unwrap();
        mac.enqueue(packet(1)).unwrap();
        assert!(matches!(mac.access(true), MacAction::Backoff(_)));
        assert!(matches!(mac.access(true), MacAction::Backoff(_)));
        assert_eq!(mac.access(true), MacAction::Drop(packet(0)));
        assert_eq!(mac.state(), MacState::Contending);
        assert_eq!(mac.queued(), 1);
    }

    #[test]
    fn full_queue_rejects() {
        let params = MacParameters {
            queue_capacity: 2,
            ..MacParameters::default()
        };
        let mut mac = CsmaMac::new(params, 3);
        mac.enqueue(packet(0)).unwrap();
        mac.enqueue(packet(1)).unwrap();
        assert_eq!(mac.enqueue(packet(2)), Err(packet(2)));
    }

    #[test]
    fn same_seed_same_backoffs() {
        let draw = |seed| {
            let mut mac = CsmaMac::new(MacParameters::default(), seed);
            mac.enqueue(packet(0)).unwrap();
            (0..5)
                .map(|_| match mac.access(true) {
                    MacAction::Backoff(d) => d,
                    _ => SimTime::ZERO,
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(11), draw(11));
    }
}
