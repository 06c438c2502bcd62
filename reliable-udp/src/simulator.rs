//! In-process network for deterministic testing.
//!
//! Real networks drop, reorder, duplicate and corrupt datagrams.  To exercise
//! the reliability mechanisms without depending on real network conditions
//! this module provides two [`Channel`] implementations:
//!
//! - [`Link`]: a point-to-point in-memory link.  Every datagram sent on one
//!   end is delivered to the other; with `tokio::time::pause` the timeouts
//!   become deterministic.
//! - [`Lossy`]: wraps any channel and applies a seeded fault model on send.
//!
//! | Fault       | Description                                          |
//! |-------------|------------------------------------------------------|
//! | Loss        | Drop the datagram with probability `loss_rate`.      |
//! | Duplication | Deliver the datagram twice.                          |
//! | Corruption  | Flip one payload byte (data segments only).          |
//! | Reordering  | Hold the datagram back until the next one is sent.   |
//!
//! Faults can be switched on and off at runtime through a [`FaultSwitch`],
//! which lets a test keep the handshake clean and stress only the data phase.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::segment::Segment;
use crate::socket::Channel;

type Datagram = (Vec<u8>, SocketAddr);

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// One end of an in-memory point-to-point link.
///
/// Sends never fail: once the other end is dropped datagrams simply vanish,
/// and a receive on an orphaned end behaves like silence.
#[derive(Debug)]
pub struct Link {
    local: SocketAddr,
    tx: mpsc::UnboundedSender<Datagram>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl Link {
    /// Create two connected ends labelled `a` and `b`.
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Link, Link) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Link {
                local: a,
                tx: a_tx,
                rx: tokio::sync::Mutex::new(a_rx),
            },
            Link {
                local: b,
                tx: b_tx,
                rx: tokio::sync::Mutex::new(b_rx),
            },
        )
    }
}

impl Channel for Link {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    async fn send_to(&self, datagram: &[u8], _dest: SocketAddr) -> Result<(), ChannelError> {
        // A closed peer is indistinguishable from a lost datagram.
        let _ = self.tx.send((datagram.to_vec(), self.local));
        Ok(())
    }

    async fn recv_from(&self, timeout: Option<Duration>) -> Result<Option<Datagram>, ChannelError> {
        let mut rx = self.rx.lock().await;
        let next = async {
            match rx.recv().await {
                Some(datagram) => datagram,
                None => std::future::pending().await,
            }
        };
        match timeout {
            Some(limit) => Ok(tokio::time::timeout(limit, next).await.ok()),
            None => Ok(Some(next.await)),
        }
    }
}

// ---------------------------------------------------------------------------
// Lossy
// ---------------------------------------------------------------------------

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that a datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a data segment has one payload byte flipped.
    pub corrupt_rate: f64,
    /// Probability that a datagram is held back behind the next one.
    pub reorder_rate: f64,
    /// RNG seed, so a failing run can be replayed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the wrapper is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            corrupt_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }
}

/// Runtime on/off control for a [`Lossy`] channel.
#[derive(Debug, Clone)]
pub struct FaultSwitch(Arc<AtomicBool>);

impl FaultSwitch {
    pub fn enable(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters of injected faults.
#[derive(Debug, Default)]
pub struct FaultStats {
    pub dropped: AtomicU64,
    pub duplicated: AtomicU64,
    pub corrupted: AtomicU64,
    pub reordered: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Verdict {
    drop: bool,
    duplicate: bool,
    corrupt_at: Option<usize>,
    hold: bool,
}

/// A fault-injecting wrapper around another channel.
///
/// Faults are applied on send only; receives pass straight through.
#[derive(Debug)]
pub struct Lossy<C> {
    inner: C,
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
    enabled: Arc<AtomicBool>,
    held: Mutex<Option<Datagram>>,
    stats: Arc<FaultStats>,
}

impl<C: Channel> Lossy<C> {
    /// Wrap `inner`; faults start enabled.
    pub fn new(inner: C, config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner,
            config,
            rng: Mutex::new(rng),
            enabled: Arc::new(AtomicBool::new(true)),
            held: Mutex::new(None),
            stats: Arc::new(FaultStats::default()),
        }
    }

    pub fn switch(&self) -> FaultSwitch {
        FaultSwitch(Arc::clone(&self.enabled))
    }

    /// Live counters, still readable after the channel has been moved away.
    pub fn stats(&self) -> Arc<FaultStats> {
        Arc::clone(&self.stats)
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn judge(&self, datagram: &[u8]) -> Verdict {
        let Ok(mut rng) = self.rng.lock() else {
            return Verdict::default();
        };
        let cfg = &self.config;
        let mut verdict = Verdict {
            drop: rng.random_bool(cfg.loss_rate.clamp(0.0, 1.0)),
            duplicate: rng.random_bool(cfg.duplicate_rate.clamp(0.0, 1.0)),
            corrupt_at: None,
            hold: rng.random_bool(cfg.reorder_rate.clamp(0.0, 1.0)),
        };
        if rng.random_bool(cfg.corrupt_rate.clamp(0.0, 1.0)) {
            // Only payload bytes are checksummed, so only they are fair game.
            let payload_len = Segment::decode(datagram)
                .ok()
                .and_then(|seg| seg.payload().map(<[u8]>::len))
                .unwrap_or(0);
            if payload_len > 0 {
                let from_end = rng.random_range(1..=payload_len);
                verdict.corrupt_at = Some(datagram.len() - from_end);
            }
        }
        verdict
    }

    fn take_held(&self) -> Option<Datagram> {
        self.held.lock().ok().and_then(|mut held| held.take())
    }
}

impl<C: Channel> Channel for Lossy<C> {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), ChannelError> {
        if !self.enabled.load(Ordering::SeqCst) {
            if let Some((held, held_dest)) = self.take_held() {
                self.inner.send_to(&held, held_dest).await?;
            }
            return self.inner.send_to(datagram, dest).await;
        }

        let verdict = self.judge(datagram);
        if verdict.drop {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!("simulator: dropped {} bytes to {dest}", datagram.len());
            return Ok(());
        }

        let mut bytes = datagram.to_vec();
        if let Some(at) = verdict.corrupt_at {
            bytes[at] ^= 0x5a;
            self.stats.corrupted.fetch_add(1, Ordering::Relaxed);
        }

        let released = self.take_held();
        if verdict.hold && released.is_none() {
            if let Ok(mut held) = self.held.lock() {
                *held = Some((bytes, dest));
                self.stats.reordered.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        self.inner.send_to(&bytes, dest).await?;
        if verdict.duplicate {
            self.stats.duplicated.fetch_add(1, Ordering::Relaxed);
            self.inner.send_to(&bytes, dest).await?;
        }
        if let Some((held, held_dest)) = released {
            self.inner.send_to(&held, held_dest).await?;
        }
        Ok(())
    }

    fn recv_from(
        &self,
        timeout: Option<Duration>,
    ) -> impl std::future::Future<Output = Result<Option<Datagram>, ChannelError>> + Send {
        self.inner.recv_from(timeout)
    }
}
