//! Guide-port pulse integration (§4.B, §5, §8).
//!
//! A `GuidePort` accepts four independent pulse durations (RA+, RA-, DEC+,
//! DEC-) that may overlap in time. An internal task holds a 4-vector of
//! remaining-on times and a channel of incoming requests; it races a timer
//! set to the earliest deadline against the arrival of a new request,
//! issuing driver start/stop calls as each channel's remaining time
//! crosses zero: a `tokio::select!` standing in for sleeping on a
//! condition variable until the earliest deadline or a new request
//! arrives (§4.B).

use async_trait::async_trait;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use crate::error::DeviceError;

use super::Device;

/// §9's Open Question on the activation clamp is resolved at ±1000 s,
/// applied uniformly to every backend.
pub const ACTIVATION_CLAMP_SECS: f64 = 1000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuideBits {
    pub ra_plus: bool,
    pub ra_minus: bool,
    pub dec_plus: bool,
    pub dec_minus: bool,
}

#[async_trait]
pub trait GuidePort: Device {
    fn active(&self) -> GuideBits;
    async fn activate(
        &self,
        ra_plus: f64,
        ra_minus: f64,
        dec_plus: f64,
        dec_minus: f64,
    ) -> Result<(), DeviceError>;
}

/// The four independently-driveable channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    RaPlus,
    RaMinus,
    DecPlus,
    DecMinus,
}

pub const CHANNELS: [Channel; 4] = [
    Channel::RaPlus,
    Channel::RaMinus,
    Channel::DecPlus,
    Channel::DecMinus,
];

/// Driver-specific start/stop primitive a real backend implements; the
/// integrator above drives these without knowing the vendor protocol.
pub trait GuidePortDriver: Send + Sync {
    fn start(&self, channel: Channel);
    fn stop(&self, channel: Channel);
}

pub fn clamp_duration(seconds: f64) -> f64 {
    seconds.max(0.0).min(ACTIVATION_CLAMP_SECS)
}

#[derive(Debug, Clone, Copy)]
struct Request {
    durations: [f64; 4],
}

/// The running pulse-integrator task plus the handle used to submit new
/// requests and read the current bit state. One instance per port; the
/// task is aborted when the last handle clone drops its sender (the
/// channel closes and the task's `select!` over `rx.recv()` returns `None`,
/// ending the loop — an implicit join-on-drop in the spirit of the other
/// capability workers built on `obs_async::task`).
pub struct PulseIntegrator {
    request_tx: mpsc::UnboundedSender<Request>,
    bits_rx: watch::Receiver<GuideBits>,
}

impl PulseIntegrator {
    pub fn spawn(driver: std::sync::Arc<dyn GuidePortDriver>) -> Self {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Request>();
        let (bits_tx, bits_rx) = watch::channel(GuideBits::default());

        tokio::spawn(async move {
            let mut remaining = [0.0f64; 4];
            let mut last_tick = Instant::now();

            loop {
                let earliest = remaining
                    .iter()
                    .cloned()
                    .filter(|r| *r > 0.0)
                    .fold(f64::INFINITY, f64::min);

                // No pending deadline: idle for an arbitrarily long interval until
                // a new request wakes the `recv()` branch instead.
                let next_deadline = if earliest.is_finite() {
                    Duration::from_secs_f64(earliest)
                } else {
                    Duration::from_secs(3600)
                };

                tokio::select! {
                    maybe_req = request_rx.recv() => {
                        let now = Instant::now();
                        let dt = now.duration_since(last_tick).as_secs_f64();
                        last_tick = now;
                        for r in remaining.iter_mut() {
                            *r = (*r - dt).max(0.0);
                        }
                        match maybe_req {
                            Some(req) => {
                                for (i, d) in req.durations.iter().enumerate() {
                                    remaining[i] += clamp_duration(*d);
                                }
                            }
                            None => break,
                        }
                        update_driver_and_bits(&driver, &remaining, &bits_tx);
                    }
                    _ = tokio::time::sleep(next_deadline) => {
                        let now = Instant::now();
                        let dt = now.duration_since(last_tick).as_secs_f64();
                        last_tick = now;
                        for r in remaining.iter_mut() {
                            *r = (*r - dt).max(0.0);
                        }
                        update_driver_and_bits(&driver, &remaining, &bits_tx);
                    }
                }
            }
        });

        PulseIntegrator {
            request_tx,
            bits_rx,
        }
    }

    pub fn active(&self) -> GuideBits {
        *self.bits_rx.borrow()
    }

    pub fn activate(
        &self,
        ra_plus: f64,
        ra_minus: f64,
        dec_plus: f64,
        dec_minus: f64,
    ) -> Result<(), DeviceError> {
        self.request_tx
            .send(Request {
                durations: [ra_plus, ra_minus, dec_plus, dec_minus],
            })
            .map_err(|_| DeviceError::DeviceFailure("guide port task is gone".into()))
    }
}

fn update_driver_and_bits(
    driver: &std::sync::Arc<dyn GuidePortDriver>,
    remaining: &[f64; 4],
    bits_tx: &watch::Sender<GuideBits>,
) {
    let mut bits = GuideBits::default();
    for (channel, r) in CHANNELS.iter().zip(remaining.iter()) {
        let on = *r > 0.0;
        match channel {
            Channel::RaPlus => bits.ra_plus = on,
            Channel::RaMinus => bits.ra_minus = on,
            Channel::DecPlus => bits.dec_plus = on,
            Channel::DecMinus => bits.dec_minus = on,
        }
        if on {
            driver.start(*channel);
        } else {
            driver.stop(*channel);
        }
    }
    let _ = bits_tx.send(bits);
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingDriver {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }
    impl GuidePortDriver for CountingDriver {
        fn start(&self, _channel: Channel) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn stop(&self, _channel: Channel) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_duration(-5.0), 0.0);
        assert_eq!(clamp_duration(5000.0), ACTIVATION_CLAMP_SECS);
        assert_eq!(clamp_duration(3.0), 3.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pulse_integration_timing() {
        let driver = Arc::new(CountingDriver {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        let integrator = PulseIntegrator::spawn(driver);

        integrator.activate(0.3, 0.0, 0.0, 0.0).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(integrator.active().ra_plus);

        tokio::time::sleep(Duration::from_millis(100)).await;
        integrator.activate(0.0, 0.0, 0.4, 0.0).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!integrator.active().ra_plus, "RA+ should have cleared by ~300ms");
        assert!(integrator.active().dec_plus, "DEC+ should still be active at ~350ms");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!integrator.active().dec_plus, "DEC+ should have cleared by ~500ms");
    }

    #[tokio::test]
    async fn test_idempotent_zero_activate() {
        let driver = Arc::new(CountingDriver {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        let integrator = PulseIntegrator::spawn(driver);
        let before = integrator.active();
        integrator.activate(0.0, 0.0, 0.0, 0.0).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        integrator.activate(0.0, 0.0, 0.0, 0.0).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(before, integrator.active());
    }
}
