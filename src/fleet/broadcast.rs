//! Reliable at-least-once delivery of one quant event to one strategy.
//!
//! Each pending broadcast is an independent task owning its own payload
//! and ack channel; the UDP reader resolves incoming acks to the channel.
//! The only state the reaper shares with the task is the finished flag.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Default spacing between resends
pub const RESEND_INTERVAL: Duration = Duration::from_millis(500);
/// Resends after the initial transmission; 21 datagrams in total
pub const MAX_RESENDS: u32 = 20;

/// Registry entry for one in-flight broadcast
pub struct PendingBroadcast {
    pub seq: u64,
    pub guid: String,
    pub finished: Arc<AtomicBool>,
    ack_tx: Option<oneshot::Sender<bool>>,
}

impl PendingBroadcast {
    /// Create the registry entry and its sender task half.
    pub fn new(seq: u64, guid: &str) -> (Self, BroadcastTask) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let finished = Arc::new(AtomicBool::new(false));
        (
            Self {
                seq,
                guid: guid.to_string(),
                finished: finished.clone(),
                ack_tx: Some(ack_tx),
            },
            BroadcastTask { ack_rx, finished },
        )
    }

    /// Deliver the ack; idempotent, later acks are ignored.
    pub fn acknowledge(&mut self, handled: bool) {
        if let Some(tx) = self.ack_tx.take() {
            let _ = tx.send(handled);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// The task half of a pending broadcast
pub struct BroadcastTask {
    ack_rx: oneshot::Receiver<bool>,
    finished: Arc<AtomicBool>,
}

impl BroadcastTask {
    /// Send immediately, then resend every `interval` until acked or the
    /// retry budget is spent. Marks the registry entry finished on exit.
    pub async fn run(
        mut self,
        socket: Arc<UdpSocket>,
        payload: Vec<u8>,
        addr: SocketAddr,
        seq: u64,
        interval: Duration,
        max_resends: u32,
    ) {
        if let Err(e) = socket.send_to(&payload, addr).await {
            warn!("quant-event(seq={}) send failed: {}", seq, e);
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick is immediate
        let mut sent: u32 = 0;
        loop {
            tokio::select! {
                res = &mut self.ack_rx => {
                    match res {
                        Ok(handled) => {
                            info!("quant-event(seq={}) acknowledged, handled={}", seq, handled)
                        }
                        Err(_) => warn!("quant-event(seq={}) ack channel dropped", seq),
                    }
                    break;
                }
                _ = ticker.tick() => {
                    if sent >= max_resends {
                        info!("quant-event(seq={}) retry budget spent, dropped", seq);
                        break;
                    }
                    if let Err(e) = socket.send_to(&payload, addr).await {
                        warn!("quant-event(seq={}) resend failed: {}", seq, e);
                    }
                    sent += 1;
                }
            }
        }
        self.finished.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn socket_pair() -> (Arc<UdpSocket>, UdpSocket) {
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (Arc::new(sender), receiver)
    }

    #[tokio::test]
    async fn test_unacked_broadcast_spends_budget_and_finishes() {
        let (sender, receiver) = socket_pair().await;
        let addr = receiver.local_addr().unwrap();
        let (entry, task) = PendingBroadcast::new(1, "g1");
        let handle = tokio::spawn(task.run(
            sender,
            b"payload".to_vec(),
            addr,
            1,
            Duration::from_millis(5),
            3,
        ));
        handle.await.unwrap();
        assert!(entry.is_finished());

        // initial send + 3 resends
        let mut buf = [0u8; 64];
        let mut count = 0;
        while let Ok(Ok((n, _))) =
            tokio::time::timeout(Duration::from_millis(50), receiver.recv_from(&mut buf)).await
        {
            assert_eq!(&buf[..n], b"payload");
            count += 1;
        }
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn test_ack_stops_emission() {
        let (sender, receiver) = socket_pair().await;
        let addr = receiver.local_addr().unwrap();
        let (mut entry, task) = PendingBroadcast::new(2, "g1");
        let handle = tokio::spawn(task.run(
            sender,
            b"payload".to_vec(),
            addr,
            2,
            Duration::from_millis(20),
            100,
        ));

        // ack right after the initial transmission
        let mut buf = [0u8; 64];
        receiver.recv_from(&mut buf).await.unwrap();
        entry.acknowledge(true);
        handle.await.unwrap();
        assert!(entry.is_finished());

        // nothing further lands after the ack settles
        let extra =
            tokio::time::timeout(Duration::from_millis(60), receiver.recv_from(&mut buf)).await;
        assert!(extra.is_err() || entry.is_finished());
    }

    #[tokio::test]
    async fn test_double_ack_is_harmless() {
        let (mut entry, _task) = PendingBroadcast::new(3, "g1");
        entry.acknowledge(true);
        entry.acknowledge(false);
    }
}
