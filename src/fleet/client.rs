//! UDP client used by strategy processes to join the hub.
//!
//! Heartbeats every 3 s, executes forwarded user commands through a
//! callback, answers quant-event broadcasts, and reports `quit` when the
//! process shuts down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::fleet::protocol::Frame;

pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(3);

/// Command handler: one command line in, reply text out
pub type CommandFn = dyn Fn(&str) -> String + Send + Sync;
/// Event handler: returns whether the event was handled
pub type EventFn = dyn Fn(&str, &HashMap<String, String>) -> bool + Send + Sync;

pub struct StrategyClient {
    guid: String,
    name: String,
    class: String,
    socket: Arc<UdpSocket>,
    server: SocketAddr,
    on_command: Box<CommandFn>,
    on_event: Box<EventFn>,
}

impl StrategyClient {
    pub async fn connect(
        server: SocketAddr,
        name: &str,
        class: &str,
        on_command: Box<CommandFn>,
        on_event: Box<EventFn>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server).await?;
        info!("connected to hub {}", server);
        Ok(Arc::new(Self {
            guid: Uuid::new_v4().to_string(),
            name: name.to_string(),
            class: class.to_string(),
            socket: Arc::new(socket),
            server,
            on_command,
            on_event,
        }))
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        self.spawn_with_period(shutdown, HEARTBEAT_PERIOD);
    }

    pub(crate) fn spawn_with_period(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        period: Duration,
    ) {
        // heartbeat until shutdown, then report quit
        let client = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let ping = Frame::PingReq {
                            guid: client.guid.clone(),
                            name: client.name.clone(),
                            class: client.class.clone(),
                        };
                        if let Err(e) = client.socket.send(&ping.encode()).await {
                            warn!("heartbeat send failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => {
                        let quit = Frame::Quit { guid: client.guid.clone() };
                        let _ = client.socket.send(&quit.encode()).await;
                        info!("reported quit to hub");
                        break;
                    }
                }
            }
        });

        // reader
        let client = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match client.socket.recv(&mut buf).await {
                    Ok(n) => {
                        if let Some(frame) = Frame::decode(&buf[..n]) {
                            client.handle_frame(frame).await;
                        }
                    }
                    Err(e) => {
                        warn!("client recv error: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });
    }

    async fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::PingResp { .. } => {}
            Frame::CmdReq { cmd, wbh } => {
                // a forwarded message may carry several lines; only the last
                // command's result goes back to the hub
                let normalized = cmd.replace("\r\n", "\n");
                let mut last_result = String::new();
                for line in normalized.split('\n').map(str::trim).filter(|s| !s.is_empty()) {
                    last_result = (self.on_command)(line).replace('"', "`");
                }
                let resp = Frame::CmdResp {
                    name: self.name.clone(),
                    rst: last_result,
                    wbh,
                };
                let _ = self.socket.send(&resp.encode()).await;
            }
            Frame::QuantEventBroadcast {
                eseq,
                ename,
                eparam,
            } => {
                let handled = (self.on_event)(&ename, &eparam);
                info!("receive quant-event, ename={}, handled={}", ename, handled);
                let resp = Frame::QuantEventResp {
                    guid: self.guid.clone(),
                    eseq,
                    handled,
                };
                let _ = self.socket.send(&resp.encode()).await;
            }
            other => warn!("unexpected frame from hub: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_heartbeats_and_answers_events() {
        let hub = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let hub_addr = hub.local_addr().unwrap();

        let client = StrategyClient::connect(
            hub_addr,
            "alpha",
            "maker",
            Box::new(|cmd| format!("ran {}", cmd)),
            Box::new(|_, _| true),
        )
        .await
        .unwrap();
        let (_tx, rx) = watch::channel(false);
        client.spawn_with_period(rx, Duration::from_millis(20));

        // heartbeat arrives
        let mut buf = [0u8; 1024];
        let (n, peer) = hub.recv_from(&mut buf).await.unwrap();
        match Frame::decode(&buf[..n]).unwrap() {
            Frame::PingReq { guid, name, class } => {
                assert_eq!(guid, client.guid());
                assert_eq!(name, "alpha");
                assert_eq!(class, "maker");
            }
            other => panic!("expected ping, got {:?}", other),
        }

        // a broadcast gets acknowledged
        let bct = Frame::QuantEventBroadcast {
            eseq: 9,
            ename: "evt".to_string(),
            eparam: HashMap::new(),
        };
        hub.send_to(&bct.encode(), peer).await.unwrap();
        loop {
            let (n, _) = hub.recv_from(&mut buf).await.unwrap();
            match Frame::decode(&buf[..n]) {
                Some(Frame::QuantEventResp {
                    guid,
                    eseq,
                    handled,
                }) => {
                    assert_eq!(guid, client.guid());
                    assert_eq!(eseq, 9);
                    assert!(handled);
                    break;
                }
                _ => continue, // skip interleaved heartbeats
            }
        }
    }

    #[tokio::test]
    async fn test_client_runs_forwarded_commands() {
        let hub = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let hub_addr = hub.local_addr().unwrap();

        let client = StrategyClient::connect(
            hub_addr,
            "alpha",
            "maker",
            Box::new(|cmd| format!("result of \"{}\"", cmd)),
            Box::new(|_, _| false),
        )
        .await
        .unwrap();
        let (_tx, rx) = watch::channel(false);
        client.spawn_with_period(rx, Duration::from_millis(20));

        let mut buf = [0u8; 1024];
        let (_, peer) = hub.recv_from(&mut buf).await.unwrap();

        let req = Frame::CmdReq {
            cmd: "status\npnl".to_string(),
            wbh: "http://wh".to_string(),
        };
        hub.send_to(&req.encode(), peer).await.unwrap();
        loop {
            let (n, _) = hub.recv_from(&mut buf).await.unwrap();
            match Frame::decode(&buf[..n]) {
                Some(Frame::CmdResp { name, rst, wbh }) => {
                    assert_eq!(name, "alpha");
                    // only the last command's result, quotes neutralized
                    assert_eq!(rst, "result of `pnl`");
                    assert_eq!(wbh, "http://wh");
                    break;
                }
                _ => continue,
            }
        }
    }
}
