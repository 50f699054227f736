//! Strategy coordination: heartbeat registry, user command routing and the
//! reliable quant-event broadcast, all over one UDP socket.

use axum::http::HeaderMap;
use chrono::Local;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::adapters::dingbot;
use crate::error::Result;
use crate::fleet::broadcast::{PendingBroadcast, MAX_RESENDS, RESEND_INTERVAL};
use crate::fleet::protocol::Frame;
use crate::fleet::registry::Registry;

const SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// The strategy coordination service
pub struct FleetService {
    socket: Arc<UdpSocket>,
    registry: Mutex<Registry>,
    broadcasts: Mutex<Vec<PendingBroadcast>>,
    seq: AtomicU64,
    bot_secret: String,
    resend_interval: Duration,
    max_resends: u32,
}

impl FleetService {
    pub async fn bind(port: u16, bot_secret: &str) -> Result<Arc<Self>> {
        Self::bind_with(
            &format!("0.0.0.0:{}", port),
            bot_secret,
            RESEND_INTERVAL,
            MAX_RESENDS,
        )
        .await
    }

    pub(crate) async fn bind_with(
        addr: &str,
        bot_secret: &str,
        resend_interval: Duration,
        max_resends: u32,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr).await?;
        info!("fleet service listening at {}", socket.local_addr()?);
        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            registry: Mutex::new(Registry::new()),
            broadcasts: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
            bot_secret: bot_secret.to_string(),
            resend_interval,
            max_resends,
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn spawn_loops(self: &Arc<Self>) {
        let svc = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match svc.socket.recv_from(&mut buf).await {
                    Ok((n, addr)) => match Frame::decode(&buf[..n]) {
                        Some(frame) => svc.handle_frame(frame, addr).await,
                        None => warn!("undecodable datagram from {}", addr),
                    },
                    Err(e) => {
                        error!("udp recv error: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });

        let svc = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_PERIOD);
            loop {
                ticker.tick().await;
                svc.sweep_once().await;
            }
        });

        self.spawn_terminal();
        info!("fleet service started");
    }

    /// Local operator terminal on stdin
    fn spawn_terminal(self: &Arc<Self>) {
        let svc = self.clone();
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let (resp, _) = svc.on_command(&line).await;
                println!("{}", resp);
            }
        });
    }

    pub(crate) async fn handle_frame(&self, frame: Frame, addr: SocketAddr) {
        match frame {
            Frame::PingReq { guid, name, class } => {
                let created = {
                    let mut registry = self.registry.lock().await;
                    registry.upsert(&guid, &name, &class, addr)
                };
                if created {
                    info!("strategy [{}] is online", name);
                }
                let resp = Frame::PingResp {
                    rst: "ok".to_string(),
                };
                if let Err(e) = self.socket.send_to(&resp.encode(), addr).await {
                    warn!("ping_resp to {} failed: {}", addr, e);
                }
            }
            Frame::Quit { guid } => {
                self.offline(&guid).await;
            }
            Frame::CmdResp { name, rst, wbh } => {
                dingbot::reply_text(&wbh, &format!("from [{}]:\n{}", name, rst));
            }
            Frame::QuantEventResp {
                guid,
                eseq,
                handled,
            } => {
                let mut broadcasts = self.broadcasts.lock().await;
                for entry in broadcasts.iter_mut() {
                    if entry.seq == eseq && entry.guid == guid {
                        entry.acknowledge(handled);
                        info!(
                            "quant-event(seq={}) responded by strategy {}, handled={}",
                            eseq, guid, handled
                        );
                    }
                }
            }
            other => debug!("ignoring hub-bound frame: {:?}", other),
        }
    }

    async fn offline(&self, guid: &str) {
        let mut registry = self.registry.lock().await;
        if let Some(m) = registry.remove(guid) {
            info!("strategy [{}] is offline", m.name);
        }
    }

    pub(crate) async fn sweep_once(&self) {
        let expired = {
            let registry = self.registry.lock().await;
            registry.expired(Local::now())
        };
        for guid in expired {
            self.offline(&guid).await;
        }

        let mut broadcasts = self.broadcasts.lock().await;
        broadcasts.retain(|b| !b.is_finished());
    }

    /// Broadcast one quant event to every registered strategy. Each target
    /// draws its own sequence from the global counter and runs its own
    /// retry task. Returns the number of targets.
    pub async fn send_quant_event(
        &self,
        ename: &str,
        eparam: HashMap<String, String>,
    ) -> usize {
        let targets: Vec<(String, SocketAddr)> = {
            let registry = self.registry.lock().await;
            registry.all().map(|m| (m.guid.clone(), m.addr)).collect()
        };

        let mut sent = 0;
        for (guid, addr) in targets {
            let seq = self.seq.fetch_add(1, Ordering::AcqRel);
            let payload = Frame::QuantEventBroadcast {
                eseq: seq,
                ename: ename.to_string(),
                eparam: eparam.clone(),
            }
            .encode();
            let (entry, task) = PendingBroadcast::new(seq, &guid);
            self.broadcasts.lock().await.push(entry);
            let socket = self.socket.clone();
            let interval = self.resend_interval;
            let budget = self.max_resends;
            tokio::spawn(task.run(socket, payload, addr, seq, interval, budget));
            info!(
                "send quant-event(seq={}, name={}) to strategy {}",
                seq, ename, guid
            );
            sent += 1;
        }
        sent
    }

    /// `qevent ename k1 v1 k2 v2 ...`
    pub async fn send_quant_event_raw(&self, args: &[&str]) -> usize {
        let ename = args[0];
        let mut eparam = HashMap::new();
        let mut i = 1;
        while i + 1 < args.len() {
            eparam.insert(args[i].to_string(), args[i + 1].to_string());
            i += 2;
        }
        self.send_quant_event(ename, eparam).await
    }

    /// Local command parser. Returns the reply and whether the command was
    /// handled here; unhandled commands go to the connected strategy.
    pub async fn on_command(&self, line: &str) -> (String, bool) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = parts.first().copied().unwrap_or("");
        match cmd {
            "help" => {
                let mut out = String::new();
                out.push_str("1. ls\nlist all active strategies\n");
                out.push_str("2. conn n\nconnect to strategy by index\n");
                out.push_str("3. disc\ndisconnect from current strategy\n");
                out.push_str("4. qevent ename k1 v1 k2 v2...\ncreate a quant-event manually\n");
                (out, true)
            }
            "ls" => {
                let registry = self.registry.lock().await;
                let mut out = format!("alive strategies count: {}\n", registry.len());
                for (i, m) in registry.ordered().iter().enumerate() {
                    out.push_str(&format!("{}. {}\n", i, m.name));
                }
                (out, true)
            }
            "conn" => {
                let mut registry = self.registry.lock().await;
                match parts.get(1) {
                    None => match registry.connected_mirror() {
                        None => ("no strategy connected".to_string(), true),
                        Some(m) => (
                            format!("connected: [{}]\nclass: [{}]", m.name, m.class),
                            true,
                        ),
                    },
                    Some(raw) => match raw.parse::<usize>() {
                        Ok(index) => match registry.connect_by_index(index) {
                            Some(m) => (format!("strategy [{}] connected", m.name), true),
                            None => ("index out of range".to_string(), true),
                        },
                        Err(_) => (format!("invalid index: {}", raw), true),
                    },
                }
            }
            "disc" => {
                let mut registry = self.registry.lock().await;
                let name = registry.connected_mirror().map(|m| m.name.clone());
                match name {
                    None => ("no strategy connected".to_string(), true),
                    Some(name) => {
                        registry.connected = None;
                        (format!("disconnected from strategy [{}]", name), true)
                    }
                }
            }
            "qevent" => {
                if parts.len() < 2 {
                    return ("not enough param for command qevent".to_string(), true);
                }
                let sent = self.send_quant_event_raw(&parts[1..]).await;
                (
                    format!("send event({}) to {} strategies", parts[1], sent),
                    true,
                )
            }
            _ => ("unknown command".to_string(), false),
        }
    }

    async fn connected_addr(&self) -> Option<SocketAddr> {
        let registry = self.registry.lock().await;
        registry.connected_mirror().map(|m| m.addr)
    }

    async fn send_cmd_to_connected(&self, cmd: &str, webhook: &str) {
        if let Some(addr) = self.connected_addr().await {
            let req = Frame::CmdReq {
                cmd: cmd.to_string(),
                wbh: webhook.to_string(),
            };
            if let Err(e) = self.socket.send_to(&req.encode(), addr).await {
                warn!("cmd_req to {} failed: {}", addr, e);
            } else {
                info!("trans cmd `{}` to strategy addr: {}", cmd, addr);
            }
        }
    }

    /// POST /dingbots/stratergy — user message from the strategy-interaction
    /// chat bot. Replies flow back through the session webhook.
    pub async fn handle_ding_msg(&self, headers: &HeaderMap, body: &[u8]) -> String {
        let msg = match dingbot::parse_ding_message(headers, body, &self.bot_secret) {
            Ok(msg) => msg,
            Err(e) => return e.to_string(),
        };
        let text = msg.text.content.trim().to_string();
        info!("receive ding msg: {}", text);

        let (resp, processed) = self.on_command(&text).await;
        let connected = self.connected_addr().await.is_some();
        if processed {
            dingbot::reply_text(&msg.webhook, &resp);
            // `help` also shows the connected strategy's own commands
            if text == "help" && connected {
                self.send_cmd_to_connected(&text, &msg.webhook).await;
            }
        } else if connected {
            self.send_cmd_to_connected(&text, &msg.webhook).await;
        } else {
            dingbot::reply_text(&msg.webhook, &resp);
        }
        String::new()
    }

    #[cfg(test)]
    pub(crate) async fn mirror_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn pending_count(&self) -> usize {
        self.broadcasts.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_service() -> Arc<FleetService> {
        FleetService::bind_with("127.0.0.1:0", "secret", Duration::from_millis(5), 3)
            .await
            .unwrap()
    }

    fn ping(guid: &str, name: &str) -> Frame {
        Frame::PingReq {
            guid: guid.to_string(),
            name: name.to_string(),
            class: "maker".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ping_registers_and_quit_removes() {
        let svc = test_service().await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = peer.local_addr().unwrap();

        svc.handle_frame(ping("g1", "alpha"), addr).await;
        assert_eq!(svc.mirror_count().await, 1);

        // the hub answered the heartbeat
        let mut buf = [0u8; 256];
        let (n, _) = tokio::time::timeout(Duration::from_millis(200), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            Frame::decode(&buf[..n]),
            Some(Frame::PingResp {
                rst: "ok".to_string()
            })
        );

        svc.handle_frame(
            Frame::Quit {
                guid: "g1".to_string(),
            },
            addr,
        )
        .await;
        assert_eq!(svc.mirror_count().await, 0);
    }

    #[tokio::test]
    async fn test_ls_and_conn_commands() {
        let svc = test_service().await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        svc.handle_frame(ping("g1", "alpha"), peer.local_addr().unwrap())
            .await;

        let (out, processed) = svc.on_command("ls").await;
        assert!(processed);
        assert!(out.contains("alive strategies count: 1"));
        assert!(out.contains("0. alpha"));

        let (out, _) = svc.on_command("conn 0").await;
        assert_eq!(out, "strategy [alpha] connected");
        let (out, _) = svc.on_command("conn").await;
        assert!(out.contains("connected: [alpha]"));
        let (out, _) = svc.on_command("disc").await;
        assert_eq!(out, "disconnected from strategy [alpha]");
        let (out, processed) = svc.on_command("frobnicate").await;
        assert_eq!(out, "unknown command");
        assert!(!processed);
    }

    #[tokio::test]
    async fn test_broadcast_ack_and_retry_budget() {
        let svc = test_service().await;
        let acker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        svc.handle_frame(ping("g1", "alpha"), acker.local_addr().unwrap())
            .await;
        svc.handle_frame(ping("g2", "beta"), silent.local_addr().unwrap())
            .await;
        // drain the two ping responses
        let mut buf = [0u8; 1024];
        acker.recv_from(&mut buf).await.unwrap();
        silent.recv_from(&mut buf).await.unwrap();

        let mut params = HashMap::new();
        params.insert("k".to_string(), "v".to_string());
        assert_eq!(svc.send_quant_event("evt", params).await, 2);
        assert_eq!(svc.pending_count().await, 2);

        // g1 acks its first datagram
        let (n, _) = acker.recv_from(&mut buf).await.unwrap();
        let seq = match Frame::decode(&buf[..n]).unwrap() {
            Frame::QuantEventBroadcast { eseq, .. } => eseq,
            other => panic!("unexpected frame {:?}", other),
        };
        svc.handle_frame(
            Frame::QuantEventResp {
                guid: "g1".to_string(),
                eseq: seq,
                handled: true,
            },
            acker.local_addr().unwrap(),
        )
        .await;

        // g2 never acks: initial send + full retry budget
        let mut silent_count = 0;
        while let Ok(Ok(_)) =
            tokio::time::timeout(Duration::from_millis(80), silent.recv_from(&mut buf)).await
        {
            silent_count += 1;
        }
        assert_eq!(silent_count, 4);

        // g1 got at most one more datagram after the ack settled
        let mut acker_extra = 0;
        while let Ok(Ok(_)) =
            tokio::time::timeout(Duration::from_millis(20), acker.recv_from(&mut buf)).await
        {
            acker_extra += 1;
        }
        assert!(acker_extra <= 1, "emission must stop after ack");

        // both entries are reaped once finished
        svc.sweep_once().await;
        assert_eq!(svc.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_qevent_raw_parses_pairs() {
        let svc = test_service().await;
        let (out, processed) = svc.on_command("qevent rollover k1 v1 k2 v2").await;
        assert!(processed);
        assert_eq!(out, "send event(rollover) to 0 strategies");
    }
}
