//! Datagram protocol between the hub and strategy processes.
//!
//! Every frame is a single JSON object with a leading `op` discriminator;
//! the transport is UDP, no framing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// All frames of the hub <-> strategy protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Frame {
    /// strategy -> hub, every 3 s
    #[serde(rename = "ping_req")]
    PingReq {
        guid: String,
        name: String,
        class: String,
    },
    /// hub -> strategy
    #[serde(rename = "ping_resp")]
    PingResp { rst: String },
    /// strategy -> hub, on clean shutdown
    #[serde(rename = "quit")]
    Quit { guid: String },
    /// hub -> strategy, user command with the originating webhook
    #[serde(rename = "cmd_req")]
    CmdReq { cmd: String, wbh: String },
    /// strategy -> hub, command result echoed back to the webhook
    #[serde(rename = "cmd_resp")]
    CmdResp {
        name: String,
        rst: String,
        wbh: String,
    },
    /// hub -> strategy, reliable event broadcast
    #[serde(rename = "qevent_bct")]
    QuantEventBroadcast {
        eseq: u64,
        ename: String,
        eparam: HashMap<String, String>,
    },
    /// strategy -> hub, acknowledges one (eseq, guid)
    #[serde(rename = "qevent_resp")]
    QuantEventResp {
        guid: String,
        eseq: u64,
        handled: bool,
    },
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(data: &[u8]) -> Option<Frame> {
        serde_json::from_slice(data).ok()
    }
}

/// A quant event as submitted over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantEvent {
    #[serde(rename = "ename")]
    pub name: String,
    #[serde(rename = "eparam", default)]
    pub params: HashMap<String, String>,
}
