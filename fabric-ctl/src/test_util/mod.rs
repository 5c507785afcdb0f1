//! Test utilities for driving the controller without switches
//!
//! [`RecordingSouthbound`] captures every message the controller sends so
//! tests can assert on installed rules and packet-outs.

pub mod packets;

use crate::error::Result;
use crate::flow::{FlowMod, PacketOut, Southbound, SouthboundMessage};
use std::sync::Mutex;

/// Southbound that records messages in send order.
#[derive(Debug, Default)]
pub struct RecordingSouthbound {
    messages: Mutex<Vec<SouthboundMessage>>,
}

impl RecordingSouthbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far.
    pub fn messages(&self) -> Vec<SouthboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn flow_mods(&self) -> Vec<FlowMod> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                SouthboundMessage::FlowMod(f) => Some(f.clone()),
                SouthboundMessage::PacketOut(_) => None,
            })
            .collect()
    }

    pub fn packet_outs(&self) -> Vec<PacketOut> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                SouthboundMessage::PacketOut(p) => Some(p.clone()),
                SouthboundMessage::FlowMod(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

impl Southbound for RecordingSouthbound {
    fn send_flow_mod(&self, flow: FlowMod) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push(SouthboundMessage::FlowMod(flow));
        Ok(())
    }

    fn send_packet_out(&self, packet: PacketOut) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push(SouthboundMessage::PacketOut(packet));
        Ok(())
    }
}
