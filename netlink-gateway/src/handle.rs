//! One-shot NETLINK_ROUTE transactions (spec.md §4.A: "the gateway is
//! stateless; every call is a one-shot kernel transaction. No caching.").
//!
//! A fresh `netlink_sys::Socket` is opened, bound, and torn down for every
//! call. This mirrors `netlink-ng`'s `NetlinkHandle::new().execute(...)`
//! (see the sibling `arthur-zhang-netlink-ng` sources this crate is
//! grounded on) rather than keeping a long-lived connection the way the
//! async `rtnetlink` crate does.

use log::debug;
use netlink_packet_core::{
    NetlinkDeserializable, NetlinkMessage, NetlinkPayload, NetlinkSerializable, NLM_F_ACK,
    NLM_F_DUMP, NLM_F_MULTI, NLM_F_REQUEST,
};
use netlink_packet_route::RtnlMessage;
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};

use crate::error::{GatewayError, GatewayResult};

const RECV_BUFFER: usize = 1024 * 16;

pub struct NetlinkHandle {
    socket: Socket,
    sequence: u32,
}

impl NetlinkHandle {
    pub fn new() -> GatewayResult<Self> {
        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| GatewayError::Other(anyhow::anyhow!("open netlink socket: {e}")))?;
        socket
            .bind_auto()
            .map_err(|e| GatewayError::Other(anyhow::anyhow!("bind netlink socket: {e}")))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| GatewayError::Other(anyhow::anyhow!("connect netlink socket: {e}")))?;
        Ok(Self {
            socket,
            sequence: 0,
        })
    }

    /// Sends `payload` with `extra_flags` (`NLM_F_REQUEST | NLM_F_ACK` is
    /// always implied) and collects every reply message up to and including
    /// `Done`/the ack.
    pub fn execute(
        &mut self,
        payload: RtnlMessage,
        extra_flags: u16,
    ) -> GatewayResult<Vec<RtnlMessage>> {
        self.sequence += 1;
        let seq = self.sequence;
        debug!("netlink execute: seq {seq}, flags {extra_flags:#x}");

        let mut message = NetlinkMessage::from(payload);
        message.header.flags = NLM_F_REQUEST | extra_flags;
        message.header.sequence_number = seq;
        message.finalize();

        let mut buf = vec![0u8; message.header.length as usize];
        message.serialize(&mut buf[..]);
        self.socket
            .send(&buf[..], 0)
            .map_err(|e| GatewayError::Other(anyhow::anyhow!("send netlink request: {e}")))?;

        let is_dump = extra_flags & NLM_F_DUMP != 0;
        let mut results = Vec::new();
        let mut recv_buf = vec![0u8; RECV_BUFFER];
        'recv: loop {
            let n = self
                .socket
                .recv(&mut recv_buf, 0)
                .map_err(|e| GatewayError::Other(anyhow::anyhow!("recv netlink reply: {e}")))?;
            let mut offset = 0;
            while offset < n {
                let bytes = &recv_buf[offset..n];
                let reply = NetlinkMessage::<RtnlMessage>::deserialize(bytes)
                    .map_err(|e| GatewayError::Other(anyhow::anyhow!("parse netlink reply: {e}")))?;
                if reply.header.sequence_number != seq {
                    offset += reply.header.length as usize;
                    continue;
                }
                match reply.payload {
                    NetlinkPayload::Done(_) => break 'recv,
                    NetlinkPayload::Error(err) => {
                        if err.code.is_none() {
                            // ack with no error code: success
                            if !is_dump {
                                break 'recv;
                            }
                        } else {
                            let errno = -err.code.map(|c| c.get()).unwrap_or(0);
                            return Err(GatewayError::from_errno("netlink request", errno));
                        }
                    }
                    NetlinkPayload::InnerMessage(inner) => {
                        results.push(inner);
                        if !is_dump && reply.header.flags & NLM_F_MULTI == 0 {
                            break 'recv;
                        }
                    }
                    _ => {}
                }
                offset += reply.header.length as usize;
            }
            if !is_dump && results.is_empty() && offset >= n {
                // no multi-part dump expected and nothing useful arrived yet; keep reading
                continue;
            }
        }
        Ok(results)
    }
}

/// Builds a one-shot handle, runs `f`, and discards it. Convenience for the
/// module-level free functions in `link.rs`/`addr.rs`/etc., which each want
/// exactly one transaction.
pub fn with_handle<T>(
    f: impl FnOnce(&mut NetlinkHandle) -> GatewayResult<T>,
) -> GatewayResult<T> {
    let mut handle = NetlinkHandle::new()?;
    f(&mut handle)
}
