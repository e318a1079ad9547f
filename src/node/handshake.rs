//! Nonce Handshake
//!
//! Outbound signing is a synchronous challenge/response: before a signed
//! message leaves this node, a GET_NONCE request travels to the final
//! destination and the transmission stalls (cooperatively, traffic keeps
//! flowing) until the nonce comes back or the timeout expires. The
//! pending message is snapshotted because the dispatcher may overwrite
//! live buffers while the handshake is in flight.

use crate::link::Indicator;
use crate::message::{InternalType, Message, BROADCAST_ADDRESS};
use crate::node::Node;
use tracing::{debug, warn};

/// State of the outbound nonce handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonceStatus {
    /// No handshake in flight.
    Idle,
    /// GET_NONCE sent, awaiting the destination's response.
    WaitingForNonce,
    /// Nonce received and the pending message signed.
    Ok,
}

impl Node {
    /// Whether an inbound message must carry a valid signature.
    ///
    /// Acks and handshake-class internal messages are exempt, as is
    /// traffic merely passing through (signing is end-to-end). A gateway
    /// additionally scopes the requirement to senders that announced
    /// signing.
    pub(in crate::node) fn signature_required(&self, msg: &Message) -> bool {
        if !self.config.signing.request_signatures || self.signer.is_none() {
            return false;
        }
        if msg.destination != self.context.node_id || msg.is_ack {
            return false;
        }
        if msg.internal_type().map_or(false, |t| t.is_signing_exempt()) {
            return false;
        }
        if self.config.node.gateway && !self.sign_table.do_sign(msg.sender) {
            return false;
        }
        true
    }

    /// Sign an outbound message when its destination requires it.
    ///
    /// Runs the nonce handshake synchronously; returns false when the
    /// handshake fails, in which case the message must not be sent.
    /// For destinations that do not require signing, any stale signed
    /// flag on a locally originated message is cleared.
    pub(in crate::node) fn sign_outbound(&mut self, msg: &mut Message) -> bool {
        let exempt = msg.internal_type().map_or(false, |t| t.is_signing_exempt());
        let wants_signing = self.signer.is_some()
            && self.config.signing.enabled
            && self.sign_table.do_sign(msg.destination)
            && msg.destination != BROADCAST_ADDRESS
            && msg.sender == self.context.node_id
            && !msg.is_ack
            && !exempt;

        if !wants_signing {
            if msg.sender == self.context.node_id {
                msg.signed = false;
            }
            return true;
        }

        // The in-flight message can be clobbered by traffic we service
        // while waiting; sign a snapshot and swap it back afterwards.
        self.nonce_status = NonceStatus::WaitingForNonce;
        self.pending_sign = Some(*msg);

        let mut request = Message::internal(
            self.context.node_id,
            msg.destination,
            InternalType::GetNonce,
        );
        if !self.send_routed(&mut request) {
            debug!(destination = msg.destination, "nonce request failed to send");
            self.nonce_status = NonceStatus::Idle;
            self.pending_sign = None;
            return false;
        }

        let enter = self.now_ms();
        while self.nonce_status == NonceStatus::WaitingForNonce
            && self.now_ms().saturating_sub(enter) < self.config.timing.verification_timeout_ms
        {
            self.process();
        }

        if self.nonce_status != NonceStatus::Ok {
            warn!(
                destination = msg.destination,
                "nonce handshake timed out, message dropped"
            );
            self.pulse(Indicator::Error);
            self.nonce_status = NonceStatus::Idle;
            self.pending_sign = None;
            return false;
        }

        self.nonce_status = NonceStatus::Idle;
        match self.pending_sign.take() {
            Some(signed) => {
                *msg = signed;
                true
            }
            None => false,
        }
    }

    /// Record a peer's announced signing preference.
    ///
    /// The gateway answers with its own preference so the peer learns
    /// whether messages toward the gateway must be signed.
    pub(in crate::node) fn handle_request_signing(&mut self, msg: &Message) {
        let sender = msg.sender;
        let required = msg.get_bool();
        debug!(sender, required, "peer signing preference");
        self.sign_table.set_sign(sender, required, &mut *self.storage);

        if self.config.node.gateway {
            let ours = self.signer.is_some() && self.config.signing.request_signatures;
            let mut response = Message::internal(
                self.context.node_id,
                sender,
                InternalType::RequestSigning,
            );
            response.set_bool(ours);
            self.send_routed(&mut response);
        }
    }
}
