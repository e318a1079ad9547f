//! Message Dispatcher
//!
//! The top-level receive path: pull one frame from the link, validate
//! signature and version, then route it by destination and message
//! class. Invoked repeatedly by the owner (cooperative polling); each
//! call handles at most one message.

use crate::link::Indicator;
use crate::message::{
    is_valid_distance, Command, InternalType, Message, AUTO, BROADCAST_ADDRESS, GATEWAY_ADDRESS,
    MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
use crate::node::{Node, NodeState, NonceStatus};
use tracing::{debug, trace, warn};

impl Node {
    /// Poll the link once and process at most one inbound message.
    ///
    /// When no frame is pending this advances the firmware retry timer
    /// and polls the controller channel (gateway builds). Returns true
    /// if a message was received and dispatched.
    pub fn process(&mut self) -> bool {
        if !self.state.is_operational() {
            return false;
        }

        self.poll_controller();

        let to = match self.link.available() {
            Some(to) => to,
            None => {
                self.firmware_retry_tick();
                return false;
            }
        };

        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = self.link.receive(&mut buf);
        self.pulse(Indicator::Rx);

        let msg = match Message::from_frame(&buf[..len]) {
            Some(msg) => msg,
            None => {
                debug!(len, "malformed frame dropped");
                self.pulse(Indicator::Error);
                return false;
            }
        };

        self.dispatch(to, msg)
    }

    /// Inject controller messages into the mesh as if received over the
    /// radio link.
    fn poll_controller(&mut self) {
        if !self.config.node.gateway {
            return;
        }
        let msg = match self.gateway.as_mut().and_then(|gw| gw.receive()) {
            Some(msg) => msg,
            None => return,
        };
        trace!(
            destination = msg.destination,
            command = ?msg.command,
            "controller message injected"
        );
        if msg.destination == self.context.node_id {
            self.dispatch(self.context.node_id, msg);
        } else {
            let mut out = msg;
            self.send_routed(&mut out);
        }
    }

    /// Route one decoded message.
    fn dispatch(&mut self, to: u8, msg: Message) -> bool {
        let sender = msg.sender;
        let last = msg.last;
        let destination = msg.destination;

        // Reject unsigned/tampered messages before anything else. Acks
        // and handshake-class internal messages are never signed.
        if self.signature_required(&msg) {
            if !msg.signed {
                debug!(sender, "unsigned message dropped, signature required");
                self.pulse(Indicator::Error);
                return false;
            }
            let verified = match self.signer.as_mut() {
                Some(signer) => signer.verify_message(&msg),
                None => false,
            };
            if !verified {
                warn!(sender, "signature verification failed");
                self.pulse(Indicator::Error);
                return false;
            }
        }

        if msg.version != PROTOCOL_VERSION {
            debug!(version = msg.version, sender, "protocol version mismatch");
            self.pulse(Indicator::Error);
            return false;
        }

        if destination == self.context.node_id {
            return self.dispatch_addressed(msg);
        }

        if destination == BROADCAST_ADDRESS
            && msg.internal_type() == Some(InternalType::Discover)
            && last == self.context.parent_node_id
        {
            // Topology probe flooding down the tree: answer with our
            // parent after a randomized delay, repeaters pass it on.
            debug!(sender, "discovery signal");
            self.reply_jitter();
            let mut response =
                Message::internal(self.context.node_id, sender, InternalType::DiscoverResponse);
            response.set_u8(self.context.parent_node_id);
            self.send_routed(&mut response);
            if self.config.node.repeater {
                let mut repeat = msg;
                self.send_routed(&mut repeat);
            }
            return true;
        }

        // Message in transit: repeaters with an assigned id relay it.
        if self.config.node.repeater && self.context.node_id != AUTO {
            if destination == BROADCAST_ADDRESS
                && msg.internal_type() == Some(InternalType::FindParent)
            {
                self.answer_find_parent(sender);
                return true;
            }
            if to == self.context.node_id {
                let mut forward = msg;
                self.send_routed(&mut forward);
                return true;
            }
        }

        trace!(sender, destination, "message not for us, dropped");
        false
    }

    /// Handle a message whose final destination is this node.
    fn dispatch_addressed(&mut self, mut msg: Message) -> bool {
        let sender = msg.sender;
        let last = msg.last;

        // Verification is complete; the flag has no further meaning.
        msg.signed = false;

        // A message arriving from somewhere other than our parent came
        // up from a child subtree: remember the hop it used.
        if self.config.node.repeater && last != self.context.parent_node_id {
            self.routes.set(sender, last, &mut *self.storage);
        }

        if msg.ack_request && !msg.is_ack {
            let mut ack = msg;
            // Reply without the ack-request flag or the echo loops forever.
            ack.ack_request = false;
            ack.is_ack = true;
            ack.sender = self.context.node_id;
            ack.destination = sender;
            self.send_routed(&mut ack);
        }

        match msg.command {
            Command::Internal => {
                if self.handle_internal(&msg) {
                    return true;
                }
            }
            Command::Stream if self.config.ota.enabled => {
                if self.handle_stream(&msg) {
                    return true;
                }
            }
            _ => {}
        }

        // Gateway hand-off: messages terminating here also go to the
        // controller.
        if self.config.node.gateway {
            if let Some(gw) = self.gateway.as_mut() {
                gw.send(&msg);
            }
        }

        self.deliver(&msg);
        true
    }

    /// Handle internal protocol messages addressed to this node.
    ///
    /// Returns true when the message was consumed by the protocol and
    /// must not reach the application callback.
    fn handle_internal(&mut self, msg: &Message) -> bool {
        let sender = msg.sender;
        let itype = match msg.internal_type() {
            Some(t) => t,
            None => return false,
        };

        match itype {
            InternalType::FindParentResponse => {
                if self.config.node.auto_find_parent {
                    self.apply_parent_candidate(sender, msg.get_u8());
                }
                true
            }
            InternalType::GetNonce if self.signer.is_some() => {
                let nonce = self
                    .signer
                    .as_mut()
                    .and_then(|signer| signer.get_nonce());
                if let Some(nonce) = nonce {
                    let mut response = Message::internal(
                        self.context.node_id,
                        sender,
                        InternalType::GetNonceResponse,
                    );
                    response.set_raw(&nonce);
                    self.send_routed(&mut response);
                }
                true
            }
            InternalType::GetNonceResponse if self.signer.is_some() => {
                self.complete_nonce_handshake(msg);
                true
            }
            InternalType::RequestSigning => {
                self.handle_request_signing(msg);
                true
            }
            _ if sender == GATEWAY_ADDRESS => self.handle_internal_from_gateway(msg, itype),
            _ => false,
        }
    }

    /// Internal messages only the gateway originates.
    fn handle_internal_from_gateway(&mut self, msg: &Message, itype: InternalType) -> bool {
        match itype {
            InternalType::IdResponse if self.context.node_id == AUTO => {
                self.apply_id_response(msg.get_u8());
                true
            }
            InternalType::Heartbeat => {
                let mut response = Message::internal(
                    self.context.node_id,
                    GATEWAY_ADDRESS,
                    InternalType::HeartbeatResponse,
                );
                self.send_routed(&mut response);
                true
            }
            InternalType::Reboot => {
                debug!("reboot requested by controller");
                self.clock.reboot();
                self.state = NodeState::Rebooting;
                true
            }
            InternalType::Config => {
                // Controller configuration exchange; the reply itself is
                // all the node needs, nothing to store here.
                true
            }
            _ => false,
        }
    }

    /// Answer a FIND_PARENT broadcast (repeater/gateway only).
    ///
    /// A relaying node without a valid distance first runs its own
    /// discovery; if a distance is known it replies directly to the
    /// searching node after a randomized delay.
    fn answer_find_parent(&mut self, sender: u8) {
        if sender == self.context.parent_node_id {
            return;
        }
        if !is_valid_distance(self.context.distance) {
            self.find_parent();
        }
        if is_valid_distance(self.context.distance) {
            self.reply_jitter();
            let mut response = Message::internal(
                self.context.node_id,
                sender,
                InternalType::FindParentResponse,
            );
            response.set_u8(self.context.distance);
            // Direct write: routing a reply to a node that has no route
            // yet would loop back to our parent.
            self.send_write(sender, &mut response);
        }
    }

    /// Complete the outbound signing handshake with a received nonce.
    fn complete_nonce_handshake(&mut self, msg: &Message) {
        if self.nonce_status != NonceStatus::WaitingForNonce {
            trace!("unexpected nonce response dropped");
            return;
        }
        let signer = match self.signer.as_mut() {
            Some(signer) => signer,
            None => return,
        };
        signer.put_nonce(msg.payload());
        if let Some(mut pending) = self.pending_sign.take() {
            if signer.sign_message(&mut pending) {
                self.pending_sign = Some(pending);
                self.nonce_status = NonceStatus::Ok;
            }
        }
    }
}
