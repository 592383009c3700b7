//! The handler-facing message view and the one-shot reply ticket.

use tokio::sync::mpsc::UnboundedSender;

use courier_crypto::PublicKey;

use crate::auth::AuthLevel;
use crate::connection::ConnectionId;
use crate::proxy::Instruction;

/// An inbound message as seen by a command handler.
///
/// The view is valid for the duration of the handler call; to reply after
/// the handler returns, detach the ticket with [`Message::reply_ticket`].
pub struct Message {
    conn: ConnectionId,
    remote_pubkey: PublicKey,
    auth_level: AuthLevel,
    category: String,
    command: String,
    frames: Vec<Vec<u8>>,
    reply: Option<ReplyTicket>,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        conn: ConnectionId,
        remote_pubkey: PublicKey,
        auth_level: AuthLevel,
        category: String,
        command: String,
        frames: Vec<Vec<u8>>,
        reply: Option<ReplyTicket>,
    ) -> Self {
        Self {
            conn,
            remote_pubkey,
            auth_level,
            category,
            command,
            frames,
            reply,
        }
    }

    /// Id of the connection the message arrived on.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.conn
    }

    /// The sender's public key.
    #[must_use]
    pub fn pubkey(&self) -> PublicKey {
        self.remote_pubkey
    }

    /// The sender connection's resolved auth level.
    #[must_use]
    pub fn auth_level(&self) -> AuthLevel {
        self.auth_level
    }

    /// The dispatched category name.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// The dispatched command name.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The opaque data frames, in wire order.
    #[must_use]
    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    /// Take ownership of the data frames.
    pub fn take_frames(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.frames)
    }

    /// Reply to the originating request.
    ///
    /// Valid at most once, and only for commands registered with
    /// `add_request_command` on a request-tagged message; otherwise the
    /// call is silently ignored (logged at debug level). The requester on
    /// the other side times out if no reply is ever sent.
    pub fn send_reply<I, F>(&mut self, frames: I)
    where
        I: IntoIterator<Item = F>,
        F: Into<Vec<u8>>,
    {
        match self.reply.take() {
            Some(ticket) => ticket.send_reply(frames),
            None => {
                tracing::debug!(
                    "send_reply ignored for {}.{}: not a request command or already replied",
                    self.category,
                    self.command
                );
            }
        }
    }

    /// Detach the reply ticket for an asynchronous reply after the handler
    /// returns. `None` under the same conditions `send_reply` is ignored.
    pub fn reply_ticket(&mut self) -> Option<ReplyTicket> {
        self.reply.take()
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("conn", &self.conn)
            .field("target", &format_args!("{}.{}", self.category, self.command))
            .field("auth_level", &self.auth_level)
            .field("frames", &self.frames.len())
            .field("reply_capable", &self.reply.is_some())
            .finish()
    }
}

/// One-shot token for replying to a request after its handler returned.
///
/// The ticket stays valid as long as the originating connection is open;
/// replying into a closed connection is silently dropped (the requester
/// has already been failed by the close cleanup).
pub struct ReplyTicket {
    conn: ConnectionId,
    tag: u64,
    instructions: UnboundedSender<Instruction>,
}

impl ReplyTicket {
    pub(crate) fn new(
        conn: ConnectionId,
        tag: u64,
        instructions: UnboundedSender<Instruction>,
    ) -> Self {
        Self {
            conn,
            tag,
            instructions,
        }
    }

    /// The connection the reply will be sent on.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.conn
    }

    /// Send the reply frames. Consumes the ticket.
    pub fn send_reply<I, F>(self, frames: I)
    where
        I: IntoIterator<Item = F>,
        F: Into<Vec<u8>>,
    {
        let frames: Vec<Vec<u8>> = frames.into_iter().map(Into::into).collect();
        // A send error means the proxy is gone; the requester will be
        // failed by the shutdown drain.
        let _ = self.instructions.send(Instruction::Reply {
            conn: self.conn,
            tag: self.tag,
            frames,
        });
    }
}

impl std::fmt::Debug for ReplyTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyTicket")
            .field("conn", &self.conn)
            .field("tag", &self.tag)
            .finish()
    }
}
