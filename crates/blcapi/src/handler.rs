//! Message handlers and the command dispatch table.
//!
//! Handlers run synchronously on the client's receive task, so a slow handler
//! delays every message after it. Offload CPU heavy work to a thread pool and
//! `tokio::spawn` any async follow-up instead of blocking on it.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::{error, trace, warn};

use crate::client::BlivechatClient;
use crate::error::{BlcError, Result};
use crate::models::{
    AddGiftMsg, AddMemberMsg, AddSuperChatMsg, AddTextMsg, DelSuperChatMsg, FatalErrorMsg,
    HeartbeatMsg, LiveMessage, UpdateTranslationMsg,
};
use crate::protocol::{Command, Envelope};

/// Result of a [`MessageHandler`] callback.
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Low level handler receiving raw envelopes.
pub trait Handler: Send + Sync + 'static {
    /// Handle one inbound envelope.
    ///
    /// Decode errors should be returned so the client drops the connection,
    /// anything else is logged by the client and ignored.
    fn handle(&self, client: &BlivechatClient, envelope: &Envelope) -> Result<()>;

    /// Called once when the client's background task ends.
    ///
    /// `error` is `None` after a [`BlivechatClient::stop`]. The client is
    /// already stopped at this point, so it can be started again from here.
    fn on_client_stopped(&self, _client: &BlivechatClient, _error: Option<&BlcError>) {}
}

impl<T: Handler + ?Sized> Handler for Arc<T> {
    fn handle(&self, client: &BlivechatClient, envelope: &Envelope) -> Result<()> {
        (**self).handle(client, envelope)
    }

    fn on_client_stopped(&self, client: &BlivechatClient, error: Option<&BlcError>) {
        (**self).on_client_stopped(client, error)
    }
}

/// Typed callbacks, one per message kind. All of them default to no-ops.
#[allow(unused_variables)]
pub trait MessageHandler: Send + Sync + 'static {
    fn on_heartbeat(&self, client: &BlivechatClient, message: &HeartbeatMsg) -> HandlerResult {
        Ok(())
    }

    fn on_add_text(&self, client: &BlivechatClient, message: &AddTextMsg) -> HandlerResult {
        Ok(())
    }

    fn on_add_gift(&self, client: &BlivechatClient, message: &AddGiftMsg) -> HandlerResult {
        Ok(())
    }

    fn on_add_member(&self, client: &BlivechatClient, message: &AddMemberMsg) -> HandlerResult {
        Ok(())
    }

    fn on_add_super_chat(
        &self,
        client: &BlivechatClient,
        message: &AddSuperChatMsg,
    ) -> HandlerResult {
        Ok(())
    }

    fn on_del_super_chat(
        &self,
        client: &BlivechatClient,
        message: &DelSuperChatMsg,
    ) -> HandlerResult {
        Ok(())
    }

    fn on_update_translation(
        &self,
        client: &BlivechatClient,
        message: &UpdateTranslationMsg,
    ) -> HandlerResult {
        Ok(())
    }

    fn on_fatal_error(&self, client: &BlivechatClient, message: &FatalErrorMsg) -> HandlerResult {
        Ok(())
    }

    fn on_client_stopped(&self, client: &BlivechatClient, error: Option<&BlcError>) {}
}

/// Dispatch table turning envelopes into typed [`MessageHandler`] calls.
pub struct Dispatcher<H> {
    handler: H,
    /// Unknown cmds that were already logged
    logged_unknown_cmds: Mutex<FxHashSet<i64>>,
}

impl<H: MessageHandler> Dispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            logged_unknown_cmds: Mutex::new(FxHashSet::default()),
        }
    }

    /// The wrapped handler.
    pub fn inner(&self) -> &H {
        &self.handler
    }

    /// Returns `true` only the first time `cmd` is seen.
    fn first_unknown(&self, cmd: i64) -> bool {
        self.logged_unknown_cmds.lock().insert(cmd)
    }

    fn invoke(&self, client: &BlivechatClient, message: &LiveMessage) -> HandlerResult {
        let handler = &self.handler;
        match message {
            LiveMessage::Heartbeat(m) => handler.on_heartbeat(client, m),
            LiveMessage::JoinRoom(_) => Ok(()),
            LiveMessage::AddText(m) => handler.on_add_text(client, m),
            LiveMessage::AddGift(m) => handler.on_add_gift(client, m),
            LiveMessage::AddMember(m) => handler.on_add_member(client, m),
            LiveMessage::AddSuperChat(m) => handler.on_add_super_chat(client, m),
            LiveMessage::DelSuperChat(m) => handler.on_del_super_chat(client, m),
            LiveMessage::UpdateTranslation(m) => handler.on_update_translation(client, m),
            LiveMessage::FatalError(m) => handler.on_fatal_error(client, m),
        }
    }
}

impl<H: MessageHandler> Handler for Dispatcher<H> {
    fn handle(&self, client: &BlivechatClient, envelope: &Envelope) -> Result<()> {
        let cmd = match Command::try_from(envelope.cmd) {
            Ok(cmd) => cmd,
            Err(cmd) => {
                if self.first_unknown(cmd) {
                    warn!(room = %client.room_key(), cmd, ?envelope, "Unknown cmd");
                }
                return Ok(());
            }
        };

        // The server never echoes joins back, nothing to deliver.
        if cmd == Command::JoinRoom {
            trace!(room = %client.room_key(), "Ignoring inbound JOIN_ROOM");
            return Ok(());
        }

        let message = LiveMessage::decode(cmd, &envelope.data)?;
        if let Err(e) = self.invoke(client, &message) {
            error!(
                room = %client.room_key(),
                ?cmd,
                ?envelope,
                "Handler failed: {}",
                e
            );
        }
        Ok(())
    }

    fn on_client_stopped(&self, client: &BlivechatClient, error: Option<&BlcError>) {
        self.handler.on_client_stopped(client, error)
    }
}
