use blcapi::models::{AddGiftMsg, AddMemberMsg, AddSuperChatMsg, AddTextMsg, GuardLevel};
use blcapi::{BlcError, BlivechatClient, HandlerResult, MessageHandler};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Logs live events and keeps the client running until a fatal error.
pub struct LiveMsgHandler {
    /// Set once the process is shutting down, the client must stay stopped
    shutdown: CancellationToken,
    fatal_tx: mpsc::UnboundedSender<String>,
}

impl LiveMsgHandler {
    pub fn new(shutdown: CancellationToken, fatal_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            shutdown,
            fatal_tx,
        }
    }
}

fn guard_name(level: GuardLevel) -> &'static str {
    match level {
        GuardLevel::None | GuardLevel::Unknown(_) => "未知舰队等级",
        other => other.name(),
    }
}

impl MessageHandler for LiveMsgHandler {
    fn on_add_text(&self, _client: &BlivechatClient, message: &AddTextMsg) -> HandlerResult {
        match message.content_type_params.emoticon_url() {
            Some(url) => info!("{} 发送了表情 {}", message.author_name, url),
            None => info!("{} 说：{}", message.author_name, message.content),
        }
        Ok(())
    }

    fn on_add_gift(&self, _client: &BlivechatClient, message: &AddGiftMsg) -> HandlerResult {
        info!(
            "{} 赠送了{}个{}",
            message.author_name, message.num, message.gift_name
        );
        Ok(())
    }

    fn on_add_member(&self, _client: &BlivechatClient, message: &AddMemberMsg) -> HandlerResult {
        info!(
            "{} 购买了{}",
            message.author_name,
            guard_name(message.privilege_type)
        );
        Ok(())
    }

    fn on_add_super_chat(
        &self,
        _client: &BlivechatClient,
        message: &AddSuperChatMsg,
    ) -> HandlerResult {
        info!(
            "{} 打赏{}元，说：{}",
            message.author_name, message.price, message.content
        );
        Ok(())
    }

    fn on_client_stopped(&self, client: &BlivechatClient, error: Option<&BlcError>) {
        match error {
            Some(e) if e.is_fatal() => {
                let _ = self.fatal_tx.send(e.to_string());
            }
            _ if self.shutdown.is_cancelled() => {}
            _ => {
                warn!(room = %client.room_key(), "Client stopped unexpectedly, restarting");
                client.start();
            }
        }
    }
}
