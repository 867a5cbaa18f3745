use std::time::Duration;

use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::Requester;
use teloxide::types::{ChatId, Message, ThreadId};
use teloxide::{Bot, RequestError};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use crate::error::DeliveryError;

/// Minimum gap between outbound sends, to stay under the bot API
/// throughput limit.
pub const SEND_DELAY: Duration = Duration::from_secs(1);

struct Outgoing {
    text: String,
    done: Option<oneshot::Sender<Result<Message, DeliveryError>>>,
}

/// Serializes every outbound message of the bot through one worker
/// task. Rate-limit rejections are retried once after the delay the
/// server asks for; any other failure is logged and dropped, never
/// retried (a duplicate announcement is worse than a missing one).
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Outbox {
    pub fn spawn(bot: Bot, chat: ChatId, thread: ThreadId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
        tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                let result = deliver(&bot, chat, thread, &out.text).await;
                if let Err(e) = &result {
                    log::error!("Failed to send message: {e}");
                }
                if let Some(done) = out.done {
                    let _ = done.send(result);
                }
                sleep(SEND_DELAY).await;
            }
        });
        Self { tx }
    }

    /// Queues a message and forgets about it; failures are logged by
    /// the worker.
    pub fn notify(&self, text: impl Into<String>) {
        let out = Outgoing {
            text: text.into(),
            done: None,
        };
        if self.tx.send(out).is_err() {
            log::error!("Outbox worker is gone, dropping message");
        }
    }

    /// Queues a message and waits for the delivery result; used when
    /// the caller needs the sent message id (pin, delayed delete).
    pub async fn send(&self, text: impl Into<String>) -> Result<Message, DeliveryError> {
        let (done_tx, done_rx) = oneshot::channel();
        let out = Outgoing {
            text: text.into(),
            done: Some(done_tx),
        };
        self.tx.send(out).map_err(|_| DeliveryError::QueueClosed)?;
        done_rx.await.map_err(|_| DeliveryError::QueueClosed)?
    }
}

async fn deliver(
    bot: &Bot,
    chat: ChatId,
    thread: ThreadId,
    text: &str,
) -> Result<Message, DeliveryError> {
    match send_once(bot, chat, thread, text).await {
        Ok(msg) => Ok(msg),
        Err(RequestError::RetryAfter(after)) => {
            log::warn!(
                "Rate limited, retrying once in {}s",
                after.duration().as_secs()
            );
            sleep(after.duration()).await;
            send_once(bot, chat, thread, text)
                .await
                .map_err(DeliveryError::RateLimited)
        }
        Err(e) => Err(DeliveryError::Other(e)),
    }
}

async fn send_once(
    bot: &Bot,
    chat: ChatId,
    thread: ThreadId,
    text: &str,
) -> Result<Message, RequestError> {
    bot.send_message(chat, text)
        .message_thread_id(thread)
        .await
}
