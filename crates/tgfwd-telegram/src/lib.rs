//! Telegram adapter (teloxide).
//!
//! Implements the `tgfwd-core` channel port over the Telegram Bot API. The
//! Bot API has no history iterator, so existence of a source message is
//! learned from the forward attempt itself: "not found" means the id is
//! absent, "can't be forwarded" means it exists but is not relayable content.

use async_trait::async_trait;

use teloxide::{prelude::*, types::Recipient, ApiError, RequestError};
use tokio::time::sleep;

pub mod router;

use tgfwd_core::{
    domain::{ChatId, MessageId},
    errors::Error,
    ports::{ChannelPort, ForwardOutcome},
    Result,
};

#[derive(Clone)]
pub struct TelegramChannel {
    bot: Bot,
    source: teloxide::types::ChatId,
    target: Recipient,
}

impl TelegramChannel {
    pub fn new(bot: Bot, source_channel: ChatId, target_channel: &str) -> Result<Self> {
        Ok(Self {
            bot,
            source: teloxide::types::ChatId(source_channel.0),
            target: parse_recipient(target_channel)?,
        })
    }
}

#[async_trait]
impl ChannelPort for TelegramChannel {
    async fn forward(&self, id: MessageId) -> Result<ForwardOutcome> {
        const MAX_RETRIES: usize = 1;
        let msg_id = teloxide::types::MessageId(id.0);

        let mut attempts = 0usize;
        loop {
            let res = self
                .bot
                .forward_message(self.target.clone(), self.source, msg_id)
                .await;

            return match res {
                Ok(_) => Ok(ForwardOutcome::Forwarded),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                    continue;
                }
                Err(RequestError::Api(api)) => classify_api_error(api),
                Err(other) => Err(Error::Channel(format!("telegram error: {other}"))),
            };
        }
    }
}

/// Accepts a numeric channel id or an `@username`.
fn parse_recipient(target: &str) -> Result<Recipient> {
    let target = target.trim();
    if let Some(username) = target.strip_prefix('@') {
        if username.is_empty() {
            return Err(Error::Config("empty target channel username".to_string()));
        }
        return Ok(Recipient::ChannelUsername(format!("@{username}")));
    }
    let id = target.parse::<i64>().map_err(|_| {
        Error::Config(format!(
            "TARGET_CHANNEL must be a numeric id or @username, got {target:?}"
        ))
    })?;
    Ok(Recipient::Id(teloxide::types::ChatId(id)))
}

fn classify_api_error(e: ApiError) -> Result<ForwardOutcome> {
    match e {
        ApiError::MessageToForwardNotFound | ApiError::MessageIdInvalid => {
            Ok(ForwardOutcome::Missing)
        }
        ApiError::Unknown(text)
            if text.contains("can't be forwarded") || text.contains("can't be copied") =>
        {
            Ok(ForwardOutcome::NotForwardable)
        }
        other => Err(Error::Channel(format!("telegram api error: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_accepts_username_and_numeric_id() {
        assert!(matches!(
            parse_recipient("@mychannel"),
            Ok(Recipient::ChannelUsername(u)) if u == "@mychannel"
        ));
        assert!(matches!(
            parse_recipient("-1001234567890"),
            Ok(Recipient::Id(teloxide::types::ChatId(-1001234567890)))
        ));
        assert!(parse_recipient("not a channel").is_err());
        assert!(parse_recipient("@").is_err());
    }

    #[test]
    fn missing_and_service_messages_map_to_skips() {
        assert_eq!(
            classify_api_error(ApiError::MessageToForwardNotFound).unwrap(),
            ForwardOutcome::Missing
        );
        assert_eq!(
            classify_api_error(ApiError::MessageIdInvalid).unwrap(),
            ForwardOutcome::Missing
        );
        assert_eq!(
            classify_api_error(ApiError::Unknown(
                "Bad Request: message can't be forwarded".to_string()
            ))
            .unwrap(),
            ForwardOutcome::NotForwardable
        );
        assert!(classify_api_error(ApiError::Unknown("flood".to_string())).is_err());
    }
}
