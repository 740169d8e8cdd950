use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use tgfwd_core::{
    commands::{is_operator, Command},
    config::Config,
    domain::UserId,
    ports::ChannelPort,
    relay::RelayService,
};

use crate::TelegramChannel;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub relay: RelayService,
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        info!(bot = %me.username(), "forwarder started");
    }
    info!(
        source = cfg.source_channel.0,
        target = %cfg.target_channel,
        start_from_id = cfg.start_from_id,
        interval_minutes = cfg.forward_interval_minutes,
        "channel pair configured"
    );

    let channel: Arc<dyn ChannelPort> = Arc::new(TelegramChannel::new(
        bot.clone(),
        cfg.source_channel,
        &cfg.target_channel,
    )?);
    let relay = RelayService::new(&cfg, channel);

    // Best-effort online notification to the operator.
    {
        let bot = bot.clone();
        let owner = teloxide::types::ChatId(cfg.owner_id.0);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            if let Err(e) = bot
                .send_message(owner, "🚀 Forwarder online. Send /status for current state.")
                .await
            {
                warn!(error = %e, "startup notification failed");
            }
        });
    }

    let state = Arc::new(AppState { cfg, relay });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    // Only the configured operator may drive the bot; updates from anyone
    // else are ignored outright, without a reply.
    let sender = msg.from().map(|u| UserId(u.id.0 as i64));
    if !is_operator(sender, state.cfg.owner_id) {
        return Ok(());
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };

    // Non-command chatter is ignored silently as well.
    let Some(cmd) = Command::parse(text) else {
        return Ok(());
    };

    let reply = state.relay.handle_command(cmd).await;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}
