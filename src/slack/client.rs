//! Slack Socket Mode client and the [`ChatGateway`] implementation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use slack_morphism::prelude::{
    SlackApiChatPostMessageRequest, SlackApiChatUpdateRequest, SlackApiToken, SlackApiTokenType,
    SlackApiTokenValue, SlackApiViewsOpenRequest, SlackBlock, SlackChannelId, SlackClient,
    SlackClientEventsListenerEnvironment, SlackClientHyperHttpsConnector,
    SlackClientSocketModeConfig, SlackClientSocketModeListener, SlackMessageContent,
    SlackSocketModeListenerCallbacks, SlackTriggerId, SlackTs, SlackView,
};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::SlackConfig;
use crate::mcp::server::AppState;
use crate::slack::gateway::{ApprovalRequestView, Attribution, ChatGateway};
use crate::slack::{blocks, events};
use crate::{AppError, Result};

const MAX_POST_ATTEMPTS: u32 = 4;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Slack Web API + Socket Mode wrapper.
pub struct SlackService {
    client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
}

impl SlackService {
    /// Build the HTTPS client and API tokens.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the connector cannot be created or a
    /// required token is missing.
    pub fn new(config: &SlackConfig) -> Result<Self> {
        if config.bot_token.is_empty() {
            return Err(AppError::Slack(
                "bot token missing; set SLACK_BOT_TOKEN or slack.bot_token".into(),
            ));
        }
        if config.app_token.is_empty() {
            return Err(AppError::Slack(
                "app token missing; set SLACK_APP_TOKEN or slack.app_token".into(),
            ));
        }

        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Slack(format!("failed to init slack connector: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));

        let bot_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.bot_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };
        let app_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.app_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::App),
        };

        Ok(Self {
            client,
            bot_token,
            app_token,
        })
    }

    /// Start the Socket Mode listener with the live application state.
    ///
    /// Push events and interactions are normalized in
    /// [`events`](crate::slack::events) and dispatched against the shared
    /// [`AppState`]. Socket Mode carries its own authenticity guarantees, so
    /// no separate signature verification happens here.
    #[must_use]
    pub fn start_socket_mode(&self, state: Arc<AppState>) -> JoinHandle<()> {
        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_error_handler(|err, _client, _state| {
                    error!(?err, "socket mode error");
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                })
                .with_user_state(state),
        );

        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_hello_events(|event, _client, _state| async move {
                info!(?event, "socket hello");
            })
            .with_push_events(events::handle_push_event)
            .with_interaction_events(events::handle_interaction);

        let config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times:
                SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };
        let listener = SlackClientSocketModeListener::new(&config, listener_env, callbacks);
        let app_token = self.app_token.clone();

        tokio::spawn(async move {
            if let Err(err) = listener.listen_for(&app_token).await {
                error!(?err, "socket mode listen failed");
                return;
            }

            listener.serve().await;
            info!("socket mode listener exited");
        })
    }

    /// Post a message, retrying with backoff on transient failures.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` after [`MAX_POST_ATTEMPTS`] failures.
    pub async fn post_message(
        &self,
        channel: SlackChannelId,
        text: String,
        message_blocks: Option<Vec<SlackBlock>>,
        thread_ts: Option<SlackTs>,
        attribution: Option<&Attribution>,
    ) -> Result<SlackTs> {
        let content = SlackMessageContent {
            text: Some(text),
            blocks: message_blocks,
            attachments: None,
            upload: None,
            files: None,
            reactions: None,
            metadata: None,
        };

        let request = SlackApiChatPostMessageRequest {
            channel,
            content,
            as_user: None,
            icon_emoji: attribution.map(|a| a.icon_emoji.clone()),
            icon_url: None,
            link_names: Some(true),
            parse: None,
            thread_ts,
            username: attribution.map(|a| a.username.clone()),
            reply_broadcast: None,
            unfurl_links: None,
            unfurl_media: None,
        };

        let session = self.client.open_session(&self.bot_token);
        let mut backoff = INITIAL_RETRY_DELAY;
        let mut last_error = String::new();

        for attempt in 1..=MAX_POST_ATTEMPTS {
            match session.chat_post_message(&request).await {
                Ok(response) => return Ok(response.ts),
                Err(error) => {
                    let delay = match &error {
                        slack_morphism::errors::SlackClientError::RateLimitError(rate) => {
                            rate.retry_after.unwrap_or(backoff)
                        }
                        _ => backoff,
                    };
                    warn!(?error, attempt, delay = ?delay, "slack post failed; retrying");
                    last_error = error.to_string();
                    sleep(delay).await;
                    backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                }
            }
        }

        Err(AppError::Slack(format!(
            "post failed after {MAX_POST_ATTEMPTS} attempts: {last_error}"
        )))
    }

    /// Update an existing message (e.g. replace buttons with an outcome).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the API call fails.
    pub async fn update(
        &self,
        channel: SlackChannelId,
        ts: SlackTs,
        message_blocks: Vec<SlackBlock>,
        text: Option<String>,
    ) -> Result<()> {
        let request = SlackApiChatUpdateRequest::new(
            channel,
            SlackMessageContent {
                text,
                blocks: Some(message_blocks),
                attachments: None,
                upload: None,
                files: None,
                reactions: None,
                metadata: None,
            },
            ts,
        );

        self.client
            .open_session(&self.bot_token)
            .chat_update(&request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to update message: {err}")))?;
        Ok(())
    }

    /// Open a Slack modal dialog.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the API call fails.
    pub async fn open_modal(&self, trigger_id: SlackTriggerId, view: SlackView) -> Result<()> {
        let request = SlackApiViewsOpenRequest::new(trigger_id, view);
        self.client
            .open_session(&self.bot_token)
            .views_open(&request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to open modal: {err}")))?;
        Ok(())
    }
}

impl ChatGateway for SlackService {
    fn post_to_thread(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
        attribution: Option<Attribution>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let channel = SlackChannelId(channel.to_owned());
        let thread_ts = SlackTs(thread_ts.to_owned());
        let text = text.to_owned();

        Box::pin(async move {
            let ts = self
                .post_message(channel, text, None, Some(thread_ts), attribution.as_ref())
                .await?;
            Ok(ts.0)
        })
    }

    fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let channel = SlackChannelId(channel.to_owned());
        let ts = SlackTs(ts.to_owned());
        let text = text.to_owned();

        Box::pin(async move {
            let replacement = vec![blocks::text_section(&text)];
            self.update(channel, ts, replacement, Some(text)).await
        })
    }

    fn render_approval(
        &self,
        channel: &str,
        thread_ts: &str,
        request: &ApprovalRequestView,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let channel = SlackChannelId(channel.to_owned());
        let thread_ts = SlackTs(thread_ts.to_owned());
        let message_blocks = blocks::approval_blocks(request);
        let text = format!("\u{1f510} Approval required: {}", request.tool_name);

        Box::pin(async move {
            let ts = self
                .post_message(channel, text, Some(message_blocks), Some(thread_ts), None)
                .await?;
            Ok(ts.0)
        })
    }

    fn open_deny_reason_modal(
        &self,
        trigger_id: &str,
        request_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let trigger_id = SlackTriggerId(trigger_id.to_owned());
        let view = blocks::deny_reason_modal(request_id);

        Box::pin(async move { self.open_modal(trigger_id, view).await })
    }
}
