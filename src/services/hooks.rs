//! Side-channel notifications for collaborators (email, push).
//!
//! Hooks run detached from the request that triggered them. A failing or slow
//! hook is logged and otherwise ignored.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{Conversation, Message};

#[async_trait]
pub trait NotificationHook: Send + Sync {
    async fn message_delivered(&self, message: &Message) -> anyhow::Result<()>;

    async fn conversation_created(&self, conversation: &Conversation) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct HookDispatcher {
    hooks: Vec<Arc<dyn NotificationHook>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(mut self, hook: Arc<dyn NotificationHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn message_delivered(&self, message: &Message) {
        for hook in &self.hooks {
            let hook = hook.clone();
            let message = message.clone();
            tokio::spawn(async move {
                if let Err(e) = hook.message_delivered(&message).await {
                    tracing::warn!(message_id = %message.id, "Message hook failed: {:#}", e);
                }
            });
        }
    }

    pub fn conversation_created(&self, conversation: &Conversation) {
        for hook in &self.hooks {
            let hook = hook.clone();
            let conversation = conversation.clone();
            tokio::spawn(async move {
                if let Err(e) = hook.conversation_created(&conversation).await {
                    tracing::warn!(conversation_id = %conversation.id, "Conversation hook failed: {:#}", e);
                }
            });
        }
    }
}

/// Default hook: records deliveries in the service log.
pub struct TracingHook;

#[async_trait]
impl NotificationHook for TracingHook {
    async fn message_delivered(&self, message: &Message) -> anyhow::Result<()> {
        tracing::info!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            receiver = %message.receiver,
            "Message delivered"
        );
        Ok(())
    }

    async fn conversation_created(&self, conversation: &Conversation) -> anyhow::Result<()> {
        tracing::info!(conversation_id = %conversation.id, "Conversation created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Participant, ParticipantPair};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct FailingHook;

    #[async_trait]
    impl NotificationHook for FailingHook {
        async fn message_delivered(&self, _message: &Message) -> anyhow::Result<()> {
            anyhow::bail!("smtp unavailable")
        }

        async fn conversation_created(&self, _conversation: &Conversation) -> anyhow::Result<()> {
            anyhow::bail!("smtp unavailable")
        }
    }

    struct ChannelHook(mpsc::UnboundedSender<Uuid>);

    #[async_trait]
    impl NotificationHook for ChannelHook {
        async fn message_delivered(&self, message: &Message) -> anyhow::Result<()> {
            self.0.send(message.id)?;
            Ok(())
        }

        async fn conversation_created(&self, conversation: &Conversation) -> anyhow::Result<()> {
            self.0.send(conversation.id)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_hook_does_not_stop_others() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = HookDispatcher::new()
            .with_hook(Arc::new(FailingHook))
            .with_hook(Arc::new(ChannelHook(tx)));

        let pair = ParticipantPair::new(
            Participant::Customer(Uuid::new_v4()),
            Participant::Business(Uuid::new_v4()),
        )
        .unwrap();
        let conversation = Conversation::new(pair);
        dispatcher.conversation_created(&conversation);

        assert_eq!(rx.recv().await, Some(conversation.id));
    }
}
