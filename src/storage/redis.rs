use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::time::Duration;

use crate::error::AppResult;

/// Prefix of the pub/sub channels carrying room broadcasts between instances.
pub const ROOM_CHANNEL_PREFIX: &str = "chat:room:";

#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(url: &str) -> AppResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn })
    }

    // Participant presence
    pub async fn set_presence(&self, participant_key: &str, status: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let key = format!("presence:{}", participant_key);
        let _: () = conn.set_ex(&key, status, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    // Pub/Sub for room fan-out across instances
    pub async fn publish_room_event(&self, room_key: &str, envelope: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let channel = format!("{}{}", ROOM_CHANNEL_PREFIX, room_key);
        let _: () = conn.publish(&channel, envelope).await?;
        Ok(())
    }

    pub async fn subscribe_rooms(&self) -> AppResult<redis::aio::PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(format!("{}*", ROOM_CHANNEL_PREFIX)).await?;
        Ok(pubsub)
    }
}
