use anyhow::Result;
use async_trait::async_trait;
use lapin::BasicProperties;
use std::borrow::Cow;

/// A message flowing through the bridge: raw payload, AMQP properties
/// (headers included) and the routing key it was delivered with.
#[derive(Debug, Clone)]
pub struct Message<'a> {
    pub data: Cow<'a, [u8]>,
    pub properties: BasicProperties,
    pub route: Cow<'a, str>,
}

impl<'a> Message<'a> {
    pub fn new(
        data: impl Into<Cow<'a, [u8]>>,
        properties: BasicProperties,
        route: impl Into<Cow<'a, str>>,
    ) -> Self {
        Self {
            data: data.into(),
            properties,
            route: route.into(),
        }
    }
}

#[async_trait]
pub trait MessageTransformer: Send + Sync {
    /// Transform an incoming AMQP `Message` into a new `Message` before publish.
    ///
    /// # Errors
    /// Implementations may return an error when transformation fails, e.g.
    /// a required header is missing or the message was delivered on a route
    /// with no registered transformation.
    async fn transform<'a>(&self, input: Message<'a>) -> Result<Message<'a>>;
}
