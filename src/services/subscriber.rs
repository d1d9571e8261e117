//! Subscriber delivery loop: relay a topic's chunks to one HTTP client.

use std::convert::Infallible;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::{
    services::sniff,
    state::{RelayHub, Subscription, TopicKey},
};

/// Attach a subscriber to `topic` and stream every chunk it receives.
///
/// The response head is held back until the first chunk arrives so its content
/// type can be set: the topic's decided type when the publisher recorded one,
/// otherwise a guess from this chunk. Each chunk is then written as its own body
/// frame. The stream ends on an end-of-stream chunk or eviction; a client
/// disconnect drops the body, and with it the subscription, which deregisters
/// itself either way.
pub async fn attach(hub: &RelayHub, topic: TopicKey) -> Response {
    let mut subscription = hub.subscribe(&topic);

    let Some(first) = subscription.next_data().await else {
        debug!(topic = %topic, subscriber = %subscription.id(), "stream ended before any data");
        return (stream_headers(None), Body::empty()).into_response();
    };

    let content_type = hub
        .content_type(&topic)
        .unwrap_or_else(|| sniff::detect(&first, &topic));
    debug!(
        topic = %topic,
        subscriber = %subscription.id(),
        content_type = %content_type,
        "serving stream"
    );

    let body = Body::from_stream(relay(subscription, first));
    (stream_headers(Some(&content_type)), body).into_response()
}

fn relay(
    mut subscription: Subscription,
    first: bytes::Bytes,
) -> impl futures::Stream<Item = Result<bytes::Bytes, Infallible>> {
    async_stream::stream! {
        yield Ok(first);
        while let Some(bytes) = subscription.next_data().await {
            yield Ok(bytes);
        }
        debug!(
            topic = %subscription.topic(),
            subscriber = %subscription.id(),
            "stream finished"
        );
    }
}

/// Headers for long-lived, uncached chunked delivery.
fn stream_headers(content_type: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store"),
    );
    if let Some(content_type) = content_type {
        let value = HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(sniff::OCTET_STREAM));
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::to_bytes;
    use bytes::Bytes;
    use futures::StreamExt;

    use super::*;
    use crate::{config::HubConfig, state::Chunk};

    async fn wait_for_subscribers(hub: &RelayHub, topic: &TopicKey, count: usize) {
        while hub.subscriber_count(topic) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn streams_chunks_until_end_of_stream() {
        let hub = RelayHub::new(HubConfig::default());
        let topic = TopicKey::from_path("/show.mp3");

        let response = tokio::spawn({
            let (hub, topic) = (hub.clone(), topic.clone());
            async move { attach(&hub, topic).await }
        });
        wait_for_subscribers(&hub, &topic, 1).await;

        hub.set_content_type(&topic, "audio/mpeg".into());
        hub.broadcast(&topic, Chunk::Data(Bytes::from_static(b"one-")))
            .await;
        hub.broadcast(&topic, Chunk::Data(Bytes::from_static(b"two")))
            .await;
        hub.broadcast(&topic, Chunk::End).await;

        let response = response.await.unwrap();
        let headers = response.headers().clone();
        assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-store");
        assert_eq!(headers[header::CONNECTION], "keep-alive");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"one-two");
        assert_eq!(hub.subscriber_count(&topic), 0);
    }

    #[tokio::test]
    async fn sniffs_own_chunk_when_topic_has_no_decision() {
        let hub = RelayHub::new(HubConfig::default());
        let topic = TopicKey::from_path("/notes.txt");

        let response = tokio::spawn({
            let (hub, topic) = (hub.clone(), topic.clone());
            async move { attach(&hub, topic).await }
        });
        wait_for_subscribers(&hub, &topic, 1).await;
        hub.broadcast(&topic, Chunk::Data(Bytes::from_static(b"plain words")))
            .await;
        hub.broadcast(&topic, Chunk::End).await;

        let response = response.await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    }

    #[tokio::test]
    async fn dropping_the_body_deregisters_the_subscriber() {
        let hub = RelayHub::new(HubConfig::default());
        let topic = TopicKey::from_path("/show.mp3");

        let response = tokio::spawn({
            let (hub, topic) = (hub.clone(), topic.clone());
            async move { attach(&hub, topic).await }
        });
        wait_for_subscribers(&hub, &topic, 1).await;
        hub.broadcast(&topic, Chunk::Data(Bytes::from_static(b"first")))
            .await;

        let mut stream = response.await.unwrap().into_body().into_data_stream();
        assert_eq!(stream.next().await.unwrap().unwrap(), "first");
        assert_eq!(hub.subscriber_count(&topic), 1);

        drop(stream);
        assert_eq!(hub.subscriber_count(&topic), 0);
    }

    #[tokio::test]
    async fn end_before_data_yields_empty_body() {
        let hub = RelayHub::new(HubConfig::default());
        let topic = TopicKey::from_path("/quiet.mp3");

        let response = tokio::spawn({
            let (hub, topic) = (hub.clone(), topic.clone());
            async move { attach(&hub, topic).await }
        });
        wait_for_subscribers(&hub, &topic, 1).await;
        hub.broadcast(&topic, Chunk::End).await;

        let response = response.await.unwrap();
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
        assert_eq!(hub.subscriber_count(&topic), 0);
    }
}
