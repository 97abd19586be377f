//! Integration tests for the full change-notification loop.
//!
//! Tests: Author write → outbound bus → (posts service) → inbound bus →
//! consumer worker → counter reconciler → author store
//!
//! Verifies:
//! - An announced author can be referenced by post changes coming back
//! - Wrapped notifications are decoded and applied once per delivery id
//! - Concurrent deltas for one author all land

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use serde_json::json;

    use authors_core::{Author, AuthorId, NewAuthor, Operation};
    use authors_events::{BusMessage, EventBus, InMemoryEventBus};

    use crate::author_store::{AuthorStore, InMemoryAuthorStore};
    use crate::idempotency::InMemoryProcessedMessages;
    use crate::publisher::{AuthorChangePublisher, BusChangePublisher};
    use crate::reconciler::CounterReconciler;
    use crate::workers::ConsumerWorker;

    type Bus = Arc<InMemoryEventBus<BusMessage>>;

    /// What the posts service puts on the inbound queue after a post change.
    fn wrapped_post_change(message_id: &str, post_id: &str, author: &str, operation: &str) -> BusMessage {
        let post = json!({ "_id": post_id, "title": "Hello", "body": "...", "author": author });
        BusMessage::new(
            json!({
                "Type": "Notification",
                "MessageId": message_id,
                "Message": post.to_string(),
                "MessageAttributes": { "operation": { "Type": "String", "Value": operation } }
            })
            .to_string(),
        )
    }

    async fn wait_for_total(store: &InMemoryAuthorStore, id: &AuthorId, expected: i64) -> i64 {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let total = store.get(id).await.unwrap().map(|a| a.total_posts).unwrap_or(-1);
            if total == expected || Instant::now() > deadline {
                return total;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn published_author_is_counted_when_a_post_references_it() {
        let store = Arc::new(InMemoryAuthorStore::new());
        store
            .seed(Author::create(AuthorId::from("1"), NewAuthor::new("Ada", "Lovelace"), Utc::now()))
            .unwrap();

        let authors_topic: Bus = Arc::new(InMemoryEventBus::new());
        let posts_queue: Bus = Arc::new(InMemoryEventBus::new());

        let reconciler = Arc::new(
            CounterReconciler::new(store.clone())
                .with_idempotency(Arc::new(InMemoryProcessedMessages::new(Duration::from_secs(60)))),
        );
        let worker =
            ConsumerWorker::spawn_reconciler(posts_queue.clone(), reconciler, tokio::runtime::Handle::current())
                .unwrap();

        // The posts service learns about author "1" from the outbound topic.
        let outbound = authors_topic.subscribe();
        let publisher = BusChangePublisher::new(authors_topic.clone());
        let author = store.get(&AuthorId::from("1")).await.unwrap().unwrap();
        publisher.publish(&[author], Operation::Create).unwrap();

        let announced = outbound.recv_timeout(Duration::from_secs(1)).unwrap();
        let announced_ids: Vec<String> = serde_json::from_str::<Vec<serde_json::Value>>(announced.body())
            .unwrap()
            .iter()
            .map(|a| a["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(announced_ids, vec!["1"]);

        // It then reports a post created by that author, delivered twice.
        posts_queue.publish(wrapped_post_change("sns-1", "p1", "1", "CREATE")).unwrap();
        posts_queue.publish(wrapped_post_change("sns-1", "p1", "1", "CREATE")).unwrap();

        assert_eq!(wait_for_total(&store, &AuthorId::from("1"), 1).await, 1);

        // Give the redelivery time to be (not) applied.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get(&AuthorId::from("1")).await.unwrap().unwrap().total_posts, 1);

        worker.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn create_then_delete_returns_counter_to_zero() {
        let store = Arc::new(InMemoryAuthorStore::new());
        let author = store.insert(NewAuthor::new("Grace", "Hopper")).await.unwrap();
        let posts_queue: Bus = Arc::new(InMemoryEventBus::new());

        let worker = ConsumerWorker::spawn_reconciler(
            posts_queue.clone(),
            Arc::new(CounterReconciler::new(store.clone())),
            tokio::runtime::Handle::current(),
        )
        .unwrap();

        posts_queue
            .publish(wrapped_post_change("m1", "p1", author.id.as_str(), "CREATE"))
            .unwrap();
        posts_queue
            .publish(wrapped_post_change("m2", "p2", author.id.as_str(), "CREATE"))
            .unwrap();
        assert_eq!(wait_for_total(&store, &author.id, 2).await, 2);

        posts_queue
            .publish(wrapped_post_change("m3", "p1", author.id.as_str(), "UPDATE"))
            .unwrap();
        posts_queue
            .publish(wrapped_post_change("m4", "p1", author.id.as_str(), "DELETE"))
            .unwrap();
        posts_queue
            .publish(wrapped_post_change("m5", "p2", author.id.as_str(), "DELETE"))
            .unwrap();
        assert_eq!(wait_for_total(&store, &author.id, 0).await, 0);

        worker.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_for_one_author_both_apply() {
        let store = Arc::new(InMemoryAuthorStore::new());
        let author = store.insert(NewAuthor::new("Alan", "Turing")).await.unwrap();
        let reconciler = Arc::new(CounterReconciler::new(store.clone()));

        let a = {
            let r = reconciler.clone();
            let m = wrapped_post_change("c1", "p1", author.id.as_str(), "CREATE");
            tokio::spawn(async move { r.handle_message(&m).await })
        };
        let b = {
            let r = reconciler.clone();
            let m = wrapped_post_change("c2", "p2", author.id.as_str(), "CREATE");
            tokio::spawn(async move { r.handle_message(&m).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(store.get(&author.id).await.unwrap().unwrap().total_posts, 2);
    }
}
