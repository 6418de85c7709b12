//! Property: concurrent requests never receive each other's responses

use bridge_messaging::{Message, Messaging};
use bridge_port::{Channel, ErrorInfo};
use bridge_port_memory::MemoryPort;
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_interleaved_requests_resolve_to_own_reply(
        calls in prop::collection::vec((any::<i64>(), 0u64..20), 1..24)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();

        let replies = runtime.block_on(async {
            let (a, b) = MemoryPort::pair("prop-interleaved");
            let caller = Messaging::new(Channel::new(a));
            let responder = Messaging::new(Channel::new(b));

            responder.on("double", |message: Message| async move {
                let delay = message.data["delay"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let value = message.data["value"].as_i64().unwrap_or(0);
                Ok::<_, ErrorInfo>(json!(value.wrapping_mul(2)))
            });

            let pending = calls.iter().map(|(value, delay)| {
                let caller = caller.clone();
                let message = Message::new("double", json!({ "value": value, "delay": delay }));
                async move { caller.request(message).await }
            });

            let replies = futures::future::join_all(pending).await;
            assert_eq!(caller.pending_calls(), 0);
            replies
        });

        for ((value, _), reply) in calls.iter().zip(replies) {
            prop_assert_eq!(reply.unwrap(), json!(value.wrapping_mul(2)));
        }
    }
}
