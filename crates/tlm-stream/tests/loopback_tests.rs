//! Loopback endpoint behavior across tiers

use pretty_assertions::assert_eq;
use std::time::Duration;
use tlm_stream::{
    Delivery, Encoding, Endpoint, LoopbackConnector, SecurityTier, StreamConnector, StreamEvent,
    SubscribeRequest, Termination, TierScript,
};
use tokio::sync::mpsc;

fn connector() -> LoopbackConnector {
    LoopbackConnector::new()
        .with_tier(
            SecurityTier::Strong,
            TierScript::reject_handshake("PKIX path building failed"),
        )
        .with_tier(
            SecurityTier::Unencrypted,
            TierScript::stream([b"r1".to_vec(), b"r2".to_vec(), b"r3".to_vec()])
                .with_interval(Duration::from_millis(5)),
        )
}

#[tokio::test]
async fn handshake_rejection_arrives_as_termination() {
    let connector = connector();
    let endpoint = Endpoint::new("router1", 57400);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut strong = connector.open(&endpoint, SecurityTier::Strong).await.unwrap();
    strong
        .subscribe(&SubscribeRequest::new("anx-1"), Delivery::new(1, tx.clone()))
        .await
        .unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.generation(), 1);
    assert!(matches!(
        event,
        StreamEvent::Terminated { reason: Termination::HandshakeRejected(_), .. }
    ));
    strong.close().await;

    let mut plain = connector.open(&endpoint, SecurityTier::Unencrypted).await.unwrap();
    plain
        .subscribe(
            &SubscribeRequest::new("anx-1").with_encoding(Encoding::Json),
            Delivery::new(2, tx),
        )
        .await
        .unwrap();

    let mut received = Vec::new();
    while received.len() < 3 {
        match rx.recv().await.unwrap() {
            StreamEvent::Record { generation, payload } => {
                assert_eq!(generation, 2);
                received.push(payload);
            }
            StreamEvent::Terminated { generation, .. } => assert_eq!(generation, 1),
        }
    }
    assert_eq!(received, vec![b"r1".to_vec(), b"r2".to_vec(), b"r3".to_vec()]);
    plain.close().await;

    assert_eq!(connector.opened(), 2);
    assert_eq!(connector.opened_at(SecurityTier::Strong), 1);
    assert_eq!(connector.opened_at(SecurityTier::Unencrypted), 1);
    assert_eq!(connector.max_live(), 1);
    assert_eq!(connector.live(), 0);
}

#[tokio::test]
async fn script_can_be_replaced_between_opens() {
    let connector = connector();
    connector.set_script(
        SecurityTier::Strong,
        TierScript::stream([b"secure".to_vec()]).then_terminate(Termination::DeviceRejected(
            "subscription removed".into(),
        )),
    );
    let mut client = connector
        .open(&Endpoint::new("router1", 57400), SecurityTier::Strong)
        .await
        .unwrap();
    let (delivery, mut rx) = Delivery::channel();
    client
        .subscribe(&SubscribeRequest::new("anx-2"), delivery)
        .await
        .unwrap();

    assert!(matches!(rx.recv().await, Some(StreamEvent::Record { .. })));
    assert!(matches!(
        rx.recv().await,
        Some(StreamEvent::Terminated { reason: Termination::DeviceRejected(_), .. })
    ));
}
