//! Broadcast routing within a room.
//!
//! Every member of the room receives the frame, the sender included. Members
//! whose writer has already gone away are skipped and pruned in the same
//! pass; a dead member never causes an error for the live ones. A member whose
//! outbound queue is full is evicted as a slow consumer.

use std::sync::Arc;

use bytes::Bytes;

use crate::net::connection::{ConnectionId, Outbound, SendFailure};
use crate::observability::metrics;
use crate::rooms::registry::{RoomId, RoomRegistry};
use crate::ws::codec::encode_to_bytes;
use crate::ws::frame::Frame;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the frame was queued for.
    pub delivered: usize,
    /// Members removed from the room, dead or evicted.
    pub pruned: Vec<ConnectionId>,
    /// Members among `pruned` evicted for a full queue.
    pub evicted: Vec<ConnectionId>,
}

/// Fans encoded frames out to room members.
#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    registry: Arc<RoomRegistry>,
}

impl BroadcastRouter {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Encode `text` once and send it to the whole room.
    pub fn relay_text(&self, room: &RoomId, text: &str) -> BroadcastReport {
        let frame = encode_to_bytes(&Frame::text(Bytes::copy_from_slice(text.as_bytes())));
        let report = self.broadcast(room, frame);
        metrics::message_relayed(report.delivered);
        report
    }

    /// Send an already encoded frame to every live member, in join order.
    pub fn broadcast(&self, room: &RoomId, frame: Bytes) -> BroadcastReport {
        let report = self
            .registry
            .with_members(room, |members| {
                let mut report = BroadcastReport::default();
                members.retain(|member| match member.send(Outbound::Frame(frame.clone())) {
                    Ok(()) => {
                        report.delivered += 1;
                        true
                    }
                    Err(SendFailure::Full) => {
                        member.evict();
                        report.evicted.push(member.id());
                        report.pruned.push(member.id());
                        false
                    }
                    Err(SendFailure::Closed) => {
                        report.pruned.push(member.id());
                        false
                    }
                });
                report
            })
            .unwrap_or_default();

        if !report.pruned.is_empty() {
            self.registry.forget(room, &report.pruned);
            tracing::debug!(room = %room, pruned = report.pruned.len(), "Pruned closed members");
        }
        for id in &report.evicted {
            metrics::slow_consumer();
            tracing::warn!(connection_id = %id, room = %room, "Evicted slow consumer");
        }
        tracing::trace!(room = %room, delivered = report.delivered, "Broadcast");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::OutboundSender;
    use tokio::sync::mpsc::Receiver;

    fn join(registry: &RoomRegistry, room: &str) -> (ConnectionId, Receiver<Outbound>) {
        let (sender, rx) = OutboundSender::channel(ConnectionId::new(), 64);
        let id = sender.id();
        registry.register(sender, RoomId::from(room));
        (id, rx)
    }

    fn frame_of(outbound: Outbound) -> Bytes {
        match outbound {
            Outbound::Frame(bytes) => bytes,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn room_isolation() {
        let registry = Arc::new(RoomRegistry::new());
        let router = BroadcastRouter::new(registry.clone());
        let (_a1, mut rx_a1) = join(&registry, "a");
        let (_a2, mut rx_a2) = join(&registry, "a");
        let (_b1, mut rx_b1) = join(&registry, "b");

        let report = router.relay_text(&RoomId::from("a"), "hi");
        assert_eq!(report.delivered, 2);
        assert!(report.pruned.is_empty());

        let expected = encode_to_bytes(&Frame::text("hi"));
        assert_eq!(frame_of(rx_a1.try_recv().unwrap()), expected);
        assert_eq!(frame_of(rx_a2.try_recv().unwrap()), expected);
        assert!(rx_b1.try_recv().is_err());
    }

    #[test]
    fn dead_members_are_pruned_without_affecting_live_ones() {
        let registry = Arc::new(RoomRegistry::new());
        let router = BroadcastRouter::new(registry.clone());
        let (live1, mut rx1) = join(&registry, "r");
        let (dead, rx_dead) = join(&registry, "r");
        let (live2, mut rx2) = join(&registry, "r");
        drop(rx_dead);

        let room = RoomId::from("r");
        let report = router.broadcast(&room, Bytes::from_static(b"frame"));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.pruned, vec![dead]);
        assert_eq!(registry.room_members(&room), vec![live1, live2]);
        assert_eq!(registry.room_of(dead), None);

        let report = router.broadcast(&room, Bytes::from_static(b"again"));
        assert_eq!(report.delivered, 2);
        assert!(report.pruned.is_empty());

        assert_eq!(frame_of(rx1.try_recv().unwrap()), Bytes::from_static(b"frame"));
        assert_eq!(frame_of(rx2.try_recv().unwrap()), Bytes::from_static(b"frame"));
        assert_eq!(frame_of(rx2.try_recv().unwrap()), Bytes::from_static(b"again"));
    }

    #[test]
    fn broadcast_to_missing_room_is_a_no_op() {
        let router = BroadcastRouter::new(Arc::new(RoomRegistry::new()));
        assert_eq!(
            router.broadcast(&RoomId::from("nobody"), Bytes::new()),
            BroadcastReport::default()
        );
    }

    #[test]
    fn last_dead_member_removes_room() {
        let registry = Arc::new(RoomRegistry::new());
        let router = BroadcastRouter::new(registry.clone());
        let (_id, rx) = join(&registry, "gone");
        drop(rx);
        router.broadcast(&RoomId::from("gone"), Bytes::new());
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn stalled_member_is_evicted() {
        let registry = Arc::new(RoomRegistry::new());
        let router = BroadcastRouter::new(registry.clone());
        let room = RoomId::from("busy");

        let (stalled, _stalled_rx) = OutboundSender::channel(ConnectionId::new(), 2);
        let stalled_id = stalled.id();
        let eviction = stalled.eviction();
        registry.register(stalled, room.clone());
        let (live, mut live_rx) = join(&registry, "busy");

        for _ in 0..2 {
            assert_eq!(router.broadcast(&room, Bytes::from_static(b"m")).delivered, 2);
        }
        let report = router.broadcast(&room, Bytes::from_static(b"m"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, vec![stalled_id]);
        assert_eq!(report.evicted, vec![stalled_id]);
        assert_eq!(registry.room_members(&room), vec![live]);
        assert_eq!(registry.room_of(stalled_id), None);

        tokio::time::timeout(std::time::Duration::from_secs(1), eviction.notified())
            .await
            .unwrap();
        for _ in 0..3 {
            assert!(live_rx.try_recv().is_ok());
        }
    }

    #[test]
    fn per_sender_order_is_preserved() {
        let registry = Arc::new(RoomRegistry::new());
        let router = BroadcastRouter::new(registry.clone());
        let (_id, mut rx) = join(&registry, "ordered");
        let room = RoomId::from("ordered");
        for i in 0..10 {
            router.relay_text(&room, &i.to_string());
        }
        for i in 0..10 {
            let expected = encode_to_bytes(&Frame::text(i.to_string()));
            assert_eq!(frame_of(rx.try_recv().unwrap()), expected);
        }
    }
}
