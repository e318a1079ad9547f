//! Send router: next-hop selection, reverse-route learning and the
//! failed-transmission escalation.

use super::*;
use crate::message::{InternalType, AUTO, GATEWAY_ADDRESS};

#[test]
fn test_leaf_always_sends_via_parent() {
    let mut bed = joined_bed(test_config());
    let mut msg = set_msg(5, 42);

    assert!(bed.node.send_routed(&mut msg));
    let sent = bed.link.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 0);
    assert_eq!(sent[0].1.destination, 42);
}

#[test]
fn test_no_parent_fails_and_searches() {
    let storage = SharedStorage::new();
    let mut bed = TestBed::build(test_config(), storage);
    bed.node.state = NodeState::Running;

    let mut msg = set_msg(AUTO, GATEWAY_ADDRESS);
    assert!(!bed.node.send_routed(&mut msg));
    assert!(bed.error_pulsed());

    // The failed send kicked off parent discovery.
    let sent = bed.link.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, BROADCAST_ADDRESS);
    assert_eq!(sent[0].1.internal_type(), Some(InternalType::FindParent));
}

#[test]
fn test_no_node_id_fails_and_requests() {
    let storage = SharedStorage::new();
    storage.seed_identity(AUTO, 0, 1);
    let mut bed = TestBed::build(test_config(), storage);
    bed.node.state = NodeState::Running;

    let mut msg = set_msg(AUTO, GATEWAY_ADDRESS);
    assert!(!bed.node.send_routed(&mut msg));

    let sent = bed.link.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.internal_type(), Some(InternalType::IdRequest));
}

#[test]
fn test_repeater_uses_known_downstream_route() {
    let mut config = test_config();
    config.node.repeater = true;
    let storage = SharedStorage::new();
    storage.seed_identity(5, 0, 1);
    storage.seed_route(20, 7);
    let mut bed = TestBed::build(config, storage);
    bed.node.state = NodeState::Running;

    let mut msg = set_msg(5, 20);
    assert!(bed.node.send_routed(&mut msg));
    let sent = bed.link.sent();
    assert_eq!(sent[0].0, 7);
}

#[test]
fn test_downstream_route_failure_skips_escalation() {
    let mut config = test_config();
    config.node.repeater = true;
    let storage = SharedStorage::new();
    storage.seed_identity(5, 0, 1);
    storage.seed_route(20, 7);
    let mut bed = TestBed::build(config, storage);
    bed.node.state = NodeState::Running;
    bed.link.set_fail_unicast(true);

    let mut msg = set_msg(5, 20);
    assert!(!bed.node.send_routed(&mut msg));
    // Only parent-bound failures feed the rediscovery counter.
    assert_eq!(bed.node.context.failed_transmissions, 0);
}

#[test]
fn test_repeater_upstream_learns_reverse_route() {
    let mut config = test_config();
    config.node.repeater = true;
    let mut bed = joined_bed(config);

    let mut msg = set_msg(9, GATEWAY_ADDRESS);
    msg.last = 3;
    assert!(bed.node.send_routed(&mut msg));

    assert_eq!(bed.link.sent()[0].0, 0);
    assert_eq!(bed.node.routes.next_hop(9), 3);
    assert_eq!(bed.storage.read(ADDR_ROUTES + 9), 3);
}

#[test]
fn test_broadcast_bypasses_route_lookup() {
    let mut config = test_config();
    config.node.repeater = true;
    let storage = SharedStorage::new();
    storage.seed_identity(5, 0, 1);
    // A corrupt table entry for the broadcast address must not redirect
    // broadcasts.
    storage.seed_route(BROADCAST_ADDRESS, 7);
    let mut bed = TestBed::build(config, storage);
    bed.node.state = NodeState::Running;

    let mut msg = Message::internal(GATEWAY_ADDRESS, BROADCAST_ADDRESS, InternalType::Discover);
    assert!(bed.node.send_routed(&mut msg));
    assert_eq!(bed.link.sent()[0].0, BROADCAST_ADDRESS);
}

#[test]
fn test_gateway_drops_unroutable_destination() {
    let mut bed = TestBed::build(gateway_test_config(), SharedStorage::new());
    bed.node.state = NodeState::Running;

    let mut msg = set_msg(GATEWAY_ADDRESS, 42);
    assert!(!bed.node.send_routed(&mut msg));
    assert!(bed.link.sent().is_empty());
}

#[test]
fn test_failure_counter_escalates_to_rediscovery() {
    let mut bed = joined_bed(test_config());
    bed.link.set_fail_unicast(true);

    // search_failures is 3: the fourth consecutive failure escalates.
    for expected in 1..=3u8 {
        let mut msg = set_msg(5, GATEWAY_ADDRESS);
        assert!(!bed.node.send_routed(&mut msg));
        assert_eq!(bed.node.context.failed_transmissions, expected);
    }

    let mut msg = set_msg(5, GATEWAY_ADDRESS);
    assert!(!bed.node.send_routed(&mut msg));

    let probes: Vec<_> = bed
        .link
        .sent()
        .into_iter()
        .filter(|(_, m)| m.internal_type() == Some(InternalType::FindParent))
        .collect();
    assert_eq!(probes.len(), 1);
    // find_parent resets the counter.
    assert_eq!(bed.node.context.failed_transmissions, 0);
}

#[test]
fn test_success_resets_failure_counter() {
    let mut bed = joined_bed(test_config());
    bed.link.set_fail_unicast(true);
    let mut msg = set_msg(5, GATEWAY_ADDRESS);
    bed.node.send_routed(&mut msg);
    assert_eq!(bed.node.context.failed_transmissions, 1);

    bed.link.set_fail_unicast(false);
    let mut msg = set_msg(5, GATEWAY_ADDRESS);
    assert!(bed.node.send_routed(&mut msg));
    assert_eq!(bed.node.context.failed_transmissions, 0);
}

#[test]
fn test_no_escalation_when_auto_find_parent_disabled() {
    let mut config = test_config();
    config.node.auto_find_parent = false;
    let mut bed = joined_bed(config);
    bed.link.set_fail_unicast(true);

    for _ in 0..6 {
        let mut msg = set_msg(5, GATEWAY_ADDRESS);
        bed.node.send_routed(&mut msg);
    }
    assert!(bed
        .link
        .sent()
        .iter()
        .all(|(_, m)| m.internal_type() != Some(InternalType::FindParent)));
    assert_eq!(bed.node.context.failed_transmissions, 6);
}
