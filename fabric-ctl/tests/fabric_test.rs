use fabric_ctl::flow::{FlowAction, FlowMatch};
use fabric_ctl::sim::{FabricSim, SimHost, SimSouthbound};
use fabric_ctl::test_util::RecordingSouthbound;
use fabric_ctl::{Controller, ControllerConfig, ControllerEvent, Disposition, DropReason, runtime};
use std::collections::BTreeSet;
use std::sync::Arc;

fn fabric() -> FabricSim {
    FabricSim::new(4).expect("k=4 fat-tree")
}

/// Controller that has seen every switch and link of `sim`, with the
/// bootstrap messages cleared.
fn bootstrapped(sim: &FabricSim) -> Controller<RecordingSouthbound> {
    let mut controller = Controller::new(ControllerConfig::default(), RecordingSouthbound::new());
    for event in sim.bootstrap_events() {
        controller.handle_event(event);
    }
    controller.southbound().clear();
    controller
}

fn host<'a>(sim: &'a FabricSim, name: &str) -> &'a SimHost {
    sim.host(name).unwrap_or_else(|| panic!("no host {name}"))
}

fn handle(controller: &mut Controller<RecordingSouthbound>, event: ControllerEvent) -> Disposition {
    controller
        .handle_event(event)
        .expect("packet-in yields a disposition")
}

#[test]
fn test_switch_attach_installs_miss_rule_once() {
    let sim = fabric();
    let mut controller = Controller::new(ControllerConfig::default(), RecordingSouthbound::new());
    let attach = sim.attach_events().remove(0);

    controller.handle_event(attach.clone());
    let flows = controller.southbound().flow_mods();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].priority, 0);
    assert_eq!(flows[0].pattern, FlowMatch::All);
    assert_eq!(flows[0].action, FlowAction::Controller);

    // Re-attaching resends the identical rule.
    controller.handle_event(attach);
    let flows = controller.southbound().flow_mods();
    assert_eq!(flows.len(), 2);
    assert_eq!(flows[0], flows[1]);
}

#[test]
fn test_repeated_attach_keeps_one_table_miss_entry() {
    let sim = fabric();
    let southbound = SimSouthbound::new(sim.clone());
    let mut controller = Controller::new(ControllerConfig::default(), southbound);
    let attach = sim.attach_events().remove(0);
    let dpid = attach.dpid();

    controller.handle_event(attach.clone());
    controller.handle_event(attach);
    assert_eq!(controller.southbound().flow_table(dpid).len(), 1);
}

#[test]
fn test_arp_request_learns_and_broadcasts_at_edge() {
    let sim = fabric();
    let mut controller = bootstrapped(&sim);
    let a = host(&sim, "h0_0_0");
    let b = host(&sim, "h2_1_0");

    let out = handle(&mut controller, sim.arp_request(a, b.ip));
    assert_eq!(
        out,
        Disposition::EdgeBroadcast {
            switches: 8,
            ports: 15
        }
    );

    let binding = controller.hosts().lookup_by_mac(&a.mac).unwrap();
    assert_eq!((binding.dpid, binding.port), (a.dpid, a.port));
    assert_eq!(binding.ip, Some(a.ip));

    let outs = controller.southbound().packet_outs();
    let mut reached = BTreeSet::new();
    for out in &outs {
        for &port in &out.outputs {
            assert!(
                !controller.topology().is_uplink_port(out.dpid, port),
                "broadcast left {} through uplink {port}",
                out.dpid
            );
            assert!(
                !(out.dpid == a.dpid && port == a.port),
                "broadcast echoed to ingress"
            );
            reached.insert((out.dpid, port));
        }
    }
    let expected: BTreeSet<_> = sim
        .hosts()
        .iter()
        .filter(|h| h.mac != a.mac)
        .map(|h| (h.dpid, h.port))
        .collect();
    assert_eq!(reached, expected);
    assert!(controller.southbound().flow_mods().is_empty());
}

#[test]
fn test_arp_reply_is_unicast() {
    let sim = fabric();
    let mut controller = bootstrapped(&sim);
    let a = host(&sim, "h0_0_0");
    let b = host(&sim, "h2_1_0");

    handle(&mut controller, sim.arp_request(a, b.ip));
    controller.southbound().clear();

    let out = handle(&mut controller, sim.arp_reply(b, a));
    assert_eq!(
        out,
        Disposition::Unicast {
            dpid: a.dpid,
            port: a.port
        }
    );

    let outs = controller.southbound().packet_outs();
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].dpid, a.dpid);
    assert_eq!(outs[0].outputs, vec![a.port]);
    assert!(controller.hosts().lookup_by_ip(b.ip).is_some());
}

#[test]
fn test_second_request_gets_proxy_reply() {
    let sim = fabric();
    let mut controller = bootstrapped(&sim);
    let a = host(&sim, "h0_0_0");
    let b = host(&sim, "h2_1_0");
    for event in &sim.resolve_and_ping(a, b)[..2] {
        handle(&mut controller, event.clone());
    }
    controller.southbound().clear();

    let out = handle(&mut controller, sim.arp_request(b, a.ip));
    assert_eq!(
        out,
        Disposition::ProxyReply {
            dpid: b.dpid,
            port: b.port
        }
    );
    let outs = controller.southbound().packet_outs();
    assert_eq!(outs.len(), 1);
    assert_eq!((outs[0].dpid, outs[0].outputs.clone()), (b.dpid, vec![b.port]));
}

#[test]
fn test_ipv4_installs_forward_and_reverse_paths() {
    let sim = fabric();
    let mut controller = bootstrapped(&sim);
    let a = host(&sim, "h0_0_0");
    let b = host(&sim, "h2_1_0");

    let events = sim.resolve_and_ping(a, b);
    handle(&mut controller, events[0].clone());
    handle(&mut controller, events[1].clone());
    controller.southbound().clear();

    let out = handle(&mut controller, events[2].clone());
    assert_eq!(out, Disposition::PathInstalled { hops: 5, rules: 10 });

    let flows = controller.southbound().flow_mods();
    let forward: Vec<_> = flows
        .iter()
        .filter(|f| f.pattern == FlowMatch::Ipv4Dst(b.ip))
        .collect();
    let reverse: Vec<_> = flows
        .iter()
        .filter(|f| f.pattern == FlowMatch::Ipv4Dst(a.ip))
        .collect();
    assert_eq!(forward.len(), 5);
    assert_eq!(reverse.len(), 5);
    assert!(flows.iter().all(|f| f.priority == 1));

    assert_eq!(forward[0].dpid, a.dpid);
    assert_eq!(forward[4].dpid, b.dpid);
    assert_eq!(forward[4].action, FlowAction::Output(b.port));
    assert_eq!(reverse[0].dpid, b.dpid);
    assert_eq!(reverse[4].dpid, a.dpid);
    assert_eq!(reverse[4].action, FlowAction::Output(a.port));

    // Every intermediate hop points at the next switch of the path.
    for hop in forward.windows(2) {
        let port = controller.topology().port_to(hop[0].dpid, hop[1].dpid);
        assert_eq!(Some(hop[0].action), port.map(FlowAction::Output));
    }

    let outs = controller.southbound().packet_outs();
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].dpid, a.dpid);
    assert_eq!(outs[0].in_port, Some(a.port));
    let FlowAction::Output(first_hop) = forward[0].action else {
        panic!("forward rule without output");
    };
    assert_eq!(outs[0].outputs, vec![first_hop]);
    assert!(controller.topology().is_uplink_port(a.dpid, first_hop));
}

#[test]
fn test_path_lengths_by_locality() {
    let sim = fabric();
    let a = host(&sim, "h0_0_0");
    for (name, hops) in [("h0_0_1", 1), ("h0_1_0", 3), ("h3_0_1", 5)] {
        let mut controller = bootstrapped(&sim);
        let b = host(&sim, name);
        let outcomes: Vec<_> = sim
            .resolve_and_ping(a, b)
            .into_iter()
            .map(|e| handle(&mut controller, e))
            .collect();
        assert_eq!(
            outcomes[2],
            Disposition::PathInstalled {
                hops,
                rules: 2 * hops
            },
            "{name}"
        );
    }
}

#[test]
fn test_equal_cost_choice_is_repeatable() {
    let sim = fabric();
    let a = host(&sim, "h0_0_0");
    let b = host(&sim, "h3_1_1");

    let run = || {
        let mut controller = bootstrapped(&sim);
        for event in sim.resolve_and_ping(a, b) {
            handle(&mut controller, event);
        }
        controller.southbound().flow_mods()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_no_learning_from_uplink() {
    let sim = fabric();
    let mut controller = bootstrapped(&sim);
    let a = host(&sim, "h0_0_0");
    let b = host(&sim, "h1_0_0");
    let agg = sim.dpid(sim.tree().find("a0_0").unwrap());
    let uplink = controller.topology().port_to(agg, a.dpid).unwrap();

    let ControllerEvent::PacketIn { payload, .. } = sim.arp_request(a, b.ip) else {
        unreachable!();
    };
    let out = handle(
        &mut controller,
        ControllerEvent::PacketIn {
            dpid: agg,
            in_port: uplink,
            buffer_id: None,
            payload,
        },
    );
    assert_eq!(out, Disposition::Dropped(DropReason::UplinkIngress));
    assert!(controller.hosts().is_empty());
    assert!(controller.southbound().messages().is_empty());
}

#[test]
fn test_detach_forgets_switch_and_hosts() {
    let sim = fabric();
    let mut controller = bootstrapped(&sim);
    let a = host(&sim, "h0_0_0");
    let b = host(&sim, "h2_1_0");
    for event in sim.resolve_and_ping(a, b) {
        handle(&mut controller, event);
    }
    let links = controller.topology().link_count();

    controller.handle_event(ControllerEvent::SwitchDetach { dpid: b.dpid });
    assert!(!controller.topology().contains(b.dpid));
    assert_eq!(controller.topology().link_count(), links - 2);
    assert!(controller.hosts().lookup_by_mac(&b.mac).is_none());
    assert!(controller.hosts().lookup_by_mac(&a.mac).is_some());

    // b is unknown again, so traffic for it is broadcast.
    controller.southbound().clear();
    let out = handle(&mut controller, sim.ping(a, b, 2));
    assert_eq!(
        out,
        Disposition::EdgeBroadcast {
            switches: 7,
            ports: 13
        }
    );
    // No broadcast leaves through the ports that faced the detached switch.
    for out in controller.southbound().packet_outs() {
        for &port in &out.outputs {
            assert!(sim.hosts().iter().any(|h| (h.dpid, h.port) == (out.dpid, port)));
        }
    }
}

#[test]
fn test_malformed_and_lldp_dropped() {
    let sim = fabric();
    let mut controller = bootstrapped(&sim);
    let a = host(&sim, "h0_0_0");

    let out = handle(
        &mut controller,
        ControllerEvent::PacketIn {
            dpid: a.dpid,
            in_port: a.port,
            buffer_id: None,
            payload: vec![0xff; 10],
        },
    );
    assert_eq!(out, Disposition::Dropped(DropReason::Malformed));

    let lldp = fabric_ctl::test_util::packets::raw_frame(a.mac, 0x88cc, &[0u8; 32]);
    let out = handle(
        &mut controller,
        ControllerEvent::PacketIn {
            dpid: a.dpid,
            in_port: a.port,
            buffer_id: None,
            payload: lldp,
        },
    );
    assert_eq!(out, Disposition::Dropped(DropReason::Unsupported(0x88cc)));
    assert!(controller.hosts().is_empty());
}

#[test]
fn test_traced_paths_reach_destination() {
    let sim = fabric();
    let southbound = SimSouthbound::new(sim.clone());
    let mut controller = Controller::new(ControllerConfig::default(), southbound);
    for event in sim.bootstrap_events() {
        controller.handle_event(event);
    }

    let hosts = sim.hosts();
    for i in 0..hosts.len() / 2 {
        let (a, b) = (&hosts[i], &hosts[hosts.len() - 1 - i]);
        for event in sim.resolve_and_ping(a, b) {
            controller.handle_event(event);
        }
    }

    let sb = controller.southbound();
    for i in 0..hosts.len() / 2 {
        let (a, b) = (&hosts[i], &hosts[hosts.len() - 1 - i]);
        let there = sb.trace(a.dpid, b.ip).unwrap();
        let back = sb.trace(b.dpid, a.ip).unwrap();
        assert_eq!(there.first(), Some(&a.dpid));
        assert_eq!(there.last(), Some(&b.dpid));
        assert_eq!(back.len(), there.len());
    }
}

#[tokio::test]
async fn test_actor_end_to_end() {
    let _ = tracing_subscriber::fmt::try_init();

    let sim = fabric();
    let southbound = Arc::new(SimSouthbound::new(sim.clone()));
    let (handle, task) = runtime::spawn(Controller::new(
        ControllerConfig::default(),
        Arc::clone(&southbound),
    ));

    // Connections submit from several tasks at once.
    let bootstrap = handle.clone();
    let events = sim.bootstrap_events();
    tokio::spawn(async move {
        for event in events {
            bootstrap.submit(event).unwrap();
        }
    })
    .await
    .unwrap();

    let a = host(&sim, "h1_0_0");
    let b = host(&sim, "h3_1_0");
    for event in sim.resolve_and_ping(a, b) {
        handle.submit(event).unwrap();
    }
    drop(handle);

    let controller = task.join().await.unwrap();
    assert_eq!(controller.topology().switch_count(), 20);
    assert_eq!(controller.hosts().len(), 2);

    let path = southbound.trace(a.dpid, b.ip).unwrap();
    assert_eq!(path.len(), 5);
    assert_eq!(southbound.trace(b.dpid, a.ip).unwrap().len(), 5);
}
