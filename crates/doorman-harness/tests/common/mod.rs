//! Shared fixtures for the harness tests.

// Each integration test binary compiles its own copy; not every binary
// uses every helper.
#![allow(dead_code)]

use bytes::Bytes;
use doorman_core::{
    ClassSpec, FieldSpec, FieldType, SchemaRegistry, Uberdog, UberdogRegistry,
};
use doorman_harness::SimAgent;
use doorman_proto::{
    location2channel, BusMessage, ClientMessage, Datagram, DatagramView, MdDatagram,
};

pub const VERSION: &str = "v1";
pub const CHANNEL_MIN: u64 = 1_000_000;
pub const CHANNEL_MAX: u64 = 1_009_999;
pub const LOGIN_DOG: u32 = 100;

pub fn test_schema() -> SchemaRegistry {
    SchemaRegistry::build(vec![
        ClassSpec {
            name: "Login".to_string(),
            fields: vec![FieldSpec {
                name: "login".to_string(),
                types: vec![FieldType::String, FieldType::String],
                clsend: true,
                ownsend: false,
            }],
        },
        ClassSpec {
            name: "Avatar".to_string(),
            fields: vec![
                FieldSpec {
                    name: "setName".to_string(),
                    types: vec![FieldType::String],
                    clsend: false,
                    ownsend: true,
                },
                FieldSpec {
                    name: "say".to_string(),
                    types: vec![FieldType::String],
                    clsend: true,
                    ownsend: false,
                },
            ],
        },
    ])
    .expect("test schema builds")
}

/// A simulated agent with the Login uberdog.
pub fn sim_agent(anonymous_uberdog: bool) -> SimAgent {
    let schema = test_schema();
    let mut uberdogs = UberdogRegistry::new();
    uberdogs.insert(LOGIN_DOG, Uberdog { class_id: 0, anonymous: anonymous_uberdog });
    SimAgent::new(schema, uberdogs, VERSION, CHANNEL_MIN, CHANNEL_MAX)
}

pub fn hello_bytes(hash: u32, version: &str) -> Bytes {
    let mut dg = Datagram::client(ClientMessage::Hello);
    dg.add_u32(hash);
    dg.add_string(version).expect("short version string");
    dg.into_bytes()
}

/// Connect a client and walk it to ANONYMOUS.
pub fn anonymous_client(sim: &mut SimAgent) -> u64 {
    let sid = sim.connect().expect("channel available");
    let hash = sim.schema().hash();
    sim.client_send(sid, hello_bytes(hash, VERSION));

    let out = sim.take_client_out(sid);
    assert_eq!(out.len(), 1, "expected only HELLO_RESP, got {out:?}");
    let (msg, _) = decode_client(&out[0]);
    assert_eq!(msg, ClientMessage::HelloResp);
    sid
}

/// Connect a client and walk it to ESTABLISHED.
pub fn established_client(sim: &mut SimAgent) -> u64 {
    let sid = anonymous_client(sim);
    let mut body = Datagram::new();
    body.add_u16(2);
    let identity = sim.session(sid).expect("live session").identity_channel();
    sim.deliver(sid, &MdDatagram::new(identity, 0, BusMessage::ClientAgentSetState, body.into_bytes()));
    sid
}

pub fn add_interest_bytes(interest_id: u16, context: u32, parent: u32, zones: &[u32]) -> Bytes {
    let mut dg = Datagram::client(ClientMessage::AddInterest);
    dg.add_u16(interest_id);
    dg.add_u32(context);
    dg.add_u32(parent);
    for &zone in zones {
        dg.add_u32(zone);
    }
    dg.into_bytes()
}

pub fn remove_interest_bytes(interest_id: u16, context: u32) -> Bytes {
    let mut dg = Datagram::client(ClientMessage::RemoveInterest);
    dg.add_u16(interest_id);
    if context != 0 {
        dg.add_u32(context);
    }
    dg.into_bytes()
}

pub fn enter_zone_md(parent: u32, zone: u32, dc_id: u16, do_id: u32) -> MdDatagram {
    let mut body = Datagram::new();
    body.add_u32(parent);
    body.add_u32(zone);
    body.add_u16(dc_id);
    body.add_u32(do_id);
    body.add_raw(b"required-fields");
    MdDatagram::new(
        location2channel(parent, zone),
        0,
        BusMessage::StateServerObjectEnterZoneWithRequired,
        body.into_bytes(),
    )
}

pub fn query_done_md(to: u64, parent: u32, zones: &[u32]) -> MdDatagram {
    let mut body = Datagram::new();
    body.add_u32(parent);
    body.add_u16(zones.len() as u16);
    for &zone in zones {
        body.add_u32(zone);
    }
    MdDatagram::new(to, 0, BusMessage::StateServerObjectQueryZoneAllDone, body.into_bytes())
}

pub fn change_zone_md(
    do_id: u32,
    new_parent: u32,
    new_zone: u32,
    old_parent: u32,
    old_zone: u32,
) -> MdDatagram {
    let mut body = Datagram::new();
    body.add_u32(do_id);
    body.add_u32(new_parent);
    body.add_u32(new_zone);
    body.add_u32(old_parent);
    body.add_u32(old_zone);
    MdDatagram::new(
        location2channel(old_parent, old_zone),
        0,
        BusMessage::StateServerObjectChangeZone,
        body.into_bytes(),
    )
}

/// Split a client-bound datagram into its message id and body cursor.
pub fn decode_client(dg: &Datagram) -> (ClientMessage, DatagramView) {
    let mut view = DatagramView::new(Bytes::copy_from_slice(dg.as_bytes()));
    let raw = view.read_u16().expect("message id");
    (ClientMessage::from_u16(raw).expect("known client message"), view)
}
