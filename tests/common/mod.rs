// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common test utilities for integration tests
//!
//! [`TestServer`] is a small in-process authoritative server for one zone. It
//! answers AXFR requests and applies RFC 2136 updates over TCP, and can be told
//! to misbehave so that each failure path of a run can be exercised. Requests
//! are authenticated by checking their TSIG MAC against [`KEY_SECRET`].

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hickory_client::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_client::rr::dnssec::rdata::tsig::TsigAlgorithm;
use hickory_client::rr::rdata::{A, NS, SOA};
use hickory_client::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::rr::dnssec::tsig::TSigner;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use zonesync::config::Config;
use zonesync::records::ResourceRecord;
use zonesync::tsig::TsigKey;

/// Zone served by every test server
pub const ZONE: &str = "example.com.";

/// Key accepted by the test server
pub const KEY_NAME: &str = "admin-tsig-key.example.com";

/// Secret of [`KEY_NAME`]
pub const KEY_SECRET: &str = "bTueCg5wgjWkFsoX6n+p8WWUg5/tfyoBQEhnAjNx7RI=";

/// The desired state used by the convergence scenarios.
pub const SCENARIO: &str = r#"
zones:
  example.com:
    records:
      test:
        host: [192.0.2.1, "2001:db8::1"]
      test2:
        host: [192.0.2.2, 192.0.2.3, "2001:db8::2", "2001:db8::3"]
      test3:
        ttl: 7200
        cname: test.example.com
      test4:
        txt: ["abcdef"]
      test5:
        mx:
          - {preference: 10, mx: mx1.example.net}
          - {preference: 15, mx: mx2.example.net}
      test6:
        srv:
          - {priority: 10, weight: 20, port: 80, target: www.example.net}
"#;

/// Records the scenario converges to, in zone file layout.
pub const SCENARIO_RECORDS: &[&str] = &[
    "test.example.com. 3600 IN A 192.0.2.1",
    "test.example.com. 3600 IN AAAA 2001:db8::1",
    "test2.example.com. 3600 IN A 192.0.2.2",
    "test2.example.com. 3600 IN A 192.0.2.3",
    "test2.example.com. 3600 IN AAAA 2001:db8::2",
    "test2.example.com. 3600 IN AAAA 2001:db8::3",
    "test3.example.com. 7200 IN CNAME test.example.com.",
    "test4.example.com. 3600 IN TXT \"abcdef\"",
    "test5.example.com. 3600 IN MX 10 mx1.example.net.",
    "test5.example.com. 3600 IN MX 15 mx2.example.net.",
    "test6.example.com. 3600 IN SRV 10 20 80 www.example.net.",
];

/// How the server treats requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Serve transfers and apply updates
    Normal,
    /// Answer transfers with REFUSED
    RefuseTransfer,
    /// Cut the transfer before the closing SOA
    TruncateTransfer,
    /// Never answer updates
    StallUpdates,
    /// Close the connection when an update arrives, without applying it
    DropUpdates,
    /// Answer the n-th update (zero based) and every later one with REFUSED
    RejectFromUpdate(usize),
}

struct ZoneState {
    apex: Name,
    serial: u32,
    records: Vec<Record>,
    behaviour: Behaviour,
    signer: Option<TSigner>,
    check_transfer_signatures: bool,
    updates_received: usize,
    update_sizes: Vec<usize>,
    unsigned_requests: usize,
}

/// In-process authoritative server for [`ZONE`].
pub struct TestServer {
    address: String,
    state: Arc<Mutex<ZoneState>>,
}

fn name(s: &str) -> Name {
    Name::from_str(s).unwrap()
}

fn soa(apex: &Name, serial: u32) -> Record {
    Record::from_rdata(
        apex.clone(),
        3600,
        RData::SOA(SOA::new(
            name("ns.example.com."),
            name("hostmaster.example.com."),
            serial,
            3600,
            600,
            86400,
            300,
        )),
    )
}

fn same_rr(a: &Record, b: &Record) -> bool {
    a.name() == b.name() && a.record_type() == b.record_type() && a.data() == b.data()
}

impl TestServer {
    /// Start a server requiring requests signed with [`KEY_NAME`] and [`KEY_SECRET`].
    ///
    /// The zone starts with an apex NS record and an address for `ns`, both of
    /// which are reserved and must survive every run.
    pub async fn start(behaviour: Behaviour) -> Self {
        Self::start_with_key(behaviour, Some((KEY_NAME, KEY_SECRET))).await
    }

    /// Start a server that requires `(name, secret)` signatures, or accepts
    /// unsigned requests when `key` is `None`.
    pub async fn start_with_key(behaviour: Behaviour, key: Option<(&str, &str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let apex = name(ZONE);

        let state = Arc::new(Mutex::new(ZoneState {
            apex: apex.clone(),
            serial: 1,
            records: vec![
                Record::from_rdata(apex.clone(), 3600, RData::NS(NS(name("ns.example.com.")))),
                Record::from_rdata(
                    name("ns.example.com."),
                    3600,
                    RData::A(A::new(192, 0, 2, 53)),
                ),
            ],
            behaviour,
            signer: key.map(|(key_name, secret)| {
                let mut key_name = name(key_name);
                key_name.set_fqdn(true);
                TSigner::new(
                    BASE64.decode(secret).unwrap(),
                    TsigAlgorithm::HmacSha256,
                    key_name,
                    300,
                )
                .unwrap()
            }),
            check_transfer_signatures: true,
            updates_received: 0,
            update_sizes: Vec::new(),
            unsigned_requests: 0,
        }));

        let shared = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(handle_connection(socket, shared.clone()));
            }
        });

        Self { address, state }
    }

    /// `host:port` of the server
    pub fn address(&self) -> String {
        self.address.clone()
    }

    /// Add a record to the zone as if an operator had created it by hand.
    pub fn seed(&self, record: &str) {
        let record = parse_record(record);
        self.state.lock().unwrap().records.push(record);
    }

    /// Managed records in zone file layout, sorted. The apex and `ns` are left out.
    pub fn managed_records(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let ns = name("ns.example.com.");
        let mut rendered: Vec<String> = state
            .records
            .iter()
            .filter(|r| *r.name() != state.apex && *r.name() != ns)
            .filter_map(|r| ResourceRecord::from_record(r).unwrap())
            .map(|r| r.to_string())
            .collect();
        rendered.sort();
        rendered
    }

    /// Every record, including reserved ones
    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    /// Current SOA serial; bumped by every applied update
    pub fn serial(&self) -> u32 {
        self.state.lock().unwrap().serial
    }

    /// Number of update messages received
    pub fn updates_received(&self) -> usize {
        self.state.lock().unwrap().updates_received
    }

    /// Operation count of every update received, in arrival order
    pub fn update_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().update_sizes.clone()
    }

    /// Requests that carried no TSIG record
    pub fn unsigned_requests(&self) -> usize {
        self.state.lock().unwrap().unsigned_requests
    }

    /// Serve transfers without looking at their signature, as a server whose
    /// transfer ACL matches on address does. Updates are still authenticated.
    pub fn serve_transfers_by_address(&self) {
        self.state.lock().unwrap().check_transfer_signatures = false;
    }

    /// Switch behaviour between runs.
    pub fn set_behaviour(&self, behaviour: Behaviour) {
        self.state.lock().unwrap().behaviour = behaviour;
    }
}

/// Parse `"owner ttl TYPE rdata"` for the handful of types the tests seed.
fn parse_record(text: &str) -> Record {
    let fields: Vec<&str> = text.split_whitespace().collect();
    let owner = name(fields[0]);
    let ttl: u32 = fields[1].parse().unwrap();
    let rdata = match fields[2] {
        "A" => RData::A(A(fields[3].parse().unwrap())),
        "AAAA" => RData::AAAA(hickory_client::rr::rdata::AAAA(fields[3].parse().unwrap())),
        "CNAME" => RData::CNAME(hickory_client::rr::rdata::CNAME(name(fields[3]))),
        "TXT" => RData::TXT(hickory_client::rr::rdata::TXT::new(vec![fields[3].to_string()])),
        "PTR" => RData::PTR(hickory_client::rr::rdata::PTR(name(fields[3]))),
        other => panic!("unsupported seed type {other}"),
    };
    Record::from_rdata(owner, ttl, rdata)
}

/// Build a run configuration for `servers` from [`SCENARIO`] or another document.
pub fn config(yaml: &str, servers: &[String], key: Option<(&str, &str)>) -> Config {
    let mut config = Config::parse(yaml, "test.yml").unwrap();
    config.servers = servers.to_vec();
    config.timeout = Some(2);
    config.tsig = key.map(|(name, secret)| TsigKey {
        name: name.to_string(),
        algorithm: "hmac-sha256".to_string(),
        secret: secret.to_string(),
    });
    config.validate().unwrap();
    config
}

/// Scenario configuration signed with the key the server expects.
pub fn scenario_config(server: &TestServer) -> Config {
    config(SCENARIO, &[server.address()], Some((KEY_NAME, KEY_SECRET)))
}

async fn read_frame(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let len = socket.read_u16().await.ok()?;
    let mut buf = vec![0u8; usize::from(len)];
    socket.read_exact(&mut buf).await.ok()?;
    Some(buf)
}

async fn write_frame(socket: &mut TcpStream, message: &Message) {
    let wire = message.to_vec().unwrap();
    socket.write_u16(u16::try_from(wire.len()).unwrap()).await.unwrap();
    socket.write_all(&wire).await.unwrap();
}

fn response_to(request: &Message, code: ResponseCode) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_authoritative(true)
        .set_response_code(code);
    response.add_queries(request.queries().to_vec());
    response
}

async fn handle_connection(mut socket: TcpStream, state: Arc<Mutex<ZoneState>>) {
    while let Some(frame) = read_frame(&mut socket).await {
        let request = Message::from_vec(&frame).unwrap();
        match request.op_code() {
            OpCode::Update => {
                let Some(response) = apply_update(&request, &frame, &state) else {
                    if state.lock().unwrap().behaviour == Behaviour::StallUpdates {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                    return;
                };
                write_frame(&mut socket, &response).await;
            }
            _ => {
                for message in transfer(&request, &frame, &state) {
                    write_frame(&mut socket, &message).await;
                }
                if state.lock().unwrap().behaviour == Behaviour::TruncateTransfer {
                    return;
                }
            }
        }
    }
}

/// Whether `frame` carries a valid TSIG for the configured key. Without a key
/// every request is accepted.
fn authenticated(state: &ZoneState, frame: &[u8], request: &Message) -> bool {
    let Some(signer) = &state.signer else {
        return true;
    };
    !request.signature().is_empty() && signer.verify_message_byte(None, frame, true).is_ok()
}

fn transfer(request: &Message, frame: &[u8], state: &Arc<Mutex<ZoneState>>) -> Vec<Message> {
    let mut state = state.lock().unwrap();
    if request.signature().is_empty() {
        state.unsigned_requests += 1;
    }
    if state.check_transfer_signatures && !authenticated(&state, frame, request) {
        return vec![response_to(request, ResponseCode::NotAuth)];
    }
    let query_ok = request
        .queries()
        .first()
        .is_some_and(|q| q.query_type() == RecordType::AXFR && *q.name() == state.apex);
    if !query_ok {
        return vec![response_to(request, ResponseCode::NotImp)];
    }
    if state.behaviour == Behaviour::RefuseTransfer {
        return vec![response_to(request, ResponseCode::Refused)];
    }

    // First message: opening SOA and half the records; second: the rest and the closing SOA.
    let opening = soa(&state.apex, state.serial);
    let half = state.records.len() / 2;
    let mut first = response_to(request, ResponseCode::NoError);
    first.add_answer(opening.clone());
    first.add_answers(state.records[..half].iter().cloned());

    let mut second = response_to(request, ResponseCode::NoError);
    second.add_answers(state.records[half..].iter().cloned());
    if state.behaviour != Behaviour::TruncateTransfer {
        second.add_answer(opening);
    }
    vec![first, second]
}

/// Apply an update atomically. Returns `None` when the connection must be
/// closed without an answer.
fn apply_update(
    request: &Message,
    frame: &[u8],
    state: &Arc<Mutex<ZoneState>>,
) -> Option<Message> {
    let mut state = state.lock().unwrap();
    let index = state.updates_received;
    state.updates_received += 1;
    state.update_sizes.push(request.name_servers().len());

    match state.behaviour {
        Behaviour::StallUpdates | Behaviour::DropUpdates => return None,
        Behaviour::RejectFromUpdate(n) if index >= n => {
            return Some(response_to(request, ResponseCode::Refused));
        }
        _ => {}
    }

    let zone_ok = request
        .queries()
        .first()
        .is_some_and(|q| q.query_type() == RecordType::SOA && *q.name() == state.apex);
    if !zone_ok {
        return Some(response_to(request, ResponseCode::NotZone));
    }

    if !authenticated(&state, frame, request) {
        return Some(response_to(request, ResponseCode::NotAuth));
    }
    if request.signature().is_empty() {
        state.unsigned_requests += 1;
    }

    let mut records = state.records.clone();
    for rr in request.name_servers() {
        if !state.apex.zone_of(rr.name()) {
            return Some(response_to(request, ResponseCode::NotZone));
        }
        match rr.dns_class() {
            DNSClass::IN => add_record(&mut records, rr),
            DNSClass::NONE => records.retain(|existing| !same_rr(existing, rr)),
            DNSClass::ANY => records.retain(|existing| {
                existing.name() != rr.name()
                    || (rr.record_type() != RecordType::ANY
                        && existing.record_type() != rr.record_type())
            }),
            _ => return Some(response_to(request, ResponseCode::FormErr)),
        }
    }
    state.records = records;
    state.serial += 1;
    Some(response_to(request, ResponseCode::NoError))
}

/// RFC 2136 §3.4.2.2: CNAME conflicts are ignored, an existing RR gets its ttl
/// replaced, otherwise the RR is added.
fn add_record(records: &mut Vec<Record>, rr: &Record) {
    let at_name = |r: &&Record| r.name() == rr.name();
    let has_cname = records
        .iter()
        .filter(at_name)
        .any(|r| r.record_type() == RecordType::CNAME);
    let has_other = records
        .iter()
        .filter(at_name)
        .any(|r| r.record_type() != RecordType::CNAME);

    if rr.record_type() == RecordType::CNAME {
        if has_other {
            return;
        }
        records.retain(|r| !(r.name() == rr.name() && r.record_type() == RecordType::CNAME));
    } else if has_cname {
        return;
    }

    if let Some(existing) = records.iter_mut().find(|r| same_rr(r, rr)) {
        existing.set_ttl(rr.ttl());
    } else {
        records.push(rr.clone());
    }
}
