mod common;
use common::*;

use solax_bridge::prelude::*;
use solax_bridge::solax::packet::{Discovery, QueryStatus, RegisterAddress, Request};

const MINI_BUS: &str = r#"
buses:
  - name: roof
    port: /dev/null
    protocol: solax_mini
    devices:
      - name: garage
        kind: x1_mini
        address: 0x0A
"#;

const STATUS_52: &str = "AA.55.00.0A.01.00.11.82.34.00.1A.00.02.00.00.00.00.00.00.00.00.00.00.09.21.13.87.00.00.FF.FF.00.00.00.12.00.00.00.15.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.04.D6";
const STATUS_50: &str = "AA.55.00.0A.01.00.11.82.32.00.21.00.02.07.EC.00.00.00.1D.00.00.00.18.09.55.13.80.02.2B.FF.FF.00.00.5D.AF.00.00.10.50.00.02.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.07.A4";
const STATUS_56: &str = "AA.55.00.0A.01.00.11.82.38.00.1A.00.03.04.0C.00.00.00.19.00.00.00.0B.08.FC.13.8A.00.F8.FF.FF.00.00.00.2B.00.00.00.0D.00.02.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.00.8A.00.DE.08.5F";

/// Runs the start-up discovery tick and throws away its output.
fn started(yaml: &str) -> Harness {
    let mut h = Harness::new(yaml).unwrap();
    h.tick();
    h.bus().take_written();
    h.published();
    h
}

fn feed(h: &mut Harness, bytes: &[u8]) -> Vec<mqtt::Message> {
    h.bus().inject(bytes);
    h.tick();
    h.published()
}

#[test]
fn decodes_52_byte_status_report() {
    let mut h = started(MINI_BUS);
    let m = feed(&mut h, &from_hex_dump(STATUS_52));

    assert_eq!(last_payload(&m, "garage/temperature").as_deref(), Some("26"));
    assert_eq!(last_payload(&m, "garage/energy_today").as_deref(), Some("0.2"));
    assert_eq!(last_payload(&m, "garage/ac_voltage").as_deref(), Some("233.7"));
    assert_eq!(last_payload(&m, "garage/ac_frequency").as_deref(), Some("49.99"));
    assert_eq!(last_payload(&m, "garage/ac_power").as_deref(), Some("0"));
    assert_eq!(last_payload(&m, "garage/energy_total").as_deref(), Some("1.8"));
    assert_eq!(last_payload(&m, "garage/runtime_total").as_deref(), Some("21"));
    assert_eq!(last_payload(&m, "garage/mode").as_deref(), Some("0"));
    assert_eq!(last_payload(&m, "garage/mode_name").as_deref(), Some("Wait"));
    assert_eq!(last_payload(&m, "garage/error_bits").as_deref(), Some("0"));

    assert_eq!(h.coordinator.stats()[0].1.frames_received, 1);
}

#[test]
fn decodes_50_byte_status_report() {
    let mut h = started(MINI_BUS);
    let m = feed(&mut h, &from_hex_dump(STATUS_50));

    assert_eq!(last_payload(&m, "garage/temperature").as_deref(), Some("33"));
    assert_eq!(last_payload(&m, "garage/dc1_voltage").as_deref(), Some("202.8"));
    assert_eq!(last_payload(&m, "garage/dc1_current").as_deref(), Some("2.9"));
    assert_eq!(last_payload(&m, "garage/ac_current").as_deref(), Some("2.4"));
    assert_eq!(last_payload(&m, "garage/ac_voltage").as_deref(), Some("238.9"));
    assert_eq!(last_payload(&m, "garage/ac_frequency").as_deref(), Some("49.92"));
    assert_eq!(last_payload(&m, "garage/ac_power").as_deref(), Some("555"));
    assert_eq!(last_payload(&m, "garage/energy_total").as_deref(), Some("2398.3"));
    assert_eq!(last_payload(&m, "garage/runtime_total").as_deref(), Some("4176"));
    assert_eq!(last_payload(&m, "garage/mode_name").as_deref(), Some("Normal"));
}

#[test]
fn decodes_56_byte_status_report() {
    let mut h = started(MINI_BUS);
    let m = feed(&mut h, &from_hex_dump(STATUS_56));

    assert_eq!(last_payload(&m, "garage/dc1_voltage").as_deref(), Some("103.6"));
    assert_eq!(last_payload(&m, "garage/ac_voltage").as_deref(), Some("230"));
    assert_eq!(last_payload(&m, "garage/ac_frequency").as_deref(), Some("50.02"));
    assert_eq!(last_payload(&m, "garage/ac_power").as_deref(), Some("248"));
    assert_eq!(last_payload(&m, "garage/energy_total").as_deref(), Some("4.3"));
    assert_eq!(last_payload(&m, "garage/runtime_total").as_deref(), Some("13"));
    assert_eq!(last_payload(&m, "garage/mode_name").as_deref(), Some("Normal"));
}

#[test]
fn classic_bus_rejects_mini_only_lengths() {
    let mut h = started(
        r#"
buses:
  - name: roof
    port: /dev/null
    protocol: solax_classic
    devices:
      - name: shed
        kind: x1
"#,
    );

    let m = feed(&mut h, &from_hex_dump(STATUS_50));
    assert!(m.is_empty());

    let m = feed(&mut h, &from_hex_dump(STATUS_52));
    assert_eq!(last_payload(&m, "shed/ac_voltage").as_deref(), Some("233.7"));
}

#[test]
fn all_zero_status_report() {
    let mut h = started(MINI_BUS);
    let m = feed(&mut h, &inverter_reply(0x0A, 0x11, 0x82, vec![0; 52]));

    assert_eq!(last_payload(&m, "garage/temperature").as_deref(), Some("0"));
    assert_eq!(last_payload(&m, "garage/ac_voltage").as_deref(), Some("0"));
    assert_eq!(last_payload(&m, "garage/mode").as_deref(), Some("0"));
    assert_eq!(last_payload(&m, "garage/mode_name").as_deref(), Some("Wait"));
    assert_eq!(last_payload(&m, "garage/error_bits").as_deref(), Some("0"));
    // zero totals are held back
    assert_eq!(count_topic(&m, "garage/energy_total"), 0);
    assert_eq!(count_topic(&m, "garage/runtime_total"), 0);
}

#[test]
fn zero_energy_total_never_overwrites() {
    let mut h = started(MINI_BUS);

    let m = feed(&mut h, &inverter_reply(0x0A, 0x11, 0x82, status_payload(12345, 99, 2)));
    assert_eq!(last_payload(&m, "garage/energy_total").as_deref(), Some("1234.5"));

    let m = feed(&mut h, &inverter_reply(0x0A, 0x11, 0x82, status_payload(0, 0, 2)));
    assert_eq!(count_topic(&m, "garage/energy_total"), 0);
    assert_eq!(count_topic(&m, "garage/runtime_total"), 0);
    assert_eq!(last_payload(&m, "garage/ac_voltage").as_deref(), Some("230"));
}

#[test]
fn error_bits_are_little_endian() {
    let mut h = started(MINI_BUS);
    let mut data = status_payload(1, 1, 3);
    data[46..50].copy_from_slice(&[0x02, 0x00, 0x00, 0x00]);

    let m = feed(&mut h, &inverter_reply(0x0A, 0x11, 0x82, data));
    assert_eq!(last_payload(&m, "garage/error_bits").as_deref(), Some("2"));
    assert_eq!(last_payload(&m, "garage/errors").as_deref(), Some("Grid Lost Fault"));
    assert_eq!(last_payload(&m, "garage/mode_name").as_deref(), Some("Fault"));
}

#[test]
fn checksum_failure_is_dropped_and_counted() {
    let mut h = started(MINI_BUS);
    let mut bytes = from_hex_dump(STATUS_52);
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    let m = feed(&mut h, &bytes);
    assert!(m.is_empty());
    assert_eq!(h.coordinator.stats()[0].1.checksum_failures, 1);

    // the next good frame goes through
    let m = feed(&mut h, &from_hex_dump(STATUS_52));
    assert_eq!(last_payload(&m, "garage/temperature").as_deref(), Some("26"));
}

#[test]
fn silence_mid_frame_resyncs() {
    let mut h = started(MINI_BUS);
    let bytes = from_hex_dump(STATUS_52);

    h.bus().inject(&bytes[..20]);
    h.tick();
    h.clock.advance(51);

    let m = feed(&mut h, &bytes);
    assert_eq!(last_payload(&m, "garage/temperature").as_deref(), Some("26"));

    let stats = &h.coordinator.stats()[0].1;
    assert_eq!(stats.resyncs, 1);
    assert_eq!(stats.frames_received, 1);
}

#[test]
fn status_report_resets_liveness() {
    let mut h = started(MINI_BUS);

    for _ in 0..4 {
        h.advance(30_000);
    }
    feed(&mut h, &from_hex_dump(STATUS_52));

    // four more silent polls still do not trigger discovery
    let query = Request::from(QueryStatus { address: 0x0A }).bytes();
    for _ in 0..5 {
        h.advance(30_000);
        assert_eq!(h.bus().take_written().last(), Some(&query));
    }
}

#[test]
fn five_silent_polls_then_rediscovery() {
    let mut h = Harness::new(MINI_BUS).unwrap();
    let discovery = Request::from(Discovery).bytes();
    let query = Request::from(QueryStatus { address: 0x0A }).bytes();

    // a fresh device starts out offline
    h.tick();
    assert_eq!(h.bus().take_written(), vec![discovery.clone()]);
    let m = h.published();
    assert_eq!(last_payload(&m, "garage/mode").as_deref(), Some("-1"));
    assert_eq!(last_payload(&m, "garage/mode_name").as_deref(), Some("Offline"));

    for _ in 0..5 {
        h.advance(30_000);
        assert_eq!(h.bus().take_written(), vec![query.clone()]);
    }
    assert!(h.published().is_empty());

    h.advance(30_000);
    assert_eq!(h.bus().take_written(), vec![discovery]);

    let m = h.published();
    assert_eq!(count_topic(&m, "garage/mode"), 1);
    assert_eq!(last_payload(&m, "garage/mode").as_deref(), Some("-1"));
    assert_eq!(last_payload(&m, "garage/mode_name").as_deref(), Some("Offline"));
    assert_eq!(last_payload(&m, "garage/temperature").as_deref(), Some("NaN"));
    assert_eq!(last_payload(&m, "garage/ac_voltage").as_deref(), Some("NaN"));
    assert_eq!(last_payload(&m, "garage/ac_frequency").as_deref(), Some("NaN"));
    assert_eq!(last_payload(&m, "garage/gfc_fault").as_deref(), Some("NaN"));
    assert_eq!(last_payload(&m, "garage/dc1_voltage").as_deref(), Some("0"));
    assert_eq!(last_payload(&m, "garage/ac_power").as_deref(), Some("0"));

    // polling resumes straight after
    h.advance(30_000);
    assert_eq!(h.bus().take_written(), vec![query]);
}

#[test]
fn duplicate_addresses_both_receive() {
    let mut h = started(
        r#"
buses:
  - name: roof
    port: /dev/null
    protocol: solax_mini
    devices:
      - name: east
        kind: x1_mini
        address: 10
      - name: west
        kind: x1_mini
        address: "0x0A"
"#,
    );

    let m = feed(&mut h, &from_hex_dump(STATUS_52));
    assert_eq!(last_payload(&m, "east/temperature").as_deref(), Some("26"));
    assert_eq!(last_payload(&m, "west/temperature").as_deref(), Some("26"));
}

#[test]
fn broadcast_source_never_routed() {
    let mut h = started(
        r#"
buses:
  - name: roof
    port: /dev/null
    protocol: solax_mini
    devices:
      - name: odd
        kind: x1_mini
        address: 0xFF
"#,
    );

    let m = feed(&mut h, &inverter_reply(0xFF, 0x11, 0x82, vec![0; 52]));
    assert!(m.is_empty());
    assert!(h.bus().take_written().is_empty());
}

#[test]
fn discovery_reply_assigns_configured_address() {
    let mut h = started(
        r#"
buses:
  - name: roof
    port: /dev/null
    protocol: solax_mini
    devices:
      - name: garage
        kind: x1_mini
        address: 0x0B
        serial_number: XM3A12345678AB
"#,
    );
    let serial = SerialNumber::from_str("XM3A12345678AB").unwrap();

    feed(&mut h, &inverter_reply(0xFF, 0x10, 0x80, serial.to_vec()));
    assert_eq!(
        h.bus().take_written(),
        vec![Request::from(RegisterAddress {
            serial_number: serial,
            address: 0x0B
        })
        .bytes()]
    );
    assert_eq!(h.coordinator.stats()[0].1.discovery_replies, 1);
}

#[test]
fn unknown_serial_gets_default_address() {
    let mut h = started(MINI_BUS);
    let serial = SerialNumber::from_str("ZZZZ00000000ZZ").unwrap();

    feed(&mut h, &inverter_reply(0xFF, 0x10, 0x80, serial.to_vec()));
    assert_eq!(
        h.bus().take_written(),
        vec![Request::from(RegisterAddress {
            serial_number: serial,
            address: 0x0A
        })
        .bytes()]
    );
}

#[test]
fn unknown_address_is_counted() {
    let mut h = started(MINI_BUS);
    let m = feed(&mut h, &inverter_reply(0x0C, 0x11, 0x82, vec![0; 52]));
    assert!(m.is_empty());
    assert_eq!(h.coordinator.stats()[0].1.unknown_address, 1);
}

#[test]
fn unhandled_control_code_not_delivered() {
    let mut h = started(MINI_BUS);
    let m = feed(&mut h, &inverter_reply(0x0A, 0x10, 0x82, vec![0; 52]));
    assert!(m.is_empty());
}

#[test]
fn bad_length_does_not_reset_liveness() {
    let mut h = Harness::new(MINI_BUS).unwrap();
    h.tick();
    for _ in 0..5 {
        h.advance(30_000);
    }
    // 51 bytes is not a valid status report
    feed(&mut h, &inverter_reply(0x0A, 0x11, 0x82, vec![0; 51]));
    h.bus().take_written();

    h.advance(30_000);
    assert_eq!(h.bus().take_written(), vec![Request::from(Discovery).bytes()]);
}

#[test]
fn read_info_command_queries_and_publishes() -> Result<()> {
    let mut h = started(MINI_BUS);

    h.command("cmd/garage/read/info", "")?;
    assert_eq!(
        h.bus().take_written(),
        vec![Request::from(solax_bridge::solax::packet::QueryInfo { address: 0x0A }).bytes()]
    );
    let m = h.published();
    assert_eq!(last_payload(&m, "result/garage/read/info").as_deref(), Some("OK"));

    let mut info = Vec::new();
    info.push(1);
    info.extend_from_slice(b"000600");
    info.extend_from_slice(b"1.0.0");
    info.extend_from_slice(b"X1-Mini-0.6   ");
    info.extend_from_slice(b"SolaxPower    ");
    info.extend_from_slice(b"XM3A12345678AB");
    info.extend_from_slice(b"0360");

    let m = feed(&mut h, &inverter_reply(0x0A, 0x11, 0x83, info));
    let json = last_payload(&m, "garage/info").unwrap();
    let value: serde_json::Value = serde_json::from_str(&json)?;
    assert_eq!(value["module_name"], "X1-Mini-0.6");
    assert_eq!(value["serial_number"], "XM3A12345678AB");

    Ok(())
}

#[test]
fn sensor_subset_limits_topics() {
    let mut h = started(
        r#"
buses:
  - name: roof
    port: /dev/null
    protocol: solax_mini
    devices:
      - name: garage
        kind: x1_mini
        sensors: [ac_power, mode_name]
"#,
    );

    let m = feed(&mut h, &from_hex_dump(STATUS_50));
    let mut topics: Vec<&str> = m.iter().map(|m| m.topic.as_str()).collect();
    topics.sort();
    assert_eq!(topics, vec!["garage/ac_power", "garage/mode_name"]);
}
