//! Request/response payload shape tests, independent of any socket.

use relay_core::wire::{self, Header};

#[test]
fn connect_success_payload_round_trips() {
    let mut w = wire::FrameWriter::new();
    w.write_u16(7);
    w.write_str_remainder("Lacewing Relay Server (revision 2)");
    let payload = w.finish();

    let mut r = wire::FrameReader::new(&payload);
    assert_eq!(r.read_u16(), 7);
    assert_eq!(r.read_str_remainder(), "Lacewing Relay Server (revision 2)");
    assert!(!r.failed());
}

#[test]
fn join_channel_existing_response_round_trips_member_list() {
    let mut w = wire::FrameWriter::new();
    w.write_u8(0); // not master
    w.write_str_1b("room");
    w.write_u16(3); // channel id
    w.write_u16(1); // member id
    w.write_u8(1); // member is master
    w.write_str_1b("A");
    let payload = w.finish();

    let mut r = wire::FrameReader::new(&payload);
    assert_eq!(r.read_u8(), 0);
    assert_eq!(r.read_str_1b(), "room");
    assert_eq!(r.read_u16(), 3);
    assert_eq!(r.read_u16(), 1);
    assert_eq!(r.read_u8(), 1);
    assert_eq!(r.read_str_1b(), "A");
    assert!(!r.failed());
}

#[test]
fn join_channel_failure_payload_carries_name_then_reason() {
    let mut w = wire::FrameWriter::new();
    w.write_str_1b("taken");
    w.write_str_remainder("Join denied");
    let payload = w.finish();

    let mut r = wire::FrameReader::new(&payload);
    assert_eq!(r.read_str_1b(), "taken");
    assert_eq!(r.read_str_remainder(), "Join denied");
}

#[test]
fn binary_channel_message_outbound_payload_prepends_sender_id() {
    let mut w = wire::FrameWriter::new();
    w.write_u8(9); // subchannel
    w.write_u16(42); // channel id
    w.write_u16(5); // sender id
    w.write_bytes(b"hello");
    let payload = w.finish();

    let header = Header::new(wire::msg_type::CHANNEL_MESSAGE, 2);
    let framed = wire::encode_stream_frame(header, false, &payload);
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&framed[..4]);
    let (blasted, len) = wire::decode_stream_length_prefix(prefix);
    assert!(!blasted);
    assert_eq!(len, 1 + payload.len());

    let (decoded_header, body) = wire::split_frame_body(&framed[4..]).unwrap();
    assert_eq!(decoded_header, header);
    let mut r = wire::FrameReader::new(body);
    assert_eq!(r.read_u8(), 9);
    assert_eq!(r.read_u16(), 42);
    assert_eq!(r.read_u16(), 5);
    assert_eq!(r.read_bytes_remainder(), &b"hello"[..]);
}

#[test]
fn channel_list_entries_round_trip() {
    let mut w = wire::FrameWriter::new();
    w.write_u16(2);
    w.write_str_1b("alpha");
    w.write_u16(0);
    w.write_str_1b("beta");
    let payload = w.finish();

    let mut r = wire::FrameReader::new(&payload);
    assert_eq!(r.read_u16(), 2);
    assert_eq!(r.read_str_1b(), "alpha");
    assert_eq!(r.read_u16(), 0);
    assert_eq!(r.read_str_1b(), "beta");
    assert!(!r.failed());
}
