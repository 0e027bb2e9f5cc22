//! Tests for the Replication Wire Protocol
//!
//! These tests verify:
//! - Several frames written back to back read back in order
//! - Malformed SUBSCRIBE and TRANSACTION_GROUP payloads are rejected
//! - A stream cut mid-frame surfaces as an I/O error

use std::io::Cursor;

use tickstore::replication::{read_frame, write_frame, Frame, FrameKind};
use tickstore::StoreError;

use super::empty_tg;

#[test]
fn test_frames_stream_in_order() {
    let frames = vec![
        Frame::Subscribe { resume_after: Some(99) },
        Frame::TransactionGroup(empty_tg(100)),
        Frame::Heartbeat,
        Frame::TransactionGroup(empty_tg(101)),
    ];
    let mut wire = Vec::new();
    for frame in &frames {
        write_frame(&mut wire, frame).unwrap();
    }

    let mut reader = Cursor::new(wire);
    for frame in &frames {
        assert_eq!(&read_frame(&mut reader).unwrap(), frame);
    }
    assert!(read_frame(&mut reader).is_err());
}

#[test]
fn test_subscribe_without_resume_is_header_only() {
    let mut wire = Vec::new();
    write_frame(&mut wire, &Frame::Subscribe { resume_after: None }).unwrap();
    assert_eq!(wire, vec![FrameKind::Subscribe as u8, 0, 0, 0, 0]);
}

#[test]
fn test_subscribe_with_odd_payload_is_rejected() {
    let wire = vec![FrameKind::Subscribe as u8, 0, 0, 0, 3, 1, 2, 3];
    let err = read_frame(&mut Cursor::new(wire)).unwrap_err();
    assert!(matches!(err, StoreError::Protocol(_)));
}

#[test]
fn test_empty_transaction_group_frame_is_rejected() {
    let wire = vec![FrameKind::TransactionGroup as u8, 0, 0, 0, 0];
    let err = read_frame(&mut Cursor::new(wire)).unwrap_err();
    assert!(matches!(err, StoreError::Protocol(_)));
}

#[test]
fn test_cut_frame_is_io_error() {
    let mut wire = Vec::new();
    write_frame(&mut wire, &Frame::TransactionGroup(empty_tg(7))).unwrap();
    wire.truncate(wire.len() - 3);
    let err = read_frame(&mut Cursor::new(wire)).unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
}
