//! Writer/Reader roundtrip matrix for the buffers crate.

use proptest::prelude::*;
use slicewire_buffers::{BufferError, Reader, Writer};

// ---------------------------------------------------------------------------
// Writer/Reader roundtrip matrix
// ---------------------------------------------------------------------------

#[test]
fn roundtrip_integers_at_their_bounds() {
    let mut w = Writer::new();
    w.u8(u8::MAX);
    w.i8(i8::MIN);
    w.u16(u16::MAX);
    w.i16(i16::MIN);
    w.u32(u32::MAX);
    w.i32(i32::MIN);
    w.i64(i64::MIN);
    let data = w.flush();
    assert_eq!(data.len(), 1 + 1 + 2 + 2 + 4 + 4 + 8);

    let mut r = Reader::new(&data);
    assert_eq!(r.u8(), Ok(u8::MAX));
    assert_eq!(r.i8(), Ok(i8::MIN));
    assert_eq!(r.u16(), Ok(u16::MAX));
    assert_eq!(r.i16(), Ok(i16::MIN));
    assert_eq!(r.u32(), Ok(u32::MAX));
    assert_eq!(r.i32(), Ok(i32::MIN));
    assert_eq!(r.i64(), Ok(i64::MIN));
    assert_eq!(r.size(), 0);
}

#[test]
fn integers_are_little_endian() {
    let mut w = Writer::new();
    w.i32(0x0102_0304);
    w.u16(0xbeef);
    assert_eq!(w.as_slice(), &[0x04, 0x03, 0x02, 0x01, 0xef, 0xbe]);
}

#[test]
fn roundtrip_floats() {
    let mut w = Writer::new();
    w.f32(1.5);
    w.f64(-0.25);
    w.f64(f64::INFINITY);
    let data = w.flush();
    let mut r = Reader::new(&data);
    assert_eq!(r.f32(), Ok(1.5));
    assert_eq!(r.f64(), Ok(-0.25));
    assert_eq!(r.f64(), Ok(f64::INFINITY));
}

#[test]
fn roundtrip_utf8() {
    let mut w = Writer::new();
    w.utf8("héllo");
    let data = w.into_vec();
    assert_eq!(data.len(), 6);
    assert_eq!(Reader::new(&data).utf8(6), Ok("héllo"));
    // cut inside the two-byte é
    assert_eq!(Reader::new(&data).utf8(2), Err(BufferError::InvalidUtf8));
}

#[test]
fn peek_does_not_advance() {
    let data = [9, 8];
    let mut r = Reader::new(&data);
    assert_eq!(r.peek(), Ok(9));
    assert_eq!(r.u8(), Ok(9));
    assert_eq!(r.peek(), Ok(8));
}

#[test]
fn every_read_fails_cleanly_at_the_end() {
    let empty: [u8; 0] = [];
    let mut r = Reader::new(&empty);
    assert_eq!(r.peek(), Err(BufferError::EndOfBuffer));
    assert_eq!(r.u8(), Err(BufferError::EndOfBuffer));
    assert_eq!(r.i16(), Err(BufferError::EndOfBuffer));
    assert_eq!(r.i64(), Err(BufferError::EndOfBuffer));
    assert_eq!(r.f64(), Err(BufferError::EndOfBuffer));
    assert!(r.buf(1).is_err());
    assert!(r.utf8(1).is_err());
    assert_eq!(r.skip(0), Ok(()));
}

#[test]
fn from_slice_bounds_reads_to_the_window() {
    let data = [1, 2, 3, 4, 5, 6];
    let mut r = Reader::from_slice(&data, 2, 4);
    assert_eq!(r.buf(2), Ok(&[3, 4][..]));
    assert!(r.u8().is_err());

    // an end beyond the data is clamped
    let r = Reader::from_slice(&data, 5, 100);
    assert_eq!(r.size(), 1);
}

// ---------------------------------------------------------------------------
// Back-patching
// ---------------------------------------------------------------------------

#[test]
fn length_placeholder_is_filled_after_the_body() {
    let mut w = Writer::with_alloc_size(1);
    let at = w.pos();
    w.i32(0);
    w.u8(0);
    w.utf8("body");
    let body = w.pos() - at - 4;
    w.rewrite_i32_at(at, body as i32).unwrap();
    w.rewrite_u8_at(at + 4, 0x20).unwrap();
    assert_eq!(w.as_slice(), &[5, 0, 0, 0, 0x20, b'b', b'o', b'd', b'y']);
}

#[test]
fn set_pos_truncates_but_never_extends() {
    let mut w = Writer::new();
    w.i32(7);
    assert_eq!(w.set_pos(5), Err(BufferError::Overflow));
    w.set_pos(1).unwrap();
    w.u8(0xaa);
    assert_eq!(w.as_slice(), &[7, 0xaa]);
    w.reset();
    assert!(w.as_slice().is_empty());
}

proptest! {
    #[test]
    fn arbitrary_sequences_roundtrip(values in prop::collection::vec(any::<i64>(), 0..64)) {
        let mut w = Writer::with_alloc_size(3);
        for v in &values {
            w.i64(*v);
        }
        let data = w.into_vec();
        prop_assert_eq!(data.len(), values.len() * 8);
        let mut r = Reader::new(&data);
        for v in &values {
            prop_assert_eq!(r.i64().unwrap(), *v);
        }
        prop_assert_eq!(r.size(), 0);
    }

    #[test]
    fn strings_roundtrip(s in ".{0,64}") {
        let mut w = Writer::new();
        w.utf8(&s);
        let data = w.flush();
        prop_assert_eq!(Reader::new(&data).utf8(data.len()).unwrap(), s.as_str());
    }
}
