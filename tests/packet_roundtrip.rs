//! End-to-end packet codec checks.

use kestrel::encoding::Encoding;
use kestrel::packet::{Packet, PacketReader, PacketView};

#[test]
fn test_mixed_write_read_roundtrip() {
    let mut p = Packet::new();
    p.write_u8(0x12).unwrap();
    p.write_u16_be(0x3456).unwrap();
    p.write_u32_le(0x9ABCDEF0).unwrap();
    p.write_string16_le(Encoding::Cp932, "日本語", false).unwrap();

    p.rewind();

    assert_eq!(p.read_u8().unwrap(), 0x12);
    assert_eq!(p.read_u16_be().unwrap(), 0x3456);
    assert_eq!(p.read_u32_le().unwrap(), 0x9ABCDEF0);
    assert_eq!(p.read_string16_le(Encoding::Cp932, false).unwrap(), "日本語");
    assert_eq!(p.tell(), p.size());
}

#[test]
fn test_writes_advance_position_exactly() {
    let mut p = Packet::new();

    let steps: [(u32, Box<dyn Fn(&mut Packet)>); 4] = [
        (1, Box::new(|p| p.write_u8(1).unwrap())),
        (2, Box::new(|p| p.write_i16_le(-2).unwrap())),
        (4, Box::new(|p| p.write_f32(0.5).unwrap())),
        (8, Box::new(|p| p.write_u64_be(9).unwrap())),
    ];

    let mut expected = 0u32;
    for (width, write) in steps {
        let before = p.tell();
        write(&mut p);
        expected += width;
        assert_eq!(p.tell(), before + width);
        assert!(p.size() >= p.tell());
    }
    assert_eq!(p.size(), expected);
}

#[test]
fn test_view_share_after_frame_split() {
    // Mimic the inner-command carve-out: one buffer, several views.
    let mut p = Packet::new();
    p.write_array(b"HEADERpayload-one!payload-two").unwrap();
    let view: PacketView = p.into();

    let one = view.view(6, 12).unwrap();
    let two = view.view(18, 11).unwrap();
    assert_eq!(one.to_vec(), b"payload-one!");
    assert_eq!(two.to_vec(), b"payload-two");

    // Dropping the parent view keeps the storage alive for the children.
    drop(view);
    assert_eq!(one.to_vec(), b"payload-one!");
}

#[test]
fn test_string_null_policy() {
    let mut p = Packet::new();
    p.write_string32_be(Encoding::Cp1252, "café", true).unwrap();
    p.rewind();

    // Without trimming the NUL stays and breaks decoding expectations, so
    // the reader trims on request.
    let len = p.peek_u32_be().unwrap();
    assert_eq!(len, 5);
    assert_eq!(p.read_string32_be(Encoding::Cp1252, true).unwrap(), "café");
}

#[test]
fn test_compress_decompress_at_cursor() {
    let mut p = Packet::new();
    p.write_u32_be(0xAABBCCDD).unwrap();
    let body: Vec<u8> = (0..1024u32).map(|i| (i % 7) as u8).collect();
    p.write_array(&body).unwrap();

    p.seek(4).unwrap();
    let compressed = p.compress(1024);
    assert!(compressed > 0);
    assert_eq!(p.tell(), 4);

    let restored = p.decompress(compressed);
    assert_eq!(restored, 1024);

    p.rewind();
    assert_eq!(p.read_u32_be().unwrap(), 0xAABBCCDD);
    assert_eq!(p.read_array(1024).unwrap(), body);
}
