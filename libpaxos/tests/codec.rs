//! Submission framing checked with an independent msgpack reader.

use std::thread;

use libpaxos::{BlobEncoding, SUBMIT_TAG, SubmitEncoder, serialize_submit};

/// Read `[tag, blob]` with rmp's decoder and return the tag, the length
/// prefix and the remaining bytes.
fn read_envelope(buf: &[u8], blob: BlobEncoding) -> (i32, u32, &[u8]) {
    let mut rd = buf;
    assert_eq!(rmp::decode::read_array_len(&mut rd).expect("array"), 2);
    let tag: i32 = rmp::decode::read_int(&mut rd).expect("tag");
    let len = match blob {
        BlobEncoding::Bin => rmp::decode::read_bin_len(&mut rd).expect("bin"),
        BlobEncoding::Raw => rmp::decode::read_str_len(&mut rd).expect("raw"),
    };
    (tag, len, rd)
}

#[test]
fn test_hello_scenario() {
    let mut buf = Vec::new();
    serialize_submit(b"hello", &mut buf).expect("encode");
    assert_eq!(buf, [0x92, 0x08, 0xc4, 0x05, b'h', b'e', b'l', b'l', b'o']);

    let legacy = SubmitEncoder::legacy()
        .encode_to_vec(b"hello")
        .expect("encode");
    assert_eq!(legacy, [0x92, 0x08, 0xa5, b'h', b'e', b'l', b'l', b'o']);
}

#[test]
fn test_envelope_readable_by_generic_decoder() {
    let values: Vec<Vec<u8>> = vec![
        Vec::new(),
        b"x".to_vec(),
        vec![0xff; 31],
        vec![0x00; 32],
        (0..=255u8).collect(),
        vec![0xab; 70_000],
    ];

    for blob in [BlobEncoding::Bin, BlobEncoding::Raw] {
        let encoder = SubmitEncoder::new(blob);
        for value in &values {
            let buf = encoder.encode_to_vec(value).expect("encode");
            let (tag, len, rest) = read_envelope(&buf, blob);

            assert_eq!(tag, SUBMIT_TAG);
            assert_eq!(len as usize, value.len(), "{blob:?}");
            assert_eq!(rest, value.as_slice(), "{blob:?}");
        }
    }
}

#[test]
fn test_encoder_is_reentrant_across_threads() {
    let expected = SubmitEncoder::default()
        .encode_to_vec(b"shared value")
        .expect("encode");

    let workers: Vec<_> = (0..4)
        .map(|_| {
            thread::spawn(|| {
                (0..100)
                    .map(|_| {
                        let mut buf = Vec::new();
                        serialize_submit(b"shared value", &mut buf).expect("encode");
                        buf
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for worker in workers {
        for buf in worker.join().expect("worker") {
            assert_eq!(buf, expected);
        }
    }
}
