use super::*;

#[derive(Debug)]
struct Point {
    x: f64,
    y: f64,
    label: String,
}

impl WireEncode for Point {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_f64(self.x)?;
        w.write_f64(self.y)?;
        w.write_string(&self.label)
    }
}

impl WireDecode for Point {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Point { x: r.read_f64()?, y: r.read_f64()?, label: r.read_string()? })
    }
}

#[test]
fn test_buffer_roundtrip_primitives() {
    let mut buf = BufferTransport::new();
    buf.write_bool(true).unwrap();
    buf.write_i32(-7).unwrap();
    buf.write_u32(42).unwrap();
    buf.write_f32(1.5).unwrap();
    buf.write_f64(2.5).unwrap();
    buf.write_string("hi").unwrap();

    let mut buf = BufferTransport::from_bytes(buf.into_bytes());
    assert!(buf.read_bool().unwrap());
    assert_eq!(buf.read_i32().unwrap(), -7);
    assert_eq!(buf.read_u32().unwrap(), 42);
    assert_eq!(buf.read_f32().unwrap(), 1.5);
    assert_eq!(buf.read_f64().unwrap(), 2.5);
    assert_eq!(buf.read_string().unwrap(), "hi");
}

#[test]
fn test_vec_roundtrip() {
    let points = vec![
        Point { x: 1.0, y: 2.0, label: "a".to_string() },
        Point { x: 3.0, y: 4.0, label: "bb".to_string() },
    ];
    let mut buf = BufferTransport::new();
    write_vec(&mut buf, &points).unwrap();

    let mut buf = BufferTransport::from_bytes(buf.into_bytes());
    let decoded: Vec<Point> = read_vec(&mut buf, None).unwrap();
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[1].label, "bb");
}

#[test]
fn test_decode_length_mismatch_errors() {
    let points = vec![Point { x: 1.0, y: 2.0, label: "a".to_string() }];
    let mut buf = BufferTransport::new();
    write_vec(&mut buf, &points).unwrap();
    let mut buf = BufferTransport::from_bytes(buf.into_bytes());
    let err = read_vec::<_, Point>(&mut buf, Some(2)).unwrap_err();
    assert!(matches!(err, CodecError::DecodeLength { expected: 2, actual: 1 }));
}

#[test]
fn test_complex_array_roundtrip() {
    let raw = vec![(1.0f32, 2.0f32), (3.0, 4.0), (5.0, 6.0)];
    let mut buf = BufferTransport::new();
    write_complex_array(&mut buf, &raw).unwrap();
    let mut buf = BufferTransport::from_bytes(buf.into_bytes());
    let decoded = read_complex_array(&mut buf, 3).unwrap();
    assert_eq!(decoded, raw);
}

#[test]
fn test_message_framing_roundtrip() {
    let payload = b"hello wire protocol".to_vec();
    let mut buf = BufferTransport::new();
    write_message(&mut buf, &payload).unwrap();
    assert_eq!(buf.buf.len(), 8 + payload.len());

    let len = byteorder::LittleEndian::read_u64(&buf.buf[0..8]) as usize;
    assert_eq!(len, payload.len());
    assert_eq!(&buf.buf[8..], &payload[..]);
}

#[test]
fn test_file_transport_roundtrip() {
    let dir = tempdir::TempDir::new("codec-test").unwrap();
    let path = dir.path().join("snap.bin");

    {
        let mut f = FileTransport::create(&path).unwrap();
        f.write_u32(7).unwrap();
        f.write_f64(3.25).unwrap();
        f.flush().unwrap();
    }

    let mut f = FileTransport::open(&path).unwrap();
    assert_eq!(f.read_u32().unwrap(), 7);
    assert_eq!(f.read_f64().unwrap(), 3.25);
}
