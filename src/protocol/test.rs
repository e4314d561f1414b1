use super::*;
use crate::codec::BufferTransport;
use crate::options::{AveragingMethod, IfOptions};

fn sample_options() -> OptionsSet {
    OptionsSet {
        phase_in_degrees: false,
        include_flagged: false,
        applicable_to_any: false,
        reverse_online: false,
        apply_computed: false,
        ifs: vec![IfOptions {
            centre_freq_hz: 2.1e9,
            bandwidth_hz: 128e6,
            num_channels: 2049,
            min_tvchannel: 100,
            max_tvchannel: 1900,
            delay_averaging: 1,
            averaging: AveragingMethod::ScalarMean,
            modifiers: vec![],
        }],
    }
}

fn roundtrip_request(req: Request) -> Request {
    let mut buf = BufferTransport::new();
    req.encode(&mut buf).unwrap();
    let mut buf = BufferTransport::from_bytes(buf.into_bytes());
    Request::decode(&mut buf).unwrap()
}

fn roundtrip_response(resp: Response) -> Response {
    let mut buf = BufferTransport::new();
    resp.encode(&mut buf).unwrap();
    let mut buf = BufferTransport::from_bytes(buf.into_bytes());
    Response::decode(&mut buf).unwrap()
}

#[test]
fn test_compute_visdata_request_roundtrip() {
    let req = Request {
        header: RequestHeader {
            client_id: "abcdefghij0123456789".to_string(),
            client_username: "alice".to_string(),
            client_type: 1,
        },
        body: RequestBody::ComputeVisdata { options: vec![sample_options()] },
    };
    let decoded = roundtrip_request(req.clone());
    assert_eq!(decoded, req);
}

#[test]
fn test_acal_request_roundtrip() {
    let req = Request {
        header: RequestHeader { client_id: "id".to_string(), client_username: "".to_string(), client_type: 2 },
        body: RequestBody::Acal {
            options: vec![sample_options()],
            mjds: vec![59000.0, 59001.5],
            fluxdensities: vec![1.0, 2.5],
        },
    };
    let decoded = roundtrip_request(req.clone());
    assert_eq!(decoded, req);
}

#[test]
fn test_time_range_response_roundtrip() {
    let resp = Response {
        client_id: "client-1".to_string(),
        body: ResponseBody::TimeRange { min_mjd: 59000.0, max_mjd: 59001.0 },
    };
    assert_eq!(roundtrip_response(resp.clone()), resp);
}

#[test]
fn test_username_exists_response_roundtrip() {
    let resp = Response {
        client_id: "client-2".to_string(),
        body: ResponseBody::UsernameExists { options: sample_options() },
    };
    assert_eq!(roundtrip_response(resp.clone()), resp);
}

#[test]
fn test_simple_requests_roundtrip() {
    for body in [
        RequestBody::CurrentVisdata,
        RequestBody::ComputedVisdata,
        RequestBody::ServerType,
        RequestBody::TimeRange,
        RequestBody::CycleTimes,
    ] {
        let req = Request {
            header: RequestHeader { client_id: "x".to_string(), client_username: "y".to_string(), client_type: 0 },
            body,
        };
        assert_eq!(roundtrip_request(req.clone()), req);
    }
}
