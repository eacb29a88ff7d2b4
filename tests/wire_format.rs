//! Wire compatibility checks through the public codec API.

use std::time::Duration;

use meshdiag::{
    decode_request, decode_response, decode_stream, encode_request, encode_response,
    DiagnosticRequest, DiagnosticResponse, Identity, PeerHandle, RequestId, SnapshotBuilder,
    REQUEST_ID_LEN,
};

#[test]
fn fresh_request_has_four_byte_id() {
    let request = DiagnosticRequest::fresh();
    assert_eq!(request.request_id.as_bytes().len(), REQUEST_ID_LEN);

    let decoded = decode_request(&encode_request(&request).unwrap()).unwrap();
    assert_eq!(decoded, request);
}

#[test]
fn response_carries_concatenated_snapshots() {
    let a = SnapshotBuilder::new(Identity::from_bytes([1; 32]), "a/1");
    let b = SnapshotBuilder::new(Identity::from_bytes([2; 32]), "b/2");
    let link = [PeerHandle::new(Identity::from_bytes([1; 32]), Duration::from_millis(4))];

    let mut data = Vec::new();
    a.snapshot(&[]).write_to(&mut data).unwrap();
    b.snapshot(&link).write_to(&mut data).unwrap();

    let response = DiagnosticResponse {
        request_id: RequestId::new(vec![9, 9, 9, 9]),
        data,
    };
    let decoded = decode_response(&encode_response(&response).unwrap()).unwrap();

    let infos: Vec<_> = decode_stream(&decoded.data).collect();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].code_version, "a/1");
    assert_eq!(infos[1].connections[0].latency, Duration::from_millis(4));
}

#[test]
fn truncated_envelope_is_rejected() {
    let bytes = encode_request(&DiagnosticRequest::fresh()).unwrap();
    assert!(decode_request(&bytes[..bytes.len() - 1]).is_err());
    assert!(decode_response(&[]).is_err());
}
