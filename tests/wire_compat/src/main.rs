fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chunkup_protocol::messages::{
        MergeRequest, MergeResponse, NegotiateRequest, NegotiateResponse, PutChunkResponse,
    };
    use chunkup_protocol::{
        ChunkHeader, Message, MessageType, NegotiationStatus, encode_binary_message,
        parse_binary_message,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Parses a fixture into `T`, serializes it again and compares both
    /// documents as JSON values (key order does not matter).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  encoded: {reserialized}"
        );
        parsed
    }

    // --- Envelope ---

    #[test]
    fn fixture_message_envelope() {
        let msg = roundtrip_test::<Message>("message_envelope.json");
        assert_eq!(msg.msg_type, MessageType::Negotiate);
        assert!(msg.error.is_none());

        let req: NegotiateRequest = msg.parse_payload().unwrap().unwrap();
        assert_eq!(req.total_count, 12);
        assert_eq!(req.extname.as_str(), "mp4");
        assert_eq!(req.chunk_size, 0);
    }

    #[test]
    fn fixture_error_envelope() {
        let msg = roundtrip_test::<Message>("error_envelope.json");
        assert_eq!(msg.msg_type, MessageType::Error);
        assert!(msg.payload.is_none());
        let err = msg.error.unwrap();
        assert_eq!(err.code, 409);
        assert_eq!(err.message, "chunk 3 of 12 is missing");
    }

    #[test]
    fn unknown_message_type_is_tolerated() {
        let json = r#"{"id":"x","type":"status_report","payload":{"uptime":60}}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.msg_type, MessageType::Unknown);
        assert_eq!(msg.id, "x");
    }

    // --- Requests ---

    #[test]
    fn fixture_negotiate_request() {
        let req = roundtrip_test::<NegotiateRequest>("negotiate_request.json");
        assert_eq!(req.chunk_size, 4_194_304);
    }

    #[test]
    fn fixture_merge_request() {
        let req = roundtrip_test::<MergeRequest>("merge_request.json");
        assert_eq!(req.total_count, 12);
    }

    #[test]
    fn request_with_traversal_extension_is_rejected() {
        let mut json = load_fixture("negotiate_request.json");
        json["extname"] = serde_json::json!("../../etc");
        assert!(serde_json::from_value::<NegotiateRequest>(json).is_err());
    }

    #[test]
    fn uppercase_fingerprint_is_normalized() {
        let mut json = load_fixture("merge_request.json");
        let upper = json["fileHash"].as_str().unwrap().to_ascii_uppercase();
        json["fileHash"] = serde_json::json!(upper);

        let req: MergeRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.file_hash.as_str(), upper.to_ascii_lowercase());
    }

    // --- Responses ---

    #[test]
    fn fixture_negotiate_response_resume() {
        let resp = roundtrip_test::<NegotiateResponse>("negotiate_response_resume.json");
        assert_eq!(resp.status, NegotiationStatus::Resume);
        assert!(resp.needed_indices.windows(2).all(|w| w[0] < w[1]));
        assert!(resp.file_path.is_none());
    }

    #[test]
    fn fixture_negotiate_response_complete() {
        let resp = roundtrip_test::<NegotiateResponse>("negotiate_response_complete.json");
        assert_eq!(resp.status, NegotiationStatus::Complete);
        assert!(resp.needed_indices.is_empty());
        assert!(resp.file_path.unwrap().starts_with("/uploads/video/"));
    }

    #[test]
    fn fixture_put_chunk_response() {
        let resp = roundtrip_test::<PutChunkResponse>("put_chunk_response.json");
        assert_eq!(resp.chunk_index, 5);
        assert_eq!(resp.bytes_written, 4_194_304);
    }

    #[test]
    fn fixture_merge_response() {
        let resp = roundtrip_test::<MergeResponse>("merge_response.json");
        assert!(resp.already_existed);
    }

    #[test]
    fn negotiation_status_strings() {
        let cases = [
            (NegotiationStatus::Complete, "complete"),
            (NegotiationStatus::ReadyToMerge, "ready_to_merge"),
            (NegotiationStatus::Resume, "resume"),
            (NegotiationStatus::Fresh, "fresh"),
        ];
        for (status, wire) in cases {
            assert_eq!(serde_json::to_value(status).unwrap(), wire);
        }
    }

    // --- Binary frame ---

    #[test]
    fn fixture_chunk_header() {
        let header = roundtrip_test::<ChunkHeader>("chunk_header.json");
        assert_eq!(header.chunk_size, 4_194_304);
    }

    #[test]
    fn chunk_header_without_checksum() {
        let mut json = load_fixture("chunk_header.json");
        json.as_object_mut().unwrap().remove("checksum");

        let header: ChunkHeader = serde_json::from_value(json).unwrap();
        assert!(header.checksum.is_empty());
        let encoded = serde_json::to_value(&header).unwrap();
        assert!(encoded.get("checksum").is_none());
    }

    #[test]
    fn binary_frame_layout() {
        let header: ChunkHeader =
            serde_json::from_str(&read_fixture("chunk_header.json")).unwrap();
        let payload = b"chunk five bytes";

        let frame = encode_binary_message(&header, payload).unwrap();
        let header_len = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        let header_json: serde_json::Value =
            serde_json::from_slice(&frame[4..4 + header_len]).unwrap();
        assert_eq!(header_json, load_fixture("chunk_header.json"));
        assert_eq!(&frame[4 + header_len..], payload);

        let parsed = parse_binary_message(&frame).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.data, payload);
    }
}
