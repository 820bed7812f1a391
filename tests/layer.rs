// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! End-to-end exercise of `Layer::open` against a mock registry: redirect,
//! size probe, TOC parse and a chunked read, strung together the way an
//! embedder actually drives this crate.

use std::sync::Arc;

use httptest::{matchers::*, responders::*, Expectation, Server};
use stargz_core::{BlobConfig, MemChunkCache, RegistryConfig, Resolver};

#[test]
fn open_layer_and_read_a_file() {
    let server = Server::run();
    let host = server.addr().to_string();

    // Consumed once, by `Resolver`'s redirect probe (`GET Range: bytes=0-1`).
    server.expect(
        Expectation::matching(request::method_path(
            "GET",
            "/v2/library/demo/blobs/sha256:deadbeef",
        ))
        .respond_with(status_code(200)),
    );
    server.expect(
        Expectation::matching(request::method_path(
            "HEAD",
            "/v2/library/demo/blobs/sha256:deadbeef",
        ))
        .respond_with(status_code(200).insert_header("Content-Length", "20")),
    );

    let mut registry_config = RegistryConfig::default();
    registry_config.domains.insert(
        host.clone(),
        stargz_core::DomainConfig {
            mirrors: vec![stargz_core::MirrorHost {
                host: host.clone(),
                insecure: true,
            }],
        },
    );

    let resolver = Arc::new(Resolver::new(
        registry_config,
        Arc::new(stargz_core::EnvKeychain::default()),
    ));

    let reference = format!("{}/library/demo", host);
    let toc_json = br#"{
        "version": 1,
        "entries": [
            {"name": "hello.txt", "type": "reg", "size": 10, "digest": "sha256:fa"},
            {"name": "hello.txt", "type": "chunk", "chunkOffset": 0, "chunkSize": 10, "offset": 5}
        ]
    }"#;

    let chunk_server_body = concat!(
        "--B\r\n",
        "Content-Range: bytes 0-0/20\r\n",
        "\r\n",
        "x\r\n",
        "--B\r\n",
        "Content-Range: bytes 5-14/20\r\n",
        "\r\n",
        "helloworld\r\n",
        "--B--\r\n",
    );
    server.expect(
        Expectation::matching(request::method_path(
            "GET",
            "/v2/library/demo/blobs/sha256:deadbeef",
        ))
        .respond_with(
            status_code(206)
                .insert_header("Content-Type", "multipart/byteranges; boundary=B")
                .body(chunk_server_body),
        ),
    );

    let cache: Arc<dyn stargz_core::ChunkCache> = Arc::new(MemChunkCache::new());
    let layer = stargz_core::Layer::open(
        resolver,
        &reference,
        "sha256:deadbeef",
        toc_json,
        cache,
        BlobConfig::default(),
    )
    .unwrap();

    let file = layer.open_file("hello.txt").unwrap();
    let mut buf = [0u8; 10];
    let n = file.read_at(&mut buf, 0).unwrap();
    assert_eq!(n, 10);
    assert_eq!(&buf, b"helloworld");
}
