//! Unit tests for the Scaleway catalog and payload mapping.

use std::collections::HashMap;

use scaleway_rs::ScalewayImage;

use crate::provider::{ProviderError, Server};

use super::catalog;
use super::{PublicIpPayload, ServerPayload};

#[derive(Copy, Clone)]
struct ImageSpec {
    id: &'static str,
    arch: &'static str,
    state: &'static str,
    creation_date: &'static str,
}

fn image(spec: ImageSpec) -> ScalewayImage {
    ScalewayImage {
        id: spec.id.to_owned(),
        name: String::new(),
        arch: spec.arch.to_owned(),
        creation_date: spec.creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: spec.state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

#[test]
fn image_label_maps_known_series() {
    assert_eq!(
        catalog::image_label("noble"),
        Some("Ubuntu 24.04 Noble Numbat")
    );
    assert_eq!(catalog::image_label("sid"), None);
}

#[test]
fn select_image_id_returns_newest_available() {
    let images = vec![
        image(ImageSpec {
            id: "older",
            arch: "x86_64",
            state: "available",
            creation_date: "2025-01-01T00:00:00Z",
        }),
        image(ImageSpec {
            id: "newest",
            arch: "x86_64",
            state: "available",
            creation_date: "2025-02-01T00:00:00Z",
        }),
        image(ImageSpec {
            id: "creating",
            arch: "x86_64",
            state: "creating",
            creation_date: "2025-03-01T00:00:00Z",
        }),
    ];

    let id = catalog::select_image_id(images, "label", "x86_64", "fr-par-1")
        .unwrap_or_else(|err| panic!("image selected: {err}"));
    assert_eq!(id, "newest");
}

#[test]
fn select_image_id_filters_architecture() {
    let images = vec![image(ImageSpec {
        id: "arm-img",
        arch: "arm64",
        state: "available",
        creation_date: "2025-01-01T00:00:00Z",
    })];

    let err = catalog::select_image_id(images, "label", "x86_64", "fr-par-1")
        .expect_err("no x86_64 candidates");
    assert!(matches!(err, ProviderError::ImageNotFound { .. }));
}

#[test]
fn server_payload_maps_into_snapshot() {
    let payload = ServerPayload {
        id: String::from("srv-1"),
        name: String::from("staging-0"),
        state: String::from("running"),
        creation_date: String::from("2025-05-01T10:00:00Z"),
        image: None,
        public_ip: Some(PublicIpPayload {
            address: String::from("51.15.0.9"),
        }),
    };

    let server = Server::from(payload);
    assert!(server.is_running());
    assert_eq!(server.public_address.as_deref(), Some("51.15.0.9"));
    assert!(server.image.is_none());
}

#[test]
fn server_list_envelope_tolerates_missing_servers_key() {
    let parsed: super::ServerListEnvelope =
        serde_json::from_str("{}").unwrap_or_else(|err| panic!("parse: {err}"));
    assert!(parsed.servers.is_empty());
}
