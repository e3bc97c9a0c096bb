//! Sample wire payloads for tests (`testing` feature)

use serde_json::{Value, json};

pub fn metadata_json() -> Value {
    json!({
        "eventId": "6f1c2a9e-8b3d-4c5e-9f7a-1b2c3d4e5f60",
        "timestamp": "2024-05-01T12:00:00Z",
        "source": "license-portal",
        "correlationId": "0b7e4d3c-2a1f-4e9d-8c7b-6a5f4e3d2c1b",
        "version": "1.0",
        "additionalContext": { "region": "eu-west-1" }
    })
}

pub fn log_event_json() -> Value {
    json!({
        "type": "logging.event",
        "priority": "HIGH",
        "metadata": metadata_json(),
        "payload": {
            "level": "ERROR",
            "message": "License server unreachable",
            "stackTrace": "at connect (net.rs:42)",
            "errorCode": "LIC_503",
            "context": { "attempts": 3, "host": "lic-01" }
        }
    })
}

pub fn license_create_json() -> Value {
    json!({
        "type": "licensing.create",
        "priority": "NORMAL",
        "metadata": metadata_json(),
        "payload": {
            "licenseType": "SOFTWARE_LICENSE",
            "customerId": "CUST-1001",
            "productCodes": ["PROD-A", "PROD-B"],
            "featureCodes": ["FEAT-X"],
            "expirationDate": "2026-12-31T23:59:59Z",
            "email": "ops@example.com",
            "xmlPayload": "<license><id>1</id></license>"
        }
    })
}

/// An identities update carrying `count` identities
pub fn update_identities_json(count: usize) -> Value {
    let identities: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "issuedTo": format!("workstation-{i}"),
                "identityString": format!("HWID-{i:04}"),
                "allowRemote": i % 2 == 0,
                "allowDetach": false,
                "allowConcurrency": true,
                "limitTo": "",
                "maxNumberOfAutoRegisteredMachines": 2,
                "expirationDate": "2026-06-30T00:00:00Z"
            })
        })
        .collect();

    json!({
        "type": "licensing.updateidentities",
        "priority": "HIGH",
        "metadata": metadata_json(),
        "payload": {
            "keyId": "KEY-77",
            "identities": identities
        }
    })
}
