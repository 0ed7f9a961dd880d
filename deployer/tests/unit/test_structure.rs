//! Structure exchange unit tests

use ajideploy::deploy::structure::{
    compose_action_keys, select_node, startup_args, ServicePlacement, StructureRequest,
};
use ajideploy::errors::DeployError;
use ajideploy::remote::device::Device;
use ajideploy::scanner::actions::ActionMatch;

const PLACEMENT: &str = r#"{
    "nodes": [
        {"id": "10.0.0.5", "exportedEndpoints": [{"handlerId": "h1"}, {"handlerId": "h3"}]},
        {"id": "10.0.0.6", "exportedEndpoints": []}
    ]
}"#;

#[test]
fn test_select_node_by_address() {
    let placement = ServicePlacement::decode(PLACEMENT).unwrap();

    let node = select_node(&placement, "10.0.0.5").unwrap().unwrap();
    assert_eq!(node.endpoint_ids(), "h1,h3");

    let empty = select_node(&placement, "10.0.0.6").unwrap().unwrap();
    assert_eq!(empty.endpoint_ids(), "");
}

#[test]
fn test_select_node_without_match() {
    let placement = ServicePlacement::decode(PLACEMENT).unwrap();
    assert!(select_node(&placement, "10.0.0.7").unwrap().is_none());

    let none = ServicePlacement::decode(r#"{"nodes": []}"#).unwrap();
    assert!(select_node(&none, "10.0.0.5").unwrap().is_none());
}

#[test]
fn test_select_node_duplicate_address() {
    let placement = ServicePlacement::decode(
        r#"{"nodes": [{"id": "10.0.0.5"}, {"id": "10.0.0.5"}]}"#,
    )
    .unwrap();
    assert!(matches!(
        select_node(&placement, "10.0.0.5"),
        Err(DeployError::IntegrityError(_))
    ));
}

#[test]
fn test_decode_is_deterministic() {
    let first = ServicePlacement::decode(PLACEMENT).unwrap();
    let second = ServicePlacement::decode(PLACEMENT).unwrap();
    assert_eq!(first, second);

    let reencoded = serde_json::to_string(&first).unwrap();
    assert_eq!(ServicePlacement::decode(&reencoded).unwrap(), first);
}

#[test]
fn test_decode_rejects_missing_nodes() {
    assert!(matches!(
        ServicePlacement::decode(r#"{"node": []}"#),
        Err(DeployError::DecodeError(_))
    ));
}

#[test]
fn test_action_keys_keep_binding_order() {
    let found = vec![
        ActionMatch { key: "gpio".to_string(), count: 2 },
        ActionMatch { key: "camera".to_string(), count: 0 },
        ActionMatch { key: "lifx".to_string(), count: 1 },
    ];
    assert_eq!(compose_action_keys(&found), "gpio,lifx,default");
}

#[test]
fn test_startup_args_for_selected_node() {
    let placement = ServicePlacement::decode(PLACEMENT).unwrap();
    let node = select_node(&placement, "10.0.0.5").unwrap().unwrap();
    let device = Device::new("10.0.0.5", "10.0.0.5", "pi");
    let request = StructureRequest::new(&device, "/usr/deployment", &[], 8080).unwrap();

    assert_eq!(
        startup_args(&request.output_path, node),
        "startup /usr/deployment/structure-10_0_0_5.json --node-id 10.0.0.5 --endpoint-ids h1,h3"
    );
}

#[test]
fn test_request_without_address_is_transport_error() {
    let mut device = Device::new("pi-1", "", "pi");
    device.address = None;
    assert!(matches!(
        StructureRequest::new(&device, "/usr/deployment", &[], 8080),
        Err(DeployError::TransportError(_))
    ));
}
