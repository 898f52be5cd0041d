//! End-to-end wire-protocol scenarios driven through the one public entry
//! point, [`samyama::dispatch`], exactly as a host embedding this crate would
//! call it.

use samyama::{dispatch, Config, GraphStore};
use serde_json::Value;

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let buf = image::RgbImage::from_pixel(width, height, image::Rgb([120, 40, 40]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(buf)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

#[test]
fn add_then_find_a_patient_like_node() {
    let mut store = GraphStore::new();
    let config = Config::default();
    let batch = r#"[
        {"AddNode": {"_ref": 1, "tag": "Patient", "properties": {"name": "Jane", "age": 70}}},
        {"QueryNode": {"tag": "Patient", "constraints": {"age": [">=", 65]}, "results": {"list": ["name", "age"]}}}
    ]"#;

    let (response_json, blobs) = dispatch(&mut store, &config, batch, Vec::new());
    assert!(blobs.is_empty());

    let responses: Vec<Value> = serde_json::from_str(&response_json).unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["AddNode"]["status"], 0);
    assert_eq!(responses[1]["QueryNode"]["status"], 0);

    let entities = responses[1]["QueryNode"]["entities"].as_array().unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0]["name"], "Jane");
    assert_eq!(entities[0]["age"], 70);
}

#[test]
fn reference_reuse_aborts_the_whole_batch() {
    let mut store = GraphStore::new();
    let config = Config::default();
    let batch = r#"[
        {"AddNode": {"_ref": 1, "tag": "A"}},
        {"AddNode": {"_ref": 1, "tag": "A"}}
    ]"#;

    let (response_json, _blobs) = dispatch(&mut store, &config, batch, Vec::new());
    let responses: Vec<Value> = serde_json::from_str(&response_json).unwrap();

    assert_eq!(responses.len(), 2, "later commands past the failing one are dropped, not the failing one itself");
    assert_eq!(responses[0]["AddNode"]["status"], 0);
    assert_eq!(responses[1]["AddNode"]["status"], -1);
    assert!(responses[1]["AddNode"]["info"].as_str().unwrap().contains("ref"));
    assert_eq!(store.node_count(), 0, "post-state equals pre-state after an abort");
}

#[test]
fn adding_an_edge_between_missing_endpoints_aborts_the_batch() {
    let mut store = GraphStore::new();
    let config = Config::default();
    let batch = r#"[{"AddEdge": {"src": 99, "dst": 100, "tag": "Related"}}]"#;

    let (response_json, _blobs) = dispatch(&mut store, &config, batch, Vec::new());
    let responses: Vec<Value> = serde_json::from_str(&response_json).unwrap();

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["AddEdge"]["status"], -1);
    assert_eq!(store.edge_count(), 0);
    assert_eq!(store.node_count(), 0);
}

#[test]
fn add_image_with_crop_then_find_with_resize() {
    let mut store = GraphStore::new();
    let config = Config::default();

    let add_batch = r#"[
        {"AddImage": {"_ref": 1, "format": "png", "operations": [
            {"type": "crop", "x": 0, "y": 0, "width": 150, "height": 150}
        ], "properties": {"tag": "test"}}}
    ]"#;
    let (add_response, _) = dispatch(&mut store, &config, add_batch, vec![png_bytes(300, 300)]);
    let add_responses: Vec<Value> = serde_json::from_str(&add_response).unwrap();
    assert_eq!(add_responses[0]["AddImage"]["status"], 0);
    assert_eq!(store.node_count(), 1);

    let find_batch = r#"[
        {"FindImage": {"constraints": {"tag": ["==", "test"]}, "operations": [
            {"type": "resize", "height": 100, "width": 100}
        ], "format": "png", "results": {"blob": true}}}
    ]"#;
    let (find_response, blobs) = dispatch(&mut store, &config, find_batch, Vec::new());
    let find_responses: Vec<Value> = serde_json::from_str(&find_response).unwrap();
    assert_eq!(find_responses[0]["FindImage"]["status"], 0);
    assert_eq!(blobs.len(), 1);

    let decoded = image::load_from_memory(&blobs[0]).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (100, 100));
}

#[test]
fn find_bounding_box_returns_coordinates_and_a_cropped_image() {
    let mut store = GraphStore::new();
    let config = Config::default();

    let add_image = r#"[{"AddImage": {"_ref": 1, "format": "png", "properties": {"tag": "scan"}}}]"#;
    let (resp, _) = dispatch(&mut store, &config, add_image, vec![png_bytes(400, 400)]);
    let resp: Vec<Value> = serde_json::from_str(&resp).unwrap();
    assert_eq!(resp[0]["AddImage"]["status"], 0);

    let add_box = r#"[{"AddBoundingBox": {"_ref": 2, "image": 1, "rectangle": {"x": 100, "y": 100, "width": 100, "height": 100}}}]"#;
    let (resp, _) = dispatch(&mut store, &config, add_box, Vec::new());
    let resp: Vec<Value> = serde_json::from_str(&resp).unwrap();
    assert_eq!(resp[0]["AddBoundingBox"]["status"], 0);
    assert_eq!(store.node_count(), 2);
    assert_eq!(store.edge_count(), 1);

    let find_box = r#"[{"FindBoundingBox": {"_ref": 3, "results": {"blob": true}, "rectangle": {"x": 0, "y": 0, "width": 200, "height": 200}}}]"#;
    let (resp, blobs) = dispatch(&mut store, &config, find_box, Vec::new());
    let resp: Vec<Value> = serde_json::from_str(&resp).unwrap();

    assert_eq!(resp[0]["FindBoundingBox"]["status"], 0);
    let entities = resp[0]["FindBoundingBox"]["entities"].as_array().unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0]["_coordinates"]["width"], 100);
    assert_eq!(entities[0]["_coordinates"]["height"], 100);

    assert_eq!(blobs.len(), 1);
    let decoded = image::load_from_memory(&blobs[0]).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (100, 100));
}

#[test]
fn blob_count_mismatch_is_a_hard_batch_error() {
    let mut store = GraphStore::new();
    let config = Config::default();
    let batch = r#"[{"AddImage": {"_ref": 1, "format": "png"}}]"#;

    let (response_json, blobs) = dispatch(&mut store, &config, batch, Vec::new());
    let responses: Vec<Value> = serde_json::from_str(&response_json).unwrap();

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["BatchError"]["status"], -1);
    assert!(blobs.is_empty());
    assert_eq!(store.node_count(), 0);
}
