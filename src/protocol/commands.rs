//! JSON command vocabulary for one batch.
//!
//! Two families share this wire format: the six generic graph primitives
//! (`AddNode`/`AddEdge`/`QueryNode`/`QueryEdge`/`UpdateNode`/`UpdateEdge`,
//! exercised directly by the end-to-end scenarios) and the domain-specific
//! commands a visual-data client actually sends (`AddImage`, `FindBoundingBox`,
//! ...). `Command` is deserialized with serde's default externally-tagged
//! representation, which is exactly `{"<CommandName>": {...}}` — the shape
//! the batch array holds one element of.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::media::Operation;

pub type ConstraintsJson = BTreeMap<String, Vec<Value>>;
pub type PropertiesJson = Map<String, Value>;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultsJson {
    pub list: Option<Vec<String>>,
    pub blob: Option<bool>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub sort: bool,
    pub sort_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkJson {
    #[serde(rename = "ref")]
    pub ref_id: i64,
    pub class: Option<String>,
    #[serde(default = "default_direction")]
    pub direction: String,
}

fn default_direction() -> String {
    "any".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RectJson {
    pub x: i64,
    pub y: i64,
    #[serde(alias = "w")]
    pub width: u32,
    #[serde(alias = "h")]
    pub height: u32,
}

// --- Generic graph primitives ------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AddNodeParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(alias = "class")]
    pub tag: String,
    #[serde(default)]
    pub properties: PropertiesJson,
    /// Present only when this Add doubles as a find-or-create guard.
    #[serde(default)]
    pub constraints: ConstraintsJson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddEdgeParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(alias = "src")]
    pub src_ref: i64,
    #[serde(alias = "dst")]
    pub dst_ref: i64,
    pub tag: String,
    #[serde(default)]
    pub properties: PropertiesJson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryNodeParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    pub tag: Option<String>,
    #[serde(default)]
    pub constraints: ConstraintsJson,
    pub link: Option<LinkJson>,
    #[serde(default)]
    pub results: ResultsJson,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryEdgeParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    pub tag: Option<String>,
    #[serde(alias = "src")]
    pub src_ref: Option<i64>,
    #[serde(alias = "dst")]
    pub dst_ref: Option<i64>,
    #[serde(default)]
    pub constraints: ConstraintsJson,
    #[serde(default)]
    pub results: ResultsJson,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateNodeParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    pub tag: Option<String>,
    #[serde(default)]
    pub constraints: ConstraintsJson,
    #[serde(default)]
    pub properties: PropertiesJson,
    #[serde(default)]
    pub remove_props: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateEdgeParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    pub tag: Option<String>,
    #[serde(alias = "src")]
    pub src_ref: Option<i64>,
    #[serde(alias = "dst")]
    pub dst_ref: Option<i64>,
    #[serde(default)]
    pub constraints: ConstraintsJson,
    #[serde(default)]
    pub properties: PropertiesJson,
    #[serde(default)]
    pub remove_props: Vec<String>,
}

// --- Media-bearing commands ---------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AddImageParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(default)]
    pub properties: PropertiesJson,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "png".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateImageParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(default)]
    pub constraints: ConstraintsJson,
    #[serde(default)]
    pub properties: PropertiesJson,
    #[serde(default)]
    pub remove_props: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindImageParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(default)]
    pub constraints: ConstraintsJson,
    #[serde(default)]
    pub operations: Vec<Operation>,
    pub link: Option<LinkJson>,
    #[serde(default)]
    pub results: ResultsJson,
    #[serde(default)]
    pub unique: bool,
    pub format: Option<String>,
}

pub type AddVideoParams = AddImageParams;
pub type UpdateVideoParams = UpdateImageParams;
pub type FindVideoParams = FindImageParams;

#[derive(Debug, Clone, Deserialize)]
pub struct AddBoundingBoxParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(alias = "image")]
    pub image_ref: i64,
    pub rectangle: RectJson,
    #[serde(default)]
    pub properties: PropertiesJson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateBoundingBoxParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(default)]
    pub constraints: ConstraintsJson,
    #[serde(default)]
    pub properties: PropertiesJson,
    #[serde(default)]
    pub remove_props: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindBoundingBoxParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(default)]
    pub constraints: ConstraintsJson,
    /// A search region: boxes that overlap it are kept. Optional.
    pub rectangle: Option<RectJson>,
    #[serde(default)]
    pub results: ResultsJson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddDescriptorSetParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    pub name: String,
    pub dimensions: usize,
    #[serde(default)]
    pub properties: PropertiesJson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddDescriptorParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(alias = "set")]
    pub set_ref: i64,
    pub label: Option<String>,
    pub vector: Vec<f64>,
    #[serde(default)]
    pub properties: PropertiesJson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindDescriptorParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(alias = "set")]
    pub set_ref: Option<i64>,
    #[serde(default)]
    pub constraints: ConstraintsJson,
    #[serde(default)]
    pub results: ResultsJson,
    pub k_neighbors: Option<usize>,
    pub vector: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyDescriptorParams {
    #[serde(alias = "set")]
    pub set_ref: i64,
    pub vector: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddBlobParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(default)]
    pub properties: PropertiesJson,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateBlobParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(default)]
    pub constraints: ConstraintsJson,
    #[serde(default)]
    pub properties: PropertiesJson,
    #[serde(default)]
    pub remove_props: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindBlobParams {
    #[serde(rename = "_ref")]
    pub ref_id: Option<i64>,
    #[serde(default)]
    pub constraints: ConstraintsJson,
    pub link: Option<LinkJson>,
    #[serde(default)]
    pub results: ResultsJson,
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, Deserialize)]
pub enum Command {
    AddNode(AddNodeParams),
    AddEdge(AddEdgeParams),
    QueryNode(QueryNodeParams),
    QueryEdge(QueryEdgeParams),
    UpdateNode(UpdateNodeParams),
    UpdateEdge(UpdateEdgeParams),

    AddEntity(AddNodeParams),
    AddConnection(AddEdgeParams),

    AddImage(AddImageParams),
    UpdateImage(UpdateImageParams),
    FindImage(FindImageParams),

    AddVideo(AddVideoParams),
    UpdateVideo(UpdateVideoParams),
    FindVideo(FindVideoParams),

    AddBoundingBox(AddBoundingBoxParams),
    UpdateBoundingBox(UpdateBoundingBoxParams),
    FindBoundingBox(FindBoundingBoxParams),

    AddDescriptorSet(AddDescriptorSetParams),
    AddDescriptor(AddDescriptorParams),
    FindDescriptor(FindDescriptorParams),
    ClassifyDescriptor(ClassifyDescriptorParams),

    AddBlob(AddBlobParams),
    UpdateBlob(UpdateBlobParams),
    FindBlob(FindBlobParams),
}

impl Command {
    /// The JSON key this command was tagged under, used to name the
    /// response object and in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddNode(_) => "AddNode",
            Command::AddEdge(_) => "AddEdge",
            Command::QueryNode(_) => "QueryNode",
            Command::QueryEdge(_) => "QueryEdge",
            Command::UpdateNode(_) => "UpdateNode",
            Command::UpdateEdge(_) => "UpdateEdge",
            Command::AddEntity(_) => "AddEntity",
            Command::AddConnection(_) => "AddConnection",
            Command::AddImage(_) => "AddImage",
            Command::UpdateImage(_) => "UpdateImage",
            Command::FindImage(_) => "FindImage",
            Command::AddVideo(_) => "AddVideo",
            Command::UpdateVideo(_) => "UpdateVideo",
            Command::FindVideo(_) => "FindVideo",
            Command::AddBoundingBox(_) => "AddBoundingBox",
            Command::UpdateBoundingBox(_) => "UpdateBoundingBox",
            Command::FindBoundingBox(_) => "FindBoundingBox",
            Command::AddDescriptorSet(_) => "AddDescriptorSet",
            Command::AddDescriptor(_) => "AddDescriptor",
            Command::FindDescriptor(_) => "FindDescriptor",
            Command::ClassifyDescriptor(_) => "ClassifyDescriptor",
            Command::AddBlob(_) => "AddBlob",
            Command::UpdateBlob(_) => "UpdateBlob",
            Command::FindBlob(_) => "FindBlob",
        }
    }

    /// Number of input blobs this command consumes from the batch's blob
    /// list, in order.
    pub fn blobs_needed(&self) -> usize {
        matches!(self, Command::AddImage(_) | Command::AddVideo(_) | Command::AddBlob(_)) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_node_deserializes_s1_shape() {
        let json = serde_json::json!({"_ref": 1, "tag": "Patient", "properties": {"name": "Jane", "age": 70}});
        let params: AddNodeParams = serde_json::from_value(json).unwrap();
        assert_eq!(params.tag, "Patient");
        assert_eq!(params.ref_id, Some(1));
    }

    #[test]
    fn command_batch_element_matches_external_tag_shape() {
        let json = serde_json::json!({"QueryNode": {"tag": "Patient", "constraints": {"age": [">=", 65]}, "results": {"list": ["name", "age"]}}});
        let cmd: Command = serde_json::from_value(json).unwrap();
        assert_eq!(cmd.name(), "QueryNode");
    }

    #[test]
    fn add_edge_accepts_src_dst_aliases() {
        let json = serde_json::json!({"AddEdge": {"src": 99, "dst": 100, "tag": "Related"}});
        let cmd: Command = serde_json::from_value(json).unwrap();
        match cmd {
            Command::AddEdge(p) => {
                assert_eq!(p.src_ref, 99);
                assert_eq!(p.dst_ref, 100);
            }
            _ => panic!("expected AddEdge"),
        }
    }

    #[test]
    fn add_image_defaults_format_to_png() {
        let json = serde_json::json!({"_ref": 1, "properties": {"tag": "test"}});
        let params: AddImageParams = serde_json::from_value(json).unwrap();
        assert_eq!(params.format, "png");
    }
}
