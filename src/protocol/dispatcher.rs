//! Command Dispatcher & Response Builder.
//!
//! `dispatch` is the in-process entry point: parse the batch, validate it,
//! run phase 1 ("construct graph operations") as a single transaction
//! against the graph store, and — if it committed — run phase 2
//! ("construct response") which drives the media pipelines for every
//! command that asked for a blob and appends their encoded bytes to the
//! outgoing blob list in command order.

use serde_json::Value;
use std::cmp::Ordering;
use tracing::warn;

use crate::config::Config;
use crate::error::{CoreError, DispatchError, MediaError, StatusCode};
use crate::graph::iterators::Direction;
use crate::graph::{EdgeType, GraphStore, NodeId, PropertyMap, PropertyValue, Tag};
use crate::media::remote::build_client;
use crate::media::{EventLoop, Format, Image, MediaObject, Operation, Video, Window};
use crate::query::handler::{EdgeTarget, NodeTarget};
use crate::query::{LinkSpec, QueryEdgeSpec, QueryHandler, QueryNodeSpec, ResultPayload, ResultRow, ResultShape, ResultSpec};

use super::commands::*;
use super::constraints::{json_to_property_value, parse_constraints};
use super::response::{self, CommandResponseBody};
use super::schema;

/// One batch-scoped, command-contributed unit of deferred media work.
struct FindItem {
    node_id: NodeId,
    ops: Vec<Operation>,
}

enum PendingKind {
    Image { target_format: Format },
    Video,
    Blob,
}

/// A single command's deferred blob-attachment work, resolved in phase 2
/// after the graph transaction has committed.
struct PendingFind {
    response_index: usize,
    kind: PendingKind,
    items: Vec<FindItem>,
}

pub struct Dispatcher<'a> {
    store: &'a mut GraphStore,
    config: &'a Config,
    event_loop: EventLoop,
}

impl<'a> Dispatcher<'a> {
    pub fn new(store: &'a mut GraphStore, config: &'a Config) -> Result<Self, MediaError> {
        let client = build_client(config.http_proxy.as_ref())?;
        Ok(Dispatcher { store, config, event_loop: EventLoop::new(client) })
    }

    /// Runs one batch to completion. Never panics on malformed input: parse,
    /// schema, and blob-count failures fold into a single-entry error
    /// response rather than propagating a `Result` to the caller, matching
    /// the in-process contract's `(response_json, blobs)` shape.
    pub fn dispatch(&mut self, batch_json: &str, blobs: Vec<Vec<u8>>) -> (String, Vec<Vec<u8>>) {
        match self.try_dispatch(batch_json, blobs) {
            Ok(result) => result,
            Err(msg) => (batch_error_json(&msg), Vec::new()),
        }
    }

    fn try_dispatch(&mut self, batch_json: &str, blobs: Vec<Vec<u8>>) -> Result<(String, Vec<Vec<u8>>), String> {
        let value: Value = serde_json::from_str(batch_json).map_err(|e| format!("invalid JSON: {e}"))?;
        schema::validate_batch(&value).map_err(|e| e.to_string())?;
        let commands: Vec<Command> =
            serde_json::from_value(value).map_err(|e| format!("invalid command batch: {e}"))?;

        // A blob-count mismatch is a hard error in all cases, not only when
        // some command needs a blob and none were provided: there is no
        // sane way to assign blobs to commands once the count disagrees.
        let needed: usize = commands.iter().map(Command::blobs_needed).sum();
        if needed != blobs.len() {
            let err = MediaError::BlobCountMismatch { needed, provided: blobs.len() };
            return Err(err.to_string());
        }

        let (mut responses, pending) =
            run_phase_one(&mut *self.store, self.config, &self.event_loop, &commands, &blobs);

        let out_blobs = if pending.is_empty() {
            Vec::new()
        } else {
            run_phase_two(&*self.store, self.config, &self.event_loop, pending, &mut responses)
        };

        let json = serde_json::to_string(&Value::Array(responses))
            .map_err(|e| format!("failed to serialize response: {e}"))?;
        Ok((json, out_blobs))
    }
}

/// Free-standing entry point matching the contract a host transport calls:
/// `dispatch(batch_json, blobs) -> (response_json, blobs)`.
pub fn dispatch(store: &mut GraphStore, config: &Config, batch_json: &str, blobs: Vec<Vec<u8>>) -> (String, Vec<Vec<u8>>) {
    match Dispatcher::new(store, config) {
        Ok(mut dispatcher) => dispatcher.dispatch(batch_json, blobs),
        Err(e) => (batch_error_json(&e.to_string()), Vec::new()),
    }
}

fn batch_error_json(msg: &str) -> String {
    let body = CommandResponseBody::error(StatusCode::Error, msg.to_string());
    serde_json::to_string(&Value::Array(vec![response::wrap("BatchError", body)])).unwrap_or_else(|_| "[]".to_string())
}

// --- Phase 1: construct graph operations --------------------------------

fn run_phase_one(
    store: &mut GraphStore,
    config: &Config,
    event_loop: &EventLoop,
    commands: &[Command],
    blobs: &[Vec<u8>],
) -> (Vec<Value>, Vec<PendingFind>) {
    let mut h = QueryHandler::new(store);
    if let Err(e) = h.tx_begin(true) {
        return (vec![response::wrap("BatchError", CommandResponseBody::error(StatusCode::Exception, e.to_string()))], Vec::new());
    }

    let mut next_synth_ref: i64 = -1;
    let mut responses = Vec::with_capacity(commands.len());
    let mut pending = Vec::new();
    let mut blob_cursor = 0usize;

    for (idx, cmd) in commands.iter().enumerate() {
        let blob = if cmd.blobs_needed() > 0 {
            let b = blobs.get(blob_cursor).cloned();
            blob_cursor += 1;
            b
        } else {
            None
        };

        match dispatch_one(&mut h, cmd, idx, blob, &mut next_synth_ref, event_loop, config) {
            Ok((body, maybe_pending)) => {
                responses.push(response::wrap(cmd.name(), body));
                if let Some(p) = maybe_pending {
                    pending.push(p);
                }
            }
            Err(err) => {
                let status = err.status();
                warn!(command = cmd.name(), error = %err, "command failed, aborting batch");
                responses.push(response::wrap(cmd.name(), CommandResponseBody::error(status, err.to_string())));
                h.tx_abort();
                return (responses, Vec::new());
            }
        }
    }

    h.tx_commit();
    (responses, pending)
}

#[allow(clippy::too_many_arguments)]
fn dispatch_one(
    h: &mut QueryHandler,
    cmd: &Command,
    response_index: usize,
    blob: Option<Vec<u8>>,
    next_synth_ref: &mut i64,
    event_loop: &EventLoop,
    config: &Config,
) -> Result<(CommandResponseBody, Option<PendingFind>), CoreError> {
    match cmd {
        Command::AddNode(p) | Command::AddEntity(p) => {
            let (status, payload) = process_add_node(h, p)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::AddEdge(p) | Command::AddConnection(p) => {
            let (status, payload) = process_add_edge(h, p)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::QueryNode(p) => {
            let (status, payload) = process_query_node(h, p)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::QueryEdge(p) => {
            let (status, payload) = process_query_edge(h, p)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::UpdateNode(p) => {
            let (status, payload) = process_update_node(h, p)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::UpdateEdge(p) => {
            let (status, payload) = process_update_edge(h, p)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::AddImage(p) => {
            let blob = blob
                .ok_or_else(|| CoreError::Dispatch(DispatchError::SchemaInvalid("AddImage requires one attached blob".into())))?;
            let (status, payload) = process_add_image(h, p, blob, event_loop)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::AddVideo(p) => {
            let blob = blob
                .ok_or_else(|| CoreError::Dispatch(DispatchError::SchemaInvalid("AddVideo requires one attached blob".into())))?;
            let (status, payload) = process_add_video(h, p, blob, event_loop, config, response_index)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::AddBlob(p) => {
            let blob = blob
                .ok_or_else(|| CoreError::Dispatch(DispatchError::SchemaInvalid("AddBlob requires one attached blob".into())))?;
            let (status, payload) = process_add_blob(h, p, blob)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::UpdateImage(p) => {
            let (status, payload) = process_update_media(h, "image", p.ref_id, &p.constraints, &p.properties, &p.remove_props)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::UpdateVideo(p) => {
            let (status, payload) = process_update_media(h, "video", p.ref_id, &p.constraints, &p.properties, &p.remove_props)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::UpdateBlob(p) => {
            let (status, payload) = process_update_media(h, "blob", p.ref_id, &p.constraints, &p.properties, &p.remove_props)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::UpdateBoundingBox(p) => {
            let (status, payload) = process_update_media(h, "region", p.ref_id, &p.constraints, &p.properties, &p.remove_props)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::FindImage(p) => {
            let (status, payload, pending) = process_find_image(h, response_index, p)?;
            Ok((CommandResponseBody::with_status(status, payload), pending))
        }
        Command::FindVideo(p) => {
            let (status, payload, pending) = process_find_video(h, response_index, p)?;
            Ok((CommandResponseBody::with_status(status, payload), pending))
        }
        Command::FindBlob(p) => {
            let (status, payload, pending) = process_find_blob(h, response_index, p)?;
            Ok((CommandResponseBody::with_status(status, payload), pending))
        }
        Command::AddBoundingBox(p) => {
            let (status, payload) = process_add_bounding_box(h, p, next_synth_ref)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::FindBoundingBox(p) => process_find_bounding_box(h, response_index, p, next_synth_ref),
        Command::AddDescriptorSet(p) => {
            let (status, payload) = process_add_descriptor_set(h, p)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::AddDescriptor(p) => {
            let (status, payload) = process_add_descriptor(h, p, next_synth_ref)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::FindDescriptor(p) => {
            let (status, payload) = process_find_descriptor(h, p, next_synth_ref)?;
            Ok((CommandResponseBody::with_status(status, payload), None))
        }
        Command::ClassifyDescriptor(p) => {
            let body = process_classify_descriptor(h, p, next_synth_ref)?;
            Ok((body, None))
        }
    }
}

fn json_properties_to_map(props: &PropertiesJson) -> Result<PropertyMap, DispatchError> {
    let mut map = PropertyMap::new();
    for (k, v) in props {
        map.insert(k.clone(), json_to_property_value(v)?);
    }
    Ok(map)
}

fn build_result_spec(results: &ResultsJson) -> ResultSpec {
    ResultSpec {
        shape: results.list.clone().map(ResultShape::List),
        limit: results.limit,
        sort_key: results.sort_key.clone(),
        blob: results.blob.unwrap_or(false),
    }
}

fn build_query_node_spec(
    tag: Option<String>,
    constraints_json: &ConstraintsJson,
    link_json: &Option<LinkJson>,
    results: &ResultsJson,
    unique: bool,
) -> Result<QueryNodeSpec, DispatchError> {
    let constraints = parse_constraints(constraints_json)?;
    let link = link_json.as_ref().map(|l| LinkSpec {
        ref_id: l.ref_id,
        edge_tag: l.class.as_ref().map(|c| EdgeType::new(c.clone())),
        direction: Direction::parse(&l.direction).unwrap_or(Direction::Any),
    });
    Ok(QueryNodeSpec { tag: tag.map(Tag::new), constraints, link, result: build_result_spec(results), unique })
}

fn extract_node_ids(payload: &ResultPayload) -> Vec<NodeId> {
    payload
        .entities
        .as_ref()
        .map(|rows| rows.iter().filter_map(|r| match r {
            ResultRow::Id(id) => Some(NodeId::new(*id)),
            _ => None,
        }).collect())
        .unwrap_or_default()
}

fn rect_overlaps(rx: i64, ry: i64, rw: i64, rh: i64, qx: i64, qy: i64, qw: i64, qh: i64) -> bool {
    rx < qx + qw && qx < rx + rw && ry < qy + qh && qy < ry + rh
}

// --- Generic graph primitives --------------------------------------------

fn process_add_node(h: &mut QueryHandler, params: &AddNodeParams) -> Result<(StatusCode, ResultPayload), CoreError> {
    let props = json_properties_to_map(&params.properties)?;
    let guard = if params.constraints.is_empty() {
        None
    } else {
        let constraints = parse_constraints(&params.constraints)?;
        Some(QueryNodeSpec {
            tag: Some(Tag::new(params.tag.clone())),
            constraints,
            link: None,
            result: ResultSpec { shape: Some(ResultShape::NodeId), ..Default::default() },
            unique: false,
        })
    };
    h.add_node(params.ref_id, Tag::new(params.tag.clone()), props, guard).map_err(CoreError::from)
}

fn process_add_edge(h: &mut QueryHandler, params: &AddEdgeParams) -> Result<(StatusCode, ResultPayload), CoreError> {
    let props = json_properties_to_map(&params.properties)?;
    h.add_edge(params.ref_id, params.src_ref, params.dst_ref, EdgeType::new(params.tag.clone()), props)
        .map_err(CoreError::from)
}

fn process_query_node(h: &mut QueryHandler, params: &QueryNodeParams) -> Result<(StatusCode, ResultPayload), CoreError> {
    let spec = build_query_node_spec(params.tag.clone(), &params.constraints, &params.link, &params.results, params.unique)?;
    h.query_node(params.ref_id, spec).map_err(CoreError::from)
}

fn process_query_edge(h: &mut QueryHandler, params: &QueryEdgeParams) -> Result<(StatusCode, ResultPayload), CoreError> {
    let constraints = parse_constraints(&params.constraints)?;
    let spec = QueryEdgeSpec {
        tag: params.tag.clone().map(EdgeType::new),
        src_ref: params.src_ref,
        dst_ref: params.dst_ref,
        constraints,
        result: build_result_spec(&params.results),
        unique: params.unique,
    };
    h.query_edge(params.ref_id, spec).map_err(CoreError::from)
}

fn process_update_node(h: &mut QueryHandler, params: &UpdateNodeParams) -> Result<(StatusCode, ResultPayload), CoreError> {
    let sets = json_properties_to_map(&params.properties)?;
    let target = match params.ref_id {
        Some(r) => NodeTarget::Ref(r),
        None => {
            let constraints = parse_constraints(&params.constraints)?;
            NodeTarget::Query(QueryNodeSpec {
                tag: params.tag.clone().map(Tag::new),
                constraints,
                link: None,
                result: ResultSpec::default(),
                unique: false,
            })
        }
    };
    h.update_node(target, sets, params.remove_props.clone()).map_err(CoreError::from)
}

fn process_update_edge(h: &mut QueryHandler, params: &UpdateEdgeParams) -> Result<(StatusCode, ResultPayload), CoreError> {
    let sets = json_properties_to_map(&params.properties)?;
    let target = match params.ref_id {
        Some(r) => EdgeTarget::Ref(r),
        None => {
            let constraints = parse_constraints(&params.constraints)?;
            EdgeTarget::Query(QueryEdgeSpec {
                tag: params.tag.clone().map(EdgeType::new),
                src_ref: params.src_ref,
                dst_ref: params.dst_ref,
                constraints,
                result: ResultSpec::default(),
                unique: false,
            })
        }
    };
    h.update_edge(target, sets, params.remove_props.clone()).map_err(CoreError::from)
}

/// Shared by `UpdateImage`/`UpdateVideo`/`UpdateBlob`/`UpdateBoundingBox`:
/// all four just update-by-ref-or-tag-and-constraints against a fixed tag.
fn process_update_media(
    h: &mut QueryHandler,
    tag: &str,
    ref_id: Option<i64>,
    constraints_json: &ConstraintsJson,
    properties: &PropertiesJson,
    remove_props: &[String],
) -> Result<(StatusCode, ResultPayload), CoreError> {
    let sets = json_properties_to_map(properties)?;
    let target = match ref_id {
        Some(r) => NodeTarget::Ref(r),
        None => {
            let constraints = parse_constraints(constraints_json)?;
            NodeTarget::Query(QueryNodeSpec {
                tag: Some(Tag::new(tag)),
                constraints,
                link: None,
                result: ResultSpec::default(),
                unique: false,
            })
        }
    };
    h.update_node(target, sets, remove_props.to_vec()).map_err(CoreError::from)
}

// --- Media-bearing commands ----------------------------------------------

fn run_media_object_to_completion(obj: MediaObject, event_loop: &EventLoop, id: &str) -> Result<MediaObject, MediaError> {
    let mut result = event_loop.run_batch(vec![(0, id.to_string(), obj)]);
    match result.completed.pop() {
        Some((_, outcome)) => outcome,
        None => Err(MediaError::Codec("event loop returned no result for a single-object batch".into())),
    }
}

fn process_add_image(
    h: &mut QueryHandler,
    params: &AddImageParams,
    blob: Vec<u8>,
    event_loop: &EventLoop,
) -> Result<(StatusCode, ResultPayload), CoreError> {
    let format = Format::parse(&params.format)
        .ok_or_else(|| CoreError::Dispatch(DispatchError::SchemaInvalid(format!("unknown image format '{}'", params.format))))?;
    let mut image = Image::decode(format, &blob).map_err(CoreError::from)?;
    for op in &params.operations {
        image.enqueue(op.clone()).map_err(CoreError::from)?;
    }
    let processed = run_media_object_to_completion(MediaObject::Image(Box::new(image)), event_loop, "add-image")
        .map_err(CoreError::from)?;
    let bytes = match processed {
        MediaObject::Image(img) => img.encode(format).map_err(CoreError::from)?,
        MediaObject::Video(_) => return Err(CoreError::Dispatch(DispatchError::SchemaInvalid("internal: image pipeline produced a video".into()))),
    };

    let mut props = json_properties_to_map(&params.properties)?;
    props.insert("_format".to_string(), PropertyValue::String(params.format.clone()));
    props.insert("_blob".to_string(), PropertyValue::Blob(bytes));
    h.add_node(params.ref_id, Tag::new("image"), props, None).map_err(CoreError::from)
}

fn process_add_video(
    h: &mut QueryHandler,
    params: &AddVideoParams,
    blob: Vec<u8>,
    event_loop: &EventLoop,
    config: &Config,
    unique_key: usize,
) -> Result<(StatusCode, ResultPayload), CoreError> {
    let in_path = config.temp_dir.join(format!("video-in-{}-{}.{}", std::process::id(), unique_key, params.format));
    std::fs::write(&in_path, &blob).map_err(|e| CoreError::Media(MediaError::Codec(e.to_string())))?;

    let mut video = Video::new(in_path, config.temp_dir.clone());
    for op in &params.operations {
        video.enqueue(op.clone(), Window::unbounded());
    }
    let processed = run_media_object_to_completion(MediaObject::Video(Box::new(video)), event_loop, "add-video")
        .map_err(CoreError::from)?;
    let bytes = match processed {
        MediaObject::Video(v) => v.encode().map_err(CoreError::from)?,
        MediaObject::Image(_) => return Err(CoreError::Dispatch(DispatchError::SchemaInvalid("internal: video pipeline produced an image".into()))),
    };

    let mut props = json_properties_to_map(&params.properties)?;
    props.insert("_format".to_string(), PropertyValue::String(params.format.clone()));
    props.insert("_blob".to_string(), PropertyValue::Blob(bytes));
    h.add_node(params.ref_id, Tag::new("video"), props, None).map_err(CoreError::from)
}

fn process_add_blob(h: &mut QueryHandler, params: &AddBlobParams, blob: Vec<u8>) -> Result<(StatusCode, ResultPayload), CoreError> {
    let mut props = json_properties_to_map(&params.properties)?;
    props.insert("_blob".to_string(), PropertyValue::Blob(blob));
    h.add_node(params.ref_id, Tag::new("blob"), props, None).map_err(CoreError::from)
}

fn process_find_image(
    h: &mut QueryHandler,
    response_index: usize,
    params: &FindImageParams,
) -> Result<(StatusCode, ResultPayload, Option<PendingFind>), CoreError> {
    let spec = build_query_node_spec(Some("image".to_string()), &params.constraints, &params.link, &params.results, params.unique)?;
    let (status, payload) = h.query_node(params.ref_id, spec.clone()).map_err(CoreError::from)?;
    if status != StatusCode::Success || !params.results.blob.unwrap_or(true) {
        return Ok((status, payload, None));
    }

    let id_spec = QueryNodeSpec {
        result: ResultSpec { shape: Some(ResultShape::NodeId), ..spec.result.clone() },
        ..spec
    };
    let (_, id_payload) = h.query_node(None, id_spec).map_err(CoreError::from)?;
    let ids = extract_node_ids(&id_payload);
    if ids.is_empty() {
        return Ok((status, payload, None));
    }

    let target_format = params.format.as_deref().and_then(Format::parse).unwrap_or(Format::Png);
    let items = ids.into_iter().map(|node_id| FindItem { node_id, ops: params.operations.clone() }).collect();
    Ok((status, payload, Some(PendingFind { response_index, kind: PendingKind::Image { target_format }, items })))
}

fn process_find_video(
    h: &mut QueryHandler,
    response_index: usize,
    params: &FindVideoParams,
) -> Result<(StatusCode, ResultPayload, Option<PendingFind>), CoreError> {
    let spec = build_query_node_spec(Some("video".to_string()), &params.constraints, &params.link, &params.results, params.unique)?;
    let (status, payload) = h.query_node(params.ref_id, spec.clone()).map_err(CoreError::from)?;
    if status != StatusCode::Success || !params.results.blob.unwrap_or(true) {
        return Ok((status, payload, None));
    }

    let id_spec = QueryNodeSpec {
        result: ResultSpec { shape: Some(ResultShape::NodeId), ..spec.result.clone() },
        ..spec
    };
    let (_, id_payload) = h.query_node(None, id_spec).map_err(CoreError::from)?;
    let ids = extract_node_ids(&id_payload);
    if ids.is_empty() {
        return Ok((status, payload, None));
    }

    let items = ids.into_iter().map(|node_id| FindItem { node_id, ops: params.operations.clone() }).collect();
    Ok((status, payload, Some(PendingFind { response_index, kind: PendingKind::Video, items })))
}

fn process_find_blob(
    h: &mut QueryHandler,
    response_index: usize,
    params: &FindBlobParams,
) -> Result<(StatusCode, ResultPayload, Option<PendingFind>), CoreError> {
    let spec = build_query_node_spec(Some("blob".to_string()), &params.constraints, &params.link, &params.results, false)?;
    let (status, payload) = h.query_node(params.ref_id, spec.clone()).map_err(CoreError::from)?;
    if status != StatusCode::Success || !params.results.blob.unwrap_or(true) {
        return Ok((status, payload, None));
    }

    let id_spec = QueryNodeSpec {
        result: ResultSpec { shape: Some(ResultShape::NodeId), ..spec.result.clone() },
        ..spec
    };
    let (_, id_payload) = h.query_node(None, id_spec).map_err(CoreError::from)?;
    let ids = extract_node_ids(&id_payload);
    if ids.is_empty() {
        return Ok((status, payload, None));
    }

    let items = ids.into_iter().map(|node_id| FindItem { node_id, ops: Vec::new() }).collect();
    Ok((status, payload, Some(PendingFind { response_index, kind: PendingKind::Blob, items })))
}

// --- Bounding boxes --------------------------------------------------------

fn process_add_bounding_box(
    h: &mut QueryHandler,
    params: &AddBoundingBoxParams,
    next_synth_ref: &mut i64,
) -> Result<(StatusCode, ResultPayload), CoreError> {
    let mut props = json_properties_to_map(&params.properties)?;
    props.insert("x".to_string(), PropertyValue::Integer(params.rectangle.x));
    props.insert("y".to_string(), PropertyValue::Integer(params.rectangle.y));
    props.insert("width".to_string(), PropertyValue::Integer(params.rectangle.width as i64));
    props.insert("height".to_string(), PropertyValue::Integer(params.rectangle.height as i64));

    let region_ref = params.ref_id.unwrap_or_else(|| {
        let r = *next_synth_ref;
        *next_synth_ref -= 1;
        r
    });
    let result = h.add_node(Some(region_ref), Tag::new("region"), props, None).map_err(CoreError::from)?;
    h.add_edge(None, region_ref, params.image_ref, EdgeType::new("region_of"), PropertyMap::new())
        .map_err(CoreError::from)?;
    Ok(result)
}

fn process_find_bounding_box(
    h: &mut QueryHandler,
    response_index: usize,
    params: &FindBoundingBoxParams,
    next_synth_ref: &mut i64,
) -> Result<(CommandResponseBody, Option<PendingFind>), CoreError> {
    let constraints = parse_constraints(&params.constraints)?;
    let mut alloc = || {
        let r = *next_synth_ref;
        *next_synth_ref -= 1;
        r
    };
    let list_ref = alloc();
    let ids_ref = alloc();
    let image_ref = alloc();

    let list_spec = QueryNodeSpec {
        tag: Some(Tag::new("region")),
        constraints: constraints.clone(),
        link: None,
        result: ResultSpec {
            shape: Some(ResultShape::List(vec!["x".into(), "y".into(), "width".into(), "height".into()])),
            limit: params.results.limit,
            sort_key: params.results.sort_key.clone(),
            blob: false,
        },
        unique: false,
    };
    let (status, list_payload) = h.query_node(Some(list_ref), list_spec).map_err(CoreError::from)?;
    if status != StatusCode::Success {
        return Ok((CommandResponseBody::with_status(status, ResultPayload::default()), None));
    }

    let ids_spec = QueryNodeSpec {
        tag: Some(Tag::new("region")),
        constraints: constraints.clone(),
        link: None,
        result: ResultSpec {
            shape: Some(ResultShape::NodeId),
            limit: params.results.limit,
            sort_key: params.results.sort_key.clone(),
            blob: false,
        },
        unique: false,
    };
    let (_, ids_payload) = h.query_node(Some(ids_ref), ids_spec).map_err(CoreError::from)?;

    let image_spec = QueryNodeSpec {
        tag: None,
        constraints: vec![],
        link: Some(LinkSpec { ref_id: ids_ref, edge_tag: Some(EdgeType::new("region_of")), direction: Direction::Out }),
        result: ResultSpec { shape: Some(ResultShape::NodeId), ..Default::default() },
        unique: false,
    };
    let (_, image_id_payload) = h.query_node(Some(image_ref), image_spec).map_err(CoreError::from)?;
    let image_ids = extract_node_ids(&image_id_payload);

    let rows = list_payload.entities.unwrap_or_default();
    let mut entities_json = Vec::new();
    let mut find_items = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        let ResultRow::Properties(map) = row else { continue };
        let rx = map.get("x").and_then(|v| v.as_integer()).unwrap_or(0);
        let ry = map.get("y").and_then(|v| v.as_integer()).unwrap_or(0);
        let rw = map.get("width").and_then(|v| v.as_integer()).unwrap_or(0);
        let rh = map.get("height").and_then(|v| v.as_integer()).unwrap_or(0);

        if let Some(rect) = params.rectangle {
            if !rect_overlaps(rx, ry, rw, rh, rect.x, rect.y, rect.width as i64, rect.height as i64) {
                continue;
            }
        }

        entities_json.push(serde_json::json!({ "_coordinates": { "x": rx, "y": ry, "width": rw, "height": rh } }));
        if let Some(&image_id) = image_ids.get(idx) {
            find_items.push(FindItem {
                node_id: image_id,
                ops: vec![Operation::Crop { x: rx.max(0) as u32, y: ry.max(0) as u32, width: rw.max(0) as u32, height: rh.max(0) as u32 }],
            });
        }
    }
    let _ = ids_payload;

    let status = if entities_json.is_empty() { StatusCode::Empty } else { StatusCode::Success };
    let body = CommandResponseBody::with_status(status, ResultPayload::default())
        .with_extra("entities", Value::Array(entities_json));

    let blob_wanted = params.results.blob.unwrap_or(true);
    let pending = if blob_wanted && !find_items.is_empty() {
        Some(PendingFind { response_index, kind: PendingKind::Image { target_format: Format::Png }, items: find_items })
    } else {
        None
    };
    Ok((body, pending))
}

// --- Descriptors -----------------------------------------------------------

fn process_add_descriptor_set(h: &mut QueryHandler, params: &AddDescriptorSetParams) -> Result<(StatusCode, ResultPayload), CoreError> {
    let mut props = json_properties_to_map(&params.properties)?;
    props.insert("name".to_string(), PropertyValue::String(params.name.clone()));
    props.insert("dimensions".to_string(), PropertyValue::Integer(params.dimensions as i64));
    h.add_node(params.ref_id, Tag::new("descriptor_set"), props, None).map_err(CoreError::from)
}

fn process_add_descriptor(
    h: &mut QueryHandler,
    params: &AddDescriptorParams,
    next_synth_ref: &mut i64,
) -> Result<(StatusCode, ResultPayload), CoreError> {
    let mut props = json_properties_to_map(&params.properties)?;
    if let Some(label) = &params.label {
        props.insert("label".to_string(), PropertyValue::String(label.clone()));
    }
    let vector_json = serde_json::to_string(&params.vector)
        .map_err(|e| CoreError::Dispatch(DispatchError::SchemaInvalid(e.to_string())))?;
    props.insert("_vector".to_string(), PropertyValue::String(vector_json));

    let descriptor_ref = params.ref_id.unwrap_or_else(|| {
        let r = *next_synth_ref;
        *next_synth_ref -= 1;
        r
    });
    let result = h.add_node(Some(descriptor_ref), Tag::new("descriptor"), props, None).map_err(CoreError::from)?;
    h.add_edge(None, descriptor_ref, params.set_ref, EdgeType::new("descriptor_of"), PropertyMap::new())
        .map_err(CoreError::from)?;
    Ok(result)
}

fn l2_distance(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    Some(a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt())
}

/// Fetches `(label, vector)` pairs for every descriptor in `set_ref` (or, if
/// `None`, every descriptor) matching `constraints_json`, decoding each
/// descriptor's `_vector` property back from its JSON-encoded text.
fn fetch_descriptor_rows(
    h: &mut QueryHandler,
    set_ref: Option<i64>,
    constraints_json: &ConstraintsJson,
    next_synth_ref: &mut i64,
) -> Result<Vec<(Option<String>, Vec<f64>)>, CoreError> {
    let constraints = parse_constraints(constraints_json)?;
    let link = set_ref.map(|r| LinkSpec { ref_id: r, edge_tag: Some(EdgeType::new("descriptor_of")), direction: Direction::Out });
    let spec = QueryNodeSpec {
        tag: Some(Tag::new("descriptor")),
        constraints,
        link,
        result: ResultSpec { shape: Some(ResultShape::List(vec!["label".into(), "_vector".into()])), limit: None, sort_key: None, blob: false },
        unique: false,
    };
    let synth = {
        let r = *next_synth_ref;
        *next_synth_ref -= 1;
        r
    };
    let (_, payload) = h.query_node(Some(synth), spec).map_err(CoreError::from)?;
    let mut out = Vec::new();
    for row in payload.entities.unwrap_or_default() {
        let ResultRow::Properties(map) = row else { continue };
        let label = map.get("label").and_then(|v| v.as_string()).map(|s| s.to_string());
        let vector = map
            .get("_vector")
            .and_then(|v| v.as_string())
            .and_then(|s| serde_json::from_str::<Vec<f64>>(s).ok());
        if let Some(v) = vector {
            out.push((label, v));
        }
    }
    Ok(out)
}

fn process_find_descriptor(
    h: &mut QueryHandler,
    params: &FindDescriptorParams,
    next_synth_ref: &mut i64,
) -> Result<(StatusCode, ResultPayload), CoreError> {
    if let Some(query_vec) = &params.vector {
        let rows = fetch_descriptor_rows(h, params.set_ref, &params.constraints, next_synth_ref)?;
        let mut scored: Vec<(f64, Option<String>)> = rows
            .into_iter()
            .filter_map(|(label, vector)| l2_distance(query_vec, &vector).map(|d| (d, label)))
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        let k = params.k_neighbors.unwrap_or(1).max(1);
        scored.truncate(k);

        let rows_out: Vec<ResultRow> = scored
            .into_iter()
            .map(|(distance, label)| {
                let mut map = std::collections::BTreeMap::new();
                if let Some(l) = label {
                    map.insert("label".to_string(), PropertyValue::String(l));
                }
                map.insert("_distance".to_string(), PropertyValue::Float(distance));
                ResultRow::Properties(map)
            })
            .collect();
        let status = if rows_out.is_empty() { StatusCode::Empty } else { StatusCode::Success };
        Ok((status, ResultPayload { entities: Some(rows_out), ..Default::default() }))
    } else {
        let constraints = parse_constraints(&params.constraints)?;
        let link = params.set_ref.map(|r| LinkSpec { ref_id: r, edge_tag: Some(EdgeType::new("descriptor_of")), direction: Direction::Out });
        let spec = QueryNodeSpec {
            tag: Some(Tag::new("descriptor")),
            constraints,
            link,
            result: build_result_spec(&params.results),
            unique: false,
        };
        h.query_node(params.ref_id, spec).map_err(CoreError::from)
    }
}

fn process_classify_descriptor(
    h: &mut QueryHandler,
    params: &ClassifyDescriptorParams,
    next_synth_ref: &mut i64,
) -> Result<CommandResponseBody, CoreError> {
    let rows = fetch_descriptor_rows(h, Some(params.set_ref), &ConstraintsJson::new(), next_synth_ref)?;
    let nearest = rows
        .into_iter()
        .filter_map(|(label, vector)| l2_distance(&params.vector, &vector).map(|d| (d, label)))
        .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    match nearest {
        Some((distance, label)) => {
            let mut body = CommandResponseBody::success(ResultPayload::default());
            body = body.with_extra("label", label.map(Value::from).unwrap_or(Value::Null));
            body = body.with_extra("distance", serde_json::json!(distance));
            Ok(body)
        }
        None => Ok(CommandResponseBody::with_status(StatusCode::Empty, ResultPayload::default())),
    }
}

// --- Phase 2: construct response --------------------------------------------

fn run_phase_two(
    store: &GraphStore,
    config: &Config,
    event_loop: &EventLoop,
    pending: Vec<PendingFind>,
    responses: &mut [Value],
) -> Vec<Vec<u8>> {
    let mut out_blobs = Vec::new();
    for find in pending {
        let response_index = find.response_index;
        match materialize_find(store, config, event_loop, find) {
            Ok(bytes_list) => out_blobs.extend(bytes_list),
            Err(msg) => {
                if let Some(resp) = responses.get_mut(response_index) {
                    mark_error(resp, &msg);
                }
            }
        }
    }
    out_blobs
}

fn mark_error(resp: &mut Value, msg: &str) {
    if let Value::Object(map) = resp {
        if let Some(body) = map.values_mut().next() {
            if let Value::Object(body_map) = body {
                body_map.insert("status".to_string(), Value::from(StatusCode::Exception.code()));
                body_map.insert("info".to_string(), Value::from(msg.to_string()));
            }
        }
    }
}

fn materialize_find(store: &GraphStore, config: &Config, event_loop: &EventLoop, find: PendingFind) -> Result<Vec<Vec<u8>>, String> {
    match find.kind {
        PendingKind::Blob => {
            let mut out = Vec::with_capacity(find.items.len());
            for item in &find.items {
                let node = store.get_node(item.node_id).ok_or("blob node vanished after commit")?;
                let bytes = node.get_property("_blob").and_then(|v| v.as_blob()).ok_or("node has no stored blob")?;
                out.push(bytes.to_vec());
            }
            Ok(out)
        }
        PendingKind::Image { target_format } => {
            let mut objects = Vec::with_capacity(find.items.len());
            for (i, item) in find.items.iter().enumerate() {
                let node = store.get_node(item.node_id).ok_or("image node vanished after commit")?;
                let stored_format = node
                    .get_property("_format")
                    .and_then(|v| v.as_string())
                    .and_then(Format::parse)
                    .unwrap_or(Format::Png);
                let bytes = node.get_property("_blob").and_then(|v| v.as_blob()).ok_or("node has no stored blob")?;
                let mut image = Image::decode(stored_format, bytes).map_err(|e| e.to_string())?;
                for op in &item.ops {
                    image.enqueue(op.clone()).map_err(|e| e.to_string())?;
                }
                objects.push((i, format!("find-image-{i}"), MediaObject::Image(Box::new(image))));
            }
            let result = event_loop.run_batch(objects);
            let mut completed = result.completed;
            completed.sort_by_key(|(idx, _)| *idx);
            let mut out = Vec::with_capacity(completed.len());
            for (_, outcome) in completed {
                match outcome {
                    Ok(MediaObject::Image(img)) => out.push(img.encode(target_format).map_err(|e| e.to_string())?),
                    Ok(MediaObject::Video(_)) => return Err("internal: image find produced a video".to_string()),
                    Err(e) => return Err(e.to_string()),
                }
            }
            Ok(out)
        }
        PendingKind::Video => {
            let mut objects = Vec::with_capacity(find.items.len());
            for (i, item) in find.items.iter().enumerate() {
                let node = store.get_node(item.node_id).ok_or("video node vanished after commit")?;
                let bytes = node.get_property("_blob").and_then(|v| v.as_blob()).ok_or("node has no stored blob")?;
                let in_path = config.temp_dir.join(format!("find-video-{}-{}.mp4", find.response_index, i));
                std::fs::write(&in_path, bytes).map_err(|e| e.to_string())?;
                let mut video = Video::new(in_path, config.temp_dir.clone());
                for op in &item.ops {
                    video.enqueue(op.clone(), Window::unbounded());
                }
                objects.push((i, format!("find-video-{i}"), MediaObject::Video(Box::new(video))));
            }
            let result = event_loop.run_batch(objects);
            let mut completed = result.completed;
            completed.sort_by_key(|(idx, _)| *idx);
            let mut out = Vec::with_capacity(completed.len());
            for (_, outcome) in completed {
                match outcome {
                    Ok(MediaObject::Video(v)) => out.push(v.encode().map_err(|e| e.to_string())?),
                    Ok(MediaObject::Image(_)) => return Err("internal: video find produced an image".to_string()),
                    Err(e) => return Err(e.to_string()),
                }
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let buf = image::RgbImage::from_pixel(w, h, image::Rgb([120, 40, 40]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(buf)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn add_then_find_matches_on_constraint() {
        let mut store = GraphStore::new();
        let config = Config::default();
        let batch = r#"[
            {"AddNode":{"_ref":1,"tag":"Patient","properties":{"name":"Jane","age":70}}},
            {"QueryNode":{"tag":"Patient","constraints":{"age":[">=",65]},"results":{"list":["name","age"]}}}
        ]"#;
        let (response_json, blobs) = dispatch(&mut store, &config, batch, Vec::new());
        assert!(blobs.is_empty());
        let response: Value = serde_json::from_str(&response_json).unwrap();
        let entries = response.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["AddNode"]["status"], 0);
        let entities = entries[1]["QueryNode"]["entities"].as_array().unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0]["name"], "Jane");
    }

    #[test]
    fn duplicate_ref_aborts_batch() {
        let mut store = GraphStore::new();
        let config = Config::default();
        let batch = r#"[{"AddNode":{"_ref":1,"tag":"A"}}, {"AddNode":{"_ref":1,"tag":"A"}}]"#;
        let (response_json, _) = dispatch(&mut store, &config, batch, Vec::new());
        let response: Value = serde_json::from_str(&response_json).unwrap();
        let entries = response.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_ne!(entries[1]["AddNode"]["status"], 0);
        assert_eq!(store.node_count(), 0);
    }

    #[test]
    fn add_edge_with_missing_endpoints_aborts_batch() {
        let mut store = GraphStore::new();
        let config = Config::default();
        let batch = r#"[{"AddEdge":{"src":99,"dst":100,"tag":"Related"}}]"#;
        let (response_json, _) = dispatch(&mut store, &config, batch, Vec::new());
        let response: Value = serde_json::from_str(&response_json).unwrap();
        let entries = response.as_array().unwrap();
        assert_ne!(entries[0]["AddEdge"]["status"], 0);
        assert_eq!(store.edge_count(), 0);
    }

    #[test]
    fn add_image_with_crop_then_find_with_resize() {
        let mut store = GraphStore::new();
        let config = Config::default();

        let add_batch = r#"[{"AddImage":{"_ref":1,"format":"jpg","operations":[{"type":"crop","x":0,"y":0,"width":150,"height":150}],"properties":{"tag":"test"}}}]"#;
        let (response_json, _) = dispatch(&mut store, &config, add_batch, vec![png_bytes(300, 300)]);
        let response: Value = serde_json::from_str(&response_json).unwrap();
        assert_eq!(response[0]["AddImage"]["status"], 0);
        assert_eq!(store.node_count(), 1);

        let find_batch = r#"[{"FindImage":{"constraints":{"tag":["==","test"]},"operations":[{"type":"resize","height":100,"width":100}],"format":"png"}}]"#;
        let (response_json, blobs) = dispatch(&mut store, &config, find_batch, Vec::new());
        let response: Value = serde_json::from_str(&response_json).unwrap();
        assert_eq!(response[0]["FindImage"]["status"], 0);
        assert_eq!(blobs.len(), 1);
        let decoded = image::load_from_memory(&blobs[0]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 100));
    }

    #[test]
    fn rejects_a_blob_count_mismatch_as_a_hard_error() {
        let mut store = GraphStore::new();
        let config = Config::default();
        let batch = r#"[{"AddImage":{"format":"png","properties":{}}}]"#;
        let (response_json, blobs) = dispatch(&mut store, &config, batch, Vec::new());
        assert!(blobs.is_empty());
        let response: Value = serde_json::from_str(&response_json).unwrap();
        assert_ne!(response[0]["BatchError"]["status"], 0);
    }

    #[test]
    fn rect_overlap_detects_intersection() {
        assert!(rect_overlaps(50, 50, 100, 100, 0, 0, 200, 200));
        assert!(!rect_overlaps(500, 500, 10, 10, 0, 0, 200, 200));
    }
}
