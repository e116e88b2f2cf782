use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use gltf::binary::{Glb, Header};
use nalgebra::{Matrix4, Vector3};
use serde_json::Value;

use super::{Mesh, MeshRenderer, NodeId, SceneGraph};
use crate::reconcile::types::HIPS_BONE;

const GLB_MAGIC: &[u8; 4] = b"glTF";

/// glTF stores morph weights in `[0, 1]`; the scene model uses `[0, 100]`.
const WEIGHT_SCALE: f32 = 100.0;

/// Where exporters put morph target names: the mesh itself, or its first
/// primitive (UniVRM).
const TARGET_NAME_POINTERS: [&str; 2] =
    ["/extras/targetNames", "/primitives/0/extras/targetNames"];

enum Container {
    Glb { header: Header, bin: Option<Vec<u8>> },
    Json,
}

/// A scene graph loaded from a glTF/GLB document, keeping the source JSON so
/// mutated scales and weights can be written back.
pub struct LoadedScene {
    pub graph: SceneGraph,
    /// Synthetic root whose children are the document's scene root nodes.
    pub root: NodeId,
    json: Value,
    container: Container,
    gltf_indices: HashMap<NodeId, usize>,
}

impl LoadedScene {
    pub fn json(&self) -> &Value {
        &self.json
    }

    /// Index of the glTF node backing `id`; `None` for the synthetic root.
    pub fn gltf_index(&self, id: NodeId) -> Option<usize> {
        self.gltf_indices.get(&id).copied()
    }

    /// Copy dirty node scales into the JSON document, plus renderer weights for
    /// nodes whose weights were edited. Returns the number of glTF nodes that
    /// were updated.
    pub fn apply_to_json(&mut self) -> usize {
        let dirty: Vec<NodeId> = self.graph.dirty_nodes().collect();
        let Some(json_nodes) = self.json.get_mut("nodes").and_then(Value::as_array_mut) else {
            return 0;
        };

        let mut updated = 0;
        for id in dirty {
            let Some(json_node) = self
                .gltf_indices
                .get(&id)
                .and_then(|index| json_nodes.get_mut(*index))
            else {
                continue;
            };

            let node = self.graph.node(id);
            write_node_scale(json_node, &node.scale);
            // glTF requires a non-empty `weights` array when present.
            if self.graph.weights_dirty(id)
                && let Some(renderer) = node.renderers.first()
                && !renderer.weights().is_empty()
            {
                json_node["weights"] = Value::Array(
                    renderer
                        .weights()
                        .iter()
                        .map(|weight| Value::from(f64::from(weight / WEIGHT_SCALE)))
                        .collect(),
                );
            }
            updated += 1;
        }

        self.graph.clear_dirty();
        updated
    }

    /// Write the document (GLB or JSON, matching the input) after applying
    /// pending mutations.
    pub fn write(&mut self, output_path: &Path) -> Result<()> {
        let updated = self.apply_to_json();
        log::debug!("writing {} updated node(s) to {}", updated, output_path.display());

        let out = match &self.container {
            Container::Glb { header, bin } => {
                let json_bytes =
                    serde_json::to_vec(&self.json).context("failed to serialize glTF JSON")?;
                let glb = Glb {
                    header: header.clone(),
                    json: Cow::Owned(json_bytes),
                    bin: bin.as_deref().map(Cow::Borrowed),
                };
                let mut out = Vec::new();
                glb.to_writer(&mut out)
                    .context("failed to write output GLB")?;
                out
            }
            Container::Json => serde_json::to_vec_pretty(&self.json)
                .context("failed to serialize glTF JSON")?,
        };

        fs::write(output_path, out)
            .with_context(|| format!("failed to write output: {}", output_path.display()))?;
        Ok(())
    }
}

// ─── Loading ──────────────────────────────────────────────────────────────────

/// Load a `.glb` or `.gltf` file into a scene graph.
pub fn load_scene(path: &Path) -> Result<LoadedScene> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read input file: {}", path.display()))?;
    let fallback_name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("Scene");

    if bytes.starts_with(GLB_MAGIC) {
        let glb = Glb::from_slice(&bytes).context("input is not a valid GLB container")?;
        let json: Value = serde_json::from_slice(glb.json.as_ref())
            .context("failed to parse glTF JSON chunk")?;
        let bin = glb.bin.map(|chunk| chunk.into_owned());
        let mut scene = scene_from_json(json, fallback_name)?;
        scene.container = Container::Glb {
            header: glb.header,
            bin,
        };
        Ok(scene)
    } else {
        let json: Value = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse glTF JSON: {}", path.display()))?;
        scene_from_json(json, fallback_name)
    }
}

/// Build a scene graph from an already-parsed glTF JSON document.
pub fn scene_from_json(json: Value, fallback_name: &str) -> Result<LoadedScene> {
    let Some(json_nodes) = json.get("nodes").and_then(Value::as_array) else {
        bail!("glTF document has no nodes");
    };

    let meshes = collect_meshes(&json);
    let hips = find_hips_node(&json);

    let mut graph = SceneGraph::new();
    let root = graph.add_root(scene_root_name(&json, fallback_name));
    let mut gltf_indices = HashMap::new();
    let mut visited = HashSet::new();

    let mut stack: Vec<(usize, NodeId)> = scene_root_indices(&json, json_nodes)
        .into_iter()
        .rev()
        .map(|index| (index, root))
        .collect();

    while let Some((index, parent)) = stack.pop() {
        let Some(json_node) = json_nodes.get(index) else {
            log::warn!("glTF node index {} is out of range", index);
            continue;
        };
        if !visited.insert(index) {
            log::warn!("glTF node {} is referenced more than once; skipping", index);
            continue;
        }

        let name = json_node
            .get("name")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("Node{}", index));
        let id = graph.add_child(parent, name);
        gltf_indices.insert(id, index);

        let node = graph.node_mut(id);
        node.scale = read_node_scale(json_node);
        if hips == Some(index) {
            node.humanoid_bone = Some(HIPS_BONE.to_string());
        }
        node.extras = json_node
            .get("extras")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if let Some((mesh, default_weights)) = json_node
            .get("mesh")
            .and_then(Value::as_u64)
            .and_then(|mesh_index| meshes.get(mesh_index as usize))
        {
            let weights = json_node
                .get("weights")
                .and_then(read_weights)
                .or_else(|| default_weights.clone())
                .unwrap_or_else(|| vec![0.0; mesh.shape_keys.len()]);
            node.renderers
                .push(MeshRenderer::with_weights(Arc::clone(mesh), weights));
        }

        if let Some(children) = json_node.get("children").and_then(Value::as_array) {
            for child in children.iter().rev() {
                if let Some(child_index) = child.as_u64() {
                    stack.push((child_index as usize, id));
                }
            }
        }
    }

    Ok(LoadedScene {
        graph,
        root,
        json,
        container: Container::Json,
        gltf_indices,
    })
}

fn scene_root_name(json: &Value, fallback_name: &str) -> String {
    let scene_index = json.get("scene").and_then(Value::as_u64).unwrap_or(0) as usize;
    json.get("scenes")
        .and_then(Value::as_array)
        .and_then(|scenes| scenes.get(scene_index))
        .and_then(|scene| scene.get("name"))
        .and_then(Value::as_str)
        .or_else(|| json.pointer("/extensions/VRMC_vrm/meta/name").and_then(Value::as_str))
        .or_else(|| json.pointer("/extensions/VRM/meta/title").and_then(Value::as_str))
        .unwrap_or(fallback_name)
        .to_string()
}

/// Root node indices of the default scene, or every node no other node lists
/// as a child when the document declares no scenes.
fn scene_root_indices(json: &Value, json_nodes: &[Value]) -> Vec<usize> {
    let scene_index = json.get("scene").and_then(Value::as_u64).unwrap_or(0) as usize;
    if let Some(scene_nodes) = json
        .get("scenes")
        .and_then(Value::as_array)
        .and_then(|scenes| scenes.get(scene_index))
        .and_then(|scene| scene.get("nodes"))
        .and_then(Value::as_array)
    {
        return scene_nodes
            .iter()
            .filter_map(|index| index.as_u64().map(|value| value as usize))
            .collect();
    }

    let children: HashSet<usize> = json_nodes
        .iter()
        .filter_map(|node| node.get("children").and_then(Value::as_array))
        .flatten()
        .filter_map(|child| child.as_u64().map(|value| value as usize))
        .collect();
    (0..json_nodes.len())
        .filter(|index| !children.contains(index))
        .collect()
}

/// Meshes with their shape-key names and default weights.
///
/// The channel count is the larger of the morph target count and the name
/// list length. Channels without a usable name are left unnamed.
fn collect_meshes(json: &Value) -> Vec<(Arc<Mesh>, Option<Vec<f32>>)> {
    let Some(meshes) = json.get("meshes").and_then(Value::as_array) else {
        return Vec::new();
    };

    meshes
        .iter()
        .enumerate()
        .map(|(index, mesh)| {
            let name = mesh
                .get("name")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("Mesh{}", index));

            let target_count = mesh
                .pointer("/primitives/0/targets")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            let names = TARGET_NAME_POINTERS
                .iter()
                .find_map(|pointer| mesh.pointer(pointer).and_then(Value::as_array));
            let channel_count = target_count.max(names.map_or(0, Vec::len));
            let shape_keys = (0..channel_count)
                .map(|channel| {
                    names
                        .and_then(|names| names.get(channel))
                        .and_then(Value::as_str)
                        .filter(|name| !name.trim().is_empty())
                        .map(ToOwned::to_owned)
                })
                .collect();

            let default_weights = mesh.get("weights").and_then(read_weights);
            (
                Arc::new(Mesh::with_channels(name, shape_keys)),
                default_weights,
            )
        })
        .collect()
}

fn read_weights(value: &Value) -> Option<Vec<f32>> {
    value.as_array().map(|weights| {
        weights
            .iter()
            .map(|weight| weight.as_f64().unwrap_or(0.0) as f32 * WEIGHT_SCALE)
            .collect()
    })
}

fn read_matrix(node: &Value) -> Option<Matrix4<f32>> {
    let matrix = node.get("matrix").and_then(Value::as_array)?;
    if matrix.len() != 16 {
        return None;
    }
    let values: Vec<f32> = matrix
        .iter()
        .map(|value| value.as_f64().unwrap_or(0.0) as f32)
        .collect();
    Some(Matrix4::from_column_slice(&values))
}

fn read_node_scale(node: &Value) -> Vector3<f32> {
    if let Some(matrix) = read_matrix(node) {
        return Vector3::new(
            matrix.fixed_view::<3, 1>(0, 0).norm(),
            matrix.fixed_view::<3, 1>(0, 1).norm(),
            matrix.fixed_view::<3, 1>(0, 2).norm(),
        );
    }

    node.get("scale")
        .and_then(Value::as_array)
        .filter(|scale| scale.len() == 3)
        .map(|scale| {
            Vector3::new(
                scale[0].as_f64().unwrap_or(1.0) as f32,
                scale[1].as_f64().unwrap_or(1.0) as f32,
                scale[2].as_f64().unwrap_or(1.0) as f32,
            )
        })
        .unwrap_or_else(|| Vector3::new(1.0, 1.0, 1.0))
}

/// Write a local scale back, rescaling the basis columns for matrix nodes.
fn write_node_scale(node: &mut Value, scale: &Vector3<f32>) {
    if let Some(mut matrix) = read_matrix(node) {
        let current = read_node_scale(node);
        for axis in 0..3 {
            if current[axis] > f32::EPSILON {
                let ratio = scale[axis] / current[axis];
                let mut column = matrix.fixed_view_mut::<3, 1>(0, axis);
                column *= ratio;
            }
        }
        node["matrix"] = Value::Array(
            matrix
                .as_slice()
                .iter()
                .map(|value| Value::from(f64::from(*value)))
                .collect(),
        );
        return;
    }

    node["scale"] = Value::Array(vec![
        Value::from(f64::from(scale.x)),
        Value::from(f64::from(scale.y)),
        Value::from(f64::from(scale.z)),
    ]);
}

/// Node index of the humanoid hips bone, from a VRM 1.0 or VRM 0.x extension.
fn find_hips_node(json: &Value) -> Option<usize> {
    let vrm1 = json
        .pointer("/extensions/VRMC_vrm/humanoid/humanBones")
        .and_then(|bones| bones.get(HIPS_BONE))
        .and_then(|bone| bone.get("node"))
        .and_then(Value::as_u64);

    vrm1.or_else(|| {
        json.pointer("/extensions/VRM/humanoid/humanBones")
            .and_then(Value::as_array)?
            .iter()
            .find(|bone| bone.get("bone").and_then(Value::as_str) == Some(HIPS_BONE))
            .and_then(|bone| bone.get("node"))
            .and_then(Value::as_u64)
    })
    .map(|index| index as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avatar_document() -> Value {
        serde_json::json!({
            "scene": 0,
            "scenes": [{"name": "Avatar", "nodes": [0, 3]}],
            "nodes": [
                {"name": "Armature", "children": [1]},
                {"name": "Hips", "children": [2], "scale": [1.0, 1.0, 1.0]},
                {"name": "Chest", "scale": [1.2, 1.0, 1.0]},
                {"name": "Body", "mesh": 0, "weights": [0.4, 0.0]}
            ],
            "meshes": [{
                "name": "Body_base",
                "extras": {"targetNames": ["Smile", "Blink"]},
                "primitives": [{"attributes": {}, "targets": [{}, {}]}]
            }],
            "extensions": {
                "VRMC_vrm": {"humanoid": {"humanBones": {"hips": {"node": 1}}}}
            }
        })
    }

    #[test]
    fn given_avatar_document_when_loading_then_hierarchy_roles_and_weights_are_built() {
        let scene = scene_from_json(avatar_document(), "fallback").expect("load scene");
        let graph = &scene.graph;

        assert_eq!(graph.name(scene.root), "Avatar");
        let top: Vec<&str> = graph
            .children(scene.root)
            .iter()
            .map(|id| graph.name(*id))
            .collect();
        assert_eq!(top, vec!["Armature", "Body"]);

        let armature = graph.children(scene.root)[0];
        let hips = graph.children(armature)[0];
        assert_eq!(graph.node(hips).humanoid_bone.as_deref(), Some("hips"));

        let chest = graph.children(hips)[0];
        assert!((graph.node(chest).scale.x - 1.2).abs() < 1e-6);

        let body = graph.children(scene.root)[1];
        let renderer = &graph.node(body).renderers[0];
        assert_eq!(renderer.mesh_name(), "Body_base");
        assert_eq!(renderer.shape_key_name(1), Some("Blink"));
        assert!((renderer.weight(0).expect("weight") - 40.0).abs() < 1e-4);
        assert_eq!(scene.gltf_index(body), Some(3));
        assert_eq!(scene.gltf_index(scene.root), None);
    }

    #[test]
    fn given_dirty_nodes_when_applying_to_json_then_scale_and_weights_are_written() {
        let mut scene = scene_from_json(avatar_document(), "fallback").expect("load scene");
        let armature = scene.graph.children(scene.root)[0];
        let body = scene.graph.children(scene.root)[1];

        scene.graph.node_mut(armature).scale = Vector3::new(2.0, 1.0, 0.5);
        scene.graph.mark_dirty(armature);
        scene.graph.node_mut(body).renderers[0]
            .set_weight(1, 25.0)
            .expect("weight index");
        scene.graph.mark_weights_dirty(body);

        assert_eq!(scene.apply_to_json(), 2);
        let json = scene.json();
        assert_eq!(json["nodes"][0]["scale"], serde_json::json!([2.0, 1.0, 0.5]));
        assert_eq!(json["nodes"][3]["weights"][1], serde_json::json!(0.25));
        assert_eq!(scene.graph.dirty_nodes().count(), 0);
    }

    #[test]
    fn given_matrix_node_when_scale_changes_then_matrix_columns_are_rescaled() {
        let mut json = serde_json::json!({
            "nodes": [{
                "name": "Root",
                "matrix": [2.0, 0.0, 0.0, 0.0,
                           0.0, 1.0, 0.0, 0.0,
                           0.0, 0.0, 1.0, 0.0,
                           0.0, 3.0, 0.0, 1.0]
            }]
        });

        assert_eq!(read_node_scale(&json["nodes"][0]), Vector3::new(2.0, 1.0, 1.0));
        write_node_scale(&mut json["nodes"][0], &Vector3::new(4.0, 1.0, 1.0));
        assert_eq!(json["nodes"][0]["matrix"][0], serde_json::json!(4.0));
        assert_eq!(json["nodes"][0]["matrix"][13], serde_json::json!(3.0));
    }

    #[test]
    fn given_document_without_scenes_when_loading_then_parentless_nodes_become_roots() {
        let json = serde_json::json!({
            "nodes": [
                {"name": "Armature", "children": [1]},
                {"name": "Hips"},
                {"name": "Hat"}
            ]
        });

        let scene = scene_from_json(json, "costume").expect("load scene");
        assert_eq!(scene.graph.name(scene.root), "costume");
        assert_eq!(scene.graph.children(scene.root).len(), 2);
        assert_eq!(scene.graph.len(), 4);
    }

    #[test]
    fn given_document_without_nodes_when_loading_then_error_is_returned() {
        let result = scene_from_json(serde_json::json!({"asset": {"version": "2.0"}}), "x");
        assert!(result.is_err());
    }

    #[test]
    fn given_vrm0_humanoid_when_finding_hips_then_node_index_is_returned() {
        let json = serde_json::json!({
            "extensions": {"VRM": {"humanoid": {"humanBones": [
                {"bone": "spine", "node": 5},
                {"bone": "hips", "node": 4}
            ]}}}
        });

        assert_eq!(find_hips_node(&json), Some(4));
        assert_eq!(find_hips_node(&serde_json::json!({})), None);
    }

    #[test]
    fn given_names_on_first_primitive_when_loading_then_shape_keys_are_named() {
        let json = serde_json::json!({
            "nodes": [{"name": "Face", "mesh": 0}],
            "meshes": [{
                "name": "Face",
                "primitives": [{
                    "attributes": {},
                    "targets": [{}, {}],
                    "extras": {"targetNames": ["Smile", "Blink"]}
                }]
            }]
        });

        let scene = scene_from_json(json, "vrm").expect("load scene");
        let face = scene.graph.children(scene.root)[0];
        let renderer = &scene.graph.node(face).renderers[0];
        assert_eq!(renderer.shape_key_name(0), Some("Smile"));
        assert_eq!(renderer.shape_key_name(1), Some("Blink"));
    }

    #[test]
    fn given_targets_without_names_when_loading_then_channels_stay_unnamed() {
        let json = serde_json::json!({
            "nodes": [{"name": "Skirt", "mesh": 0, "weights": [0.5, 0.0]}],
            "meshes": [{
                "name": "Skirt",
                "primitives": [{"attributes": {}, "targets": [{}, {}]}]
            }]
        });

        let scene = scene_from_json(json, "costume").expect("load scene");
        let skirt = scene.graph.children(scene.root)[0];
        let renderer = &scene.graph.node(skirt).renderers[0];
        assert_eq!(renderer.shape_key_count(), 2);
        assert_eq!(renderer.shape_key_name(0), None);
        assert_eq!(renderer.shape_key_name(1), None);
    }

    #[test]
    fn given_scale_only_change_on_mesh_node_when_applying_to_json_then_weights_are_untouched() {
        let json = serde_json::json!({
            "nodes": [
                {"name": "Chest", "mesh": 0},
                {"name": "Body", "mesh": 1, "weights": [0.3]}
            ],
            "meshes": [
                {"name": "Chest", "primitives": [{"attributes": {}}]},
                {
                    "name": "Body",
                    "extras": {"targetNames": ["Smile"]},
                    "primitives": [{"attributes": {}, "targets": [{}]}]
                }
            ]
        });
        let mut scene = scene_from_json(json, "costume").expect("load scene");
        let chest = scene.graph.children(scene.root)[0];
        let body = scene.graph.children(scene.root)[1];

        scene.graph.node_mut(chest).scale = Vector3::new(1.2, 1.0, 1.0);
        scene.graph.mark_dirty(chest);
        scene.graph.node_mut(body).scale = Vector3::new(0.5, 0.5, 0.5);
        scene.graph.mark_dirty(body);

        assert_eq!(scene.apply_to_json(), 2);
        let json = scene.json();
        assert!(json["nodes"][0].get("weights").is_none());
        assert_eq!(json["nodes"][1]["weights"], serde_json::json!([0.3]));
        assert_eq!(json["nodes"][1]["scale"], serde_json::json!([0.5, 0.5, 0.5]));
    }
}
