//! Small frozen graphs written to disk as checkpoints.

use std::path::{Path, PathBuf};

use tensorflow::{DataType, Graph, Operation, Tensor};

fn input(graph: &mut Graph) -> Operation {
    let mut desc = graph.new_operation("Placeholder", "x").unwrap();
    desc.set_attr_type("dtype", DataType::Float).unwrap();
    desc.finish().unwrap()
}

fn constant(graph: &mut Graph, name: &str, dims: &[u64], values: &[f32]) -> Operation {
    let mut desc = graph.new_operation("Const", name).unwrap();
    desc.set_attr_type("dtype", DataType::Float).unwrap();
    desc.set_attr_tensor("value", Tensor::new(dims).with_values(values).unwrap())
        .unwrap();
    desc.finish().unwrap()
}

fn apply(graph: &mut Graph, op_type: &str, name: &str, inputs: &[&Operation]) -> Operation {
    let mut desc = graph.new_operation(op_type, name).unwrap();
    for input in inputs {
        desc.add_input((*input).clone());
    }
    desc.finish().unwrap()
}

fn to_float(graph: &mut Graph, name: &str, input: &Operation) -> Operation {
    let mut desc = graph.new_operation("Cast", name).unwrap();
    desc.add_input(input.clone());
    desc.set_attr_type("DstT", DataType::Float).unwrap();
    desc.finish().unwrap()
}

/// `Identity` yields `logits` regardless of the image fed to `x`, which is
/// still consumed so the feed is part of the run.
pub fn constant_logits(logits: &[f32]) -> Vec<u8> {
    let mut graph = Graph::new();
    let x = input(&mut graph);
    let size = apply(&mut graph, "Size", "size", &[&x]);
    let size = to_float(&mut graph, "size_f", &size);
    let zero = constant(&mut graph, "zero", &[], &[0.0]);
    let nothing = apply(&mut graph, "Mul", "nothing", &[&size, &zero]);
    let values = constant(&mut graph, "logits", &[logits.len() as u64], logits);
    let sum = apply(&mut graph, "Add", "sum", &[&values, &nothing]);
    apply(&mut graph, "Identity", "Identity", &[&sum]);
    graph.graph_def().unwrap()
}

/// `Identity` yields the shape of the tensor fed to `x`.
pub fn input_shape() -> Vec<u8> {
    let mut graph = Graph::new();
    let x = input(&mut graph);
    let shape = apply(&mut graph, "Shape", "shape", &[&x]);
    let shape = to_float(&mut graph, "shape_f", &shape);
    apply(&mut graph, "Identity", "Identity", &[&shape]);
    graph.graph_def().unwrap()
}

/// Writes `<stem>.pb` and, when given, its `<stem>.json` metadata.
pub fn write_checkpoint(
    dir: &Path,
    stem: &str,
    graph_def: &[u8],
    meta: Option<serde_json::Value>,
) -> PathBuf {
    let path = dir.join(format!("{stem}.pb"));
    std::fs::write(&path, graph_def).unwrap();
    if let Some(meta) = meta {
        std::fs::write(dir.join(format!("{stem}.json")), meta.to_string()).unwrap();
    }
    path
}
