//! Vertex partitioning and message routing
//!
//! The graph's vertex list is split into contiguous chunks, one per worker.
//! The coordinator keeps the resulting [`PartitionMap`] and uses it at every
//! barrier to hand each message to the worker owning its target.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::error::PregelError;
use super::message::Message;
use super::vertex::{AccumulatorMap, OutboundEdge, VertexId, VertexSlot};
use crate::graph::{EdgeRecord, Graph};

/// Vertex id -> owning partition
#[derive(Debug, Clone)]
pub struct PartitionMap {
    owners: HashMap<VertexId, usize>,
    partitions: usize,
}

impl PartitionMap {
    /// Split the graph into at most `workers` contiguous partitions
    ///
    /// Always yields at least one partition, even for an empty graph.
    pub(crate) fn build(graph: &Graph, workers: usize) -> (Self, Vec<Vec<VertexSlot>>) {
        let workers = workers.max(1);
        let chunk = graph.vertex_count().div_ceil(workers).max(1);
        let outbound = graph.outbound();

        let mut owners = HashMap::with_capacity(graph.vertex_count());
        let mut partitions: Vec<Vec<VertexSlot>> = Vec::new();

        for (index, chunk) in graph.vertices.chunks(chunk).enumerate() {
            let slots = chunk
                .iter()
                .map(|vertex| {
                    owners.insert(vertex.id.clone(), index);
                    let edges: Arc<[OutboundEdge]> = outbound
                        .get(&vertex.id)
                        .map(|edges| edges.iter().map(|edge| outbound_edge(edge)).collect())
                        .unwrap_or_else(|| Arc::from(Vec::new()));
                    VertexSlot {
                        id: vertex.id.clone(),
                        document: Arc::new(vertex_document(&vertex.id, &vertex.attributes)),
                        edges,
                        accumulators: AccumulatorMap::new(),
                    }
                })
                .collect();
            partitions.push(slots);
        }
        if partitions.is_empty() {
            partitions.push(Vec::new());
        }

        let map = Self {
            owners,
            partitions: partitions.len(),
        };
        (map, partitions)
    }

    /// Number of partitions
    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Partition owning a vertex
    pub fn owner(&self, vertex: &VertexId) -> Option<usize> {
        self.owners.get(vertex).copied()
    }

    /// Group messages by owning partition, preserving their relative order
    pub fn route(&self, messages: Vec<Message>) -> Result<Vec<Vec<Message>>, PregelError> {
        let mut routed: Vec<Vec<Message>> = vec![Vec::new(); self.partitions];
        for message in messages {
            let owner = self
                .owner(&message.target)
                .ok_or_else(|| PregelError::UnknownVertex {
                    sender: message.sender.clone(),
                    target: message.target.clone(),
                })?;
            routed[owner].push(message);
        }
        Ok(routed)
    }
}

fn vertex_document(id: &VertexId, attributes: &Map<String, Value>) -> Value {
    let mut document = attributes.clone();
    document.insert("_id".to_string(), Value::String(id.to_string()));
    Value::Object(document)
}

fn outbound_edge(edge: &EdgeRecord) -> OutboundEdge {
    let mut document = edge.attributes.clone();
    document.insert("_from".to_string(), Value::String(edge.from.to_string()));
    document.insert("_to".to_string(), Value::String(edge.to.to_string()));
    OutboundEdge {
        to: edge.to.clone(),
        document: Value::Object(document),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn line(n: usize) -> Graph {
        let mut graph = Graph::new();
        for i in 0..n {
            graph.add_vertex(format!("v{}", i));
        }
        for i in 1..n {
            graph.add_edge(format!("v{}", i - 1), format!("v{}", i));
        }
        graph
    }

    #[test]
    fn test_contiguous_chunks() {
        let (map, partitions) = PartitionMap::build(&line(5), 2);
        assert_eq!(map.partitions(), 2);
        let ids: Vec<Vec<_>> = partitions
            .iter()
            .map(|p| p.iter().map(|s| s.id.to_string()).collect())
            .collect();
        assert_eq!(ids, vec![vec!["v0", "v1", "v2"], vec!["v3", "v4"]]);
        assert_eq!(map.owner(&"v3".into()), Some(1));
    }

    #[test]
    fn test_more_workers_than_vertices() {
        let (map, partitions) = PartitionMap::build(&line(2), 8);
        assert_eq!(map.partitions(), 2);
        assert!(partitions.iter().all(|p| p.len() == 1));
    }

    #[test]
    fn test_empty_graph_has_one_partition() {
        let (map, partitions) = PartitionMap::build(&Graph::new(), 4);
        assert_eq!(map.partitions(), 1);
        assert!(partitions[0].is_empty());
    }

    #[test]
    fn test_documents() {
        let mut graph = Graph::new();
        let mut attributes = Map::new();
        attributes.insert("weight".into(), json!(4));
        graph
            .add_vertex("a")
            .add_vertex("b")
            .add_edge_with("a", "b", attributes);

        let (_, partitions) = PartitionMap::build(&graph, 1);
        let a = &partitions[0][0];
        assert_eq!(*a.document, json!({"_id": "a"}));
        assert_eq!(a.edges.len(), 1);
        assert_eq!(a.edges[0].document, json!({"_from": "a", "_to": "b", "weight": 4}));
        assert!(partitions[0][1].edges.is_empty());
    }

    #[test]
    fn test_route() {
        let (map, _) = PartitionMap::build(&line(4), 2);
        let routed = map
            .route(vec![
                Message::new("v0", "v3", "d", json!(1)),
                Message::new("v0", "v1", "d", json!(2)),
                Message::new("v1", "v2", "d", json!(3)),
            ])
            .unwrap();
        assert_eq!(routed[0].len(), 1);
        assert_eq!(routed[1].len(), 2);
        assert_eq!(routed[1][0].target.as_str(), "v3");
    }

    #[test]
    fn test_route_unknown_target() {
        let (map, _) = PartitionMap::build(&line(2), 1);
        let err = map.route(vec![Message::new("v0", "nowhere", "d", json!(1))]).unwrap_err();
        assert!(matches!(err, PregelError::UnknownVertex { target, .. } if target.as_str() == "nowhere"));
    }
}
