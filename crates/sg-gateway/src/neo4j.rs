//! Neo4j backend built on `neo4rs`.

use crate::backend::{GraphBackend, RecordStream};
use crate::columns::return_columns;
use crate::GatewayError;
use async_trait::async_trait;
use futures_util::{future, StreamExt, TryFutureExt, TryStreamExt};
use neo4rs::{
    BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNode, BoltNull, BoltPath,
    BoltString, BoltType, BoltUnboundedRelation, ConfigBuilder, Graph, Query, Row,
};
use serde::de::{Deserialize, IntoDeserializer};
use serde_json::{json, Map, Value};
use sg_core::Record;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default size of the bolt connection pool.
pub const DEFAULT_POOL_SIZE: usize = 50;

/// Rows pulled from the server per fetch.
pub const DEFAULT_FETCH_SIZE: usize = 200;

/// Query used to check that the database answers.
pub const PROBE_QUERY: &str = "MATCH (n) RETURN n LIMIT 1";

/// Connection settings for [`Neo4jBackend`].
#[derive(Debug, Clone)]
pub struct Neo4jSettings {
    /// Bolt URI, e.g. `bolt://localhost:7687`.
    pub uri: String,
    pub user: String,
    pub password: String,
    /// Database name; the server default when `None`.
    pub database: Option<String>,
    pub max_connections: usize,
    pub fetch_size: usize,
}

impl Neo4jSettings {
    pub fn new(
        uri: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            user: user.into(),
            password: password.into(),
            database: None,
            max_connections: DEFAULT_POOL_SIZE,
            fetch_size: DEFAULT_FETCH_SIZE,
        }
    }
}

/// Graph backend talking bolt to a Neo4j server.
///
/// The pool is created lazily by `neo4rs`; the first real handshake happens
/// on the first probe or query.
pub struct Neo4jBackend {
    pool: Arc<RwLock<Option<Graph>>>,
    uri: String,
}

impl Neo4jBackend {
    /// Builds the connection pool.
    pub async fn connect(settings: &Neo4jSettings) -> Result<Self, GatewayError> {
        let mut builder = ConfigBuilder::default()
            .uri(settings.uri.as_str())
            .user(settings.user.as_str())
            .password(settings.password.as_str())
            .max_connections(settings.max_connections)
            .fetch_size(settings.fetch_size);

        if let Some(db) = &settings.database {
            builder = builder.db(db.as_str());
        }

        let config = builder
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        let graph = Graph::connect(config).await?;

        info!(
            "Neo4j pool ready for {} ({} connections)",
            settings.uri, settings.max_connections
        );

        Ok(Self {
            pool: Arc::new(RwLock::new(Some(graph))),
            uri: settings.uri.clone(),
        })
    }
}

#[async_trait]
impl GraphBackend for Neo4jBackend {
    async fn probe(&self) -> Result<(), GatewayError> {
        let graph = current_graph(&self.pool).await?;
        graph.run(Query::new(PROBE_QUERY.to_string())).await?;
        Ok(())
    }

    fn execute(&self, text: &str, params: &Map<String, Value>) -> RecordStream {
        let pool = Arc::clone(&self.pool);
        let query = build_query(text, params);
        let columns = return_columns(text);

        async move {
            let graph = current_graph(&pool).await?;
            let rows = graph.execute(query).await?;
            Ok::<_, GatewayError>(rows.into_stream().map_err(GatewayError::from))
        }
        .try_flatten_stream()
        .and_then(move |row| future::ready(row_to_record(&row, columns.as_deref())))
        .boxed()
    }

    async fn close(&self) {
        if self.pool.write().await.take().is_some() {
            info!("Neo4j pool for {} closed", self.uri);
        }
    }
}

async fn current_graph(pool: &RwLock<Option<Graph>>) -> Result<Graph, GatewayError> {
    pool.read().await.clone().ok_or(GatewayError::Closed)
}

fn build_query(text: &str, params: &Map<String, Value>) -> Query {
    params
        .iter()
        .fold(Query::new(text.to_string()), |query, (key, value)| {
            query.param(key, to_bolt(value))
        })
}

/// Maps a JSON parameter onto the bolt type system. Integral numbers become
/// `Integer`, every other number `Float`.
fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::Integer(BoltInteger::new(i)),
            None => BoltType::Float(BoltFloat::new(n.as_f64().unwrap_or_default())),
        },
        Value::String(s) => BoltType::String(BoltString::new(s)),
        Value::Array(items) => {
            BoltType::List(BoltList::from(items.iter().map(to_bolt).collect::<Vec<_>>()))
        }
        Value::Object(entries) => {
            let mut map = BoltMap::new();
            for (key, value) in entries {
                map.put(BoltString::new(key), to_bolt(value));
            }
            BoltType::Map(map)
        }
    }
}

/// Builds a record from `row` with its fields in result column order.
///
/// Rows arrive as maps, so the order comes from `columns` when they name
/// exactly the row's keys. Otherwise keys are sorted by name, which is how
/// the server orders `RETURN *`.
fn row_to_record(row: &Row, columns: Option<&[String]>) -> Result<Record, GatewayError> {
    let mut values: HashMap<String, BoltType> = row
        .to_strict()
        .map_err(|e| GatewayError::Decode(e.to_string()))?;

    column_order(&values, columns)
        .into_iter()
        .map(|key| -> Result<(String, Value), GatewayError> {
            let value = values.remove(&key).unwrap_or(BoltType::Null(BoltNull));
            let json = from_bolt(&value)
                .map_err(|e| GatewayError::Decode(format!("column `{}`: {}", key, e)))?;
            Ok((key, json))
        })
        .collect()
}

fn column_order(values: &HashMap<String, BoltType>, columns: Option<&[String]>) -> Vec<String> {
    if let Some(columns) = columns {
        if columns.len() == values.len() && columns.iter().all(|c| values.contains_key(c)) {
            return columns.to_vec();
        }
        debug!(
            "Result columns {:?} do not match row keys, ordering by name",
            columns
        );
    }

    let mut keys: Vec<String> = values.keys().cloned().collect();
    keys.sort();
    keys
}

/// Maps a bolt value onto JSON. Graph entities keep their identity and
/// labels or type next to their properties:
///
/// - node: `{ identity, labels, properties }`
/// - relationship: `{ identity, start, end, type, properties }`
/// - path: `{ start, end, segments: [{ start, relationship, end }], length }`
///
/// Temporal values become their ISO-8601 text.
fn from_bolt(value: &BoltType) -> Result<Value, String> {
    let json = match value {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(b) => Value::Bool(b.value),
        BoltType::Integer(i) => Value::from(i.value),
        BoltType::Float(f) => Value::from(f.value),
        BoltType::String(s) => Value::String(s.value.clone()),
        BoltType::Bytes(b) => Value::Array(b.value.iter().map(|&byte| Value::from(byte)).collect()),
        BoltType::List(items) => Value::Array(
            items
                .value
                .iter()
                .map(from_bolt)
                .collect::<Result<_, _>>()?,
        ),
        BoltType::Map(map) => Value::Object(from_bolt_map(map)?),
        BoltType::Node(node) => node_to_json(node)?,
        BoltType::Relation(rel) => json!({
            "identity": rel.id.value,
            "start": rel.start_node_id.value,
            "end": rel.end_node_id.value,
            "type": rel.typ.value,
            "properties": from_bolt_map(&rel.properties)?,
        }),
        BoltType::UnboundedRelation(rel) => json!({
            "identity": rel.id.value,
            "type": rel.typ.value,
            "properties": from_bolt_map(&rel.properties)?,
        }),
        BoltType::Path(path) => path_to_json(path)?,
        BoltType::Point2D(p) => json!({ "srid": p.sr_id.value, "x": p.x.value, "y": p.y.value }),
        BoltType::Point3D(p) => json!({
            "srid": p.sr_id.value,
            "x": p.x.value,
            "y": p.y.value,
            "z": p.z.value,
        }),
        other => Value::deserialize(other.into_deserializer()).map_err(|e| e.to_string())?,
    };
    Ok(json)
}

fn from_bolt_map(map: &BoltMap) -> Result<Map<String, Value>, String> {
    map.value
        .iter()
        .map(|(key, value)| -> Result<(String, Value), String> {
            Ok((key.value.clone(), from_bolt(value)?))
        })
        .collect()
}

fn node_to_json(node: &BoltNode) -> Result<Value, String> {
    let labels: Vec<Value> = node.labels.value.iter().map(from_bolt).collect::<Result<_, _>>()?;
    Ok(json!({
        "identity": node.id.value,
        "labels": labels,
        "properties": from_bolt_map(&node.properties)?,
    }))
}

/// Expands a path into segments. `indices` holds (relationship, node)
/// pairs: the relationship index is 1-based and negative when the hop runs
/// against its direction, the node index points into `nodes`.
fn path_to_json(path: &BoltPath) -> Result<Value, String> {
    let nodes: Vec<&BoltNode> = path
        .nodes
        .value
        .iter()
        .filter_map(|n| match n {
            BoltType::Node(node) => Some(node),
            _ => None,
        })
        .collect();
    let rels: Vec<&BoltUnboundedRelation> = path
        .rels
        .value
        .iter()
        .filter_map(|r| match r {
            BoltType::UnboundedRelation(rel) => Some(rel),
            _ => None,
        })
        .collect();
    let indices: Vec<i64> = path
        .indices
        .value
        .iter()
        .filter_map(|i| match i {
            BoltType::Integer(i) => Some(i.value),
            _ => None,
        })
        .collect();

    let first = *nodes.first().ok_or("path without nodes")?;
    let mut prev = first;
    let mut segments = Vec::with_capacity(indices.len() / 2);

    for hop in indices.chunks_exact(2) {
        let (rel_index, node_index) = (hop[0], hop[1]);
        let next = usize::try_from(node_index)
            .ok()
            .and_then(|i| nodes.get(i).copied())
            .ok_or_else(|| format!("path node index {} out of range", node_index))?;
        let rel = usize::try_from(rel_index.unsigned_abs())
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| rels.get(i).copied())
            .ok_or_else(|| format!("path relationship index {} out of range", rel_index))?;

        let (start, end) = if rel_index > 0 { (prev, next) } else { (next, prev) };
        segments.push(json!({
            "start": node_to_json(prev)?,
            "relationship": {
                "identity": rel.id.value,
                "start": start.id.value,
                "end": end.id.value,
                "type": rel.typ.value,
                "properties": from_bolt_map(&rel.properties)?,
            },
            "end": node_to_json(next)?,
        }));
        prev = next;
    }

    Ok(json!({
        "start": node_to_json(first)?,
        "end": node_to_json(prev)?,
        "length": segments.len(),
        "segments": segments,
    }))
}
