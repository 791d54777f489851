//! HTTP JSON API over the tree stores
//!
//! `clinitree serve` → answers admin calls on 127.0.0.1:<port>.
//! Every body is `{ ok, data, error }`.

use crate::db::{Database, DbError};
use crate::model::NodeKind;
use crate::validate::ValidationOptions;
use crate::zone::Region;
use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{info, warn};

#[derive(Serialize)]
struct ApiResponse<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Status code and JSON body of one reply
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    fn json<T: Serialize>(status: u16, data: T) -> Self {
        match serde_json::to_string(&ApiResponse::success(data)) {
            Ok(body) => Self { status, body },
            Err(e) => Self::error(500, format!("Failed to encode response: {}", e)),
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        let body = serde_json::to_string(&ApiResponse::failure(message))
            .unwrap_or_else(|_| r#"{"ok":false,"data":null,"error":"internal error"}"#.to_string());
        Self { status, body }
    }

    fn not_found() -> Self {
        Self::error(404, "Not found")
    }
}

impl From<DbError> for Reply {
    fn from(e: DbError) -> Self {
        let status = match &e {
            DbError::NotFound { .. } | DbError::RegionNotFound(_) => 404,
            DbError::Validation(_) => 400,
            _ => 500,
        };
        Reply::error(status, e.to_string())
    }
}

#[derive(Deserialize, Default)]
struct TreeQuery {
    /// Zone id, or a region name
    zone: Option<String>,
}

#[derive(Deserialize)]
struct NewTreeRequest {
    zone_id: i32,
    name: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct NewNodeRequest {
    parent_node_id: Option<i32>,
    #[serde(flatten)]
    kind: NodeKind,
}

#[derive(Deserialize)]
struct NewAnswerRequest {
    answer_text: String,
    display_order: Option<i32>,
    next_node_id: Option<i32>,
}

#[derive(Serialize)]
struct Created {
    id: i32,
}

#[derive(Serialize)]
struct Deleted {
    deleted: usize,
}

fn parse_body<'a, T: Deserialize<'a>>(body: &'a str) -> Result<T, Reply> {
    serde_json::from_str(body).map_err(|e| Reply::error(400, format!("Invalid JSON: {}", e)))
}

fn parse_id(segment: &str) -> Result<i32, Reply> {
    segment.parse::<i32>().map_err(|_| Reply::not_found())
}

fn zone_filter(db: &Database, query: &str) -> Result<Option<i32>, Reply> {
    let query: TreeQuery = serde_urlencoded::from_str(query)
        .map_err(|e| Reply::error(400, format!("Invalid query: {}", e)))?;
    match query.zone {
        None => Ok(None),
        Some(zone) => match zone.parse::<i32>() {
            Ok(id) => Ok(Some(id)),
            Err(_) => {
                let region = zone
                    .parse::<Region>()
                    .map_err(|e| Reply::error(400, e.to_string()))?;
                Ok(Some(db.zone_by_region(region)?.id))
            }
        },
    }
}

/// Route one request. Kept free of I/O so it can be called directly.
pub fn route(
    db: &Database,
    options: &ValidationOptions,
    method: &Method,
    path: &str,
    query: &str,
    body: &str,
) -> Reply {
    dispatch(db, options, method, path, query, body).unwrap_or_else(|reply| reply)
}

fn dispatch(
    db: &Database,
    options: &ValidationOptions,
    method: &Method,
    path: &str,
    query: &str,
    body: &str,
) -> Result<Reply, Reply> {
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let reply = match (method, segments.as_slice()) {
        (Method::Get, ["api", "zones"]) => Reply::json(200, db.list_zones()?),

        (Method::Get, ["api", "trees"]) => {
            let zone_id = zone_filter(db, query)?;
            Reply::json(200, db.list_trees(zone_id)?)
        }
        (Method::Post, ["api", "trees"]) => {
            let req: NewTreeRequest = parse_body(body)?;
            let id = db.create_tree(req.zone_id, &req.name, req.description.as_deref())?;
            Reply::json(201, Created { id })
        }
        (Method::Get, ["api", "trees", tree_id]) => Reply::json(200, db.get_tree(parse_id(tree_id)?)?),
        (Method::Delete, ["api", "trees", tree_id]) => {
            db.delete_tree(parse_id(tree_id)?)?;
            Reply::json(200, Deleted { deleted: 1 })
        }
        (Method::Get, ["api", "trees", tree_id, "hierarchy"]) => {
            Reply::json(200, db.tree_hierarchy(parse_id(tree_id)?)?)
        }
        (Method::Get, ["api", "trees", tree_id, "validate"]) => {
            Reply::json(200, db.validate_tree(parse_id(tree_id)?, options)?)
        }
        (Method::Post, ["api", "trees", tree_id, "nodes"]) => {
            let tree_id = parse_id(tree_id)?;
            let req: NewNodeRequest = parse_body(body)?;
            let id = db.create_node(tree_id, req.parent_node_id, req.kind)?;
            Reply::json(201, Created { id })
        }

        (Method::Delete, ["api", "nodes", node_id]) => {
            let deleted = db.delete_node(parse_id(node_id)?)?;
            Reply::json(200, Deleted { deleted })
        }
        (Method::Post, ["api", "nodes", node_id, "answers"]) => {
            let node_id = parse_id(node_id)?;
            let req: NewAnswerRequest = parse_body(body)?;
            let id = db.create_answer(node_id, &req.answer_text, req.display_order, req.next_node_id)?;
            Reply::json(201, Created { id })
        }

        (Method::Delete, ["api", "answers", answer_id]) => {
            db.delete_answer(parse_id(answer_id)?)?;
            Reply::json(200, Deleted { deleted: 1 })
        }

        _ => Reply::not_found(),
    };
    Ok(reply)
}

/// Start the API server; handles one request at a time
pub fn start_server(port: u16, db: Database, options: ValidationOptions) -> std::io::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let server = Server::http(&addr).map_err(|e| std::io::Error::other(e.to_string()))?;

    info!(%addr, "server listening");
    eprintln!("\n\x1b[1;32m🌳 clinitree\x1b[0m");
    eprintln!("   API: http://localhost:{}/api/zones", port);
    eprintln!("   Press Ctrl+C to stop\n");

    for request in server.incoming_requests() {
        if let Err(e) = handle_request(&db, &options, request) {
            warn!(error = %e, "failed to answer request");
        }
    }

    Ok(())
}

fn handle_request(db: &Database, options: &ValidationOptions, mut request: Request) -> std::io::Result<()> {
    let url = request.url().to_string();
    let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
    let method = request.method().clone();

    let mut body = String::new();
    let reply = match request.as_reader().read_to_string(&mut body) {
        Ok(_) => route(db, options, &method, path, query, &body),
        Err(e) => Reply::error(400, format!("Failed to read body: {}", e)),
    };

    if reply.status >= 500 {
        warn!(%method, %path, status = reply.status, "request failed");
    }

    let mut response = Response::from_string(reply.body).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    request.respond(response)
}
