//! services/api/src/bin/openapi.rs
//!
//! Writes the REST API's OpenAPI 3.0 document to disk so client code can be
//! generated from it without a running server.

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Output path defaults next to the workspace root; override with the
    // first argument, e.g. `openapi docs/openapi.json`.
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    std::fs::write(&path, ApiDoc::openapi().to_pretty_json()?)?;
    println!("OpenAPI document written to {}", path);
    Ok(())
}
