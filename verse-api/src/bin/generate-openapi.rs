//! Prints the Verse OpenAPI document as JSON.
//!
//! Usage:
//!   cargo run -p verse-api --bin generate-openapi --features openapi > openapi.json

use verse_api::ApiDoc;

fn main() {
    match ApiDoc::to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize OpenAPI document: {}", e);
            std::process::exit(1);
        }
    }
}
