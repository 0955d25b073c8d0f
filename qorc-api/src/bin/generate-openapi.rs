//! Generates the OpenAPI document for the query orchestration API and
//! writes it to a file (default `openapi.json`) or stdout.
//!
//! Usage: `generate-openapi [--yaml] [output-path]`

use qorc_api::ApiDoc;
use std::env;
use std::fs;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let yaml = args.iter().any(|a| a == "--yaml");
    let output_path = args.iter().find(|a| !a.starts_with("--"));

    let document = if yaml {
        ApiDoc::to_yaml().unwrap_or_else(|e| {
            eprintln!("failed to generate OpenAPI YAML: {}", e);
            std::process::exit(1);
        })
    } else {
        ApiDoc::to_json().unwrap_or_else(|e| {
            eprintln!("failed to generate OpenAPI JSON: {}", e);
            std::process::exit(1);
        })
    };

    match output_path {
        Some(path) => {
            fs::write(path, document).unwrap_or_else(|e| {
                eprintln!("failed to write {}: {}", path, e);
                std::process::exit(1);
            });
            println!("wrote OpenAPI document to {}", path);
        }
        None => println!("{}", document),
    }
}
