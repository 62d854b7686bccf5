//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions of every monitoring resource as a
//! multi-document YAML stream.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/monitoring.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use monitoring_operator::crd::all_crds;

fn main() {
    for crd in all_crds() {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
