//! Prints the CRD manifests for every kind this operator owns, for
//! `kubectl apply -f` or bundling into a Helm chart's `crds/` directory.
//!
//! ```text
//! crdgen > deploy/crds.yaml
//! crdgen --output json
//! ```

use clap::Parser;
use kube::CustomResourceExt;
use vso::crd::auth::{AuthConfig, GlobalAuthDefault};
use vso::crd::msr::{AppSecret, DynamicSecret, PkiSecret, StaticSecret};
use vso::crd::transformation::Transformation;

#[derive(Parser, Debug)]
#[command(name = "crdgen", about = "Prints CRD manifests for the vault-secrets-operator")]
struct Args {
    /// `yaml` or `json`.
    #[arg(long, default_value = "yaml", value_parser = ["yaml", "json"])]
    output: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let crds = vec![
        StaticSecret::crd(),
        DynamicSecret::crd(),
        PkiSecret::crd(),
        AppSecret::crd(),
        AuthConfig::crd(),
        GlobalAuthDefault::crd(),
        Transformation::crd(),
    ];

    match args.output.as_str() {
        "json" => {
            for crd in &crds {
                println!("{}", serde_json::to_string_pretty(crd)?);
            }
        }
        _ => {
            for crd in &crds {
                println!("---");
                print!("{}", serde_yaml::to_string(crd)?);
            }
        }
    }

    Ok(())
}
