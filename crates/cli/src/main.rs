use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use rezn_core::{declaration_items, decode_desired, DesiredState, DESIRED_KEY, DESIRED_META_KEY};
use rezn_persist::{SqliteStore, Store};
use rezn_reconcile::{plan, MatchRule, Plan, TimestampNamer};
use rezn_runtime::{ContainerRuntime, DockerCli};
use serde::{Deserialize, Serialize};
use tracing::info;

mod signed;

#[derive(Parser, Debug)]
#[command(name = "reznctl", version, about = "Rezn CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Store location
    #[arg(long = "db", env = "REZN_DB_PATH", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a declaration file (JSON or YAML) as the desired state
    Apply {
        file: PathBuf,
        /// Refuse the file if any entry would be skipped
        #[arg(long = "strict", action = ArgAction::SetTrue)]
        strict: bool,
        /// Refuse files that are not a signed envelope
        #[arg(long = "require-signature", env = "REZN_REQUIRE_SIGNATURE", action = ArgAction::SetTrue)]
        require_signature: bool,
    },
    /// Print the stored desired state
    Get,
    /// Show what the next reconcile pass would do, without doing it
    Plan,
    /// List running instances grouped by the workload they belong to
    Ps,
}

/// Written next to the declaration on every apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApplyMeta {
    applied_at: String,
    source: String,
    /// `(kind, name)` of every well-formed entry, in document order.
    items: Vec<(String, String)>,
    /// Base64 signature of a signed apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sig_id: Option<String>,
}

/// A declaration ready to store: compact JSON list bytes, plus the signature id when the
/// file was a verified envelope.
#[derive(Debug)]
struct Declaration {
    json: Vec<u8>,
    sig_id: Option<String>,
}

fn init_tracing() {
    let env = std::env::var("REZN_LOG").unwrap_or_else(|_| "warn".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn max_decl_bytes() -> usize {
    std::env::var("REZN_MAX_DECL_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1 << 20) // 1 MiB default
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let store = SqliteStore::open(rezn_persist::resolve_path(cli.db.clone()))?;

    match cli.command {
        Commands::Apply { file, strict, require_signature } => {
            let raw = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let Declaration { json, sig_id } = load_declaration(&raw, is_yaml(&file), require_signature)?;
            let desired = decode_desired(&json)?;
            if strict && !desired.skipped.is_empty() {
                print_skipped(&desired);
                bail!("{} entries would be skipped; nothing stored", desired.skipped.len());
            }
            let (items, _) = declaration_items(&json)?;
            let meta = ApplyMeta {
                applied_at: chrono::Utc::now().to_rfc3339(),
                source: file.display().to_string(),
                items: items.into_iter().map(|i| (i.kind, i.name)).collect(),
                sig_id,
            };
            store.put(DESIRED_KEY, &json)?;
            store.put(DESIRED_META_KEY, &serde_json::to_vec(&meta)?)?;
            info!(source = %meta.source, signed = meta.sig_id.is_some(), workloads = desired.workloads.len(), "desired state stored");

            match cli.output {
                Output::Human => {
                    println!("applied {}: {} workloads, {} ignored, {} skipped", meta.source, desired.workloads.len(), desired.ignored, desired.skipped.len());
                    print_skipped(&desired);
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&desired)?),
            }
        }
        Commands::Get => {
            let raw = store.get(DESIRED_KEY)?.ok_or_else(|| anyhow!("no desired state stored (run `reznctl apply <file>` first)"))?;
            let doc: serde_json::Value = serde_json::from_slice(&raw).context("stored desired state is not JSON")?;
            match cli.output {
                Output::Human => {
                    if let Some(meta) = store.get(DESIRED_META_KEY)?.and_then(|m| serde_json::from_slice::<ApplyMeta>(&m).ok()) {
                        eprintln!("# applied {} from {}", meta.applied_at, meta.source);
                        if let Some(sig) = &meta.sig_id {
                            eprintln!("# signature {}", sig);
                        }
                    }
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                }
                Output::Json => println!("{}", serde_json::to_string(&doc)?),
            }
        }
        Commands::Plan => {
            let desired = match store.get(DESIRED_KEY)? {
                Some(raw) => decode_desired(&raw)?,
                None => DesiredState::default(),
            };
            let runtime = DockerCli::from_env();
            let observed = runtime.list_running().await?;
            let p = plan(&desired.workloads, &observed, MatchRule::from_env(), &mut TimestampNamer);
            match cli.output {
                Output::Human => {
                    print_plan(&p);
                    print_skipped(&desired);
                }
                Output::Json => {
                    #[derive(Serialize)]
                    struct Preview<'a> { plan: &'a Plan, skipped: &'a [rezn_core::SkippedItem] }
                    println!("{}", serde_json::to_string_pretty(&Preview { plan: &p, skipped: &desired.skipped })?);
                }
            }
        }
        Commands::Ps => {
            let workloads: Vec<String> = match store.get(DESIRED_KEY)? {
                Some(raw) => decode_desired(&raw)?.workloads.into_iter().map(|w| w.name).collect(),
                None => Vec::new(),
            };
            let observed = DockerCli::from_env().list_running().await?;
            let rows = group_instances(&workloads, &observed, MatchRule::from_env());
            match cli.output {
                Output::Human => {
                    println!("{:<20} INSTANCE", "WORKLOAD");
                    for (workload, instance) in rows {
                        println!("{:<20} {}", workload.unwrap_or("-"), instance);
                    }
                }
                Output::Json => {
                    #[derive(Serialize)]
                    struct Row<'a> { workload: Option<&'a str>, instance: &'a str }
                    let rows: Vec<_> = rows.into_iter().map(|(workload, instance)| Row { workload, instance }).collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
    }

    Ok(())
}

fn is_yaml(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"))
}

/// Turn a JSON or YAML declaration file into compact JSON bytes. The file is either a bare
/// list of `{kind, name, fields}` entries or a signed envelope, which must verify.
fn load_declaration(raw: &[u8], yaml: bool, require_signature: bool) -> Result<Declaration> {
    if raw.len() > max_decl_bytes() {
        bail!("declaration too large (>{} bytes)", max_decl_bytes());
    }
    let doc: serde_json::Value = if yaml {
        let val: serde_yaml::Value = serde_yaml::from_slice(raw).context("parsing YAML")?;
        serde_json::to_value(val).context("converting YAML to JSON")?
    } else {
        serde_json::from_slice(raw).context("parsing JSON")?
    };
    let (doc, sig_id) = if signed::is_envelope(&doc) {
        let verified = signed::verify_envelope(doc)?;
        (verified.program, Some(verified.sig_id))
    } else if require_signature {
        bail!("declaration is not signed; expected {{signature, program}}");
    } else {
        (doc, None)
    };
    if !doc.is_array() {
        bail!("declaration must be a list of {{kind, name, fields}} entries");
    }
    Ok(Declaration { json: serde_json::to_vec(&doc)?, sig_id })
}

/// `(workload, instance)` rows. An instance claimed by several workloads appears once per
/// workload; unclaimed instances come last with no workload.
fn group_instances<'a>(workloads: &'a [String], observed: &'a [String], rule: MatchRule) -> Vec<(Option<&'a str>, &'a str)> {
    let mut rows = Vec::new();
    for w in workloads {
        for c in observed.iter().filter(|c| rule.matches(w, c)) {
            rows.push((Some(w.as_str()), c.as_str()));
        }
    }
    for c in observed {
        if !workloads.iter().any(|w| rule.matches(w, c)) {
            rows.push((None, c.as_str()));
        }
    }
    rows
}

fn print_plan(p: &Plan) {
    println!("{:<20} {:>4} {:>4}", "WORKLOAD", "WANT", "HAVE");
    for w in &p.workloads {
        println!("{:<20} {:>4} {:>4}", w.workload, w.replicas, w.matched.len());
    }
    if p.is_empty() {
        println!("in sync; nothing to do");
        return;
    }
    for a in &p.actions {
        let sign = if a.verb() == "create" { '+' } else { '-' };
        println!("{} {} {}", sign, a.verb(), a.instance());
    }
}

fn print_skipped(d: &DesiredState) {
    for s in &d.skipped {
        eprintln!("skipped {}: {}", s.name, s.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(raw: &[u8], yaml: bool) -> Result<Declaration> {
        load_declaration(raw, yaml, false)
    }

    #[test]
    fn yaml_and_json_normalize_to_the_same_document() {
        let yaml = "- kind: pod\n  name: web\n  fields:\n    image: nginx\n    replicas: 2\n    ports: [80]\n";
        let json = br#"[{"kind":"pod","name":"web","fields":{"image":"nginx","replicas":2,"ports":[80]}}]"#;
        let a = load(yaml.as_bytes(), true).unwrap().json;
        let b = load(json, false).unwrap().json;
        let a: serde_json::Value = serde_json::from_slice(&a).unwrap();
        let b: serde_json::Value = serde_json::from_slice(&b).unwrap();
        assert_eq!(a, b);
        assert_eq!(decode_desired(&serde_json::to_vec(&a).unwrap()).unwrap().workloads[0].replicas, 2);
    }

    #[test]
    fn non_list_declaration_is_refused() {
        let e = load(br#"{"kind":"pod"}"#, false).unwrap_err().to_string();
        assert!(e.contains("must be a list"), "e={}", e);
        assert!(load(b"[oops", false).is_err());
    }

    fn signed_yaml() -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        use ed25519_dalek::{Signer, SigningKey};

        let program = serde_json::json!([{ "kind": "pod", "name": "web", "fields": { "image": "nginx", "replicas": 1 } }]);
        let key = SigningKey::from_bytes(&[3u8; 32]);
        let sig = key.sign(&serde_json::to_vec(&program).unwrap());
        let env = serde_json::json!({
            "signature": {
                "pub": STANDARD.encode(key.verifying_key().as_bytes()),
                "sig": STANDARD.encode(sig.to_bytes()),
                "algorithm": "ed25519",
            },
            "program": program,
        });
        serde_yaml::to_string(&env).unwrap()
    }

    #[test]
    fn signed_envelope_stores_only_the_program() {
        let d = load(signed_yaml().as_bytes(), true).unwrap();
        assert!(d.sig_id.is_some());
        let doc: serde_json::Value = serde_json::from_slice(&d.json).unwrap();
        assert!(doc.is_array());
        assert_eq!(decode_desired(&d.json).unwrap().workloads[0].name, "web");
    }

    #[test]
    fn tampered_envelope_is_refused() {
        let tampered = signed_yaml().replace("replicas: 1", "replicas: 9");
        let e = load(tampered.as_bytes(), true).unwrap_err();
        assert!(format!("{:#}", e).contains("verification failed"), "e={:#}", e);
    }

    #[test]
    fn unsigned_file_is_refused_when_signature_required() {
        let json = br#"[{"kind":"pod","name":"web","fields":{"image":"nginx","replicas":1}}]"#;
        assert!(load_declaration(json, false, false).unwrap().sig_id.is_none());
        let e = load_declaration(json, false, true).unwrap_err().to_string();
        assert!(e.contains("not signed"), "e={}", e);
    }

    #[test]
    fn apply_meta_omits_sig_id_when_unsigned() {
        let meta = ApplyMeta { applied_at: "t".into(), source: "f".into(), items: vec![], sig_id: None };
        let v = serde_json::to_value(&meta).unwrap();
        assert!(v.get("sig_id").is_none());
        let back: ApplyMeta = serde_json::from_value(v).unwrap();
        assert!(back.sig_id.is_none());
    }

    #[test]
    fn yaml_extension_detection() {
        assert!(is_yaml(Path::new("fleet.yaml")));
        assert!(is_yaml(Path::new("fleet.yml")));
        assert!(!is_yaml(Path::new("fleet.json")));
        assert!(!is_yaml(Path::new("fleet")));
    }

    #[test]
    fn group_instances_lists_orphans_last() {
        let workloads = vec!["web".to_string(), "api".to_string()];
        let observed: Vec<String> = ["api-1", "cache-1", "web-2"].iter().map(|s| s.to_string()).collect();
        let rows = group_instances(&workloads, &observed, MatchRule::Prefix);
        assert_eq!(rows, vec![(Some("web"), "web-2"), (Some("api"), "api-1"), (None, "cache-1")]);
    }
}
