//! Zentinel SOAP model dump tool.
//!
//! Run with: `zentinel-soap-dump --input message.xml`
//!
//! Builds the object model of a message and prints an outline of it. With
//! `--first-child-only` only the document element and its first child are
//! pulled, which shows how little of the stream a shallow read consumes.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_soap_model::{BuilderConfig, Document, NodeId, NodeKind, TokenSource, XmlTokenSource};

/// Print the object model outline of an XML or SOAP message.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Message to read
    #[arg(short, long)]
    input: PathBuf,

    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Expected SOAP version ("1.1", "1.2", namespace or content type)
    #[arg(long)]
    soap_version: Option<String>,

    /// Treat the input as plain XML instead of a SOAP envelope
    #[arg(long)]
    plain: bool,

    /// Only pull the document element and its first child
    #[arg(long)]
    first_child_only: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Load configuration
    let config = if args.config.exists() {
        let content = std::fs::read_to_string(&args.config).context("Failed to read config file")?;
        BuilderConfig::from_yaml(&content).context("Failed to parse config file")?
    } else {
        info!("Config file not found, using defaults");
        BuilderConfig::default()
    };

    info!(
        preserve_whitespace = config.settings.preserve_whitespace,
        max_depth = config.settings.max_depth,
        capture_payload = config.opaque.capture_payload,
        "Configuration loaded"
    );

    let file = File::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let source = XmlTokenSource::from_reader(BufReader::new(file));

    let mut doc = if args.plain {
        Document::with_config(source, &config)
    } else {
        Document::soap_with_config(source, args.soap_version.as_deref(), &config)
            .context("Invalid --soap-version")?
    };

    let outcome = if args.first_child_only {
        doc.document_element()
            .and_then(|root| doc.first_child(root))
            .map(|_| ())
    } else {
        doc.build_all()
    };

    if let Ok(Some(version)) = doc.soap_version() {
        println!("SOAP {version}");
    }
    print_outline(&doc, doc.document_node(), 0);
    println!("events consumed: {}", doc.source_position());

    if let Err(e) = outcome {
        warn!(error = %e, fault_code = e.fault_code().as_str(), "Build failed");
        return Err(e).context("Failed to build document");
    }
    doc.close();
    Ok(())
}

/// Print what has been built so far; never pulls from the source.
fn print_outline<S: TokenSource>(doc: &Document<S>, id: NodeId, indent: usize) {
    let node = doc.node(id);
    let mark = if node.complete { "" } else { " (incomplete)" };
    let pad = "  ".repeat(indent);
    match &node.kind {
        NodeKind::Document => println!("{pad}document{mark}"),
        NodeKind::Element(element) => {
            println!("{pad}<{}> [{}]{mark}", element.name, element.role.as_str())
        }
        NodeKind::Text { value, cdata } => {
            let label = if *cdata { "cdata" } else { "text" };
            println!("{pad}{label} {:?}", value.trim());
        }
        NodeKind::Comment(text) => println!("{pad}comment {:?}", text.trim()),
        NodeKind::ProcessingInstruction { target, .. } => println!("{pad}pi {target}"),
        NodeKind::DocType(text) => println!("{pad}doctype {text}"),
        NodeKind::Opaque(placeholder) => println!("{pad}<{}> [opaque]", placeholder.name),
    }
    for child in doc.arena().children(id) {
        print_outline(doc, child, indent + 1);
    }
}
